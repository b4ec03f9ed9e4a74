use super::Sections;
use crate::diag::{Diagnostic, Fatal, Reporter};
use crate::section::{Section, SectionKind, SectionModifier};

fn mask(align: u8) -> u32 {
    (1u32 << align) - 1
}

impl Sections {
    /// Merge a re-declaration into the existing section `id`, tightening its
    /// constraints. Individual incompatibilities are reported as errors; if
    /// any occurred, the whole declaration fails fatally.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn merge_sections(
        &mut self,
        id: usize,
        kind: SectionKind,
        org: Option<u16>,
        bank: Option<u32>,
        align: u8,
        align_ofs: u16,
        modifier: SectionModifier,
        diag: &mut Reporter,
    ) -> Result<(), Fatal> {
        let sect = &mut self.sections[id];
        let mut errors = 0usize;

        if kind != sect.kind {
            diag.error(format!(
                "Section already exists but with type {}",
                sect.kind.info().name
            ));
            errors += 1;
        }

        // A FRAGMENT declaration may append to a section first declared
        // plain; the section becomes a fragment from then on (the same
        // one-way transition fragment literals perform).
        let plain_to_fragment =
            sect.modifier == SectionModifier::Normal && modifier == SectionModifier::Fragment;

        if sect.modifier != modifier && !plain_to_fragment {
            diag.error(format!(
                "Section already declared as SECTION {}",
                sect.modifier
            ));
            errors += 1;
        } else {
            match modifier {
                SectionModifier::Union | SectionModifier::Fragment => {
                    if plain_to_fragment {
                        sect.modifier = SectionModifier::Fragment;
                    }
                    errors += if modifier == SectionModifier::Union {
                        merge_union(sect, kind, org, align, align_ofs, diag)
                    } else {
                        merge_fragment(sect, org, align, align_ofs, diag)
                    };

                    // If the section's bank is unspecified, adopt the new
                    // one; otherwise both must agree.
                    if sect.bank.is_none() {
                        sect.bank = bank;
                    } else if bank.is_some() && sect.bank != bank {
                        diag.error(format!(
                            "Section already declared with different bank {}",
                            sect.bank.unwrap_or(0)
                        ));
                        errors += 1;
                    }
                }
                SectionModifier::Normal => {
                    diag.report(
                        Diagnostic::error(diag.location(), "Section already defined previously")
                            .with_label(sect.location, "first defined here"),
                    );
                    errors += 1;
                }
            }
        }

        if errors > 0 {
            let name = &self.sections[id].name;
            return Err(diag.fatal(format!(
                "Cannot create section \"{name}\" ({errors} error{})",
                if errors == 1 { "" } else { "s" }
            )));
        }
        Ok(())
    }
}

/// Unionized sections only need compatible constraints; they end up with the
/// strictest combination of both, evaluated at the start of the section.
fn merge_union(
    sect: &mut Section,
    kind: SectionKind,
    org: Option<u16>,
    align: u8,
    align_ofs: u16,
    diag: &mut Reporter,
) -> usize {
    debug_assert!(align < 16);
    let mut errors = 0usize;

    if kind.has_data() {
        diag.error("Cannot declare ROM sections as UNION");
        errors += 1;
    }

    if let Some(org) = org {
        // If both are fixed, they must be the same.
        if sect.org.is_some() && sect.org != Some(org) {
            diag.error(format!(
                "Section already declared as fixed at different address ${:04x}",
                sect.org.unwrap_or(0)
            ));
            errors += 1;
        } else if sect.align != 0
            && mask(sect.align) & (org as u32).wrapping_sub(sect.align_ofs as u32) != 0
        {
            diag.error(format!(
                "Section already declared as aligned to {} bytes (offset {})",
                1u32 << sect.align,
                sect.align_ofs
            ));
            errors += 1;
        } else {
            sect.org = Some(org);
        }
    } else if align != 0 {
        errors += merge_alignment(sect, align, align_ofs, diag);
    }

    errors
}

/// Fragments merge like unions, except the constraints are evaluated at the
/// *end* of the existing section, where the new fragment will be appended.
fn merge_fragment(
    sect: &mut Section,
    org: Option<u16>,
    align: u8,
    align_ofs: u16,
    diag: &mut Reporter,
) -> usize {
    debug_assert!(align < 16);
    let mut errors = 0usize;

    if let Some(org) = org {
        let cur_org = (org as u32).wrapping_sub(sect.size) as u16;

        if sect.org.is_some() && sect.org != Some(cur_org) {
            diag.error(format!(
                "Section already declared as fixed at incompatible address ${:04x}",
                sect.org.unwrap_or(0)
            ));
            errors += 1;
        } else if sect.align != 0
            && mask(sect.align) & (cur_org as u32).wrapping_sub(sect.align_ofs as u32) != 0
        {
            diag.error(format!(
                "Section already declared as aligned to {} bytes (offset {})",
                1u32 << sect.align,
                sect.align_ofs
            ));
            errors += 1;
        } else {
            sect.org = Some(cur_org);
        }
    } else if align != 0 {
        let cur_ofs =
            (align_ofs as i64 - sect.size as i64).rem_euclid(1i64 << align) as u16;
        errors += merge_alignment(sect, align, cur_ofs, diag);
    }

    errors
}

/// Common alignment-vs-section compatibility checks, with the declaration's
/// effective alignment offset already shifted for fragments.
fn merge_alignment(sect: &mut Section, align: u8, align_ofs: u16, diag: &mut Reporter) -> usize {
    if let Some(org) = sect.org {
        // Make sure any fixed address given is compatible.
        if (org as u32).wrapping_sub(align_ofs as u32) & mask(align) != 0 {
            diag.error(format!(
                "Section already declared as fixed at incompatible address ${org:04x}"
            ));
            return 1;
        }
    } else if (align_ofs as u32 & mask(sect.align)) != (sect.align_ofs as u32 & mask(align)) {
        // Check if alignment offsets are compatible.
        diag.error(format!(
            "Section already declared with incompatible {}-byte alignment (offset {})",
            1u32 << sect.align,
            sect.align_ofs
        ));
        return 1;
    } else if align > sect.align {
        // If the section is not fixed, its alignment is the largest of both.
        sect.align = align;
        sect.align_ofs = align_ofs;
    }
    0
}
