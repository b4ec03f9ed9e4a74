use super::*;
use crate::diag::{Reporter, WarningKind};
use crate::expr::{Expr, Expression};
use crate::options::Options;
use crate::section::{PatchKind, SectionKind};

mod nesting;

/// Engine plus the collaborators every directive needs.
struct Fixture {
    sections: Sections,
    symbols: Symbols,
    diag: Reporter,
    options: Options,
}

impl Fixture {
    fn new() -> Self {
        Self {
            sections: Sections::new(),
            symbols: Symbols::new(),
            diag: Reporter::new(),
            options: Options::default(),
        }
    }

    fn section(&mut self, name: &str, kind: SectionKind) {
        self.section_with(name, kind, None, SectionAttrs::default(), SectionModifier::Normal);
    }

    fn section_at(&mut self, name: &str, kind: SectionKind, org: u16) {
        self.section_with(
            name,
            kind,
            Some(org),
            SectionAttrs::default(),
            SectionModifier::Normal,
        );
    }

    fn section_with(
        &mut self,
        name: &str,
        kind: SectionKind,
        org: Option<u16>,
        attrs: SectionAttrs,
        modifier: SectionModifier,
    ) {
        self.sections
            .new_section(name, kind, org, attrs, modifier, &mut self.symbols, &mut self.diag)
            .expect("section switch should not be fatal");
    }

    fn load(&mut self, name: &str, kind: SectionKind) {
        self.sections
            .set_load_section(
                name,
                kind,
                None,
                SectionAttrs::default(),
                SectionModifier::Normal,
                &mut self.symbols,
                &mut self.diag,
            )
            .expect("LOAD should not be fatal");
    }

    fn endl(&mut self) {
        self.sections
            .end_load_section(None, &mut self.symbols, &mut self.diag)
            .expect("ENDL should not be fatal");
    }

    fn db(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.sections
                .const_byte(byte, &mut self.diag)
                .expect("byte emission should not be fatal");
        }
    }

    fn ds(&mut self, count: u32) {
        let options = self.options.clone();
        self.sections
            .skip(count, true, &options, &mut self.diag)
            .expect("DS should not be fatal");
    }

    fn label(&mut self, name: &str) {
        let section = self
            .sections
            .symbol_section_id()
            .expect("label must be inside a section");
        let offset = self.sections.symbol_offset();
        self.symbols
            .define_label(name, false, section, offset, &mut self.diag);
    }

    fn named(&self, name: &str) -> &Section {
        self.sections.find(name).expect("section should exist")
    }

    fn warnings_of(&self, kind: WarningKind) -> usize {
        self.diag
            .diagnostics()
            .iter()
            .filter(|diagnostic| diagnostic.warning == Some(kind))
            .count()
    }

    fn messages(&self) -> Vec<&str> {
        self.diag
            .diagnostics()
            .iter()
            .map(|diagnostic| diagnostic.message.as_str())
            .collect()
    }

    fn assert_clean(&self) {
        assert_eq!(
            self.diag.error_count(),
            0,
            "unexpected errors: {:?}",
            self.messages()
        );
    }

    /// Engine-wide invariants that must hold after any directive.
    fn assert_invariants(&self) {
        for sect in self.sections.iter() {
            assert!(sect.align < 16, "section '{}' align out of range", sect.name);
            if sect.align > 0 {
                assert!(
                    sect.align_ofs < 1 << sect.align,
                    "section '{}' align offset out of range",
                    sect.name
                );
                if let Some(org) = sect.org {
                    assert_eq!(
                        (org as u32).wrapping_sub(sect.align_ofs as u32) % (1u32 << sect.align),
                        0,
                        "section '{}' org does not satisfy its alignment",
                        sect.name
                    );
                }
            }
            if !sect.has_data() {
                assert!(sect.data.is_empty(), "section '{}' grew a buffer", sect.name);
            }
        }
    }
}

fn known(value: i32) -> Expression {
    Expression::constant(value)
}

/// An expression referencing a symbol that could not be folded.
fn unknown(name: &str) -> Expression {
    struct Nothing;
    impl crate::expr::EvalEnv for Nothing {
        fn symbol_value(&self, _name: &str) -> Option<i32> {
            None
        }
        fn pc_value(&self) -> Option<i32> {
            None
        }
    }
    let mut scratch = Reporter::new();
    Expression::resolve(Expr::Symbol(name.to_string()), &Nothing, &mut scratch)
}

fn pc_expr() -> Expression {
    struct Nothing;
    impl crate::expr::EvalEnv for Nothing {
        fn symbol_value(&self, _name: &str) -> Option<i32> {
            None
        }
        fn pc_value(&self) -> Option<i32> {
            None
        }
    }
    let mut scratch = Reporter::new();
    Expression::resolve(Expr::Pc, &Nothing, &mut scratch)
}
