use super::*;

#[test]
fn union_size_is_the_largest_member() {
    let mut fx = Fixture::new();
    fx.section("V", SectionKind::Wram0);
    fx.sections.start_union(&mut fx.diag);
    fx.ds(4);
    fx.sections.next_union_member(&mut fx.diag);
    fx.ds(7);
    fx.sections.next_union_member(&mut fx.diag);
    fx.ds(2);
    fx.sections.end_union(&mut fx.diag);

    fx.assert_clean();
    assert_eq!(fx.named("V").size, 7);
    assert_eq!(fx.sections.symbol_offset(), 7);
}

#[test]
fn union_cursor_advances_by_the_maximum() {
    let mut fx = Fixture::new();
    fx.section("V", SectionKind::Wram0);
    fx.ds(5);
    let before = fx.sections.symbol_offset();
    fx.sections.start_union(&mut fx.diag);
    fx.ds(1);
    fx.sections.next_union_member(&mut fx.diag);
    fx.ds(9);
    fx.sections.next_union_member(&mut fx.diag);
    fx.ds(3);
    fx.sections.end_union(&mut fx.diag);
    fx.assert_clean();
    assert_eq!(fx.sections.symbol_offset(), before + 9);
}

#[test]
fn nested_unions_roll_up() {
    let mut fx = Fixture::new();
    fx.section("V", SectionKind::Wram0);
    fx.sections.start_union(&mut fx.diag);
    fx.ds(2);
    fx.sections.start_union(&mut fx.diag);
    fx.ds(4);
    fx.sections.next_union_member(&mut fx.diag);
    fx.ds(6);
    fx.sections.end_union(&mut fx.diag);
    // Inner union contributed max(4, 6) = 6 on top of the 2.
    fx.sections.next_union_member(&mut fx.diag);
    fx.ds(3);
    fx.sections.end_union(&mut fx.diag);
    fx.assert_clean();
    assert_eq!(fx.named("V").size, 8);
}

#[test]
fn union_requires_a_ram_section() {
    let mut fx = Fixture::new();
    fx.sections.start_union(&mut fx.diag);
    assert_eq!(fx.diag.error_count(), 1);

    fx.section("P", SectionKind::Rom0);
    fx.sections.start_union(&mut fx.diag);
    assert_eq!(fx.diag.error_count(), 2);
}

#[test]
fn stray_union_terminators_are_errors() {
    let mut fx = Fixture::new();
    fx.section("V", SectionKind::Wram0);
    fx.sections.next_union_member(&mut fx.diag);
    fx.sections.end_union(&mut fx.diag);
    assert_eq!(fx.diag.error_count(), 2);
}

#[test]
fn section_switch_inside_a_union_is_fatal() {
    let mut fx = Fixture::new();
    fx.section("V", SectionKind::Wram0);
    fx.sections.start_union(&mut fx.diag);
    let result = fx.sections.new_section(
        "W",
        SectionKind::Wram0,
        None,
        SectionAttrs::default(),
        SectionModifier::Normal,
        &mut fx.symbols,
        &mut fx.diag,
    );
    assert!(result.is_err());
}

#[test]
fn load_overlay_splits_bytes_from_addresses() {
    let mut fx = Fixture::new();
    fx.section("Code", SectionKind::Rom0);
    fx.db(&[0x01]);
    fx.load("Buf", SectionKind::Hram);
    fx.label("Target");
    fx.db(&[0x02, 0x03]);
    fx.endl();
    fx.db(&[0x04]);

    fx.assert_clean();
    let code = fx.named("Code");
    assert_eq!(code.size, 4);
    assert_eq!(&code.data[..4], &[0x01, 0x02, 0x03, 0x04]);

    let buf = fx.named("Buf");
    assert_eq!(buf.kind, SectionKind::Hram);
    assert_eq!(buf.size, 2);
    assert!(buf.data.is_empty());

    let target = fx.symbols.get("Target").expect("label defined");
    assert_eq!(
        target.kind,
        crate::symbol::SymbolKind::Label {
            section: fx.sections.find_id("Buf").expect("Buf exists"),
            offset: 0,
        }
    );
}

#[test]
fn load_round_trip_restores_the_cursor() {
    let mut fx = Fixture::new();
    fx.section("Code", SectionKind::Rom0);
    fx.label("Anchor");
    fx.db(&[0xCE]);
    let section = fx.sections.current_section_id();
    let offset = fx.sections.symbol_offset();
    let scopes = fx.symbols.scopes();

    fx.load("Buf", SectionKind::Wramx);
    assert_eq!(fx.sections.symbol_offset(), 0);
    fx.endl();

    assert_eq!(fx.sections.current_section_id(), section);
    assert_eq!(fx.sections.symbol_offset(), offset);
    assert_eq!(fx.symbols.scopes(), scopes);
    assert_eq!(fx.sections.load_section_id(), None);
    fx.assert_clean();
}

#[test]
fn load_requires_a_rom_parent() {
    let mut fx = Fixture::new();
    fx.section("V", SectionKind::Wram0);
    fx.load("Buf", SectionKind::Hram);
    assert_eq!(fx.diag.error_count(), 1);
    assert_eq!(fx.sections.load_section_id(), None);
}

#[test]
fn load_of_a_rom_kind_is_rejected() {
    let mut fx = Fixture::new();
    fx.section("Code", SectionKind::Rom0);
    fx.load("Buf", SectionKind::Romx);
    assert_eq!(fx.diag.error_count(), 1);
    assert!(fx.messages()[0].contains("cannot create a ROM section"));
}

#[test]
fn opening_a_load_inside_a_load_warns_and_chains() {
    let mut fx = Fixture::new();
    fx.section("Code", SectionKind::Rom0);
    fx.load("A", SectionKind::Hram);
    fx.db(&[0x01]);
    fx.load("B", SectionKind::Wramx);
    fx.db(&[0x02, 0x03]);
    fx.endl();

    assert_eq!(fx.warnings_of(WarningKind::UnterminatedLoad), 1);
    assert_eq!(fx.named("A").size, 1);
    assert_eq!(fx.named("B").size, 2);
    assert_eq!(fx.named("Code").size, 3);
}

#[test]
fn stray_endl_is_an_error() {
    let mut fx = Fixture::new();
    fx.section("Code", SectionKind::Rom0);
    fx.endl();
    assert_eq!(fx.diag.error_count(), 1);
}

#[test]
fn section_switch_terminates_an_open_load() {
    let mut fx = Fixture::new();
    fx.section("Code", SectionKind::Rom0);
    fx.load("Buf", SectionKind::Hram);
    fx.section("Next", SectionKind::Rom0);
    assert_eq!(fx.warnings_of(WarningKind::UnterminatedLoad), 1);
    assert_eq!(fx.sections.load_section_id(), None);
}

#[test]
fn eof_check_warns_about_an_open_load() {
    let mut fx = Fixture::new();
    fx.section("Code", SectionKind::Rom0);
    fx.load("Buf", SectionKind::Hram);
    fx.sections.check_load_closed(&mut fx.diag);
    assert_eq!(fx.warnings_of(WarningKind::UnterminatedLoad), 1);
}

#[test]
fn push_pop_round_trip_restores_everything() {
    let mut fx = Fixture::new();
    fx.section("A", SectionKind::Rom0);
    fx.label("Here");
    fx.db(&[0x01, 0x02]);
    let section = fx.sections.current_section_id();
    let offset = fx.sections.symbol_offset();
    let scopes = fx.symbols.scopes();

    fx.sections.push_section(&mut fx.symbols);
    assert_eq!(fx.sections.current_section_id(), None);
    assert_eq!(fx.symbols.scopes(), crate::symbol::LabelScopes::default());

    fx.section("B", SectionKind::Wram0);
    fx.ds(5);
    fx.sections
        .pop_section(&mut fx.symbols, &mut fx.diag)
        .expect("POPS");

    assert_eq!(fx.sections.current_section_id(), section);
    assert_eq!(fx.sections.symbol_offset(), offset);
    assert_eq!(fx.symbols.scopes(), scopes);
    fx.assert_clean();
}

#[test]
fn pop_preserves_a_union_saved_with_the_context() {
    let mut fx = Fixture::new();
    fx.section("A", SectionKind::Wram0);
    fx.sections.start_union(&mut fx.diag);
    fx.ds(3);
    fx.sections.push_section(&mut fx.symbols);
    fx.section("B", SectionKind::Wram0);
    fx.ds(5);
    fx.sections
        .pop_section(&mut fx.symbols, &mut fx.diag)
        .expect("POPS");
    fx.sections.next_union_member(&mut fx.diag);
    fx.ds(1);
    fx.sections.end_union(&mut fx.diag);

    fx.assert_clean();
    assert_eq!(fx.named("A").size, 3);
    assert_eq!(fx.named("B").size, 5);
}

#[test]
fn pop_on_an_empty_stack_is_fatal() {
    let mut fx = Fixture::new();
    let result = fx.sections.pop_section(&mut fx.symbols, &mut fx.diag);
    assert!(result.is_err());
}

#[test]
fn pop_terminates_an_open_load() {
    let mut fx = Fixture::new();
    fx.sections.push_section(&mut fx.symbols);
    fx.section("Code", SectionKind::Rom0);
    fx.load("Buf", SectionKind::Hram);
    fx.sections
        .pop_section(&mut fx.symbols, &mut fx.diag)
        .expect("POPS");
    assert_eq!(fx.warnings_of(WarningKind::UnterminatedLoad), 1);
    assert_eq!(fx.sections.load_section_id(), None);
    assert_eq!(fx.sections.current_section_id(), None);
}

#[test]
fn reopening_a_stacked_section_is_fatal() {
    let mut fx = Fixture::new();
    fx.section("A", SectionKind::Rom0);
    fx.sections.push_section(&mut fx.symbols);
    let result = fx.sections.new_section(
        "A",
        SectionKind::Rom0,
        None,
        SectionAttrs::default(),
        SectionModifier::Normal,
        &mut fx.symbols,
        &mut fx.diag,
    );
    assert!(result.is_err());
}

#[test]
fn unmatched_push_warns_at_eof() {
    let mut fx = Fixture::new();
    fx.section("A", SectionKind::Rom0);
    fx.sections.push_section(&mut fx.symbols);
    fx.sections.check_stack(&mut fx.diag);
    assert_eq!(fx.warnings_of(WarningKind::UnmatchedDirective), 1);
}

#[test]
fn end_section_clears_without_popping() {
    let mut fx = Fixture::new();
    fx.section("A", SectionKind::Rom0);
    fx.sections.push_section(&mut fx.symbols);
    fx.section("B", SectionKind::Rom0);
    fx.sections
        .end_section(&mut fx.symbols, &mut fx.diag)
        .expect("ENDSECTION");
    assert_eq!(fx.sections.current_section_id(), None);
    // The pushed context is still there to pop.
    fx.sections
        .pop_section(&mut fx.symbols, &mut fx.diag)
        .expect("POPS");
    assert_eq!(
        fx.sections.current_section().map(|sect| sect.name.as_str()),
        Some("A")
    );
}

#[test]
fn end_section_outside_a_section_is_fatal() {
    let mut fx = Fixture::new();
    let result = fx.sections.end_section(&mut fx.symbols, &mut fx.diag);
    assert!(result.is_err());
}

#[test]
fn end_section_inside_a_union_is_fatal() {
    let mut fx = Fixture::new();
    fx.section("V", SectionKind::Wram0);
    fx.sections.start_union(&mut fx.diag);
    let result = fx.sections.end_section(&mut fx.symbols, &mut fx.diag);
    assert!(result.is_err());
}

#[test]
fn fragment_literal_injects_a_sibling() {
    let mut fx = Fixture::new();
    fx.section("Main", SectionKind::Romx);
    fx.db(&[0x01]);

    let first = fx
        .sections
        .push_fragment_literal(&mut fx.symbols, &mut fx.diag)
        .expect("fragment literal");
    assert_eq!(first, "$0");
    fx.db(&[0xFE]);

    // The sibling shares the parent's name but not its id; lookups keep
    // resolving to the first declaration.
    assert_eq!(fx.sections.count(), 2);
    let literal_id = fx.sections.current_section_id().expect("active literal");
    assert_ne!(Some(literal_id), fx.sections.find_id("Main"));
    assert_eq!(fx.sections.get(literal_id).name, "Main");
    assert_eq!(fx.sections.get(literal_id).modifier, SectionModifier::Fragment);
    assert_eq!(fx.sections.get(literal_id).size, 1);

    // The parent was coerced into a fragment.
    assert_eq!(fx.named("Main").modifier, SectionModifier::Fragment);

    fx.sections
        .pop_section(&mut fx.symbols, &mut fx.diag)
        .expect("POPS");
    fx.db(&[0x02]);
    fx.assert_clean();
    assert_eq!(fx.named("Main").size, 2);

    let second = fx
        .sections
        .push_fragment_literal(&mut fx.symbols, &mut fx.diag)
        .expect("fragment literal");
    assert_eq!(second, "$1");
}

#[test]
fn fragment_literal_inherits_nonzero_banks() {
    let mut fx = Fixture::new();
    fx.section_with(
        "Banked",
        SectionKind::Romx,
        None,
        SectionAttrs {
            bank: Some(3),
            ..SectionAttrs::default()
        },
        SectionModifier::Normal,
    );
    fx.sections
        .push_fragment_literal(&mut fx.symbols, &mut fx.diag)
        .expect("fragment literal");
    let literal = fx.sections.current_section().expect("active literal");
    assert_eq!(literal.bank, Some(3));
}

#[test]
fn fragment_literal_drops_the_implicit_bank_zero() {
    let mut fx = Fixture::new();
    fx.section("Home", SectionKind::Rom0);
    fx.sections
        .push_fragment_literal(&mut fx.symbols, &mut fx.diag)
        .expect("fragment literal");
    let literal = fx.sections.current_section().expect("active literal");
    assert_eq!(literal.bank, None);
}

#[test]
fn fragment_literal_needs_a_rom_section() {
    let mut fx = Fixture::new();
    let result = fx.sections.push_fragment_literal(&mut fx.symbols, &mut fx.diag);
    assert!(result.is_err());

    fx.section("V", SectionKind::Wram0);
    let result = fx.sections.push_fragment_literal(&mut fx.symbols, &mut fx.diag);
    assert!(result.is_err());
}

#[test]
fn fragment_literal_is_rejected_inside_load_and_union_sections() {
    let mut fx = Fixture::new();
    fx.section("Code", SectionKind::Rom0);
    fx.load("Buf", SectionKind::Hram);
    let result = fx.sections.push_fragment_literal(&mut fx.symbols, &mut fx.diag);
    assert!(result.is_err());

    let mut fx = Fixture::new();
    fx.section_with(
        "U",
        SectionKind::Wram0,
        None,
        SectionAttrs::default(),
        SectionModifier::Union,
    );
    let result = fx.sections.push_fragment_literal(&mut fx.symbols, &mut fx.diag);
    assert!(result.is_err());
}

#[test]
fn oversized_sections_are_reported_at_the_size_check() {
    let mut fx = Fixture::new();
    fx.section("H", SectionKind::Hram);
    fx.ds(0x100);
    fx.assert_clean();
    fx.sections.check_sizes(&mut fx.diag);
    assert_eq!(fx.diag.error_count(), 1);
    assert!(
        fx.messages()[0].contains("grew too big"),
        "{:?}",
        fx.messages()
    );
}

#[test]
fn load_inside_union_kinds_cannot_meet() {
    // UNION lives in RAM sections, LOAD needs a ROM parent; each entry
    // point refuses the other's territory.
    let mut fx = Fixture::new();
    fx.section("V", SectionKind::Wram0);
    fx.sections.start_union(&mut fx.diag);
    fx.assert_clean();
    fx.load("Buf", SectionKind::Hram);
    assert_eq!(fx.diag.error_count(), 1);
    assert_eq!(fx.sections.load_section_id(), None);
}
