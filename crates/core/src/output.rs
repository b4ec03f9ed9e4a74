use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use gbasm_obj as obj;

use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::fstack::{FileStack, NodeId, NodeKind, SourceLocation};
use crate::section::{PatchKind, SectionKind, SectionModifier};
use crate::sections::Sections;
use crate::symbol::{SymbolKind, Symbols};

/// Assemble the final object model: sections with their patches, symbols,
/// and the source-context nodes any of them reference.
pub fn build_object(sections: &Sections, symbols: &Symbols, fstack: &FileStack) -> obj::ObjectFile {
    // Collect every node reachable from a recorded location, parents
    // included, so the object carries exactly the contexts it mentions.
    let mut referenced = BTreeSet::new();
    let mut mark = |node: NodeId| {
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if !referenced.insert(id.0) {
                break;
            }
            cursor = fstack.node(id).parent;
        }
    };

    for sect in sections.iter() {
        mark(sect.location.node);
        for patch in &sect.patches {
            mark(patch.location.node);
        }
    }
    for symbol in symbols.iter() {
        if !matches!(symbol.kind, SymbolKind::Variable(_)) {
            mark(symbol.location.node);
        }
    }

    // Arena ids grow monotonically, so the sorted set keeps parents ahead
    // of children.
    let mut node_index: FxHashMap<u32, u32> = FxHashMap::default();
    let mut nodes = Vec::with_capacity(referenced.len());
    for (new_id, old_id) in referenced.iter().enumerate() {
        node_index.insert(*old_id, new_id as u32);
        let node = fstack.node(NodeId(*old_id));
        nodes.push(obj::Node {
            parent: node.parent.map(|parent| node_index[&parent.0]),
            line: node.line,
            kind: match &node.kind {
                NodeKind::File { name } => obj::NodeKind::File { name: name.clone() },
                NodeKind::Rept { iters } => obj::NodeKind::Rept {
                    iters: iters.clone(),
                },
            },
        });
    }

    let location = |loc: SourceLocation| obj::Location {
        node: node_index.get(&loc.node.0).copied().unwrap_or(0),
        line: loc.line,
    };

    let mut out_symbols = Vec::new();
    for symbol in symbols.iter() {
        let definition = match &symbol.kind {
            SymbolKind::Label { section, offset } => obj::SymbolDefinition::Label {
                section: *section as u32,
                offset: *offset,
            },
            SymbolKind::Constant(value) => obj::SymbolDefinition::Constant { value: *value },
            // FOR iteration variables are transient.
            SymbolKind::Variable(_) => continue,
        };
        out_symbols.push(obj::Symbol {
            name: symbol.name.clone(),
            exported: symbol.exported,
            definition,
            location: location(symbol.location),
        });
    }

    let mut out_sections = Vec::new();
    for sect in sections.iter() {
        let data = sect
            .has_data()
            .then(|| sect.data[..sect.size as usize].to_vec());
        let patches = sect
            .patches
            .iter()
            .map(|patch| obj::Patch {
                kind: convert_patch_kind(patch.kind),
                offset: patch.offset,
                pc_shift: patch.pc_shift,
                rpn: encode_rpn(&patch.expr.expr),
                location: location(patch.location),
            })
            .collect();

        out_sections.push(obj::Section {
            name: sect.name.clone(),
            kind: convert_kind(sect.kind),
            modifier: convert_modifier(sect.modifier),
            size: sect.size,
            org: sect.org,
            bank: sect.bank,
            align: sect.align,
            align_ofs: sect.align_ofs,
            data,
            patches,
            location: location(sect.location),
        });
    }

    obj::ObjectFile {
        nodes,
        symbols: out_symbols,
        sections: out_sections,
    }
}

fn convert_kind(kind: SectionKind) -> obj::SectionKind {
    match kind {
        SectionKind::Rom0 => obj::SectionKind::Rom0,
        SectionKind::Romx => obj::SectionKind::Romx,
        SectionKind::Vram => obj::SectionKind::Vram,
        SectionKind::Sram => obj::SectionKind::Sram,
        SectionKind::Wram0 => obj::SectionKind::Wram0,
        SectionKind::Wramx => obj::SectionKind::Wramx,
        SectionKind::Oam => obj::SectionKind::Oam,
        SectionKind::Hram => obj::SectionKind::Hram,
    }
}

fn convert_modifier(modifier: SectionModifier) -> obj::SectionModifier {
    match modifier {
        SectionModifier::Normal => obj::SectionModifier::Normal,
        SectionModifier::Union => obj::SectionModifier::Union,
        SectionModifier::Fragment => obj::SectionModifier::Fragment,
    }
}

fn convert_patch_kind(kind: PatchKind) -> obj::PatchKind {
    match kind {
        PatchKind::Byte => obj::PatchKind::Byte,
        PatchKind::Word => obj::PatchKind::Word,
        PatchKind::Long => obj::PatchKind::Long,
        PatchKind::Jr => obj::PatchKind::Jr,
    }
}

/// Serialize an expression tree as a postorder RPN stream.
fn encode_rpn(expr: &Expr) -> Vec<u8> {
    let mut out = Vec::new();
    encode_rpn_into(expr, &mut out);
    out
}

fn encode_rpn_into(expr: &Expr, out: &mut Vec<u8>) {
    match expr {
        Expr::Number(value) => {
            out.push(obj::rpn::NUMBER);
            out.extend_from_slice(&value.to_le_bytes());
        }
        Expr::Symbol(name) => {
            out.push(obj::rpn::SYMBOL);
            out.extend_from_slice(&(name.len() as u32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
        }
        Expr::Pc => out.push(obj::rpn::PC),
        Expr::Unary(op, inner) => {
            encode_rpn_into(inner, out);
            out.push(match op {
                UnaryOp::Neg => obj::rpn::NEG,
                UnaryOp::Complement => obj::rpn::CPL,
            });
        }
        Expr::Binary(op, lhs, rhs) => {
            encode_rpn_into(lhs, out);
            encode_rpn_into(rhs, out);
            out.push(match op {
                BinaryOp::Add => obj::rpn::ADD,
                BinaryOp::Sub => obj::rpn::SUB,
                BinaryOp::Mul => obj::rpn::MUL,
                BinaryOp::Div => obj::rpn::DIV,
                BinaryOp::Mod => obj::rpn::MOD,
                BinaryOp::Shl => obj::rpn::SHL,
                BinaryOp::Shr => obj::rpn::SHR,
                BinaryOp::And => obj::rpn::AND,
                BinaryOp::Or => obj::rpn::OR,
                BinaryOp::Xor => obj::rpn::XOR,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Reporter;
    use crate::expr::Expression;
    use crate::section::SectionAttrs;

    #[test]
    fn built_objects_pass_validation_and_round_trip() {
        let mut fstack = FileStack::default();
        let source_id = fstack.open_root("game.asm", "SECTION \"Home\", ROM0\n");
        let mut diag = Reporter::new();
        diag.set_location(fstack.location(crate::span::Span::new(source_id, 0, 7)));

        let mut sections = Sections::new();
        let mut symbols = Symbols::new();
        sections
            .new_section(
                "Home",
                SectionKind::Rom0,
                Some(0x0150),
                SectionAttrs::default(),
                SectionModifier::Normal,
                &mut symbols,
                &mut diag,
            )
            .expect("section");
        symbols.define_label(
            "Start",
            true,
            sections.symbol_section_id().expect("inside a section"),
            sections.symbol_offset(),
            &mut diag,
        );
        sections.const_byte(0xC3, &mut diag).expect("byte");
        sections
            .rel_word(
                Expression::resolve(
                    Expr::Symbol("Start".to_string()),
                    &NoEnv,
                    &mut diag,
                ),
                0,
                &mut diag,
            )
            .expect("word");
        symbols.define_constant("SPEED", 7, &mut diag);
        assert_eq!(diag.error_count(), 0);

        let object = build_object(&sections, &symbols, &fstack);
        gbasm_obj::validate_object(&object).expect("object validates");

        let bytes = gbasm_obj::encode_object(&object).expect("encode");
        let decoded = gbasm_obj::decode_object(&bytes).expect("decode");
        assert_eq!(decoded, object);

        assert_eq!(object.sections.len(), 1);
        let home = &object.sections[0];
        assert_eq!(home.size, 3);
        assert_eq!(home.data.as_deref(), Some(&[0xC3, 0x00, 0x00][..]));
        assert_eq!(home.patches.len(), 1);
        assert_eq!(home.patches[0].rpn[0], gbasm_obj::rpn::SYMBOL);
        assert_eq!(object.symbols.len(), 2);
        assert_eq!(object.nodes.len(), 1);
    }

    struct NoEnv;

    impl crate::expr::EvalEnv for NoEnv {
        fn symbol_value(&self, _name: &str) -> Option<i32> {
            None
        }

        fn pc_value(&self) -> Option<i32> {
            None
        }
    }

    #[test]
    fn rpn_streams_encode_postorder() {
        let expr = Expr::Binary(
            BinaryOp::Add,
            Box::new(Expr::Number(1)),
            Box::new(Expr::Unary(UnaryOp::Neg, Box::new(Expr::Pc))),
        );
        let rpn = encode_rpn(&expr);
        assert_eq!(rpn[0], obj::rpn::NUMBER);
        assert_eq!(&rpn[1..5], &1i32.to_le_bytes());
        assert_eq!(rpn[5], obj::rpn::PC);
        assert_eq!(rpn[6], obj::rpn::NEG);
        assert_eq!(rpn[7], obj::rpn::ADD);
    }
}
