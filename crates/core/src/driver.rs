use std::path::Path;

use thiserror::Error;

use crate::diag::{
    Diagnostic, Fatal, Reporter, Severity, WarningKind, render_diagnostics,
};
use crate::expr::{EvalEnv, Expr, Expression};
use crate::format::{FormatArg, interpolate};
use crate::fstack::FileStack;
use crate::lexer;
use crate::options::Options;
use crate::output::build_object;
use crate::parser::{self, DataItem, DataWidth, PrintArg, SectionDecl, Stmt};
use crate::section::SectionAttrs;
use crate::sections::Sections;
use crate::span::{SourceId, Spanned};
use crate::symbol::{SymbolKind, Symbols};

#[derive(Debug, Clone)]
pub struct AssembleOutput {
    pub object: gbasm_obj::ObjectFile,
    pub warnings: Vec<Diagnostic>,
    pub rendered_warnings: String,
}

#[derive(Debug, Error)]
#[error("assembly failed")]
pub struct AssembleError {
    pub diagnostics: Vec<Diagnostic>,
    pub rendered: String,
}

pub fn assemble_file(path: &Path, options: &Options) -> Result<AssembleOutput, AssembleError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            return Err(AssembleError {
                diagnostics: Vec::new(),
                rendered: format!("error: failed to read '{}': {err}\n", path.display()),
            });
        }
    };
    assemble_source(&path.display().to_string(), &text, options)
}

pub fn assemble_source(
    name: &str,
    text: &str,
    options: &Options,
) -> Result<AssembleOutput, AssembleError> {
    let mut assembler = Assembler {
        options,
        fstack: FileStack::new(options.include_paths.clone()),
        symbols: Symbols::new(),
        sections: Sections::new(),
        diag: Reporter::new(),
    };

    let fatal = assembler.run(name, text).err();
    assembler.finish(fatal)
}

enum Flow {
    Normal,
    Break,
}

struct Assembler<'a> {
    options: &'a Options,
    fstack: FileStack,
    symbols: Symbols,
    sections: Sections,
    diag: Reporter,
}

/// Expression evaluation against the current assembly state.
struct Env<'a> {
    symbols: &'a Symbols,
    sections: &'a Sections,
}

impl EvalEnv for Env<'_> {
    fn symbol_value(&self, name: &str) -> Option<i32> {
        match &self.symbols.get(name)?.kind {
            SymbolKind::Constant(value) | SymbolKind::Variable(value) => Some(*value),
            SymbolKind::Label { section, offset } => {
                let org = self.sections.get(*section).org?;
                Some(org as i32 + *offset as i32)
            }
        }
    }

    fn pc_value(&self) -> Option<i32> {
        let sect = self.sections.symbol_section()?;
        let org = sect.org?;
        Some(org as i32 + self.sections.symbol_offset() as i32)
    }
}

impl Assembler<'_> {
    fn run(&mut self, name: &str, text: &str) -> Result<(), Fatal> {
        let source_id = self.fstack.open_root(name, text);
        let stmts = self.parse_source(source_id);
        self.exec_block(&stmts, false)?;
        Ok(())
    }

    fn finish(mut self, fatal: Option<Fatal>) -> Result<AssembleOutput, AssembleError> {
        if let Some(fatal) = &fatal {
            self.diag
                .report(Diagnostic::error(fatal.location, fatal.message.clone()));
        } else {
            // End-of-input checks.
            self.sections.check_union_closed(&mut self.diag);
            self.sections.check_load_closed(&mut self.diag);
            self.sections.check_stack(&mut self.diag);
            self.symbols.finalize_exports(&mut self.diag);
            self.sections.check_sizes(&mut self.diag);
        }

        let diagnostics = self.diag.take_diagnostics();
        if self.diag.error_count() > 0 || fatal.is_some() {
            let rendered = render_diagnostics(&self.fstack, &diagnostics);
            return Err(AssembleError {
                diagnostics,
                rendered,
            });
        }

        let object = build_object(&self.sections, &self.symbols, &self.fstack);
        let rendered_warnings = render_diagnostics(&self.fstack, &diagnostics);
        Ok(AssembleOutput {
            object,
            warnings: diagnostics
                .into_iter()
                .filter(|diagnostic| diagnostic.severity == Severity::Warning)
                .collect(),
            rendered_warnings,
        })
    }

    fn parse_source(&mut self, source_id: SourceId) -> Vec<Spanned<Stmt>> {
        let text = self.fstack.source(source_id).text.clone();
        let (tokens, lex_errors) = lexer::lex(source_id, &text);
        for (span, message) in lex_errors {
            let location = self.fstack.location(span);
            self.diag.report(Diagnostic::error(location, message));
        }
        let (stmts, parse_errors) = parser::parse(source_id, tokens, text.len());
        for (span, message) in parse_errors {
            let location = self.fstack.location(span);
            self.diag.report(Diagnostic::error(location, message));
        }
        stmts
    }

    fn exec_block(&mut self, stmts: &[Spanned<Stmt>], in_rept: bool) -> Result<Flow, Fatal> {
        for stmt in stmts {
            self.diag.set_location(self.fstack.location(stmt.span));
            match &stmt.node {
                Stmt::Section(decl) => {
                    let (org, attrs) = self.eval_decl(decl);
                    self.sections.new_section(
                        &decl.name,
                        decl.kind,
                        org,
                        attrs,
                        decl.modifier,
                        &mut self.symbols,
                        &mut self.diag,
                    )?;
                }
                Stmt::Load(decl) => {
                    let (org, attrs) = self.eval_decl(decl);
                    self.sections.set_load_section(
                        &decl.name,
                        decl.kind,
                        org,
                        attrs,
                        decl.modifier,
                        &mut self.symbols,
                        &mut self.diag,
                    )?;
                }
                Stmt::Endl => {
                    self.sections
                        .end_load_section(None, &mut self.symbols, &mut self.diag)?;
                }
                Stmt::Label { name, exported } => self.define_label(name, *exported),
                Stmt::Data { width, items } => self.emit_data(*width, items)?,
                Stmt::Ds { count, fills } => self.emit_ds(count, fills)?,
                Stmt::Incbin {
                    name,
                    start,
                    length,
                } => self.emit_incbin(name, start.as_ref(), length.as_ref())?,
                Stmt::Align { alignment, offset } => self.exec_align(alignment, offset.as_ref()),
                Stmt::Union => self.sections.start_union(&mut self.diag),
                Stmt::Nextu => self.sections.next_union_member(&mut self.diag),
                Stmt::Endu => self.sections.end_union(&mut self.diag),
                Stmt::Pushs => self.sections.push_section(&mut self.symbols),
                Stmt::Pops => {
                    self.sections
                        .pop_section(&mut self.symbols, &mut self.diag)?;
                }
                Stmt::EndSection => {
                    self.sections
                        .end_section(&mut self.symbols, &mut self.diag)?;
                }
                Stmt::Include { name } => self.exec_include(name)?,
                Stmt::Rept { count, body } => self.exec_rept(count, body)?,
                Stmt::For {
                    symbol,
                    start,
                    stop,
                    step,
                    body,
                } => self.exec_for(symbol, start, stop, step.as_ref(), body)?,
                Stmt::Break => {
                    if in_rept {
                        return Ok(Flow::Break);
                    }
                    self.diag
                        .error("BREAK can only be used inside a REPT/FOR block");
                }
                Stmt::Def { name, value } => {
                    if let Some(value) = self.const_expr(value, "EQU") {
                        self.symbols
                            .define_constant(name, value, &mut self.diag);
                    }
                }
                Stmt::Export { names } => {
                    for name in names {
                        let location = self.diag.location();
                        self.symbols.request_export(name, location);
                    }
                }
                Stmt::Print {
                    newline,
                    fmt,
                    args,
                } => self.exec_print(*newline, fmt, args),
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_expr(&mut self, expr: &Expr) -> Expression {
        let expanded = self.expand_locals(expr);
        let env = Env {
            symbols: &self.symbols,
            sections: &self.sections,
        };
        Expression::resolve(expanded, &env, &mut self.diag)
    }

    /// Rewrite `.local` references into their full names while the scope
    /// that resolves them is still current.
    fn expand_locals(&mut self, expr: &Expr) -> Expr {
        match expr {
            Expr::Symbol(name) if name.starts_with('.') => {
                match self.symbols.expand(name) {
                    Some(full) => Expr::Symbol(full),
                    None => {
                        self.diag.error(format!(
                            "Local symbol '{name}' referenced outside a label scope"
                        ));
                        Expr::Symbol(name.clone())
                    }
                }
            }
            Expr::Unary(op, inner) => {
                Expr::Unary(*op, Box::new(self.expand_locals(inner)))
            }
            Expr::Binary(op, lhs, rhs) => Expr::Binary(
                *op,
                Box::new(self.expand_locals(lhs)),
                Box::new(self.expand_locals(rhs)),
            ),
            other => other.clone(),
        }
    }

    fn const_expr(&mut self, expr: &Expr, what: &str) -> Option<i32> {
        let value = self.eval_expr(expr);
        if value.is_known() {
            Some(value.value())
        } else {
            self.diag
                .error(format!("Expected a constant expression for {what}"));
            None
        }
    }

    fn eval_decl(&mut self, decl: &SectionDecl) -> (Option<u16>, SectionAttrs) {
        let org = decl.org.as_ref().and_then(|expr| {
            let value = self.const_expr(expr, "the section address")?;
            if !(0..=0xFFFF).contains(&value) {
                self.diag.error(format!(
                    "Section address ${value:04x} is not a 16-bit address"
                ));
                return None;
            }
            Some(value as u16)
        });

        let bank = decl.bank.as_ref().and_then(|expr| {
            let value = self.const_expr(expr, "BANK")?;
            if value < 0 {
                self.diag.error("BANK number cannot be negative");
                return None;
            }
            Some(value as u32)
        });

        let (align, align_ofs) = match &decl.align {
            Some((alignment, offset)) => {
                let alignment = self.const_expr(alignment, "ALIGN").unwrap_or(0);
                let offset = match offset {
                    Some(offset) => self.const_expr(offset, "ALIGN").unwrap_or(0),
                    None => 0,
                };
                if !(0..=16).contains(&alignment) {
                    self.diag.error(format!(
                        "Alignment must be between 0 and 16, not {alignment}"
                    ));
                    (0, 0)
                } else if !(0..=0xFFFF).contains(&offset) {
                    self.diag
                        .error(format!("Alignment offset {offset} is out of range"));
                    (alignment as u8, 0)
                } else {
                    (alignment as u8, offset as u16)
                }
            }
            None => (0, 0),
        };

        (
            org,
            SectionAttrs {
                bank,
                align,
                align_ofs,
            },
        )
    }

    fn define_label(&mut self, name: &str, exported: bool) {
        let Some(section) = self.sections.symbol_section_id() else {
            self.diag
                .error(format!("Label '{name}' created outside of a SECTION"));
            return;
        };
        let offset = self.sections.symbol_offset();
        self.symbols
            .define_label(name, exported, section, offset, &mut self.diag);
    }

    fn emit_data(&mut self, width: DataWidth, items: &[DataItem]) -> Result<(), Fatal> {
        if items.is_empty() {
            return self
                .sections
                .skip(width.bytes(), false, self.options, &mut self.diag);
        }

        for item in items {
            match item {
                DataItem::Str(text) => {
                    let units: Vec<i32> = text.bytes().map(i32::from).collect();
                    match width {
                        DataWidth::Byte => {
                            self.sections.byte_string(&units, &mut self.diag)?;
                        }
                        DataWidth::Word => {
                            self.sections.word_string(&units, &mut self.diag)?;
                        }
                        DataWidth::Long => {
                            self.sections.long_string(&units, &mut self.diag)?;
                        }
                    }
                }
                DataItem::Expr(expr) => {
                    let value = self.eval_expr(expr);
                    match width {
                        DataWidth::Byte => self.sections.rel_byte(value, 0, &mut self.diag)?,
                        DataWidth::Word => self.sections.rel_word(value, 0, &mut self.diag)?,
                        DataWidth::Long => self.sections.rel_long(value, 0, &mut self.diag)?,
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_ds(&mut self, count: &Expr, fills: &[Expr]) -> Result<(), Fatal> {
        let Some(count) = self.const_expr(count, "DS") else {
            return Ok(());
        };
        if count < 0 {
            self.diag.error("DS count cannot be negative");
            return Ok(());
        }

        if fills.is_empty() {
            self.sections
                .skip(count as u32, true, self.options, &mut self.diag)
        } else {
            let fills: Vec<Expression> = fills
                .iter()
                .map(|expr| self.eval_expr(expr))
                .collect();
            self.sections
                .rel_bytes(count as u32, &fills, &mut self.diag)
        }
    }

    fn emit_incbin(
        &mut self,
        name: &str,
        start: Option<&Expr>,
        length: Option<&Expr>,
    ) -> Result<(), Fatal> {
        let start = match start {
            Some(expr) => match self.const_expr(expr, "INCBIN") {
                Some(value) if value >= 0 => value as u32,
                Some(_) => {
                    self.diag.error("INCBIN start position cannot be negative");
                    return Ok(());
                }
                None => return Ok(()),
            },
            None => 0,
        };

        match length {
            None => self
                .sections
                .binary_file(name, start, &self.fstack, &mut self.diag),
            Some(expr) => {
                let Some(length) = self.const_expr(expr, "INCBIN") else {
                    return Ok(());
                };
                if length < 0 {
                    self.diag.error("INCBIN length cannot be negative");
                    return Ok(());
                }
                self.sections.binary_file_slice(
                    name,
                    start,
                    length as u32,
                    &self.fstack,
                    &mut self.diag,
                )
            }
        }
    }

    fn exec_align(&mut self, alignment: &Expr, offset: Option<&Expr>) {
        let Some(alignment) = self.const_expr(alignment, "ALIGN") else {
            return;
        };
        if !(0..=16).contains(&alignment) {
            self.diag.error(format!(
                "Alignment must be between 0 and 16, not {alignment}"
            ));
            return;
        }
        let offset = match offset {
            Some(expr) => match self.const_expr(expr, "ALIGN") {
                Some(value) => value,
                None => return,
            },
            None => 0,
        };
        if offset < 0 || (alignment < 16 && offset >= 1 << alignment) {
            self.diag.error(format!(
                "Alignment offset ({offset}) must be smaller than alignment size ({})",
                1u32 << alignment
            ));
            return;
        }
        self.sections
            .align_pc(alignment as u8, offset as u16, &mut self.diag);
    }

    fn exec_include(&mut self, name: &str) -> Result<(), Fatal> {
        if self.fstack.depth() >= self.options.max_recursion_depth {
            return Err(self.diag.fatal(format!(
                "Recursion limit ({}) exceeded",
                self.options.max_recursion_depth
            )));
        }

        let Some(path) = self.fstack.find_file(name) else {
            self.diag
                .error(format!("Unable to open included file '{name}'"));
            return Ok(());
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                self.diag
                    .error(format!("Unable to read included file '{name}': {err}"));
                return Ok(());
            }
        };

        let line = self.diag.location().line;
        let source_id = self
            .fstack
            .enter_include(path.display().to_string(), text, line);
        let stmts = self.parse_source(source_id);
        // BREAK does not escape an included file.
        let result = self.exec_block(&stmts, false);
        self.fstack.leave();
        result.map(|_| ())
    }

    fn exec_rept(&mut self, count: &Expr, body: &[Spanned<Stmt>]) -> Result<(), Fatal> {
        let Some(count) = self.const_expr(count, "REPT") else {
            return Ok(());
        };
        if count < 0 {
            self.diag.error("REPT count cannot be negative");
            return Ok(());
        }
        if count == 0 {
            return Ok(());
        }
        if self.fstack.depth() >= self.options.max_recursion_depth {
            return Err(self.diag.fatal(format!(
                "Recursion limit ({}) exceeded",
                self.options.max_recursion_depth
            )));
        }

        let line = self.diag.location().line;
        self.fstack.enter_rept(line);
        for iteration in 0..count {
            if iteration > 0 {
                self.fstack.next_rept_iteration();
            }
            if let Flow::Break = self.exec_block(body, true)? {
                break;
            }
        }
        self.fstack.leave();
        Ok(())
    }

    fn exec_for(
        &mut self,
        symbol: &str,
        start: &Expr,
        stop: &Expr,
        step: Option<&Expr>,
        body: &[Spanned<Stmt>],
    ) -> Result<(), Fatal> {
        let (Some(start), Some(stop)) = (
            self.const_expr(start, "FOR"),
            self.const_expr(stop, "FOR"),
        ) else {
            return Ok(());
        };
        let step = match step {
            Some(expr) => match self.const_expr(expr, "FOR") {
                Some(value) => value,
                None => return Ok(()),
            },
            None => 1,
        };

        if !self.symbols.set_variable(symbol, start, &mut self.diag) {
            return Ok(());
        }

        let count: i64 = if step > 0 && start < stop {
            (stop as i64 - start as i64 - 1) / step as i64 + 1
        } else if step < 0 && stop < start {
            (start as i64 - stop as i64 - 1) / -(step as i64) + 1
        } else {
            if step == 0 {
                self.diag.error("FOR cannot have a step value of 0");
            }
            0
        };

        if (step > 0 && start > stop) || (step < 0 && start < stop) {
            self.diag.warning(
                WarningKind::BackwardsFor,
                format!("FOR goes backwards from {start} to {stop} by {step}"),
            );
        }

        if count == 0 {
            return Ok(());
        }
        if self.fstack.depth() >= self.options.max_recursion_depth {
            return Err(self.diag.fatal(format!(
                "Recursion limit ({}) exceeded",
                self.options.max_recursion_depth
            )));
        }

        let line = self.diag.location().line;
        self.fstack.enter_rept(line);
        let mut value = start;
        for iteration in 0..count {
            if iteration > 0 {
                self.fstack.next_rept_iteration();
                value = value.wrapping_add(step);
                if !self.symbols.set_variable(symbol, value, &mut self.diag) {
                    break;
                }
            }
            if let Flow::Break = self.exec_block(body, true)? {
                break;
            }
        }
        self.fstack.leave();
        Ok(())
    }

    fn exec_print(&mut self, newline: bool, fmt: &str, args: &[PrintArg]) {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                PrintArg::Str(text) => values.push(FormatArg::Str(text.clone())),
                PrintArg::Expr(expr) => {
                    match self.const_expr(expr, "PRINT") {
                        Some(value) => values.push(FormatArg::Number(value)),
                        None => values.push(FormatArg::Number(0)),
                    }
                }
            }
        }

        let text = interpolate(fmt, &values, self.options, &mut self.diag);
        if newline {
            println!("{text}");
        } else {
            print!("{text}");
        }
    }
}
