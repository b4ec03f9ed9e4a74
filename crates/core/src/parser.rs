use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::lexer::TokenKind;
use crate::section::{SectionKind, SectionModifier};
use crate::span::{SourceId, Span, Spanned};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWidth {
    Byte,
    Word,
    Long,
}

impl DataWidth {
    pub fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::Long => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataItem {
    Expr(Expr),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrintArg {
    Expr(Expr),
    Str(String),
}

/// A SECTION or LOAD header, attributes still unevaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionDecl {
    pub modifier: SectionModifier,
    pub name: String,
    pub kind: SectionKind,
    pub org: Option<Expr>,
    pub bank: Option<Expr>,
    pub align: Option<(Expr, Option<Expr>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Section(SectionDecl),
    Load(SectionDecl),
    Endl,
    Label { name: String, exported: bool },
    Data { width: DataWidth, items: Vec<DataItem> },
    Ds { count: Expr, fills: Vec<Expr> },
    Incbin { name: String, start: Option<Expr>, length: Option<Expr> },
    Align { alignment: Expr, offset: Option<Expr> },
    Union,
    Nextu,
    Endu,
    Pushs,
    Pops,
    EndSection,
    Include { name: String },
    Rept { count: Expr, body: Vec<Spanned<Stmt>> },
    For {
        symbol: String,
        start: Expr,
        stop: Expr,
        step: Option<Expr>,
        body: Vec<Spanned<Stmt>>,
    },
    Break,
    Def { name: String, value: Expr },
    Export { names: Vec<String> },
    Print { newline: bool, fmt: String, args: Vec<PrintArg> },
}

/// Parse a lexed file into statements. Errors are collected per line; the
/// parser resynchronizes at the next line break.
pub fn parse(
    source_id: SourceId,
    tokens: Vec<Spanned<TokenKind>>,
    text_len: usize,
) -> (Vec<Spanned<Stmt>>, Vec<(Span, String)>) {
    let mut parser = Parser {
        tokens,
        pos: 0,
        eof_span: Span::new(source_id, text_len, text_len),
        errors: Vec::new(),
    };
    let (stmts, _) = parser.parse_stmts(false);
    (stmts, parser.errors)
}

struct Parser {
    tokens: Vec<Spanned<TokenKind>>,
    pos: usize,
    eof_span: Span,
    errors: Vec<(Span, String)>,
}

impl Parser {
    /// Parse until EOF, or until a matching `ENDR` when `inside_rept`.
    /// The bool reports whether the block was closed by `ENDR`.
    fn parse_stmts(&mut self, inside_rept: bool) -> (Vec<Spanned<Stmt>>, bool) {
        let mut stmts = Vec::new();

        loop {
            while self.check(&TokenKind::Newline) {}
            if self.at_end() {
                return (stmts, false);
            }
            // The caller owns the ENDR's line terminator.
            if inside_rept && self.peek_is(&TokenKind::Endr) {
                self.advance();
                return (stmts, true);
            }

            self.parse_line(&mut stmts, inside_rept);
        }
    }

    fn parse_line(&mut self, stmts: &mut Vec<Spanned<Stmt>>, inside_rept: bool) {
        // A leading `Name:` or `Name::` label, possibly followed by a
        // directive on the same line.
        if let Some(TokenKind::Ident(_)) = self.peek() {
            let exported = match self.peek2() {
                Some(TokenKind::DoubleColon) => Some(true),
                Some(TokenKind::Colon) => Some(false),
                _ => None,
            };
            if let Some(exported) = exported {
                let start = self.peek_span();
                let name = match self.advance() {
                    Some(Spanned {
                        node: TokenKind::Ident(name),
                        ..
                    }) => name,
                    _ => return,
                };
                let end = self.peek_span();
                self.advance(); // the colon(s)
                stmts.push(Spanned::new(
                    Stmt::Label { name, exported },
                    start.join(end),
                ));

                if self.peek_is(&TokenKind::Newline) || self.at_end() {
                    self.check(&TokenKind::Newline);
                    return;
                }
            }
        }

        let start = self.peek_span();
        let Some(stmt) = self.parse_directive(inside_rept) else {
            self.sync_to_line_end();
            return;
        };
        let span = start.join(self.prev_span());
        stmts.push(Spanned::new(stmt, span));
        self.expect_line_end();
    }

    fn parse_directive(&mut self, inside_rept: bool) -> Option<Stmt> {
        let token = self.advance()?;
        match token.node {
            TokenKind::Section => self.parse_section_decl().map(Stmt::Section),
            TokenKind::Load => self.parse_section_decl().map(Stmt::Load),
            TokenKind::Endl => Some(Stmt::Endl),
            TokenKind::Db => Some(Stmt::Data {
                width: DataWidth::Byte,
                items: self.parse_data_items()?,
            }),
            TokenKind::Dw => Some(Stmt::Data {
                width: DataWidth::Word,
                items: self.parse_data_items()?,
            }),
            TokenKind::Dl => Some(Stmt::Data {
                width: DataWidth::Long,
                items: self.parse_data_items()?,
            }),
            TokenKind::Ds => {
                let count = self.parse_expr()?;
                let mut fills = Vec::new();
                while self.check(&TokenKind::Comma) {
                    fills.push(self.parse_expr()?);
                }
                Some(Stmt::Ds { count, fills })
            }
            TokenKind::Incbin => {
                let name = self.expect_string()?;
                let mut start = None;
                let mut length = None;
                if self.check(&TokenKind::Comma) {
                    start = Some(self.parse_expr()?);
                    if self.check(&TokenKind::Comma) {
                        length = Some(self.parse_expr()?);
                    }
                }
                Some(Stmt::Incbin {
                    name,
                    start,
                    length,
                })
            }
            TokenKind::Align => {
                let alignment = self.parse_expr()?;
                let offset = if self.check(&TokenKind::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                Some(Stmt::Align { alignment, offset })
            }
            TokenKind::Union => Some(Stmt::Union),
            TokenKind::Nextu => Some(Stmt::Nextu),
            TokenKind::Endu => Some(Stmt::Endu),
            TokenKind::Pushs => Some(Stmt::Pushs),
            TokenKind::Pops => Some(Stmt::Pops),
            TokenKind::EndSection => Some(Stmt::EndSection),
            TokenKind::Include => {
                let name = self.expect_string()?;
                Some(Stmt::Include { name })
            }
            TokenKind::Rept => {
                let count = self.parse_expr()?;
                self.expect_line_end();
                let (body, closed) = self.parse_stmts(true);
                if !closed {
                    self.error(token.span, "REPT block without matching ENDR");
                }
                Some(Stmt::Rept { count, body })
            }
            TokenKind::For => {
                let symbol = self.expect_ident()?;
                self.expect(&TokenKind::Comma)?;
                let start = self.parse_expr()?;
                self.expect(&TokenKind::Comma)?;
                let stop = self.parse_expr()?;
                let step = if self.check(&TokenKind::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.expect_line_end();
                let (body, closed) = self.parse_stmts(true);
                if !closed {
                    self.error(token.span, "FOR block without matching ENDR");
                }
                Some(Stmt::For {
                    symbol,
                    start,
                    stop,
                    step,
                    body,
                })
            }
            TokenKind::Endr if !inside_rept => {
                self.error(token.span, "ENDR outside of a REPT/FOR block");
                None
            }
            TokenKind::Break => Some(Stmt::Break),
            TokenKind::Def => {
                let name = self.expect_ident()?;
                self.expect(&TokenKind::Equ)?;
                let value = self.parse_expr()?;
                Some(Stmt::Def { name, value })
            }
            TokenKind::Export => {
                let mut names = vec![self.expect_ident()?];
                while self.check(&TokenKind::Comma) {
                    names.push(self.expect_ident()?);
                }
                Some(Stmt::Export { names })
            }
            TokenKind::Print | TokenKind::Println => {
                let newline = token.node == TokenKind::Println;
                let fmt = self.expect_string()?;
                let mut args = Vec::new();
                while self.check(&TokenKind::Comma) {
                    if let Some(TokenKind::Str(_)) = self.peek() {
                        args.push(PrintArg::Str(self.expect_string()?));
                    } else {
                        args.push(PrintArg::Expr(self.parse_expr()?));
                    }
                }
                Some(Stmt::Print { newline, fmt, args })
            }
            other => {
                self.error(token.span, format!("Unexpected {}", describe(&other)));
                None
            }
        }
    }

    fn parse_section_decl(&mut self) -> Option<SectionDecl> {
        let modifier = if self.check(&TokenKind::Union) {
            SectionModifier::Union
        } else if self.check(&TokenKind::Fragment) {
            SectionModifier::Fragment
        } else {
            SectionModifier::Normal
        };

        let name = self.expect_string()?;
        self.expect(&TokenKind::Comma)?;

        let kind_token = self.advance()?;
        let kind = match kind_token.node {
            TokenKind::Rom0 => SectionKind::Rom0,
            TokenKind::Romx => SectionKind::Romx,
            TokenKind::Vram => SectionKind::Vram,
            TokenKind::Sram => SectionKind::Sram,
            TokenKind::Wram0 => SectionKind::Wram0,
            TokenKind::Wramx => SectionKind::Wramx,
            TokenKind::Oam => SectionKind::Oam,
            TokenKind::Hram => SectionKind::Hram,
            other => {
                self.error(
                    kind_token.span,
                    format!("Expected a section type, found {}", describe(&other)),
                );
                return None;
            }
        };

        let org = if self.check(&TokenKind::LBracket) {
            let org = self.parse_expr()?;
            self.expect(&TokenKind::RBracket)?;
            Some(org)
        } else {
            None
        };

        let mut bank = None;
        let mut align = None;
        while self.check(&TokenKind::Comma) {
            if self.check(&TokenKind::Bank) {
                self.expect(&TokenKind::LBracket)?;
                bank = Some(self.parse_expr()?);
                self.expect(&TokenKind::RBracket)?;
            } else if self.check(&TokenKind::Align) {
                self.expect(&TokenKind::LBracket)?;
                let alignment = self.parse_expr()?;
                let offset = if self.check(&TokenKind::Comma) {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                self.expect(&TokenKind::RBracket)?;
                align = Some((alignment, offset));
            } else {
                let span = self.peek_span();
                self.error(span, "Expected BANK[...] or ALIGN[...]");
                return None;
            }
        }

        Some(SectionDecl {
            modifier,
            name,
            kind,
            org,
            bank,
            align,
        })
    }

    fn parse_data_items(&mut self) -> Option<Vec<DataItem>> {
        let mut items = Vec::new();
        if self.peek_is(&TokenKind::Newline) || self.at_end() {
            return Some(items);
        }

        loop {
            if let Some(TokenKind::Str(_)) = self.peek() {
                items.push(DataItem::Str(self.expect_string()?));
            } else {
                items.push(DataItem::Expr(self.parse_expr()?));
            }
            if !self.check(&TokenKind::Comma) {
                return Some(items);
            }
        }
    }

    // --- expressions, precedence climbing ---

    fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, level: usize) -> Option<Expr> {
        const UNARY_LEVEL: usize = 6;
        if level >= UNARY_LEVEL {
            return self.parse_unary();
        }

        let mut lhs = self.parse_binary(level + 1)?;
        loop {
            let op = match self.peek().and_then(|token| binary_op(level, token)) {
                Some(op) => op,
                None => return Some(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_binary(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        if self.check(&TokenKind::Minus) {
            return Some(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        if self.check(&TokenKind::Tilde) {
            return Some(Expr::Unary(
                UnaryOp::Complement,
                Box::new(self.parse_unary()?),
            ));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Option<Expr> {
        let token = self.advance()?;
        match token.node {
            TokenKind::Number(value) => Some(Expr::Number(value)),
            TokenKind::Ident(name) => Some(Expr::Symbol(name)),
            TokenKind::At => Some(Expr::Pc),
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Some(inner)
            }
            other => {
                self.error(
                    token.span,
                    format!("Expected an expression, found {}", describe(&other)),
                );
                None
            }
        }
    }

    // --- token plumbing ---

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|token| &token.node)
    }

    fn peek2(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos + 1).map(|token| &token.node)
    }

    fn peek_is(&self, kind: &TokenKind) -> bool {
        self.peek() == Some(kind)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|token| token.span)
            .unwrap_or(self.eof_span)
    }

    fn prev_span(&self) -> Span {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|token| token.span)
            .unwrap_or(self.eof_span)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn advance(&mut self) -> Option<Spanned<TokenKind>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        } else {
            self.error(self.eof_span, "Unexpected end of input");
        }
        token
    }

    /// Consume the next token if it matches.
    fn check(&mut self, kind: &TokenKind) -> bool {
        if self.peek_is(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Option<()> {
        if self.check(kind) {
            Some(())
        } else {
            let span = self.peek_span();
            let found = self
                .peek()
                .map(describe)
                .unwrap_or_else(|| "end of input".to_string());
            self.error(span, format!("Expected {}, found {found}", describe(kind)));
            None
        }
    }

    fn expect_string(&mut self) -> Option<String> {
        match self.peek() {
            Some(TokenKind::Str(_)) => match self.advance() {
                Some(Spanned {
                    node: TokenKind::Str(value),
                    ..
                }) => Some(value),
                _ => None,
            },
            _ => {
                let span = self.peek_span();
                self.error(span, "Expected a quoted string");
                None
            }
        }
    }

    fn expect_ident(&mut self) -> Option<String> {
        match self.peek() {
            Some(TokenKind::Ident(_)) => match self.advance() {
                Some(Spanned {
                    node: TokenKind::Ident(name),
                    ..
                }) => Some(name),
                _ => None,
            },
            _ => {
                let span = self.peek_span();
                self.error(span, "Expected a symbol name");
                None
            }
        }
    }

    fn expect_line_end(&mut self) {
        if self.at_end() || self.check(&TokenKind::Newline) {
            return;
        }
        let span = self.peek_span();
        let found = self
            .peek()
            .map(describe)
            .unwrap_or_else(|| "end of input".to_string());
        self.error(span, format!("Expected end of line, found {found}"));
        self.sync_to_line_end();
    }

    fn sync_to_line_end(&mut self) {
        while let Some(token) = self.peek() {
            let newline = *token == TokenKind::Newline;
            self.pos += 1;
            if newline {
                break;
            }
        }
    }

    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.errors.push((span, message.into()));
    }
}

/// Binary operators by precedence level, loosest first.
fn binary_op(level: usize, token: &TokenKind) -> Option<BinaryOp> {
    match (level, token) {
        (0, TokenKind::Pipe) => Some(BinaryOp::Or),
        (1, TokenKind::Caret) => Some(BinaryOp::Xor),
        (2, TokenKind::Amp) => Some(BinaryOp::And),
        (3, TokenKind::Shl) => Some(BinaryOp::Shl),
        (3, TokenKind::Shr) => Some(BinaryOp::Shr),
        (4, TokenKind::Plus) => Some(BinaryOp::Add),
        (4, TokenKind::Minus) => Some(BinaryOp::Sub),
        (5, TokenKind::Star) => Some(BinaryOp::Mul),
        (5, TokenKind::Slash) => Some(BinaryOp::Div),
        (5, TokenKind::Percent) => Some(BinaryOp::Mod),
        _ => None,
    }
}

fn describe(token: &TokenKind) -> String {
    match token {
        TokenKind::Newline => "end of line".to_string(),
        TokenKind::Ident(name) => format!("'{name}'"),
        TokenKind::Number(value) => format!("number {value}"),
        TokenKind::Str(value) => format!("string \"{value}\""),
        TokenKind::Comma => "','".to_string(),
        TokenKind::LBracket => "'['".to_string(),
        TokenKind::RBracket => "']'".to_string(),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::Colon => "':'".to_string(),
        TokenKind::DoubleColon => "'::'".to_string(),
        other => format!("{other:?}"),
    }
}
