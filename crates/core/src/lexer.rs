use logos::Logos;

use crate::span::{SourceId, Span, Spanned};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\f]+|;[^\n]*")]
pub enum TokenKind {
    #[token("\n")]
    Newline,

    #[token("SECTION", ignore(ascii_case))]
    Section,
    #[token("FRAGMENT", ignore(ascii_case))]
    Fragment,
    #[token("UNION", ignore(ascii_case))]
    Union,
    #[token("NEXTU", ignore(ascii_case))]
    Nextu,
    #[token("ENDU", ignore(ascii_case))]
    Endu,
    #[token("LOAD", ignore(ascii_case))]
    Load,
    #[token("ENDL", ignore(ascii_case))]
    Endl,
    #[token("PUSHS", ignore(ascii_case))]
    Pushs,
    #[token("POPS", ignore(ascii_case))]
    Pops,
    #[token("ENDSECTION", ignore(ascii_case))]
    EndSection,
    #[token("DB", ignore(ascii_case))]
    Db,
    #[token("DW", ignore(ascii_case))]
    Dw,
    #[token("DL", ignore(ascii_case))]
    Dl,
    #[token("DS", ignore(ascii_case))]
    Ds,
    #[token("INCBIN", ignore(ascii_case))]
    Incbin,
    #[token("INCLUDE", ignore(ascii_case))]
    Include,
    #[token("ALIGN", ignore(ascii_case))]
    Align,
    #[token("BANK", ignore(ascii_case))]
    Bank,
    #[token("REPT", ignore(ascii_case))]
    Rept,
    #[token("FOR", ignore(ascii_case))]
    For,
    #[token("ENDR", ignore(ascii_case))]
    Endr,
    #[token("BREAK", ignore(ascii_case))]
    Break,
    #[token("DEF", ignore(ascii_case))]
    Def,
    #[token("EQU", ignore(ascii_case))]
    Equ,
    #[token("EXPORT", ignore(ascii_case))]
    Export,
    #[token("PRINT", ignore(ascii_case))]
    Print,
    #[token("PRINTLN", ignore(ascii_case))]
    Println,

    #[token("ROM0", ignore(ascii_case))]
    Rom0,
    #[token("ROMX", ignore(ascii_case))]
    Romx,
    #[token("VRAM", ignore(ascii_case))]
    Vram,
    #[token("SRAM", ignore(ascii_case))]
    Sram,
    #[token("WRAM0", ignore(ascii_case))]
    Wram0,
    #[token("WRAMX", ignore(ascii_case))]
    Wramx,
    #[token("OAM", ignore(ascii_case))]
    Oam,
    #[token("HRAM", ignore(ascii_case))]
    Hram,

    /// Symbol name; local names keep their leading dot.
    #[regex(r"\.?[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<u32>().ok().map(|value| value as i32))]
    #[regex(r"\$[0-9A-Fa-f]+", |lex| u32::from_str_radix(&lex.slice()[1..], 16).ok().map(|value| value as i32))]
    #[regex(r"%[01]+", |lex| u32::from_str_radix(&lex.slice()[1..], 2).ok().map(|value| value as i32))]
    Number(i32),

    #[regex(r#""[^"\n]*""#, |lex| {
        let slice = lex.slice();
        slice[1..slice.len() - 1].to_string()
    })]
    Str(String),

    #[token(",")]
    Comma,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("::")]
    DoubleColon,
    #[token(":")]
    Colon,
    #[token("@")]
    At,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
}

/// Tokenize a whole file. Bad tokens are reported and skipped so parsing
/// can look at the rest of the line.
pub fn lex(source_id: SourceId, text: &str) -> (Vec<Spanned<TokenKind>>, Vec<(Span, String)>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in TokenKind::lexer(text).spanned() {
        let span = Span::new(source_id, range.start, range.end);
        match result {
            Ok(token) => tokens.push(Spanned::new(token, span)),
            Err(()) => errors.push((
                span,
                format!("Unexpected character {:?}", &text[range.start..range.end]),
            )),
        }
    }

    (tokens, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let (tokens, errors) = lex(SourceId(0), text);
        assert!(errors.is_empty(), "lex errors: {errors:?}");
        tokens.into_iter().map(|token| token.node).collect()
    }

    #[test]
    fn directives_are_case_insensitive() {
        assert_eq!(
            kinds("section \"X\", rom0"),
            vec![
                TokenKind::Section,
                TokenKind::Str("X".to_string()),
                TokenKind::Comma,
                TokenKind::Rom0,
            ]
        );
    }

    #[test]
    fn numeric_literal_bases() {
        assert_eq!(
            kinds("255 $FF %11111111"),
            vec![
                TokenKind::Number(255),
                TokenKind::Number(255),
                TokenKind::Number(255),
            ]
        );
    }

    #[test]
    fn high_hex_values_wrap_into_i32() {
        assert_eq!(kinds("$FFFFFFFF"), vec![TokenKind::Number(-1)]);
    }

    #[test]
    fn local_names_keep_their_dot() {
        assert_eq!(
            kinds(".loop:"),
            vec![
                TokenKind::Ident(".loop".to_string()),
                TokenKind::Colon,
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(
            kinds("DB 1 ; two, three\nDB 4"),
            vec![
                TokenKind::Db,
                TokenKind::Number(1),
                TokenKind::Newline,
                TokenKind::Db,
                TokenKind::Number(4),
            ]
        );
    }

    #[test]
    fn exported_label_punctuation() {
        assert_eq!(
            kinds("Main::"),
            vec![
                TokenKind::Ident("Main".to_string()),
                TokenKind::DoubleColon,
            ]
        );
    }

    #[test]
    fn stray_characters_are_reported() {
        let (_, errors) = lex(SourceId(0), "DB !");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn keywords_do_not_swallow_longer_names() {
        assert_eq!(
            kinds("LoadBuffer"),
            vec![TokenKind::Ident("LoadBuffer".to_string())]
        );
    }
}
