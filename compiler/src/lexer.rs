// Lexer for time-dependence expressions.
//
// Tokenizes the coefficient expressions attached to Hamiltonian terms
// (e.g. `np.exp(-1j*omega*t) * D0`). Uses the `logos` crate for DFA-based
// lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in expression text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Expression token types.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // ── Symbols ──
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("**")]
    StarStar,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,

    // ── Literals ──
    //
    // Imaginary literals share the number prefix; logos picks the longer
    // match, so `2.5j` lexes as Imag rather than Number + Ident.
    /// Imaginary literal (e.g. `1j`, `2.5e-3J`, `.5j`). Value is the imaginary part.
    #[regex(r"([0-9]+\.[0-9]*|\.[0-9]+|[0-9]+)([eE][+-]?[0-9]+)?[jJ]", parse_imag)]
    Imag(f64),

    /// Real literal (`2`, `.5`, `1.`, `1.e3`). Sign is a separate token.
    #[regex(r"([0-9]+\.[0-9]*|\.[0-9]+|[0-9]+)([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::StarStar => write!(f, "**"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Imag(v) => write!(f, "{v}j"),
            Token::Number(v) => write!(f, "{v}"),
            Token::Ident(name) => write!(f, "{name}"),
        }
    }
}

// ── Callbacks ──

fn parse_number(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_imag(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    let slice = lex.slice();
    slice[..slice.len() - 1].parse().ok()
}

// ── Public API ──

/// Lex an expression string into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn operators() {
        assert_eq!(
            lex_ok("+ - * ** / ( ) , ."),
            vec![
                Token::Plus,
                Token::Minus,
                Token::Star,
                Token::StarStar,
                Token::Slash,
                Token::LParen,
                Token::RParen,
                Token::Comma,
                Token::Dot,
            ]
        );
    }

    #[test]
    fn numbers_and_imaginary() {
        assert_eq!(
            lex_ok("2 0.5 1e-3 1j 2.5J"),
            vec![
                Token::Number(2.0),
                Token::Number(0.5),
                Token::Number(1e-3),
                Token::Imag(1.0),
                Token::Imag(2.5),
            ]
        );
    }

    #[test]
    fn literals_without_leading_or_trailing_digits() {
        assert_eq!(
            lex_ok(".5 1. 1.e3 .25j 2.J"),
            vec![
                Token::Number(0.5),
                Token::Number(1.0),
                Token::Number(1e3),
                Token::Imag(0.25),
                Token::Imag(2.0),
            ]
        );
    }

    #[test]
    fn leading_dot_literal_after_operator() {
        assert_eq!(
            lex_ok("t*.5"),
            vec![Token::Ident("t".into()), Token::Star, Token::Number(0.5)]
        );
    }

    #[test]
    fn minus_is_separate_token() {
        assert_eq!(
            lex_ok("a-1"),
            vec![Token::Ident("a".into()), Token::Minus, Token::Number(1.0)]
        );
    }

    #[test]
    fn dotted_path() {
        assert_eq!(
            lex_ok("np.exp"),
            vec![
                Token::Ident("np".into()),
                Token::Dot,
                Token::Ident("exp".into())
            ]
        );
    }

    #[test]
    fn spans_are_byte_offsets() {
        let result = lex("  D0 * x");
        assert_eq!(result.tokens[0].1, Span { start: 2, end: 4 });
        assert_eq!(result.tokens[2].1, Span { start: 7, end: 8 });
    }

    #[test]
    fn bad_character_is_reported_and_skipped() {
        let result = lex("D0 $ 2");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 3, end: 4 });
        assert_eq!(result.tokens.len(), 2);
    }
}
