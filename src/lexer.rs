use crate::error::ParserError;
use logos::{Logos, SpannedIter};
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Default, Error, Debug, Clone, PartialEq)]
pub enum LexicalError {
    #[default]
    #[error("unrecognized character sequence")]
    InvalidToken,
    #[error("failed to parse number: {0:?}")]
    Number(rust_decimal::Error),
}

#[derive(Clone, Debug, Logos, PartialEq)]
#[logos(error = LexicalError)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("is")]
    Is,
    #[token("contains")]
    Contains,
    #[token("matches")]
    Matches,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("undefined")]
    Undefined,
    #[token("null")]
    Null,
    #[token("empty")]
    Empty,
    #[token("<")]
    LessThan,
    #[token("<=")]
    LessThanEqual,
    #[token(">")]
    GreaterThan,
    #[token(">=")]
    GreaterThanEqual,
    #[token("=")]
    #[token("==")]
    Equal,
    #[token("!=")]
    NotEqual,
    #[token("(")]
    LeftParenthesis,
    #[token(")")]
    RightParenthesis,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[regex(r"-?[0-9]+(\.[0-9]+)?", |lex| Decimal::from_str(lex.slice()).map_err(LexicalError::Number))]
    NumberLiteral(Decimal),
    #[regex(r#""(\\.|[^"\\])*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'(\\.|[^'\\])*'"#, |lex| unescape(lex.slice()))]
    StringLiteral(String),
    #[regex(r"/(\\.|[^/\\])*/[a-zA-Z]*", |lex| split_regex(lex.slice()))]
    RegexLiteral((String, String)),
    #[regex(r"[A-Za-z_][A-Za-z0-9_.:;-]*", |lex| lex.slice().to_owned(), priority = 1)]
    Identifier(String),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Strips the surrounding quotes and processes the standard escapes.
///
/// Unknown escapes keep the escaped character verbatim so regex-looking
/// strings such as `"east-web-([\d]+)"` survive untouched.
fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut output = String::with_capacity(inner.len());
    let mut characters = inner.chars();
    while let Some(character) = characters.next() {
        if character != '\\' {
            output.push(character);
            continue;
        }
        match characters.next() {
            Some('n') => output.push('\n'),
            Some('t') => output.push('\t'),
            Some('\\') => output.push('\\'),
            Some('\'') => output.push('\''),
            Some('"') => output.push('"'),
            Some(other) => {
                output.push('\\');
                output.push(other);
            }
            None => output.push('\\'),
        }
    }
    output
}

/// Splits `/pattern/flags` into its pattern and flag parts.
///
/// The token shape guarantees a closing delimiter, so the last `/` always
/// separates the pattern from the (possibly empty) flags.
fn split_regex(slice: &str) -> (String, String) {
    let closing = slice.rfind('/').unwrap_or(0);
    (
        slice[1..closing].to_owned(),
        slice[closing + 1..].to_owned(),
    )
}

/// A lexical problem at a byte offset, kept while scanning continues.
#[derive(Clone, Debug, PartialEq)]
pub struct LexIssue {
    pub offset: usize,
    pub message: String,
}

pub type Spanned<Tok, Location, Error> = Result<(Location, Tok, Location), Error>;

/// Token iterator feeding the parser.
///
/// Offending input is recorded as a [`LexIssue`] and skipped so that a
/// single pass can surface every lexical problem in the source.
pub struct Lexer<'input, 'issues> {
    token_stream: SpannedIter<'input, Token>,
    source: &'input str,
    issues: &'issues mut Vec<LexIssue>,
}

impl<'input, 'issues> Lexer<'input, 'issues> {
    pub fn new(input: &'input str, issues: &'issues mut Vec<LexIssue>) -> Self {
        Self {
            token_stream: Token::lexer(input).spanned(),
            source: input,
            issues,
        }
    }
}

impl<'input, 'issues> Iterator for Lexer<'input, 'issues> {
    type Item = Spanned<Token, usize, ParserError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (token, span) = self.token_stream.next()?;
            match token {
                Ok(token) => return Some(Ok((span.start, token, span.end))),
                Err(error) => {
                    let slice = &self.source[span.start..span.end];
                    self.issues.push(LexIssue {
                        offset: span.start,
                        message: format!("failed to lex '{slice}': {error}"),
                    });
                }
            }
        }
    }
}
