use crate::lexer::LexicalError;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Classification of a [`Diagnostic`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DiagnosticKind {
    /// The input contained characters that could not be tokenized.
    Lex,
    /// The token stream violated the grammar.
    Syntax,
    /// The tree is well-formed but ill-typed, e.g. an identifier inside a
    /// set literal or a pattern the regex engine rejects.
    Semantic,
}

impl Display for DiagnosticKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lex => write!(formatter, "lex"),
            Self::Syntax => write!(formatter, "syntax"),
            Self::Semantic => write!(formatter, "semantic"),
        }
    }
}

/// A single problem found while turning source text into a validated tree.
///
/// Diagnostics are accumulated rather than thrown; a predicate carrying any
/// diagnostic is invalid and refuses to evaluate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// 1-based source line.
    pub line: u32,
    /// 0-based source column.
    pub column: u32,
}

impl Display for Diagnostic {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} error at line: {}, col {}: {}",
            self.kind, self.line, self.column, self.message
        )
    }
}

/// Errors returned by the [`crate::Predicate`] facade.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum PredicateError {
    #[error("the predicate is invalid; inspect errors() for diagnostics")]
    Invalid,
    #[error("the predicate's syntax tree has been pruned by a finalized set")]
    Pruned,
}

/// Errors returned by the predicate-set facades.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum SetError {
    #[error("invalid predicate provided: {0}")]
    InvalidPredicate(String),
    #[error("the set has been finalized and can no longer be updated")]
    Finalized,
    #[error("the set has not been compiled; call compile_ast() first")]
    NotCompiled,
}

/// Error type threaded through the lalrpop parser for lexer failures.
///
/// The lexer records lexical problems as diagnostics and keeps scanning, so
/// in practice this never surfaces through a parse; the variant exists to
/// satisfy the token stream contract.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ParserError {
    #[error("failed to lex the expression with {0:?}")]
    Lexical(LexicalError),
}
