use crate::ast::{Expr, Position};
use crate::error::{Diagnostic, DiagnosticKind, ParserError};
use crate::lexer::{Lexer, Token};
use lalrpop_util::{lalrpop_mod, ParseError};

lalrpop_mod!(grammar);

use self::grammar::TreeParser;

/// Maps byte offsets to 1-based line / 0-based column positions.
pub(crate) struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(input: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, byte) in input.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset + 1);
            }
        }
        Self { line_starts }
    }

    pub(crate) fn position(&self, offset: usize) -> Position {
        let line = self.line_starts.partition_point(|start| *start <= offset);
        Position {
            line: line as u32,
            column: (offset - self.line_starts[line - 1]) as u32,
        }
    }
}

/// Parses one predicate.
///
/// Diagnostics accumulate into the supplied vector instead of aborting the
/// pass: the lexer skips unrecognizable input and records every lexical
/// problem it meets, then a grammar violation is reported with the position
/// of the offending token. Returns the tree when the token stream parsed.
pub(crate) fn parse(input: &str, diagnostics: &mut Vec<Diagnostic>) -> Option<Expr> {
    let index = LineIndex::new(input);
    let mut issues = Vec::new();
    let result = {
        let lexer = Lexer::new(input, &mut issues);
        TreeParser::new().parse(&index, lexer)
    };

    for issue in issues {
        let position = index.position(issue.offset);
        diagnostics.push(Diagnostic {
            kind: DiagnosticKind::Lex,
            message: issue.message,
            line: position.line,
            column: position.column,
        });
    }

    match result {
        Ok(tree) => Some(tree),
        Err(error) => {
            diagnostics.push(convert_error(error, &index, input.len()));
            None
        }
    }
}

fn convert_error(
    error: ParseError<usize, Token, ParserError>,
    index: &LineIndex,
    input_length: usize,
) -> Diagnostic {
    let (offset, message) = match error {
        ParseError::InvalidToken { location } => (location, "invalid token".to_owned()),
        ParseError::UnrecognizedEof { location, .. } => {
            (location.min(input_length), "unexpected end of predicate".to_owned())
        }
        ParseError::UnrecognizedToken {
            token: (start, token, _),
            ..
        } => (start, format!("syntax error at {token}")),
        ParseError::ExtraToken {
            token: (start, token, _),
        } => (start, format!("extra token {token}")),
        ParseError::User { error } => (0, error.to_string()),
    };
    let position = index.position(offset);
    Diagnostic {
        kind: DiagnosticKind::Syntax,
        message,
        line: position.line,
        column: position.column,
    }
}
