//! An embeddable engine for evaluating boolean predicates against
//! attribute-keyed documents.
//!
//! Predicates are short textual expressions in a small DSL. A typical
//! deployment is a publish/subscribe router: each subscription is a
//! predicate, and every incoming event document is matched against the
//! whole population to find its subscribers.
//!
//! # Examples
//!
//! Evaluating a single predicate, with an explanation of a failure:
//!
//! ```
//! use sift::{Document, Predicate};
//!
//! let predicate = Predicate::new("name is 'Jack' and friend_name is 'Jill'");
//! assert!(predicate.is_valid());
//!
//! let document = Document::new()
//!     .with("name", "Jack")
//!     .with("friend_name", "Jill");
//! assert!(predicate.evaluate(&document).unwrap());
//!
//! let stranger = Document::new()
//!     .with("name", "Jack")
//!     .with("friend_name", "John");
//! let (matched, ctx) = predicate.analyze(&stranger).unwrap();
//! assert!(!matched);
//! assert!(!ctx.failed().is_empty());
//! ```
//!
//! Matching one document against a predicate population:
//!
//! ```
//! use sift::{Document, OptimizedPredicateSet, Predicate};
//!
//! let mut set = OptimizedPredicateSet::new();
//! set.add(Predicate::new("exchange_id = 1 and private")).unwrap();
//! set.add(Predicate::new("exchange_id = 1 and not private")).unwrap();
//! set.add(Predicate::new("{'WARN' 'ERR'} contains level")).unwrap();
//! set.compile_ast();
//!
//! let event = Document::new()
//!     .with("exchange_id", 1i64)
//!     .with("private", false)
//!     .with("level", "ERR");
//! let matches = set.evaluate(&event);
//! assert_eq!(2, matches.len());
//! ```
//!
//! # The DSL
//!
//! * Logical operators: `and`, `or`, `not`, and bare boolean identifiers;
//! * Comparison: `<`, `<=`, `>`, `>=`, `=` (alias `==`), `!=`;
//! * Identity: `is` and `is not`, which treat `undefined` as a comparable
//!   value;
//! * Containment: `container contains probe` over sequences, sets, strings,
//!   and `{…}` literal sets;
//! * Matching: `identifier matches "regex"` or `identifier matches
//!   /regex/flags` with flags drawn from `i`, `m`, `s`, `u`, `l`;
//! * Constants: `true`, `false`, `null`, `empty`, `undefined`;
//! * `#` starts a comment that runs to the end of the line.
//!
//! Identifiers resolve against the document, with dotted paths walking
//! nested maps (`req.sdk.version`). A missing key resolves to `undefined`,
//! which makes every comparison but `is`/`is not` false rather than
//! raising.
//!
//! # Optimizations
//!
//! Valid predicates are rewritten once at construction: constants fold,
//! dead branches drop, `or`-chains of equalities over one identifier
//! compile into literal-set membership with a dense representation, and
//! contradictions like `x = 3 and x = 4` collapse to `false` without ever
//! consulting a document. [`OptimizedPredicateSet`] goes further and
//! factors subexpressions shared across predicates into a decision tree,
//! so a branch like `exchange_id = 1` is evaluated at most once per
//! document no matter how many predicates test it.

mod ast;
mod context;
mod error;
mod lexer;
mod literals;
mod optimizer;
mod parser;
mod predicate;
mod sets;
#[cfg(test)]
mod test_utils;
mod value;

pub use crate::{
    context::EvalContext,
    error::{Diagnostic, DiagnosticKind, PredicateError, SetError},
    optimizer::CostWeights,
    predicate::Predicate,
    sets::{CompileConfig, OptimizedPredicateSet, PredicateSet},
    value::{Document, Value},
};
pub use rust_decimal::Decimal;
