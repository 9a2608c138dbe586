use crate::ast::Expr;
use crate::context::{EvalContext, ResolverFn};
use crate::error::{Diagnostic, PredicateError};
use crate::optimizer;
use crate::parser;
use crate::value::{Document, Value};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// A boolean expression in the DSL plus its parsed tree.
///
/// Construction never fails: an unparseable or ill-typed source yields an
/// invalid predicate whose [`Predicate::errors`] lists every diagnostic.
/// Valid predicates are optimized once, up front; [`Predicate::evaluate`]
/// runs the optimized tree while [`Predicate::analyze`] walks the original
/// so its explanations line up with the source text.
///
/// A predicate is logically immutable after construction and can be shared
/// across threads for concurrent evaluation; every evaluation owns its own
/// [`EvalContext`].
#[derive(Clone)]
pub struct Predicate {
    source: String,
    diagnostics: Vec<Diagnostic>,
    valid: bool,
    ast: Option<Expr>,
    optimized: Option<Expr>,
    resolver: Option<Arc<ResolverFn>>,
}

impl Predicate {
    /// Parses and validates the source. The returned predicate may be
    /// invalid; check [`Predicate::is_valid`] before evaluating.
    pub fn new(source: &str) -> Self {
        let mut diagnostics = Vec::new();
        let parsed = parser::parse(source, &mut diagnostics);

        let mut ast = None;
        let mut optimized = None;
        if let Some(mut tree) = parsed {
            diagnostics.extend(tree.validate());
            if diagnostics.is_empty() {
                optimized = Some(optimizer::cache_expressions(optimizer::optimize(
                    tree.clone(),
                )));
                ast = Some(tree);
            }
        }

        Self {
            source: source.to_owned(),
            valid: ast.is_some(),
            diagnostics,
            ast,
            optimized,
            resolver: None,
        }
    }

    /// The original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Every diagnostic collected while parsing and validating.
    pub fn errors(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Installs a custom identifier resolver consulted before the default
    /// document lookup. Returning `None` falls through to the document; a
    /// final miss resolves to undefined.
    pub fn set_resolver<F>(&mut self, resolver: F)
    where
        F: Fn(&str, &Document) -> Option<Value> + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
    }

    /// Indented multi-line rendering of the syntax tree.
    pub fn description(&self) -> Result<String, PredicateError> {
        Ok(self.tree()?.describe())
    }

    /// Evaluates the predicate against the document.
    pub fn evaluate(&self, document: &Document) -> Result<bool, PredicateError> {
        let tree = match &self.optimized {
            Some(tree) => tree,
            None => self.tree()?,
        };
        let mut ctx = EvalContext::new(document, self.resolver.clone(), false);
        Ok(tree.evaluate(&mut ctx))
    }

    /// Evaluates while recording why: the returned context exposes the
    /// ordered failure trail and the values observed for each identifier.
    /// Slower than [`Predicate::evaluate`].
    pub fn analyze<'doc>(
        &self,
        document: &'doc Document,
    ) -> Result<(bool, EvalContext<'doc>), PredicateError> {
        let tree = self.tree()?;
        let mut ctx = EvalContext::new(document, self.resolver.clone(), true);
        let result = tree.evaluate(&mut ctx);
        Ok((result, ctx))
    }

    fn tree(&self) -> Result<&Expr, PredicateError> {
        match &self.ast {
            Some(tree) => Ok(tree),
            None if self.valid => Err(PredicateError::Pruned),
            None => Err(PredicateError::Invalid),
        }
    }

    pub(crate) fn optimized_ast(&self) -> Option<&Expr> {
        self.optimized.as_ref()
    }

    /// Drops both trees, keeping only the source, validity, and
    /// diagnostics. Used by finalized sets to shed memory they no longer
    /// need; a pruned predicate can no longer evaluate on its own.
    pub(crate) fn prune_ast(&mut self) {
        self.ast = None;
        self.optimized = None;
    }
}

impl Debug for Predicate {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Predicate")
            .field("source", &self.source)
            .field("valid", &self.valid)
            .finish_non_exhaustive()
    }
}
