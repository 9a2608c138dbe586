use crate::value::{Document, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Injected identifier-resolution capability.
///
/// Returning `None` means the callback could not resolve the name; the
/// default document walk then runs, and a final miss yields
/// [`Value::Undefined`]. Callbacks signal their own failures the same way.
pub type ResolverFn = dyn Fn(&str, &Document) -> Option<Value> + Send + Sync;

/// Per-evaluation scratch space.
///
/// Holds the identifier cache, the ordered failure trail, the observed
/// literal values surfaced by `analyze`, and the result slots for cached
/// subexpressions. A context lives for exactly one evaluation, which is
/// what makes concurrent evaluations of a shared predicate safe.
pub struct EvalContext<'doc> {
    document: &'doc Document,
    resolver: Option<Arc<ResolverFn>>,
    identifiers: HashMap<String, Value>,
    failures: Vec<String>,
    literals: HashMap<String, Value>,
    results: HashMap<usize, bool>,
    tracing: bool,
}

impl<'doc> EvalContext<'doc> {
    pub(crate) fn new(
        document: &'doc Document,
        resolver: Option<Arc<ResolverFn>>,
        tracing: bool,
    ) -> Self {
        Self {
            document,
            resolver,
            identifiers: HashMap::new(),
            failures: Vec::new(),
            literals: HashMap::new(),
            results: HashMap::new(),
            tracing,
        }
    }

    /// The ordered failure trail; empty exactly when the evaluation
    /// returned true.
    pub fn failed(&self) -> &[String] {
        &self.failures
    }

    /// Values observed for each resolved identifier, keyed by its textual
    /// form.
    pub fn literals(&self) -> &HashMap<String, Value> {
        &self.literals
    }

    /// Resolves an identifier, consulting in order: the per-evaluation
    /// cache, the recognised bare constants, the configured resolver
    /// callback, and finally the document (exact key, then dotted walk).
    ///
    /// The first resolution of a name is cached so that every occurrence
    /// within one evaluation sees the same value, keeping `analyze`
    /// explanations consistent even under non-deterministic resolvers.
    pub(crate) fn resolve(&mut self, name: &str) -> Value {
        if let Some(value) = self.identifiers.get(name) {
            return value.clone();
        }

        let value = self.resolve_fresh(name);
        self.identifiers.insert(name.to_owned(), value.clone());
        if self.tracing {
            self.literals.insert(name.to_owned(), value.clone());
        }
        value
    }

    fn resolve_fresh(&self, name: &str) -> Value {
        match name {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            "null" => return Value::Null,
            "empty" => return Value::Empty,
            "undefined" => return Value::Undefined,
            _ => {}
        }

        if let Some(resolver) = &self.resolver {
            if let Some(value) = resolver(name, self.document) {
                return value;
            }
        }

        self.document.lookup(name).unwrap_or(Value::Undefined)
    }

    #[inline]
    pub(crate) fn trail_checkpoint(&self) -> usize {
        self.failures.len()
    }

    #[inline]
    pub(crate) fn truncate_trail(&mut self, checkpoint: usize) {
        self.failures.truncate(checkpoint);
    }

    /// Records a failure reason; the message is only rendered when the
    /// evaluation traces.
    #[inline]
    pub(crate) fn push_failure<F: FnOnce() -> String>(&mut self, reason: F) {
        if self.tracing {
            self.failures.push(reason());
        }
    }

    /// A previously stored subexpression result. Tracing evaluations skip
    /// the cache so the failure trail explains every subtree it reports.
    #[inline]
    pub(crate) fn stored_result(&self, slot: usize) -> Option<bool> {
        if self.tracing {
            return None;
        }
        self.results.get(&slot).copied()
    }

    #[inline]
    pub(crate) fn store_result(&mut self, slot: usize, result: bool) {
        self.results.insert(slot, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resolve_prefers_the_document() {
        let document = Document::new().with("name", "Jack");
        let mut context = EvalContext::new(&document, None, false);

        assert_eq!(Value::from("Jack"), context.resolve("name"));
    }

    #[test]
    fn resolve_falls_back_to_undefined() {
        let document = Document::new();
        let mut context = EvalContext::new(&document, None, false);

        assert_eq!(Value::Undefined, context.resolve("missing"));
    }

    #[test]
    fn resolve_recognises_bare_constants() {
        let document = Document::new();
        let mut context = EvalContext::new(&document, None, false);

        assert_eq!(Value::Bool(true), context.resolve("true"));
        assert_eq!(Value::Null, context.resolve("null"));
        assert_eq!(Value::Undefined, context.resolve("undefined"));
    }

    #[test]
    fn a_resolver_callback_takes_precedence_over_the_document() {
        let document = Document::new().with("name", "Jack");
        let resolver: Arc<ResolverFn> = Arc::new(|name, _| {
            (name == "name").then(|| Value::from("Jill"))
        });
        let mut context = EvalContext::new(&document, Some(resolver), false);

        assert_eq!(Value::from("Jill"), context.resolve("name"));
    }

    #[test]
    fn a_declining_resolver_falls_through_to_the_document() {
        let document = Document::new().with("name", "Jack");
        let resolver: Arc<ResolverFn> = Arc::new(|_, _| None);
        let mut context = EvalContext::new(&document, Some(resolver), false);

        assert_eq!(Value::from("Jack"), context.resolve("name"));
    }

    #[test]
    fn the_first_resolution_wins_within_one_evaluation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let resolver: Arc<ResolverFn> = Arc::new(move |_, _| {
            let call = counter.fetch_add(1, Ordering::SeqCst);
            Some(Value::from(call as i64))
        });
        let document = Document::new();
        let mut context = EvalContext::new(&document, Some(resolver), false);

        assert_eq!(Value::from(0i64), context.resolve("load"));
        assert_eq!(Value::from(0i64), context.resolve("load"));
        assert_eq!(1, calls.load(Ordering::SeqCst));
    }

    #[test]
    fn tracing_captures_resolved_literals() {
        let document = Document::new().with("name", "Jack");
        let mut context = EvalContext::new(&document, None, true);

        context.resolve("name");
        context.resolve("missing");

        assert_eq!(Some(&Value::from("Jack")), context.literals().get("name"));
        assert_eq!(Some(&Value::Undefined), context.literals().get("missing"));
    }

    #[test]
    fn failures_are_only_recorded_while_tracing() {
        let document = Document::new();
        let mut silent = EvalContext::new(&document, None, false);
        silent.push_failure(|| "reason".to_owned());
        assert!(silent.failed().is_empty());

        let mut tracing = EvalContext::new(&document, None, true);
        tracing.push_failure(|| "reason".to_owned());
        assert_eq!(&["reason".to_owned()], tracing.failed());
    }

    #[test]
    fn the_trail_can_be_truncated_to_a_checkpoint() {
        let document = Document::new();
        let mut context = EvalContext::new(&document, None, true);

        let checkpoint = context.trail_checkpoint();
        context.push_failure(|| "discarded".to_owned());
        context.truncate_trail(checkpoint);

        assert!(context.failed().is_empty());
    }

    #[test]
    fn stored_results_are_reused_outside_of_tracing() {
        let document = Document::new();
        let mut context = EvalContext::new(&document, None, false);

        assert_eq!(None, context.stored_result(0));
        context.store_result(0, true);
        assert_eq!(Some(true), context.stored_result(0));
    }

    #[test]
    fn stored_results_are_ignored_while_tracing() {
        let document = Document::new();
        let mut context = EvalContext::new(&document, None, true);

        context.store_result(0, true);
        assert_eq!(None, context.stored_result(0));
    }
}
