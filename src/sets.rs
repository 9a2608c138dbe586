use crate::ast::Expr;
use crate::context::{EvalContext, ResolverFn};
use crate::error::SetError;
use crate::optimizer::{self, CostWeights};
use crate::predicate::Predicate;
use crate::value::{Document, Value};
use slab::Slab;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// A naive predicate set: linear fan-out of `evaluate` across members.
///
/// Members are deduplicated by source text; adding an invalid predicate is
/// an error.
#[derive(Clone, Debug, Default)]
pub struct PredicateSet {
    members: Vec<Predicate>,
}

impl PredicateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_predicates(predicates: Vec<Predicate>) -> Result<Self, SetError> {
        let mut set = Self::new();
        set.update(predicates)?;
        Ok(set)
    }

    pub fn add(&mut self, predicate: Predicate) -> Result<(), SetError> {
        if !predicate.is_valid() {
            return Err(SetError::InvalidPredicate(predicate.source().to_owned()));
        }
        if !self
            .members
            .iter()
            .any(|member| member.source() == predicate.source())
        {
            self.members.push(predicate);
        }
        Ok(())
    }

    pub fn update(&mut self, predicates: Vec<Predicate>) -> Result<(), SetError> {
        for predicate in predicates {
            self.add(predicate)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Evaluates every member against the document and returns the matches
    /// in insertion order.
    pub fn evaluate(&self, document: &Document) -> Vec<&Predicate> {
        self.members
            .iter()
            .filter(|member| matches!(member.evaluate(document), Ok(true)))
            .collect()
    }
}

/// Tuning for the optimized-set compiler.
///
/// `min_count` is the occurrence count a shared subexpression needs before
/// it can become a branch, `max_depth` caps the decision tree, and
/// `min_benefit` is the estimated-savings floor below which branching is
/// not worth it.
///
/// The default branches on as little as two shared occurrences, which is
/// what small populations need. The named presets are sized for large
/// populations: each doubling of `max_depth` doubles `min_count` as well,
/// so the evidence required to branch grows with the worst-case 2^depth
/// blow-up of the tree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompileConfig {
    pub min_count: usize,
    pub max_depth: usize,
    pub min_benefit: f64,
    pub cost_weights: CostWeights,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            min_count: 2,
            max_depth: 4,
            min_benefit: 0.25,
            cost_weights: CostWeights::default(),
        }
    }
}

impl CompileConfig {
    /// Very fast compile, minimal pruning. Worst case blow up of 4 times.
    pub fn minimum() -> Self {
        Self {
            min_count: 8,
            max_depth: 2,
            min_benefit: 1.0,
            ..Self::default()
        }
    }

    /// Relatively fast compile with moderate pruning. Worst case blow up
    /// of 16 times.
    pub fn shallow() -> Self {
        Self {
            min_count: 16,
            max_depth: 4,
            min_benefit: 0.25,
            ..Self::default()
        }
    }

    /// Deeper trees that prune well at the price of compile time. Worst
    /// case blow up of 256 times.
    pub fn deep() -> Self {
        Self {
            min_count: 32,
            max_depth: 8,
            min_benefit: 0.1,
            ..Self::default()
        }
    }

    /// Extreme branching, reserved for very widely shared tests. Worst
    /// case blow up of 65536 times.
    pub fn extreme() -> Self {
        Self {
            min_count: 64,
            max_depth: 16,
            min_benefit: 0.05,
            ..Self::default()
        }
    }
}

type NodeId = usize;
type MemberId = usize;

#[derive(Clone, Debug)]
enum DecisionNode {
    Branch {
        expr: Expr,
        on_true: NodeId,
        on_false: NodeId,
    },
    Leaf {
        always: Vec<MemberId>,
        residuals: Vec<(MemberId, Expr)>,
    },
}

#[derive(Clone, Debug)]
struct DecisionTree {
    nodes: Slab<DecisionNode>,
    root: NodeId,
}

/// A predicate population compiled into a single decision tree.
///
/// Shared subexpressions are factored into branch nodes, and the descent
/// itself guarantees each branch is evaluated at most once per document;
/// every leaf carries the member predicates still live there, either as
/// unconditional matches or as residual trees specialised for the branch
/// outcomes along the path. A residual never contains a branch it was
/// partitioned on (the outcome was substituted in), so residuals evaluate
/// independently, sharing only the per-evaluation identifier cache with
/// the branches.
///
/// Identifier resolution during compiled evaluation uses the set's own
/// resolver (common-subexpression sharing is only sound under a single
/// resolution), not the members'.
#[derive(Clone)]
pub struct OptimizedPredicateSet {
    members: Vec<Predicate>,
    config: CompileConfig,
    resolver: Option<Arc<ResolverFn>>,
    tree: Option<DecisionTree>,
    finalized: bool,
}

impl Default for OptimizedPredicateSet {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizedPredicateSet {
    pub fn new() -> Self {
        Self::with_config(CompileConfig::default())
    }

    pub fn with_config(config: CompileConfig) -> Self {
        Self {
            members: Vec::new(),
            config,
            resolver: None,
            tree: None,
            finalized: false,
        }
    }

    pub fn from_predicates(predicates: Vec<Predicate>) -> Result<Self, SetError> {
        let mut set = Self::new();
        set.update(predicates)?;
        Ok(set)
    }

    pub fn add(&mut self, predicate: Predicate) -> Result<(), SetError> {
        if self.finalized {
            return Err(SetError::Finalized);
        }
        if !predicate.is_valid() {
            return Err(SetError::InvalidPredicate(predicate.source().to_owned()));
        }
        if !self
            .members
            .iter()
            .any(|member| member.source() == predicate.source())
        {
            self.members.push(predicate);
            self.tree = None;
        }
        Ok(())
    }

    pub fn update(&mut self, predicates: Vec<Predicate>) -> Result<(), SetError> {
        for predicate in predicates {
            self.add(predicate)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Installs the resolver used by compiled evaluation.
    pub fn set_resolver<F>(&mut self, resolver: F)
    where
        F: Fn(&str, &Document) -> Option<Value> + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
    }

    /// Builds the decision tree. Idempotent; mutating the membership
    /// invalidates the previous build.
    pub fn compile_ast(&mut self) {
        if self.tree.is_none() {
            self.tree = Some(self.build());
        }
    }

    /// Compiles if needed, then drops the member predicates' retained
    /// syntax trees and locks the set against further updates.
    pub fn finalize(&mut self) {
        self.compile_ast();
        for member in &mut self.members {
            member.prune_ast();
        }
        self.finalized = true;
    }

    /// Evaluates the set, returning every matching member in insertion
    /// order. Falls back to the linear fan-out when the tree has not been
    /// compiled yet.
    pub fn evaluate(&self, document: &Document) -> Vec<&Predicate> {
        match &self.tree {
            Some(tree) => {
                let mut ctx = EvalContext::new(document, self.resolver.clone(), false);
                let matched = self.walk(tree, &mut ctx);
                matched.into_iter().map(|id| &self.members[id]).collect()
            }
            None => self
                .members
                .iter()
                .filter(|member| {
                    member.optimized_ast().is_some_and(|tree| {
                        let mut ctx =
                            EvalContext::new(document, self.resolver.clone(), false);
                        tree.evaluate(&mut ctx)
                    })
                })
                .collect(),
        }
    }

    /// Evaluates with tracing: returns whether anything matched, the
    /// matches, and the evaluation context carrying the failure trail and
    /// observed literals.
    pub fn analyze<'doc>(
        &self,
        document: &'doc Document,
    ) -> Result<(bool, Vec<&Predicate>, EvalContext<'doc>), SetError> {
        let tree = self.tree.as_ref().ok_or(SetError::NotCompiled)?;
        let mut ctx = EvalContext::new(document, self.resolver.clone(), true);
        let matched = self.walk(tree, &mut ctx);
        let matches: Vec<&Predicate> =
            matched.into_iter().map(|id| &self.members[id]).collect();
        Ok((!matches.is_empty(), matches, ctx))
    }

    /// Indented rendering of the compiled decision tree.
    pub fn description(&self) -> Result<String, SetError> {
        let tree = self.tree.as_ref().ok_or(SetError::NotCompiled)?;
        let mut output = String::new();
        self.describe_node(tree, tree.root, 0, &mut output);
        Ok(output)
    }

    fn describe_node(&self, tree: &DecisionTree, node: NodeId, depth: usize, output: &mut String) {
        let pad = "    ".repeat(depth);
        match &tree.nodes[node] {
            DecisionNode::Branch {
                expr,
                on_true,
                on_false,
            } => {
                let _ = writeln!(output, "{pad}Branch: {expr}");
                let _ = writeln!(output, "{pad}true:");
                self.describe_node(tree, *on_true, depth + 1, output);
                let _ = writeln!(output, "{pad}false:");
                self.describe_node(tree, *on_false, depth + 1, output);
            }
            DecisionNode::Leaf { always, residuals } => {
                let _ = writeln!(output, "{pad}Leaf");
                for id in always {
                    let _ = writeln!(output, "{pad}    always: {}", self.members[*id].source());
                }
                for (id, expr) in residuals {
                    let _ = writeln!(
                        output,
                        "{pad}    residual: {expr} for {}",
                        self.members[*id].source()
                    );
                }
            }
        }
    }

    fn walk(&self, tree: &DecisionTree, ctx: &mut EvalContext) -> Vec<MemberId> {
        let mut matched = Vec::new();
        let mut node = tree.root;
        loop {
            match &tree.nodes[node] {
                DecisionNode::Branch {
                    expr,
                    on_true,
                    on_false,
                } => {
                    let result = expr.evaluate(ctx);
                    node = if result { *on_true } else { *on_false };
                }
                DecisionNode::Leaf { always, residuals } => {
                    matched.extend(always.iter().copied());
                    for (id, expr) in residuals {
                        if expr.evaluate(ctx) {
                            matched.push(*id);
                        }
                    }
                    break;
                }
            }
        }
        matched.sort_unstable();
        matched
    }

    fn build(&self) -> DecisionTree {
        let residuals: Vec<(MemberId, Expr)> = self
            .members
            .iter()
            .enumerate()
            .filter_map(|(id, member)| {
                member
                    .optimized_ast()
                    .map(|tree| (id, optimizer::strip_cached(tree.clone())))
            })
            .collect();
        let mut nodes = Slab::with_capacity(2 * residuals.len() + 1);
        let root = build_node(Vec::new(), residuals, 0, &mut nodes, &self.config);
        DecisionTree { nodes, root }
    }
}

impl std::fmt::Debug for OptimizedPredicateSet {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("OptimizedPredicateSet")
            .field("members", &self.members.len())
            .field("compiled", &self.tree.is_some())
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}

fn build_node(
    always: Vec<MemberId>,
    residuals: Vec<(MemberId, Expr)>,
    depth: usize,
    nodes: &mut Slab<DecisionNode>,
    config: &CompileConfig,
) -> NodeId {
    if depth < config.max_depth {
        if let Some((fingerprint, expr)) = select_branch(&residuals, config) {
            let mut true_always = always.clone();
            let mut false_always = always;
            let mut true_residuals = Vec::with_capacity(residuals.len());
            let mut false_residuals = Vec::with_capacity(residuals.len());

            for (id, residual) in residuals {
                if !optimizer::contains_test(&residual, &fingerprint) {
                    true_residuals.push((id, residual.clone()));
                    false_residuals.push((id, residual));
                    continue;
                }
                partition(
                    id,
                    residual.clone(),
                    &fingerprint,
                    true,
                    config,
                    &mut true_always,
                    &mut true_residuals,
                );
                partition(
                    id,
                    residual,
                    &fingerprint,
                    false,
                    config,
                    &mut false_always,
                    &mut false_residuals,
                );
            }

            let on_true = build_node(true_always, true_residuals, depth + 1, nodes, config);
            let on_false = build_node(false_always, false_residuals, depth + 1, nodes, config);
            return nodes.insert(DecisionNode::Branch {
                expr,
                on_true,
                on_false,
            });
        }
    }
    nodes.insert(DecisionNode::Leaf { always, residuals })
}

/// Specialises one predicate for an assumed branch outcome.
fn partition(
    id: MemberId,
    residual: Expr,
    fingerprint: &str,
    outcome: bool,
    config: &CompileConfig,
    always: &mut Vec<MemberId>,
    residuals: &mut Vec<(MemberId, Expr)>,
) {
    let specialised = optimizer::optimize_with(
        optimizer::substitute(residual, fingerprint, outcome),
        optimizer::MAX_PASSES,
        optimizer::MIN_CHANGE,
        &config.cost_weights,
    );
    match specialised.as_bool_constant() {
        Some(true) => always.push(id),
        Some(false) => {}
        None => residuals.push((id, specialised)),
    }
}

/// Picks the branch expression: among subtrees occurring at least
/// `min_count` times with an estimated benefit over `min_benefit`, the one
/// with the best occurrences-to-cost score wins; ties break on fingerprint
/// order so builds are reproducible.
fn select_branch(
    residuals: &[(MemberId, Expr)],
    config: &CompileConfig,
) -> Option<(String, Expr)> {
    let mut candidates: BTreeMap<String, (usize, &Expr)> = BTreeMap::new();
    for (_, residual) in residuals {
        let mut tests = Vec::new();
        optimizer::collect_tests(residual, &mut tests);
        for test in tests {
            let entry = candidates.entry(test.fingerprint()).or_insert((0, test));
            entry.0 += 1;
        }
    }

    let mut best: Option<(f64, String, &Expr)> = None;
    for (fingerprint, (count, expr)) in &candidates {
        if *count < config.min_count.max(2) {
            continue;
        }
        let balance = estimated_balance(expr);
        if (*count as f64 - 1.0) * balance < config.min_benefit {
            continue;
        }
        let cost = expr.cost(&config.cost_weights).max(1);
        let score = *count as f64 * balance / cost as f64;
        if best
            .as_ref()
            .map_or(true, |(best_score, _, _)| score > *best_score)
        {
            best = Some((score, fingerprint.clone(), *expr));
        }
    }

    best.map(|(_, fingerprint, expr)| (fingerprint, expr.clone()))
}

/// Static estimate of how evenly a test splits a document population.
/// Equality-shaped tests are assumed to be mostly false; everything else
/// defaults to an even split.
fn estimated_balance(expr: &Expr) -> f64 {
    use crate::ast::CompareOp;
    match expr.unwrapped() {
        Expr::Compare {
            op: CompareOp::Equal | CompareOp::Is,
            ..
        } => 0.25,
        Expr::Contains { left, .. } if matches!(left.unwrapped(), Expr::LiteralSet { .. }) => 0.25,
        _ => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn predicate(source: &str) -> Predicate {
        let predicate = Predicate::new(source);
        assert!(predicate.is_valid(), "{source} should be valid");
        predicate
    }

    fn is_sync_and_send<T: Send + Sync>() {}

    #[test]
    fn support_sync_and_send_traits() {
        is_sync_and_send::<Predicate>();
        is_sync_and_send::<PredicateSet>();
        is_sync_and_send::<OptimizedPredicateSet>();
    }

    fn sources(matches: &[&Predicate]) -> Vec<String> {
        matches
            .iter()
            .map(|predicate| predicate.source().to_owned())
            .collect()
    }

    #[test]
    fn a_simple_set_returns_the_matching_predicates() {
        let set = PredicateSet::from_predicates(vec![
            predicate("name is 'Jack'"),
            predicate("name is 'Jill'"),
        ])
        .unwrap();

        let matches = set.evaluate(&Document::new().with("name", "Jill"));

        assert_eq!(vec!["name is 'Jill'".to_owned()], sources(&matches));
    }

    #[test]
    fn duplicate_sources_are_stored_once() {
        let set = PredicateSet::from_predicates(vec![
            predicate("name is 'Jill'"),
            predicate("name is 'Jill'"),
        ])
        .unwrap();

        assert_eq!(1, set.len());
        let matches = set.evaluate(&Document::new().with("name", "Jill"));
        assert_eq!(1, matches.len());
    }

    #[test]
    fn an_invalid_predicate_is_rejected() {
        let mut set = PredicateSet::new();
        let result = set.add(Predicate::new("name is is"));
        assert!(matches!(result, Err(SetError::InvalidPredicate(_))));

        let mut optimized = OptimizedPredicateSet::new();
        let result = optimized.add(Predicate::new("name is is"));
        assert!(matches!(result, Err(SetError::InvalidPredicate(_))));
    }

    #[test]
    fn an_empty_set_matches_nothing() {
        let mut set = OptimizedPredicateSet::new();
        set.compile_ast();
        assert!(set.evaluate(&Document::new()).is_empty());
    }

    #[test]
    fn an_uncompiled_set_still_evaluates_linearly() {
        let set = OptimizedPredicateSet::from_predicates(vec![
            predicate("name is 'Jack'"),
            predicate("name is 'Jill'"),
        ])
        .unwrap();

        let matches = set.evaluate(&Document::new().with("name", "Jack"));

        assert_eq!(vec!["name is 'Jack'".to_owned()], sources(&matches));
    }

    #[test]
    fn analyze_requires_a_compiled_tree() {
        let set = OptimizedPredicateSet::from_predicates(vec![predicate("private")]).unwrap();
        assert!(matches!(
            set.analyze(&Document::new()),
            Err(SetError::NotCompiled)
        ));
    }

    fn population() -> Vec<Predicate> {
        [
            "exchange_id = 1 and private",
            "exchange_id = 1 and not private",
            "exchange_id = 2 or private",
            "country is 'CA' and exchange_id = 1",
            "country is 'US' or country is 'CA'",
            "errors contains 'cpu load' and exchange_id = 1",
            "{'WARN' 'ERR'} contains level and private",
            "load > 1.5 and exchange_id = 1",
            "server matches 'east-web-([0-9]+)' and not private",
        ]
        .into_iter()
        .map(predicate)
        .collect()
    }

    fn corpus() -> Vec<Document> {
        vec![
            Document::new()
                .with("exchange_id", 1i64)
                .with("private", true)
                .with("country", "CA")
                .with("level", "ERR")
                .with("errors", vec!["cpu load"])
                .with("load", rust_decimal::Decimal::new(20, 1))
                .with("server", "east-web-001"),
            Document::new()
                .with("exchange_id", 2i64)
                .with("private", false)
                .with("country", "US")
                .with("server", "west-db-001"),
            Document::new()
                .with("exchange_id", 1i64)
                .with("private", false)
                .with("errors", Vec::<&str>::new())
                .with("load", rust_decimal::Decimal::new(10, 1)),
            Document::new(),
            Document::new()
                .with("country", "CA")
                .with("level", "INFO")
                .with("private", true),
        ]
    }

    #[test]
    fn the_optimized_set_matches_exactly_what_the_simple_set_matches() {
        let simple = PredicateSet::from_predicates(population()).unwrap();
        let mut optimized = OptimizedPredicateSet::from_predicates(population()).unwrap();
        optimized.compile_ast();

        for document in corpus() {
            let expected = sources(&simple.evaluate(&document));
            let actual = sources(&optimized.evaluate(&document));
            assert_eq!(expected, actual, "diverged on {document:?}");
        }
    }

    #[test]
    fn every_config_preset_agrees_with_the_simple_set() {
        let simple = PredicateSet::from_predicates(population()).unwrap();
        for config in [
            CompileConfig::minimum(),
            CompileConfig::shallow(),
            CompileConfig::deep(),
            CompileConfig::extreme(),
        ] {
            let mut optimized = OptimizedPredicateSet::with_config(config);
            optimized.update(population()).unwrap();
            optimized.compile_ast();
            for document in corpus() {
                assert_eq!(
                    sources(&simple.evaluate(&document)),
                    sources(&optimized.evaluate(&document)),
                    "diverged with {config:?} on {document:?}"
                );
            }
        }
    }

    #[test]
    fn a_shared_conjunct_is_evaluated_at_most_once() {
        let mut set = OptimizedPredicateSet::from_predicates(vec![
            predicate("a and b"),
            predicate("a and c"),
        ])
        .unwrap();
        let resolutions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&resolutions);
        set.set_resolver(move |name, _| {
            if name == "a" {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            None
        });
        set.compile_ast();

        let document = Document::new()
            .with("a", true)
            .with("b", true)
            .with("c", false);
        let matches = set.evaluate(&document);

        assert_eq!(vec!["a and b".to_owned()], sources(&matches));
        assert_eq!(1, resolutions.load(Ordering::SeqCst));
    }

    #[test]
    fn a_false_branch_skips_the_dependent_predicates_entirely() {
        let mut set = OptimizedPredicateSet::from_predicates(vec![
            predicate("a and b"),
            predicate("a and c"),
        ])
        .unwrap();
        let other_resolutions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&other_resolutions);
        set.set_resolver(move |name, _| {
            if name == "b" || name == "c" {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            None
        });
        set.compile_ast();

        let document = Document::new().with("a", false);
        let matches = set.evaluate(&document);

        assert!(matches.is_empty());
        assert_eq!(0, other_resolutions.load(Ordering::SeqCst));
    }

    #[test]
    fn compilation_is_deterministic() {
        let mut first = OptimizedPredicateSet::from_predicates(population()).unwrap();
        let mut second = OptimizedPredicateSet::from_predicates(population()).unwrap();
        first.compile_ast();
        second.compile_ast();

        assert_eq!(first.description().unwrap(), second.description().unwrap());
    }

    #[test]
    fn the_description_shows_the_branch_structure() {
        let mut set = OptimizedPredicateSet::from_predicates(vec![
            predicate("a and b"),
            predicate("a and c"),
        ])
        .unwrap();
        set.compile_ast();

        let description = set.description().unwrap();

        assert!(description.starts_with("Branch: a\n"));
        assert!(description.contains("true:"));
        assert!(description.contains("false:"));
        assert!(description.contains("residual: b for a and b"));
    }

    #[test]
    fn a_collapsing_predicate_becomes_an_unconditional_match() {
        let mut set = OptimizedPredicateSet::from_predicates(vec![
            predicate("a"),
            predicate("a and b"),
        ])
        .unwrap();
        set.compile_ast();

        let document = Document::new().with("a", true).with("b", false);
        let matches = set.evaluate(&document);

        assert_eq!(vec!["a".to_owned()], sources(&matches));
    }

    #[test]
    fn min_count_suppresses_branching() {
        let mut set = OptimizedPredicateSet::with_config(CompileConfig {
            min_count: 3,
            ..CompileConfig::default()
        });
        set.update(vec![predicate("a and b"), predicate("a and c")])
            .unwrap();
        set.compile_ast();

        let description = set.description().unwrap();
        assert!(description.starts_with("Leaf"));
    }

    #[test]
    fn max_depth_caps_the_tree() {
        let mut set = OptimizedPredicateSet::with_config(CompileConfig {
            max_depth: 0,
            ..CompileConfig::default()
        });
        set.update(population()).unwrap();
        set.compile_ast();

        let description = set.description().unwrap();
        assert!(description.starts_with("Leaf"));

        let simple = PredicateSet::from_predicates(population()).unwrap();
        for document in corpus() {
            assert_eq!(
                sources(&simple.evaluate(&document)),
                sources(&set.evaluate(&document))
            );
        }
    }

    #[test]
    fn analyze_reports_matches_and_the_context() {
        let mut set = OptimizedPredicateSet::from_predicates(vec![
            predicate("name is 'Jack'"),
            predicate("name is 'Jill'"),
        ])
        .unwrap();
        set.compile_ast();

        let document = Document::new().with("name", "Jack");
        let (any, matches, ctx) = set.analyze(&document).unwrap();

        assert!(any);
        assert_eq!(vec!["name is 'Jack'".to_owned()], sources(&matches));
        assert_eq!(Some(&Value::from("Jack")), ctx.literals().get("name"));
    }

    #[test]
    fn adding_a_predicate_invalidates_the_compiled_tree() {
        let mut set =
            OptimizedPredicateSet::from_predicates(vec![predicate("name is 'Jack'")]).unwrap();
        set.compile_ast();
        set.add(predicate("name is 'Jill'")).unwrap();

        // The new member must be matchable even before a recompile.
        let matches = set.evaluate(&Document::new().with("name", "Jill"));
        assert_eq!(vec!["name is 'Jill'".to_owned()], sources(&matches));

        set.compile_ast();
        let matches = set.evaluate(&Document::new().with("name", "Jill"));
        assert_eq!(vec!["name is 'Jill'".to_owned()], sources(&matches));
    }

    #[test]
    fn a_finalized_set_still_evaluates_but_rejects_updates() {
        let mut set = OptimizedPredicateSet::from_predicates(population()).unwrap();
        set.finalize();

        let simple = PredicateSet::from_predicates(population()).unwrap();
        for document in corpus() {
            assert_eq!(
                sources(&simple.evaluate(&document)),
                sources(&set.evaluate(&document))
            );
        }

        assert_eq!(Err(SetError::Finalized), set.add(predicate("private")));
    }

    #[test]
    fn the_set_resolver_feeds_compiled_evaluation() {
        let mut set =
            OptimizedPredicateSet::from_predicates(vec![predicate("region is 'east'")]).unwrap();
        set.set_resolver(|name, _| (name == "region").then(|| Value::from("east")));
        set.compile_ast();

        let matches = set.evaluate(&Document::new());
        assert_eq!(1, matches.len());
    }
}
