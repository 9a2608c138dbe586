use crate::ast::{CompareOp, ConstantValue, Expr, Position};
use crate::context::EvalContext;
use crate::literals::LiteralSet;
use crate::value::{Document, Value};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Static cost scores used for selectivity ordering and branch selection.
///
/// The defaults order the operation kinds as: constant < literal-set
/// membership < comparison on an identifier < regex match.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostWeights {
    pub constant: u64,
    pub identifier: u64,
    pub literal_set: u64,
    pub comparison: u64,
    pub regex_match: u64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            constant: 0,
            identifier: 1,
            literal_set: 2,
            comparison: 3,
            regex_match: 8,
        }
    }
}

pub(crate) const MAX_PASSES: usize = 32;
pub(crate) const MIN_CHANGE: usize = 1;

/// Rewrites a validated tree into an equivalent but faster one.
pub(crate) fn optimize(expr: Expr) -> Expr {
    optimize_with(expr, MAX_PASSES, MIN_CHANGE, &CostWeights::default())
}

/// The pass loop converges once a pass produces fewer than `min_change`
/// rewrites, or gives up after `max_pass` passes.
pub(crate) fn optimize_with(
    expr: Expr,
    max_pass: usize,
    min_change: usize,
    weights: &CostWeights,
) -> Expr {
    let mut expr = canonicalize(expr);
    let mut passes = 0;
    let mut changes = min_change;
    while passes < max_pass && changes >= min_change {
        let (count, rewritten) = optimization_pass(expr, weights);
        changes = count;
        expr = rewritten;
        passes += 1;
    }
    expr
}

/// A single bottom-up rewrite pass. Returns the number of rewrites applied;
/// the count converges to zero with enough passes.
pub(crate) fn optimization_pass(expr: Expr, weights: &CostWeights) -> (usize, Expr) {
    let mut changes = 0;
    let expr = rewrite(expr, weights, &mut changes);
    (changes, expr)
}

/// Puts comparisons into canonical operand order: the identifier on the
/// left of a ground value, and two identifiers ordered by name. This makes
/// fingerprints order-independent, so `3 > x` and `x < 3` share one form.
fn canonicalize(expr: Expr) -> Expr {
    match expr {
        Expr::Compare {
            op,
            left,
            right,
            position,
        } => {
            let left = canonicalize(*left);
            let right = canonicalize(*right);
            let swap = match (&left, &right) {
                (l, Expr::Identifier { .. }) if l.is_ground() => true,
                (Expr::Identifier { name: l, .. }, Expr::Identifier { name: r, .. }) => l > r,
                _ => false,
            };
            if swap {
                Expr::compare(op.reversed(), right, left, position)
            } else {
                Expr::compare(op, left, right, position)
            }
        }
        Expr::Not { child, position } => Expr::not(canonicalize(*child), position),
        Expr::And {
            left,
            right,
            position,
        } => Expr::and(canonicalize(*left), canonicalize(*right), position),
        Expr::Or {
            left,
            right,
            position,
        } => Expr::or(canonicalize(*left), canonicalize(*right), position),
        Expr::Contains {
            left,
            right,
            position,
        } => Expr::contains(canonicalize(*left), canonicalize(*right), position),
        Expr::Match {
            left,
            regex,
            position,
        } => Expr::Match {
            left: Box::new(canonicalize(*left)),
            regex,
            position,
        },
        Expr::Cached { id, child } => Expr::cached(id, canonicalize(*child)),
        leaf => leaf,
    }
}

fn rewrite(expr: Expr, weights: &CostWeights, changes: &mut usize) -> Expr {
    let expr = match expr {
        Expr::Not { child, position } => Expr::not(rewrite(*child, weights, changes), position),
        Expr::And {
            left,
            right,
            position,
        } => Expr::and(
            rewrite(*left, weights, changes),
            rewrite(*right, weights, changes),
            position,
        ),
        Expr::Or {
            left,
            right,
            position,
        } => Expr::or(
            rewrite(*left, weights, changes),
            rewrite(*right, weights, changes),
            position,
        ),
        Expr::Compare {
            op,
            left,
            right,
            position,
        } => Expr::compare(
            op,
            rewrite(*left, weights, changes),
            rewrite(*right, weights, changes),
            position,
        ),
        Expr::Contains {
            left,
            right,
            position,
        } => Expr::contains(
            rewrite(*left, weights, changes),
            rewrite(*right, weights, changes),
            position,
        ),
        Expr::Cached { id, child } => Expr::cached(id, rewrite(*child, weights, changes)),
        other => other,
    };
    apply_local(expr, weights, changes)
}

fn apply_local(expr: Expr, weights: &CostWeights, changes: &mut usize) -> Expr {
    match expr {
        Expr::Not { child, position } => match child.as_bool_constant() {
            Some(value) => {
                *changes += 1;
                bool_constant(!value, position)
            }
            None => {
                if let Expr::Not { child: inner, .. } = *child {
                    *changes += 1;
                    *inner
                } else {
                    Expr::Not { child, position }
                }
            }
        },
        Expr::And {
            left,
            right,
            position,
        } => {
            match (left.as_bool_constant(), right.as_bool_constant()) {
                (Some(false), _) | (_, Some(false)) => {
                    *changes += 1;
                    return bool_constant(false, position);
                }
                (Some(true), _) => {
                    *changes += 1;
                    return *right;
                }
                (_, Some(true)) => {
                    *changes += 1;
                    return *left;
                }
                _ => {}
            }
            reduce_and_chain(
                Expr::And {
                    left,
                    right,
                    position,
                },
                weights,
                changes,
            )
        }
        Expr::Or {
            left,
            right,
            position,
        } => {
            match (left.as_bool_constant(), right.as_bool_constant()) {
                (Some(true), _) | (_, Some(true)) => {
                    *changes += 1;
                    return bool_constant(true, position);
                }
                (Some(false), _) => {
                    *changes += 1;
                    return *right;
                }
                (_, Some(false)) => {
                    *changes += 1;
                    return *left;
                }
                _ => {}
            }
            reduce_or_chain(
                Expr::Or {
                    left,
                    right,
                    position,
                },
                weights,
                changes,
            )
        }
        Expr::LiteralSet {
            members,
            compiled,
            position,
        } => {
            if members.is_empty() {
                *changes += 1;
                Expr::constant(ConstantValue::Empty, position)
            } else {
                Expr::LiteralSet {
                    members,
                    compiled,
                    position,
                }
            }
        }
        Expr::Contains {
            left,
            right,
            position,
        } => {
            if matches!(
                left.unwrapped(),
                Expr::Constant {
                    value: ConstantValue::Empty | ConstantValue::Undefined,
                    ..
                }
            ) {
                *changes += 1;
                return bool_constant(false, position);
            }
            fold_if_ground(
                Expr::Contains {
                    left,
                    right,
                    position,
                },
                changes,
            )
        }
        expr @ (Expr::Compare { .. } | Expr::Match { .. }) => fold_if_ground(expr, changes),
        other => other,
    }
}

fn bool_constant(value: bool, position: Position) -> Expr {
    let value = if value {
        ConstantValue::True
    } else {
        ConstantValue::False
    };
    Expr::constant(value, position)
}

/// Evaluates a document-independent test at compile time.
fn fold_if_ground(expr: Expr, changes: &mut usize) -> Expr {
    if !expr.is_ground() {
        return expr;
    }
    let document = Document::new();
    let mut ctx = EvalContext::new(&document, None, false);
    let result = expr.evaluate(&mut ctx);
    *changes += 1;
    bool_constant(result, expr.position())
}

/// One comparison of an identifier against a ground value.
struct IdentifierTest {
    name: String,
    op: CompareOp,
    value: Value,
}

fn as_identifier_test(expr: &Expr) -> Option<IdentifierTest> {
    let Expr::Compare {
        op, left, right, ..
    } = expr.unwrapped()
    else {
        return None;
    };
    let Expr::Identifier { name, .. } = left.unwrapped() else {
        return None;
    };
    let value = match right.unwrapped() {
        Expr::StringLit { value, .. } => Value::String(value.clone()),
        Expr::NumberLit { value, .. } => Value::Number(*value),
        _ => return None,
    };
    let op = match op {
        // `is` against a ground value behaves exactly like `=`.
        CompareOp::Is => CompareOp::Equal,
        CompareOp::IsNot => return None,
        other => *other,
    };
    Some(IdentifierTest {
        name: name.clone(),
        op,
        value,
    })
}

/// Inclusive-or-exclusive numeric bound.
#[derive(Clone, Copy)]
struct Bound {
    value: Decimal,
    inclusive: bool,
}

#[derive(Default)]
struct Constraints {
    eq: Option<(usize, Value)>,
    ne: Vec<Value>,
    lower: Option<(usize, Bound)>,
    upper: Option<(usize, Bound)>,
    impossible: bool,
}

impl Constraints {
    fn below_lower(&self, value: &Decimal) -> bool {
        self.lower.map_or(false, |(_, bound)| {
            *value < bound.value || (*value == bound.value && !bound.inclusive)
        })
    }

    fn above_upper(&self, value: &Decimal) -> bool {
        self.upper.map_or(false, |(_, bound)| {
            *value > bound.value || (*value == bound.value && !bound.inclusive)
        })
    }

    fn excludes_number(&self, value: &Decimal) -> bool {
        self.below_lower(value) || self.above_upper(value)
    }
}

/// Simplifies a conjunction of comparisons over single identifiers:
/// contradictions collapse the whole chain to `false`, implied members are
/// dropped, and the surviving members are ordered cheapest-first.
fn reduce_and_chain(expr: Expr, weights: &CostWeights, changes: &mut usize) -> Expr {
    let position = expr.position();
    let before = expr.fingerprint();
    let mut members = Vec::new();
    flatten(expr, &mut members, true);

    let mut constraints: HashMap<String, Constraints> = HashMap::new();
    let mut keep = vec![true; members.len()];

    for (index, member) in members.iter().enumerate() {
        let Some(test) = as_identifier_test(member) else {
            continue;
        };
        let entry = constraints.entry(test.name.clone()).or_default();
        match test.op {
            CompareOp::Equal => match &entry.eq {
                Some((_, known)) => {
                    if *known == test.value {
                        keep[index] = false;
                    } else {
                        entry.impossible = true;
                    }
                }
                None => {
                    if entry.ne.contains(&test.value) {
                        entry.impossible = true;
                    } else if matches!(&test.value, Value::Number(n) if entry.excludes_number(n))
                    {
                        entry.impossible = true;
                    } else {
                        entry.eq = Some((index, test.value));
                    }
                }
            },
            CompareOp::NotEqual => {
                if let Some((_, known)) = &entry.eq {
                    if *known == test.value {
                        entry.impossible = true;
                    } else {
                        keep[index] = false;
                    }
                } else if entry.ne.contains(&test.value) {
                    keep[index] = false;
                } else if matches!(&test.value, Value::Number(n) if entry.excludes_number(n)) {
                    keep[index] = false;
                } else {
                    entry.ne.push(test.value);
                }
            }
            op if op.is_ordering() => {
                let Value::Number(number) = &test.value else {
                    // Non-numeric ordering shapes are left alone.
                    continue;
                };
                if let Some((_, known)) = &entry.eq {
                    let holds = match known.loose_cmp(&test.value) {
                        Some(ordering) => match op {
                            CompareOp::LessThan => ordering.is_lt(),
                            CompareOp::LessThanEqual => ordering.is_le(),
                            CompareOp::GreaterThan => ordering.is_gt(),
                            CompareOp::GreaterThanEqual => ordering.is_ge(),
                            _ => unreachable!("non-ordering op in ordering arm; this is a bug"),
                        },
                        None => false,
                    };
                    if holds {
                        keep[index] = false;
                    } else {
                        entry.impossible = true;
                    }
                    continue;
                }
                let bound = Bound {
                    value: *number,
                    inclusive: matches!(
                        op,
                        CompareOp::LessThanEqual | CompareOp::GreaterThanEqual
                    ),
                };
                let is_upper = matches!(op, CompareOp::LessThan | CompareOp::LessThanEqual);
                let slot = if is_upper {
                    &mut entry.upper
                } else {
                    &mut entry.lower
                };
                match slot {
                    Some((existing_index, existing)) => {
                        let tighter = if is_upper {
                            bound.value < existing.value
                                || (bound.value == existing.value
                                    && !bound.inclusive
                                    && existing.inclusive)
                        } else {
                            bound.value > existing.value
                                || (bound.value == existing.value
                                    && !bound.inclusive
                                    && existing.inclusive)
                        };
                        if tighter {
                            keep[*existing_index] = false;
                            *slot = Some((index, bound));
                        } else {
                            keep[index] = false;
                        }
                    }
                    None => *slot = Some((index, bound)),
                }
            }
            _ => {}
        }
    }

    for entry in constraints.values() {
        let mut impossible = entry.impossible;
        if let (Some((_, lower)), Some((_, upper))) = (entry.lower, entry.upper) {
            if lower.value > upper.value
                || (lower.value == upper.value && !(lower.inclusive && upper.inclusive))
            {
                impossible = true;
            }
        }
        if let Some((_, Value::Number(number))) = &entry.eq {
            if entry.excludes_number(number) {
                impossible = true;
            }
        }
        if impossible {
            *changes += 1;
            return bool_constant(false, position);
        }
    }

    let mut survivors: Vec<Expr> = members
        .into_iter()
        .zip(keep)
        .filter_map(|(member, kept)| kept.then_some(member))
        .collect();
    survivors.sort_by_key(|member| member.cost(weights));

    let rebuilt = rebuild_chain(survivors, position, true);
    if rebuilt.fingerprint() != before {
        *changes += 1;
    }
    rebuilt
}

/// Collapses `x = a or x = b or …` chains into literal-set membership and
/// orders the surviving members cheapest-first.
fn reduce_or_chain(expr: Expr, weights: &CostWeights, changes: &mut usize) -> Expr {
    let position = expr.position();
    let before = expr.fingerprint();
    let mut members = Vec::new();
    flatten(expr, &mut members, false);

    // Group equality tests by identifier, in first-appearance order.
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    for (index, member) in members.iter().enumerate() {
        let Some(test) = as_identifier_test(member) else {
            continue;
        };
        if test.op != CompareOp::Equal {
            continue;
        }
        match groups.iter_mut().find(|(name, _)| *name == test.name) {
            Some((_, indexes)) => indexes.push(index),
            None => groups.push((test.name, vec![index])),
        }
    }

    let mut replacements: HashMap<usize, Expr> = HashMap::new();
    let mut dropped: Vec<bool> = vec![false; members.len()];
    for (name, indexes) in groups {
        if indexes.len() < 2 {
            continue;
        }
        let mut values = Vec::with_capacity(indexes.len());
        let mut member_exprs = Vec::with_capacity(indexes.len());
        for index in &indexes {
            let Some(test) = as_identifier_test(&members[*index]) else {
                unreachable!("a grouped member stopped being an identifier test; this is a bug");
            };
            member_exprs.push(match &test.value {
                Value::String(value) => Expr::string(value.clone(), position),
                Value::Number(value) => Expr::number(*value, position),
                _ => unreachable!("identifier tests carry strings or numbers; this is a bug"),
            });
            values.push(test.value);
        }
        let set_position = members[indexes[0]].position();
        let set = Expr::LiteralSet {
            members: member_exprs,
            compiled: Some(LiteralSet::new(values)),
            position: set_position,
        };
        replacements.insert(
            indexes[0],
            Expr::contains(set, Expr::identifier(name, set_position), set_position),
        );
        for index in &indexes[1..] {
            dropped[*index] = true;
        }
    }

    let mut survivors: Vec<Expr> = Vec::with_capacity(members.len());
    for (index, member) in members.into_iter().enumerate() {
        if dropped[index] {
            continue;
        }
        match replacements.remove(&index) {
            Some(replacement) => survivors.push(replacement),
            None => survivors.push(member),
        }
    }
    survivors.sort_by_key(|member| member.cost(weights));

    let rebuilt = rebuild_chain(survivors, position, false);
    if rebuilt.fingerprint() != before {
        *changes += 1;
    }
    rebuilt
}

fn flatten(expr: Expr, members: &mut Vec<Expr>, conjunction: bool) {
    match expr {
        Expr::And { left, right, .. } if conjunction => {
            flatten(*left, members, conjunction);
            flatten(*right, members, conjunction);
        }
        Expr::Or { left, right, .. } if !conjunction => {
            flatten(*left, members, conjunction);
            flatten(*right, members, conjunction);
        }
        other => members.push(other),
    }
}

fn rebuild_chain(mut members: Vec<Expr>, position: Position, conjunction: bool) -> Expr {
    let first = members.remove(0);
    members.into_iter().fold(first, |chain, member| {
        if conjunction {
            Expr::and(chain, member, position)
        } else {
            Expr::or(chain, member, position)
        }
    })
}

/// Wraps repeated operator subtrees in `Cached` nodes so a second
/// occurrence reuses the first result. Slot ids are assigned per unique
/// fingerprint in a deterministic traversal order.
pub(crate) fn cache_expressions(expr: Expr) -> Expr {
    let mut counts: HashMap<String, usize> = HashMap::new();
    count_operators(&expr, &mut counts);
    let mut slots: HashMap<String, usize> = HashMap::new();
    wrap_repeated(expr, &counts, &mut slots)
}

fn is_operator(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::And { .. }
            | Expr::Or { .. }
            | Expr::Not { .. }
            | Expr::Compare { .. }
            | Expr::Contains { .. }
            | Expr::Match { .. }
    )
}

fn count_operators(expr: &Expr, counts: &mut HashMap<String, usize>) {
    if is_operator(expr) {
        *counts.entry(expr.fingerprint()).or_insert(0) += 1;
    }
    match expr {
        Expr::Not { child, .. } | Expr::Cached { child, .. } => count_operators(child, counts),
        Expr::And { left, right, .. }
        | Expr::Or { left, right, .. }
        | Expr::Compare { left, right, .. }
        | Expr::Contains { left, right, .. } => {
            count_operators(left, counts);
            count_operators(right, counts);
        }
        Expr::Match { left, .. } => count_operators(left, counts),
        _ => {}
    }
}

fn wrap_repeated(
    expr: Expr,
    counts: &HashMap<String, usize>,
    slots: &mut HashMap<String, usize>,
) -> Expr {
    let repeated = is_operator(&expr) && counts.get(&expr.fingerprint()).copied().unwrap_or(0) > 1;
    let slot = repeated.then(|| {
        let fingerprint = expr.fingerprint();
        let next = slots.len();
        *slots.entry(fingerprint).or_insert(next)
    });

    let rebuilt = match expr {
        Expr::Not { child, position } => {
            Expr::not(wrap_repeated(*child, counts, slots), position)
        }
        Expr::And {
            left,
            right,
            position,
        } => Expr::and(
            wrap_repeated(*left, counts, slots),
            wrap_repeated(*right, counts, slots),
            position,
        ),
        Expr::Or {
            left,
            right,
            position,
        } => Expr::or(
            wrap_repeated(*left, counts, slots),
            wrap_repeated(*right, counts, slots),
            position,
        ),
        Expr::Compare {
            op,
            left,
            right,
            position,
        } => Expr::compare(
            op,
            wrap_repeated(*left, counts, slots),
            wrap_repeated(*right, counts, slots),
            position,
        ),
        Expr::Contains {
            left,
            right,
            position,
        } => Expr::contains(
            wrap_repeated(*left, counts, slots),
            wrap_repeated(*right, counts, slots),
            position,
        ),
        Expr::Cached { id, child } => Expr::cached(id, wrap_repeated(*child, counts, slots)),
        other => other,
    };

    match slot {
        Some(id) => Expr::cached(id, rebuilt),
        None => rebuilt,
    }
}

/// Removes every `Cached` wrapper; the optimized-set builder mines plain
/// trees and assigns its own slots to branch expressions.
pub(crate) fn strip_cached(expr: Expr) -> Expr {
    match expr {
        Expr::Cached { child, .. } => strip_cached(*child),
        Expr::Not { child, position } => Expr::not(strip_cached(*child), position),
        Expr::And {
            left,
            right,
            position,
        } => Expr::and(strip_cached(*left), strip_cached(*right), position),
        Expr::Or {
            left,
            right,
            position,
        } => Expr::or(strip_cached(*left), strip_cached(*right), position),
        Expr::Compare {
            op,
            left,
            right,
            position,
        } => Expr::compare(op, strip_cached(*left), strip_cached(*right), position),
        Expr::Contains {
            left,
            right,
            position,
        } => Expr::contains(strip_cached(*left), strip_cached(*right), position),
        Expr::Match {
            left,
            regex,
            position,
        } => Expr::Match {
            left: Box::new(strip_cached(*left)),
            regex,
            position,
        },
        leaf => leaf,
    }
}

/// Collects the branchable tests of a tree: the comparisons, containment
/// and match tests, and bare identifiers sitting in boolean position.
/// Composite `and`/`or` subtrees are not collected; shared composites fall
/// out of recursive branching on their parts.
pub(crate) fn collect_tests<'e>(expr: &'e Expr, tests: &mut Vec<&'e Expr>) {
    match expr {
        Expr::And { left, right, .. } | Expr::Or { left, right, .. } => {
            collect_tests(left, tests);
            collect_tests(right, tests);
        }
        Expr::Not { child, .. } | Expr::Cached { child, .. } => collect_tests(child, tests),
        Expr::Compare { .. }
        | Expr::Contains { .. }
        | Expr::Match { .. }
        | Expr::Identifier { .. } => tests.push(expr),
        _ => {}
    }
}

/// Whether any boolean-position subtree carries the given fingerprint.
pub(crate) fn contains_test(expr: &Expr, fingerprint: &str) -> bool {
    if boolean_position_matches(expr, fingerprint) {
        return true;
    }
    match expr {
        Expr::And { left, right, .. } | Expr::Or { left, right, .. } => {
            contains_test(left, fingerprint) || contains_test(right, fingerprint)
        }
        Expr::Not { child, .. } | Expr::Cached { child, .. } => {
            contains_test(child, fingerprint)
        }
        _ => false,
    }
}

fn boolean_position_matches(expr: &Expr, fingerprint: &str) -> bool {
    matches!(
        expr,
        Expr::Compare { .. }
            | Expr::Contains { .. }
            | Expr::Match { .. }
            | Expr::Identifier { .. }
            | Expr::And { .. }
            | Expr::Or { .. }
            | Expr::Not { .. }
    ) && expr.fingerprint() == fingerprint
}

/// Substitutes a constant for every boolean-position subtree matching the
/// fingerprint; the caller re-optimizes the result.
pub(crate) fn substitute(expr: Expr, fingerprint: &str, result: bool) -> Expr {
    if boolean_position_matches(&expr, fingerprint) {
        return bool_constant(result, expr.position());
    }
    match expr {
        Expr::And {
            left,
            right,
            position,
        } => Expr::and(
            substitute(*left, fingerprint, result),
            substitute(*right, fingerprint, result),
            position,
        ),
        Expr::Or {
            left,
            right,
            position,
        } => Expr::or(
            substitute(*left, fingerprint, result),
            substitute(*right, fingerprint, result),
            position,
        ),
        Expr::Not { child, position } => {
            Expr::not(substitute(*child, fingerprint, result), position)
        }
        Expr::Cached { id, child } => Expr::cached(id, substitute(*child, fingerprint, result)),
        other => other,
    }
}
