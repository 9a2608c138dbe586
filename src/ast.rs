use crate::context::EvalContext;
use crate::error::{Diagnostic, DiagnosticKind};
use crate::literals::LiteralSet;
use crate::optimizer::CostWeights;
use crate::value::Value;
use regex::RegexBuilder;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter, Write as _};

pub type TreeNode = Box<Expr>;

/// Source position of a node: 1-based line, 0-based column. Binary
/// operators carry the position of their operator token.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "line: {}, col {}", self.line, self.column)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CompareOp {
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Equal,
    NotEqual,
    Is,
    IsNot,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::LessThan => "<",
            Self::LessThanEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanEqual => ">=",
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Is => "is",
            Self::IsNot => "is not",
        }
    }

    /// The operator after swapping its operands: `a < b` becomes `b > a`.
    pub fn reversed(&self) -> Self {
        match self {
            Self::LessThan => Self::GreaterThan,
            Self::LessThanEqual => Self::GreaterThanEqual,
            Self::GreaterThan => Self::LessThan,
            Self::GreaterThanEqual => Self::LessThanEqual,
            symmetric => *symmetric,
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Self::LessThan | Self::LessThanEqual | Self::GreaterThan | Self::GreaterThanEqual
        )
    }

    fn ordering_matches(&self, ordering: Ordering) -> bool {
        match self {
            Self::LessThan => ordering == Ordering::Less,
            Self::LessThanEqual => ordering != Ordering::Greater,
            Self::GreaterThan => ordering == Ordering::Greater,
            Self::GreaterThanEqual => ordering != Ordering::Less,
            _ => unreachable!("ordering check on an equality operator; this is a bug"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConstantValue {
    True,
    False,
    Null,
    Empty,
    Undefined,
}

impl ConstantValue {
    pub fn to_value(self) -> Value {
        match self {
            Self::True => Value::Bool(true),
            Self::False => Value::Bool(false),
            Self::Null => Value::Null,
            Self::Empty => Value::Empty,
            Self::Undefined => Value::Undefined,
        }
    }
}

impl Display for ConstantValue {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(formatter, "true"),
            Self::False => write!(formatter, "false"),
            Self::Null => write!(formatter, "null"),
            Self::Empty => write!(formatter, "empty"),
            Self::Undefined => write!(formatter, "undefined"),
        }
    }
}

/// A regex literal plus its compiled form.
///
/// Compilation happens once, during semantic validation. Equality is over
/// the pattern and flags; the compiled handle is derived state.
#[derive(Clone, Debug)]
pub struct RegexLiteral {
    pub pattern: String,
    pub flags: String,
    pub compiled: Option<regex::Regex>,
}

impl RegexLiteral {
    pub fn new(pattern: String, flags: String) -> Self {
        Self {
            pattern,
            flags,
            compiled: None,
        }
    }
}

impl PartialEq for RegexLiteral {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.flags == other.flags
    }
}

/// The abstract syntax tree.
///
/// Constructed once by the parser and logically immutable afterwards; the
/// `Cached` wrapper is the only variant the parser never produces, it is
/// introduced by the optimizer around repeated subexpressions.
///
/// Structural equality ignores source positions.
#[derive(Clone, Debug)]
pub enum Expr {
    Identifier {
        name: String,
        position: Position,
    },
    StringLit {
        value: String,
        position: Position,
    },
    NumberLit {
        value: Decimal,
        position: Position,
    },
    Constant {
        value: ConstantValue,
        position: Position,
    },
    RegexLit {
        regex: RegexLiteral,
        position: Position,
    },
    LiteralSet {
        members: Vec<Expr>,
        compiled: Option<LiteralSet>,
        position: Position,
    },
    Not {
        child: TreeNode,
        position: Position,
    },
    And {
        left: TreeNode,
        right: TreeNode,
        position: Position,
    },
    Or {
        left: TreeNode,
        right: TreeNode,
        position: Position,
    },
    Compare {
        op: CompareOp,
        left: TreeNode,
        right: TreeNode,
        position: Position,
    },
    Contains {
        left: TreeNode,
        right: TreeNode,
        position: Position,
    },
    Match {
        left: TreeNode,
        regex: TreeNode,
        position: Position,
    },
    Cached {
        id: usize,
        child: TreeNode,
    },
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Identifier { name: a, .. }, Self::Identifier { name: b, .. }) => a == b,
            (Self::StringLit { value: a, .. }, Self::StringLit { value: b, .. }) => a == b,
            (Self::NumberLit { value: a, .. }, Self::NumberLit { value: b, .. }) => a == b,
            (Self::Constant { value: a, .. }, Self::Constant { value: b, .. }) => a == b,
            (Self::RegexLit { regex: a, .. }, Self::RegexLit { regex: b, .. }) => a == b,
            (
                Self::LiteralSet { members: a, .. },
                Self::LiteralSet { members: b, .. },
            ) => a == b,
            (Self::Not { child: a, .. }, Self::Not { child: b, .. }) => a == b,
            (
                Self::And {
                    left: al,
                    right: ar,
                    ..
                },
                Self::And {
                    left: bl,
                    right: br,
                    ..
                },
            ) => al == bl && ar == br,
            (
                Self::Or {
                    left: al,
                    right: ar,
                    ..
                },
                Self::Or {
                    left: bl,
                    right: br,
                    ..
                },
            ) => al == bl && ar == br,
            (
                Self::Compare {
                    op: ao,
                    left: al,
                    right: ar,
                    ..
                },
                Self::Compare {
                    op: bo,
                    left: bl,
                    right: br,
                    ..
                },
            ) => ao == bo && al == bl && ar == br,
            (
                Self::Contains {
                    left: al,
                    right: ar,
                    ..
                },
                Self::Contains {
                    left: bl,
                    right: br,
                    ..
                },
            ) => al == bl && ar == br,
            (
                Self::Match {
                    left: al,
                    regex: ar,
                    ..
                },
                Self::Match {
                    left: bl,
                    regex: br,
                    ..
                },
            ) => al == bl && ar == br,
            (
                Self::Cached {
                    id: ai, child: ac, ..
                },
                Self::Cached {
                    id: bi, child: bc, ..
                },
            ) => ai == bi && ac == bc,
            _ => false,
        }
    }
}

impl Expr {
    pub fn identifier(name: String, position: Position) -> Self {
        Self::Identifier { name, position }
    }

    pub fn string(value: String, position: Position) -> Self {
        Self::StringLit { value, position }
    }

    pub fn number(value: Decimal, position: Position) -> Self {
        Self::NumberLit { value, position }
    }

    pub fn constant(value: ConstantValue, position: Position) -> Self {
        Self::Constant { value, position }
    }

    pub fn regex(pattern: String, flags: String, position: Position) -> Self {
        Self::RegexLit {
            regex: RegexLiteral::new(pattern, flags),
            position,
        }
    }

    pub fn literal_set(members: Vec<Expr>, position: Position) -> Self {
        Self::LiteralSet {
            members,
            compiled: None,
            position,
        }
    }

    pub fn not(child: Expr, position: Position) -> Self {
        Self::Not {
            child: Box::new(child),
            position,
        }
    }

    pub fn and(left: Expr, right: Expr, position: Position) -> Self {
        Self::And {
            left: Box::new(left),
            right: Box::new(right),
            position,
        }
    }

    pub fn or(left: Expr, right: Expr, position: Position) -> Self {
        Self::Or {
            left: Box::new(left),
            right: Box::new(right),
            position,
        }
    }

    pub fn compare(op: CompareOp, left: Expr, right: Expr, position: Position) -> Self {
        Self::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
            position,
        }
    }

    pub fn contains(left: Expr, right: Expr, position: Position) -> Self {
        Self::Contains {
            left: Box::new(left),
            right: Box::new(right),
            position,
        }
    }

    /// Builds a `matches` node. A string right operand is promoted to a
    /// regex literal so `server matches "east-.*"` works; anything else is
    /// kept as written and rejected during semantic validation.
    pub fn matches(left: Expr, right: Expr, position: Position) -> Self {
        let regex = match right {
            Self::StringLit {
                value,
                position: string_position,
            } => Self::RegexLit {
                regex: RegexLiteral::new(value, String::new()),
                position: string_position,
            },
            other => other,
        };
        Self::Match {
            left: Box::new(left),
            regex: Box::new(regex),
            position,
        }
    }

    pub fn cached(id: usize, child: Expr) -> Self {
        Self::Cached {
            id,
            child: Box::new(child),
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Self::Identifier { position, .. }
            | Self::StringLit { position, .. }
            | Self::NumberLit { position, .. }
            | Self::Constant { position, .. }
            | Self::RegexLit { position, .. }
            | Self::LiteralSet { position, .. }
            | Self::Not { position, .. }
            | Self::And { position, .. }
            | Self::Or { position, .. }
            | Self::Compare { position, .. }
            | Self::Contains { position, .. }
            | Self::Match { position, .. } => *position,
            Self::Cached { child, .. } => child.position(),
        }
    }

    /// The node behind any `Cached` wrappers.
    pub fn unwrapped(&self) -> &Expr {
        match self {
            Self::Cached { child, .. } => child.unwrapped(),
            other => other,
        }
    }

    /// True when no identifier is reachable, i.e. evaluation cannot depend
    /// on the document.
    pub fn is_ground(&self) -> bool {
        match self {
            Self::Identifier { .. } => false,
            Self::StringLit { .. }
            | Self::NumberLit { .. }
            | Self::Constant { .. }
            | Self::RegexLit { .. } => true,
            Self::LiteralSet { members, .. } => members.iter().all(Expr::is_ground),
            Self::Not { child, .. } => child.is_ground(),
            Self::And { left, right, .. }
            | Self::Or { left, right, .. }
            | Self::Compare { left, right, .. }
            | Self::Contains { left, right, .. } => left.is_ground() && right.is_ground(),
            Self::Match { left, .. } => left.is_ground(),
            Self::Cached { child, .. } => child.is_ground(),
        }
    }

    pub fn as_bool_constant(&self) -> Option<bool> {
        match self.unwrapped() {
            Self::Constant {
                value: ConstantValue::True,
                ..
            } => Some(true),
            Self::Constant {
                value: ConstantValue::False,
                ..
            } => Some(false),
            _ => None,
        }
    }

    /// Canonical textual form, used as the CSE and cache key.
    pub fn fingerprint(&self) -> String {
        self.to_string()
    }

    fn kind_label(&self) -> String {
        match self {
            Self::Identifier { name, .. } => format!("Literal '{name}'"),
            Self::StringLit { value, .. } => format!("StringLiteral '{value}'"),
            Self::NumberLit { value, .. } => format!("NumberLiteral {value}"),
            Self::Constant { value, .. } => format!("Constant {value}"),
            Self::RegexLit { regex, .. } => format!("Regex '{}'", regex.pattern),
            Self::LiteralSet { .. } => format!("LiteralSet {self}"),
            Self::Not { .. } => "NegateOperator".to_owned(),
            Self::And { .. } => "AndOperator".to_owned(),
            Self::Or { .. } => "OrOperator".to_owned(),
            Self::Compare { op, .. } => format!("CompareOperator '{}'", op.symbol()),
            Self::Contains { .. } => "ContainsOperator".to_owned(),
            Self::Match { .. } => "MatchOperator".to_owned(),
            Self::Cached { child, .. } => child.kind_label(),
        }
    }

    fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Not { child, .. } => vec![child],
            Self::And { left, right, .. }
            | Self::Or { left, right, .. }
            | Self::Compare { left, right, .. }
            | Self::Contains { left, right, .. } => vec![left, right],
            Self::Match { left, regex, .. } => vec![left, regex],
            Self::Cached { child, .. } => child.children(),
            _ => vec![],
        }
    }

    /// Indented human-readable rendering: one `<NodeKind> at line: L, col C`
    /// line per node, children indented four spaces, in evaluation order.
    pub fn describe(&self) -> String {
        let mut output = String::new();
        self.describe_into(&mut output, 0);
        output
    }

    fn describe_into(&self, output: &mut String, depth: usize) {
        if let Self::Cached { child, .. } = self {
            return child.describe_into(output, depth);
        }
        for _ in 0..depth {
            output.push_str("    ");
        }
        let _ = writeln!(output, "{} at {}", self.kind_label(), self.position());
        for child in self.children() {
            child.describe_into(output, depth + 1);
        }
    }

    /// Semantic validation: compiles regexes and literal sets in place and
    /// returns every problem found. A tree that validates cleanly is ready
    /// to evaluate.
    pub fn validate(&mut self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        self.validate_into(&mut diagnostics);
        diagnostics
    }

    fn validate_into(&mut self, diagnostics: &mut Vec<Diagnostic>) {
        match self {
            Self::And { left, right, .. }
            | Self::Or { left, right, .. }
            | Self::Compare { left, right, .. }
            | Self::Contains { left, right, .. } => {
                left.validate_into(diagnostics);
                right.validate_into(diagnostics);
            }
            Self::Not { child, .. } | Self::Cached { child, .. } => {
                child.validate_into(diagnostics)
            }
            Self::Match { left, regex, .. } => {
                left.validate_into(diagnostics);
                if matches!(regex.as_ref(), Self::RegexLit { .. }) {
                    regex.validate_into(diagnostics);
                } else {
                    push_semantic(
                        diagnostics,
                        regex.position(),
                        "Match operator must take a regex as its right side".to_owned(),
                    );
                }
            }
            Self::RegexLit { regex, position } => {
                let mut flags_ok = true;
                for flag in regex.flags.chars() {
                    if !"imsul".contains(flag) {
                        flags_ok = false;
                        push_semantic(
                            diagnostics,
                            *position,
                            format!("unknown regex flag '{flag}'"),
                        );
                    }
                }
                if flags_ok && regex.compiled.is_none() {
                    let built = RegexBuilder::new(&regex.pattern)
                        .case_insensitive(regex.flags.contains('i'))
                        .multi_line(regex.flags.contains('m'))
                        .dot_matches_new_line(regex.flags.contains('s'))
                        .build();
                    match built {
                        Ok(compiled) => regex.compiled = Some(compiled),
                        Err(_) => push_semantic(
                            diagnostics,
                            *position,
                            format!("Regex compilation failed for '{}'", regex.pattern),
                        ),
                    }
                }
            }
            Self::LiteralSet {
                members, compiled, ..
            } => {
                let mut values = Vec::with_capacity(members.len());
                let mut ground = true;
                for member in members.iter() {
                    match member {
                        Self::StringLit { value, .. } => {
                            values.push(Value::String(value.clone()))
                        }
                        Self::NumberLit { value, .. } => values.push(Value::Number(*value)),
                        Self::Constant { value, .. } => values.push(value.to_value()),
                        other => {
                            ground = false;
                            push_semantic(
                                diagnostics,
                                other.position(),
                                format!(
                                    "Literal set members must be ground values, found {}",
                                    other.kind_label()
                                ),
                            );
                        }
                    }
                }
                if ground && compiled.is_none() {
                    *compiled = Some(LiteralSet::new(values));
                }
            }
            _ => {}
        }
    }

    /// Static evaluation cost used for selectivity ordering and branch
    /// selection.
    pub fn cost(&self, weights: &CostWeights) -> u64 {
        match self {
            Self::StringLit { .. }
            | Self::NumberLit { .. }
            | Self::Constant { .. }
            | Self::RegexLit { .. }
            | Self::LiteralSet { .. } => weights.constant,
            Self::Identifier { .. } => weights.identifier,
            Self::Not { child, .. } => child.cost(weights),
            Self::And { left, right, .. } | Self::Or { left, right, .. } => {
                left.cost(weights) + right.cost(weights) + 1
            }
            Self::Compare { left, right, .. } => {
                weights.comparison + left.cost(weights) + right.cost(weights)
            }
            Self::Contains { left, right, .. } => {
                if matches!(left.unwrapped(), Self::LiteralSet { .. }) {
                    weights.literal_set + right.cost(weights)
                } else {
                    weights.comparison + left.cost(weights) + right.cost(weights)
                }
            }
            Self::Match { left, .. } => weights.regex_match + left.cost(weights),
            Self::Cached { .. } => 1,
        }
    }

    /// Evaluates the tree to a boolean.
    ///
    /// Failure reasons accumulate in post-order; when a subtree turns out
    /// true its reasons are discarded, so the trail is non-empty exactly
    /// when the result is false.
    pub fn evaluate(&self, ctx: &mut EvalContext) -> bool {
        let checkpoint = ctx.trail_checkpoint();
        let result = self.evaluate_inner(ctx);
        if result {
            ctx.truncate_trail(checkpoint);
        }
        result
    }

    fn evaluate_inner(&self, ctx: &mut EvalContext) -> bool {
        match self {
            Self::And {
                left,
                right,
                position,
            } => {
                if !left.evaluate(ctx) {
                    ctx.push_failure(|| {
                        format!("Left hand side of AndOperator at {position} failed")
                    });
                    return false;
                }
                if !right.evaluate(ctx) {
                    ctx.push_failure(|| {
                        format!("Right hand side of AndOperator at {position} failed")
                    });
                    return false;
                }
                true
            }
            Self::Or {
                left,
                right,
                position,
            } => {
                if left.evaluate(ctx) || right.evaluate(ctx) {
                    return true;
                }
                ctx.push_failure(|| format!("Both sides of OrOperator at {position} failed"));
                false
            }
            Self::Not { child, position } => {
                if child.evaluate(ctx) {
                    ctx.push_failure(|| {
                        format!("Negation of NegateOperator at {position} was true")
                    });
                    return false;
                }
                true
            }
            Self::Compare {
                op,
                left,
                right,
                position,
            } => evaluate_compare(*op, left, right, *position, ctx),
            Self::Contains {
                left,
                right,
                position,
            } => evaluate_contains(left, right, *position, ctx),
            Self::Match {
                left,
                regex,
                position,
            } => evaluate_match(left, regex, *position, ctx),
            Self::Cached { id, child } => {
                if let Some(result) = ctx.stored_result(*id) {
                    return result;
                }
                let result = child.evaluate(ctx);
                ctx.store_result(*id, result);
                result
            }
            Self::Identifier { name, position } => {
                let value = ctx.resolve(name);
                if value.is_truthy() {
                    return true;
                }
                ctx.push_failure(|| {
                    if value.is_undefined() {
                        format!("Literal '{name}' at {position} is undefined")
                    } else {
                        format!("Literal '{name}' at {position} evaluated false")
                    }
                });
                false
            }
            Self::Constant { value, position } => {
                if value.to_value().is_truthy() {
                    return true;
                }
                ctx.push_failure(|| format!("Constant {value} at {position}"));
                false
            }
            leaf => {
                let value = leaf.value_of(ctx);
                if value.is_truthy() {
                    return true;
                }
                let reason = format!(
                    "{} at {} evaluated false",
                    leaf.kind_label(),
                    leaf.position()
                );
                ctx.push_failure(|| reason);
                false
            }
        }
    }

    /// Evaluates a node in value position.
    fn value_of(&self, ctx: &mut EvalContext) -> Value {
        match self {
            Self::Identifier { name, .. } => ctx.resolve(name),
            Self::StringLit { value, .. } => Value::String(value.clone()),
            Self::NumberLit { value, .. } => Value::Number(*value),
            Self::Constant { value, .. } => value.to_value(),
            Self::LiteralSet { compiled, .. } => match compiled {
                Some(set) => Value::Set(set.members().iter().cloned().collect()),
                None => unreachable!("evaluating an unvalidated literal set; this is a bug"),
            },
            // A regex object has no place in the value domain; any operator
            // that can consume one handles it before reaching here.
            Self::RegexLit { .. } => Value::Undefined,
            Self::Cached { child, .. } => child.value_of(ctx),
            operator => Value::Bool(operator.evaluate(ctx)),
        }
    }
}

fn evaluate_compare(
    op: CompareOp,
    left: &Expr,
    right: &Expr,
    position: Position,
    ctx: &mut EvalContext,
) -> bool {
    let l = left.value_of(ctx);
    let r = right.value_of(ctx);

    if matches!(op, CompareOp::Is | CompareOp::IsNot) {
        let equal = if l.is_undefined() || r.is_undefined() {
            l.is_undefined() && r.is_undefined()
        } else {
            l.loose_eq(&r)
        };
        let result = (op == CompareOp::Is) == equal;
        if !result {
            ctx.push_failure(|| {
                format!("CompareOperator '{}' at {position} failed", op.symbol())
            });
        }
        return result;
    }

    if l.is_undefined() {
        ctx.push_failure(|| {
            format!(
                "Left side of CompareOperator '{}' at {position} is undefined",
                op.symbol()
            )
        });
        return false;
    }
    if r.is_undefined() {
        ctx.push_failure(|| {
            format!(
                "Right side of CompareOperator '{}' at {position} is undefined",
                op.symbol()
            )
        });
        return false;
    }

    let result = match op {
        CompareOp::Equal => l.loose_eq(&r),
        CompareOp::NotEqual => !l.loose_eq(&r),
        ordering_op => match l.loose_cmp(&r) {
            Some(ordering) => ordering_op.ordering_matches(ordering),
            None => {
                ctx.push_failure(|| {
                    format!(
                        "Cannot compare left side: {l} with right side: {r} \
                         for CompareOperator '{}' at {position}",
                        ordering_op.symbol()
                    )
                });
                return false;
            }
        },
    };
    if !result {
        ctx.push_failure(|| format!("CompareOperator '{}' at {position} failed", op.symbol()));
    }
    result
}

fn evaluate_contains(
    left: &Expr,
    right: &Expr,
    position: Position,
    ctx: &mut EvalContext,
) -> bool {
    // Literal-set containers use their dense representation directly.
    if let Expr::LiteralSet {
        compiled: Some(set),
        ..
    } = left.unwrapped()
    {
        let probe = right.value_of(ctx);
        if probe.is_undefined() {
            ctx.push_failure(|| {
                format!("Right side of ContainsOperator at {position} is undefined")
            });
            return false;
        }
        if set.contains(&probe) {
            return true;
        }
        ctx.push_failure(|| {
            format!(
                "Right side: {probe} not in left side: {set} \
                 for ContainsOperator at {position}"
            )
        });
        return false;
    }

    let container = left.value_of(ctx);
    let probe = right.value_of(ctx);
    let found = match &container {
        Value::Undefined => {
            ctx.push_failure(|| {
                format!("Left side of ContainsOperator at {position} is undefined")
            });
            return false;
        }
        Value::String(haystack) => match &probe {
            Value::String(needle) => haystack.contains(needle.as_str()),
            _ => false,
        },
        Value::List(items) => items.iter().any(|item| item.loose_eq(&probe)),
        Value::Set(items) => items.iter().any(|item| item.loose_eq(&probe)),
        other => {
            let reason =
                format!("Left side: {other} is not a container for ContainsOperator at {position}");
            ctx.push_failure(|| reason);
            return false;
        }
    };
    if !found {
        ctx.push_failure(|| {
            format!(
                "Right side: {probe} not in left side: {container} \
                 for ContainsOperator at {position}"
            )
        });
    }
    found
}

fn evaluate_match(
    left: &Expr,
    regex: &Expr,
    position: Position,
    ctx: &mut EvalContext,
) -> bool {
    let Expr::RegexLit { regex: literal, .. } = regex.unwrapped() else {
        unreachable!("match node without a regex right side; this is a bug");
    };
    let Some(compiled) = &literal.compiled else {
        unreachable!("evaluating an uncompiled regex; this is a bug");
    };

    let value = left.value_of(ctx);
    match &value {
        Value::String(subject) => {
            if compiled.is_match(subject) {
                return true;
            }
            ctx.push_failure(|| {
                format!(
                    "Regex '{}' did not match {value} for MatchOperator at {position}",
                    literal.pattern
                )
            });
            false
        }
        Value::Undefined => {
            ctx.push_failure(|| format!("Left side of MatchOperator at {position} is undefined"));
            false
        }
        other => {
            let reason =
                format!("Left side: {other} is not a string for MatchOperator at {position}");
            ctx.push_failure(|| reason);
            false
        }
    }
}

fn push_semantic(diagnostics: &mut Vec<Diagnostic>, position: Position, message: String) {
    diagnostics.push(Diagnostic {
        kind: DiagnosticKind::Semantic,
        message,
        line: position.line,
        column: position.column,
    });
}

impl Display for Expr {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier { name, .. } => write!(formatter, "{name}"),
            Self::StringLit { value, .. } => write!(formatter, "'{value}'"),
            Self::NumberLit { value, .. } => write!(formatter, "{value}"),
            Self::Constant { value, .. } => write!(formatter, "{value}"),
            Self::RegexLit { regex, .. } => {
                write!(formatter, "/{}/{}", regex.pattern, regex.flags)
            }
            Self::LiteralSet {
                members, compiled, ..
            } => match compiled {
                Some(set) => write!(formatter, "{set}"),
                None => {
                    write!(formatter, "{{")?;
                    for (i, member) in members.iter().enumerate() {
                        if i > 0 {
                            write!(formatter, " ")?;
                        }
                        write!(formatter, "{member}")?;
                    }
                    write!(formatter, "}}")
                }
            },
            Self::Not { child, .. } => write!(formatter, "not {child}"),
            Self::And { left, right, .. } => write!(formatter, "({left} and {right})"),
            Self::Or { left, right, .. } => write!(formatter, "({left} or {right})"),
            Self::Compare {
                op, left, right, ..
            } => write!(formatter, "({left} {} {right})", op.symbol()),
            Self::Contains { left, right, .. } => {
                write!(formatter, "({left} contains {right})")
            }
            Self::Match { left, regex, .. } => write!(formatter, "({left} matches {regex})"),
            Self::Cached { child, .. } => write!(formatter, "{child}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ast::{
        and, cmp, constant, contains, ident, not, num, or, set, string,
    };
    use crate::value::Document;

    fn evaluate(expr: &mut Expr, document: &Document) -> (bool, Vec<String>) {
        assert!(expr.validate().is_empty());
        let mut ctx = EvalContext::new(document, None, true);
        let result = expr.evaluate(&mut ctx);
        (result, ctx.failed().to_vec())
    }

    #[test]
    fn a_true_evaluation_leaves_no_failure_trail() {
        let mut expr = and!(
            cmp!(CompareOp::Is, ident!("name"), string!("Jack")),
            cmp!(CompareOp::Is, ident!("friend"), string!("Jill"))
        );
        let document = Document::new().with("name", "Jack").with("friend", "Jill");

        let (result, failed) = evaluate(&mut expr, &document);

        assert!(result);
        assert!(failed.is_empty());
    }

    #[test]
    fn a_false_evaluation_records_at_least_one_reason() {
        let mut expr = cmp!(CompareOp::Is, ident!("name"), string!("Jack"));
        let document = Document::new().with("name", "John");

        let (result, failed) = evaluate(&mut expr, &document);

        assert!(!result);
        assert!(!failed.is_empty());
        assert!(failed[0].contains("CompareOperator 'is'"));
    }

    #[test]
    fn a_failing_or_branch_is_forgotten_when_the_other_branch_succeeds() {
        let mut expr = or!(
            cmp!(CompareOp::Is, ident!("name"), string!("John")),
            cmp!(CompareOp::Is, ident!("name"), string!("Jack"))
        );
        let document = Document::new().with("name", "Jack");

        let (result, failed) = evaluate(&mut expr, &document);

        assert!(result);
        assert!(failed.is_empty());
    }

    #[test]
    fn and_failures_report_children_before_the_operator() {
        let mut expr = and!(
            cmp!(CompareOp::Is, ident!("name"), string!("Jack")),
            contains!(ident!("errors"), string!("CPU load"))
        );
        let document = Document::new()
            .with("name", "Jack")
            .with("errors", Vec::<&str>::new());

        let (result, failed) = evaluate(&mut expr, &document);

        assert!(!result);
        assert!(failed[0].starts_with("Right side: 'CPU load' not in left side: []"));
        assert!(failed[1].contains("Right hand side of AndOperator"));
    }

    #[test]
    fn both_or_reasons_survive_when_both_sides_fail() {
        let mut expr = or!(ident!("l"), ident!("r"));
        let document = Document::new().with("l", false).with("r", false);

        let (result, failed) = evaluate(&mut expr, &document);

        assert!(!result);
        assert_eq!(3, failed.len());
        assert!(failed[2].contains("Both sides of OrOperator"));
    }

    #[test]
    fn undefined_never_compares_equal() {
        let mut expr = cmp!(CompareOp::Equal, ident!("missing"), num!(1));
        let document = Document::new();

        let (result, failed) = evaluate(&mut expr, &document);

        assert!(!result);
        assert!(failed[0].contains("Left side of CompareOperator '='"));
        assert!(failed[0].contains("is undefined"));
    }

    #[test]
    fn undefined_is_not_unequal_either() {
        let mut expr = cmp!(CompareOp::NotEqual, ident!("missing"), num!(1));
        let document = Document::new();

        let (result, _) = evaluate(&mut expr, &document);

        assert!(!result);
    }

    #[test]
    fn is_undefined_holds_for_a_missing_identifier() {
        let mut expr = cmp!(
            CompareOp::Is,
            ident!("undefined_field"),
            constant!(ConstantValue::Undefined)
        );
        let document = Document::new();

        let (result, _) = evaluate(&mut expr, &document);

        assert!(result);
    }

    #[test]
    fn is_not_treats_undefined_as_comparable() {
        let mut expr = cmp!(
            CompareOp::IsNot,
            ident!("undefined_field"),
            constant!(ConstantValue::Undefined)
        );
        let document = Document::new();

        let (result, _) = evaluate(&mut expr, &document);

        assert!(!result);
    }

    #[test]
    fn empty_constant_equals_an_empty_sequence() {
        let mut expr = cmp!(
            CompareOp::Equal,
            ident!("errors"),
            constant!(ConstantValue::Empty)
        );
        let document = Document::new().with("errors", Vec::<&str>::new());

        let (result, _) = evaluate(&mut expr, &document);

        assert!(result);
    }

    #[test]
    fn contains_looks_through_sequences_by_equality() {
        let mut expr = contains!(ident!("errors"), string!("cpu load"));
        let document = Document::new().with("errors", vec!["disk full", "cpu load"]);

        let (result, _) = evaluate(&mut expr, &document);

        assert!(result);
    }

    #[test]
    fn contains_on_a_string_is_substring_search() {
        let mut expr = contains!(ident!("message"), string!("REQUEST"));
        let document = Document::new().with("message", "BAD REQUEST");

        let (result, _) = evaluate(&mut expr, &document);

        assert!(result);
    }

    #[test]
    fn contains_on_a_non_container_fails_with_a_reason() {
        let mut expr = contains!(ident!("status"), string!("x"));
        let document = Document::new().with("status", 500i64);

        let (result, failed) = evaluate(&mut expr, &document);

        assert!(!result);
        assert!(failed[0].contains("is not a container"));
    }

    #[test]
    fn contains_on_an_undefined_container_fails_with_a_reason() {
        let mut expr = contains!(ident!("missing"), string!("x"));
        let document = Document::new();

        let (result, failed) = evaluate(&mut expr, &document);

        assert!(!result);
        assert!(failed[0].contains("Left side of ContainsOperator"));
    }

    #[test]
    fn a_literal_set_container_uses_its_compiled_membership() {
        let mut expr = contains!(
            set!(string!("WARN"), string!("ERR"), string!("CRIT")),
            ident!("error_level")
        );
        let document = Document::new().with("error_level", "ERR");
        let (result, _) = evaluate(&mut expr, &document);
        assert!(result);

        let mut expr = contains!(
            set!(string!("WARN"), string!("ERR"), string!("CRIT")),
            ident!("error_level")
        );
        let document = Document::new().with("error_level", "INFO");
        let (result, failed) = evaluate(&mut expr, &document);
        assert!(!result);
        assert!(failed[0].contains("'INFO' not in left side:"));
    }

    #[test]
    fn match_requires_a_string_subject() {
        let mut expr = Expr::matches(
            ident!("server"),
            string!("east-web-([0-9]+)"),
            Position::default(),
        );
        let document = Document::new().with("server", "east-web-001");
        let (result, _) = evaluate(&mut expr, &document);
        assert!(result);

        let mut expr = Expr::matches(
            ident!("server"),
            string!("east-web-([0-9]+)"),
            Position::default(),
        );
        let document = Document::new().with("server", 17i64);
        let (result, failed) = evaluate(&mut expr, &document);
        assert!(!result);
        assert!(failed[0].contains("is not a string"));
    }

    #[test]
    fn a_bare_identifier_uses_truthiness() {
        let mut expr = ident!("flag");
        let document = Document::new().with("flag", true);
        let (result, _) = evaluate(&mut expr, &document);
        assert!(result);

        let mut expr = not!(ident!("flag"));
        let document = Document::new().with("flag", false);
        let (result, _) = evaluate(&mut expr, &document);
        assert!(result);
    }

    #[test]
    fn negation_of_a_true_child_reports_the_negation() {
        let mut expr = not!(ident!("flag"));
        let document = Document::new().with("flag", true);

        let (result, failed) = evaluate(&mut expr, &document);

        assert!(!result);
        assert!(failed[0].contains("Negation of NegateOperator"));
    }

    #[test]
    fn validation_rejects_identifiers_inside_literal_sets() {
        let mut expr = contains!(set!(string!("a"), ident!("b")), ident!("x"));

        let diagnostics = expr.validate();

        assert_eq!(1, diagnostics.len());
        assert_eq!(DiagnosticKind::Semantic, diagnostics[0].kind);
        assert!(diagnostics[0].message.contains("ground values"));
    }

    #[test]
    fn validation_rejects_a_non_regex_matches_operand() {
        let mut expr = Expr::Match {
            left: Box::new(ident!("a")),
            regex: Box::new(num!(3)),
            position: Position::default(),
        };

        let diagnostics = expr.validate();

        assert!(diagnostics[0].message.contains("must take a regex"));
    }

    #[test]
    fn validation_rejects_unknown_regex_flags() {
        let mut expr = Expr::regex("abc".to_owned(), "ix".to_owned(), Position::default());

        let diagnostics = expr.validate();

        assert_eq!(1, diagnostics.len());
        assert!(diagnostics[0].message.contains("unknown regex flag 'x'"));
    }

    #[test]
    fn validation_rejects_an_uncompilable_pattern() {
        let mut expr = Expr::regex("(abc".to_owned(), String::new(), Position::default());

        let diagnostics = expr.validate();

        assert!(diagnostics[0].message.contains("Regex compilation failed"));
    }

    #[test]
    fn fingerprints_are_canonical_text() {
        let expr = and!(
            cmp!(CompareOp::Is, ident!("name"), string!("Jack")),
            not!(ident!("test"))
        );

        assert_eq!("((name is 'Jack') and not test)", expr.fingerprint());
    }

    #[test]
    fn equal_trees_share_a_fingerprint_regardless_of_position() {
        let a = cmp!(CompareOp::Equal, ident!("x"), num!(3));
        let b = Expr::compare(
            CompareOp::Equal,
            Expr::identifier("x".to_owned(), Position::new(4, 10)),
            Expr::number(Decimal::from(3), Position::new(4, 14)),
            Position::new(4, 12),
        );

        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn describe_renders_the_tree_with_positions_and_indentation() {
        let mut expr = Expr::and(
            Expr::identifier("a".to_owned(), Position::new(1, 0)),
            Expr::identifier("b".to_owned(), Position::new(1, 6)),
            Position::new(1, 2),
        );
        assert!(expr.validate().is_empty());

        let description = expr.describe();

        assert_eq!(
            "AndOperator at line: 1, col 2\n    Literal 'a' at line: 1, col 0\n    Literal 'b' at line: 1, col 6\n",
            description
        );
    }

    #[test]
    fn ground_subtrees_know_they_are_ground() {
        assert!(cmp!(CompareOp::LessThan, num!(3), num!(5)).is_ground());
        assert!(!cmp!(CompareOp::LessThan, ident!("x"), num!(5)).is_ground());
    }
}
