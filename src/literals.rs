use crate::value::Value;
use itertools::Itertools;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};

/// A compile-time ground collection used as the left operand of `contains`.
///
/// The representation is picked once, at construction, to keep both lookup
/// cost and memory small: compact all-integer sets become a bitset, pure
/// string sets a hash set, and anything else a sorted vector probed by
/// binary search.
#[derive(Clone, Debug, PartialEq)]
pub struct LiteralSet {
    members: Vec<Value>,
    representation: Representation,
}

#[derive(Clone, Debug, PartialEq)]
enum Representation {
    Bits { base: i64, buckets: Vec<u64> },
    Strings(HashSet<String>),
    Sorted,
}

const BITS_PER_BUCKET: i64 = 64;

/// Widest integer span that still earns the bitset representation.
const MAX_BITSET_SPAN: i64 = 1024;

impl LiteralSet {
    pub fn new(values: Vec<Value>) -> Self {
        let members: Vec<Value> = values.into_iter().sorted().dedup().collect();
        let representation = Self::choose_representation(&members);
        Self {
            members,
            representation,
        }
    }

    fn choose_representation(members: &[Value]) -> Representation {
        if let Some(integers) = integral_members(members) {
            let base = integers[0];
            let span = integers[integers.len() - 1] - base;
            if span < MAX_BITSET_SPAN {
                let mut buckets = vec![0u64; (span / BITS_PER_BUCKET + 1) as usize];
                for integer in integers {
                    let position = integer - base;
                    buckets[(position / BITS_PER_BUCKET) as usize] |=
                        1u64 << (position % BITS_PER_BUCKET);
                }
                return Representation::Bits { base, buckets };
            }
        }

        if !members.is_empty()
            && members
                .iter()
                .all(|member| matches!(member, Value::String(_)))
        {
            let strings = members
                .iter()
                .filter_map(|member| match member {
                    Value::String(value) => Some(value.clone()),
                    _ => None,
                })
                .collect();
            return Representation::Strings(strings);
        }

        Representation::Sorted
    }

    pub fn contains(&self, probe: &Value) -> bool {
        match &self.representation {
            Representation::Bits { base, buckets } => match integral(probe) {
                Some(integer) => {
                    let position = integer - base;
                    position >= 0
                        && position < buckets.len() as i64 * BITS_PER_BUCKET
                        && buckets[(position / BITS_PER_BUCKET) as usize]
                            & (1u64 << (position % BITS_PER_BUCKET))
                            != 0
                }
                None => false,
            },
            Representation::Strings(strings) => match probe {
                Value::String(value) => strings.contains(value),
                _ => false,
            },
            Representation::Sorted => self.members.binary_search(probe).is_ok(),
        }
    }

    pub fn members(&self) -> &[Value] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Display for LiteralSet {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                write!(formatter, " ")?;
            }
            write!(formatter, "{member}")?;
        }
        write!(formatter, "}}")
    }
}

/// All members as `i64` when every member is an integral number.
fn integral_members(members: &[Value]) -> Option<Vec<i64>> {
    if members.is_empty() {
        return None;
    }
    members.iter().map(integral).collect()
}

fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) if number.is_integer() => number.to_i64(),
        _ => None,
    }
}
