//! Imperative list DSL and the reference functions it is checked against.
//!
//! A list program is a sequence of [`ListOp`]s applied left to right to an
//! integer list. Arithmetic is checked.

use serde::{Deserialize, Serialize};

use crate::error::{VerifyError, VerifyResult};

/// One list transformation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ListOp {
    Sort,
    SortDesc,
    Reverse,
    Dedup,
    AddEach { n: i64 },
    MulEach { n: i64 },
    FilterEven,
    FilterOdd,
    FilterPositive,
    FilterGt { n: i64 },
    Take { n: usize },
    Drop { n: usize },
}

impl ListOp {
    fn apply(&self, mut items: Vec<i64>) -> VerifyResult<Vec<i64>> {
        let overflow = || VerifyError::List("integer overflow".into());
        Ok(match self {
            ListOp::Sort => {
                items.sort_unstable();
                items
            }
            ListOp::SortDesc => {
                items.sort_unstable_by(|a, b| b.cmp(a));
                items
            }
            ListOp::Reverse => {
                items.reverse();
                items
            }
            ListOp::Dedup => {
                let mut seen = std::collections::HashSet::new();
                items.retain(|v| seen.insert(*v));
                items
            }
            ListOp::AddEach { n } => items
                .into_iter()
                .map(|v| v.checked_add(*n).ok_or_else(overflow))
                .collect::<VerifyResult<_>>()?,
            ListOp::MulEach { n } => items
                .into_iter()
                .map(|v| v.checked_mul(*n).ok_or_else(overflow))
                .collect::<VerifyResult<_>>()?,
            ListOp::FilterEven => items.into_iter().filter(|v| v % 2 == 0).collect(),
            ListOp::FilterOdd => items.into_iter().filter(|v| v % 2 != 0).collect(),
            ListOp::FilterPositive => items.into_iter().filter(|v| *v > 0).collect(),
            ListOp::FilterGt { n } => items.into_iter().filter(|v| v > n).collect(),
            ListOp::Take { n } => items.into_iter().take(*n).collect(),
            ListOp::Drop { n } => items.into_iter().skip(*n).collect(),
        })
    }
}

/// Run a list program.
pub fn run_list_program(program: &[ListOp], input: &[i64]) -> VerifyResult<Vec<i64>> {
    program
        .iter()
        .try_fold(input.to_vec(), |items, op| op.apply(items))
}

/// Names accepted by [`reference_fn`].
pub const LIST_FUNCTIONS: [&str; 7] = [
    "dedup",
    "double",
    "evens",
    "positives",
    "reverse",
    "sort",
    "sort_desc",
];

/// Reference implementation of a named list function.
pub fn reference_fn(name: &str, input: &[i64]) -> Option<Vec<i64>> {
    let mut items = input.to_vec();
    match name {
        "sort" => items.sort(),
        "sort_desc" => {
            items.sort();
            items.reverse();
        }
        "reverse" => items.reverse(),
        "dedup" => {
            let mut out: Vec<i64> = Vec::new();
            for v in input {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            items = out;
        }
        "evens" => items.retain(|v| v % 2 == 0),
        "positives" => items.retain(|v| *v > 0),
        "double" => items = input.iter().map(|v| v.saturating_mul(2)).collect(),
        _ => return None,
    }
    Some(items)
}

/// Candidate programs for a named function, primary first.
pub fn programs_for(name: &str) -> Vec<Vec<ListOp>> {
    match name {
        "sort" => vec![vec![ListOp::Sort], vec![ListOp::SortDesc, ListOp::Reverse]],
        "sort_desc" => vec![vec![ListOp::SortDesc], vec![ListOp::Sort, ListOp::Reverse]],
        "reverse" => vec![vec![ListOp::Reverse]],
        "dedup" => vec![vec![ListOp::Dedup]],
        "evens" => vec![vec![ListOp::FilterEven]],
        "positives" => vec![vec![ListOp::FilterPositive], vec![ListOp::FilterGt { n: 0 }]],
        "double" => vec![
            vec![ListOp::MulEach { n: 2 }],
            vec![ListOp::AddEach { n: 0 }, ListOp::MulEach { n: 2 }],
        ],
        _ => Vec::new(),
    }
}
