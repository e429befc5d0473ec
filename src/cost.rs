//! Keyword-based cost and spool-risk scoring for single queries.
//!
//! Scores come from surface keyword presence, not from parsing. Keywords
//! inside string literals or comments still count.

use serde::Serialize;

const JOIN_COST: u32 = 2;
const GROUP_BY_COST: u32 = 2;
const DISTINCT_COST: u32 = 1;
const AGGREGATE_COST: u32 = 1;

const GROUP_BY_SPOOL: u32 = 1;
const JOIN_SPOOL: u32 = 1;
const UNFILTERED_SPOOL: u32 = 2;

/// Aggregate function keywords, each counted once per query.
pub const AGGREGATE_KEYWORDS: &[&str] = &[
    "COUNT", "SUM", "AVG", "MIN", "MAX", "STDDEV", "VARIANCE", "MEDIAN",
];

/// Cost and spool-risk scores of one query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CostEstimate {
    /// Relative compute cost.
    pub cost: u32,
    /// Relative risk of exhausting spool space.
    pub spool_risk: u32,
}

/// Scores queries for the strategy selector.
pub trait Scorer: Send + Sync {
    /// Relative compute cost of `sql`.
    fn estimate_cost(&self, sql: &str) -> u32;

    /// Relative spool risk of `sql`.
    fn estimate_spool_risk(&self, sql: &str) -> u32;

    /// Both scores at once.
    fn estimate(&self, sql: &str) -> CostEstimate {
        CostEstimate {
            cost: self.estimate_cost(sql),
            spool_risk: self.estimate_spool_risk(sql),
        }
    }
}

/// Case-insensitive keyword scanner.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordScorer;

impl Scorer for KeywordScorer {
    fn estimate_cost(&self, sql: &str) -> u32 {
        estimate_cost(sql)
    }

    fn estimate_spool_risk(&self, sql: &str) -> u32 {
        estimate_spool_risk(sql)
    }
}

/// `JOIN` +2, `GROUP BY` +2, `DISTINCT` +1, +1 per distinct aggregate keyword.
pub fn estimate_cost(sql: &str) -> u32 {
    let words = Words::new(sql);
    let mut cost = 0;
    if words.contains("JOIN") {
        cost += JOIN_COST;
    }
    if words.contains_group_by() {
        cost += GROUP_BY_COST;
    }
    if words.contains("DISTINCT") {
        cost += DISTINCT_COST;
    }
    let aggregates = AGGREGATE_KEYWORDS
        .iter()
        .filter(|kw| words.contains(kw))
        .count() as u32;
    cost + aggregates * AGGREGATE_COST
}

/// `GROUP BY` +1, `JOIN` +1, no `WHERE` +2.
pub fn estimate_spool_risk(sql: &str) -> u32 {
    let words = Words::new(sql);
    let mut risk = 0;
    if words.contains_group_by() {
        risk += GROUP_BY_SPOOL;
    }
    if words.contains("JOIN") {
        risk += JOIN_SPOOL;
    }
    if !words.contains("WHERE") {
        risk += UNFILTERED_SPOOL;
    }
    risk
}

/// Upper-cased identifier-like words of a query, in order.
struct Words {
    words: Vec<String>,
}

impl Words {
    fn new(sql: &str) -> Self {
        let words = sql
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty())
            .map(|w| w.to_ascii_uppercase())
            .collect();
        Self { words }
    }

    fn contains(&self, keyword: &str) -> bool {
        self.words.iter().any(|w| w == keyword)
    }

    fn contains_group_by(&self) -> bool {
        self.words
            .windows(2)
            .any(|pair| pair[0] == "GROUP" && pair[1] == "BY")
    }
}
