//! Join planning over the relationship graph.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{TranslateError, TranslateResult};
use crate::schema::{JoinStep, SchemaModel, TieBreak};

/// Anchor table plus the joins that connect every required table to it.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    pub anchor: String,
    pub steps: Vec<JoinStep>,
}

impl JoinPlan {
    /// Anchor then joined tables, in join order.
    pub fn tables(&self) -> Vec<&str> {
        std::iter::once(self.anchor.as_str())
            .chain(self.steps.iter().map(|s| s.to_table.as_str()))
            .collect()
    }
}

pub struct JoinBuilder<'a> {
    schema: &'a SchemaModel,
    tie_break: TieBreak,
    max_depth: usize,
}

impl<'a> JoinBuilder<'a> {
    pub fn new(schema: &'a SchemaModel, tie_break: TieBreak, max_depth: usize) -> Self {
        Self {
            schema,
            tie_break,
            max_depth,
        }
    }

    /// Pick the anchor: the fact table with the most required columns, or
    /// any table with the most if there is no fact table. Ties go to the
    /// lexicographically smallest name.
    pub fn anchor<'t>(&self, required: &'t BTreeMap<String, BTreeSet<String>>) -> Option<&'t str> {
        let pick = |facts_only: bool| {
            let mut best: Option<(&'t str, usize)> = None;
            for (table, columns) in required {
                let is_fact = self.schema.table(table).is_some_and(|t| t.is_fact());
                if facts_only && !is_fact {
                    continue;
                }
                if best.map_or(true, |(_, n)| columns.len() > n) {
                    best = Some((table.as_str(), columns.len()));
                }
            }
            best.map(|(t, _)| t)
        };
        pick(true).or_else(|| pick(false))
    }

    /// Connect every required table to the anchor, in name order.
    ///
    /// Each target gets the shortest path from the anchor; steps into tables
    /// already joined are skipped.
    pub fn build(&self, required: &BTreeMap<String, BTreeSet<String>>) -> TranslateResult<JoinPlan> {
        let anchor = self
            .anchor(required)
            .ok_or(TranslateError::EmptyProjection)?
            .to_string();

        let mut joined: BTreeSet<String> = BTreeSet::new();
        joined.insert(anchor.clone());
        let mut steps = Vec::new();

        for target in required.keys() {
            if joined.contains(target) {
                continue;
            }
            let path = self
                .schema
                .find_join_path(&anchor, target, &joined, self.tie_break, self.max_depth)
                .ok_or_else(|| TranslateError::NoJoinPath {
                    from: anchor.clone(),
                    to: target.clone(),
                })?;
            for step in path.steps {
                if joined.insert(step.to_table.clone()) {
                    steps.push(step);
                }
            }
        }

        Ok(JoinPlan { anchor, steps })
    }
}
