//! Vote aggregation.
//!
//! A vote contributes one to every option it selects, so `total_votes` is the
//! sum of option counts and exceeds the voter count on multi-select polls.

use crate::models::poll::Poll;
use crate::models::vote::VoteRow;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    counts: BTreeMap<String, u64>,
}

/// One option's share of the result, in poll order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionResult {
    pub name: String,
    pub value: u64,
    pub percent: u32,
}

impl Tally {
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a VoteRow>,
    {
        let mut counts = BTreeMap::new();
        for row in rows {
            for option in &row.selected_options {
                *counts.entry(option.clone()).or_insert(0) += 1;
            }
        }
        Self { counts }
    }

    pub fn count(&self, option: &str) -> u64 {
        self.counts.get(option).copied().unwrap_or(0)
    }

    /// Includes counts for options no longer on the poll.
    pub fn total_votes(&self) -> u64 {
        self.counts.values().sum()
    }

    /// `round(count / total * 100)`, or 0 when nothing has been counted.
    pub fn percent(&self, option: &str) -> u32 {
        let total = self.total_votes();
        if total == 0 {
            return 0;
        }
        let share = self.count(option) as f64 / total as f64 * 100.0;
        share.round() as u32
    }

    pub fn rows(&self, poll: &Poll) -> Vec<OptionResult> {
        poll.options
            .iter()
            .map(|option| OptionResult {
                name: option.clone(),
                value: self.count(option),
                percent: self.percent(option),
            })
            .collect()
    }
}
