/*
 * Copyright (C) 2023 Asim Ihsan
 * SPDX-License-Identifier: AGPL-3.0-only
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, version 3.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A
 * PARTICULAR PURPOSE. See the GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>
 */

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::snapshot::Verdict;

/// Per-label counts, keyed by the true label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelTally {
    pub seen: u32,
    pub correct: u32,
}

/// Running performance of the classifier over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tally {
    /// Items classified.
    pub classified: u32,

    /// Classified items whose prediction matched their true label.
    pub correct: u32,

    /// Classified items with no true label to compare against.
    pub unlabeled: u32,

    /// Failed classify calls, retries included.
    pub failures: u32,

    pub per_label: FxHashMap<String, LabelTally>,
}

impl Tally {
    pub(crate) fn record(&mut self, actual: Option<&str>, verdict: Verdict) {
        self.classified += 1;
        match actual {
            Some(label) => {
                let entry = self.per_label.entry(label.to_string()).or_default();
                entry.seen += 1;
                if verdict == Verdict::Correct {
                    entry.correct += 1;
                    self.correct += 1;
                }
            }
            None => self.unlabeled += 1,
        }
    }

    pub(crate) fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Fraction of labeled classifications that were correct.
    pub fn accuracy(&self) -> Option<f64> {
        let labeled = self.classified - self.unlabeled;
        if labeled == 0 {
            None
        } else {
            Some(f64::from(self.correct) / f64::from(labeled))
        }
    }
}

impl std::fmt::Display for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "classified: {}, correct: {}, failures: {}",
            self.classified, self.correct, self.failures
        )?;
        if let Some(accuracy) = self.accuracy() {
            write!(f, ", accuracy: {:.1}%", accuracy * 100.0)?;
        }
        let mut labels: Vec<(&String, &LabelTally)> = self.per_label.iter().collect();
        labels.sort_by(|a, b| a.0.cmp(b.0));
        for (label, tally) in labels {
            write!(f, "\n  {}: {}/{}", label, tally.correct, tally.seen)?;
        }
        Ok(())
    }
}
