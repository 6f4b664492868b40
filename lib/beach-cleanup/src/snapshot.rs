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

//! Read-only picture of the world after a tick, for renderers and controllers.

use serde::Serialize;
use waste_classifier::Prediction;

use crate::geometry::Rect;
use crate::item_pool::{ItemId, ItemState};
use crate::tally::Tally;

/// Whether a prediction matched the label the image was filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
    /// The item had no true label.
    Unknown,
}

impl Verdict {
    pub fn judge(actual: Option<&str>, predicted: &str) -> Self {
        match actual {
            Some(actual) if actual == predicted => Verdict::Correct,
            Some(_) => Verdict::Incorrect,
            None => Verdict::Unknown,
        }
    }
}

/// How sure the classifier was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    /// Above [ConfidenceBand::CONFIDENT_ABOVE].
    Confident,
    /// Above zero.
    Hesitant,
    /// Zero or not reported.
    Unknown,
}

impl ConfidenceBand {
    pub const CONFIDENT_ABOVE: f64 = 0.75;

    pub fn of(confidence: Option<f64>) -> Self {
        match confidence {
            Some(c) if c > Self::CONFIDENT_ABOVE => ConfidenceBand::Confident,
            Some(c) if c > 0.0 => ConfidenceBand::Hesitant,
            _ => ConfidenceBand::Unknown,
        }
    }
}

impl std::fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceBand::Confident => write!(f, "confident"),
            ConfidenceBand::Hesitant => write!(f, "hesitant"),
            ConfidenceBand::Unknown => write!(f, "unknown"),
        }
    }
}

/// One successful classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Encounter {
    pub item: ItemId,
    pub actual: Option<String>,
    pub prediction: Prediction,
    pub verdict: Verdict,
    pub band: ConfidenceBand,
}

/// The status line: the outcome of the most recent classification attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    /// Nothing classified yet.
    Waiting,

    Classified(Encounter),

    /// The model is unavailable, so there is no result to show.
    NoResult { item: ItemId, reason: String },

    /// The item's image could not be decoded. The item will be retried.
    DecodeFailed { item: ItemId, message: String },
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Waiting => write!(f, "waiting for analysis..."),
            Status::Classified(encounter) => {
                let predicted = &encounter.prediction.label;
                match (&encounter.verdict, &encounter.actual) {
                    (Verdict::Correct, Some(actual)) => write!(
                        f,
                        "CORRECT {} (actual: {} = predicted: {})",
                        encounter.item, actual, predicted
                    )?,
                    (Verdict::Incorrect, Some(actual)) => write!(
                        f,
                        "WRONG {} (actual: {} != predicted: {})",
                        encounter.item, actual, predicted
                    )?,
                    _ => write!(f, "detected {}: {}", encounter.item, predicted)?,
                }
                match encounter.prediction.confidence {
                    Some(confidence) => write!(
                        f,
                        " | confidence {:.1}% ({})",
                        confidence * 100.0,
                        encounter.band
                    ),
                    None => write!(f, " | confidence n/a"),
                }
            }
            Status::NoResult { item, reason } => {
                write!(f, "no result for {}: {}", item, reason)
            }
            Status::DecodeFailed { item, message } => {
                write!(f, "could not read {}: {}", item, message)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentView {
    pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemView {
    pub id: ItemId,
    pub rect: Rect,
    pub state: ItemState,
    /// The label the image was filed under, if known.
    pub actual: Option<String>,
    pub failed_attempts: u32,
}

/// Something to draw. The only thing that differs between the two is the shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sprite<'a> {
    Agent(&'a AgentView),
    Item(&'a ItemView),
}

impl<'a> Sprite<'a> {
    pub fn rect(&self) -> Rect {
        match self {
            Sprite::Agent(agent) => agent.rect,
            Sprite::Item(item) => item.rect,
        }
    }

    /// Character used by the text renderer.
    pub fn glyph(&self) -> char {
        match self {
            Sprite::Agent(_) => 'R',
            Sprite::Item(item) => match &item.state {
                ItemState::Unscanned => '?',
                ItemState::Classifying => '!',
                ItemState::Classified(prediction) => prediction
                    .label
                    .chars()
                    .next()
                    .map(|c| c.to_ascii_lowercase())
                    .unwrap_or('*'),
            },
        }
    }
}

/// Everything a renderer needs after one tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub tick: u64,
    pub bounds: Rect,
    pub agent: AgentView,
    pub items: Vec<ItemView>,
    pub status: Status,
    pub tally: Tally,
}

// width of the text rendering, in characters. rows follow the aspect ratio, assuming characters
// are about twice as tall as they are wide.
const TEXT_COLUMNS: usize = 60;

impl Snapshot {
    pub fn item(&self, id: ItemId) -> Option<&ItemView> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Draw order: items in spawn order, then the agent on top.
    pub fn sprites(&self) -> Vec<Sprite<'_>> {
        self.items
            .iter()
            .map(Sprite::Item)
            .chain(std::iter::once(Sprite::Agent(&self.agent)))
            .collect()
    }

    /// Number of items still waiting for a classification.
    pub fn pending(&self) -> usize {
        self.items
            .iter()
            .filter(|item| !matches!(item.state, ItemState::Classified(_)))
            .count()
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cell_w = self.bounds.w / TEXT_COLUMNS as f64;
        let cell_h = cell_w * 2.0;
        let rows = ((self.bounds.h / cell_h).ceil() as usize).max(1);
        let mut grid = vec![vec!['.'; TEXT_COLUMNS]; rows];
        for sprite in self.sprites() {
            let (cx, cy) = sprite.rect().center();
            // float to int casts saturate, so centres left of or above the bounds land on 0
            let col = (((cx - self.bounds.x) / cell_w) as usize).min(TEXT_COLUMNS - 1);
            let row = (((cy - self.bounds.y) / cell_h) as usize).min(rows - 1);
            grid[row][col] = sprite.glyph();
        }

        writeln!(f, "tick {}", self.tick)?;
        for row in grid {
            writeln!(f, "{}", row.into_iter().collect::<String>())?;
        }
        write!(f, "{}", self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, x: f64, state: ItemState) -> ItemView {
        ItemView {
            id: ItemId(id),
            rect: Rect::new(x, 0.0, 10.0, 10.0),
            state,
            actual: None,
            failed_attempts: 0,
        }
    }

    fn snapshot(items: Vec<ItemView>) -> Snapshot {
        Snapshot {
            tick: 3,
            bounds: Rect::new(0.0, 0.0, 600.0, 40.0),
            agent: AgentView {
                rect: Rect::new(590.0, 30.0, 10.0, 10.0),
            },
            items,
            status: Status::Waiting,
            tally: Tally::default(),
        }
    }

    #[test]
    fn test_verdict() {
        assert_eq!(Verdict::judge(Some("Glass"), "Glass"), Verdict::Correct);
        assert_eq!(Verdict::judge(Some("Glass"), "Metal"), Verdict::Incorrect);
        assert_eq!(Verdict::judge(None, "Metal"), Verdict::Unknown);
    }

    #[test]
    fn test_confidence_band() {
        assert_eq!(ConfidenceBand::of(Some(0.9)), ConfidenceBand::Confident);
        assert_eq!(ConfidenceBand::of(Some(0.75)), ConfidenceBand::Hesitant);
        assert_eq!(ConfidenceBand::of(Some(0.01)), ConfidenceBand::Hesitant);
        assert_eq!(ConfidenceBand::of(Some(0.0)), ConfidenceBand::Unknown);
        assert_eq!(ConfidenceBand::of(None), ConfidenceBand::Unknown);
    }

    #[test]
    fn test_status_line() {
        let status = Status::Classified(Encounter {
            item: ItemId(2),
            actual: Some("Glass".to_string()),
            prediction: Prediction::new("Metal", 0.5),
            verdict: Verdict::Incorrect,
            band: ConfidenceBand::Hesitant,
        });
        assert_eq!(
            status.to_string(),
            "WRONG #2 (actual: Glass != predicted: Metal) | confidence 50.0% (hesitant)"
        );

        let status = Status::NoResult {
            item: ItemId(0),
            reason: "model unavailable: weights missing".to_string(),
        };
        assert_eq!(
            status.to_string(),
            "no result for #0: model unavailable: weights missing"
        );
    }

    #[test]
    fn test_sprites_draw_agent_last() {
        let s = snapshot(vec![
            item(0, 0.0, ItemState::Unscanned),
            item(1, 100.0, ItemState::Classified(Prediction::new("Glass", 0.9))),
        ]);
        let glyphs: Vec<char> = s.sprites().iter().map(Sprite::glyph).collect();
        assert_eq!(glyphs, vec!['?', 'g', 'R']);
        assert_eq!(s.pending(), 1);
    }

    #[test]
    fn test_text_rendering() {
        let s = snapshot(vec![item(0, 0.0, ItemState::Unscanned)]);
        let rendered = s.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        // 600 wide / 60 columns = 10 per cell, 20 per row, so 2 rows
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "tick 3");
        assert!(lines[1].starts_with('?'));
        assert!(lines[2].ends_with('R'));
        assert_eq!(lines[3], "waiting for analysis...");
    }

    #[test]
    fn test_snapshot_serializes() {
        let s = snapshot(vec![item(0, 0.0, ItemState::Unscanned)]);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["status"]["status"], "waiting");
        assert_eq!(json["items"][0]["state"]["state"], "unscanned");
        assert_eq!(json["items"][0]["id"], 0);
    }
}
