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

// A robot on a beach runs into pieces of litter and asks an image classifier what each one is.
//
// The world is a bounded rectangle. The robot (the agent) moves by an input vector each tick;
// litter (items) is spawned at random points and carries an image. The first tick on which the
// robot overlaps an item triggers exactly one classification of that item.

pub mod agent;
mod background;
pub mod controller;
pub mod encounter;
pub mod geometry;
pub mod item_pool;
pub mod snapshot;
pub mod space;
pub mod tally;

pub use agent::{Agent, InputVector};
pub use controller::{RandomWalk, ReflexCollector, ScriptedController};
pub use encounter::EncounterLoop;
pub use geometry::{Rect, Size};
pub use item_pool::{
    ContentSource, Item, ItemId, ItemKey, ItemPool, ItemState, PoolConfig, SourceDeck,
};
pub use snapshot::{ConfidenceBand, Encounter, Snapshot, Sprite, Status, Verdict};
pub use space::Bounded2DSpace;
pub use tally::Tally;

use waste_classifier::ImageClassifier;

pub type Rng = rand_pcg::Pcg64;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorldError {
    #[error("space bounds must be finite with positive size, got {0:?}")]
    InvalidSpace(Rect),

    #[error("margin {0} leaves no room inside the space")]
    MarginExceedsSpace(f64),

    #[error("agent of size {0:?} does not fit inside the space")]
    AgentDoesNotFit(Size),

    #[error("item size must be finite and positive, got {0:?}")]
    InvalidItemSize(Size),

    #[error("agent speed must be finite and non-negative, got {0}")]
    InvalidSpeed(f64),

    #[error("no content to spawn items from")]
    ContentSourceEmpty,

    #[error("item pool is full ({0} items)")]
    PoolFull(usize),

    #[error("spawn margin {margin} is smaller than half the item size ({required})")]
    SpawnMarginTooSmall { margin: f64, required: f64 },

    #[error("item centre ({x}, {y}) is outside the spawn area")]
    SpawnOutsideSpace { x: f64, y: f64 },

    #[error("could not start classifier workers: {0}")]
    WorkerPool(String),
}

/// Decides how the agent moves. A controller sees only the last snapshot, never the world.
///
/// Keyboard input, a scripted test and an autonomous robot are all controllers.
pub trait Controller {
    fn act(&mut self, snapshot: &Snapshot) -> InputVector;
}

impl<T: Controller + ?Sized> Controller for Box<T> {
    fn act(&mut self, snapshot: &Snapshot) -> InputVector {
        (**self).act(snapshot)
    }
}

/// A Simulation drives an [EncounterLoop] with a [Controller] for a number of ticks.
///
/// Notice that the controller is not aware of the loop. It gets the previous snapshot and answers
/// with an input vector, which is all a keyboard could do.
pub struct Simulation<_Classifier, _Controller>
where
    _Classifier: ImageClassifier,
    _Controller: Controller,
{
    encounter_loop: EncounterLoop<_Classifier>,
    controller: _Controller,
    last: Snapshot,
}

impl<_Classifier, _Controller> Simulation<_Classifier, _Controller>
where
    _Classifier: ImageClassifier,
    _Controller: Controller,
{
    pub fn new(encounter_loop: EncounterLoop<_Classifier>, controller: _Controller) -> Self {
        let last = encounter_loop.snapshot();
        Self {
            encounter_loop,
            controller,
            last,
        }
    }

    /// Run one tick.
    pub fn step(&mut self) -> &Snapshot {
        let input = self.controller.act(&self.last);
        self.last = self.encounter_loop.tick(input);
        &self.last
    }

    /// Run `ticks` ticks, handing every snapshot to `observer`. Outstanding background results
    /// are applied before returning.
    pub fn run<F>(&mut self, ticks: u64, mut observer: F) -> &Snapshot
    where
        F: FnMut(&Snapshot),
    {
        for _ in 0..ticks {
            observer(self.step());
        }
        self.last = self.encounter_loop.settle();
        &self.last
    }

    /// Like [Simulation::run], but stops early once every item is classified.
    pub fn run_until_finished<F>(&mut self, max_ticks: u64, mut observer: F) -> &Snapshot
    where
        F: FnMut(&Snapshot),
    {
        for _ in 0..max_ticks {
            if self.finished() {
                break;
            }
            observer(self.step());
        }
        self.last = self.encounter_loop.settle();
        &self.last
    }

    /// True once no live item is waiting for a classification.
    pub fn finished(&self) -> bool {
        self.last.pending() == 0 && self.encounter_loop.in_flight() == 0
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.last
    }

    pub fn encounter_loop(&self) -> &EncounterLoop<_Classifier> {
        &self.encounter_loop
    }

    pub fn into_parts(self) -> (EncounterLoop<_Classifier>, _Controller) {
        (self.encounter_loop, self.controller)
    }
}
