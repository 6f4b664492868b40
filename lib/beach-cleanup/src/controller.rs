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

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use rand::seq::SliceRandom;

use crate::agent::InputVector;
use crate::item_pool::ItemState;
use crate::snapshot::Snapshot;
use crate::{Controller, Rng};

/// Heads straight for the nearest unscanned item, horizontally and vertically at once.
///
/// Items whose classification has already failed are skipped, so an unreadable image does not
/// pin the robot in place. Idle once nothing is left to visit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflexCollector {
    deadband: f64,
}

impl Default for ReflexCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ReflexCollector {
    pub fn new() -> Self {
        Self { deadband: 2.0 }
    }

    /// Stop moving along an axis once the centres are within `deadband` on it.
    pub fn with_deadband(deadband: f64) -> Self {
        Self {
            deadband: deadband.abs(),
        }
    }
}

impl Controller for ReflexCollector {
    fn act(&mut self, snapshot: &Snapshot) -> InputVector {
        let (ax, ay) = snapshot.agent.rect.center();
        let nearest = snapshot
            .items
            .iter()
            .filter(|item| item.state == ItemState::Unscanned && item.failed_attempts == 0)
            .map(|item| {
                let (ix, iy) = item.rect.center();
                (ix - ax, iy - ay)
            })
            .min_by(|a, b| (a.0 * a.0 + a.1 * a.1).total_cmp(&(b.0 * b.0 + b.1 * b.1)));
        let Some((dx, dy)) = nearest else {
            return InputVector::IDLE;
        };
        InputVector {
            left: dx < -self.deadband,
            right: dx > self.deadband,
            up: dy < -self.deadband,
            down: dy > self.deadband,
        }
    }
}

/// Replays a fixed sequence of inputs, then stays idle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptedController {
    inputs: VecDeque<InputVector>,
}

impl ScriptedController {
    pub fn new(inputs: impl IntoIterator<Item = InputVector>) -> Self {
        Self {
            inputs: inputs.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.inputs.len()
    }
}

impl Controller for ScriptedController {
    fn act(&mut self, _snapshot: &Snapshot) -> InputVector {
        self.inputs.pop_front().unwrap_or(InputVector::IDLE)
    }
}

/// Picks a random direction (diagonals and standing still included) and holds it for
/// `hold_ticks` ticks.
pub struct RandomWalk {
    rng: Rc<RefCell<Rng>>,
    hold_ticks: u32,
    current: InputVector,
    held: u32,
}

impl RandomWalk {
    pub fn new(rng: Rc<RefCell<Rng>>, hold_ticks: u32) -> Self {
        Self {
            rng,
            hold_ticks: hold_ticks.max(1),
            current: InputVector::IDLE,
            held: 0,
        }
    }
}

fn directions() -> [InputVector; 9] {
    [
        InputVector::IDLE,
        InputVector::LEFT,
        InputVector::RIGHT,
        InputVector::UP,
        InputVector::DOWN,
        InputVector::LEFT | InputVector::UP,
        InputVector::LEFT | InputVector::DOWN,
        InputVector::RIGHT | InputVector::UP,
        InputVector::RIGHT | InputVector::DOWN,
    ]
}

impl Controller for RandomWalk {
    fn act(&mut self, _snapshot: &Snapshot) -> InputVector {
        if self.held == 0 {
            let directions = directions();
            self.current = *directions
                .choose(&mut *self.rng.borrow_mut())
                .unwrap_or(&InputVector::IDLE);
            self.held = self.hold_ticks;
        }
        self.held -= 1;
        self.current
    }
}
