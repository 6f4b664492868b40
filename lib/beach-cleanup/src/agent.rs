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

use serde::{Deserialize, Serialize};

use crate::geometry::{Rect, Size};
use crate::space::Bounded2DSpace;
use crate::WorldError;

/// Directional input for one tick. Opposite directions cancel out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InputVector {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl InputVector {
    pub const IDLE: InputVector = InputVector {
        left: false,
        right: false,
        up: false,
        down: false,
    };
    pub const LEFT: InputVector = InputVector {
        left: true,
        ..InputVector::IDLE
    };
    pub const RIGHT: InputVector = InputVector {
        right: true,
        ..InputVector::IDLE
    };
    pub const UP: InputVector = InputVector {
        up: true,
        ..InputVector::IDLE
    };
    pub const DOWN: InputVector = InputVector {
        down: true,
        ..InputVector::IDLE
    };

    /// Horizontal and vertical direction, each -1, 0 or 1. Up is negative y.
    pub fn axes(&self) -> (i8, i8) {
        let x = i8::from(self.right) - i8::from(self.left);
        let y = i8::from(self.down) - i8::from(self.up);
        (x, y)
    }

    pub fn is_idle(&self) -> bool {
        self.axes() == (0, 0)
    }
}

impl std::ops::BitOr for InputVector {
    type Output = InputVector;

    fn bitor(self, rhs: InputVector) -> InputVector {
        InputVector {
            left: self.left || rhs.left,
            right: self.right || rhs.right,
            up: self.up || rhs.up,
            down: self.down || rhs.down,
        }
    }
}

/// The robot. Its rectangle is inside the space after every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    rect: Rect,
    speed: f64,
}

impl Agent {
    /// Create an agent of `size` at the centre of `space`.
    pub fn new(size: Size, speed: f64, space: &Bounded2DSpace) -> Result<Self, WorldError> {
        let (cx, cy) = space.center();
        Self::at(Rect::from_center(cx, cy, size), speed, space)
    }

    /// Create an agent at `rect`, moved inside `space` if needed.
    pub fn at(rect: Rect, speed: f64, space: &Bounded2DSpace) -> Result<Self, WorldError> {
        let bounds = space.bounds();
        let placed = rect.x.is_finite() && rect.y.is_finite();
        if !placed || !rect.size().is_drawable() || rect.w > bounds.w || rect.h > bounds.h {
            return Err(WorldError::AgentDoesNotFit(rect.size()));
        }
        if !speed.is_finite() || speed < 0.0 {
            return Err(WorldError::InvalidSpeed(speed));
        }
        Ok(Self {
            rect: space.clamp(rect),
            speed,
        })
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Move by `speed` on every active axis, then clamp into `space`.
    ///
    /// Diagonals are not normalised: left+up moves `speed` left and `speed` up.
    pub fn update(&mut self, input: InputVector, space: &Bounded2DSpace) {
        let (x, y) = input.axes();
        let dx = f64::from(x) * self.speed;
        let dy = f64::from(y) * self.speed;
        self.rect = space.clamp(self.rect.translate(dx, dy));
    }
}
