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

use rand::Rng as _;
use serde::{Deserialize, Serialize};

use crate::geometry::Rect;
use crate::{Rng, WorldError};

/// The rectangle everything lives in. No agent or spawn position ever leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounded2DSpace {
    bounds: Rect,
}

impl Bounded2DSpace {
    pub fn new(bounds: Rect) -> Result<Self, WorldError> {
        let finite = [bounds.x, bounds.y, bounds.w, bounds.h]
            .iter()
            .all(|v| v.is_finite());
        if !finite || bounds.is_empty() {
            return Err(WorldError::InvalidSpace(bounds));
        }
        Ok(Self { bounds })
    }

    /// The area of a `width x height` window minus a `margin` on every side, e.g. the strip of
    /// beach inside a screen.
    pub fn inset(width: f64, height: f64, margin: f64) -> Result<Self, WorldError> {
        Self::new(Rect::new(
            margin,
            margin,
            width - 2.0 * margin,
            height - 2.0 * margin,
        ))
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn center(&self) -> (f64, f64) {
        self.bounds.center()
    }

    /// Whether `rect` is fully inside the space.
    pub fn contains(&self, rect: &Rect) -> bool {
        self.bounds.contains(rect)
    }

    /// Smallest translation of `rect` that puts it fully inside the space. On an axis where
    /// `rect` is longer than the space it is centred instead.
    pub fn clamp(&self, rect: Rect) -> Rect {
        Rect {
            x: clamp_axis(rect.x, rect.w, self.bounds.left(), self.bounds.right()),
            y: clamp_axis(rect.y, rect.h, self.bounds.top(), self.bounds.bottom()),
            ..rect
        }
    }

    /// Uniformly sampled point at least `margin` away from every edge.
    pub fn random_point(&self, margin: f64, rng: &mut Rng) -> Result<(f64, f64), WorldError> {
        let (x_lo, x_hi, y_lo, y_hi) = self.inner_ranges(margin)?;
        Ok((rng.gen_range(x_lo..=x_hi), rng.gen_range(y_lo..=y_hi)))
    }

    /// Check that `margin` leaves room for at least one point.
    pub fn check_margin(&self, margin: f64) -> Result<(), WorldError> {
        self.inner_ranges(margin).map(|_| ())
    }

    fn inner_ranges(&self, margin: f64) -> Result<(f64, f64, f64, f64), WorldError> {
        if !margin.is_finite() || margin < 0.0 {
            return Err(WorldError::MarginExceedsSpace(margin));
        }
        let x_lo = self.bounds.left() + margin;
        let x_hi = self.bounds.right() - margin;
        let y_lo = self.bounds.top() + margin;
        let y_hi = self.bounds.bottom() - margin;
        if x_lo > x_hi || y_lo > y_hi {
            return Err(WorldError::MarginExceedsSpace(margin));
        }
        Ok((x_lo, x_hi, y_lo, y_hi))
    }
}

fn clamp_axis(position: f64, length: f64, min: f64, max: f64) -> f64 {
    if length >= max - min {
        min + (max - min - length) / 2.0
    } else {
        position.clamp(min, max - length)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;

    use super::*;
    use crate::Rng;

    const EPSILON: f64 = 1e-6;

    fn beach() -> Bounded2DSpace {
        Bounded2DSpace::inset(1000.0, 700.0, 80.0).unwrap()
    }

    fn inside_within_epsilon(space: &Bounded2DSpace, rect: &Rect) -> bool {
        let b = space.bounds();
        rect.left() >= b.left() - EPSILON
            && rect.right() <= b.right() + EPSILON
            && rect.top() >= b.top() - EPSILON
            && rect.bottom() <= b.bottom() + EPSILON
    }

    #[test]
    fn test_inset_bounds() {
        assert_eq!(beach().bounds(), Rect::new(80.0, 80.0, 840.0, 540.0));
    }

    #[test]
    fn test_degenerate_space_is_rejected() {
        assert!(matches!(
            Bounded2DSpace::inset(100.0, 100.0, 50.0),
            Err(WorldError::InvalidSpace(_))
        ));
        assert!(Bounded2DSpace::new(Rect::new(0.0, 0.0, f64::NAN, 1.0)).is_err());
    }

    #[test]
    fn test_clamp_leaves_inside_rect_alone() {
        let r = Rect::new(200.0, 200.0, 48.0, 48.0);
        assert_eq!(beach().clamp(r), r);
    }

    #[test]
    fn test_clamp_is_smallest_translation() {
        let space = beach();
        assert_eq!(
            space.clamp(Rect::new(-500.0, 300.0, 48.0, 48.0)),
            Rect::new(80.0, 300.0, 48.0, 48.0)
        );
        assert_eq!(
            space.clamp(Rect::new(915.0, 610.0, 48.0, 48.0)),
            Rect::new(872.0, 572.0, 48.0, 48.0)
        );
    }

    #[test]
    fn test_clamp_centres_oversized_rect() {
        let space = Bounded2DSpace::new(Rect::new(0.0, 0.0, 100.0, 100.0)).unwrap();
        let clamped = space.clamp(Rect::new(500.0, 10.0, 120.0, 20.0));
        assert_eq!(clamped, Rect::new(-10.0, 10.0, 120.0, 20.0));
    }

    #[test]
    fn test_random_point_respects_margin() {
        let space = beach();
        let mut rng = Rng::seed_from_u64(42);
        for _ in 0..1000 {
            let (x, y) = space.random_point(40.0, &mut rng).unwrap();
            assert!((120.0..=880.0).contains(&x), "x: {}", x);
            assert!((120.0..=580.0).contains(&y), "y: {}", y);
        }
    }

    #[test]
    fn test_random_point_is_deterministic_for_a_seed() {
        let space = beach();
        let mut a = Rng::seed_from_u64(7);
        let mut b = Rng::seed_from_u64(7);
        for _ in 0..10 {
            assert_eq!(
                space.random_point(40.0, &mut a).unwrap(),
                space.random_point(40.0, &mut b).unwrap()
            );
        }
    }

    #[test]
    fn test_random_point_margin_too_large() {
        let space = beach();
        let mut rng = Rng::seed_from_u64(42);
        assert_eq!(
            space.random_point(300.0, &mut rng),
            Err(WorldError::MarginExceedsSpace(300.0))
        );
        assert!(space.random_point(-1.0, &mut rng).is_err());
    }

    #[test]
    fn test_random_point_margin_exactly_half_gives_center() {
        let space = Bounded2DSpace::new(Rect::new(0.0, 0.0, 100.0, 100.0)).unwrap();
        let mut rng = Rng::seed_from_u64(42);
        assert_eq!(space.random_point(50.0, &mut rng), Ok((50.0, 50.0)));
    }

    proptest! {
        #[test]
        fn test_clamp_never_escapes(
            x in -1e7f64..1e7,
            y in -1e7f64..1e7,
            w in 0.0f64..800.0,
            h in 0.0f64..500.0,
        ) {
            let space = beach();
            let clamped = space.clamp(Rect::new(x, y, w, h));
            prop_assert!(inside_within_epsilon(&space, &clamped), "{:?}", clamped);
            prop_assert_eq!(clamped.size(), Rect::new(x, y, w, h).size());
        }

        #[test]
        fn test_clamp_is_idempotent(
            x in -1e4f64..1e4,
            y in -1e4f64..1e4,
        ) {
            let space = beach();
            let once = space.clamp(Rect::new(x, y, 48.0, 48.0));
            prop_assert_eq!(space.clamp(once), once);
        }
    }
}
