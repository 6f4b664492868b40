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

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use tracing::{debug, info};
use waste_classifier::{ImageHandle, Prediction};

use crate::geometry::{Rect, Size};
use crate::space::Bounded2DSpace;
use crate::{Rng, WorldError};

new_key_type! {
    /// Handle to an item in an [ItemPool].
    pub struct ItemKey;
}

/// Stable, human-readable item number, in spawn order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an item's picture comes from, and the label it was filed under if known.
#[derive(Debug, Clone)]
pub struct ContentSource {
    pub label: Option<String>,
    pub image: ImageHandle,
}

impl ContentSource {
    pub fn new(image: impl Into<ImageHandle>) -> Self {
        Self {
            label: None,
            image: image.into(),
        }
    }

    pub fn labeled(label: impl Into<String>, image: impl Into<ImageHandle>) -> Self {
        Self {
            label: Some(label.into()),
            image: image.into(),
        }
    }
}

/// Lifecycle of an item: `Unscanned -> Classifying -> Classified`. A failed classification goes
/// back to `Unscanned` so the next overlap retries it. `Classified` is final.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemState {
    Unscanned,
    Classifying,
    Classified(Prediction),
}

/// A piece of waste lying on the beach.
#[derive(Debug, Clone)]
pub struct Item {
    id: ItemId,
    source: ContentSource,
    rect: Rect,
    state: ItemState,
    failed_attempts: u32,
}

impl Item {
    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn state(&self) -> &ItemState {
        &self.state
    }

    pub fn is_unscanned(&self) -> bool {
        self.state == ItemState::Unscanned
    }

    pub fn prediction(&self) -> Option<&Prediction> {
        match &self.state {
            ItemState::Classified(prediction) => Some(prediction),
            _ => None,
        }
    }

    /// How many classifications of this item have failed so far.
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub(crate) fn begin_classifying(&mut self) -> bool {
        if self.state != ItemState::Unscanned {
            return false;
        }
        self.state = ItemState::Classifying;
        true
    }

    /// Attach a result. Returns false, and changes nothing, if the item was already classified.
    pub(crate) fn complete(&mut self, prediction: Prediction) -> bool {
        if matches!(self.state, ItemState::Classified(_)) {
            return false;
        }
        self.state = ItemState::Classified(prediction);
        true
    }

    /// Back to `Unscanned`. Returns the number of failures so far.
    pub(crate) fn fail(&mut self) -> u32 {
        if !matches!(self.state, ItemState::Classified(_)) {
            self.state = ItemState::Unscanned;
        }
        self.failed_attempts += 1;
        self.failed_attempts
    }
}

/// Content references drawn without replacement. Once empty it stays empty.
#[derive(Debug, Clone)]
pub struct SourceDeck {
    remaining: Vec<ContentSource>,
}

impl SourceDeck {
    /// Shuffle `sources` into a deck. An empty list is [WorldError::ContentSourceEmpty]: a run
    /// with nothing to spawn is a startup error, not an empty beach.
    pub fn new(mut sources: Vec<ContentSource>, rng: &mut Rng) -> Result<Self, WorldError> {
        if sources.is_empty() {
            return Err(WorldError::ContentSourceEmpty);
        }
        sources.shuffle(rng);
        // draw pops from the back, so reverse to draw in shuffled order
        sources.reverse();
        Ok(Self { remaining: sources })
    }

    pub fn draw(&mut self) -> Option<ContentSource> {
        self.remaining.pop()
    }

    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

/// How items are placed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Most live items at any time.
    pub max_items: usize,

    /// Size of every item.
    pub item_size: Size,

    /// Minimum distance from an item's centre to the edge of the space.
    pub spawn_margin: f64,
}

/// The live items.
///
/// Items are spawned once, in a batch, by [ItemPool::fill], and stay until the run ends or they
/// are explicitly removed. Iteration order is spawn order.
#[derive(Debug, Clone)]
pub struct ItemPool {
    space: Bounded2DSpace,
    config: PoolConfig,
    deck: SourceDeck,
    items: SlotMap<ItemKey, Item>,
    order: Vec<ItemKey>,
    next_id: u64,
}

impl ItemPool {
    /// The spawn margin must keep a whole item inside `space`, i.e. be at least half the item
    /// size, and must leave room to place it.
    pub fn new(
        space: Bounded2DSpace,
        config: PoolConfig,
        deck: SourceDeck,
    ) -> Result<Self, WorldError> {
        if !config.item_size.is_drawable() {
            return Err(WorldError::InvalidItemSize(config.item_size));
        }
        let required = config.item_size.w.max(config.item_size.h) / 2.0;
        if config.spawn_margin < required {
            return Err(WorldError::SpawnMarginTooSmall {
                margin: config.spawn_margin,
                required,
            });
        }
        space.check_margin(config.spawn_margin)?;
        Ok(Self {
            space,
            config,
            deck,
            items: SlotMap::with_key(),
            order: Vec::new(),
            next_id: 0,
        })
    }

    /// Place an item showing `source` at a random point. Fails with [WorldError::PoolFull], and
    /// leaves the pool untouched, when `max_items` items are already live.
    pub fn spawn(&mut self, source: ContentSource, rng: &mut Rng) -> Result<ItemKey, WorldError> {
        if self.is_full() {
            return Err(WorldError::PoolFull(self.config.max_items));
        }
        let center = self.space.random_point(self.config.spawn_margin, rng)?;
        self.spawn_at(source, center)
    }

    /// Place an item showing `source` centred on `center`. The centre must respect the spawn
    /// margin, otherwise [WorldError::SpawnOutsideSpace].
    pub fn spawn_at(
        &mut self,
        source: ContentSource,
        center: (f64, f64),
    ) -> Result<ItemKey, WorldError> {
        if self.is_full() {
            return Err(WorldError::PoolFull(self.config.max_items));
        }
        let (cx, cy) = center;
        let bounds = self.space.bounds();
        let margin = self.config.spawn_margin;
        if cx < bounds.left() + margin
            || cx > bounds.right() - margin
            || cy < bounds.top() + margin
            || cy > bounds.bottom() - margin
        {
            return Err(WorldError::SpawnOutsideSpace { x: cx, y: cy });
        }
        let item = Item {
            id: ItemId(self.next_id),
            source,
            rect: Rect::from_center(cx, cy, self.config.item_size),
            state: ItemState::Unscanned,
            failed_attempts: 0,
        };
        self.next_id += 1;
        info!(
            item = %item.id,
            image = %item.source.image,
            x = cx,
            y = cy,
            "spawned item"
        );
        let key = self.items.insert(item);
        self.order.push(key);
        Ok(key)
    }

    /// Spawn the next source from the deck. `Ok(None)` once the deck is exhausted.
    pub fn spawn_next(&mut self, rng: &mut Rng) -> Result<Option<ItemKey>, WorldError> {
        if self.is_full() {
            return Err(WorldError::PoolFull(self.config.max_items));
        }
        match self.deck.draw() {
            Some(source) => self.spawn(source, rng).map(Some),
            None => Ok(None),
        }
    }

    /// Spawn from the deck until the pool is full or the deck runs out. Returns how many items
    /// were spawned.
    pub fn fill(&mut self, rng: &mut Rng) -> Result<usize, WorldError> {
        let mut spawned = 0;
        while !self.is_full() {
            match self.spawn_next(rng)? {
                Some(_) => spawned += 1,
                None => {
                    debug!(live = self.len(), "source deck exhausted");
                    break;
                }
            }
        }
        Ok(spawned)
    }

    pub fn remove(&mut self, key: ItemKey) -> Option<Item> {
        let item = self.items.remove(key)?;
        self.order.retain(|k| *k != key);
        debug!(item = %item.id, "removed item");
        Some(item)
    }

    pub fn get(&self, key: ItemKey) -> Option<&Item> {
        self.items.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: ItemKey) -> Option<&mut Item> {
        self.items.get_mut(key)
    }

    /// Live items in spawn order.
    pub fn active_items(&self) -> impl Iterator<Item = (ItemKey, &Item)> + '_ {
        self.order.iter().map(move |key| (*key, &self.items[*key]))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.config.max_items
    }

    pub fn max_items(&self) -> usize {
        self.config.max_items
    }

    /// Sources left in the deck.
    pub fn remaining_sources(&self) -> usize {
        self.deck.remaining()
    }
}
