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

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use beach_cleanup::{Bounded2DSpace, PoolConfig, Size};
use serde::Deserialize;

/// Everything a run needs, read from a TOML file. Every field has a default, so an empty file
/// (or no file at all) is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    pub window: WindowConfig,
    pub agent: AgentConfig,
    pub items: ItemsConfig,
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub width: f64,
    pub height: f64,
    /// The beach is the window minus this margin on every side.
    pub margin: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1000.0,
            height: 700.0,
            margin: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub width: f64,
    pub height: f64,
    pub speed: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            width: 48.0,
            height: 48.0,
            speed: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ItemsConfig {
    pub count: usize,
    pub size: f64,
    /// Distance between an item centre and the beach edge.
    pub margin: f64,
}

impl Default for ItemsConfig {
    fn default() -> Self {
        Self {
            count: 4,
            size: 64.0,
            margin: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    pub root: PathBuf,
    pub max_images: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("dataset"),
            max_images: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub weights: PathBuf,
    pub classes: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights: PathBuf::from("model/weights.json"),
            classes: PathBuf::from("model/classes.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerKind {
    /// Walk to the nearest unscanned item.
    Reflex,
    /// Wander in random directions.
    Random,
    /// Stand still.
    Idle,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub seed: u64,
    pub ticks: u64,
    /// Print a snapshot every this many ticks. 0 prints only the last one.
    pub render_every: u64,
    pub json: bool,
    /// Number of classifier worker threads. 0 classifies inline, blocking the tick.
    pub background_threads: usize,
    pub controller: ControllerKind,
    /// Ticks a random walk holds one direction.
    pub hold_ticks: u32,
    /// Stop as soon as every item is classified.
    pub stop_when_finished: bool,
    /// Log filter used when RUST_LOG is not set, e.g. "debug" or "beach_cleanup=trace".
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            ticks: 2_000,
            render_every: 0,
            json: false,
            background_threads: 0,
            controller: ControllerKind::Reflex,
            hold_ticks: 30,
            stop_when_finished: true,
            log_level: "info".to_string(),
        }
    }
}

impl SimConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: SimConfig = toml::from_str(text).context("invalid configuration")?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn space(&self) -> anyhow::Result<Bounded2DSpace> {
        Ok(Bounded2DSpace::inset(
            self.window.width,
            self.window.height,
            self.window.margin,
        )?)
    }

    pub fn agent_size(&self) -> Size {
        Size::new(self.agent.width, self.agent.height)
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            max_items: self.items.count,
            item_size: Size::square(self.items.size),
            spawn_margin: self.items.margin,
        }
    }

    /// Reject configurations that would let a rectangle leave the beach, before anything runs.
    pub fn validate(&self) -> anyhow::Result<()> {
        let space = self.space()?;
        let bounds = space.bounds();
        if !self.agent_size().is_drawable() {
            bail!(
                "agent size must be finite and positive, got {}x{}",
                self.agent.width,
                self.agent.height
            );
        }
        if self.agent.width > bounds.w || self.agent.height > bounds.h {
            bail!(
                "agent {}x{} is larger than the beach {}x{}",
                self.agent.width,
                self.agent.height,
                bounds.w,
                bounds.h
            );
        }
        if !self.agent.speed.is_finite() || self.agent.speed < 0.0 {
            bail!("agent speed must be finite and non-negative");
        }
        if self.items.count == 0 {
            bail!("items.count must be at least 1");
        }
        if !Size::square(self.items.size).is_drawable() {
            bail!("items.size must be finite and positive, got {}", self.items.size);
        }
        if !self.items.margin.is_finite() {
            bail!("items.margin must be finite, got {}", self.items.margin);
        }
        if self.items.margin < self.items.size / 2.0 {
            bail!(
                "items.margin {} must be at least half of items.size {}",
                self.items.margin,
                self.items.size
            );
        }
        space.check_margin(self.items.margin)?;
        if self.dataset.max_images == 0 {
            bail!("dataset.max_images must be at least 1");
        }
        Ok(())
    }
}
