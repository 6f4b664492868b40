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

#![warn(missing_docs)]

//! Headless beach cleanup simulation.
//!
//! Usage:
//!   beach-cleanup-sim run --dataset data/trashnet --model model/weights.json
//!   beach-cleanup-sim classify photo.jpg
//!   beach-cleanup-sim classes data/trashnet

mod config;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Context;
use beach_cleanup::{
    Agent, ContentSource, Controller, EncounterLoop, ItemPool, RandomWalk, ReflexCollector, Rng,
    ScriptedController, Simulation, Snapshot, SourceDeck,
};
use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use waste_classifier::{ImageClassifier, ImageHandle, SoftmaxClassifier, UnavailableClassifier};

use crate::config::{ControllerKind, ModelConfig, SimConfig};

type SharedClassifier = Box<dyn ImageClassifier + Send + Sync>;

#[derive(Parser)]
#[command(
    name = "beach-cleanup-sim",
    about = "A robot walks a beach and classifies the litter it runs into"
)]
struct Cli {
    /// TOML configuration file. Flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the simulation.
    Run(RunArgs),
    /// Classify a single image and print the label.
    Classify {
        image: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Print the class names found under a dataset root.
    Classes { root: PathBuf },
}

#[derive(Args)]
struct ModelArgs {
    /// Softmax weights (JSON).
    #[arg(long)]
    model: Option<PathBuf>,

    /// Class vocabulary (JSON list of labels).
    #[arg(long)]
    classes: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    /// Dataset root with one subdirectory per label.
    #[arg(long)]
    dataset: Option<PathBuf>,

    #[command(flatten)]
    model: ModelArgs,

    /// Maximum number of ticks.
    #[arg(long)]
    ticks: Option<u64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Print a snapshot every N ticks.
    #[arg(long)]
    render_every: Option<u64>,

    /// Print snapshots as JSON lines.
    #[arg(long)]
    json: bool,

    /// Classify on N background threads instead of inside the tick.
    #[arg(long, value_name = "THREADS")]
    background: Option<usize>,

    #[arg(long, value_enum)]
    controller: Option<ControllerKind>,
}

impl ModelArgs {
    fn apply(self, model: &mut ModelConfig) {
        if let Some(weights) = self.model {
            model.weights = weights;
        }
        if let Some(classes) = self.classes {
            model.classes = classes;
        }
    }
}

impl RunArgs {
    fn apply(self, config: &mut SimConfig) {
        if let Some(root) = self.dataset {
            config.dataset.root = root;
        }
        self.model.apply(&mut config.model);
        if let Some(ticks) = self.ticks {
            config.run.ticks = ticks;
        }
        if let Some(seed) = self.seed {
            config.run.seed = seed;
        }
        if let Some(render_every) = self.render_every {
            config.run.render_every = render_every;
        }
        if self.json {
            config.run.json = true;
        }
        if let Some(threads) = self.background {
            config.run.background_threads = threads;
        }
        if let Some(controller) = self.controller {
            config.run.controller = controller;
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let result = load_config(cli.config.as_deref()).and_then(|mut config| {
        init_logging(&config.run.log_level);
        match cli.command {
            Command::Run(args) => {
                args.apply(&mut config);
                run(&config)
            }
            Command::Classify { image, model } => {
                model.apply(&mut config.model);
                classify(&config.model, image)
            }
            Command::Classes { root } => classes(root),
        }
    });

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

// Logs go to stderr so --json output stays machine readable. RUST_LOG wins over the configured
// level; an unparsable level falls back to info.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SimConfig> {
    match path {
        Some(path) => SimConfig::load(path),
        None => Ok(SimConfig::default()),
    }
}

// A missing or broken model is not fatal for a run: items just never get a label.
fn load_classifier(model: &ModelConfig) -> SharedClassifier {
    match SoftmaxClassifier::load(&model.weights, &model.classes) {
        Ok(classifier) => Box::new(classifier),
        Err(error) => {
            warn!(%error, "running without a classifier");
            Box::new(UnavailableClassifier::new(error.to_string()))
        }
    }
}

fn run(config: &SimConfig) -> anyhow::Result<()> {
    config.validate()?;
    let rng = Rc::new(RefCell::new(Rng::seed_from_u64(config.run.seed)));

    let root = &config.dataset.root;
    let images = waste_dataset::discover(root, config.dataset.max_images, &mut *rng.borrow_mut())
        .with_context(|| format!("cannot load dataset {}", root.display()))?;
    info!(root = %root.display(), images = images.len(), "dataset loaded");
    let sources = images
        .into_iter()
        .map(|image| ContentSource::labeled(image.label, image.path))
        .collect();
    let deck = SourceDeck::new(sources, &mut *rng.borrow_mut())
        .with_context(|| format!("no images under {}", root.display()))?;

    let space = config.space()?;
    let agent = Agent::new(config.agent_size(), config.agent.speed, &space)?;
    let mut pool = ItemPool::new(space, config.pool(), deck)?;
    let spawned = pool.fill(&mut *rng.borrow_mut())?;
    info!(spawned, "beach ready");

    let classifier = load_classifier(&config.model);
    let encounter_loop = match config.run.background_threads {
        0 => EncounterLoop::new(space, agent, pool, classifier),
        threads => EncounterLoop::with_background(space, agent, pool, classifier, threads)?,
    };
    let controller: Box<dyn Controller> = match config.run.controller {
        ControllerKind::Reflex => Box::new(ReflexCollector::new()),
        ControllerKind::Random => {
            Box::new(RandomWalk::new(Rc::clone(&rng), config.run.hold_ticks))
        }
        ControllerKind::Idle => Box::new(ScriptedController::default()),
    };

    let mut simulation = Simulation::new(encounter_loop, controller);
    let every = config.run.render_every;
    let json = config.run.json;
    let observer = |snapshot: &Snapshot| {
        if every > 0 && snapshot.tick % every == 0 {
            render(snapshot, json);
        }
    };
    let last = if config.run.stop_when_finished {
        simulation.run_until_finished(config.run.ticks, observer)
    } else {
        simulation.run(config.run.ticks, observer)
    };

    render(last, json);
    if !json {
        println!("{}", last.tally);
    }
    info!(
        ticks = last.tick,
        classified = last.tally.classified,
        correct = last.tally.correct,
        failures = last.tally.failures,
        "run finished"
    );
    Ok(())
}

fn render(snapshot: &Snapshot, json: bool) {
    if !json {
        println!("{}", snapshot);
        return;
    }
    match serde_json::to_string(snapshot) {
        Ok(line) => println!("{}", line),
        Err(error) => warn!(%error, tick = snapshot.tick, "cannot serialize snapshot"),
    }
}

fn classify(model: &ModelConfig, image: PathBuf) -> anyhow::Result<()> {
    let classifier = SoftmaxClassifier::load(&model.weights, &model.classes)?;
    let prediction = classifier
        .classify(&ImageHandle::from(image.clone()))
        .with_context(|| format!("cannot classify {}", image.display()))?;
    match prediction.confidence {
        Some(confidence) => println!("{} ({:.1}%)", prediction.label, confidence * 100.0),
        None => println!("{}", prediction.label),
    }
    Ok(())
}

fn classes(root: PathBuf) -> anyhow::Result<()> {
    for name in waste_dataset::class_names(&root)? {
        println!("{}", name);
    }
    Ok(())
}
