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

use std::sync::Arc;

use tracing::{debug, info, warn};
use waste_classifier::{ClassifierError, ImageClassifier, Prediction};

use crate::agent::{Agent, InputVector};
use crate::background::{BackgroundClassifier, Completed};
use crate::item_pool::{Item, ItemKey, ItemPool};
use crate::snapshot::{AgentView, ConfidenceBand, Encounter, ItemView, Snapshot, Status, Verdict};
use crate::space::Bounded2DSpace;
use crate::tally::Tally;
use crate::WorldError;

enum Dispatch<_Classifier> {
    /// classify runs inside the tick, blocking it.
    Inline(_Classifier),

    /// classify runs on worker threads; results land on a later tick.
    Background(BackgroundClassifier),
}

/// The per-tick orchestrator: move the agent, find the items it touches, classify each newly
/// touched item exactly once.
///
/// One tick is: apply finished background results, move the agent, detect overlaps, classify
/// every overlapping `Unscanned` item in spawn order, and return a [Snapshot]. Classification
/// errors never escape a tick; they become the [Status] of the snapshot and the item stays
/// `Unscanned` so the next overlapping tick retries it.
pub struct EncounterLoop<_Classifier>
where
    _Classifier: ImageClassifier,
{
    space: Bounded2DSpace,
    agent: Agent,
    pool: ItemPool,
    dispatch: Dispatch<_Classifier>,
    tick: u64,
    status: Status,
    tally: Tally,
}

impl<_Classifier> EncounterLoop<_Classifier>
where
    _Classifier: ImageClassifier,
{
    /// Classify inline: every classify call blocks the tick it happens in.
    pub fn new(space: Bounded2DSpace, agent: Agent, pool: ItemPool, classifier: _Classifier) -> Self {
        Self::with_dispatch(space, agent, pool, Dispatch::Inline(classifier))
    }

    fn with_dispatch(
        space: Bounded2DSpace,
        agent: Agent,
        pool: ItemPool,
        dispatch: Dispatch<_Classifier>,
    ) -> Self {
        Self {
            space,
            agent,
            pool,
            dispatch,
            tick: 0,
            status: Status::Waiting,
            tally: Tally::default(),
        }
    }

    /// Run one tick with `input` and return the resulting snapshot.
    pub fn tick(&mut self, input: InputVector) -> Snapshot {
        self.tick += 1;
        self.apply_ready();

        self.agent.update(input, &self.space);

        let touched = self.overlapping();
        if !touched.is_empty() {
            debug!(tick = self.tick, touched = touched.len(), "agent overlaps items");
        }
        for key in touched {
            self.encounter(key);
        }

        self.snapshot()
    }

    /// Items whose rectangle intersects the agent's, in spawn order.
    pub fn overlapping(&self) -> Vec<ItemKey> {
        let agent = self.agent.rect();
        self.pool
            .active_items()
            .filter(|(_, item)| item.rect().intersects(&agent))
            .map(|(key, _)| key)
            .collect()
    }

    fn encounter(&mut self, key: ItemKey) {
        let Some(item) = self.pool.get_mut(key) else {
            return;
        };
        if !item.begin_classifying() {
            return;
        }
        let image = item.source().image.clone();
        let outcome = match &mut self.dispatch {
            Dispatch::Inline(classifier) => classifier.classify(&image),
            Dispatch::Background(worker) => {
                debug!(tick = self.tick, item = %item.id(), "submitted for classification");
                worker.submit(key, image);
                return;
            }
        };
        self.apply_outcome(key, outcome);
    }

    fn apply_ready(&mut self) {
        let completed = match &mut self.dispatch {
            Dispatch::Background(worker) => worker.ready(),
            Dispatch::Inline(_) => return,
        };
        self.apply_completed(completed);
    }

    // Results are applied in spawn order no matter which worker finished first.
    fn apply_completed(&mut self, mut completed: Vec<Completed>) {
        completed.sort_by_key(|(key, _)| self.pool.get(*key).map(Item::id));
        for (key, outcome) in completed {
            self.apply_outcome(key, outcome);
        }
    }

    fn apply_outcome(&mut self, key: ItemKey, outcome: Result<Prediction, ClassifierError>) {
        let tick = self.tick;
        let Some(item) = self.pool.get_mut(key) else {
            debug!(tick, "dropping classification of a removed item");
            return;
        };
        let id = item.id();
        match outcome {
            Ok(prediction) => {
                if !item.complete(prediction.clone()) {
                    return;
                }
                let actual = item.source().label.clone();
                let verdict = Verdict::judge(actual.as_deref(), &prediction.label);
                self.tally.record(actual.as_deref(), verdict);
                info!(
                    tick,
                    item = %id,
                    predicted = %prediction.label,
                    confidence = ?prediction.confidence,
                    actual = ?actual,
                    ?verdict,
                    "classified item"
                );
                self.status = Status::Classified(Encounter {
                    item: id,
                    actual,
                    band: ConfidenceBand::of(prediction.confidence),
                    prediction,
                    verdict,
                });
            }
            Err(error) => {
                let attempts = item.fail();
                self.tally.record_failure();
                if attempts == 1 {
                    warn!(tick, item = %id, %error, "classification failed, item stays unscanned");
                } else {
                    debug!(tick, item = %id, attempts, %error, "classification failed again");
                }
                self.status = match &error {
                    ClassifierError::ModelUnavailable(_) => Status::NoResult {
                        item: id,
                        reason: error.to_string(),
                    },
                    ClassifierError::ImageDecodeError(_) => Status::DecodeFailed {
                        item: id,
                        message: error.to_string(),
                    },
                };
            }
        }
    }

    /// Wait for every background classification to finish and apply the results. Inline loops
    /// have nothing to wait for.
    pub fn settle(&mut self) -> Snapshot {
        let completed = match &mut self.dispatch {
            Dispatch::Background(worker) => worker.wait_all(),
            Dispatch::Inline(_) => Vec::new(),
        };
        self.apply_completed(completed);
        self.snapshot()
    }

    /// Classifications submitted but not yet applied.
    pub fn in_flight(&self) -> usize {
        match &self.dispatch {
            Dispatch::Background(worker) => worker.in_flight(),
            Dispatch::Inline(_) => 0,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tick: self.tick,
            bounds: self.space.bounds(),
            agent: AgentView {
                rect: self.agent.rect(),
            },
            items: self
                .pool
                .active_items()
                .map(|(_, item)| ItemView {
                    id: item.id(),
                    rect: item.rect(),
                    state: item.state().clone(),
                    actual: item.source().label.clone(),
                    failed_attempts: item.failed_attempts(),
                })
                .collect(),
            status: self.status.clone(),
            tally: self.tally.clone(),
        }
    }

    pub fn space(&self) -> &Bounded2DSpace {
        &self.space
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn pool(&self) -> &ItemPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ItemPool {
        &mut self.pool
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.tick
    }
}

impl<_Classifier> EncounterLoop<_Classifier>
where
    _Classifier: ImageClassifier + Send + Sync + 'static,
{
    /// Classify on `threads` background workers. Touched items become `Classifying` until their
    /// result is applied at the start of a later tick (or by [EncounterLoop::settle]), so an
    /// item is never submitted twice.
    pub fn with_background(
        space: Bounded2DSpace,
        agent: Agent,
        pool: ItemPool,
        classifier: _Classifier,
        threads: usize,
    ) -> Result<Self, WorldError> {
        let worker = BackgroundClassifier::new(Arc::new(classifier), threads)?;
        Ok(Self::with_dispatch(
            space,
            agent,
            pool,
            Dispatch::Background(worker),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::atomic::{fence, AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};

    use rand::SeedableRng;
    use waste_classifier::{ImageHandle, UnavailableClassifier};

    use super::*;
    use crate::geometry::{Rect, Size};
    use crate::item_pool::{ContentSource, ItemId, ItemState, PoolConfig, SourceDeck};
    use crate::Rng;

    // Replays scripted responses, then keeps returning the fallback. Records what it was asked
    // to classify.
    struct MockClassifier {
        responses: RefCell<VecDeque<Result<Prediction, ClassifierError>>>,
        fallback: Result<Prediction, ClassifierError>,
        calls: Cell<usize>,
        seen: RefCell<Vec<String>>,
    }

    impl MockClassifier {
        fn always(prediction: Prediction) -> Self {
            Self::scripted(Vec::new(), Ok(prediction))
        }

        fn scripted(
            responses: Vec<Result<Prediction, ClassifierError>>,
            fallback: Result<Prediction, ClassifierError>,
        ) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                fallback,
                calls: Cell::new(0),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl ImageClassifier for MockClassifier {
        fn classify(&self, image: &ImageHandle) -> Result<Prediction, ClassifierError> {
            self.calls.set(self.calls.get() + 1);
            self.seen.borrow_mut().push(image.to_string());
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    struct CountingClassifier {
        calls: Arc<AtomicUsize>,
    }

    impl ImageClassifier for CountingClassifier {
        fn classify(&self, _image: &ImageHandle) -> Result<Prediction, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Prediction::new("Plastic", 0.8))
        }
    }

    // Blocks every classify call until the test sends on the matching channel.
    struct GatedClassifier {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl ImageClassifier for GatedClassifier {
        fn classify(&self, _image: &ImageHandle) -> Result<Prediction, ClassifierError> {
            let gate = self
                .gate
                .lock()
                .map_err(|_| ClassifierError::ModelUnavailable("gate poisoned".to_string()))?;
            let _ = gate.recv();
            Ok(Prediction::new("Metal", 0.6))
        }
    }

    fn space() -> Bounded2DSpace {
        Bounded2DSpace::new(Rect::new(0.0, 0.0, 1000.0, 700.0)).unwrap()
    }

    // Agent is 48x48 centred on (500, 350): x in [476, 524).
    fn agent() -> Agent {
        Agent::new(Size::square(48.0), 4.0, &space()).unwrap()
    }

    // Items are 64x64, placed by centre.
    fn pool_with(centers: &[(&str, (f64, f64))]) -> ItemPool {
        let mut rng = Rng::seed_from_u64(42);
        let deck = SourceDeck::new(
            vec![ContentSource::new(PathBuf::from("unused.png"))],
            &mut rng,
        )
        .unwrap();
        let mut pool = ItemPool::new(
            space(),
            PoolConfig {
                max_items: 8,
                item_size: Size::square(64.0),
                spawn_margin: 40.0,
            },
            deck,
        )
        .unwrap();
        for (name, center) in centers {
            let source = ContentSource::labeled("Glass", PathBuf::from(format!("{}.png", name)));
            pool.spawn_at(source, *center).unwrap();
        }
        pool
    }

    fn state_of(snapshot: &Snapshot, id: u64) -> ItemState {
        snapshot.item(ItemId(id)).unwrap().state.clone()
    }

    #[test]
    fn test_overlapping_item_is_classified_exactly_once() {
        let classifier = MockClassifier::always(Prediction::new("Glass", 0.9));
        let mut encounter_loop =
            EncounterLoop::new(space(), agent(), pool_with(&[("a", (500.0, 350.0))]), &classifier);

        for _ in 0..25 {
            encounter_loop.tick(InputVector::IDLE);
        }

        assert_eq!(classifier.calls.get(), 1);
        let snapshot = encounter_loop.snapshot();
        assert_eq!(
            state_of(&snapshot, 0),
            ItemState::Classified(Prediction::new("Glass", 0.9))
        );
        assert_eq!(snapshot.tally.classified, 1);
        assert_eq!(snapshot.tally.correct, 1);
    }

    #[test]
    fn test_distant_items_are_never_classified() {
        let classifier = MockClassifier::always(Prediction::new("Glass", 0.9));
        let mut encounter_loop = EncounterLoop::new(
            space(),
            agent(),
            pool_with(&[("a", (100.0, 100.0)), ("b", (900.0, 600.0))]),
            &classifier,
        );

        for _ in 0..200 {
            let snapshot = encounter_loop.tick(InputVector::IDLE);
            assert_eq!(snapshot.status, Status::Waiting);
        }

        assert_eq!(classifier.calls.get(), 0);
        let snapshot = encounter_loop.snapshot();
        assert_eq!(state_of(&snapshot, 0), ItemState::Unscanned);
        assert_eq!(state_of(&snapshot, 1), ItemState::Unscanned);
    }

    // Item x in [568, 632). Moving right at 4 per tick the agent's right edge is 524 + 4t: it
    // touches the item at t = 11 and overlaps it at t = 12.
    #[test]
    fn test_scripted_approach_classifies_on_first_overlapping_tick() {
        let classifier = MockClassifier::always(Prediction::new("Metal", 0.42));
        let mut encounter_loop =
            EncounterLoop::new(space(), agent(), pool_with(&[("a", (600.0, 350.0))]), &classifier);

        for _ in 0..11 {
            let snapshot = encounter_loop.tick(InputVector::RIGHT);
            assert_eq!(state_of(&snapshot, 0), ItemState::Unscanned);
        }
        let touching = encounter_loop.snapshot();
        assert_eq!(touching.agent.rect.right(), 568.0);
        assert_eq!(classifier.calls.get(), 0);

        let at_t = encounter_loop.tick(InputVector::RIGHT);
        assert_eq!(at_t.tick, 12);
        assert_eq!(
            state_of(&at_t, 0),
            ItemState::Classified(Prediction::new("Metal", 0.42))
        );

        let after = encounter_loop.tick(InputVector::IDLE);
        assert_eq!(
            state_of(&after, 0),
            ItemState::Classified(Prediction::new("Metal", 0.42))
        );
        match &after.status {
            Status::Classified(encounter) => {
                assert_eq!(encounter.item, ItemId(0));
                assert_eq!(encounter.prediction.label, "Metal");
                assert_eq!(encounter.prediction.confidence, Some(0.42));
                assert_eq!(encounter.verdict, Verdict::Incorrect);
                assert_eq!(encounter.band, ConfidenceBand::Hesitant);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(classifier.calls.get(), 1);
    }

    #[test]
    fn test_touching_edge_is_not_an_encounter() {
        // item x in [524, 588): its left edge is the agent's right edge
        let classifier = MockClassifier::always(Prediction::new("Glass", 0.9));
        let mut encounter_loop =
            EncounterLoop::new(space(), agent(), pool_with(&[("a", (556.0, 350.0))]), &classifier);
        assert!(encounter_loop.overlapping().is_empty());
        encounter_loop.tick(InputVector::IDLE);
        assert_eq!(classifier.calls.get(), 0);

        encounter_loop.tick(InputVector::RIGHT);
        assert_eq!(classifier.calls.get(), 1);
    }

    #[test]
    fn test_decode_failure_stays_unscanned_then_retries() {
        let classifier = MockClassifier::scripted(
            vec![Err(ClassifierError::ImageDecodeError(
                "truncated png".to_string(),
            ))],
            Ok(Prediction::new("Glass", 0.95)),
        );
        let mut encounter_loop =
            EncounterLoop::new(space(), agent(), pool_with(&[("a", (500.0, 350.0))]), &classifier);

        let first = encounter_loop.tick(InputVector::IDLE);
        assert_eq!(state_of(&first, 0), ItemState::Unscanned);
        assert_eq!(first.item(ItemId(0)).unwrap().failed_attempts, 1);
        assert!(matches!(first.status, Status::DecodeFailed { .. }));
        assert_eq!(first.tally.failures, 1);

        let second = encounter_loop.tick(InputVector::IDLE);
        assert_eq!(
            state_of(&second, 0),
            ItemState::Classified(Prediction::new("Glass", 0.95))
        );
        assert!(matches!(second.status, Status::Classified(_)));
        assert_eq!(classifier.calls.get(), 2);
    }

    #[test]
    fn test_model_unavailable_degrades_to_no_result() {
        let classifier = UnavailableClassifier::new("weights missing");
        let mut encounter_loop =
            EncounterLoop::new(space(), agent(), pool_with(&[("a", (500.0, 350.0))]), classifier);

        for _ in 0..3 {
            let snapshot = encounter_loop.tick(InputVector::IDLE);
            assert_eq!(state_of(&snapshot, 0), ItemState::Unscanned);
            assert_eq!(
                snapshot.status,
                Status::NoResult {
                    item: ItemId(0),
                    reason: "model unavailable: weights missing".to_string()
                }
            );
        }
        assert_eq!(encounter_loop.tally().failures, 3);
        assert_eq!(encounter_loop.tally().classified, 0);
    }

    #[test]
    fn test_simultaneous_overlaps_are_processed_in_spawn_order() {
        let classifier = MockClassifier::always(Prediction::new("Glass", 0.9));
        let mut encounter_loop = EncounterLoop::new(
            space(),
            agent(),
            pool_with(&[
                ("first", (510.0, 360.0)),
                ("far", (100.0, 100.0)),
                ("second", (490.0, 340.0)),
                ("third", (500.0, 350.0)),
            ]),
            &classifier,
        );

        let snapshot = encounter_loop.tick(InputVector::IDLE);

        assert_eq!(
            *classifier.seen.borrow(),
            vec!["first.png", "second.png", "third.png"]
        );
        match &snapshot.status {
            Status::Classified(encounter) => assert_eq!(encounter.item, ItemId(3)),
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(state_of(&snapshot, 1), ItemState::Unscanned);
    }

    #[test]
    fn test_unlabeled_item_has_unknown_verdict() {
        let classifier = MockClassifier::always(Prediction::label_only("Paper"));
        let mut pool = pool_with(&[]);
        pool.spawn_at(ContentSource::new(vec![0u8, 1, 2]), (500.0, 350.0))
            .unwrap();
        let mut encounter_loop = EncounterLoop::new(space(), agent(), pool, &classifier);

        let snapshot = encounter_loop.tick(InputVector::IDLE);
        match &snapshot.status {
            Status::Classified(encounter) => {
                assert_eq!(encounter.verdict, Verdict::Unknown);
                assert_eq!(encounter.band, ConfidenceBand::Unknown);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(snapshot.tally.unlabeled, 1);
    }

    #[test]
    fn test_background_marks_classifying_and_submits_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let classifier = CountingClassifier {
            calls: Arc::clone(&calls),
        };
        let mut encounter_loop = EncounterLoop::with_background(
            space(),
            agent(),
            pool_with(&[("a", (500.0, 350.0))]),
            classifier,
            2,
        )
        .unwrap();

        let first = encounter_loop.tick(InputVector::IDLE);
        assert_eq!(state_of(&first, 0), ItemState::Classifying);
        assert_eq!(first.status, Status::Waiting);

        // still overlapping; whether or not the result has arrived, nothing is resubmitted
        encounter_loop.tick(InputVector::IDLE);
        encounter_loop.tick(InputVector::IDLE);

        let settled = encounter_loop.settle();
        assert_eq!(encounter_loop.in_flight(), 0);
        assert_eq!(
            state_of(&settled, 0),
            ItemState::Classified(Prediction::new("Plastic", 0.8))
        );

        for _ in 0..5 {
            encounter_loop.tick(InputVector::IDLE);
        }
        encounter_loop.settle();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_background_result_is_applied_on_the_next_tick() {
        let (release, gate) = mpsc::channel();
        let bytes: Arc<[u8]> = Arc::from(vec![0u8; 4]);
        let mut pool = pool_with(&[]);
        let source = ContentSource::labeled("Metal", ImageHandle::Encoded(Arc::clone(&bytes)));
        pool.spawn_at(source, (500.0, 350.0)).unwrap();
        let classifier = GatedClassifier {
            gate: Mutex::new(gate),
        };
        let mut encounter_loop =
            EncounterLoop::with_background(space(), agent(), pool, classifier, 1).unwrap();

        let first = encounter_loop.tick(InputVector::IDLE);
        assert_eq!(state_of(&first, 0), ItemState::Classifying);
        for _ in 0..5 {
            let held = encounter_loop.tick(InputVector::IDLE);
            assert_eq!(state_of(&held, 0), ItemState::Classifying);
            assert_eq!(held.status, Status::Waiting);
        }
        assert_eq!(encounter_loop.in_flight(), 1);

        release.send(()).unwrap();
        // copies: ours, the item's, the worker's. The worker drops its copy only after the result
        // is on the channel.
        while Arc::strong_count(&bytes) > 2 {
            std::thread::yield_now();
        }
        fence(Ordering::Acquire);

        // a finished result is not visible between ticks
        assert_eq!(
            state_of(&encounter_loop.snapshot(), 0),
            ItemState::Classifying
        );
        assert_eq!(encounter_loop.in_flight(), 1);

        let next = encounter_loop.tick(InputVector::IDLE);
        assert_eq!(
            state_of(&next, 0),
            ItemState::Classified(Prediction::new("Metal", 0.6))
        );
        match &next.status {
            Status::Classified(encounter) => {
                assert_eq!(encounter.item, ItemId(0));
                assert_eq!(encounter.verdict, Verdict::Correct);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert_eq!(encounter_loop.in_flight(), 0);
    }

    #[test]
    fn test_background_result_for_removed_item_is_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let classifier = CountingClassifier {
            calls: Arc::clone(&calls),
        };
        let mut encounter_loop = EncounterLoop::with_background(
            space(),
            agent(),
            pool_with(&[("a", (500.0, 350.0))]),
            classifier,
            1,
        )
        .unwrap();

        encounter_loop.tick(InputVector::IDLE);
        let (key, _) = encounter_loop.pool().active_items().next().unwrap();
        encounter_loop.pool_mut().remove(key);

        let settled = encounter_loop.settle();
        assert!(settled.items.is_empty());
        assert_eq!(settled.status, Status::Waiting);
        assert_eq!(encounter_loop.in_flight(), 0);
    }

    #[test]
    fn test_inline_settle_is_a_no_op() {
        let classifier = MockClassifier::always(Prediction::new("Glass", 0.9));
        let mut encounter_loop =
            EncounterLoop::new(space(), agent(), pool_with(&[("a", (500.0, 350.0))]), &classifier);
        let ticked = encounter_loop.tick(InputVector::IDLE);
        assert_eq!(encounter_loop.settle(), ticked);
    }
}
