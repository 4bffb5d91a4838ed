//! Load supersession under every completion order.
//!
//! Each case is a run of snapshots; the loads they issue complete in every
//! possible order, and interleaved with the snapshots themselves. Whatever
//! the order, the viewer must end on the last snapshot's deck and page.

use std::sync::Arc;

use podium_core::{DeckAddress, DeckName, PageNumber, SharedPresentationState};
use podium_sync::{
    viewer_events, Document, HeadlessViewer, LoadOutcome, LoadRequest, ReconciliationEngine,
    ViewerAdapter, ViewerEventReceiver, ViewerLog,
};

const DECKS: &[(&str, u32)] = &[("intro", 10), ("outro", 4), ("demo", 7)];

type Step = Option<(&'static str, i64)>;

const CASES: &[&[Step]] = &[
    &[Some(("intro", 3)), Some(("outro", 2)), Some(("demo", 5))],
    &[Some(("intro", 3)), Some(("outro", 2)), Some(("intro", 8))],
    &[Some(("intro", 2)), Some(("intro", 9)), Some(("outro", 1)), Some(("outro", 3))],
    &[Some(("demo", 1)), Some(("outro", 40)), Some(("intro", 1)), Some(("outro", 40))],
    &[Some(("intro", 5)), Some(("outro", 2)), None],
    &[Some(("intro", 5)), None, Some(("demo", 6))],
    &[Some(("outro", 4)), Some(("demo", 2)), Some(("intro", 7)), Some(("demo", 3))],
];

fn pages_of(deck: &DeckName) -> u32 {
    DECKS
        .iter()
        .find(|(name, _)| *name == deck.as_str())
        .map(|(_, pages)| *pages)
        .expect("known deck")
}

fn snapshot(step: Step) -> SharedPresentationState {
    match step {
        Some((deck, page)) => {
            SharedPresentationState::new(deck, PageNumber::new(page).expect("page"))
        }
        None => SharedPresentationState::default(),
    }
}

/// Every ordering of `0..n`.
fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for rest in permutations(n - 1) {
        for at in 0..=rest.len() {
            let mut order = rest.clone();
            order.insert(at, n - 1);
            out.push(order);
        }
    }
    out
}

/// Small deterministic generator for interleavings.
struct Lcg(u64);

impl Lcg {
    fn below(&mut self, n: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) % n as u64) as usize
    }
}

struct Harness {
    engine: ReconciliationEngine<HeadlessViewer>,
    log: ViewerLog,
    in_flight: Vec<LoadRequest>,
    _events: ViewerEventReceiver,
}

impl Harness {
    fn new() -> Self {
        let (tx, rx) = viewer_events();
        let viewer = HeadlessViewer::new(tx);
        let log = viewer.log();
        Self {
            engine: ReconciliationEngine::viewer(viewer),
            log,
            in_flight: Vec::new(),
            _events: rx,
        }
    }

    fn observe(&mut self, step: Step) {
        if let Some(request) = self.engine.on_remote_snapshot(snapshot(step)).load {
            self.in_flight.push(request);
        }
    }

    fn complete(&mut self, index: usize) {
        let request = self.in_flight.remove(index);
        let document = Document {
            address: DeckAddress(request.deck.as_str().to_string()),
            pages_count: pages_of(&request.deck),
            bytes: Arc::from(&b"%PDF-"[..]),
        };
        let outcome = self
            .engine
            .on_load_finished(request.token, Ok(document))
            .expect("loads succeed");
        if outcome == LoadOutcome::DocumentSet {
            self.engine.on_viewer_ready(request.token);
        }
    }

    fn assert_settled_on(&self, last: Step, context: &str) {
        let local = self.engine.local_state();
        assert_eq!(local.pending_load, None, "{context}");
        match last {
            Some((deck, page)) => {
                let deck = DeckName::from(deck);
                let expected = PageNumber::new(page)
                    .expect("page")
                    .clamp_to(pages_of(&deck));
                assert_eq!(local.loaded_deck.as_ref(), Some(&deck), "{context}");
                assert_eq!(local.displayed_page_number, Some(expected), "{context}");
                assert_eq!(self.engine.viewer_ref().deck(), Some(&deck), "{context}");
                assert_eq!(
                    self.engine.viewer_ref().current_page_number(),
                    Some(expected),
                    "{context}"
                );
            }
            None => {
                assert_eq!(local.loaded_deck, None, "{context}");
                assert_eq!(self.engine.viewer_ref().deck(), None, "{context}");
            }
        }
    }
}

#[test]
fn completions_in_any_order_settle_on_the_last_snapshot() {
    for (case, steps) in CASES.iter().enumerate() {
        let last = *steps.last().expect("non-empty case");
        let loads = {
            let mut harness = Harness::new();
            steps.iter().for_each(|step| harness.observe(*step));
            harness.in_flight.len()
        };

        for order in permutations(loads) {
            let mut harness = Harness::new();
            steps.iter().for_each(|step| harness.observe(*step));
            // Indices shift as completions are removed; track them by token.
            let tokens: Vec<_> = order
                .iter()
                .map(|i| harness.in_flight[*i].token)
                .collect();
            for token in tokens {
                let index = harness
                    .in_flight
                    .iter()
                    .position(|request| request.token == token)
                    .expect("in flight");
                harness.complete(index);
            }

            let context = format!("case {case}, completion order {order:?}");
            harness.assert_settled_on(last, &context);
            let expected_documents: Vec<DeckName> =
                last.map(|(deck, _)| DeckName::from(deck)).into_iter().collect();
            assert_eq!(harness.log.documents(), expected_documents, "{context}");
            let shown = harness.engine.local_state().displayed_page_number;
            assert!(
                harness.log.pages().iter().all(|page| Some(*page) == shown),
                "{context}: intermediate page shown: {:?}",
                harness.log.pages()
            );
        }
    }
}

#[test]
fn completions_interleaved_with_snapshots_settle_on_the_last_snapshot() {
    for (case, steps) in CASES.iter().enumerate() {
        let last = *steps.last().expect("non-empty case");
        for seed in 0..200 {
            let mut rng = Lcg(seed);
            let mut harness = Harness::new();
            let mut remaining = steps.iter().copied();
            let mut next = remaining.next();

            while next.is_some() || !harness.in_flight.is_empty() {
                let any_in_flight = !harness.in_flight.is_empty();
                if any_in_flight && (next.is_none() || rng.below(2) == 0) {
                    let index = rng.below(harness.in_flight.len());
                    harness.complete(index);
                } else if let Some(step) = next {
                    harness.observe(step);
                    next = remaining.next();
                }
            }

            harness.assert_settled_on(last, &format!("case {case}, seed {seed}"));
        }
    }
}
