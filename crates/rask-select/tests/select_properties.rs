// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Engine-level properties: one winner, no lost wakeups, cleanup,
//! fairness, cancellation races and a many-producer stress run.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::task::Poll;
use std::thread;
use std::time::Duration;

use common::{chi_squared, init_tracing, poll_once, Gate};
use futures::executor::block_on;
use proptest::prelude::*;
use rask_select::deferred::Deferred;
use rask_select::{select, select_unbiased, RuntimeContext, SelectError};

/// 99.9th percentile of chi-squared with 3 degrees of freedom.
const CHI2_DF3_P001: f64 = 16.27;

fn gates(ready: &[bool]) -> Vec<Gate> {
    ready
        .iter()
        .enumerate()
        .map(|(i, &r)| if r { Gate::ready(i as u64) } else { Gate::pending() })
        .collect()
}

proptest! {
    #[test]
    fn biased_select_commits_first_ready_clause(
        ready in proptest::collection::vec(any::<bool>(), 1..8)
            .prop_filter("at least one ready clause", |r| r.iter().any(|&b| b))
    ) {
        let ctx = RuntimeContext::new();
        let gates = gates(&ready);
        let winner = block_on(select(&ctx, |s| {
            for gate in &gates {
                s.on(gate, |v| v);
            }
            Ok(())
        }))
        .unwrap();

        let first_ready = ready.iter().position(|&r| r).unwrap() as u64;
        prop_assert_eq!(winner, first_ready);
        let registered: usize = gates.iter().map(Gate::registered).sum();
        let unregistered: usize = gates.iter().map(Gate::unregistered).sum();
        prop_assert_eq!(unregistered, registered - 1);
    }

    #[test]
    fn unbiased_select_commits_exactly_one(
        ready in proptest::collection::vec(any::<bool>(), 1..8)
            .prop_filter("at least one ready clause", |r| r.iter().any(|&b| b)),
        seed in any::<u64>(),
    ) {
        let ctx = RuntimeContext::new().with_shuffle_seed(seed);
        let gates = gates(&ready);
        let winner = block_on(select_unbiased(&ctx, |s| {
            for gate in &gates {
                s.on(gate, |v| v);
            }
            Ok(())
        }))
        .unwrap();

        prop_assert!(ready[winner as usize]);
        let registered: usize = gates.iter().map(Gate::registered).sum();
        let unregistered: usize = gates.iter().map(Gate::unregistered).sum();
        prop_assert_eq!(unregistered, registered - 1);
        prop_assert!(gates.iter().all(|g| g.parked() == 0));
    }
}

#[test]
fn readiness_after_suspension_resumes_selector() {
    init_tracing();
    let ctx = RuntimeContext::new();
    for round in 0..200u64 {
        let a = Arc::new(Gate::pending());
        let b = Arc::new(Gate::pending());
        let mut fut = select(&ctx, |s| {
            s.on(&*a, |v| v);
            s.on(&*b, |v| v);
            Ok(())
        });
        assert!(poll_once(&mut fut).is_pending());

        let firing = if round % 2 == 0 { a.clone() } else { b.clone() };
        let producer = thread::spawn(move || {
            if round % 3 == 0 {
                thread::sleep(Duration::from_micros(200));
            }
            assert!(firing.fire(round));
        });
        assert_eq!(block_on(&mut fut).unwrap(), round);
        producer.join().unwrap();
    }
}

#[test]
fn every_loser_is_unregistered_exactly_once() {
    let ctx = RuntimeContext::new();
    let shared = Gate::pending();
    let other = Gate::pending();
    let mut fut = select(&ctx, |s| {
        s.on(&shared, |v| v);
        s.on(&shared, |v| v + 10);
        s.on(&other, |v| v + 20);
        Ok(())
    });
    assert!(poll_once(&mut fut).is_pending());
    assert_eq!(shared.parked(), 2);

    assert!(other.fire(1));
    assert!(matches!(poll_once(&mut fut), Poll::Ready(Ok(21))));
    assert_eq!(shared.unregistered(), 2);
    assert_eq!(other.unregistered(), 0);

    // Nothing left to undo: polling or dropping again changes nothing.
    assert!(matches!(poll_once(&mut fut), Poll::Ready(Err(SelectError::Finished))));
    drop(fut);
    assert_eq!(shared.unregistered(), 2);
}

#[test]
fn unbiased_select_is_uniform() {
    const K: usize = 4;
    const TRIALS: usize = 4000;
    let ctx = RuntimeContext::new().with_shuffle_seed(0x5e1ec7);
    let sources: Vec<Deferred<usize>> = (0..K).map(|_| Deferred::new()).collect();
    for (i, d) in sources.iter().enumerate() {
        d.complete(i);
    }

    let mut counts = [0usize; K];
    for _ in 0..TRIALS {
        let winner = block_on(select_unbiased(&ctx, |s| {
            for d in &sources {
                s.on(d.on_await(), |v| v);
            }
            Ok(())
        }))
        .unwrap();
        counts[winner] += 1;
    }

    let chi2 = chi_squared(&counts);
    assert!(chi2 < CHI2_DF3_P001, "counts {:?}, chi2 {}", counts, chi2);
}

#[test]
fn biased_select_is_not_uniform() {
    let ctx = RuntimeContext::new();
    let sources: Vec<Deferred<usize>> = (0..4).map(|_| Deferred::new()).collect();
    for (i, d) in sources.iter().enumerate() {
        d.complete(i);
    }
    for _ in 0..50 {
        let winner = block_on(select(&ctx, |s| {
            for d in &sources {
                s.on(d.on_await(), |v| v);
            }
            Ok(())
        }))
        .unwrap();
        assert_eq!(winner, 0);
    }
}

#[test]
fn cancellation_races_offer_with_single_outcome() {
    for round in 0..500u64 {
        let ctx = RuntimeContext::new();
        let gate = Arc::new(Gate::pending());
        let mut fut = select(&ctx, |s| {
            s.on(&*gate, |v| v);
            Ok(())
        });
        assert!(poll_once(&mut fut).is_pending());

        let start = Arc::new(Barrier::new(2));
        let offerer = {
            let gate = gate.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                gate.fire(round)
            })
        };
        let canceller = {
            let ctx = ctx.clone();
            thread::spawn(move || {
                start.wait();
                ctx.cancel();
            })
        };
        let accepted = offerer.join().unwrap();
        canceller.join().unwrap();

        match block_on(&mut fut) {
            Ok(v) => {
                assert!(accepted, "result without an accepted offer");
                assert_eq!(v, round);
            }
            Err(err) => {
                assert!(err.is_cancelled());
                assert!(!accepted, "accepted offer lost to cancellation");
            }
        }
        assert!(ctx.is_cancelled());
    }
}

#[test]
fn ten_thousand_producers_one_winner() {
    const PRODUCERS: usize = 10_000;
    const THREADS: usize = 8;
    init_tracing();

    let ctx = RuntimeContext::new();
    let gate = Gate::pending();
    let mut fut = select(&ctx, |s| {
        for _ in 0..PRODUCERS {
            s.on(&gate, |v| v);
        }
        Ok(())
    });
    assert!(poll_once(&mut fut).is_pending());
    assert_eq!(gate.parked(), PRODUCERS);

    let counterparts = gate.counterparts();
    let accepted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = counterparts
        .chunks(PRODUCERS / THREADS)
        .map(|chunk| {
            let chunk = chunk.to_vec();
            let accepted = accepted.clone();
            let rejected = rejected.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                for cp in chunk {
                    let value = cp.clause().index() as u64;
                    match cp.offer(value) {
                        Ok(()) => accepted.fetch_add(1, Ordering::SeqCst),
                        Err(_) => rejected.fetch_add(1, Ordering::SeqCst),
                    };
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let winner = block_on(&mut fut).unwrap();
    assert!((winner as usize) < PRODUCERS);
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert_eq!(rejected.load(Ordering::SeqCst), PRODUCERS - 1);
    assert_eq!(gate.unregistered(), rejected.load(Ordering::SeqCst));
}
