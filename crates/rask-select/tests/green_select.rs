// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Selects running inside green tasks, with providers on other workers.

mod common;

use std::sync::Arc;

use rask_select::channel::bounded;
use rask_select::deferred::Deferred;
use rask_select::green::{JoinError, Scheduler};
use rask_select::{select, select_unbiased, SchedulerConfig, SelectError};

fn scheduler(workers: usize) -> Scheduler {
    common::init_tracing();
    Scheduler::new(SchedulerConfig::default().with_workers(workers))
}

#[test]
fn consumer_selects_over_two_producers() {
    const PER_PRODUCER: u64 = 500;
    let sched = scheduler(4);
    let (tx_a, rx_a) = bounded::<u64>(8);
    let (tx_b, rx_b) = bounded::<u64>(8);

    let producers: Vec<_> = [(tx_a, 0u64), (tx_b, 1_000_000u64)]
        .into_iter()
        .map(|(tx, base)| {
            sched.spawn(move |ctx| async move {
                for i in 0..PER_PRODUCER {
                    tx.send(&ctx, base + i).await.unwrap().unwrap();
                }
            })
        })
        .collect();

    let consumer = sched.spawn(move |ctx| async move {
        let mut sum = 0u64;
        let mut open = 2;
        while open > 0 {
            let next = select_unbiased(&ctx, |s| {
                s.on(rx_a.on_recv(), |v| v);
                s.on(rx_b.on_recv(), |v| v);
                Ok(())
            })
            .await
            .unwrap();
            match next {
                Some(v) => sum += v,
                None => open -= 1,
            }
            if open == 1 {
                // One side is closed and drained; finish the other directly.
                while let Some(v) = rx_a.recv(&ctx).await.unwrap() {
                    sum += v;
                }
                while let Some(v) = rx_b.recv(&ctx).await.unwrap() {
                    sum += v;
                }
                open = 0;
            }
        }
        sum
    });

    for p in producers {
        p.join().unwrap();
    }
    let expected: u64 = (0..PER_PRODUCER).sum::<u64>() * 2 + 1_000_000 * PER_PRODUCER;
    assert_eq!(consumer.join().unwrap(), expected);
    sched.shutdown();
}

#[test]
fn send_and_receive_clauses_in_one_select() {
    let sched = scheduler(2);
    let (out_tx, out_rx) = bounded::<u32>(1);
    let (in_tx, in_rx) = bounded::<u32>(1);
    out_tx.try_send(0).unwrap();

    // out is full, so only the receive clause can fire.
    let h = sched.spawn(move |ctx| async move {
        select(&ctx, |s| {
            s.on_with(out_tx.on_send(), 1, |sent| format!("sent:{}", sent.is_ok()));
            s.on(in_rx.on_recv(), |v| format!("recv:{v:?}"));
            Ok(())
        })
        .await
    });
    in_tx.try_send(7).unwrap();
    assert_eq!(h.join().unwrap().unwrap(), "recv:Some(7)");
    // The losing send never delivered its value.
    assert_eq!(out_rx.try_recv(), Ok(0));
    assert!(out_rx.try_recv().is_err());
    sched.shutdown();
}

#[test]
fn cancelling_task_cancels_its_select() {
    let sched = scheduler(2);
    let never: Arc<Deferred<u8>> = Arc::new(Deferred::new());
    let started = Arc::new(Deferred::new());
    let h = {
        let never = never.clone();
        let started = started.clone();
        sched.spawn(move |ctx| async move {
            started.complete(());
            select(&ctx, |s| {
                s.on(never.on_await(), |v| v);
                Ok(())
            })
            .await
        })
    };
    while !started.is_completed() {
        std::thread::yield_now();
    }
    match h.cancel() {
        Ok(Err(SelectError::Cancelled)) | Err(JoinError::Cancelled) => {}
        other => panic!("unexpected outcome {:?}", other.map(|r| r.is_ok())),
    }
    assert_eq!(never.waiting(), 0);
    sched.shutdown();
}

#[test]
fn task_completion_is_a_select_clause() {
    let sched = scheduler(2);
    let gate: Arc<Deferred<()>> = Arc::new(Deferred::new());
    let slow = {
        let gate = gate.clone();
        sched.spawn(move |ctx| async move {
            select(&ctx, |s| {
                s.on_ready(gate.on_join(), || "slow");
                Ok(())
            })
            .await
            .unwrap()
        })
    };
    let fast = sched.spawn(|_| async { "fast" });

    let watcher = sched.spawn(move |ctx| async move {
        let first = select(&ctx, |s| {
            s.on_ready(slow.on_complete(), || "slow");
            s.on_ready(fast.on_complete(), || "fast");
            Ok(())
        })
        .await
        .unwrap();
        (first, slow, fast)
    });
    let (first, slow, fast) = watcher.join().unwrap();
    assert_eq!(first, "fast");
    assert_eq!(fast.join().unwrap(), "fast");
    gate.complete(());
    assert_eq!(slow.join().unwrap(), "slow");
    sched.shutdown();
}
