//! Concurrent use of one allocator from many threads

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex};

use common::AllocatorFixture;
use pinforge::backend::SimEvent;
use pinforge::HostPtr;

const THREADS: usize = 8;
const ROUNDS: usize = 500;

#[test]
fn test_no_address_is_held_twice() {
    let fx = AllocatorFixture::new();
    let alloc = &fx.allocator;
    let holders: Mutex<HashSet<usize>> = Mutex::new(HashSet::new());
    let barrier = Barrier::new(THREADS);

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let holders = &holders;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                let mut held: Vec<HostPtr> = Vec::new();
                for round in 0..ROUNDS {
                    let size = 64 * (1 + (t * 7 + round * 13) % 32);
                    let ptr = alloc.allocate(size).unwrap();
                    assert!(
                        holders.lock().unwrap().insert(ptr.addr()),
                        "{:?} handed out while another thread holds it",
                        ptr
                    );
                    held.push(ptr);

                    if held.len() > 3 {
                        let victim = held.remove(round % held.len());
                        holders.lock().unwrap().remove(&victim.addr());
                        alloc.release(victim);
                    }
                }
                for ptr in held {
                    holders.lock().unwrap().remove(&ptr.addr());
                    alloc.release(ptr);
                }
            });
        }
    });

    let stats = alloc.stats();
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.tracked_blocks, stats.cached_blocks);
    assert!(stats.cache_hits > 0);

    alloc.drain();
    fx.assert_no_leak();
}

#[test]
fn test_events_completed_on_other_threads() {
    let fx = AllocatorFixture::new();
    let alloc = &fx.allocator;
    let (tx, rx) = std::sync::mpsc::channel::<SimEvent>();

    std::thread::scope(|scope| {
        // Stands in for the device: finishes work in submission order
        let completer = scope.spawn(move || {
            let mut completed = 0usize;
            for event in rx {
                event.complete();
                completed += 1;
            }
            completed
        });

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let tx = tx.clone();
                scope.spawn(move || {
                    for i in 0..ROUNDS {
                        let ptr = alloc.allocate(1024 + (i % 4) * 512).unwrap();
                        let event = SimEvent::new();
                        alloc.record_completion(ptr, event.clone());
                        alloc.release(ptr);
                        tx.send(event).unwrap();
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        drop(tx);
        assert_eq!(completer.join().unwrap(), 4 * ROUNDS);
    });

    alloc.process_events();
    let stats = alloc.stats();
    assert_eq!(stats.pending_blocks, 0);
    assert_eq!(stats.allocated_blocks, 0);
    assert_eq!(stats.cached_blocks, stats.tracked_blocks);
}

#[test]
fn test_drain_races_with_record_completion() {
    let fx = AllocatorFixture::new();
    let alloc = Arc::new(fx);

    std::thread::scope(|scope| {
        let drainer = {
            let fx = Arc::clone(&alloc);
            scope.spawn(move || {
                for _ in 0..ROUNDS {
                    fx.allocator.drain();
                }
            })
        };

        for _ in 0..2 {
            let fx = Arc::clone(&alloc);
            scope.spawn(move || {
                for i in 0..ROUNDS {
                    let ptr = fx.allocator.allocate(256 + i % 8).unwrap();
                    fx.allocator.release(ptr);
                    // Late report: the block may already be drained
                    fx.allocator.record_completion(ptr, SimEvent::completed());
                }
            });
        }

        drainer.join().unwrap();
    });

    alloc.allocator.drain();
    assert_eq!(alloc.allocator.stats().tracked_blocks, 0);
    alloc.assert_no_leak();
}
