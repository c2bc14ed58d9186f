use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use fc_config::CoordConfig;
use fc_coord::autocomplete::guild_key;
use fc_coord::semaphore::owner_key;
use fc_coord::{AutocompleteIndex, DelayedQueue, LockManager, PollOutcome, SemaphoreManager};
use fc_runtime::{Commands, SharedStore};

#[test]
fn lock_admits_one_holder_at_a_time() {
    let shared = SharedStore::new();
    let inside = Arc::new(AtomicUsize::new(0));
    let entries = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let mut locks = LockManager::new(shared.connect(), CoordConfig::default());
            let inside = Arc::clone(&inside);
            let entries = Arc::clone(&entries);
            thread::spawn(move || {
                for _ in 0..10 {
                    let token = locks
                        .acquire("critical", Duration::from_secs(5))
                        .expect("store")
                        .expect("lock within timeout");
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    entries.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_micros(200));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    assert!(locks.release("critical", &token).expect("store"));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    assert_eq!(entries.load(Ordering::SeqCst), 40);
    assert_eq!(shared.key_count(), 0);
}

#[test]
fn semaphore_never_exceeds_limit_under_guarded_acquire() {
    let shared = SharedStore::new();
    let granted = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let config = CoordConfig {
                semaphore_lock_timeout_ms: 2_000,
                ..CoordConfig::default()
            };
            let mut sem = SemaphoreManager::new(shared.connect(), config);
            let granted = Arc::clone(&granted);
            thread::spawn(move || {
                if sem
                    .acquire_with_lock("pool", 3, Duration::from_secs(30))
                    .expect("store")
                    .is_some()
                {
                    granted.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    assert_eq!(granted.load(Ordering::SeqCst), 3);
}

#[test]
fn lapsed_holders_make_room_for_exactly_limit_racers_in_ticket_order() {
    const LIMIT: u32 = 2;
    let hold = Duration::from_millis(200);
    let shared = SharedStore::new();
    let config = CoordConfig {
        semaphore_lock_timeout_ms: 5_000,
        ..CoordConfig::default()
    };

    let mut first = SemaphoreManager::new(shared.connect(), config.clone());
    let stale: Vec<_> = (0..LIMIT)
        .map(|_| first.acquire("pool", LIMIT, hold).expect("store").expect("free slot"))
        .collect();
    assert!(first.acquire("pool", LIMIT, hold).expect("store").is_none());
    thread::sleep(hold + Duration::from_millis(100));

    let racers = 6;
    let start = Arc::new(Barrier::new(racers));
    let workers: Vec<_> = (0..racers)
        .map(|_| {
            let mut sem = SemaphoreManager::new(shared.connect(), config.clone());
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                sem.acquire_with_lock("pool", LIMIT, hold).expect("store")
            })
        })
        .collect();
    let winners: Vec<_> = workers
        .into_iter()
        .filter_map(|worker| worker.join().expect("racer"))
        .collect();
    assert_eq!(winners.len(), LIMIT as usize);

    let owners = first
        .connection()
        .zrange_by_rank(&owner_key("pool"), 0, -1)
        .expect("store");
    assert_eq!(owners.len(), LIMIT as usize);
    assert!(owners.windows(2).all(|pair| pair[0].1 < pair[1].1));
    assert!(owners.iter().all(|(_, ticket)| *ticket > f64::from(LIMIT)));
    for (rank, (member, _)) in owners.iter().enumerate() {
        assert!(winners.iter().any(|token| token.as_str() == member));
        let expected = i64::try_from(rank).expect("rank");
        assert_eq!(
            first.connection().zrank(&owner_key("pool"), member).expect("store"),
            Some(expected)
        );
    }
    for token in &stale {
        assert!(!first.release("pool", token).expect("store"));
    }
}

#[test]
fn nested_prefix_queries_run_side_by_side_without_interference() {
    let shared = SharedStore::new();
    // Room for every match plus the sentinels of the other three queries.
    let config = CoordConfig {
        autocomplete_window: 32,
        ..CoordConfig::default()
    };
    let mut setup = AutocompleteIndex::new(shared.connect(), config.clone());
    for name in [
        "jack", "jean", "jeff", "jenna", "jennifer", "jenny", "jensen", "jo", "joe", "amy", "zed",
    ] {
        setup.join_guild("g", name).expect("store");
    }
    let expected: [(&str, &[&str]); 4] = [
        ("j", &["jack", "jean", "jeff", "jenna", "jennifer", "jenny", "jensen", "jo", "joe"]),
        ("je", &["jean", "jeff", "jenna", "jennifer", "jenny", "jensen"]),
        ("jen", &["jenna", "jennifer", "jenny", "jensen"]),
        ("jenn", &["jenna", "jennifer", "jenny"]),
    ];

    let start = Arc::new(Barrier::new(expected.len()));
    let workers: Vec<_> = expected
        .into_iter()
        .map(|(prefix, want)| {
            let mut index = AutocompleteIndex::new(shared.connect(), config.clone());
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..100 {
                    let found = index.query("g", prefix).expect("store").expect("in time");
                    assert_eq!(found, want, "prefix {prefix}");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    assert_eq!(setup.connection().zcard(&guild_key("g")).expect("store"), 11);
}

#[test]
fn concurrent_autocomplete_queries_never_see_sentinels() {
    let shared = SharedStore::new();
    let mut setup = AutocompleteIndex::new(shared.connect(), CoordConfig::default());
    for name in ["jean", "jeff", "jenny", "jerome", "jack", "joe", "amy", "zed"] {
        setup.join_guild("g", name).expect("store");
    }

    let workers: Vec<_> = (0..6)
        .map(|i| {
            let mut index = AutocompleteIndex::new(shared.connect(), CoordConfig::default());
            thread::spawn(move || {
                for round in 0..20 {
                    if i % 2 == 0 {
                        let churn = format!("jez{i}{round}");
                        index.join_guild("g", &churn).expect("store");
                        index.leave_guild("g", &churn).expect("store");
                    }
                    let found = index.query("g", "je").expect("store").expect("in time");
                    assert!(found.len() <= 10);
                    for name in ["jean", "jeff", "jenny", "jerome"] {
                        assert!(found.iter().any(|m| m == name), "{name} missing from {found:?}");
                    }
                    assert!(found.iter().all(|m| m.starts_with("je") && !m.contains('{')));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    let members = setup.connection().zcard(&guild_key("g")).expect("store");
    assert_eq!(members, 8);
}

#[test]
fn concurrent_pollers_move_each_task_exactly_once() {
    let shared = SharedStore::new();
    let mut producer = DelayedQueue::new(shared.connect(), CoordConfig::default());
    let mut scheduled = HashSet::new();
    for i in 0..20 {
        let token = producer
            .schedule("work", "job", vec![i.to_string()], Duration::from_millis(5))
            .expect("store");
        scheduled.insert(token);
    }
    thread::sleep(Duration::from_millis(10));

    let pollers: Vec<_> = (0..4)
        .map(|_| {
            let mut queue = DelayedQueue::new(shared.connect(), CoordConfig::default());
            thread::spawn(move || {
                let mut moved = Vec::new();
                loop {
                    match queue.poll_once().expect("store") {
                        PollOutcome::Moved(token) => moved.push(token),
                        PollOutcome::Contended | PollOutcome::Discarded => {}
                        PollOutcome::Idle => break,
                    }
                }
                moved
            })
        })
        .collect();

    let mut moved = Vec::new();
    for poller in pollers {
        moved.extend(poller.join().expect("poller"));
    }
    assert_eq!(moved.len(), 20);
    let unique: HashSet<_> = moved.into_iter().collect();
    assert_eq!(unique, scheduled);
    assert_eq!(producer.ready_len("work").expect("store"), 20);
    assert_eq!(producer.delayed_len().expect("store"), 0);
}
