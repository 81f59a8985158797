//! Full-scale rendition of scenario 2: 16 reactive workers each push
//! 100 000 tasks (1 600 000 total) at one shared AOD object. Marked
//! `#[ignore]` since it runs for several seconds; `cargo test -- --ignored`
//! to run it. The scaled-down version that always runs lives in
//! `scenarios.rs`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use hive_aod::{AodObject, AodObjectKind};

#[test]
#[ignore]
fn sixteen_workers_1_6_million_tasks_never_overlap() {
    const WORKERS: usize = 16;
    const TASKS_PER_WORKER: usize = 100_000;

    let object = Arc::new(AodObject::new(AodObjectKind::Static));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlap_detected = Arc::new(AtomicBool::new(false));
    let total = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let object = object.clone();
            let in_flight = in_flight.clone();
            let overlap_detected = overlap_detected.clone();
            let total = total.clone();
            std::thread::spawn(move || {
                for _ in 0..TASKS_PER_WORKER {
                    let in_flight = in_flight.clone();
                    let overlap_detected = overlap_detected.clone();
                    let total = total.clone();
                    object.do_async(move || {
                        let before = in_flight.fetch_add(1, Ordering::SeqCst);
                        if before != 0 {
                            overlap_detected.store(true, Ordering::SeqCst);
                        }
                        total.fetch_add(1, Ordering::SeqCst);
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert!(!overlap_detected.load(Ordering::SeqCst));
    assert_eq!(total.load(Ordering::SeqCst), WORKERS * TASKS_PER_WORKER);
    assert_eq!(object.pending_count(), 0);
}
