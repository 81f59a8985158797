use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hive_task::RawTask;

use crate::config::GroupCapabilities;

use super::group::LoopContext;
use super::worker::Worker;

/// How often a reactive (tick rate 0) worker wakes on its own even with
/// nothing pushed to its inbox, so delayed tasks and TLS-sync broadcasts
/// still make progress. Active (timed) workers never use this; they run on
/// their configured cadence instead.
const REACTIVE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The run loop every worker, spawned or calling-thread-adopted, executes:
/// drain the inbox, advance delayed tasks, walk the TLS-sync ring, run the
/// tick callback and worker-service ticks, then either sleep on cadence or
/// block until woken.
pub(super) fn run(worker: Arc<Worker>, ctx: Arc<LoopContext>) {
    worker.is_running.store(true, Ordering::Release);
    *worker.started_at.lock() = Some(Instant::now());

    if ctx.capabilities.contains(GroupCapabilities::SUPPORTS_TLS_SYNC) {
        ctx.tls_sync.tls_initialize();
    }
    ctx.hooks.on_worker_started(ctx.group_id, worker.id);
    ctx.signal_worker_started();

    let mut tick: u64 = 0;
    while !ctx.stop_flag.load(Ordering::Acquire) {
        run_iteration(&worker, &ctx, tick);
        tick = tick.wrapping_add(1);

        match ctx.tick_period {
            Some(period) => std::thread::sleep(period),
            None => {
                let mut guard = worker.wake_lock.lock();
                worker.wake_signal.wait_for(&mut guard, REACTIVE_POLL_INTERVAL);
            }
        }
    }

    // One last pass: work deferred just before the stop flag was observed
    // should still run rather than being silently dropped.
    run_iteration(&worker, &ctx, tick);

    worker.is_running.store(false, Ordering::Release);
    ctx.hooks.on_worker_stopped(ctx.group_id, worker.id);
    ctx.signal_worker_stopped();
}

fn run_iteration(worker: &Worker, ctx: &LoopContext, tick: u64) {
    if ctx.capabilities.contains(GroupCapabilities::HANDLES_TASKS) {
        while let Some(raw) = worker.inbox.pop() {
            // SAFETY: every node in a worker's inbox was produced by
            // `hive_task::Task::new` and pushed exactly once, by
            // `WorkerGroup::defer`.
            unsafe { RawTask::from_raw(raw) }.dispatch();
        }
    }

    if ctx.capabilities.contains(GroupCapabilities::HANDLES_TIMER_TASKS) {
        worker.timers.drain_pending();
        worker.timers.run_expired(Instant::now());
    }

    if ctx.capabilities.contains(GroupCapabilities::SUPPORTS_TLS_SYNC)
        && ctx.tls_sync_tick_stride != 0
        && tick % ctx.tls_sync_tick_stride as u64 == 0
    {
        ctx.tls_sync.tick();
    }

    if ctx.capabilities.contains(GroupCapabilities::CALL_TICK_HANDLER) {
        if let Some(on_tick) = &ctx.on_worker_tick {
            on_tick(ctx.group_id, worker.id);
        }
    }

    if ctx.capabilities.contains(GroupCapabilities::TICK_WORKER_SERVICES) {
        ctx.hooks.on_tick_worker_services(ctx.group_id, worker.id);
    }
}
