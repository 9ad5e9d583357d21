use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::warn;

static METRICS_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_metrics_lock_poison_once(operation: &'static str) {
    if METRICS_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "metrics lock poisoned; recovered inner value");
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopMetricsSnapshot {
    pub tps: f32,
    pub frames_per_sec: f32,
    pub rebuilds_per_sec: f32,
    pub backlog: usize,
}

/// Cloneable read side of the loop's most recent metrics window.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    snapshot: Arc<RwLock<LoopMetricsSnapshot>>,
}

impl Default for MetricsHandle {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(LoopMetricsSnapshot::default())),
        }
    }
}

impl MetricsHandle {
    pub fn snapshot(&self) -> LoopMetricsSnapshot {
        match self.snapshot.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn_metrics_lock_poison_once("read");
                *poisoned.into_inner()
            }
        }
    }

    pub(crate) fn publish(&self, snapshot: LoopMetricsSnapshot) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => {
                warn_metrics_lock_poison_once("write");
                let mut guard = poisoned.into_inner();
                *guard = snapshot;
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct MetricsAccumulator {
    interval_start: Instant,
    interval: Duration,
    ticks: u32,
    frames: u64,
    rebuilds: u32,
}

impl MetricsAccumulator {
    pub(crate) fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub(crate) fn starting_at(start: Instant, interval: Duration) -> Self {
        Self {
            interval_start: start,
            interval,
            ticks: 0,
            frames: 0,
            rebuilds: 0,
        }
    }

    pub(crate) fn record_tick(&mut self, frames: usize, rebuilt: bool) {
        self.ticks = self.ticks.saturating_add(1);
        self.frames = self.frames.saturating_add(frames as u64);
        if rebuilt {
            self.rebuilds = self.rebuilds.saturating_add(1);
        }
    }

    pub(crate) fn maybe_snapshot(
        &mut self,
        now: Instant,
        backlog: usize,
    ) -> Option<LoopMetricsSnapshot> {
        let elapsed = now.saturating_duration_since(self.interval_start);
        if elapsed < self.interval {
            return None;
        }

        let elapsed_seconds = elapsed.as_secs_f32().max(f32::EPSILON);
        let snapshot = LoopMetricsSnapshot {
            tps: self.ticks as f32 / elapsed_seconds,
            frames_per_sec: self.frames as f32 / elapsed_seconds,
            rebuilds_per_sec: self.rebuilds as f32 / elapsed_seconds,
            backlog,
        };

        self.interval_start = now;
        self.ticks = 0;
        self.frames = 0;
        self.rebuilds = 0;

        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::RwLock;
    use std::thread;

    use super::*;

    fn poison_lock(lock: &RwLock<LoopMetricsSnapshot>) {
        thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = lock.write().expect("write guard");
                    panic!("poison metrics lock");
                })
                .join();
        });
    }

    #[test]
    fn snapshot_computes_expected_rates() {
        let base = Instant::now();
        let mut accumulator = MetricsAccumulator::starting_at(base, Duration::from_secs(1));

        accumulator.record_tick(50, true);
        accumulator.record_tick(10, false);
        accumulator.record_tick(0, false);
        accumulator.record_tick(4, true);

        let snapshot = accumulator
            .maybe_snapshot(base + Duration::from_secs(2), 7)
            .expect("snapshot should be emitted");

        assert!((snapshot.tps - 2.0).abs() < 0.01);
        assert!((snapshot.frames_per_sec - 32.0).abs() < 0.01);
        assert!((snapshot.rebuilds_per_sec - 1.0).abs() < 0.01);
        assert_eq!(snapshot.backlog, 7);
    }

    #[test]
    fn snapshot_not_emitted_before_interval() {
        let base = Instant::now();
        let mut accumulator = MetricsAccumulator::starting_at(base, Duration::from_secs(1));
        accumulator.record_tick(3, true);

        assert!(accumulator
            .maybe_snapshot(base + Duration::from_millis(500), 0)
            .is_none());
    }

    #[test]
    fn counters_reset_after_snapshot() {
        let base = Instant::now();
        let mut accumulator = MetricsAccumulator::starting_at(base, Duration::from_secs(1));
        accumulator.record_tick(5, true);
        accumulator.maybe_snapshot(base + Duration::from_secs(1), 0);

        let next = accumulator
            .maybe_snapshot(base + Duration::from_secs(2), 0)
            .expect("second window");
        assert_eq!(next.tps, 0.0);
        assert_eq!(next.frames_per_sec, 0.0);
    }

    #[test]
    fn snapshot_recovers_after_poison_without_panic() {
        let handle = MetricsHandle::default();
        poison_lock(handle.snapshot.as_ref());

        assert_eq!(handle.snapshot(), LoopMetricsSnapshot::default());
    }

    #[test]
    fn publish_recovers_after_poison_without_panic() {
        let handle = MetricsHandle::default();
        poison_lock(handle.snapshot.as_ref());

        let expected = LoopMetricsSnapshot {
            tps: 20.0,
            frames_per_sec: 140.0,
            rebuilds_per_sec: 3.0,
            backlog: 12,
        };
        handle.publish(expected);

        assert_eq!(handle.snapshot(), expected);
    }
}
