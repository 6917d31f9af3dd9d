//! Delay buffer scheduler
//!
//! Holds each emitted suppression instruction for the stream's visibility
//! delay and guarantees it fires or is cancelled exactly once. One scheduler
//! instance exists per stream session.
//!
//! # Design
//!
//! Entries live in an explicit task table (detection id → deadline +
//! payload) paired with a deadline min-heap. A single driver task per stream
//! sleeps until the earliest live deadline and resolves due entries under
//! the table lock, so cancel-vs-fire races are decided atomically: whoever
//! removes the table entry wins, the loser observes a no-op. Heap residue
//! for resolved entries is skipped lazily; no detached timer callback can
//! fire after cancellation or teardown.
//!
//! Deadlines are interpreted on the stream's millisecond timeline anchored
//! at construction, which keeps firing deterministic under tokio's paused
//! test clock.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use vigil_common::config::{MAX_BUFFER_DELAY_MS, MIN_BUFFER_DELAY_MS};
use vigil_common::events::{CancelReason, EventBus, VigilEvent};
use vigil_common::time;
use vigil_common::types::{FilterCategory, FilterInstruction};

/// A pending entry in the delay buffer
///
/// The table only ever holds Pending entries: the terminal transition
/// (fire or cancel) removes the entry and emits its event in the same
/// critical section, so each entry resolves exactly once.
#[derive(Debug, Clone)]
pub struct ScheduledFilter {
    pub detection_id: Uuid,
    pub category: FilterCategory,
    /// Deadline on the stream timeline: origin + buffer delay (ms)
    pub fire_at_ms: u64,
    pub instruction: FilterInstruction,
}

/// Outcome of a schedule request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Entry accepted; fires at the returned deadline unless cancelled
    Scheduled { fire_at_ms: u64 },
    /// An entry for this detection id is already pending
    Duplicate,
    /// The scheduler has been torn down
    Closed,
}

/// Outcome of a cancel request
///
/// Cancellation is idempotent: a request against an entry that already
/// fired, was already cancelled, or never existed reports `AlreadyResolved`
/// and changes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyResolved,
}

/// Lifetime counters for one scheduler instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub fired: u64,
    pub cancelled: u64,
}

struct Inner {
    table: HashMap<Uuid, ScheduledFilter>,
    /// Min-heap of (fire_at_ms, detection_id); may contain residue for
    /// entries that were already resolved — the driver skips those
    deadlines: BinaryHeap<Reverse<(u64, Uuid)>>,
    closed: bool,
}

struct Shared {
    stream_id: Uuid,
    /// Anchor mapping the ms timeline onto the tokio clock
    epoch_instant: Instant,
    epoch_ms: u64,
    inner: Mutex<Inner>,
    wake: Notify,
    events: EventBus,
    scheduled_total: AtomicU64,
    fired_total: AtomicU64,
    cancelled_total: AtomicU64,
}

impl Shared {
    fn now_ms(&self) -> u64 {
        self.epoch_ms + self.epoch_instant.elapsed().as_millis() as u64
    }

    fn instant_for(&self, deadline_ms: u64) -> Instant {
        self.epoch_instant + Duration::from_millis(deadline_ms.saturating_sub(self.epoch_ms))
    }

    /// Deliver a fired entry to the output boundary (at most once per id)
    fn deliver_fire(&self, entry: ScheduledFilter) {
        self.fired_total.fetch_add(1, Ordering::Relaxed);
        debug!(
            stream = %self.stream_id,
            detection = %entry.detection_id,
            fire_at_ms = entry.fire_at_ms,
            "scheduled filter fired"
        );
        self.events.emit_lossy(VigilEvent::FilterFired {
            stream_id: self.stream_id,
            instruction: entry.instruction,
            timestamp: time::now(),
        });
    }

    /// Resolve every entry whose deadline has passed
    async fn fire_due(&self) {
        let due: Vec<ScheduledFilter> = {
            let mut inner = self.inner.lock().await;
            let now = self.now_ms();
            let mut due = Vec::new();
            loop {
                let top = inner.deadlines.peek().map(|r| r.0);
                match top {
                    Some((at, id)) if at <= now => {
                        inner.deadlines.pop();
                        let live = inner
                            .table
                            .get(&id)
                            .map_or(false, |entry| entry.fire_at_ms == at);
                        if live {
                            if let Some(entry) = inner.table.remove(&id) {
                                due.push(entry);
                            }
                        }
                    }
                    _ => break,
                }
            }
            due
        };

        for entry in due {
            self.deliver_fire(entry);
        }
    }
}

/// Per-stream cancellable delay buffer
pub struct DelayScheduler {
    shared: Arc<Shared>,
    buffer_ms: u64,
    max_pending: usize,
}

impl DelayScheduler {
    /// Create a scheduler anchored at the current wall clock
    ///
    /// `buffer_ms` is clamped to the supported visibility window.
    pub fn new(stream_id: Uuid, buffer_ms: u64, max_pending: usize, events: EventBus) -> Self {
        Self::with_epoch(stream_id, buffer_ms, max_pending, events, time::now_ms())
    }

    /// Create a scheduler with an explicit ms-timeline origin
    ///
    /// Deadlines are interpreted relative to `epoch_ms` at the moment of
    /// construction; tests pin this to zero to drive firing with a virtual
    /// clock.
    pub fn with_epoch(
        stream_id: Uuid,
        buffer_ms: u64,
        max_pending: usize,
        events: EventBus,
        epoch_ms: u64,
    ) -> Self {
        let shared = Arc::new(Shared {
            stream_id,
            epoch_instant: Instant::now(),
            epoch_ms,
            inner: Mutex::new(Inner {
                table: HashMap::new(),
                deadlines: BinaryHeap::new(),
                closed: false,
            }),
            wake: Notify::new(),
            events,
            scheduled_total: AtomicU64::new(0),
            fired_total: AtomicU64::new(0),
            cancelled_total: AtomicU64::new(0),
        });

        tokio::spawn(drive(shared.clone()));

        Self {
            shared,
            buffer_ms: buffer_ms.clamp(MIN_BUFFER_DELAY_MS, MAX_BUFFER_DELAY_MS),
            max_pending: max_pending.max(1),
        }
    }

    /// Effective visibility delay for this stream (ms)
    pub fn buffer_ms(&self) -> u64 {
        self.buffer_ms
    }

    /// Place an instruction in the delay buffer
    ///
    /// The deadline is the instruction's origin plus the buffer delay. At
    /// most one entry exists per detection id. When the table is full the
    /// earliest-deadline entry is fired immediately rather than dropped, so
    /// pressure never silently skips a suppression.
    pub async fn schedule(
        &self,
        category: FilterCategory,
        instruction: FilterInstruction,
    ) -> ScheduleOutcome {
        let detection_id = instruction.detection_id;
        let fire_at_ms = instruction.start_ms + self.buffer_ms;

        let evicted = {
            let mut inner = self.shared.inner.lock().await;
            if inner.closed {
                return ScheduleOutcome::Closed;
            }
            if inner.table.contains_key(&detection_id) {
                return ScheduleOutcome::Duplicate;
            }

            let evicted = if inner.table.len() >= self.max_pending {
                evict_earliest(&mut inner)
            } else {
                None
            };

            inner.deadlines.push(Reverse((fire_at_ms, detection_id)));
            inner.table.insert(
                detection_id,
                ScheduledFilter {
                    detection_id,
                    category,
                    fire_at_ms,
                    instruction,
                },
            );
            evicted
        };

        self.shared.scheduled_total.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = evicted {
            warn!(
                stream = %self.shared.stream_id,
                detection = %entry.detection_id,
                "pending filter table full; firing earliest entry ahead of its deadline"
            );
            self.shared.deliver_fire(entry);
        }

        debug!(
            stream = %self.shared.stream_id,
            detection = %detection_id,
            fire_at_ms,
            "filter scheduled"
        );
        self.shared.events.emit_lossy(VigilEvent::FilterScheduled {
            stream_id: self.shared.stream_id,
            detection_id,
            category,
            fire_at_ms,
            timestamp: time::now(),
        });
        self.shared.wake.notify_one();

        ScheduleOutcome::Scheduled { fire_at_ms }
    }

    /// Cancel a pending entry before its deadline
    ///
    /// Idempotent; cancelling an already-resolved entry is a successful
    /// no-op, never an error.
    pub async fn cancel(&self, detection_id: Uuid, reason: CancelReason) -> CancelOutcome {
        let removed = {
            let mut inner = self.shared.inner.lock().await;
            inner.table.remove(&detection_id)
        };

        match removed {
            Some(_) => {
                self.shared.cancelled_total.fetch_add(1, Ordering::Relaxed);
                debug!(
                    stream = %self.shared.stream_id,
                    detection = %detection_id,
                    ?reason,
                    "scheduled filter cancelled"
                );
                self.shared.events.emit_lossy(VigilEvent::FilterCancelled {
                    stream_id: self.shared.stream_id,
                    detection_id,
                    reason,
                    timestamp: time::now(),
                });
                self.shared.wake.notify_one();
                CancelOutcome::Cancelled
            }
            None => {
                debug!(
                    stream = %self.shared.stream_id,
                    detection = %detection_id,
                    "cancel for already-resolved filter ignored"
                );
                CancelOutcome::AlreadyResolved
            }
        }
    }

    /// Tear the buffer down at stream end
    ///
    /// Every pending entry transitions to Cancelled without firing and
    /// without being attributed to a user override; the driver task stops.
    /// Returns the number of entries cancelled.
    pub async fn teardown(&self) -> usize {
        let drained: Vec<ScheduledFilter> = {
            let mut inner = self.shared.inner.lock().await;
            inner.closed = true;
            inner.deadlines.clear();
            inner.table.drain().map(|(_, entry)| entry).collect()
        };

        self.shared
            .cancelled_total
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        for entry in &drained {
            self.shared.events.emit_lossy(VigilEvent::FilterCancelled {
                stream_id: self.shared.stream_id,
                detection_id: entry.detection_id,
                reason: CancelReason::Teardown,
                timestamp: time::now(),
            });
        }
        self.shared.wake.notify_one();

        debug!(
            stream = %self.shared.stream_id,
            cancelled = drained.len(),
            "delay buffer torn down"
        );
        drained.len()
    }

    /// Number of entries currently pending
    pub async fn pending_count(&self) -> usize {
        self.shared.inner.lock().await.table.len()
    }

    /// Snapshot of the pending table, earliest deadline first
    pub async fn pending(&self) -> Vec<ScheduledFilter> {
        let inner = self.shared.inner.lock().await;
        let mut entries: Vec<ScheduledFilter> = inner.table.values().cloned().collect();
        entries.sort_by_key(|e| e.fire_at_ms);
        entries
    }

    /// Lifetime counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            scheduled: self.shared.scheduled_total.load(Ordering::Relaxed),
            fired: self.shared.fired_total.load(Ordering::Relaxed),
            cancelled: self.shared.cancelled_total.load(Ordering::Relaxed),
        }
    }
}

/// Remove and return the pending entry with the earliest deadline
fn evict_earliest(inner: &mut Inner) -> Option<ScheduledFilter> {
    loop {
        let top = inner.deadlines.peek().map(|r| r.0);
        match top {
            Some((at, id)) => {
                inner.deadlines.pop();
                let live = inner
                    .table
                    .get(&id)
                    .map_or(false, |entry| entry.fire_at_ms == at);
                if live {
                    return inner.table.remove(&id);
                }
            }
            None => return None,
        }
    }
}

/// Driver task: sleeps until the earliest live deadline, resolves due
/// entries, and exits once the scheduler is closed and drained
async fn drive(shared: Arc<Shared>) {
    enum Step {
        Exit,
        Wait,
        SleepUntil(u64),
    }

    loop {
        let step = {
            let mut inner = shared.inner.lock().await;
            let next = loop {
                let top = inner.deadlines.peek().map(|r| r.0);
                match top {
                    Some((at, id)) => {
                        let live = inner
                            .table
                            .get(&id)
                            .map_or(false, |entry| entry.fire_at_ms == at);
                        if live {
                            break Some(at);
                        }
                        inner.deadlines.pop();
                    }
                    None => break None,
                }
            };
            match next {
                Some(at) => Step::SleepUntil(at),
                None if inner.closed => Step::Exit,
                None => Step::Wait,
            }
        };

        match step {
            Step::Exit => break,
            Step::Wait => shared.wake.notified().await,
            Step::SleepUntil(deadline_ms) => {
                let deadline = shared.instant_for(deadline_ms);
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => shared.fire_due().await,
                    _ = shared.wake.notified() => {}
                }
            }
        }
    }

    debug!(stream = %shared.stream_id, "delay scheduler driver stopped");
}
