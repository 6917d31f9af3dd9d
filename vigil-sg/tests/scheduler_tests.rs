//! Delay buffer scheduler timing tests
//!
//! Run under tokio's paused clock so deadlines are exercised
//! deterministically: the scheduler is anchored at epoch 0 and the tests
//! advance virtual time around the 5000ms visibility window.

use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use vigil_common::events::{CancelReason, EventBus, VigilEvent};
use vigil_common::types::{FilterAction, FilterCategory, FilterInstruction, Region};
use vigil_sg::engine::scheduler::{CancelOutcome, DelayScheduler, ScheduleOutcome};

const BUFFER_MS: u64 = 5_000;

fn instruction(detection_id: Uuid, start_ms: u64) -> FilterInstruction {
    FilterInstruction {
        detection_id,
        action: FilterAction::Blur,
        start_ms,
        end_ms: start_ms + 1_000,
        region: None,
        intensity: 0.5,
    }
}

fn scheduler(max_pending: usize) -> (DelayScheduler, broadcast::Receiver<VigilEvent>) {
    let events = EventBus::new(100);
    let rx = events.subscribe();
    let scheduler =
        DelayScheduler::with_epoch(Uuid::new_v4(), BUFFER_MS, max_pending, events, 0);
    (scheduler, rx)
}

/// Let the driver task run, then collect everything emitted so far
async fn drain(rx: &mut broadcast::Receiver<VigilEvent>) -> Vec<VigilEvent> {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn fired_ids(events: &[VigilEvent]) -> Vec<Uuid> {
    events
        .iter()
        .filter_map(|e| match e {
            VigilEvent::FilterFired { instruction, .. } => Some(instruction.detection_id),
            _ => None,
        })
        .collect()
}

fn cancelled(events: &[VigilEvent]) -> Vec<(Uuid, CancelReason)> {
    events
        .iter()
        .filter_map(|e| match e {
            VigilEvent::FilterCancelled {
                detection_id,
                reason,
                ..
            } => Some((*detection_id, *reason)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn fires_exactly_at_deadline() {
    let (scheduler, mut rx) = scheduler(16);
    let id = Uuid::new_v4();

    let outcome = scheduler
        .schedule(FilterCategory::Violence, instruction(id, 0))
        .await;
    assert_eq!(
        outcome,
        ScheduleOutcome::Scheduled {
            fire_at_ms: BUFFER_MS
        }
    );
    assert_eq!(scheduler.pending_count().await, 1);

    tokio::time::advance(Duration::from_millis(BUFFER_MS - 1)).await;
    assert!(fired_ids(&drain(&mut rx).await).is_empty());

    tokio::time::advance(Duration::from_millis(1)).await;
    let events = drain(&mut rx).await;
    assert_eq!(fired_ids(&events), vec![id]);
    assert_eq!(scheduler.pending_count().await, 0);
    assert_eq!(scheduler.stats().fired, 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_before_deadline_prevents_firing() {
    let (scheduler, mut rx) = scheduler(16);
    let id = Uuid::new_v4();
    scheduler
        .schedule(FilterCategory::Violence, instruction(id, 0))
        .await;

    tokio::time::advance(Duration::from_millis(4_000)).await;
    assert_eq!(
        scheduler.cancel(id, CancelReason::UserOverride).await,
        CancelOutcome::Cancelled
    );

    tokio::time::advance(Duration::from_millis(2_000)).await;
    let events = drain(&mut rx).await;
    assert!(fired_ids(&events).is_empty());
    assert_eq!(cancelled(&events), vec![(id, CancelReason::UserOverride)]);

    let stats = scheduler.stats();
    assert_eq!(stats.fired, 0);
    assert_eq!(stats.cancelled, 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_after_fire_is_noop() {
    let (scheduler, mut rx) = scheduler(16);
    let id = Uuid::new_v4();
    scheduler
        .schedule(FilterCategory::Violence, instruction(id, 0))
        .await;

    // Deadline passes at t=5000; the cancel arrives at t=5001
    tokio::time::advance(Duration::from_millis(5_001)).await;
    let events = drain(&mut rx).await;
    assert_eq!(fired_ids(&events), vec![id]);

    assert_eq!(
        scheduler.cancel(id, CancelReason::UserOverride).await,
        CancelOutcome::AlreadyResolved
    );
    let events = drain(&mut rx).await;
    assert!(cancelled(&events).is_empty());

    // Exactly one terminal state was reached
    let stats = scheduler.stats();
    assert_eq!(stats.fired, 1);
    assert_eq!(stats.cancelled, 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_is_idempotent() {
    let (scheduler, _rx) = scheduler(16);
    let id = Uuid::new_v4();
    scheduler
        .schedule(FilterCategory::Violence, instruction(id, 0))
        .await;

    assert_eq!(
        scheduler.cancel(id, CancelReason::UserOverride).await,
        CancelOutcome::Cancelled
    );
    assert_eq!(
        scheduler.cancel(id, CancelReason::UserOverride).await,
        CancelOutcome::AlreadyResolved
    );
    assert_eq!(scheduler.stats().cancelled, 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_detection_id_is_rejected() {
    let (scheduler, mut rx) = scheduler(16);
    let id = Uuid::new_v4();

    assert!(matches!(
        scheduler
            .schedule(FilterCategory::Violence, instruction(id, 0))
            .await,
        ScheduleOutcome::Scheduled { .. }
    ));
    assert_eq!(
        scheduler
            .schedule(FilterCategory::Violence, instruction(id, 0))
            .await,
        ScheduleOutcome::Duplicate
    );

    tokio::time::advance(Duration::from_millis(BUFFER_MS)).await;
    assert_eq!(fired_ids(&drain(&mut rx).await).len(), 1);
    assert_eq!(scheduler.stats().scheduled, 1);
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_all_pending_without_firing() {
    let (scheduler, mut rx) = scheduler(16);
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for (i, id) in ids.iter().enumerate() {
        scheduler
            .schedule(FilterCategory::Violence, instruction(*id, i as u64 * 100))
            .await;
    }

    assert_eq!(scheduler.teardown().await, 3);
    assert_eq!(scheduler.pending_count().await, 0);

    tokio::time::advance(Duration::from_millis(20_000)).await;
    let events = drain(&mut rx).await;
    assert!(fired_ids(&events).is_empty());

    let cancelled = cancelled(&events);
    assert_eq!(cancelled.len(), 3);
    assert!(cancelled
        .iter()
        .all(|(_, reason)| *reason == CancelReason::Teardown));

    // The buffer no longer accepts work
    assert_eq!(
        scheduler
            .schedule(FilterCategory::Violence, instruction(Uuid::new_v4(), 0))
            .await,
        ScheduleOutcome::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn entries_fire_in_deadline_order() {
    let (scheduler, mut rx) = scheduler(16);
    let late = Uuid::new_v4();
    let early = Uuid::new_v4();

    // Submission order is late-deadline first
    scheduler
        .schedule(FilterCategory::Violence, instruction(late, 1_000))
        .await;
    scheduler
        .schedule(FilterCategory::Violence, instruction(early, 0))
        .await;

    tokio::time::advance(Duration::from_millis(BUFFER_MS)).await;
    assert_eq!(fired_ids(&drain(&mut rx).await), vec![early]);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert_eq!(fired_ids(&drain(&mut rx).await), vec![late]);
}

#[tokio::test(start_paused = true)]
async fn table_pressure_fires_earliest_entry_early() {
    let (scheduler, mut rx) = scheduler(2);
    let first = Uuid::new_v4();
    scheduler
        .schedule(FilterCategory::Violence, instruction(first, 0))
        .await;
    scheduler
        .schedule(FilterCategory::Violence, instruction(Uuid::new_v4(), 100))
        .await;

    // Third entry exceeds the cap: the earliest-deadline entry fires now
    scheduler
        .schedule(FilterCategory::Violence, instruction(Uuid::new_v4(), 200))
        .await;

    let events = drain(&mut rx).await;
    assert_eq!(fired_ids(&events), vec![first]);
    assert_eq!(scheduler.pending_count().await, 2);

    // The evicted entry fires only once
    tokio::time::advance(Duration::from_millis(BUFFER_MS + 200)).await;
    let events = drain(&mut rx).await;
    assert_eq!(fired_ids(&events).len(), 2);
    assert!(!fired_ids(&events).contains(&first));
    assert_eq!(scheduler.stats().fired, 3);
}

#[tokio::test(start_paused = true)]
async fn overlapping_regions_resolve_independently() {
    let (scheduler, mut rx) = scheduler(16);
    let region = Some(Region {
        x: 0.0,
        y: 0.0,
        width: 100.0,
        height: 100.0,
    });

    let kept = Uuid::new_v4();
    let revealed = Uuid::new_v4();
    let mut first = instruction(kept, 0);
    first.region = region;
    let mut second = instruction(revealed, 0);
    second.region = region;

    scheduler.schedule(FilterCategory::Sexual, first).await;
    scheduler.schedule(FilterCategory::Sexual, second).await;

    // Cancelling one overlapping entry leaves the other untouched
    scheduler.cancel(revealed, CancelReason::UserOverride).await;
    tokio::time::advance(Duration::from_millis(BUFFER_MS)).await;

    let events = drain(&mut rx).await;
    assert_eq!(fired_ids(&events), vec![kept]);
    assert_eq!(cancelled(&events).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn buffer_delay_is_clamped() {
    let events = EventBus::new(16);
    let scheduler = DelayScheduler::with_epoch(Uuid::new_v4(), 500, 16, events.clone(), 0);
    assert_eq!(scheduler.buffer_ms(), 3_000);

    let scheduler = DelayScheduler::with_epoch(Uuid::new_v4(), 60_000, 16, events, 0);
    assert_eq!(scheduler.buffer_ms(), 10_000);
}
