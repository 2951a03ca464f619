#![allow(clippy::disallowed_methods)]

use std::error::Error;

use batch_core::{
    BatchError, BatchJob, EntryStatus, JobId, Priority, Queue, QueueConfig, QueueEntry,
    QueueManager, Tier, TierConfigs,
};

fn entry(priority: Priority) -> QueueEntry {
    QueueEntry::new(JobId::new(), priority)
}

fn job(priority: Priority) -> BatchJob {
    BatchJob::new("job", vec!["https://example.com".to_string()]).with_priority(priority)
}

#[test]
fn test_priority_order_with_fifo_tie_break() -> Result<(), Box<dyn Error>> {
    let mut queue = Queue::new(Tier::Normal, QueueConfig::new(10, 1));

    let low = entry(Priority::Low);
    let urgent_first = entry(Priority::Urgent);
    let normal = entry(Priority::Normal);
    let urgent_second = entry(Priority::Urgent);
    let expected = vec![urgent_first.id, urgent_second.id, normal.id, low.id];

    for e in [low, urgent_first, normal, urgent_second] {
        queue.enqueue(e)?;
    }

    let mut order = Vec::new();
    while let Some(e) = queue.dispatch_unbounded() {
        assert_eq!(e.status, EntryStatus::Running);
        assert!(e.started_at.is_some());
        order.push(e.id);
    }
    assert_eq!(order, expected);
    Ok(())
}

#[test]
fn test_enqueue_on_full_queue_is_rejected_without_mutation() -> Result<(), Box<dyn Error>> {
    let mut queue = Queue::new(Tier::Low, QueueConfig::new(2, 1));
    let first = queue.enqueue(entry(Priority::Low))?;
    queue.enqueue(entry(Priority::Low))?;

    let before = queue.status(10);
    let err = queue.enqueue(entry(Priority::Low)).unwrap_err();
    assert_eq!(
        err,
        BatchError::QueueFull {
            tier: Tier::Low,
            max_size: 2
        }
    );
    assert!(err.is_capacity());

    let after = queue.status(10);
    assert_eq!(before.upcoming, after.upcoming);
    assert_eq!(after.queue_length, 2);
    assert_eq!(after.upcoming[0].id, first);
    Ok(())
}

#[test]
fn test_try_dispatch_respects_concurrency_cap() -> Result<(), Box<dyn Error>> {
    let mut queue = Queue::new(Tier::High, QueueConfig::new(10, 2));
    for _ in 0..3 {
        queue.enqueue(entry(Priority::High))?;
    }

    let a = queue.try_dispatch().ok_or("first dispatch")?;
    let _b = queue.try_dispatch().ok_or("second dispatch")?;
    assert!(queue.try_dispatch().is_none());
    assert_eq!(queue.running_count(), 2);
    assert_eq!(queue.len(), 1);

    let finished = queue.complete(a.id, true).ok_or("complete")?;
    assert_eq!(finished.status, EntryStatus::Completed);
    assert!(finished.finished_at.is_some());
    assert_eq!(queue.stats().completed, 1);
    assert!(queue.stats().avg_processing_ms.is_some());

    assert!(queue.try_dispatch().is_some());
    assert!(queue.complete(a.id, true).is_none());
    Ok(())
}

#[test]
fn test_complete_records_failures() -> Result<(), Box<dyn Error>> {
    let mut queue = Queue::new(Tier::Normal, QueueConfig::new(10, 1));
    queue.enqueue(entry(Priority::Normal))?;
    let running = queue.try_dispatch().ok_or("dispatch")?;

    let finished = queue.complete(running.id, false).ok_or("complete")?;
    assert_eq!(finished.status, EntryStatus::Failed);
    assert_eq!(queue.stats().failed, 1);
    assert_eq!(queue.stats().success_rate(), Some(0.0));
    Ok(())
}

#[test]
fn test_average_run_time_ignores_queued_cancellations() -> Result<(), Box<dyn Error>> {
    let mut queue = Queue::new(Tier::Normal, QueueConfig::new(10, 1));
    queue.enqueue(entry(Priority::Normal))?;
    let waiting = queue.enqueue(entry(Priority::Normal))?;
    let running = queue.try_dispatch().ok_or("dispatch")?;

    assert_eq!(queue.cancel(waiting), Some(EntryStatus::Queued));
    std::thread::sleep(std::time::Duration::from_millis(50));

    let finished = queue.complete(running.id, true).ok_or("complete")?;
    let duration_ms = finished.duration_ms().ok_or("no duration")?;
    assert!(duration_ms >= 50);

    let stats = queue.stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.timed_samples, 1);
    assert_eq!(stats.avg_processing_ms, Some(duration_ms as f64));
    Ok(())
}

#[test]
fn test_cancel_queued_and_running_entries() -> Result<(), Box<dyn Error>> {
    let mut queue = Queue::new(Tier::Normal, QueueConfig::new(10, 1));
    let queued = queue.enqueue(entry(Priority::Normal))?;
    let second = queue.enqueue(entry(Priority::Normal))?;

    let running = queue.try_dispatch().ok_or("dispatch")?;
    assert_eq!(running.id, queued);

    assert_eq!(queue.cancel(second), Some(EntryStatus::Queued));
    assert_eq!(queue.len(), 0);
    assert!(queue.get(second).is_none());

    assert_eq!(queue.cancel(running.id), Some(EntryStatus::Running));
    assert_eq!(queue.running_count(), 1);
    let finished = queue.complete(running.id, true).ok_or("complete")?;
    assert_eq!(finished.status, EntryStatus::Cancelled);
    assert_eq!(queue.stats().cancelled, 2);
    assert_eq!(queue.stats().completed, 0);

    assert_eq!(queue.cancel(running.id), None);
    Ok(())
}

#[test]
fn test_status_preview_is_bounded_and_ordered() -> Result<(), Box<dyn Error>> {
    let mut queue = Queue::new(Tier::Normal, QueueConfig::new(20, 1));
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(queue.enqueue(entry(Priority::Normal))?);
    }
    let urgent = queue.enqueue(entry(Priority::Urgent))?;

    let status = queue.status(3);
    assert_eq!(status.queue_length, 6);
    assert_eq!(status.upcoming.len(), 3);
    assert_eq!(status.upcoming[0].id, urgent);
    assert_eq!(status.upcoming[1].id, ids[0]);
    assert_eq!(status.upcoming[2].id, ids[1]);
    Ok(())
}

#[test]
fn test_cleanup_only_touches_history() -> Result<(), Box<dyn Error>> {
    let mut queue = Queue::new(Tier::Normal, QueueConfig::new(10, 1));
    queue.enqueue(entry(Priority::Normal))?;
    queue.enqueue(entry(Priority::Normal))?;
    let running = queue.try_dispatch().ok_or("dispatch")?;
    queue.complete(running.id, true).ok_or("complete")?;
    queue.try_dispatch().ok_or("dispatch")?;
    queue.enqueue(entry(Priority::Normal))?;

    std::thread::sleep(std::time::Duration::from_millis(5));
    let removed = queue.cleanup_older_than(chrono::Utc::now());
    assert_eq!(removed, 1);
    assert_eq!(queue.running_count(), 1);
    assert_eq!(queue.len(), 1);
    Ok(())
}

#[test]
fn test_manager_routes_priorities_to_tiers() -> Result<(), Box<dyn Error>> {
    let mut manager = QueueManager::default();

    let urgent = manager.submit(&job(Priority::Urgent))?;
    let high = manager.submit(&job(Priority::High))?;
    let normal = manager.submit(&job(Priority::Normal))?;
    let low = manager.submit(&job(Priority::Low))?;

    assert_eq!(urgent.tier, Tier::High);
    assert_eq!(high.tier, Tier::High);
    assert_eq!(normal.tier, Tier::Normal);
    assert_eq!(low.tier, Tier::Low);
    assert_eq!(urgent.metadata["total_items"], 1);

    let status = manager.aggregate_status();
    assert_eq!(status.totals.queue_length, 4);
    assert_eq!(status.tier(Tier::High).map(|s| s.queue_length), Some(2));
    Ok(())
}

#[test]
fn test_manager_dispatches_tiers_in_fixed_order() -> Result<(), Box<dyn Error>> {
    let configs = TierConfigs::default()
        .with_tier(Tier::High, QueueConfig::new(10, 1))
        .with_tier(Tier::Normal, QueueConfig::new(10, 1))
        .with_tier(Tier::Low, QueueConfig::new(10, 1));
    let mut manager = QueueManager::new(configs);

    let low = job(Priority::Low);
    let normal = job(Priority::Normal);
    let high = job(Priority::High);
    manager.submit(&low)?;
    manager.submit(&normal)?;
    manager.submit(&high)?;

    assert_eq!(manager.dispatch_next(None).map(|e| e.job_id), Some(high.id));
    assert_eq!(manager.dispatch_next(None).map(|e| e.job_id), Some(normal.id));
    assert_eq!(manager.dispatch_next(None).map(|e| e.job_id), Some(low.id));
    assert!(manager.dispatch_next(None).is_none());

    let extra = job(Priority::High);
    manager.submit(&extra)?;
    assert!(manager.dispatch_next(Some(Tier::High)).is_none());
    manager.complete(high.id, true).ok_or("complete")?;
    assert!(manager.dispatch_next(Some(Tier::Low)).is_none());
    assert_eq!(
        manager.dispatch_next(Some(Tier::High)).map(|e| e.job_id),
        Some(extra.id)
    );
    Ok(())
}

#[test]
fn test_manager_cancel_and_find() -> Result<(), Box<dyn Error>> {
    let mut manager = QueueManager::default();
    let queued = job(Priority::Normal);
    manager.submit(&queued)?;

    let (tier, entry) = manager.find_by_job_id(queued.id).ok_or("find")?;
    assert_eq!(tier, Tier::Normal);
    assert_eq!(entry.status, EntryStatus::Queued);

    assert_eq!(
        manager.cancel_by_job_id(queued.id),
        Some((Tier::Normal, EntryStatus::Queued))
    );
    assert_eq!(manager.cancel_by_job_id(queued.id), None);
    assert_eq!(manager.cancel_by_job_id(JobId::new()), None);

    let (_, entry) = manager.find_by_job_id(queued.id).ok_or("find in history")?;
    assert_eq!(entry.status, EntryStatus::Cancelled);
    assert!(manager.find_by_job_id(JobId::new()).is_none());
    Ok(())
}

#[test]
fn test_manager_rejects_duplicate_submission() -> Result<(), Box<dyn Error>> {
    let mut manager = QueueManager::default();
    let job = job(Priority::Low);
    manager.submit(&job)?;
    assert!(matches!(manager.submit(&job), Err(BatchError::Validation(_))));
    Ok(())
}

#[test]
fn test_manager_cleanup_keeps_active_entries() -> Result<(), Box<dyn Error>> {
    let mut manager = QueueManager::default();
    let done = job(Priority::High);
    let waiting = job(Priority::Low);
    manager.submit(&done)?;
    manager.submit(&waiting)?;
    manager.dispatch_next(Some(Tier::High)).ok_or("dispatch")?;
    manager.complete(done.id, true).ok_or("complete")?;

    std::thread::sleep(std::time::Duration::from_millis(5));
    assert_eq!(manager.cleanup_older_than(chrono::Duration::zero()), 1);
    assert!(manager.find_by_job_id(done.id).is_none());
    assert!(manager.find_by_job_id(waiting.id).is_some());
    Ok(())
}

#[test]
fn test_job_validation() {
    let items = vec!["a".to_string(), "b".to_string()];

    assert!(BatchJob::new("ok", items.clone()).validate().is_ok());
    assert!(
        BatchJob::new("ids", items.clone())
            .with_external_ids(vec!["1".into(), "2".into()])
            .validate()
            .is_ok()
    );
    assert!(matches!(
        BatchJob::new("empty", Vec::new()).validate(),
        Err(BatchError::Validation(_))
    ));
    assert!(matches!(
        BatchJob::new("mismatch", items.clone())
            .with_external_ids(vec!["1".into()])
            .validate(),
        Err(BatchError::Validation(_))
    ));
    assert!(matches!(
        BatchJob::new("zero", items).with_batch_size(0).validate(),
        Err(BatchError::Validation(_))
    ));
}
