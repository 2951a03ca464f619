//! Scheduler actor: owns the tiers and hands admitted jobs to runners.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use batch_core::{
    BatchError, BatchJob, EngineConfig, EntryStatus, JobEvent, JobId, JobStatus, QueueEntry,
    QueueManager, Tier,
};
use chrono::Utc;
use db::StateStore;
use futures_util::FutureExt;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::analyzer::Analyzer;
use crate::messages::{CleanupReport, SchedulerMessage};
use crate::persistence::{QUEUE_STATUS_SNAPSHOT, StatePersistence};
use crate::runner::{BatchRunner, RunControl};

/// Scheduler actor arguments.
pub struct SchedulerArgs {
    pub config: EngineConfig,
    pub store: Arc<dyn StateStore>,
    pub analyzer: Arc<dyn Analyzer>,
    pub events: broadcast::Sender<JobEvent>,
}

/// State for the scheduler actor.
pub struct SchedulerState {
    manager: QueueManager,
    /// Admitted jobs waiting for their tier to dispatch them.
    queued: HashMap<JobId, BatchJob>,
    /// Cancellation handles of dispatched jobs.
    running: HashMap<JobId, RunControl>,
    /// Runner tasks, drained on stop.
    runners: JoinSet<()>,
    runner: Arc<BatchRunner>,
    store: Arc<dyn StateStore>,
    events: broadcast::Sender<JobEvent>,
    snapshots: Option<StatePersistence>,
    auto_cleanup_after: Option<chrono::Duration>,
    stopping: bool,
}

impl SchedulerState {
    fn new(args: SchedulerArgs) -> Self {
        let manager =
            QueueManager::new(args.config.tiers.clone()).with_preview_limit(args.config.preview_limit);
        let auto_cleanup_after = args
            .config
            .auto_cleanup_after()
            .and_then(|age| chrono::Duration::from_std(age).ok());

        Self {
            manager,
            queued: HashMap::new(),
            running: HashMap::new(),
            runners: JoinSet::new(),
            runner: Arc::new(BatchRunner::new(
                args.store.clone(),
                args.analyzer,
                args.events.clone(),
            )),
            store: args.store,
            events: args.events,
            snapshots: args.config.snapshot_dir.as_ref().map(StatePersistence::new),
            auto_cleanup_after,
            stopping: false,
        }
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    fn emit_tier_stats(&self, tier: Tier) {
        let queue = self.manager.queue(tier);
        self.emit(JobEvent::TierStatsUpdated {
            tier,
            queue_length: queue.len(),
            running_jobs: queue.running_count(),
            stats: queue.stats().clone(),
            timestamp: Utc::now(),
        });
    }

    async fn persist_entry(&self, entry: &QueueEntry) {
        if let Err(e) = self.store.save_entry(entry).await {
            tracing::warn!("Failed to persist queue entry {}: {}", entry.id, e);
        }
    }

    /// Persist the current or last entry of a job.
    async fn persist_entry_of(&self, job_id: JobId) {
        if let Some((_, entry)) = self.manager.find_by_job_id(job_id) {
            self.persist_entry(entry).await;
        }
    }

    async fn cleanup(&mut self, max_age: chrono::Duration) -> CleanupReport {
        let history_entries = self.manager.cleanup_older_than(max_age);
        let jobs = match self.store.delete_finished_before(Utc::now() - max_age).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("Failed to delete finished jobs: {}", e);
                0
            }
        };
        CleanupReport {
            history_entries,
            jobs,
        }
    }
}

/// Move dispatchable jobs to runners until every tier is at its cap or empty.
async fn dispatch_ready(myself: &ActorRef<SchedulerMessage>, state: &mut SchedulerState) {
    if state.stopping {
        return;
    }

    while let Some(entry) = state.manager.dispatch_next(None) {
        let job_id = entry.job_id;
        state.persist_entry(&entry).await;

        let Some(job) = state.queued.remove(&job_id) else {
            tracing::warn!("Dispatched entry {} has no queued job {}", entry.id, job_id);
            if let Some(done) = state.manager.complete(job_id, false) {
                state.persist_entry(&done).await;
            }
            continue;
        };

        tracing::info!("Dispatching job {} from tier '{}'", job_id, entry.tier);
        let control = RunControl::new();
        state.running.insert(job_id, control.clone());
        state.emit_tier_stats(entry.tier);

        let runner = state.runner.clone();
        let scheduler = myself.clone();
        state.runners.spawn(async move {
            let status = match AssertUnwindSafe(runner.run(job, control)).catch_unwind().await {
                Ok(Ok(job)) => Some(job.status),
                Ok(Err(_)) => None,
                Err(_) => {
                    tracing::error!("Runner for job {} panicked", job_id);
                    None
                }
            };
            let _ = scheduler.send_message(SchedulerMessage::RunFinished { job_id, status });
        });
    }
}

/// Scheduler actor. Single owner of the [`QueueManager`].
pub struct Scheduler;

impl Actor for Scheduler {
    type Msg = SchedulerMessage;
    type State = SchedulerState;
    type Arguments = SchedulerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting batch scheduler");

        let dispatch_interval = args.config.dispatch_interval();
        let housekeeping_interval = args.config.housekeeping_interval();
        let state = SchedulerState::new(args);

        if let Some(snapshots) = &state.snapshots
            && let Err(e) = snapshots.init().await
        {
            tracing::warn!("Snapshot directory {:?} unavailable: {}", snapshots.base_dir(), e);
        }

        // Dispatch tick
        let ticker = myself.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dispatch_interval);
            loop {
                interval.tick().await;
                if ticker.send_message(SchedulerMessage::Dispatch).is_err() {
                    break;
                }
            }
        });

        // Housekeeping tick
        let ticker = myself.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(housekeeping_interval);
            loop {
                interval.tick().await;
                if ticker.send_message(SchedulerMessage::Housekeeping).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SchedulerMessage::Submit { job, reply } => {
                if state.stopping {
                    let _ = reply.send(Err(BatchError::Scheduler("scheduler is stopping".into())));
                    return Ok(());
                }

                let tier = job.priority.tier();
                match state.manager.submit(&job) {
                    Ok(entry) => {
                        tracing::info!(
                            "Job {} enqueued in tier '{}' with priority {}",
                            job.id,
                            tier,
                            job.priority
                        );
                        state.persist_entry(&entry).await;
                        state.emit(JobEvent::JobEnqueued {
                            job_id: job.id,
                            entry_id: entry.id,
                            tier,
                            priority: job.priority,
                            timestamp: Utc::now(),
                        });
                        state.emit_tier_stats(tier);
                        state.queued.insert(job.id, *job);
                        let _ = reply.send(Ok(entry));

                        dispatch_ready(&myself, state).await;
                    }
                    Err(e) => {
                        if e.is_capacity() {
                            tracing::warn!("Job {} rejected: {}", job.id, e);
                            state.emit(JobEvent::JobRejected {
                                job_id: job.id,
                                tier,
                                timestamp: Utc::now(),
                            });
                        }
                        let _ = reply.send(Err(e));
                    }
                }
            }

            SchedulerMessage::Dispatch => {
                dispatch_ready(&myself, state).await;
            }

            SchedulerMessage::RunFinished { job_id, status } => {
                state.running.remove(&job_id);
                while state.runners.try_join_next().is_some() {}
                let success = matches!(
                    status,
                    Some(JobStatus::Completed | JobStatus::CompletedWithErrors)
                );

                if let Some(entry) = state.manager.complete(job_id, success) {
                    tracing::debug!(
                        "Entry {} of job {} finished as {}",
                        entry.id,
                        job_id,
                        entry.status.as_str()
                    );
                    state.persist_entry(&entry).await;
                    state.emit_tier_stats(entry.tier);
                }

                dispatch_ready(&myself, state).await;
            }

            SchedulerMessage::Cancel { job_id, reply } => {
                let control = state.running.get(&job_id).cloned();
                let cancelled = if let Some(control) = control {
                    // A run that already settled keeps its outcome.
                    if control.cancel() {
                        state.manager.cancel_by_job_id(job_id);
                        state.persist_entry_of(job_id).await;
                        state.emit(JobEvent::JobCancelled {
                            job_id,
                            was_running: true,
                            timestamp: Utc::now(),
                        });
                        tracing::info!("Cancellation requested for running job {}", job_id);
                        true
                    } else {
                        tracing::debug!("Job {} already settled or cancelled", job_id);
                        false
                    }
                } else if let Some((tier, EntryStatus::Queued)) =
                    state.manager.cancel_by_job_id(job_id)
                {
                    if let Some(mut job) = state.queued.remove(&job_id) {
                        job.mark_cancelled();
                        if let Err(e) = state.store.update_job(&job).await {
                            tracing::warn!("Failed to persist cancelled job {}: {}", job_id, e);
                        }
                    }
                    state.persist_entry_of(job_id).await;
                    state.emit_tier_stats(tier);
                    state.emit(JobEvent::JobCancelled {
                        job_id,
                        was_running: false,
                        timestamp: Utc::now(),
                    });
                    tracing::info!("Cancelled queued job {}", job_id);
                    true
                } else {
                    false
                };
                let _ = reply.send(cancelled);
            }

            SchedulerMessage::FindEntry { job_id, reply } => {
                let found = state
                    .manager
                    .find_by_job_id(job_id)
                    .map(|(tier, entry)| (tier, entry.clone()));
                let _ = reply.send(found);
            }

            SchedulerMessage::QueueStatus { reply } => {
                let _ = reply.send(state.manager.aggregate_status());
            }

            SchedulerMessage::Cleanup { max_age, reply } => {
                let report = state.cleanup(max_age).await;
                tracing::info!(
                    "Cleanup removed {} history entries and {} jobs",
                    report.history_entries,
                    report.jobs
                );
                let _ = reply.send(report);
            }

            SchedulerMessage::Housekeeping => {
                if let Some(snapshots) = &state.snapshots
                    && let Err(e) = snapshots
                        .save(QUEUE_STATUS_SNAPSHOT, &state.manager.aggregate_status())
                        .await
                {
                    tracing::warn!("Failed to write queue snapshot: {}", e);
                }

                if let Some(max_age) = state.auto_cleanup_after {
                    let report = state.cleanup(max_age).await;
                    if report != CleanupReport::default() {
                        tracing::info!(
                            "Housekeeping removed {} history entries and {} jobs",
                            report.history_entries,
                            report.jobs
                        );
                    }
                }
            }

            SchedulerMessage::Shutdown => {
                tracing::info!("Shutting down scheduler");
                state.stopping = true;
                for control in state.running.values() {
                    control.cancel();
                }
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if !state.runners.is_empty() {
            tracing::info!("Waiting for {} runners to finish", state.runners.len());
        }
        while let Some(joined) = state.runners.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Runner task failed: {}", e);
            }
        }

        tracing::info!(
            "Scheduler stopped with {} queued and {} running jobs",
            state.queued.len(),
            state.running.len()
        );
        Ok(())
    }
}
