//! Background consumer that commits queued vote batches.

use super::queue::{self, QueueReceiver, VoteQueue, WriteJob};
use super::store::VoteStore;
use crate::app_config::WriterConfig;
use std::sync::Arc;
use std::time::Duration;

/// Default retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default linear backoff step.
pub const BACKOFF_STEP: Duration = Duration::from_millis(500);

/// Bounded retry with a linear backoff of `backoff_step * (attempt + 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_step: BACKOFF_STEP,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &WriterConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_step: config.backoff_step(),
        }
    }

    /// Delay before re-queueing a job whose `attempt` just failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_step * (attempt + 1)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// The survey was deleted after the votes were accepted.
    SurveyMissing,
    RetriesExhausted,
}

/// Where a job ended up after one pass through the writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Committed { attempt: u32 },
    /// Sent back to the queue as this attempt number.
    Requeued { attempt: u32 },
    PermanentlyFailed(FailureReason),
}

pub struct DurableWriter {
    store: Arc<dyn VoteStore>,
    queue: VoteQueue,
    policy: RetryPolicy,
}

impl DurableWriter {
    /// `queue` is where failed jobs are sent back to.
    pub fn new(store: Arc<dyn VoteStore>, queue: VoteQueue, policy: RetryPolicy) -> Self {
        Self {
            store,
            queue,
            policy,
        }
    }

    /// Processes one job to its next state.
    ///
    /// A failed write sleeps for the backoff before re-queueing, which holds
    /// up every job behind it. The job's cap reservation is released once it
    /// is committed or dropped.
    pub async fn process(&self, job: WriteJob) -> JobOutcome {
        let ticket = job.ticket;
        let (survey_id, participant_id) = (job.batch.survey_id, job.batch.participant_id);
        let outcome = self.write(job).await;
        if !matches!(outcome, JobOutcome::Requeued { .. }) {
            self.queue.release(survey_id, participant_id, ticket);
        }
        outcome
    }

    async fn write(&self, job: WriteJob) -> JobOutcome {
        let WriteJob {
            batch,
            attempt,
            ticket,
        } = job;

        let written = match self.store.survey_kind(batch.survey_id).await {
            Ok(Some(kind)) => self.store.replace_votes(kind, &batch).await,
            Ok(None) => {
                log::error!(
                    "Survey no longer exists, dropping votes: participant_id={}, survey_id={}",
                    batch.participant_id,
                    batch.survey_id
                );
                return JobOutcome::PermanentlyFailed(FailureReason::SurveyMissing);
            }
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                if attempt > 0 {
                    log::info!(
                        "Votes saved after {} retries: participant_id={}, survey_id={}",
                        attempt,
                        batch.participant_id,
                        batch.survey_id
                    );
                } else {
                    log::debug!(
                        "Votes saved: participant_id={}, survey_id={}, entries={}",
                        batch.participant_id,
                        batch.survey_id,
                        batch.entry_count()
                    );
                }
                JobOutcome::Committed { attempt }
            }
            Err(e) if self.policy.should_retry(attempt) => {
                let delay = self.policy.delay_for(attempt);
                log::warn!(
                    "Vote write failed, retrying in {:?}: participant_id={}, survey_id={}, attempt={}, error: {}",
                    delay,
                    batch.participant_id,
                    batch.survey_id,
                    attempt,
                    e
                );
                actix_web::rt::time::sleep(delay).await;
                self.queue.push(WriteJob {
                    batch,
                    attempt: attempt + 1,
                    ticket,
                });
                JobOutcome::Requeued {
                    attempt: attempt + 1,
                }
            }
            Err(e) => {
                log::error!(
                    "Vote write failed permanently, votes lost: participant_id={}, survey_id={}, attempts={}, error: {}",
                    batch.participant_id,
                    batch.survey_id,
                    attempt + 1,
                    e
                );
                JobOutcome::PermanentlyFailed(FailureReason::RetriesExhausted)
            }
        }
    }

    /// Drains the queue until every producer is gone.
    pub async fn run(self, mut rx: QueueReceiver) {
        log::info!(
            "Vote writer started (max_retries={}, backoff_step={:?})",
            self.policy.max_retries,
            self.policy.backoff_step
        );
        while let Some(job) = rx.next().await {
            self.process(job).await;
        }
        log::warn!("Vote queue closed, writer stopped");
    }
}

/// Owns the wiring between the queue and its writer.
pub struct VotePipeline;

impl VotePipeline {
    /// Spawns the writer on the current runtime and returns the producer handle.
    ///
    /// The writer keeps its own sender for retries, so it lives as long as the
    /// runtime does.
    pub fn start(store: Arc<dyn VoteStore>, policy: RetryPolicy, warn_depth: usize) -> VoteQueue {
        let (queue, rx) = queue::channel(warn_depth);
        let writer = DurableWriter::new(store, queue.clone(), policy);
        actix_web::rt::spawn(writer.run(rx));
        queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::surveys::SurveyKind;
    use crate::vote::VoteBatch;
    use async_trait::async_trait;
    use sea_orm::DbErr;
    use std::sync::Mutex;

    /// Fails the first `failures` writes, then commits.
    struct FlakyStore {
        kind: Option<SurveyKind>,
        failures: Mutex<u32>,
        attempts: Mutex<u32>,
        committed: Mutex<Vec<VoteBatch>>,
    }

    impl FlakyStore {
        fn new(kind: Option<SurveyKind>, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                kind,
                failures: Mutex::new(failures),
                attempts: Mutex::new(0),
                committed: Mutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> u32 {
            *self.attempts.lock().unwrap()
        }

        fn committed(&self) -> Vec<VoteBatch> {
            self.committed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VoteStore for FlakyStore {
        async fn survey_kind(&self, _survey_id: i32) -> Result<Option<SurveyKind>, DbErr> {
            Ok(self.kind)
        }

        async fn replace_votes(&self, _kind: SurveyKind, batch: &VoteBatch) -> Result<(), DbErr> {
            *self.attempts.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(DbErr::Custom("database is locked".to_string()));
            }
            self.committed.lock().unwrap().push(batch.clone());
            Ok(())
        }
    }

    fn instant_retries() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_step: Duration::ZERO,
        }
    }

    fn batch(participant_id: i32) -> VoteBatch {
        VoteBatch {
            participant_id,
            survey_id: 1,
            single_choice_entries: vec![(1, "A".to_string()), (2, "B".to_string())],
            grid_entries: Vec::new(),
            free_text: None,
            standard_tally: [("A".to_string(), 1), ("B".to_string(), 1)]
                .into_iter()
                .collect(),
        }
    }

    /// Feeds jobs back through the writer until the queue is empty.
    async fn drain(writer: &DurableWriter, rx: &mut QueueReceiver) -> Vec<JobOutcome> {
        let mut outcomes = Vec::new();
        while let Some(job) = rx.try_next() {
            outcomes.push(writer.process(job).await);
        }
        outcomes
    }

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<Duration> = (0..3).map(|a| policy.delay_for(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(1500)
            ]
        );
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[actix_rt::test]
    async fn test_commit_on_first_attempt() {
        let store = FlakyStore::new(Some(SurveyKind::SingleChoice), 0);
        let (queue, mut rx) = queue::channel(0);
        let writer = DurableWriter::new(store.clone(), queue.clone(), instant_retries());

        queue.enqueue_for_persistence(batch(1));
        let outcomes = drain(&writer, &mut rx).await;

        assert_eq!(outcomes, vec![JobOutcome::Committed { attempt: 0 }]);
        assert_eq!(store.committed(), vec![batch(1)]);
    }

    #[actix_rt::test]
    async fn test_transient_failure_is_requeued() {
        let store = FlakyStore::new(Some(SurveyKind::SingleChoice), 2);
        let (queue, mut rx) = queue::channel(0);
        let writer = DurableWriter::new(store.clone(), queue.clone(), instant_retries());

        queue.enqueue_for_persistence(batch(1));
        let outcomes = drain(&writer, &mut rx).await;

        assert_eq!(
            outcomes,
            vec![
                JobOutcome::Requeued { attempt: 1 },
                JobOutcome::Requeued { attempt: 2 },
                JobOutcome::Committed { attempt: 2 },
            ]
        );
        assert_eq!(store.committed().len(), 1);
    }

    #[actix_rt::test]
    async fn test_gives_up_after_three_retries() {
        let store = FlakyStore::new(Some(SurveyKind::SingleChoice), u32::MAX);
        let (queue, mut rx) = queue::channel(0);
        let writer = DurableWriter::new(store.clone(), queue.clone(), instant_retries());

        queue.enqueue_for_persistence(batch(1));
        let outcomes = drain(&writer, &mut rx).await;

        assert_eq!(store.attempts(), 4);
        assert_eq!(
            outcomes.last(),
            Some(&JobOutcome::PermanentlyFailed(FailureReason::RetriesExhausted))
        );
        assert!(store.committed().is_empty());
        assert_eq!(queue.depth(), 0);
    }

    #[actix_rt::test]
    async fn test_reservation_held_until_commit() {
        let store = FlakyStore::new(Some(SurveyKind::SingleChoice), 1);
        let (queue, mut rx) = queue::channel(0);
        let writer = DurableWriter::new(store.clone(), queue.clone(), instant_retries());

        queue.enqueue_for_persistence(batch(1));
        assert_eq!(queue.pending_tally(1, 0).get("A"), Some(&1));

        let first = writer.process(rx.try_next().unwrap()).await;
        assert_eq!(first, JobOutcome::Requeued { attempt: 1 });
        assert_eq!(queue.pending_tally(1, 0).get("A"), Some(&1));

        let second = writer.process(rx.try_next().unwrap()).await;
        assert_eq!(second, JobOutcome::Committed { attempt: 1 });
        assert!(queue.pending_tally(1, 0).is_empty());
    }

    #[actix_rt::test]
    async fn test_reservation_released_when_given_up() {
        let store = FlakyStore::new(Some(SurveyKind::SingleChoice), u32::MAX);
        let (queue, mut rx) = queue::channel(0);
        let writer = DurableWriter::new(store.clone(), queue.clone(), instant_retries());

        queue.enqueue_for_persistence(batch(1));
        drain(&writer, &mut rx).await;

        assert!(queue.pending_tally(1, 0).is_empty());
    }

    #[actix_rt::test]
    async fn test_missing_survey_is_not_retried() {
        let store = FlakyStore::new(None, 0);
        let (queue, mut rx) = queue::channel(0);
        let writer = DurableWriter::new(store.clone(), queue.clone(), instant_retries());

        queue.enqueue_for_persistence(batch(1));
        let outcomes = drain(&writer, &mut rx).await;

        assert_eq!(
            outcomes,
            vec![JobOutcome::PermanentlyFailed(FailureReason::SurveyMissing)]
        );
        assert_eq!(store.attempts(), 0);
    }

    #[actix_rt::test]
    async fn test_retry_goes_behind_newer_jobs() {
        let store = FlakyStore::new(Some(SurveyKind::SingleChoice), 1);
        let (queue, mut rx) = queue::channel(0);
        let writer = DurableWriter::new(store.clone(), queue.clone(), instant_retries());

        queue.enqueue_for_persistence(batch(1));
        queue.enqueue_for_persistence(batch(2));
        drain(&writer, &mut rx).await;

        let order: Vec<i32> = store.committed().iter().map(|b| b.participant_id).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[actix_rt::test]
    async fn test_pipeline_drains_in_background() {
        let store = FlakyStore::new(Some(SurveyKind::SingleChoice), 1);
        let queue = VotePipeline::start(store.clone(), instant_retries(), 0);

        queue.enqueue_for_persistence(batch(1));
        queue.enqueue_for_persistence(batch(2));

        for _ in 0..100 {
            if store.committed().len() == 2 {
                break;
            }
            actix_rt::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.committed().len(), 2);
        assert_eq!(store.attempts(), 3);
    }
}
