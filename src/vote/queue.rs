//! Unbounded FIFO between request handlers and the vote writer.
//!
//! Every queued batch also holds a reservation of its standard-answer letters
//! until the writer commits or drops it, so option caps can be checked against
//! votes that are accepted but not yet stored.

use super::quota::{merge_tally, OptionTally};
use super::VoteBatch;
use dashmap::DashMap;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::lock::{Mutex, MutexGuard};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// A batch waiting to be written, with the number of attempts already failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteJob {
    pub batch: VoteBatch,
    pub attempt: u32,
    /// Reservation held in the pending tally; 0 holds none.
    pub ticket: u64,
}

impl WriteJob {
    pub fn new(batch: VoteBatch) -> Self {
        Self {
            batch,
            attempt: 0,
            ticket: 0,
        }
    }
}

/// Newest queued batch of one participant for one survey.
#[derive(Debug)]
struct Reservation {
    ticket: u64,
    tally: OptionTally,
}

/// Producer side. Cheap to clone; every request handler holds one.
#[derive(Clone)]
pub struct VoteQueue {
    tx: UnboundedSender<WriteJob>,
    depth: Arc<AtomicUsize>,
    warn_depth: usize,
    /// Keyed by `(survey_id, participant_id)`.
    pending: Arc<DashMap<(i32, i32), Reservation>>,
    next_ticket: Arc<AtomicU64>,
    admission: Arc<Mutex<()>>,
}

/// Consumer side, owned by the writer.
pub struct QueueReceiver {
    rx: UnboundedReceiver<WriteJob>,
    depth: Arc<AtomicUsize>,
}

/// Creates a connected queue. A depth warning is logged every `warn_depth`
/// pending jobs; zero disables it.
pub fn channel(warn_depth: usize) -> (VoteQueue, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        VoteQueue {
            tx,
            depth: depth.clone(),
            warn_depth,
            pending: Arc::new(DashMap::new()),
            next_ticket: Arc::new(AtomicU64::new(1)),
            admission: Arc::new(Mutex::new(())),
        },
        QueueReceiver { rx, depth },
    )
}

impl VoteQueue {
    /// Queues a fresh batch. Never blocks.
    ///
    /// The batch replaces any reservation its participant already holds for
    /// the survey, matching how the writer replaces stored votes.
    pub fn enqueue_for_persistence(&self, batch: VoteBatch) {
        log::debug!(
            "Queueing votes: participant_id={}, survey_id={}, entries={}",
            batch.participant_id,
            batch.survey_id,
            batch.entry_count()
        );
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(
            (batch.survey_id, batch.participant_id),
            Reservation {
                ticket,
                tally: batch.standard_tally.clone(),
            },
        );
        self.push(WriteJob {
            batch,
            attempt: 0,
            ticket,
        });
    }

    /// Appends a job to the back of the queue.
    pub(crate) fn push(&self, job: WriteJob) {
        let participant_id = job.batch.participant_id;
        let survey_id = job.batch.survey_id;
        let ticket = job.ticket;

        // Counted before sending so the consumer never decrements first.
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        match self.tx.unbounded_send(job) {
            Ok(()) => {
                if self.warn_depth > 0 && depth % self.warn_depth == 0 {
                    log::warn!("Vote queue depth reached {}; writer is falling behind", depth);
                }
            }
            Err(_) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                self.release(survey_id, participant_id, ticket);
                log::error!(
                    "Vote writer is not running, dropping votes: participant_id={}, survey_id={}",
                    participant_id,
                    survey_id
                );
            }
        }
    }

    /// Drops a job's reservation unless a newer batch has replaced it.
    pub(crate) fn release(&self, survey_id: i32, participant_id: i32, ticket: u64) {
        if ticket == 0 {
            return;
        }
        self.pending
            .remove_if(&(survey_id, participant_id), |_, r| r.ticket == ticket);
    }

    /// Standard-answer letters of queued batches for a survey, leaving out
    /// `participant_id`.
    pub fn pending_tally(&self, survey_id: i32, participant_id: i32) -> OptionTally {
        let mut tally = OptionTally::new();
        for entry in self.pending.iter() {
            let (survey, participant) = *entry.key();
            if survey == survey_id && participant != participant_id {
                merge_tally(&mut tally, &entry.value().tally);
            }
        }
        tally
    }

    /// Serializes cap checks with their enqueue. Hold the guard from reading
    /// the tallies until the batch is queued.
    pub async fn admit(&self) -> MutexGuard<'_, ()> {
        self.admission.lock().await
    }

    /// Jobs enqueued but not yet taken by the writer.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

impl QueueReceiver {
    /// Waits for the next job. `None` once every producer is gone.
    pub async fn next(&mut self) -> Option<WriteJob> {
        let job = self.rx.next().await;
        if job.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        job
    }

    /// Takes a job if one is ready.
    pub fn try_next(&mut self) -> Option<WriteJob> {
        match self.rx.try_next() {
            Ok(Some(job)) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                Some(job)
            }
            _ => None,
        }
    }
}
