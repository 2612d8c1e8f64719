use std::collections::{HashMap, VecDeque};

use silo_core::data::JobId;
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use super::{FailedJob, Processor, QueueConfig, QueueJob};

/// Instructions accepted by a running [Dispatcher]
#[derive(Debug)]
pub(super) enum QueueCommand<J> {
    /// Enqueue a job for processing
    Submit(J),
    /// Drop a pending job, or abort its attempt if one is running.
    /// Cancelled jobs are not retried.
    Cancel(JobId),
}

/// What became of one attempt, as reported by the attempt task
enum Verdict<J> {
    /// The attempt succeeded, optionally handing back a follow-up job
    Completed(Option<J>),
    /// The processor returned an error
    Failed(String),
    /// The attempt exceeded the configured timeout and was aborted
    TimedOut,
}

struct InFlight<J> {
    job: J,
    attempts: usize,
    handle: JoinHandle<()>,
}

/// The queue's supervisor. It owns the pending backlog and the table of
/// in-flight attempts, spawns one task per attempt with the timeout
/// enforced inside the task, and turns verdicts into retries, follow-up
/// jobs or terminal failure notifications.
///
/// The supervisor runs until the command channel closes (every queue
/// handle dropped), at which point it aborts whatever is still in flight.
pub(super) struct Dispatcher<P: Processor> {
    processor: P,
    config: QueueConfig,
    pending: VecDeque<(P::Job, usize)>,
    running: HashMap<JobId, InFlight<P::Job>>,
    failure_tx: Option<UnboundedSender<FailedJob<P::Job>>>,
}

impl<P> Dispatcher<P>
where
    P: Processor,
{
    pub(super) fn new(
        processor: P,
        config: QueueConfig,
        failure_tx: Option<UnboundedSender<FailedJob<P::Job>>>,
    ) -> Self {
        Self {
            processor,
            config,
            pending: VecDeque::new(),
            running: HashMap::new(),
            failure_tx,
        }
    }

    /// Spawn an attempt task for `job`. The task reports its verdict over
    /// `verdict_tx`; until then the job is tracked in the in-flight table
    /// so it can be cancelled by id.
    fn launch(
        &mut self,
        verdict_tx: &UnboundedSender<(JobId, Verdict<P::Job>)>,
        job: P::Job,
        prior_attempts: usize,
    ) {
        let job_id = job.job_id().clone();
        let processor = self.processor.clone();
        let timeout = self.config.job_timeout;
        let verdict_tx = verdict_tx.clone();
        let attempt_id = job_id.clone();
        let attempt_job = job.clone();

        let handle = tokio::spawn(async move {
            let verdict =
                match tokio::time::timeout(timeout, processor.process(attempt_job)).await {
                    Ok(Ok(follow_up)) => Verdict::Completed(follow_up),
                    Ok(Err(error)) => Verdict::Failed(error.to_string()),
                    Err(_) => Verdict::TimedOut,
                };
            // Send fails only when the supervisor is already gone.
            let _ = verdict_tx.send((attempt_id, verdict));
        });

        self.running.insert(
            job_id,
            InFlight {
                job,
                attempts: prior_attempts + 1,
                handle,
            },
        );
    }

    /// Launch pending jobs until the in-flight cap is reached or the
    /// backlog runs dry.
    fn fill_slots(&mut self, verdict_tx: &UnboundedSender<(JobId, Verdict<P::Job>)>) {
        while self.running.len() < self.config.max_in_flight {
            match self.pending.pop_front() {
                Some((job, prior_attempts)) => {
                    // A redelivery of a job that is still in flight waits
                    // for the running attempt to settle.
                    if self.running.contains_key(job.job_id()) {
                        self.pending.push_back((job, prior_attempts));
                        break;
                    }
                    self.launch(verdict_tx, job, prior_attempts);
                }
                None => break,
            }
        }
    }

    /// Apply an attempt's verdict: chain a follow-up, requeue within the
    /// retry budget, or give up and notify the failure channel.
    fn settle(&mut self, job_id: JobId, verdict: Verdict<P::Job>) {
        let in_flight = match self.running.remove(&job_id) {
            Some(in_flight) => in_flight,
            // A verdict raced with a cancellation; the job is gone.
            None => return,
        };

        let error = match verdict {
            Verdict::Completed(follow_up) => {
                if let Some(next) = follow_up {
                    self.pending.push_back((next, 0));
                }
                return;
            }
            Verdict::Failed(error) => error,
            Verdict::TimedOut => {
                format!("Attempt timed out after {:?}", self.config.job_timeout)
            }
        };

        if in_flight.attempts <= self.config.retries {
            warn!(
                "Job {} attempt {} failed, retrying: {}",
                job_id, in_flight.attempts, error
            );
            self.pending.push_back((in_flight.job, in_flight.attempts));
        } else {
            error!(
                "Job {} gave up after {} attempts: {}",
                job_id, in_flight.attempts, error
            );
            if let Some(failure_tx) = &self.failure_tx {
                let _ = failure_tx.send(FailedJob {
                    job: in_flight.job,
                    attempts: in_flight.attempts,
                    error,
                });
            }
        }
    }

    /// Drop a pending job, or abort the attempt task running it.
    fn cancel(&mut self, job_id: &JobId) {
        let pending = self.pending.len();
        self.pending.retain(|(job, _)| job.job_id() != job_id);
        if self.pending.len() < pending {
            debug!("Cancelled pending job {}", job_id);
            return;
        }

        if let Some(in_flight) = self.running.remove(job_id) {
            in_flight.handle.abort();
            warn!("Cancelled running job {}", job_id);
        }
    }

    /// Supervise until every queue handle is gone.
    pub(super) async fn run(mut self, mut command_rx: UnboundedReceiver<QueueCommand<P::Job>>) {
        let (verdict_tx, mut verdict_rx) = unbounded_channel();

        loop {
            self.fill_slots(&verdict_tx);

            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(QueueCommand::Submit(job)) => {
                        self.pending.push_back((job, 0));
                    }
                    Some(QueueCommand::Cancel(job_id)) => {
                        self.cancel(&job_id);
                    }
                    None => break,
                },
                Some((job_id, verdict)) = verdict_rx.recv() => {
                    self.settle(job_id, verdict);
                }
            }
        }

        for (_, in_flight) in self.running.drain() {
            in_flight.handle.abort();
        }
    }
}
