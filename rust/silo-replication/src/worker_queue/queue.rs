use super::{
    dispatcher::{Dispatcher, QueueCommand},
    FailedJob, Processor,
};
use anyhow::{anyhow, Result};
use silo_core::data::JobId;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

/// Runtime knobs for a [WorkerQueue]
#[derive(Clone, Debug)]
pub struct QueueConfig {
    /// How many jobs may be in flight at once
    pub max_in_flight: usize,
    /// How many additional attempts a failed or timed-out job is granted
    /// before it is reported on the failure channel
    pub retries: usize,
    /// How long a single attempt may run before it is aborted
    pub job_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            retries: 1,
            job_timeout: Duration::from_secs(60 * 3),
        }
    }
}

/// Handle to a running job queue.
///
/// Jobs submitted here are performed by a supervisor task against the
/// [Processor] the queue was spawned with. Dropping every handle closes the
/// command channel; the supervisor then aborts whatever is still in flight
/// and exits.
pub struct WorkerQueue<P: Processor> {
    command_tx: UnboundedSender<QueueCommand<P::Job>>,
}

impl<P> WorkerQueue<P>
where
    P: Processor,
{
    /// Start a queue over `processor`. When `failure_tx` is provided, jobs
    /// that exhaust their attempts are reported on it.
    pub fn spawn(
        processor: P,
        config: QueueConfig,
        failure_tx: Option<UnboundedSender<FailedJob<P::Job>>>,
    ) -> Result<Self> {
        if config.max_in_flight == 0 {
            return Err(anyhow!("max_in_flight must be greater than 0."));
        }

        let (command_tx, command_rx) = unbounded_channel();
        tokio::spawn(Dispatcher::new(processor, config, failure_tx).run(command_rx));

        Ok(Self { command_tx })
    }

    /// Submit a job for processing.
    pub fn submit(&self, job: P::Job) -> Result<()> {
        self.command_tx
            .send(QueueCommand::Submit(job))
            .map_err(|_| anyhow!("Queue is shut down."))
    }

    /// Cancel a job by id: a pending job is dropped, a running attempt is
    /// aborted. Cancelled jobs are not retried.
    pub fn cancel(&self, job_id: &JobId) -> Result<()> {
        self.command_tx
            .send(QueueCommand::Cancel(job_id.clone()))
            .map_err(|_| anyhow!("Queue is shut down."))
    }
}
