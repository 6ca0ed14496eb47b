mod actor;
mod messages;

use self::actor::JobCoordinator;
use self::messages::CoordinatorMessage::{
    self, GetStatus, RemoveJob, StartJob, StopJob, StreamOutput,
};
use crate::config::ExecConfig;
use crate::error;
use crate::output::OutputReader;
use crate::status::StatusSnapshot;
use crate::types::{Argv, JobId, Owner};
use tokio::sync::{mpsc, oneshot};

/// A `JobCoordinator` which provides functionality for managing jobs and
/// querying job state.
///
/// This struct is actually an actor handle; the real work is done in the
/// actor spawned by `JobCoordinatorHandle::spawn`, which exclusively owns
/// the job registry. The handle can be cloned freely in a multi-thread
/// async context without any extra synchronization, and every operation
/// takes the requester identity it is performed on behalf of.
#[derive(Clone)]
pub struct JobCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
}

impl JobCoordinatorHandle {
    /// Spawn a new coordinator.
    ///
    /// Specify the capacity of the coordinator's message queue; this limits
    /// the build-up of inbound operations.
    pub fn spawn(config: ExecConfig, message_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(message_capacity);
        JobCoordinator::spawn(receiver, config);
        Self { sender }
    }

    /// Start a new job owned by `owner`.
    pub async fn start_job(&self, owner: Owner, argv: Argv) -> error::Result<JobId> {
        let (tx, rx) = oneshot::channel();
        let msg = StartJob {
            owner,
            argv,
            response: tx,
        };
        self.sender.send(msg).await.expect("JobCoordinator exited");
        rx.await.expect("JobCoordinator exited")
    }

    /// Stop a job: SIGTERM now, SIGKILL after the configured grace.
    /// Returns once the first signal has been delivered.
    pub async fn stop_job(&self, job_id: JobId, requester: Owner) -> error::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StopJob {
                job_id,
                requester,
                response: tx,
            })
            .await
            .expect("JobCoordinator exited");
        rx.await.expect("JobCoordinator exited")
    }

    pub async fn job_status(
        &self,
        job_id: JobId,
        requester: Owner,
    ) -> error::Result<StatusSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(GetStatus {
                job_id,
                requester,
                response: tx,
            })
            .await
            .expect("JobCoordinator exited");
        rx.await.expect("JobCoordinator exited")
    }

    /// Readers over the job's stdout and stderr, each positioned at the
    /// start of the history.
    pub async fn stream_output(
        &self,
        job_id: JobId,
        requester: Owner,
    ) -> error::Result<(OutputReader, OutputReader)> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StreamOutput {
                job_id,
                requester,
                response: tx,
            })
            .await
            .expect("JobCoordinator exited");
        rx.await.expect("JobCoordinator exited")
    }

    /// Reclaim a terminal job from the registry. Fails while the job is
    /// live or has attached readers.
    pub async fn remove_job(&self, job_id: JobId, requester: Owner) -> error::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RemoveJob {
                job_id,
                requester,
                response: tx,
            })
            .await
            .expect("JobCoordinator exited");
        rx.await.expect("JobCoordinator exited")
    }
}
