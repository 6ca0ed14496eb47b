use crate::error;
use crate::output::OutputReader;
use crate::status::StatusSnapshot;
use crate::types::{Argv, JobId, Owner};
use tokio::sync::oneshot;

pub enum CoordinatorMessage {
    StartJob {
        owner: Owner,
        argv: Argv,
        response: oneshot::Sender<error::Result<JobId>>,
    },
    StopJob {
        job_id: JobId,
        requester: Owner,
        response: oneshot::Sender<error::Result<()>>,
    },
    GetStatus {
        job_id: JobId,
        requester: Owner,
        response: oneshot::Sender<error::Result<StatusSnapshot>>,
    },
    StreamOutput {
        job_id: JobId,
        requester: Owner,
        response: oneshot::Sender<error::Result<(OutputReader, OutputReader)>>,
    },
    RemoveJob {
        job_id: JobId,
        requester: Owner,
        response: oneshot::Sender<error::Result<()>>,
    },
}
