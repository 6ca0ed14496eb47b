use crate::UserExtension;
use futures::Stream;
use jobexec::error::Error as JobError;
use jobexec::types::{JobId, Owner};
use jobexec::{ExecConfig, JobCoordinator, JobState, OutputReader};
use jobrunner_proto::job_runner_server::JobRunner;
use jobrunner_proto::output_chunk::Chunk;
use jobrunner_proto::status_response::JobState as JobStateProto;
use jobrunner_proto::{
    ExitedState, FailedState, OutputChunk, OutputRequest, RunningState, StartRequest,
    StartResponse, StartingState, StatusRequest, StatusResponse, StopRequest, StopResponse,
};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use uuid::Uuid;

// tonic wraps this in Arc internally, so we don't need Arc
pub struct JobRunnerService {
    coordinator: JobCoordinator,
}

impl JobRunnerService {
    pub fn new(config: ExecConfig, channel_capacity: usize) -> Self {
        Self {
            coordinator: JobCoordinator::spawn(config, channel_capacity),
        }
    }
}

/// The caller identity the interceptor attached to the request. Requests
/// that somehow lack one are refused.
fn identity<T>(req: &Request<T>) -> Result<Owner, Status> {
    req.extensions()
        .get::<UserExtension>()
        .map(|ext| ext.user_id.clone())
        .ok_or_else(|| Status::unauthenticated("request carries no authenticated identity"))
}

fn parse_worker_id(raw: &str) -> Result<JobId, Status> {
    Uuid::parse_str(raw)
        .map_err(|err| Status::invalid_argument(format!("malformed worker id: {}", err)))
}

/// NotFound and PermissionDenied collapse into one user-visible status so
/// identifiers cannot be probed; the distinction stays in the logs.
fn to_status(err: JobError) -> Status {
    match err {
        JobError::NotFound | JobError::PermissionDenied => {
            tracing::debug!(error = %err, "refusing job request");
            Status::permission_denied("not authorized or no such job")
        }
        JobError::InvalidArgument(msg) => Status::invalid_argument(msg),
        JobError::SpawnFailed(msg) => Status::internal(format!("failed to start job: {}", msg)),
        other => Status::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl JobRunner for JobRunnerService {
    type StreamOutputStream = Pin<Box<dyn Stream<Item = Result<OutputChunk, Status>> + Send>>;

    async fn start_job(
        &self,
        req: Request<StartRequest>,
    ) -> Result<Response<StartResponse>, Status> {
        let user_id = identity(&req)?;
        let StartRequest { argv } = req.into_inner();

        let job_id = self
            .coordinator
            .start_job(user_id, argv)
            .await
            .map_err(to_status)?;
        Ok(Response::new(StartResponse {
            worker_id: job_id.to_string(),
        }))
    }

    async fn stop_job(&self, req: Request<StopRequest>) -> Result<Response<StopResponse>, Status> {
        let user_id = identity(&req)?;
        let job_id = parse_worker_id(&req.into_inner().worker_id)?;

        match self.coordinator.stop_job(job_id, user_id).await {
            Ok(()) => Ok(Response::new(StopResponse {})),
            // stopping a finished job is a no-op success
            Err(JobError::AlreadyTerminated) => Ok(Response::new(StopResponse {})),
            Err(err) => Err(to_status(err)),
        }
    }

    async fn get_status(
        &self,
        req: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let user_id = identity(&req)?;
        let job_id = parse_worker_id(&req.into_inner().worker_id)?;

        let snapshot = self
            .coordinator
            .job_status(job_id, user_id)
            .await
            .map_err(to_status)?;
        let job_state = match snapshot.state {
            JobState::Starting => JobStateProto::Starting(StartingState {}),
            JobState::Running => JobStateProto::Running(RunningState {}),
            JobState::Exited { code } => JobStateProto::Exited(ExitedState { code }),
            JobState::Failed { reason } => JobStateProto::Failed(FailedState { reason }),
        };
        Ok(Response::new(StatusResponse {
            job_state: Some(job_state),
            pid: snapshot.pid.unwrap_or(0),
        }))
    }

    async fn stream_output(
        &self,
        req: Request<OutputRequest>,
    ) -> Result<Response<Self::StreamOutputStream>, Status> {
        let user_id = identity(&req)?;
        let job_id = parse_worker_id(&req.into_inner().worker_id)?;

        let (stdout, stderr) = self
            .coordinator
            .stream_output(job_id, user_id)
            .await
            .map_err(to_status)?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(forward_output(stdout, stderr, tx));
        Ok(Response::new(
            Box::pin(ReceiverStream::new(rx)) as Self::StreamOutputStream
        ))
    }
}

/// Interleave both readers into one labelled chunk stream. The stream ends
/// when both logs have closed; a disconnected client drops the readers.
async fn forward_output(
    mut stdout: OutputReader,
    mut stderr: OutputReader,
    tx: mpsc::Sender<Result<OutputChunk, Status>>,
) {
    let mut stdout_open = true;
    let mut stderr_open = true;
    while stdout_open || stderr_open {
        let chunk = tokio::select! {
            chunk = stdout.next_chunk(), if stdout_open => match chunk {
                Some(blob) => Chunk::Stdout(blob.to_vec()),
                None => {
                    stdout_open = false;
                    continue;
                }
            },
            chunk = stderr.next_chunk(), if stderr_open => match chunk {
                Some(blob) => Chunk::Stderr(blob.to_vec()),
                None => {
                    stderr_open = false;
                    continue;
                }
            },
        };
        let response = OutputChunk { chunk: Some(chunk) };
        if tx.send(Ok(response)).await.is_err() {
            return;
        }
    }
}
