use super::messages::CoordinatorMessage;
use crate::actors::worker;
use crate::config::ExecConfig;
use crate::error::{self, Error};
use crate::output::OutputReader;
use crate::store::{Job, JobStore};
use crate::types::{Argv, JobId, Owner};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process;
use tokio::sync::{mpsc, oneshot};

pub struct JobCoordinator {
    inbox: mpsc::Receiver<CoordinatorMessage>,
    config: ExecConfig,
    store: JobStore,
}

impl JobCoordinator {
    pub fn spawn(inbox: mpsc::Receiver<CoordinatorMessage>, config: ExecConfig) {
        let actor = Self {
            inbox,
            config,
            store: JobStore::new(),
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        use self::CoordinatorMessage::*;
        while let Some(msg) = self.inbox.recv().await {
            match msg {
                StartJob {
                    owner,
                    argv,
                    response,
                } => {
                    self.start_job(owner, argv, response);
                }
                StopJob {
                    job_id,
                    requester,
                    response,
                } => {
                    self.stop_job(job_id, requester, response);
                }
                GetStatus {
                    job_id,
                    requester,
                    response,
                } => {
                    let _ = response.send(
                        self.authorize(&job_id, &requester)
                            .map(|job| job.status()),
                    );
                }
                StreamOutput {
                    job_id,
                    requester,
                    response,
                } => {
                    let _ = response.send(self.stream_output(job_id, requester));
                }
                RemoveJob {
                    job_id,
                    requester,
                    response,
                } => {
                    let result = self
                        .authorize(&job_id, &requester)
                        .and_then(|_| self.store.remove(&job_id));
                    let _ = response.send(result);
                }
            }
        }
    }

    /// Look the job up and check that the requester owns it. Both failures
    /// are distinct here; callers may collapse them at their surface.
    fn authorize(&self, job_id: &JobId, requester: &str) -> error::Result<Arc<Job>> {
        let job = self.store.lookup(job_id).ok_or(Error::NotFound)?;
        if job.owner() != requester {
            return Err(Error::PermissionDenied);
        }
        Ok(job)
    }

    fn start_job(
        &mut self,
        owner: Owner,
        argv: Argv,
        response: oneshot::Sender<error::Result<JobId>>,
    ) {
        if argv.is_empty() || argv[0].is_empty() {
            let _ = response.send(Err(Error::InvalidArgument("empty command".into())));
            return;
        }

        let job = self.store.create(owner, argv.clone());
        let limits = &self.config.limits;
        let mut command = process::Command::new(&self.config.helper_path);
        command
            .arg("--job-id")
            .arg(job.id().to_string())
            .arg("--memory-max")
            .arg(limits.memory_max.to_string())
            .arg("--cpu-quota")
            .arg(limits.cpu_quota.to_string())
            .arg("--cpu-period")
            .arg(limits.cpu_period.to_string())
            .arg("--io-rbps")
            .arg(limits.io_rbps.to_string())
            .arg("--io-wbps")
            .arg(limits.io_wbps.to_string())
            .arg("--pids-max")
            .arg(limits.pids_max.to_string())
            .arg("--")
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match command.spawn() {
            Ok(child) => {
                if let Some(pid) = child.id() {
                    job.set_pid(pid as i32);
                }
                job.mark_running();
                tracing::info!(
                    job_id = %job.id(),
                    owner = %job.owner(),
                    command = %argv[0],
                    pid = ?job.pid(),
                    "started job"
                );
                worker::supervise(job.clone(), child);
                let _ = response.send(Ok(job.id()));
            }
            Err(err) => {
                // the job stays in the store as Failed so the owner can
                // still inspect it
                tracing::warn!(job_id = %job.id(), error = %err, "failed to spawn helper");
                job.mark_failed(format!("spawn helper: {}", err));
                let _ = response.send(Err(Error::SpawnFailed(err.to_string())));
            }
        }
    }

    fn stop_job(
        &mut self,
        job_id: JobId,
        requester: Owner,
        response: oneshot::Sender<error::Result<()>>,
    ) {
        let job = match self.authorize(&job_id, &requester) {
            Ok(job) => job,
            Err(err) => {
                let _ = response.send(Err(err));
                return;
            }
        };

        let status = job.status();
        if status.state.is_terminal() {
            let _ = response.send(Err(Error::AlreadyTerminated));
            return;
        }
        let pid = match status.pid {
            Some(pid) => pid,
            None => {
                let _ = response.send(Err(Error::Internal("job has no pid".into())));
                return;
            }
        };

        tracing::info!(job_id = %job.id(), pid, "stopping job");
        signal_job(pid, Signal::SIGTERM);

        // escalate off the actor; the reaper will observe whichever
        // signal lands
        let grace = self.config.stop_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !job.state().is_terminal() {
                tracing::info!(job_id = %job.id(), pid, "escalating to SIGKILL");
                signal_job(pid, Signal::SIGKILL);
            }
        });

        let _ = response.send(Ok(()));
    }

    fn stream_output(
        &mut self,
        job_id: JobId,
        requester: Owner,
    ) -> error::Result<(OutputReader, OutputReader)> {
        let job = self.authorize(&job_id, &requester)?;
        Ok((job.stdout_reader(), job.stderr_reader()))
    }
}

fn signal_job(pid: i32, signal: Signal) {
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) => {}
        // already reaped; the waiter will finalize the state
        Err(Errno::ESRCH) => {}
        Err(err) => {
            tracing::warn!(pid, signal = ?signal, error = %err, "failed to signal job");
        }
    }
}
