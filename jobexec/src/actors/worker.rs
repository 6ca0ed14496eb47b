//! Per-job supervision: pumps helper output into the logs, reaps the exit
//! status, finalizes the job state, and tears down the job's kernel
//! resources.

use crate::limits::{SETUP_ERROR_PREFIX, SETUP_FAILURE_CODE};
use crate::store::Job;
use bytes::BytesMut;
use nix::errno::Errno;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

/// Spawn the output pumps and the reaper for a freshly started helper.
pub(crate) fn supervise(job: Arc<Job>, mut child: Child) {
    let mut pumps = Vec::new();

    if let Some(stdout) = child.stdout.take() {
        let job = job.clone();
        pumps.push(pump(stdout, move |blob| job.append_stdout(blob)));
    }
    if let Some(stderr) = child.stderr.take() {
        let job = job.clone();
        pumps.push(pump(stderr, move |blob| job.append_stderr(blob)));
    }

    tokio::spawn(async move {
        let status = child.wait().await;

        // the pipes drain to EOF shortly after exit; wait for them so the
        // logs hold the complete output before the job turns terminal
        for pump in pumps {
            let _ = pump.await;
        }

        match status {
            Ok(status) => finalize(&job, status),
            Err(err) => {
                tracing::warn!(job_id = %job.id(), error = %err, "wait on helper failed");
                job.mark_failed(format!("wait on helper: {}", err));
            }
        }
        cleanup(&job).await;
    });
}

fn pump<R, F>(mut src: R, sink: F) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: Fn(bytes::Bytes) + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            match src.read_buf(&mut buf).await {
                Ok(n) if n > 0 => sink(buf.split().freeze()),
                _ => break,
            }
        }
    })
}

/// Map the helper's exit status onto the job's terminal state.
fn finalize(job: &Arc<Job>, status: ExitStatus) {
    if let Some(code) = status.code() {
        if code == SETUP_FAILURE_CODE {
            let reason = setup_failure_reason(job);
            tracing::info!(job_id = %job.id(), reason = %reason, "job failed during setup");
            job.mark_failed(reason);
        } else {
            tracing::info!(job_id = %job.id(), code, "job exited");
            job.mark_exited(code);
        }
    } else if let Some(signal) = status.signal() {
        tracing::info!(job_id = %job.id(), signal, "job terminated by signal");
        job.mark_exited(128 + signal);
    } else {
        job.mark_failed("helper exited without code or signal".into());
    }
}

/// The helper reports setup errors as one prefixed line on stderr; the
/// last such line is the failure reason.
fn setup_failure_reason(job: &Arc<Job>) -> String {
    let stderr = job.stderr_contents();
    String::from_utf8_lossy(&stderr)
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(SETUP_ERROR_PREFIX))
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "isolation setup failed".to_string())
}

async fn cleanup(job: &Arc<Job>) {
    remove_cgroup(job.cgroup_dir(), job).await;
    match std::fs::remove_dir_all(job.rootfs_dir()) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(job_id = %job.id(), error = %err, "failed to remove rootfs scratch dir");
        }
    }
}

/// Remove the per-job cgroup. The kernel may still be reaping namespace
/// members just after PID 1 exits, so EBUSY is retried briefly.
async fn remove_cgroup(path: &Path, job: &Arc<Job>) {
    for _ in 0..10 {
        match std::fs::remove_dir(path) {
            Ok(()) => return,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) if err.raw_os_error() == Some(Errno::EBUSY as i32) => {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(err) => {
                tracing::warn!(job_id = %job.id(), error = %err, "failed to remove cgroup");
                return;
            }
        }
    }
    tracing::warn!(job_id = %job.id(), path = %path.display(), "cgroup still busy after retries");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::JobState;
    use crate::store::JobStore;
    use bytes::Bytes;

    fn exit_status(code: i32) -> ExitStatus {
        // wait(2) encoding: exit code in bits 8..16
        ExitStatus::from_raw(code << 8)
    }

    fn signal_status(signal: i32) -> ExitStatus {
        ExitStatus::from_raw(signal)
    }

    fn running_job(store: &mut JobStore) -> Arc<Job> {
        let job = store.create("alice".into(), vec!["true".into()]);
        job.set_pid(4242);
        job.mark_running();
        job
    }

    #[test]
    fn zero_and_nonzero_exits_are_recorded() {
        let mut store = JobStore::new();
        let job = running_job(&mut store);
        finalize(&job, exit_status(0));
        assert_eq!(job.state(), JobState::Exited { code: 0 });

        let job = running_job(&mut store);
        finalize(&job, exit_status(42));
        assert_eq!(job.state(), JobState::Exited { code: 42 });
    }

    #[test]
    fn signal_death_maps_to_shell_convention() {
        let mut store = JobStore::new();
        let job = running_job(&mut store);
        finalize(&job, signal_status(9));
        assert_eq!(job.state(), JobState::Exited { code: 137 });
    }

    #[test]
    fn sentinel_exit_becomes_failed_with_stderr_reason() {
        let mut store = JobStore::new();
        let job = running_job(&mut store);
        job.append_stderr(Bytes::from_static(b"noise from the command\n"));
        job.append_stderr(Bytes::from_static(
            b"jobrunner-helper: cgroup: create /sys/fs/cgroup/jobrunner: permission denied\n",
        ));
        finalize(&job, exit_status(SETUP_FAILURE_CODE));
        assert_eq!(
            job.state(),
            JobState::Failed {
                reason: "cgroup: create /sys/fs/cgroup/jobrunner: permission denied".into()
            }
        );
    }

    #[test]
    fn sentinel_exit_without_diagnostics_gets_a_generic_reason() {
        let mut store = JobStore::new();
        let job = running_job(&mut store);
        finalize(&job, exit_status(SETUP_FAILURE_CODE));
        assert_eq!(
            job.state(),
            JobState::Failed {
                reason: "isolation setup failed".into()
            }
        );
    }
}
