//! In-memory registry of jobs and per-job mutable state.

use crate::error::{Error, Result};
use crate::limits::{cgroup_dir, rootfs_dir};
use crate::output::{OutputLog, OutputReader};
use crate::status::{JobState, StatusSnapshot};
use crate::types::{Argv, JobId, OutputBlob, Owner};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use uuid::Uuid;

struct JobMut {
    state: JobState,
    pid: Option<i32>,
}

/// One job: identity and owner are immutable, lifecycle state is behind a
/// per-job lock, and each output stream has its own log.
pub struct Job {
    id: JobId,
    owner: Owner,
    argv: Argv,
    created_at: SystemTime,
    cgroup: PathBuf,
    rootfs: PathBuf,
    stdout: OutputLog,
    stderr: OutputLog,
    inner: Mutex<JobMut>,
}

impl Job {
    fn new(id: JobId, owner: Owner, argv: Argv) -> Self {
        let id_str = id.to_string();
        Self {
            id,
            owner,
            argv,
            created_at: SystemTime::now(),
            cgroup: cgroup_dir(&id_str),
            rootfs: rootfs_dir(&id_str),
            stdout: OutputLog::new(),
            stderr: OutputLog::new(),
            inner: Mutex::new(JobMut {
                state: JobState::Starting,
                pid: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JobMut> {
        self.inner.lock().expect("job lock poisoned")
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn cgroup_dir(&self) -> &Path {
        &self.cgroup
    }

    pub fn rootfs_dir(&self) -> &Path {
        &self.rootfs
    }

    pub fn pid(&self) -> Option<i32> {
        self.lock().pid
    }

    /// Record the helper's host PID. Only meaningful while `Starting`.
    pub(crate) fn set_pid(&self, pid: i32) {
        let mut inner = self.lock();
        if inner.state == JobState::Starting && inner.pid.is_none() {
            inner.pid = Some(pid);
        }
    }

    /// `Starting → Running`. No-op from any other state.
    pub(crate) fn mark_running(&self) {
        let mut inner = self.lock();
        if inner.state == JobState::Starting {
            inner.state = JobState::Running;
        }
    }

    /// Terminal transition; idempotent. Closes both output logs.
    pub(crate) fn mark_exited(&self, code: i32) {
        {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = JobState::Exited { code };
        }
        self.stdout.close();
        self.stderr.close();
    }

    /// Terminal transition; idempotent. Closes both output logs.
    pub(crate) fn mark_failed(&self, reason: String) {
        {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = JobState::Failed { reason };
        }
        self.stdout.close();
        self.stderr.close();
    }

    pub fn state(&self) -> JobState {
        self.lock().state.clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        let inner = self.lock();
        StatusSnapshot {
            state: inner.state.clone(),
            pid: inner.pid,
        }
    }

    /// Append to the stdout log; dropped once the job is terminal.
    pub(crate) fn append_stdout(&self, blob: OutputBlob) {
        if self.lock().state.is_terminal() {
            return;
        }
        self.stdout.append(blob);
    }

    /// Append to the stderr log; dropped once the job is terminal.
    pub(crate) fn append_stderr(&self, blob: OutputBlob) {
        if self.lock().state.is_terminal() {
            return;
        }
        self.stderr.append(blob);
    }

    pub fn stdout_reader(&self) -> OutputReader {
        self.stdout.reader()
    }

    pub fn stderr_reader(&self) -> OutputReader {
        self.stderr.reader()
    }

    pub fn stdout_contents(&self) -> Vec<u8> {
        self.stdout.contents()
    }

    pub fn stderr_contents(&self) -> Vec<u8> {
        self.stderr.contents()
    }

    pub fn readers_attached(&self) -> bool {
        self.stdout.has_readers() || self.stderr.has_readers()
    }
}

/// Registry mapping job identifiers to jobs.
///
/// Owned by the coordinator actor, which serializes structural mutation;
/// per-job state has its own lock, so `Arc<Job>` handles can be used from
/// reaper and reader tasks without touching the registry.
pub struct JobStore {
    jobs: HashMap<JobId, Arc<Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
        }
    }

    /// Allocate a fresh identifier and register a job in state `Starting`.
    pub fn create(&mut self, owner: Owner, argv: Argv) -> Arc<Job> {
        let mut id = Uuid::new_v4();
        while self.jobs.contains_key(&id) {
            id = Uuid::new_v4();
        }
        let job = Arc::new(Job::new(id, owner, argv));
        self.jobs.insert(id, job.clone());
        job
    }

    pub fn lookup(&self, id: &JobId) -> Option<Arc<Job>> {
        self.jobs.get(id).cloned()
    }

    /// Drop a job from the registry. Only terminal jobs with no attached
    /// readers can be removed.
    pub fn remove(&mut self, id: &JobId) -> Result<()> {
        let job = self.jobs.get(id).ok_or(Error::NotFound)?;
        if !job.state().is_terminal() {
            return Err(Error::StillRunning);
        }
        if job.readers_attached() {
            return Err(Error::ReadersAttached);
        }
        self.jobs.remove(id);
        Ok(())
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
