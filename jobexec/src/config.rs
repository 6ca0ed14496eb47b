use crate::limits::{Limits, DEFAULT_HELPER_PATH, HELPER_PATH_ENV};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Controller-side knobs for launching jobs.
#[derive(Clone, Debug)]
pub struct ExecConfig {
    /// Path to the isolation helper binary.
    pub helper_path: PathBuf,
    /// Resource caps applied to every job.
    pub limits: Limits,
    /// Delay between SIGTERM and SIGKILL when stopping a job.
    pub stop_grace: Duration,
}

impl Default for ExecConfig {
    fn default() -> Self {
        let helper_path = env::var_os(HELPER_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HELPER_PATH));
        Self {
            helper_path,
            limits: Limits::default(),
            stop_grace: Duration::from_secs(5),
        }
    }
}
