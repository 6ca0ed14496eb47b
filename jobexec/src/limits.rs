//! Resource caps and filesystem layout shared between the job controller
//! and the isolation helper binary.

use std::path::PathBuf;

/// Exit code the helper reserves for failures before the user command is
/// exec'd. The reaper reclassifies this exit as a setup failure instead of
/// a normal exit.
pub const SETUP_FAILURE_CODE: i32 = 125;

/// Prefix of the one-line setup errors the helper writes to stderr.
pub const SETUP_ERROR_PREFIX: &str = "jobrunner-helper:";

/// Environment variable overriding the compiled-in helper path.
pub const HELPER_PATH_ENV: &str = "JOBRUNNER_HELPER";

/// Default install location of the helper binary.
pub const DEFAULT_HELPER_PATH: &str = "/usr/local/bin/jobrunner-helper";

/// Parent cgroup under which per-job cgroups are created.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup/jobrunner";

/// Scratch directory under which per-job rootfs mounts are assembled.
pub const ROOTFS_ROOT: &str = "/run/jobrunner/rootfs";

/// Per-job resource caps, applied through cgroup v2 controllers.
#[derive(Clone, Debug)]
pub struct Limits {
    /// Hard memory cap in bytes (`memory.max`).
    pub memory_max: u64,
    /// CPU bandwidth quota in microseconds per period (`cpu.max`).
    pub cpu_quota: u64,
    /// CPU bandwidth period in microseconds (`cpu.max`).
    pub cpu_period: u64,
    /// Read throughput cap on the root block device, bytes per second (`io.max`).
    pub io_rbps: u64,
    /// Write throughput cap on the root block device, bytes per second (`io.max`).
    pub io_wbps: u64,
    /// Cap on the number of tasks in the job (`pids.max`).
    pub pids_max: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            memory_max: 100 * 1024 * 1024,
            cpu_quota: 100_000,
            cpu_period: 100_000,
            io_rbps: 1024 * 1024,
            io_wbps: 1024 * 1024,
            pids_max: 256,
        }
    }
}

pub fn cgroup_dir(job_id: &str) -> PathBuf {
    PathBuf::from(CGROUP_ROOT).join(job_id)
}

pub fn rootfs_dir(job_id: &str) -> PathBuf {
    PathBuf::from(ROOTFS_ROOT).join(job_id)
}
