//! Per-job cgroup v2 setup: cpu, memory, io, and pids controllers.

use anyhow::{Context, Result};
use jobexec::limits::{cgroup_dir, Limits, CGROUP_ROOT};
use std::fs;
use std::path::Path;

/// Create `/sys/fs/cgroup/jobrunner/<job-id>`, write the resource limits,
/// and move the calling process into it so everything forked afterwards
/// inherits membership.
pub fn setup(job_id: &str, limits: &Limits) -> Result<()> {
    let parent = Path::new(CGROUP_ROOT);
    fs::create_dir_all(parent)
        .with_context(|| format!("create {}", parent.display()))?;
    enable_controllers(Path::new("/sys/fs/cgroup"))?;
    enable_controllers(parent)?;

    let dir = cgroup_dir(job_id);
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

    write_limit(&dir, "cpu.max", &format!("{} {}", limits.cpu_quota, limits.cpu_period))?;
    write_limit(&dir, "memory.max", &limits.memory_max.to_string())?;
    // keep the memory cap honest
    write_limit(&dir, "memory.swap.max", "0")?;
    write_limit(&dir, "pids.max", &limits.pids_max.to_string())?;

    if let Some((major, minor)) = root_block_device() {
        write_limit(
            &dir,
            "io.max",
            &format!(
                "{}:{} rbps={} wbps={}",
                major, minor, limits.io_rbps, limits.io_wbps
            ),
        )?;
    }

    fs::write(dir.join("cgroup.procs"), std::process::id().to_string())
        .with_context(|| format!("join {}", dir.display()))?;
    Ok(())
}

fn write_limit(dir: &Path, file: &str, value: &str) -> Result<()> {
    fs::write(dir.join(file), value).with_context(|| format!("write {} = {}", file, value))
}

/// Delegate the controllers we use down to the per-job groups.
fn enable_controllers(parent: &Path) -> Result<()> {
    let subtree_control = parent.join("cgroup.subtree_control");
    let current = fs::read_to_string(&subtree_control).unwrap_or_default();
    let missing: Vec<String> = ["cpu", "memory", "io", "pids"]
        .iter()
        .filter(|ctl| !current.split_whitespace().any(|c| c == **ctl))
        .map(|ctl| format!("+{}", ctl))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    fs::write(&subtree_control, missing.join(" "))
        .with_context(|| format!("enable controllers in {}", subtree_control.display()))
}

/// The device backing `/`, if it is a real block device. Returns `None`
/// on virtual filesystems (overlay, tmpfs), where `io.max` has nothing to
/// throttle.
fn root_block_device() -> Option<(u64, u64)> {
    let st = nix::sys::stat::stat("/").ok()?;
    let major = unsafe { libc::major(st.st_dev) } as u64;
    let minor = unsafe { libc::minor(st.st_dev) } as u64;
    if major == 0 {
        return None;
    }
    Some((major, minor))
}
