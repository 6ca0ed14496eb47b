//! Scratch rootfs assembly: a tmpfs root with read-only bind mounts for
//! the system binary and library trees, then pivot_root and a fresh /proc.

use anyhow::{Context, Result};
use jobexec::limits::rootfs_dir;
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::unistd::{chdir, pivot_root};
use std::fs;
use std::path::Path;

const RO_BINDS: &[&str] = &["/bin", "/sbin", "/usr", "/lib", "/lib64"];
const DEV_NODES: &[&str] = &["null", "zero", "random", "urandom"];

pub fn build(job_id: &str) -> Result<()> {
    // keep every mount below invisible to the host namespace
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .context("make / private")?;

    let root = rootfs_dir(job_id);
    fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;
    mount(
        Some("tmpfs"),
        &root,
        Some("tmpfs"),
        MsFlags::MS_NOSUID,
        None::<&str>,
    )
    .context("mount tmpfs root")?;

    for sub in ["proc", "sys", "dev", "tmp", "oldroot"] {
        fs::create_dir_all(root.join(sub)).with_context(|| format!("create /{}", sub))?;
    }
    for &source in RO_BINDS {
        if Path::new(source).exists() {
            bind_readonly(source, &root.join(&source[1..]))?;
        }
    }
    for &node in DEV_NODES {
        bind_device(node, &root)?;
    }

    pivot_root(&root, &root.join("oldroot")).context("pivot_root")?;
    chdir("/").context("chdir to new root")?;
    umount2("/oldroot", MntFlags::MNT_DETACH).context("detach old root")?;
    let _ = fs::remove_dir("/oldroot");

    // a fresh proc reflecting only the new PID namespace
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .context("mount /proc")?;
    mount(
        Some("sysfs"),
        "/sys",
        Some("sysfs"),
        MsFlags::MS_RDONLY | MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
    .context("mount /sys")?;
    Ok(())
}

fn bind_readonly(source: &str, target: &Path) -> Result<()> {
    fs::create_dir_all(target).with_context(|| format!("create {}", target.display()))?;
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .with_context(|| format!("bind {}", source))?;
    mount(
        None::<&str>,
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_NOSUID,
        None::<&str>,
    )
    .with_context(|| format!("remount {} read-only", source))
}

fn bind_device(node: &str, root: &Path) -> Result<()> {
    let source = Path::new("/dev").join(node);
    if !source.exists() {
        return Ok(());
    }
    let target = root.join("dev").join(node);
    fs::write(&target, b"").with_context(|| format!("create {}", target.display()))?;
    mount(
        Some(&source),
        &target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .with_context(|| format!("bind /dev/{}", node))
}
