//! Isolation helper for the job runner.
//!
//! The controller spawns this binary as
//! `jobrunner-helper --job-id <id> [limit flags] -- <user argv...>`.
//! The first (outer) stage creates and joins the per-job cgroup, unshares
//! PID, mount, and network namespaces, and re-executes itself; the second
//! stage runs as PID 1 of the new namespaces, assembles the rootfs, brings
//! up loopback, and execs the user command. Any failure before that exec
//! prints one prefixed line on stderr and exits with the sentinel code so
//! the controller can tell setup failures from command exits.

mod cgroup;
mod net;
mod rootfs;

use anyhow::{Context, Result};
use clap::Parser;
use jobexec::limits::{Limits, SETUP_ERROR_PREFIX, SETUP_FAILURE_CODE};
use nix::sched::{unshare, CloneFlags};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{getpid, Pid};
use std::os::unix::process::CommandExt;
use std::process::{self, Command};
use std::sync::atomic::{AtomicI32, Ordering};

/// Run one command in fresh namespaces under a per-job cgroup.
#[derive(Debug, Parser)]
struct Opts {
    #[clap(long = "job-id")]
    job_id: String,

    /// Hard memory cap in bytes
    #[clap(long = "memory-max", default_value_t = Limits::default().memory_max)]
    memory_max: u64,

    /// CPU quota in microseconds per period
    #[clap(long = "cpu-quota", default_value_t = Limits::default().cpu_quota)]
    cpu_quota: u64,

    /// CPU period in microseconds
    #[clap(long = "cpu-period", default_value_t = Limits::default().cpu_period)]
    cpu_period: u64,

    /// Read throughput cap on the root block device, bytes per second
    #[clap(long = "io-rbps", default_value_t = Limits::default().io_rbps)]
    io_rbps: u64,

    /// Write throughput cap on the root block device, bytes per second
    #[clap(long = "io-wbps", default_value_t = Limits::default().io_wbps)]
    io_wbps: u64,

    /// Cap on the number of tasks in the job
    #[clap(long = "pids-max", default_value_t = Limits::default().pids_max)]
    pids_max: u32,

    /// User command, after `--`
    #[clap(last = true, required = true)]
    command: Vec<String>,
}

impl Opts {
    fn limits(&self) -> Limits {
        Limits {
            memory_max: self.memory_max,
            cpu_quota: self.cpu_quota,
            cpu_period: self.cpu_period,
            io_rbps: self.io_rbps,
            io_wbps: self.io_wbps,
            pids_max: self.pids_max,
        }
    }
}

fn main() {
    let opts = Opts::parse();
    let code = match run(&opts) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", SETUP_ERROR_PREFIX, err);
            SETUP_FAILURE_CODE
        }
    };
    process::exit(code);
}

fn run(opts: &Opts) -> Result<i32> {
    if getpid().as_raw() == 1 {
        // we are the namespace leader; this only returns on error
        leader_stage(opts)
    } else {
        outer_stage(opts)
    }
}

/// Cgroup setup, namespace creation, and re-execution of this binary as
/// the namespace leader. Stays behind to forward signals and to propagate
/// the leader's exit status to the controller.
fn outer_stage(opts: &Opts) -> Result<i32> {
    cgroup::setup(&opts.job_id, &opts.limits()).context("cgroup")?;

    unshare(CloneFlags::CLONE_NEWPID | CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWNET)
        .context("unshare namespaces")?;

    let exe = std::env::current_exe().context("resolve own path")?;
    let mut command = Command::new(exe);
    command.args(std::env::args_os().skip(1));
    unsafe {
        command.pre_exec(|| {
            // the leader must not outlive this stage
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    let child = command.spawn().context("spawn namespace leader")?;
    let child_pid = Pid::from_raw(child.id() as i32);
    LEADER_PID.store(child_pid.as_raw(), Ordering::SeqCst);
    install_signal_forwarding().context("install signal forwarding")?;

    loop {
        match waitpid(child_pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(err) => return Err(err).context("wait for namespace leader"),
        }
    }
}

/// PID 1 of the new namespaces: confine the filesystem view, bring up
/// loopback, and become the user command.
fn leader_stage(opts: &Opts) -> Result<i32> {
    rootfs::build(&opts.job_id).context("rootfs")?;
    net::loopback_up().context("loopback")?;

    let err = Command::new(&opts.command[0])
        .args(&opts.command[1..])
        .exec();
    Err(err).with_context(|| format!("exec {}", opts.command[0]))
}

static LEADER_PID: AtomicI32 = AtomicI32::new(0);

extern "C" fn forward_signal(signal: libc::c_int) {
    let pid = LEADER_PID.load(Ordering::SeqCst);
    if pid > 0 {
        unsafe {
            libc::kill(pid, signal);
        }
    }
}

/// SIGTERM/SIGINT land on this host-visible process; pass them through so
/// the user command gets a chance to exit cleanly.
fn install_signal_forwarding() -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(forward_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGTERM, &action).context("sigaction SIGTERM")?;
        sigaction(Signal::SIGINT, &action).context("sigaction SIGINT")?;
    }
    Ok(())
}
