//! Integration tests against the real isolation helper.
//!
//! These need root, cgroup v2, and a built `jobrunner-helper` binary; each
//! test skips itself with a message when the environment cannot run it.
//! Run with: `cargo build --workspace && sudo -E cargo test -p jobexec --test isolation`

use jobexec::error::Error as JobError;
use jobexec::types::JobId;
use jobexec::{ExecConfig, JobCoordinator, JobState, OutputReader, StatusSnapshot};
use std::path::Path;
use std::time::Duration;

fn privileged_config() -> Option<ExecConfig> {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: requires root");
        return None;
    }
    if !Path::new("/sys/fs/cgroup/cgroup.controllers").exists() {
        eprintln!("skipping: requires cgroup v2");
        return None;
    }
    let mut config = ExecConfig::default();
    if !config.helper_path.exists() {
        let fallback = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../target/debug/jobrunner-helper");
        if !fallback.exists() {
            eprintln!("skipping: jobrunner-helper not built");
            return None;
        }
        config.helper_path = fallback;
    }
    config.stop_grace = Duration::from_secs(2);
    Some(config)
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

async fn read_all(mut reader: OutputReader) -> Vec<u8> {
    let mut buf = Vec::new();
    while let Some(chunk) = reader.next_chunk().await {
        buf.extend_from_slice(&chunk);
    }
    buf
}

async fn wait_done(coordinator: &JobCoordinator, job_id: JobId) -> StatusSnapshot {
    for _ in 0..300 {
        let status = coordinator
            .job_status(job_id, "alice".into())
            .await
            .expect("job vanished while polling");
        if status.done() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("job {} never reached a terminal state", job_id);
}

async fn run_to_completion(
    coordinator: &JobCoordinator,
    args: &[&str],
) -> (StatusSnapshot, Vec<u8>, Vec<u8>) {
    let job_id = coordinator
        .start_job("alice".into(), argv(args))
        .await
        .expect("start job err");
    let (stdout, stderr) = coordinator
        .stream_output(job_id, "alice".into())
        .await
        .expect("stream err");
    let stdout = read_all(stdout).await;
    let stderr = read_all(stderr).await;
    let status = wait_done(coordinator, job_id).await;
    (status, stdout, stderr)
}

#[tokio::test]
async fn job_sees_only_its_own_pid_namespace() {
    let config = match privileged_config() {
        Some(config) => config,
        None => return,
    };
    let coordinator = JobCoordinator::spawn(config, 32);

    let (status, stdout, stderr) =
        run_to_completion(&coordinator, &["sh", "-c", "ps -A"]).await;
    assert_eq!(
        status.exit_code(),
        Some(0),
        "ps failed: {}",
        String::from_utf8_lossy(&stderr)
    );
    let lines = stdout.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count();
    // header plus at most sh and ps themselves
    assert!(lines <= 4, "unexpected processes visible:\n{}", String::from_utf8_lossy(&stdout));
}

#[tokio::test]
async fn job_network_namespace_has_only_loopback() {
    let config = match privileged_config() {
        Some(config) => config,
        None => return,
    };
    let coordinator = JobCoordinator::spawn(config, 32);

    let (status, stdout, stderr) =
        run_to_completion(&coordinator, &["ip", "link"]).await;
    assert_eq!(
        status.exit_code(),
        Some(0),
        "ip failed: {}",
        String::from_utf8_lossy(&stderr)
    );
    let listing = String::from_utf8_lossy(&stdout);
    assert!(listing.contains("lo"), "loopback missing:\n{}", listing);
    assert!(!listing.contains("\n2:"), "extra interfaces visible:\n{}", listing);
}

#[tokio::test]
async fn job_cannot_see_host_files_outside_its_rootfs() {
    let config = match privileged_config() {
        Some(config) => config,
        None => return,
    };
    let coordinator = JobCoordinator::spawn(config, 32);

    let (status, _, _) =
        run_to_completion(&coordinator, &["sh", "-c", "test -e /etc/hostname"]).await;
    assert_eq!(status.exit_code(), Some(1));

    let (status, _, _) = run_to_completion(&coordinator, &["sh", "-c", "test -d /root"]).await;
    assert_eq!(status.exit_code(), Some(1));
}

#[tokio::test]
async fn job_rootfs_has_a_writable_tmp() {
    let config = match privileged_config() {
        Some(config) => config,
        None => return,
    };
    let coordinator = JobCoordinator::spawn(config, 32);

    let (status, _, stderr) = run_to_completion(
        &coordinator,
        &["sh", "-c", "echo scratch > /tmp/x && cat /tmp/x > /dev/null"],
    )
    .await;
    assert_eq!(
        status.exit_code(),
        Some(0),
        "{}",
        String::from_utf8_lossy(&stderr)
    );
}

#[tokio::test]
async fn memory_cap_kills_oversized_allocations() {
    let config = match privileged_config() {
        Some(config) => config,
        None => return,
    };
    let coordinator = JobCoordinator::spawn(config, 32);

    // a 200 MiB read buffer under the default 100 MiB cap
    let (status, _, _) = run_to_completion(
        &coordinator,
        &["sh", "-c", "dd if=/dev/zero of=/dev/null bs=200M count=1"],
    )
    .await;
    assert!(status.done());
    assert_ne!(status.exit_code(), Some(0), "allocation survived the cap");
}

#[tokio::test]
async fn cpu_usage_is_capped_to_one_core() {
    let config = match privileged_config() {
        Some(config) => config,
        None => return,
    };
    let coordinator = JobCoordinator::spawn(config, 32);

    let job_id = coordinator
        .start_job(
            "alice".into(),
            argv(&[
                "sh",
                "-c",
                "for i in 1 2 3 4; do while :; do :; done & done; wait",
            ]),
        )
        .await
        .expect("start job err");

    tokio::time::sleep(Duration::from_secs(2)).await;
    let cpu_stat = std::fs::read_to_string(
        jobexec::limits::cgroup_dir(&job_id.to_string()).join("cpu.stat"),
    )
    .expect("read cpu.stat while job is running");
    coordinator
        .stop_job(job_id, "alice".into())
        .await
        .expect("stop spinners");
    wait_done(&coordinator, job_id).await;

    let usage_usec: u64 = cpu_stat
        .lines()
        .find_map(|line| line.strip_prefix("usage_usec "))
        .expect("usage_usec in cpu.stat")
        .trim()
        .parse()
        .expect("parse usage_usec");
    // four spinners for ~2s of wall time must stay near one core's worth
    assert!(
        usage_usec < 3_000_000,
        "cpu usage {}us exceeds the one-core cap",
        usage_usec
    );
}

#[tokio::test]
async fn stopped_job_reports_a_signal_exit() {
    let config = match privileged_config() {
        Some(config) => config,
        None => return,
    };
    let coordinator = JobCoordinator::spawn(config, 32);

    let job_id = coordinator
        .start_job("alice".into(), argv(&["sleep", "300"]))
        .await
        .expect("start job err");

    // the other owner cannot touch it
    assert!(matches!(
        coordinator.stop_job(job_id, "bob".into()).await,
        Err(JobError::PermissionDenied)
    ));

    coordinator
        .stop_job(job_id, "alice".into())
        .await
        .expect("owner stop");
    let status = wait_done(&coordinator, job_id).await;
    match status.state {
        JobState::Exited { code } => assert_ne!(code, 0),
        state => panic!("expected a signal exit, got {:?}", state),
    }
}

#[tokio::test]
async fn exit_codes_cross_the_namespace_boundary() {
    let config = match privileged_config() {
        Some(config) => config,
        None => return,
    };
    let coordinator = JobCoordinator::spawn(config, 32);

    let (status, _, _) = run_to_completion(&coordinator, &["sh", "-c", "exit 42"]).await;
    assert_eq!(status.exit_code(), Some(42));
}
