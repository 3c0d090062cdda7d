// SPDX-License-Identifier: GPL-3.0-only

//! Chroot process teardown, loop devices and scratch files for image builds

use std::path::{Path, PathBuf};

use nix::sys::signal::{Signal, kill};
use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use nix::unistd::Pid;
use provision_contracts::StopSignal;

use crate::error::{Result, SysError};

const MIB: u64 = 1024 * 1024;

/// PIDs of every process whose root directory is `chroot`.
pub fn chrooted_pids(chroot: &Path) -> Vec<i32> {
    let all_procs = match procfs::process::all_processes() {
        Ok(procs) => procs,
        Err(e) => {
            tracing::warn!("Failed to enumerate processes: {}", e);
            return Vec::new();
        }
    };

    all_procs
        .filter_map(|proc_result| proc_result.ok())
        .filter(|process| process.root().is_ok_and(|root| root == chroot))
        .map(|process| process.pid())
        .collect()
}

fn process_cmdline(pid: i32) -> String {
    procfs::process::Process::new(pid)
        .and_then(|process| process.cmdline())
        .map(|cmdline| cmdline.join(" "))
        .unwrap_or_default()
}

/// Send `signal` to each pid. Returns how many were delivered.
pub fn signal_processes(pids: &[i32], signal: StopSignal) -> usize {
    let signal = match signal {
        StopSignal::Term => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };
    let own_pid = std::process::id() as i32;
    let mut delivered = 0;

    for &pid in pids {
        if pid <= 1 || pid == own_pid {
            tracing::warn!("Refusing to signal process with PID {}", pid);
            continue;
        }

        tracing::debug!("Sending {} to chrooted process {}", signal, pid);
        match kill(Pid::from_raw(pid), signal) {
            Ok(()) => delivered += 1,
            Err(nix::Error::ESRCH) => {
                tracing::debug!("Process {} not found (already terminated)", pid);
            }
            Err(e) => {
                tracing::warn!(
                    "Exception while sending signal: pid: {} cmdline: {} message: {}. Skipping it.",
                    pid,
                    process_cmdline(pid),
                    e
                );
            }
        }
    }

    delivered
}

/// Log whatever is still alive in `chroot`.
pub fn report_survivors(pids: &[i32]) {
    for &pid in pids {
        tracing::warn!(
            "Process is still running: pid={} cmdline: {}",
            pid,
            process_cmdline(pid)
        );
    }
}

/// Create the block node for `/dev/loop<minor>` when udev has not.
pub fn ensure_loop_node(minor: u64, major: u64) -> Result<()> {
    let node = PathBuf::from(format!("/dev/loop{minor}"));
    if node.exists() {
        return Ok(());
    }
    mknod(
        &node,
        SFlag::S_IFBLK,
        Mode::from_bits_truncate(0o660),
        makedev(major, minor),
    )
    .map_err(|errno| SysError::OperationFailed(format!("mknod {} failed: {errno}", node.display())))
}

/// Attached loop device names from `losetup -a`.
pub fn parse_attached_loops(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split(':').next())
        .map(str::trim)
        .filter(|device| !device.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Create a sparse file of `size` MiB in `dir`.
pub fn create_sparse_file(dir: &Path, suffix: &str, size: u64) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}{suffix}", uuid::Uuid::new_v4().simple()));
    let file = std::fs::File::create(&path)?;
    file.set_len(size * MIB)?;
    Ok(path)
}
