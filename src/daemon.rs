//! Background (daemon) mode for unix targets
//!
//! Double-fork daemonization with a pidfile, plus stop/status helpers.
//! The daemonized process keeps logging: stdout and stderr are redirected
//! to a log file rather than /dev/null, so the sync engine behaves
//! identically foregrounded or daemonized.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::process;

use anyhow::{anyhow, Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{error, info};

/// Pidfile location: XDG runtime dir, then /var/run/user/<uid>, then
/// ~/.local/run
pub fn pidfile_path() -> Result<PathBuf> {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return Ok(PathBuf::from(runtime_dir).join("meshclip.pid"));
    }

    let uid = nix::unistd::getuid();
    let var_run_user = PathBuf::from(format!("/var/run/user/{}", uid));
    if var_run_user.exists() {
        return Ok(var_run_user.join("meshclip.pid"));
    }

    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    let local_run = home.join(".local").join("run");
    fs::create_dir_all(&local_run).context("Failed to create ~/.local/run directory")?;
    Ok(local_run.join("meshclip.pid"))
}

/// Default log file for daemon mode
pub fn default_log_path() -> Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .ok_or_else(|| anyhow!("Could not determine data directory"))?
        .join("meshclip");
    fs::create_dir_all(&dir).context("Failed to create log directory")?;
    Ok(dir.join("meshclip.log"))
}

fn write_pidfile(pid: u32) -> Result<()> {
    let path = pidfile_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create pidfile directory")?;
    }

    let mut file =
        File::create(&path).with_context(|| format!("Failed to create pidfile: {path:?}"))?;
    write!(file, "{pid}")?;

    let mut permissions = file.metadata()?.permissions();
    permissions.set_mode(0o600);
    fs::set_permissions(&path, permissions)?;
    Ok(())
}

/// PID recorded in the pidfile, if any
pub fn read_pidfile() -> Result<Option<u32>> {
    let path = pidfile_path()?;
    if !path.exists() {
        return Ok(None);
    }

    let mut contents = String::new();
    File::open(&path)?.read_to_string(&mut contents)?;
    let pid = contents
        .trim()
        .parse::<u32>()
        .with_context(|| format!("Invalid PID in pidfile: {contents}"))?;
    Ok(Some(pid))
}

pub fn remove_pidfile() -> Result<()> {
    let path = pidfile_path()?;
    if path.exists() {
        fs::remove_file(&path).with_context(|| format!("Failed to remove pidfile: {path:?}"))?;
    }
    Ok(())
}

/// Does a process with this PID exist? (signal 0 probe)
pub fn is_process_running(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Is a meshclip daemon already running per the pidfile?
pub fn is_daemon_running() -> Result<bool> {
    match read_pidfile()? {
        Some(pid) if is_process_running(pid) => Ok(true),
        Some(pid) => {
            info!("Found stale pidfile for PID {}, removing", pid);
            remove_pidfile()?;
            Ok(false)
        }
        None => Ok(false),
    }
}

/// Fork into the background, redirecting output to the log file
pub fn daemonize(log_file: Option<PathBuf>) -> Result<()> {
    let log_path = match log_file {
        Some(p) => p,
        None => default_log_path()?,
    };

    // First fork: parent exits, child continues.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            println!("meshclip running in background (PID {child}), logging to {}", log_path.display());
            process::exit(0);
        }
        Ok(ForkResult::Child) => {}
        Err(e) => return Err(anyhow!("First fork failed: {e}")),
    }

    nix::unistd::setsid()?;

    // Second fork so the daemon can never reacquire a controlling terminal.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child: _ }) => process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(e) => return Err(anyhow!("Second fork failed: {e}")),
    }

    std::env::set_current_dir("/")?;

    let dev_null = File::open("/dev/null")?;
    nix::unistd::dup2_stdin(&dev_null)?;

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;
    nix::unistd::dup2_stdout(&log)?;
    nix::unistd::dup2_stderr(&log)?;

    write_pidfile(process::id())?;
    info!("Daemonized with PID {}", process::id());
    Ok(())
}

/// Stop a running daemon: SIGTERM, then SIGKILL after a grace period
pub fn stop_daemon() -> Result<()> {
    match read_pidfile()? {
        Some(pid) if is_process_running(pid) => {
            info!("Sending SIGTERM to daemon with PID {}", pid);
            signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)?;

            for _ in 0..10 {
                std::thread::sleep(std::time::Duration::from_millis(100));
                if !is_process_running(pid) {
                    info!("Daemon stopped");
                    return Ok(());
                }
            }

            error!("Daemon did not stop gracefully, sending SIGKILL");
            signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL)?;
            std::thread::sleep(std::time::Duration::from_millis(100));

            if is_process_running(pid) {
                return Err(anyhow!("Failed to stop daemon"));
            }
            Ok(())
        }
        Some(_) => {
            info!("Daemon is not running (stale pidfile)");
            remove_pidfile()?;
            Ok(())
        }
        None => {
            info!("Daemon is not running (no pidfile)");
            Ok(())
        }
    }
}

/// Install a SIGTERM handler that cleans up and fires the shutdown token
pub fn setup_signal_handlers(shutdown: tokio_util::sync::CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        sigterm.recv().await;
        info!("Received SIGTERM, shutting down gracefully");

        if let Err(e) = remove_pidfile() {
            error!("Failed to remove pidfile: {}", e);
        }
        shutdown.cancel();
    });

    Ok(())
}
