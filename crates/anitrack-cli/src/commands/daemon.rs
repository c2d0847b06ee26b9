use crate::output::Output;
use anime_sync_config::{default_scheduler_config, PathManager};
use color_eyre::Result;
use std::time::Duration;
use tracing::{error, info};

pub async fn run_daemon(
    interval_override: Option<u64>,
    no_startup_sync: bool,
    foreground: bool,
    output: &Output,
) -> Result<()> {
    let paths = PathManager::default();
    paths.ensure_directories().map_err(color_eyre::eyre::Report::msg)?;

    let config = super::load_config(&paths)?;
    config.validate().map_err(color_eyre::eyre::Report::msg)?;

    // In containers, always run in foreground to keep the container alive.
    let should_daemonize = !foreground && !is_container();
    if should_daemonize {
        output.info("Starting daemon in background mode...");

        #[cfg(unix)]
        {
            daemonize()?;
        }
        #[cfg(not(unix))]
        {
            return Err(color_eyre::eyre::eyre!(
                "Daemonization is only supported on Unix-like systems; use --foreground"
            ));
        }

        info!(
            "Daemon running in background mode. Logs are being written to: {}",
            paths.daemon_log_file().display()
        );
    } else if is_container() && !foreground {
        output.info("Running in foreground mode (container detected - daemonization disabled)");
    }

    let scheduler_config = config.scheduler.clone().unwrap_or_else(default_scheduler_config);
    let interval_minutes = interval_override.unwrap_or(scheduler_config.interval_minutes).max(1);
    let run_on_startup = if no_startup_sync {
        false
    } else {
        scheduler_config.run_on_startup
    };

    let sync = super::build_orchestrator(&config, &paths).await?;

    if run_on_startup {
        info!(operation = "scheduler_startup", "Running initial sync on startup");
        run_cycle(&sync).await;
    }

    info!(
        operation = "scheduler_started",
        interval_minutes = interval_minutes,
        "Scheduler started"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
    ticker.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!(operation = "scheduled_sync_start", "Starting scheduled sync");
                run_cycle(&sync).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!(operation = "scheduler_shutdown", "Shutting down, flushing pending save");
                sync.flush().await;
                break;
            }
        }
    }

    Ok(())
}

async fn run_cycle(sync: &anime_sync_core::SyncOrchestrator) {
    match sync.load_and_sync().await {
        Ok(snapshot) => {
            info!(
                operation = "scheduled_sync_complete",
                status = sync.status().label(),
                series = snapshot.anime.len(),
                episodes = snapshot.episode_count(),
                "Scheduled sync completed"
            );
        }
        Err(e) => {
            error!(
                operation = "scheduled_sync_error",
                error = %e,
                "Scheduled sync failed"
            );
        }
    }
}

#[cfg(unix)]
fn daemonize() -> Result<()> {
    use nix::unistd::{fork, setsid, ForkResult};
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    // First fork
    match unsafe { fork()? } {
        ForkResult::Parent { child: _ } => {
            // Parent exits immediately
            std::process::exit(0);
        }
        ForkResult::Child => {
            // Child continues
        }
    }

    // Create a new session (detach from controlling terminal)
    setsid()?;

    // Second fork to ensure we're not a session leader
    match unsafe { fork()? } {
        ForkResult::Parent { child: _ } => {
            std::process::exit(0);
        }
        ForkResult::Child => {
            // Final daemon process continues
        }
    }

    // Change to root directory to avoid keeping mount points busy
    std::env::set_current_dir("/")?;

    // Close and redirect standard file descriptors
    let dev_null = File::open("/dev/null")?;
    let null_fd = dev_null.as_raw_fd();

    unsafe {
        libc::dup2(null_fd, libc::STDIN_FILENO);
        libc::dup2(null_fd, libc::STDOUT_FILENO);
        libc::dup2(null_fd, libc::STDERR_FILENO);
    }

    Ok(())
}

// Helper function to detect if we're running in a container
fn is_container() -> bool {
    use anime_sync_config::container_base_path;

    std::path::Path::new("/.dockerenv").exists()
        || container_base_path().exists()
        || std::fs::read_to_string("/proc/self/cgroup")
            .ok()
            .map(|s| s.contains("docker") || s.contains("containerd") || s.contains("podman"))
            .unwrap_or(false)
}
