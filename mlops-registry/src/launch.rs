//! Serving endpoint launcher
//!
//! The endpoint loads its model once, so a promotion is followed by a
//! restart: the process named in the pid file is stopped, then the serve
//! command is spawned detached with its output appended to a log file.

use mlops_common::config::Config;
use mlops_common::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServeLauncher {
    argv: Vec<String>,
    pid_path: PathBuf,
    log_path: PathBuf,
    stop_timeout: Duration,
}

impl ServeLauncher {
    pub fn new(argv: Vec<String>, pid_path: PathBuf, log_path: PathBuf) -> Self {
        Self {
            argv,
            pid_path,
            log_path,
            stop_timeout: Duration::from_secs(10),
        }
    }

    /// Serve command from `[serve]` with the bind address appended, plus
    /// `--config` when the caller was given an explicit file
    pub fn from_config(config: &Config, config_path: Option<&Path>) -> Self {
        let mut argv = config.serve.command.clone();
        argv.extend([
            "--host".to_string(),
            config.serve.host.clone(),
            "--port".to_string(),
            config.serve.port.to_string(),
        ]);
        if let Some(path) = config_path {
            argv.push("--config".to_string());
            argv.push(path.display().to_string());
        }
        Self::new(argv, config.state.serve_pid_path(), config.state.serve_log_path())
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Stop the recorded endpoint, start a new one and record its pid
    pub async fn restart(&self) -> Result<u32> {
        self.stop().await?;
        let pid = self.spawn()?;
        info!(pid, log = %self.log_path.display(), "Serving endpoint started: {}", self.argv.join(" "));
        Ok(pid)
    }

    /// Stop the recorded endpoint; false when none was running
    pub async fn stop(&self) -> Result<bool> {
        let Some(pid) = self.recorded_pid()? else {
            return Ok(false);
        };
        let stopped = if is_alive(pid).await {
            info!(pid, "Stopping serving endpoint");
            signal(pid, "-TERM").await?;
            if !self.wait_for_exit(pid).await {
                warn!(pid, "Serving endpoint ignored SIGTERM, killing");
                signal(pid, "-KILL").await?;
            }
            true
        } else {
            debug!(pid, "Recorded serving endpoint is not running");
            false
        };
        fs::remove_file(&self.pid_path)?;
        Ok(stopped)
    }

    fn recorded_pid(&self) -> Result<Option<u32>> {
        let content = match fs::read_to_string(&self.pid_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match content.trim().parse() {
            Ok(pid) => Ok(Some(pid)),
            Err(_) => {
                warn!(path = %self.pid_path.display(), "Ignoring malformed pid file");
                Ok(None)
            }
        }
    }

    async fn wait_for_exit(&self, pid: u32) -> bool {
        let deadline = tokio::time::Instant::now() + self.stop_timeout;
        while tokio::time::Instant::now() < deadline {
            if !is_alive(pid).await {
                return true;
            }
            tokio::time::sleep(STOP_POLL).await;
        }
        false
    }

    fn spawn(&self) -> Result<u32> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| Error::Config("serve command is empty".to_string()))?;

        for path in [&self.pid_path, &self.log_path] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        let log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| Error::Config(format!("{} exited before reporting a pid", program)))?;

        fs::write(&self.pid_path, format!("{}\n", pid))?;
        Ok(pid)
    }
}

#[cfg(unix)]
async fn is_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
async fn signal(pid: u32, sig: &str) -> Result<()> {
    let status = Command::new("kill")
        .args([sig, &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        debug!(pid, sig, "kill reported {}", status);
    }
    Ok(())
}

#[cfg(not(unix))]
async fn is_alive(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
async fn signal(pid: u32, _sig: &str) -> Result<()> {
    warn!(pid, "Cannot signal processes on this platform");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn launcher(dir: &TempDir, argv: &[&str]) -> ServeLauncher {
        ServeLauncher::new(
            argv.iter().map(|s| s.to_string()).collect(),
            dir.path().join("run").join("serve.pid"),
            dir.path().join("run").join("serve.log"),
        )
        .with_stop_timeout(Duration::from_secs(3))
    }

    #[test]
    fn test_from_config_appends_bind_address() {
        let mut config = Config::default();
        config.serve.port = 6001;
        config.state.dir = PathBuf::from("/var/lib/mlops");

        let launcher = ServeLauncher::from_config(&config, Some(Path::new("/etc/mlops.toml")));
        assert_eq!(
            launcher.argv(),
            [
                "mlops-serve",
                "serve",
                "--host",
                "0.0.0.0",
                "--port",
                "6001",
                "--config",
                "/etc/mlops.toml"
            ]
        );
        assert_eq!(launcher.pid_path, PathBuf::from("/var/lib/mlops/mlops_serve.pid"));
    }

    #[tokio::test]
    async fn test_stop_without_pid_file_is_noop() {
        let dir = TempDir::new().unwrap();
        assert!(!launcher(&dir, &["true"]).stop().await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_program_records_nothing() {
        let dir = TempDir::new().unwrap();
        let launcher = launcher(&dir, &["definitely-not-a-real-server-xyz"]);
        assert!(matches!(launcher.restart().await, Err(Error::Io(_))));
        assert!(!launcher.pid_path.exists());

        let empty = ServeLauncher::new(Vec::new(), dir.path().join("p"), dir.path().join("l"));
        assert!(matches!(empty.restart().await, Err(Error::Config(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restart_replaces_running_endpoint() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("stopped");
        let script = format!(
            "echo started; trap 'echo stopped > {}; exit 0' TERM; while true; do sleep 0.1; done",
            marker.display()
        );
        let launcher = launcher(&dir, &["sh", "-c", &script]);

        let first = launcher.restart().await.unwrap();
        let recorded = fs::read_to_string(&launcher.pid_path).unwrap();
        assert_eq!(recorded.trim(), first.to_string());

        let second = launcher.restart().await.unwrap();
        assert_ne!(first, second);
        assert!(marker.exists(), "first endpoint was not stopped");
        let recorded = fs::read_to_string(&launcher.pid_path).unwrap();
        assert_eq!(recorded.trim(), second.to_string());

        assert!(launcher.stop().await.unwrap());
        assert!(!launcher.pid_path.exists());
        let log = fs::read_to_string(&launcher.log_path).unwrap();
        assert_eq!(log.matches("started").count(), 2);
    }
}
