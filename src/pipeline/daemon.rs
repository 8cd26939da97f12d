//! Daemon readiness: make sure the model server answers before using it.
//!
//! ## Protocol
//!
//! 1. One status query (`<backend> ps`) bounded by `probe_timeout`. If it
//!    succeeds nothing is started.
//! 2. Otherwise launch `<backend> serve` as a detached background process,
//!    exactly once per run.
//! 3. Poll the status query up to `probe_attempts` times, `probe_interval`
//!    apart, and stop at the first success.
//!
//! A daemon that cannot start (missing binary, permission error, port in
//! use) therefore costs a bounded wait, roughly
//! `probe_attempts × probe_interval` beyond the first probe, while a normal
//! cold start still gets through.

use crate::config::OcrConfig;
use crate::status::StatusSink;
use child_reaper::output_within;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Result of [`ensure_reachable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The first status query succeeded; nothing was launched.
    AlreadyUp,
    /// The daemon was launched and answered on poll number `polls`.
    Started { polls: u32 },
    /// Never answered. `polls` is 0 when the launch itself failed.
    Unreachable { polls: u32, detail: String },
}

impl Readiness {
    pub fn is_reachable(&self) -> bool {
        !matches!(self, Readiness::Unreachable { .. })
    }
}

/// Ask the backend for its status once. `Err` carries the diagnostic text.
pub async fn status_query(config: &OcrConfig) -> Result<(), String> {
    let mut cmd = config.backend(&["ps"]);
    match output_within(&mut cmd, config.probe_timeout).await {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            Err(if stderr.is_empty() {
                format!("status query exited with {}", out.status)
            } else {
                stderr
            })
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Ensure the daemon is reachable, launching it at most once.
pub async fn ensure_reachable(config: &OcrConfig, status: &dyn StatusSink) -> Readiness {
    let started = Instant::now();
    let mut last_err = match status_query(config).await {
        Ok(()) => {
            debug!("Daemon reachable on first probe");
            return Readiness::AlreadyUp;
        }
        Err(e) => e,
    };

    let name = backend_name(config);
    warn!("Initial status probe failed: {}", last_err);
    status.warning(&format!(
        "{name} daemon is not reachable. Trying to start it..."
    ));

    let mut serve = config.backend_std(&["serve"]);
    match child_reaper::detach(&mut serve) {
        Ok(pid) => info!(pid, "Launched {} serve", name),
        Err(e) => {
            status.error(&format!("Failed to start {name} daemon: {e}"));
            return Readiness::Unreachable {
                polls: 0,
                detail: e.to_string(),
            };
        }
    }

    for poll in 1..=config.probe_attempts {
        match status_query(config).await {
            Ok(()) => {
                info!(
                    "Daemon reachable after {} polls ({}ms)",
                    poll,
                    started.elapsed().as_millis()
                );
                status.info(&format!("{name} daemon is now reachable."));
                return Readiness::Started { polls: poll };
            }
            Err(e) => {
                debug!("Poll {}/{} failed: {}", poll, config.probe_attempts, e);
                last_err = e;
            }
        }
        if poll < config.probe_attempts {
            sleep(config.probe_interval).await;
        }
    }

    status.error(&format!("{name} daemon is still not reachable."));
    if !last_err.is_empty() {
        status.error(&last_err);
    }
    Readiness::Unreachable {
        polls: config.probe_attempts,
        detail: last_err,
    }
}

/// Display name of the backend, e.g. `ollama` for `/usr/bin/ollama`.
pub fn backend_name(config: &OcrConfig) -> String {
    std::path::Path::new(config.backend_program())
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.backend_program().to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::status::NoopStatus;
    use std::path::Path;
    use std::time::Duration;

    /// Backend stub whose `ps` succeeds from the `ready_on`-th call on.
    /// Every `ps` call and every `serve` launch is counted in `dir`.
    fn stub(dir: &Path, ready_on: u32) -> OcrConfig {
        let script = dir.join("backend.sh");
        let d = dir.display();
        std::fs::write(
            &script,
            format!(
                r#"case "$1" in
  ps)
    n=$(cat "{d}/ps" 2>/dev/null || echo 0); n=$((n+1)); echo $n > "{d}/ps"
    [ "$n" -ge {ready_on} ] && exit 0
    echo "connection refused" >&2; exit 1 ;;
  serve) echo x >> "{d}/serve" ;;
esac
"#
            ),
        )
        .unwrap();
        OcrConfig::builder()
            .backend_command(["sh".to_string(), script.display().to_string()])
            .probe_attempts(5)
            .probe_interval(Duration::from_millis(20))
            .probe_timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn count(dir: &Path, name: &str) -> u32 {
        std::fs::read_to_string(dir.join(name))
            .map(|s| s.trim().parse().unwrap_or(0))
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn reachable_daemon_is_not_launched() {
        let dir = tempfile::tempdir().unwrap();
        let config = stub(dir.path(), 1);
        assert_eq!(ensure_reachable(&config, &NoopStatus).await, Readiness::AlreadyUp);
        assert_eq!(count(dir.path(), "ps"), 1);
        assert!(!dir.path().join("serve").exists());
    }

    #[tokio::test]
    async fn daemon_answering_on_third_poll_is_reachable() {
        let dir = tempfile::tempdir().unwrap();
        // Call 1 is the initial probe, so the daemon answers on poll 2.
        let config = stub(dir.path(), 3);
        let r = ensure_reachable(&config, &NoopStatus).await;
        assert_eq!(r, Readiness::Started { polls: 2 });
        assert_eq!(count(dir.path(), "ps"), 3);
    }

    #[tokio::test]
    async fn dead_daemon_exhausts_exactly_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let config = stub(dir.path(), u32::MAX);
        let start = Instant::now();
        let r = ensure_reachable(&config, &NoopStatus).await;

        assert!(!r.is_reachable());
        assert!(matches!(r, Readiness::Unreachable { polls: 5, .. }), "got {r:?}");
        // Initial probe plus the five polls.
        assert_eq!(count(dir.path(), "ps"), 6);
        assert!(start.elapsed() < Duration::from_secs(5), "took {:?}", start.elapsed());
    }

    #[tokio::test]
    async fn missing_backend_fails_without_polling() {
        let config = OcrConfig::builder()
            .backend_command(["/definitely/not/a/backend"])
            .build()
            .unwrap();
        let r = ensure_reachable(&config, &NoopStatus).await;
        assert!(matches!(r, Readiness::Unreachable { polls: 0, .. }), "got {r:?}");
    }

    #[test]
    fn backend_name_strips_directories() {
        let config = OcrConfig::builder()
            .backend_command(["/usr/local/bin/ollama"])
            .build()
            .unwrap();
        assert_eq!(backend_name(&config), "ollama");
    }
}
