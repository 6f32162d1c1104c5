//! Process Executor (C5): runs every `chip-tool` invocation as a fresh, isolated subprocess.
//!
//! Process isolation is deliberate -- it eliminates the cross-command state bleed that plagued
//! an earlier design built around a long-lived interactive `chip-tool` REPL and a heuristic
//! reply correlator (see the optional REPL variant mentioned in the design notes). Every call
//! here pays the cost of a fresh process in exchange for never having to guess which in-flight
//! request a given reply belongs to.

use crate::blocks::extract_named_blocks;
use crate::datamodel::DataModelDictionary;
use crate::grammar::parse_statement;
use crate::log_cleaner::clean;
use crate::shaper::{shape, ShapedRecord};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, trace, warn};

const BUSY_NEEDLE: &str = "Resource is busy";
const ERROR_NEEDLES: &[&str] = &["error", "failed", "exception", "segmentation fault"];
const SIGTERM_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
    Timeout,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Response {
    pub status: Status,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not spawn `{1}`")]
    Spawn(#[source] std::io::Error, String),
    #[error("could not read stdout of `{0}`")]
    ReadStdout(#[source] std::io::Error, String),
    #[error("could not read stderr of `{0}`")]
    ReadStderr(#[source] std::io::Error, String),
    #[error("could not terminate a timed-out `{0}` process")]
    Kill(#[source] std::io::Error, String),
    #[error("could not remove stale session file {0:?}")]
    RemoveSessionFile(#[source] std::io::Error, PathBuf),
}

pub struct ProcessExecutor {
    chip_tool_path: PathBuf,
    commissioning_dir: PathBuf,
    paa_cert_dir_path: PathBuf,
    semaphore: Arc<Semaphore>,
    retries: usize,
    dict: Arc<dyn DataModelDictionary>,
}

impl ProcessExecutor {
    pub fn new(
        chip_tool_path: PathBuf,
        commissioning_dir: PathBuf,
        paa_cert_dir_path: PathBuf,
        max_concurrent_processes: usize,
        retries: usize,
        dict: Arc<dyn DataModelDictionary>,
    ) -> Self {
        Self {
            chip_tool_path,
            commissioning_dir,
            paa_cert_dir_path,
            semaphore: Arc::new(Semaphore::new(max_concurrent_processes.max(1))),
            retries,
            dict,
        }
    }

    /// Runs `command` (already tokenized, e.g. `["onoff", "on", "1", "1"]`) with `timeout`,
    /// retrying while `chip-tool` reports it is busy.
    pub async fn execute(&self, command: &[String], timeout: Duration, commissioning: bool) -> Response {
        let command_str = command.join(" ");
        let mut attempt = 0usize;
        loop {
            let response = self.execute_once(command, &command_str, timeout, commissioning).await;
            if response.status == Status::Error
                && response
                    .error
                    .as_deref()
                    .map(|e| e.contains(BUSY_NEEDLE))
                    .unwrap_or(false)
                && attempt < self.retries
            {
                let backoff = Duration::from_millis(50) * 2u32.pow(attempt as u32);
                debug!(message = "chip-tool busy, retrying", attempt, ?backoff, command = %command_str);
                tokio::time::sleep(backoff).await;
                attempt += 1;
                continue;
            }
            return response;
        }
    }

    async fn execute_once(
        &self,
        command: &[String],
        command_str: &str,
        timeout: Duration,
        commissioning: bool,
    ) -> Response {
        let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
        let result = self.spawn_and_collect(command, timeout).await;
        self.scrub_session_file().await;

        let (stdout, stderr) = match result {
            Ok(Outcome::Completed { stdout, stderr }) => (stdout, stderr),
            Ok(Outcome::TimedOut) => {
                return Response {
                    status: Status::Timeout,
                    command: command_str.to_string(),
                    data: None,
                    error: Some("process timed out".to_string()),
                    timestamp: now(),
                };
            }
            Err(e) => {
                warn!(message = "failed to run chip-tool", error = %e);
                return Response {
                    status: Status::Error,
                    command: command_str.to_string(),
                    data: None,
                    error: Some(e.to_string()),
                    timestamp: now(),
                };
            }
        };

        let lower_stderr = stderr.to_ascii_lowercase();
        if ERROR_NEEDLES.iter().any(|needle| lower_stderr.contains(needle)) {
            return Response {
                status: Status::Error,
                command: command_str.to_string(),
                data: None,
                error: Some(stderr),
                timestamp: now(),
            };
        }
        if stdout.contains(BUSY_NEEDLE) || stderr.contains(BUSY_NEEDLE) {
            return Response {
                status: Status::Error,
                command: command_str.to_string(),
                data: None,
                error: Some(format!("{BUSY_NEEDLE} (from chip-tool output)")),
                timestamp: now(),
            };
        }

        let cleaned = clean(&stdout);
        let blocks = extract_named_blocks(&cleaned);
        let mut shaped_all = Vec::new();
        for block in &blocks {
            match parse_statement(block) {
                Ok((name, tree)) => shaped_all.push(shape(&name, &tree, self.dict.as_ref())),
                Err(e) => trace!(message = "block failed to parse", error = %e, block),
            }
        }

        if shaped_all.is_empty() {
            return Response {
                status: Status::Success,
                command: command_str.to_string(),
                data: Some(serde_json::json!({
                    "raw_output": stdout,
                    "note": "No structured data found",
                })),
                error: None,
                timestamp: now(),
            };
        }

        let data = if commissioning {
            serde_json::to_value(shaped_all.into_iter().flatten().collect::<Vec<ShapedRecord>>())
        } else {
            serde_json::to_value(&shaped_all[0])
        };

        Response {
            status: Status::Success,
            command: command_str.to_string(),
            data: data.ok(),
            error: None,
            timestamp: now(),
        }
    }

    async fn spawn_and_collect(&self, command: &[String], timeout: Duration) -> Result<Outcome, Error> {
        let mut cmd = Command::new(&self.chip_tool_path);
        cmd.args(command);
        cmd.arg("--paa-trust-store-path").arg(&self.paa_cert_dir_path);
        cmd.arg("--storage-directory").arg(&self.commissioning_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let program = self.chip_tool_path.display().to_string();
        let mut child = cmd.spawn().map_err(|e| Error::Spawn(e, program.clone()))?;
        let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr was piped");

        let collect = async {
            // stdout and stderr must be drained concurrently: chip-tool can fill one pipe's OS
            // buffer while we're still blocked reading the other, which would deadlock the child
            // against us forever.
            let mut stdout = String::new();
            let mut stderr = String::new();
            let stdout_read = stdout_pipe.read_to_string(&mut stdout);
            let stderr_read = stderr_pipe.read_to_string(&mut stderr);
            let (stdout_result, stderr_result) = tokio::join!(stdout_read, stderr_read);
            stdout_result.map_err(|e| Error::ReadStdout(e, program.clone()))?;
            stderr_result.map_err(|e| Error::ReadStderr(e, program.clone()))?;
            let _ = child.wait().await;
            Ok::<_, Error>((stdout, stderr))
        };

        match tokio::time::timeout(timeout, collect).await {
            Ok(Ok((stdout, stderr))) => Ok(Outcome::Completed { stdout, stderr }),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => {
                if let Err(e) = child.start_kill() {
                    return Err(Error::Kill(e, program));
                }
                let _ = tokio::time::timeout(SIGTERM_GRACE, child.wait()).await;
                let _ = child.kill().await;
                Ok(Outcome::TimedOut)
            }
        }
    }

    /// Removes the session-state file `chip-tool` leaves behind, which otherwise leaks state
    /// between independent invocations sharing the same storage directory.
    async fn scrub_session_file(&self) {
        let path = self.commissioning_dir.join("chip_tool_config.ini");
        match tokio::fs::remove_file(&path).await {
            Ok(()) => trace!(message = "scrubbed session file", ?path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(message = "could not scrub session file", ?path, error = %e),
        }
    }
}

enum Outcome {
    Completed { stdout: String, stderr: String },
    TimedOut,
}

fn now() -> String {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:09}", since_epoch.as_secs(), since_epoch.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::BundledDictionary;

    #[test]
    fn error_needles_are_case_insensitive() {
        let stderr = "Caught an EXCEPTION while processing";
        assert!(ERROR_NEEDLES.iter().any(|n| stderr.to_ascii_lowercase().contains(n)));
    }

    #[tokio::test]
    async fn executes_a_trivial_command() {
        let dict: Arc<dyn DataModelDictionary> = Arc::new(BundledDictionary::default());
        let executor = ProcessExecutor::new(
            PathBuf::from("/bin/echo"),
            std::env::temp_dir(),
            std::env::temp_dir(),
            2,
            1,
            dict,
        );
        let response = executor
            .execute(&["hello".to_string()], Duration::from_secs(5), false)
            .await;
        assert_eq!(response.status, Status::Success);
    }
}
