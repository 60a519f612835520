//! Resource-bounded process execution.
//!
//! Every child runs in its own process group. A watchdog samples the group's
//! resident memory and the wall clock on each tick and kills the whole group
//! when a limit is breached. The group is killed again after the leader exits
//! so that no descendant outlives the call.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// How long stream readers may keep draining after the group was killed.
const READER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Process I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResultType {
    Success,
    RunTimeError,
    TimeLimit,
    MemoryLimit,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    pub time_limit: Duration,
    pub memory_limit_bytes: u64,
}

impl ExecutionLimits {
    pub fn new(time_limit_ms: u64, memory_limit_bytes: u64) -> Self {
        Self {
            time_limit: Duration::from_millis(time_limit_ms),
            memory_limit_bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessExecutionResult {
    pub result_type: ProcessResultType,
    pub time_worked: Duration,
    /// Peak resident memory of the process group.
    pub memory_used: u64,
    pub received_output: String,
    pub error_output: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub output_truncated: bool,
}

impl ProcessExecutionResult {
    pub fn is_success(&self) -> bool {
        self.result_type == ProcessResultType::Success
    }

    /// Short description of how the process ended, for test commentary.
    pub fn describe(&self) -> Option<String> {
        match self.result_type {
            ProcessResultType::Success => None,
            ProcessResultType::TimeLimit => Some(format!(
                "Time limit exceeded after {} ms",
                self.time_worked.as_millis()
            )),
            ProcessResultType::MemoryLimit => Some(format!(
                "Memory limit exceeded ({} bytes)",
                self.memory_used
            )),
            ProcessResultType::RunTimeError => {
                let mut comment = match (self.exit_code, self.signal) {
                    (_, Some(signal)) => format!("Process killed by signal {signal}"),
                    (Some(code), None) => format!("Process exited with code {code}"),
                    (None, None) => "Process terminated abnormally".to_string(),
                };
                let stderr = self.error_output.trim();
                if !stderr.is_empty() {
                    comment.push_str(": ");
                    comment.extend(stderr.chars().take(200));
                }
                Some(comment)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Breach {
    Time,
    Memory,
}

/// Runs external programs under a wall-clock and memory budget.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    poll_interval: Duration,
    output_limit: usize,
}

impl ProcessExecutor {
    pub fn new(poll_interval: Duration, output_limit: usize) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            output_limit,
        }
    }

    pub async fn execute(
        &self,
        program: &str,
        args: &[String],
        input: &str,
        limits: ExecutionLimits,
        working_dir: &Path,
    ) -> Result<ProcessExecutionResult, ProcessError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let pgid = child.id().and_then(|id| i32::try_from(id).ok());

        if let Some(mut stdin) = child.stdin.take() {
            let input = input.as_bytes().to_vec();
            tokio::spawn(async move {
                // The program may exit without reading its input.
                if let Err(e) = stdin.write_all(&input).await {
                    if e.kind() != io::ErrorKind::BrokenPipe {
                        debug!(error = %e, "Failed to write stdin");
                    }
                }
            });
        }

        let stdout_task = child
            .stdout
            .take()
            .map(|s| tokio::spawn(read_bounded(s, self.output_limit)));
        let stderr_task = child
            .stderr
            .take()
            .map(|s| tokio::spawn(read_bounded(s, self.output_limit)));

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut peak_memory = 0u64;

        let outcome: Result<ExitStatus, Breach> = loop {
            tokio::select! {
                status = child.wait() => break Ok(status?),
                _ = ticker.tick() => {
                    if let Some(pgid) = pgid {
                        peak_memory = peak_memory.max(group_rss_bytes(pgid));
                    }
                    if peak_memory > limits.memory_limit_bytes {
                        break Err(Breach::Memory);
                    }
                    if started.elapsed() > limits.time_limit {
                        break Err(Breach::Time);
                    }
                }
            }
        };

        let (status, breach) = match outcome {
            Ok(status) => (status, None),
            Err(breach) => {
                kill_group(pgid);
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Child already gone");
                }
                (child.wait().await?, Some(breach))
            }
        };
        let time_worked = started.elapsed();
        kill_group(pgid);

        let (stdout, stdout_truncated) = collect(stdout_task).await;
        let (stderr, _) = collect(stderr_task).await;

        let result_type = classify(breach, status.success(), time_worked, limits.time_limit);

        Ok(ProcessExecutionResult {
            result_type,
            time_worked,
            memory_used: peak_memory,
            received_output: String::from_utf8_lossy(&stdout).into_owned(),
            error_output: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: status.code(),
            signal: exit_signal(&status),
            output_truncated: stdout_truncated,
        })
    }
}

/// Memory breach wins over time breach, which wins over abnormal exit.
fn classify(
    breach: Option<Breach>,
    exited_ok: bool,
    elapsed: Duration,
    time_limit: Duration,
) -> ProcessResultType {
    match breach {
        Some(Breach::Memory) => ProcessResultType::MemoryLimit,
        Some(Breach::Time) => ProcessResultType::TimeLimit,
        None if elapsed > time_limit => ProcessResultType::TimeLimit,
        None if !exited_ok => ProcessResultType::RunTimeError,
        None => ProcessResultType::Success,
    }
}

async fn read_bounded<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> io::Result<(Vec<u8>, bool)> {
    let mut captured = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(captured.len());
        captured.extend_from_slice(&buf[..n.min(room)]);
        if n > room {
            truncated = true;
        }
    }
    Ok((captured, truncated))
}

async fn collect(
    task: Option<tokio::task::JoinHandle<io::Result<(Vec<u8>, bool)>>>,
) -> (Vec<u8>, bool) {
    let Some(mut task) = task else {
        return (Vec::new(), false);
    };
    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(Ok(captured))) => captured,
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "Failed to read process output");
            (Vec::new(), false)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader task failed");
            (Vec::new(), false)
        }
        Err(_) => {
            // A descendant escaped the group and still holds the pipe open.
            task.abort();
            warn!("Output reader did not finish in time");
            (Vec::new(), true)
        }
    }
}

fn kill_group(pgid: Option<i32>) {
    if let Some(pgid) = pgid.filter(|p| *p > 0) {
        // SAFETY: kill(2) has no memory-safety preconditions.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
}

fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

/// Resident memory of every process in group `pgid`, in bytes.
///
/// Returns 0 where `/proc` is unavailable.
pub fn group_rss_bytes(pgid: i32) -> u64 {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };
    let page_size = page_size();
    entries
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| n.bytes().all(|b| b.is_ascii_digit()))
        })
        .filter_map(|e| std::fs::read_to_string(e.path().join("stat")).ok())
        .filter_map(|stat| parse_stat(&stat))
        .filter(|(group, _)| *group == pgid)
        .map(|(_, rss_pages)| rss_pages.saturating_mul(page_size))
        .sum()
}

/// Extract `(pgrp, rss_pages)` from a `/proc/<pid>/stat` line.
fn parse_stat(stat: &str) -> Option<(i32, u64)> {
    // The command name may contain spaces and parentheses.
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let pgrp = fields.get(2)?.parse().ok()?;
    let rss = fields.get(21)?.parse().ok()?;
    Some((pgrp, rss))
}

fn page_size() -> u64 {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}
