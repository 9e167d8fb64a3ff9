//! Isolated execution of a single task against the external tool.

use crate::recipes::Task;
use crate::{recreate_dir, write_json_indented};
use anyhow::{anyhow, Context};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const SYNTHETIC_USER: &str = "avail";
pub const SYNTHETIC_CHANNEL: &str = "script";
pub const GRAPH_FILE: &str = "graph_info.json";
pub const LOCK_FILE: &str = "conan.lock";
pub const CACHE_HOME_ENV: &str = "CONAN_USER_HOME";

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READER_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphDescriptor {
    pub options: Vec<String>,
    pub root: GraphRoot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphRoot {
    pub name: String,
    pub version: String,
    pub user: String,
    pub channel: String,
}

impl GraphDescriptor {
    pub fn for_task(task: &Task) -> Self {
        Self {
            options: Vec::new(),
            root: GraphRoot {
                name: task.recipe.clone(),
                version: task.version.clone(),
                user: SYNTHETIC_USER.to_string(),
                channel: SYNTHETIC_CHANNEL.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockDescriptor {
    pub graph_lock: GraphLock,
    pub profile_host: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphLock {
    pub nodes: BTreeMap<String, LockNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockNode {
    #[serde(rename = "ref")]
    pub reference: String,
}

impl LockDescriptor {
    pub fn for_task(task: &Task, profile: &str) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "0".to_string(),
            LockNode {
                reference: task.reference(SYNTHETIC_USER, SYNTHETIC_CHANNEL),
            },
        );
        Self {
            graph_lock: GraphLock { nodes },
            profile_host: profile.trim().to_string(),
        }
    }
}

/// Outcome of one task, in the same position as its task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stderr: stderr.into(),
            ..Self::default()
        }
    }
}

/// Per-task working folders, stable across reruns of the same task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchPaths {
    pub install: PathBuf,
    pub source: PathBuf,
}

impl ScratchPaths {
    pub fn new(install_root: &Path, source_root: &Path, task: &Task) -> Self {
        Self {
            install: install_root.join(&task.recipe).join(&task.version),
            source: source_root.join(&task.recipe).join(&task.version),
        }
    }

    fn prepare(&self) -> anyhow::Result<()> {
        recreate_dir(&self.install)
            .with_context(|| format!("recreating {}", self.install.display()))?;
        recreate_dir(&self.source)
            .with_context(|| format!("recreating {}", self.source.display()))?;
        Ok(())
    }
}

/// Deletes the scratch source directory on every exit from a task; the
/// fetched tree is proof of work only.
struct SourceDirCleanup<'a> {
    path: &'a Path,
}

impl Drop for SourceDirCleanup<'_> {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(self.path) {
            debug!(path = %self.path.display(), error = %err, "could not remove source dir");
        }
    }
}

/// Run-wide settings shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct Executor {
    pub tool: PathBuf,
    pub install_root: PathBuf,
    pub source_root: PathBuf,
    pub profile: String,
    pub timeout: Option<Duration>,
}

impl Executor {
    pub fn scratch_paths(&self, task: &Task) -> ScratchPaths {
        ScratchPaths::new(&self.install_root, &self.source_root, task)
    }

    /// Fetch the source for `task` using `cache_home` as the tool's cache.
    ///
    /// Never fails: setup errors, spawn errors and nonzero exits are all
    /// folded into an unsuccessful result.
    pub fn execute(&self, task: &Task, cache_home: &Path) -> ExecutionResult {
        let started = Instant::now();
        let mut result = match self.try_execute(task, cache_home) {
            Ok(result) => result,
            Err(err) => ExecutionResult::failed(format!("{:#}", err)),
        };
        result.elapsed_ms = started.elapsed().as_millis() as u64;
        if !result.success {
            warn!(
                recipe = %task.recipe,
                version = %task.version,
                exit_code = ?result.exit_code,
                "source fetch failed"
            );
        }
        result
    }

    fn try_execute(&self, task: &Task, cache_home: &Path) -> anyhow::Result<ExecutionResult> {
        let paths = self.scratch_paths(task);
        paths.prepare()?;
        let _source_cleanup = SourceDirCleanup {
            path: &paths.source,
        };
        write_task_descriptors(task, &self.profile, &paths.install)?;

        let mut cmd = Command::new(&self.tool);
        cmd.arg("source")
            .arg(&task.build_logic)
            .arg("-if")
            .arg(&paths.install)
            .arg("-sf")
            .arg(&paths.source)
            .env(CACHE_HOME_ENV, cache_home)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if self.timeout.is_some() {
            isolate_process_group(&mut cmd);
        }
        debug!(
            recipe = %task.recipe,
            version = %task.version,
            cache_home = %cache_home.display(),
            command = ?cmd,
            "invoking external tool"
        );

        let output = match cmd.spawn() {
            Ok(child) => collect_output(child, self.timeout)
                .with_context(|| format!("waiting for {}", self.tool.display()))?,
            Err(err) => {
                return Ok(ExecutionResult::failed(format!(
                    "failed to spawn {}: {}",
                    self.tool.display(),
                    err
                )))
            }
        };

        log_source_inventory(task, &paths.source);

        let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.timed_out {
            if let Some(limit) = self.timeout {
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("timed out after {}s\n", limit.as_secs()));
            }
        }
        let exit_code = output.status.and_then(|s| s.code());
        Ok(ExecutionResult {
            success: !output.timed_out && output.status.map(|s| s.success()).unwrap_or(false),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
            elapsed_ms: 0,
        })
    }
}

/// Write the graph and lock descriptors for `task` into `install_dir`.
pub fn write_task_descriptors(task: &Task, profile: &str, install_dir: &Path) -> anyhow::Result<()> {
    write_json_indented(&install_dir.join(GRAPH_FILE), &GraphDescriptor::for_task(task))?;
    write_json_indented(
        &install_dir.join(LOCK_FILE),
        &LockDescriptor::for_task(task, profile),
    )?;
    Ok(())
}

struct ToolOutput {
    status: Option<ExitStatus>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    timed_out: bool,
}

fn collect_output(mut child: Child, timeout: Option<Duration>) -> anyhow::Result<ToolOutput> {
    let Some(limit) = timeout else {
        let output = child.wait_with_output()?;
        return Ok(ToolOutput {
            status: Some(output.status),
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: false,
        });
    };

    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());
    let deadline = Instant::now() + limit;
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            timed_out = true;
            kill_process_tree(&mut child);
            break child.wait().ok();
        }
        thread::sleep(POLL_INTERVAL);
    };
    // Descendants that escaped the process group may still hold the pipes.
    let read_deadline = deadline.max(Instant::now()) + READER_GRACE;
    Ok(ToolOutput {
        status,
        stdout: join_reader(stdout, read_deadline)?,
        stderr: join_reader(stderr, read_deadline)?,
        timed_out,
    })
}

/// Put the tool in its own process group so a timeout can reach its children.
#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: signalling a process group id we created; no memory is touched.
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) {
    let _ = child.kill();
}

type ReaderRx = mpsc::Receiver<std::io::Result<Vec<u8>>>;

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<ReaderRx> {
    pipe.map(|mut pipe| {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let result = pipe.read_to_end(&mut buf).map(|_| buf);
            let _ = tx.send(result);
        });
        rx
    })
}

fn join_reader(rx: Option<ReaderRx>, deadline: Instant) -> anyhow::Result<Vec<u8>> {
    let Some(rx) = rx else {
        return Ok(Vec::new());
    };
    let wait = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(wait) {
        Ok(result) => Ok(result?),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            debug!("output pipe still open after deadline; dropping remaining output");
            Ok(Vec::new())
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(anyhow!("output reader thread exited")),
    }
}

fn log_source_inventory(task: &Task, source_dir: &Path) {
    let mut count = 0usize;
    for entry in walkdir::WalkDir::new(source_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        count += 1;
        debug!(
            recipe = %task.recipe,
            version = %task.version,
            entry = %entry.file_name().to_string_lossy(),
            "fetched source entry"
        );
    }
    debug!(recipe = %task.recipe, version = %task.version, entries = count, "source inventory");
}
