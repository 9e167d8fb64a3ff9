//! Parallel source-fetch verification over a Conan recipe corpus.
//!
//! A run resolves the host profile, enumerates one task per recipe version,
//! fans the tasks out over a bounded worker pool where every worker owns a
//! private tool cache, and aggregates the per-task outcomes into a report.

pub mod error;
pub mod executor;
pub mod filter;
pub mod pool;
pub mod profile;
pub mod recipes;
pub mod report;

pub use error::{Result, SourceCheckError};
pub use executor::{ExecutionResult, Executor, ScratchPaths};
pub use filter::RecipeFilter;
pub use pool::WorkerPool;
pub use profile::Platform;
pub use recipes::{enumerate_tasks, Task, TaskPlan};
pub use report::{FailedTask, RunReport};

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// Everything a check run needs, normally assembled from the command line.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub corpus: PathBuf,
    pub cache_root: PathBuf,
    pub source_root: PathBuf,
    pub install_root: PathBuf,
    pub tool: PathBuf,
    pub jobs: usize,
    /// Platform identifier override; the host platform when `None`.
    pub platform: Option<String>,
    pub platform_filter: bool,
    pub timeout: Option<Duration>,
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub fn resolve_platform(platform: Option<&str>) -> Result<Platform> {
    match platform {
        Some(name) => name.parse(),
        None => Platform::host(),
    }
}

/// Enumerate the tasks of a corpus without executing anything.
pub fn plan_tasks(corpus: &Path, platform: Platform, platform_filter: bool) -> Result<TaskPlan> {
    enumerate_tasks(corpus, &RecipeFilter::new(platform, platform_filter))
}

/// Execute a full check and return the aggregated report.
///
/// Profile and enumeration errors abort before any task runs; task failures
/// only show up inside the report.
pub fn run_check(config: &CheckConfig) -> Result<RunReport> {
    let platform = resolve_platform(config.platform.as_deref())?;
    let profile = platform.profile();
    let started_at = Utc::now().to_rfc3339();
    let started = Instant::now();

    let plan = plan_tasks(&config.corpus, platform, config.platform_filter)?;

    let executor = Executor {
        tool: config.tool.clone(),
        install_root: absolutize(&config.install_root)?,
        source_root: absolutize(&config.source_root)?,
        profile: profile.to_string(),
        timeout: config.timeout,
    };
    let pool = WorkerPool::new(config.jobs, &absolutize(&config.cache_root)?)?;
    info!(
        platform = %platform,
        tasks = plan.tasks.len(),
        workers = pool.size(),
        "starting source checks"
    );
    let results = pool.run(&plan.tasks, |task, cache_home| {
        executor.execute(task, cache_home)
    });

    let report = RunReport::aggregate(
        &plan,
        &results,
        started_at,
        Utc::now().to_rfc3339(),
        started.elapsed(),
    )?;
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        elapsed_secs = report.elapsed_secs,
        "source checks finished"
    );
    Ok(report)
}

pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)
}

/// Remove `path` if present and create it empty.
pub fn recreate_dir(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else if path.exists() {
        fs::remove_file(path)?;
    }
    fs::create_dir_all(path)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| SourceCheckError::io(path, e))?;
    Ok(cwd.join(path))
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}

/// Serialize `value` as JSON indented by a single space, the layout the
/// external tool itself writes for these files.
pub(crate) fn write_json_indented<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut bytes = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut ser = serde_json::Serializer::with_formatter(&mut bytes, formatter);
    value.serialize(&mut ser)?;
    atomic_write_bytes(path, &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "srcfetch_run_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("temp root");
        root
    }

    fn config_for(root: &Path, tool: PathBuf, jobs: usize) -> CheckConfig {
        CheckConfig {
            corpus: root.join("cci"),
            cache_root: root.join("cache"),
            source_root: root.join("source"),
            install_root: root.join("install"),
            tool,
            jobs,
            platform: Some("linux".to_string()),
            platform_filter: false,
            timeout: None,
        }
    }

    fn write_recipe(root: &Path, name: &str, versions: &[&str]) {
        let dir = root.join("cci").join("recipes").join(name);
        ensure_dir(&dir.join("all")).expect("recipe");
        fs::write(dir.join("all").join("conanfile.py"), "").expect("conanfile");
        let mut yaml = String::from("versions:\n");
        for v in versions {
            yaml.push_str(&format!("  \"{}\":\n    folder: all\n", v));
        }
        fs::write(dir.join("config.yml"), yaml).expect("config");
    }

    #[test]
    fn recreate_dir_clears_previous_contents() {
        let root = temp_root("recreate");
        let dir = root.join("scratch");
        ensure_dir(&dir.join("nested")).expect("nested");
        fs::write(dir.join("nested").join("f"), "x").expect("file");
        recreate_dir(&dir).expect("recreate");
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).expect("read").count(), 0);
        recreate_dir(&dir).expect("recreate again");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn json_is_written_with_single_space_indent() {
        let root = temp_root("indent");
        let path = root.join("doc.json");
        write_json_indented(&path, &serde_json::json!({"a": {"b": 1}})).expect("write");
        let text = fs::read_to_string(&path).expect("read");
        assert_eq!(text, "{\n \"a\": {\n  \"b\": 1\n }\n}");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unsupported_platform_aborts_before_any_task() {
        let root = temp_root("freebsd");
        write_recipe(&root, "zlib", &["1.2.11"]);
        let mut config = config_for(&root, root.join("never-invoked"), 2);
        config.platform = Some("freebsd".to_string());
        let err = run_check(&config).expect_err("unsupported");
        assert!(matches!(err, SourceCheckError::UnsupportedPlatform(_)));
        assert!(!root.join("install").exists());
        assert!(!root.join("cache").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn malformed_descriptor_aborts_before_any_task() {
        let root = temp_root("malformed_run");
        write_recipe(&root, "zlib", &["1.2.11"]);
        let bad = root.join("cci").join("recipes").join("broken");
        ensure_dir(&bad).expect("broken");
        fs::write(bad.join("config.yml"), "versions:\n  \"1.0\": {}\n").expect("config");
        let err = run_check(&config_for(&root, root.join("never-invoked"), 1))
            .expect_err("malformed");
        assert_eq!(err.code(), "config_malformed");
        assert!(!root.join("install").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[cfg(unix)]
    #[test]
    fn full_run_reports_every_task_in_order() {
        use std::os::unix::fs::PermissionsExt;

        let root = temp_root("full");
        write_recipe(&root, "zlib", &["1.2.11", "1.2.12"]);
        write_recipe(&root, "broken", &["0.1"]);
        let tool = root.join("fake-conan");
        fs::write(
            &tool,
            "#!/bin/sh\ncase \"$2\" in\n  */broken/*) echo 'no sources' >&2; exit 1 ;;\nesac\ntouch \"$6/src.c\"\nexit 0\n",
        )
        .expect("tool");
        let mut perms = fs::metadata(&tool).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&tool, perms).expect("chmod");

        let report = run_check(&config_for(&root, tool, 2)).expect("run");
        assert_eq!(report.recipes_visited, 2);
        assert_eq!(report.configless_recipes, 0);
        assert_eq!(report.tasks, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].recipe, "broken");
        assert!(report.failures[0].stderr.contains("no sources"));
        assert!(root.join("cache").join("worker-0").is_dir());
        assert!(root.join("cache").join("worker-1").is_dir());
        assert!(root
            .join("install")
            .join("zlib")
            .join("1.2.11")
            .join("conan.lock")
            .is_file());
        assert!(!root.join("source").join("zlib").join("1.2.11").exists());
        let _ = fs::remove_dir_all(root);
    }
}
