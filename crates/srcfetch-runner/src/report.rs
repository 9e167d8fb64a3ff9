use crate::error::{Result, SourceCheckError};
use crate::executor::ExecutionResult;
use crate::recipes::TaskPlan;
use serde::Serialize;
use std::fmt::Write;
use std::path::PathBuf;
use std::time::Duration;

const BANNER: &str = "==================== SOURCE CHECK REPORT ====================";

#[derive(Debug, Clone, Serialize)]
pub struct FailedTask {
    pub recipe: String,
    pub version: String,
    pub build_logic: PathBuf,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

/// Counters and failures for one completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_secs: u64,
    pub recipes_visited: usize,
    pub configless_recipes: usize,
    pub tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<FailedTask>,
}

impl RunReport {
    /// Pair each task with the result at the same index.
    pub fn aggregate(
        plan: &TaskPlan,
        results: &[ExecutionResult],
        started_at: String,
        finished_at: String,
        elapsed: Duration,
    ) -> Result<Self> {
        if plan.tasks.len() != results.len() {
            return Err(SourceCheckError::ResultCountMismatch {
                expected: plan.tasks.len(),
                actual: results.len(),
            });
        }
        let failures: Vec<FailedTask> = plan
            .tasks
            .iter()
            .zip(results)
            .filter(|(_, result)| !result.success)
            .map(|(task, result)| FailedTask {
                recipe: task.recipe.clone(),
                version: task.version.clone(),
                build_logic: task.build_logic.clone(),
                exit_code: result.exit_code,
                stderr: result.stderr.clone(),
            })
            .collect();
        Ok(Self {
            started_at,
            finished_at,
            elapsed_secs: elapsed.as_secs(),
            recipes_visited: plan.recipes_visited,
            configless_recipes: plan.configless_recipes,
            tasks: results.len(),
            succeeded: results.len() - failures.len(),
            failed: failures.len(),
            failures,
        })
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", BANNER);
        let _ = writeln!(out, "elapsed: {}", format_hms(self.elapsed_secs));
        let _ = writeln!(out, "recipes traversed: {}", self.recipes_visited);
        let _ = writeln!(out, "configless recipes: {}", self.configless_recipes);
        let _ = writeln!(out, "tasks checked: {}", self.tasks);
        let _ = writeln!(out, "succeeded: {}", self.succeeded);
        let _ = writeln!(out, "failed: {}", self.failed);
        for failure in &self.failures {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "FAILED {}/{} ({})",
                failure.recipe,
                failure.version,
                failure.build_logic.display()
            );
            let stderr = failure.stderr.trim_end();
            if !stderr.is_empty() {
                let _ = writeln!(out, "{}", stderr);
            }
        }
        out
    }
}

fn format_hms(total_secs: u64) -> String {
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    format!("{}h {}m {}s", h, m, s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipes::Task;

    fn plan_of(names: &[(&str, &str)]) -> TaskPlan {
        TaskPlan {
            tasks: names
                .iter()
                .map(|(r, v)| Task {
                    recipe: r.to_string(),
                    version: v.to_string(),
                    build_logic: PathBuf::from(format!("/c/recipes/{}/all", r)),
                })
                .collect(),
            recipes_visited: 2,
            configless_recipes: 1,
        }
    }

    fn ok() -> ExecutionResult {
        ExecutionResult {
            success: true,
            exit_code: Some(0),
            ..ExecutionResult::default()
        }
    }

    #[test]
    fn aggregate_counts_and_keeps_failure_details() {
        let plan = plan_of(&[("zlib", "1.2.11"), ("zlib", "1.2.12"), ("bzip2", "1.0.8")]);
        let mut failed = ExecutionResult::failed("could not download tarball\n");
        failed.exit_code = Some(1);
        let results = vec![ok(), failed, ok()];
        let report = RunReport::aggregate(
            &plan,
            &results,
            "start".to_string(),
            "end".to_string(),
            Duration::from_secs(3725),
        )
        .expect("aggregate");
        assert_eq!(report.tasks, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert!(!report.all_succeeded());
        assert_eq!(report.failures[0].version, "1.2.12");

        let text = report.render();
        assert!(text.starts_with(BANNER));
        assert!(text.contains("elapsed: 1h 2m 5s"));
        assert!(text.contains("recipes traversed: 2"));
        assert!(text.contains("configless recipes: 1"));
        assert!(text.contains("FAILED zlib/1.2.12 (/c/recipes/zlib/all)"));
        assert!(text.contains("could not download tarball"));
        assert!(!text.contains("bzip2/1.0.8"));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let plan = plan_of(&[("zlib", "1.2.11")]);
        let err = RunReport::aggregate(
            &plan,
            &[],
            String::new(),
            String::new(),
            Duration::ZERO,
        )
        .expect_err("mismatch");
        assert!(
            matches!(
                err,
                SourceCheckError::ResultCountMismatch {
                    expected: 1,
                    actual: 0
                }
            ),
            "unexpected error: {}",
            err
        );
        assert_eq!(err.code(), "result_count_mismatch");
        assert!(err.to_string().contains("expected 1 results, got 0"));
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(0), "0h 0m 0s");
        assert_eq!(format_hms(59), "0h 0m 59s");
        assert_eq!(format_hms(3600), "1h 0m 0s");
    }
}
