use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use srcfetch_runner::{CheckConfig, RunReport, SourceCheckError, TaskPlan};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "srcfetch",
    version,
    about = "Verify that every recipe version in a Conan corpus can fetch its sources"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch sources for every recipe version in parallel and report failures.
    Check {
        /// Root of the recipe corpus (the directory holding `recipes/`).
        #[arg(long)]
        corpus: PathBuf,
        /// Directory holding one private tool cache per worker.
        #[arg(long)]
        cache_root: PathBuf,
        #[arg(long)]
        source_root: PathBuf,
        #[arg(long)]
        install_root: PathBuf,
        #[arg(long, default_value = "conan")]
        tool: PathBuf,
        /// Worker count; defaults to available parallelism.
        #[arg(long)]
        jobs: Option<usize>,
        #[arg(long)]
        platform_filter: bool,
        /// Platform identifier overriding the host (linux, windows, macos).
        #[arg(long)]
        platform: Option<String>,
        /// Kill a task's tool invocation after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Print the task list without invoking the tool.
    List {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long)]
        platform_filter: bool,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print the build profile selected for the platform.
    Profile {
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok((payload, code)) => {
            if let Some(payload) = payload {
                emit_json(&payload);
            }
            Ok(code)
        }
        Err(err) => {
            if json_mode {
                let code = err
                    .downcast_ref::<SourceCheckError>()
                    .map(|e| e.code())
                    .unwrap_or("command_failed");
                emit_json(&json_error(code, format!("{:#}", err)));
                return Ok(ExitCode::from(2));
            }
            Err(err)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<(Option<Value>, ExitCode)> {
    match command {
        Commands::Check {
            corpus,
            cache_root,
            source_root,
            install_root,
            tool,
            jobs,
            platform_filter,
            platform,
            timeout_secs,
            json,
        } => {
            let config = CheckConfig {
                corpus,
                cache_root,
                source_root,
                install_root,
                tool,
                jobs: jobs.unwrap_or_else(srcfetch_runner::default_jobs),
                platform,
                platform_filter,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            let report = srcfetch_runner::run_check(&config)?;
            let code = if report.all_succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            };
            if json {
                return Ok((
                    Some(json!({
                        "ok": report.all_succeeded(),
                        "command": "check",
                        "jobs": config.jobs,
                        "report": report_to_json(&report)?,
                    })),
                    code,
                ));
            }
            print!("{}", report.render());
            Ok((None, code))
        }
        Commands::List {
            corpus,
            platform_filter,
            platform,
            json,
        } => {
            let platform = srcfetch_runner::resolve_platform(platform.as_deref())?;
            let plan = srcfetch_runner::plan_tasks(&corpus, platform, platform_filter)?;
            if json {
                return Ok((
                    Some(json!({
                        "ok": true,
                        "command": "list",
                        "platform": platform.as_str(),
                        "plan": plan_to_json(&plan)?,
                    })),
                    ExitCode::SUCCESS,
                ));
            }
            print_plan(&plan);
            Ok((None, ExitCode::SUCCESS))
        }
        Commands::Profile { platform, json } => {
            let platform = srcfetch_runner::resolve_platform(platform.as_deref())?;
            if json {
                return Ok((
                    Some(json!({
                        "ok": true,
                        "command": "profile",
                        "platform": platform.as_str(),
                        "profile": platform.profile(),
                    })),
                    ExitCode::SUCCESS,
                ));
            }
            println!("platform: {}", platform);
            print!("{}", platform.profile());
            Ok((None, ExitCode::SUCCESS))
        }
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_failed\",\"message\":\"failed to encode output\"}}}}"
        ),
    }
}

fn json_error(code: &str, message: String) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Check { json, .. } => *json,
        Commands::List { json, .. } => *json,
        Commands::Profile { json, .. } => *json,
    }
}

fn report_to_json(report: &RunReport) -> Result<Value> {
    Ok(serde_json::to_value(report)?)
}

fn plan_to_json(plan: &TaskPlan) -> Result<Value> {
    Ok(serde_json::to_value(plan)?)
}

fn print_plan(plan: &TaskPlan) {
    for task in &plan.tasks {
        println!(
            "{}/{}\t{}",
            task.recipe,
            task.version,
            task.build_logic.display()
        );
    }
    println!("recipes: {}", plan.recipes_visited);
    println!("configless: {}", plan.configless_recipes);
    println!("tasks: {}", plan.tasks.len());
}
