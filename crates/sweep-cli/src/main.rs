use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::io::Write;
use sweep_runner::{
    load_config, run_sweep, write_template, Environment, ResumeDecision, SweepConfig, TaskQueue,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweep", version, about = "Engine parameter sweep benchmark runner")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sweep, resuming a prior run if one is found
    Run {
        /// Continue from where the previous run left off without prompting
        #[arg(long, conflicts_with = "restart")]
        resume: bool,
        /// Regenerate every task and discard prior results without prompting
        #[arg(long)]
        restart: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the option space and task directory state without running
    Describe {
        #[arg(long)]
        json: bool,
    },
    /// Write an options.json template for editing
    Init {
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            resume,
            restart,
            json,
        } => run(resume, restart, json),
        Commands::Describe { json } => describe(json),
        Commands::Init { force } => init(force),
    }
}

fn run(resume: bool, restart: bool, json: bool) -> Result<()> {
    let env = Environment::discover()?;
    let config = load_or_scaffold_config(&env)?;
    let queue = TaskQueue::new(env.tasks_dir.clone());

    let decision = match resume_decision(resume, restart, json, queue.has_processed()?)? {
        Some(decision) => decision,
        // Abort: no side effects, normal exit.
        None => return Ok(()),
    };

    if !json {
        println!("Press ctrl+c to stop at any time");
    }
    let outcome = run_sweep(&env, &config, decision)?;
    if json {
        emit_json(&json!({
            "ok": true,
            "command": "run",
            "tasks_run": outcome.tasks_run,
            "results_file": outcome.results_path.display().to_string(),
            "resumed": decision == ResumeDecision::Continue,
        }));
    } else {
        println!("tasks_run: {}", outcome.tasks_run);
        println!("results_file: {}", outcome.results_path.display());
    }
    Ok(())
}

fn describe(json: bool) -> Result<()> {
    let env = Environment::discover()?;
    if !env.options_path.exists() {
        bail!(
            "no options document at {} - run `sweep init` to create one",
            env.options_path.display()
        );
    }
    let config = load_config(&env.options_path)?;
    let queue = TaskQueue::new(env.tasks_dir.clone());
    let pending = queue.pending()?.len();
    let processed = queue.processed_count()?;
    let engine = env.engine_path().ok();

    if json {
        let options: Value = config
            .options
            .iter()
            .map(|(flag, values)| (flag.clone(), json!(values.len())))
            .collect::<serde_json::Map<String, Value>>()
            .into();
        emit_json(&json!({
            "ok": true,
            "command": "describe",
            "seconds_per_move": config.seconds_per_move,
            "results_file_format": config.results_file_format.extension(),
            "candidates_per_option": options,
            "total_tasks": config.task_count(),
            "engine": engine.as_ref().map(|p| p.display().to_string()),
            "pending": pending,
            "processed": processed,
        }));
    } else {
        println!("seconds_per_move: {}", config.seconds_per_move);
        println!(
            "results_file_format: {}",
            config.results_file_format.extension()
        );
        for (flag, values) in &config.options {
            println!("option {}: {} candidate(s)", flag, values.len());
        }
        println!("total_tasks: {}", config.task_count());
        match engine {
            Some(path) => println!("engine: {}", path.display()),
            None => println!("engine: NOT FOUND"),
        }
        println!("pending: {}", pending);
        println!("processed: {}", processed);
    }
    Ok(())
}

fn init(force: bool) -> Result<()> {
    let env = Environment::discover()?;
    if env.options_path.exists() && !force {
        bail!(
            "options document already exists (use --force): {}",
            env.options_path.display()
        );
    }
    write_template(&env.options_path)?;
    println!("wrote: {}", env.options_path.display());
    println!("next: edit the option candidate lists, then `sweep run`");
    Ok(())
}

/// Loads the options document; if it is missing, writes the template and
/// exits non-zero so the operator can review it first.
fn load_or_scaffold_config(env: &Environment) -> Result<SweepConfig> {
    if !env.options_path.exists() {
        write_template(&env.options_path)?;
        bail!(
            "options document was missing - a template was written to {}; review it and run again",
            env.options_path.display()
        );
    }
    load_config(&env.options_path)
}

/// Resolves the continue/restart/abort decision. The prompt is only reached
/// interactively: in `--json` mode a prior run without an explicit flag is an
/// error, since an unattended consumer cannot answer on stdin.
fn resume_decision(
    resume: bool,
    restart: bool,
    json: bool,
    has_processed: bool,
) -> Result<Option<ResumeDecision>> {
    if !has_processed {
        return Ok(Some(ResumeDecision::Restart));
    }
    if resume {
        return Ok(Some(ResumeDecision::Continue));
    }
    if restart {
        return Ok(Some(ResumeDecision::Restart));
    }
    if json {
        bail!("a previous run was found - pass --resume or --restart when using --json");
    }
    prompt_resume()
}

/// Binary resume decision, or None to abort the run entirely.
fn prompt_resume() -> Result<Option<ResumeDecision>> {
    print!("Do you want to resume from where the previous run left off? y/n/q ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    match answer.trim() {
        "y" | "Y" => Ok(Some(ResumeDecision::Continue)),
        "q" | "Q" => Ok(None),
        _ => Ok(Some(ResumeDecision::Restart)),
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":\"failed to serialize JSON payload\"}}"
        ),
    }
}
