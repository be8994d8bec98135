//! Parameter-sweep benchmark harness for an external chess engine.
//!
//! Expands a declarative option space into numbered configuration tasks,
//! runs the engine once per task under a bounded time budget, and records
//! one result row per task. Interrupted runs resume without re-executing
//! completed tasks: the task directory's pending/processed partition is the
//! durable state machine.

use anyhow::{Context, Result};
use std::fs;
use tracing::info;

pub mod config;
pub mod engine;
pub mod environment;
pub mod expand;
pub mod queue;
pub mod record;

pub use config::{load_config, write_template, ResultsFormat, SweepConfig};
pub use engine::{EngineDriver, EngineMetrics};
pub use environment::Environment;
pub use queue::{ConfigTask, TaskQueue};
pub use record::Recorder;

/// Operator's answer to the resume question. `Restart` re-expands the task
/// set and discards the prior result store; `Continue` touches neither.
/// Aborting is handled upstream and never reaches the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    Continue,
    Restart,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub tasks_run: usize,
    pub results_path: std::path::PathBuf,
}

/// Runs the sweep to completion: strictly sequential, one engine process at
/// a time, tasks in ordinal order. Any fatal error aborts the whole run and
/// leaves the in-flight task pending for the next resumed run.
pub fn run_sweep(
    env: &Environment,
    config: &SweepConfig,
    decision: ResumeDecision,
) -> Result<RunOutcome> {
    // Resolve the engine before touching the task directory or the result
    // store; a missing binary must fail with nothing modified.
    let engine_path = env.engine_path()?;
    let queue = TaskQueue::new(env.tasks_dir.clone());
    let results_path = env.results_path(config.results_file_format);

    if decision == ResumeDecision::Restart {
        let count = expand::generate_task_files(&env.tasks_dir, config)?;
        info!(count, "generated configuration tasks");
        if results_path.exists() {
            fs::remove_file(&results_path).with_context(|| {
                format!("failed to remove old result store {}", results_path.display())
            })?;
        }
    }

    let resume = decision == ResumeDecision::Continue;
    let mut recorder = Recorder::open(
        config.results_file_format,
        &results_path,
        config,
        resume,
    )?;

    let driver = EngineDriver::new(engine_path, config.seconds_per_move);
    let pending = queue.pending()?;
    info!(pending = pending.len(), "starting run");

    let mut tasks_run = 0;
    for task in &pending {
        info!(task = %task.file_name(), "running engine");
        let metrics = driver
            .run_task(&task.path)
            .with_context(|| format!("engine run failed for {}", task.file_name()))?;
        if metrics.is_none() {
            info!(task = %task.file_name(), "no statistics line before timeout, recording zeros");
        }
        recorder.record(task, metrics.as_ref())?;
        queue.mark_processed(task)?;
        tasks_run += 1;
    }

    recorder.finalize()?;
    info!(tasks_run, "run complete");
    Ok(RunOutcome {
        tasks_run,
        results_path,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    const STUB_ENGINE: &str = "#!/bin/sh\n\
        read _go\n\
        echo 'info depth 10 seldepth 12 time 4800 nps 50000'\n\
        echo 'bestmove e2e4'\n\
        read _quit\n\
        exit 0\n";

    fn sweep_env(tag: &str, engine_script: &str) -> Environment {
        let dir = std::env::temp_dir().join(format!("sweep_run_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("app dir");
        let engine = dir.join(environment::ENGINE_BINARY);
        fs::write(&engine, engine_script).expect("stub engine");
        fs::set_permissions(&engine, fs::Permissions::from_mode(0o755)).expect("chmod");
        Environment::at(&dir)
    }

    fn sweep_config() -> SweepConfig {
        SweepConfig {
            seconds_per_move: 5.0,
            results_file_format: ResultsFormat::Csv,
            options: BTreeMap::from([
                ("backend".to_string(), vec![json!("a"), json!("b")]),
                ("threads".to_string(), vec![json!(1), json!(2)]),
            ]),
        }
    }

    #[test]
    fn full_run_records_and_processes_every_task_in_order() {
        let env = sweep_env("full", STUB_ENGINE);
        let config = sweep_config();
        let outcome = run_sweep(&env, &config, ResumeDecision::Restart).expect("run");
        assert_eq!(outcome.tasks_run, 4);

        let queue = TaskQueue::new(env.tasks_dir.clone());
        assert!(queue.pending().expect("pending").is_empty());
        assert_eq!(queue.processed_count().expect("processed"), 4);

        let data = fs::read_to_string(&outcome.results_path).expect("results");
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[1], "1.config,50000,10,12,4800,a,1");
        assert_eq!(lines[2], "2.config,50000,10,12,4800,a,2");
        assert_eq!(lines[3], "3.config,50000,10,12,4800,b,1");
        assert_eq!(lines[4], "4.config,50000,10,12,4800,b,2");
        let _ = fs::remove_dir_all(&env.app_dir);
    }

    #[test]
    fn continue_skips_expansion_and_only_runs_pending_tasks() {
        let env = sweep_env("resume", STUB_ENGINE);
        let config = sweep_config();

        // Simulate a prior run that completed task 1 and stopped.
        fs::create_dir_all(env.tasks_dir.join("processed")).expect("dirs");
        fs::write(
            env.tasks_dir.join("processed").join("1.config"),
            "--backend=a\n--threads=1\n",
        )
        .expect("seed processed");
        fs::write(env.tasks_dir.join("2.config"), "--backend=a\n--threads=2\n")
            .expect("seed pending");
        let results_path = env.results_path(ResultsFormat::Csv);
        fs::write(
            &results_path,
            "Filename,NPS,DEPTH,SELDEPTH,TIME,backend,threads\n1.config,1,1,1,1,a,1\n",
        )
        .expect("seed results");

        let outcome = run_sweep(&env, &config, ResumeDecision::Continue).expect("run");
        assert_eq!(outcome.tasks_run, 1);

        let queue = TaskQueue::new(env.tasks_dir.clone());
        assert_eq!(queue.processed_count().expect("processed"), 2);
        let data = fs::read_to_string(&results_path).expect("results");
        let lines: Vec<&str> = data.lines().collect();
        assert_eq!(lines.len(), 3, "prior row preserved, one row appended");
        assert!(lines[1].starts_with("1.config,1,"), "prior row untouched");
        assert_eq!(lines[2], "2.config,50000,10,12,4800,a,2");
        let _ = fs::remove_dir_all(&env.app_dir);
    }

    #[test]
    fn restart_discards_prior_results_and_regenerates() {
        let env = sweep_env("restart", STUB_ENGINE);
        let config = sweep_config();
        let results_path = env.results_path(ResultsFormat::Csv);
        fs::create_dir_all(env.tasks_dir.join("processed")).expect("dirs");
        fs::write(env.tasks_dir.join("processed").join("1.config"), "--x=1\n")
            .expect("seed processed");
        fs::write(&results_path, "stale\n").expect("seed results");

        let outcome = run_sweep(&env, &config, ResumeDecision::Restart).expect("run");
        assert_eq!(outcome.tasks_run, 4);
        let data = fs::read_to_string(&results_path).expect("results");
        assert!(!data.contains("stale"));
        let _ = fs::remove_dir_all(&env.app_dir);
    }

    #[test]
    fn timeout_run_records_zeros_and_still_processes_the_task() {
        let env = sweep_env(
            "timeout",
            "#!/bin/sh\nread _go\nsleep 30\n",
        );
        let mut config = sweep_config();
        config.options = BTreeMap::from([("threads".to_string(), vec![json!(1)])]);

        // Same loop as run_sweep, with a short driver timeout so the test
        // does not wait out the production floor.
        let queue = TaskQueue::new(env.tasks_dir.clone());
        expand::generate_task_files(&env.tasks_dir, &config).expect("generate");
        let results_path = env.results_path(ResultsFormat::Csv);
        let mut recorder =
            Recorder::open(ResultsFormat::Csv, &results_path, &config, false).expect("open");
        let driver = EngineDriver::new(env.engine_path().expect("engine"), config.seconds_per_move)
            .with_timeout(std::time::Duration::from_millis(300));
        for task in queue.pending().expect("pending") {
            let metrics = driver.run_task(&task.path).expect("timeout is soft");
            assert!(metrics.is_none());
            recorder.record(&task, metrics.as_ref()).expect("record");
            queue.mark_processed(&task).expect("mark");
        }
        recorder.finalize().expect("finalize");

        assert_eq!(queue.processed_count().expect("processed"), 1);
        let data = fs::read_to_string(&results_path).expect("results");
        assert!(data.lines().nth(1).expect("row").starts_with("1.config,0,0,0,0"));
        let _ = fs::remove_dir_all(&env.app_dir);
    }

    #[test]
    fn engine_crash_aborts_the_run_and_leaves_the_task_pending() {
        let env = sweep_env("crash", "#!/bin/sh\nread _go\nexit 3\n");
        let config = sweep_config();
        let err = run_sweep(&env, &config, ResumeDecision::Restart).expect_err("must abort");
        assert!(err.to_string().contains("engine run failed"), "{}", err);

        let queue = TaskQueue::new(env.tasks_dir.clone());
        assert_eq!(queue.pending().expect("pending").len(), 4);
        assert_eq!(queue.processed_count().expect("processed"), 0);
        let _ = fs::remove_dir_all(&env.app_dir);
    }

    #[test]
    fn missing_engine_fails_before_any_task_runs() {
        let dir = std::env::temp_dir().join(format!("sweep_run_noengine_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("app dir");
        let env = Environment::at(&dir);
        let config = sweep_config();
        assert!(run_sweep(&env, &config, ResumeDecision::Restart).is_err());
        assert!(!env.tasks_dir.exists(), "nothing may be touched");
        let _ = fs::remove_dir_all(PathBuf::from(dir));
    }
}
