use regex::Regex;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Hard floor on how long one engine invocation may take, regardless of the
/// configured per-move budget.
pub const PROCESS_TIMEOUT_FLOOR: Duration = Duration::from_secs(63);

/// Performance snapshot extracted from one engine invocation. All four
/// fields come from the same statistics line; there is no partial record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineMetrics {
    pub depth: u64,
    pub seldepth: u64,
    pub time_ms: u64,
    pub nps: u64,
}

/// Failures that abort the whole run. A timeout is deliberately not among
/// them: a hung search is an expected outcome and surfaces as an absent
/// metrics record instead.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to spawn engine process `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("engine i/o failure for `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("engine protocol failure for `{command}`\ntranscript:\n{transcript}")]
    Protocol { command: String, transcript: String },
}

/// Drives one engine invocation per configuration task: spawn with the task
/// file, send one timed-search command, wait for the conclusion signal, and
/// extract the final statistics line from the captured transcript.
#[derive(Debug, Clone)]
pub struct EngineDriver {
    engine_path: PathBuf,
    seconds_per_move: f64,
    timeout: Duration,
}

impl EngineDriver {
    pub fn new(engine_path: PathBuf, seconds_per_move: f64) -> Self {
        let budget = Duration::from_secs_f64(seconds_per_move * 2.0);
        Self {
            engine_path,
            seconds_per_move,
            timeout: PROCESS_TIMEOUT_FLOOR.max(budget),
        }
    }

    /// Overrides the computed timeout. Intended for harness tests with stub
    /// engines where waiting out the full floor is pointless.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the engine once against `task_file`.
    ///
    /// `Ok(None)` means the engine produced no parseable statistics line
    /// before the timeout or exit; that is a valid, expected outcome. Only
    /// process crashes and protocol violations map to `Err`.
    pub fn run_task(&self, task_file: &Path) -> Result<Option<EngineMetrics>, DriverError> {
        let command = format!("{} -c {}", self.engine_path.display(), task_file.display());
        let movetime_ms = (self.seconds_per_move * 1000.0).round() as u64;
        let deadline = Instant::now() + self.timeout;

        let mut cmd = Command::new(&self.engine_path);
        cmd.arg("-c").arg(task_file);
        if let Some(dir) = self.engine_path.parent() {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|source| DriverError::Spawn {
            command: command.clone(),
            source,
        })?;
        let Some(stdout) = child.stdout.take() else {
            reap(&mut child);
            return Err(DriverError::Protocol {
                command,
                transcript: "engine stdout was not captured".to_string(),
            });
        };
        let Some(mut stdin) = child.stdin.take() else {
            reap(&mut child);
            return Err(DriverError::Protocol {
                command,
                transcript: "engine stdin was not captured".to_string(),
            });
        };

        // Reader thread feeds stdout lines over a channel so the wait below
        // can be bounded by the deadline without any async machinery. The
        // thread is detached: a misbehaving engine can keep the pipe open
        // past the deadline, and joining would inherit that hang.
        let (tx, rx) = mpsc::channel::<io::Result<String>>();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        let mut transcript: Vec<String> = Vec::new();
        let result = (|| {
            writeln!(stdin, "go movetime {}", movetime_ms).map_err(|source| DriverError::Io {
                command: command.clone(),
                source,
            })?;

            let mut concluded = false;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match rx.recv_timeout(remaining) {
                    Ok(Ok(line)) => {
                        let saw_bestmove = line.contains("bestmove");
                        transcript.push(line);
                        if saw_bestmove {
                            concluded = true;
                            break;
                        }
                    }
                    Ok(Err(source)) => {
                        return Err(DriverError::Io {
                            command: command.clone(),
                            source,
                        });
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(DriverError::Protocol {
                            command: command.clone(),
                            transcript: transcript.join("\n"),
                        });
                    }
                }
            }

            if concluded {
                // The engine may already have exited; a failed quit write is
                // not a protocol violation at this point.
                let _ = writeln!(stdin, "quit");
                drop(stdin);
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match rx.recv_timeout(remaining) {
                        Ok(Ok(line)) => transcript.push(line),
                        _ => break,
                    }
                }
            }
            Ok(())
        })();

        reap(&mut child);
        drop(rx);
        result?;

        Ok(extract_metrics(&transcript))
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn stats_line_regex() -> &'static Regex {
    static STATS_LINE: OnceLock<Regex> = OnceLock::new();
    STATS_LINE.get_or_init(|| {
        Regex::new(
            r"^info depth (?P<depth>\d+) seldepth (?P<seldepth>\d+) time (?P<time>\d+).*nps (?P<nps>\d+)",
        )
        .expect("statistics line pattern is valid")
    })
}

/// Scans the transcript from the last line backward and returns the first
/// statistics match. Engines emit one such line per iterative-deepening
/// step; only the final, deepest one is wanted.
pub fn extract_metrics(transcript: &[String]) -> Option<EngineMetrics> {
    let re = stats_line_regex();
    transcript.iter().rev().find_map(|line| {
        let caps = re.captures(line)?;
        Some(EngineMetrics {
            depth: caps["depth"].parse().ok()?,
            seldepth: caps["seldepth"].parse().ok()?,
            time_ms: caps["time"].parse().ok()?,
            nps: caps["nps"].parse().ok()?,
        })
    })
}
