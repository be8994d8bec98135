use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const TASK_EXTENSION: &str = "config";
const PROCESSED_DIR: &str = "processed";

/// One configuration task, identified by its permanent ordinal. The ordinal
/// is both the on-disk filename stem and the result-row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTask {
    pub ordinal: u64,
    pub path: PathBuf,
}

impl ConfigTask {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.ordinal, TASK_EXTENSION)
    }

    /// Re-parses the task file's `--flag=value` lines. The file is the
    /// durable ground truth for the assignment, so result rows stay
    /// self-describing even across resumed runs.
    pub fn assignment(&self) -> Result<BTreeMap<String, String>> {
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read task file {}", self.path.display()))?;
        let mut assignment = BTreeMap::new();
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let rest = line.strip_prefix("--").ok_or_else(|| {
                anyhow!("malformed task line in {}: {}", self.path.display(), line)
            })?;
            let (flag, value) = rest.split_once('=').ok_or_else(|| {
                anyhow!("malformed task line in {}: {}", self.path.display(), line)
            })?;
            assignment.insert(flag.to_string(), value.to_string());
        }
        Ok(assignment)
    }
}

/// Two-partition task directory: pending files live directly under the root,
/// processed files under `processed/`. The only allowed state transition is
/// Pending -> Processed, performed by a single rename after the task's
/// result row has been durably recorded.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    root: PathBuf,
}

impl TaskQueue {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR)
    }

    /// True when a prior run left any processed task behind; this drives the
    /// operator's continue/restart/abort decision.
    pub fn has_processed(&self) -> Result<bool> {
        let dir = self.processed_dir();
        if !dir.exists() {
            return Ok(false);
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if task_ordinal(&entry.path()).is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn processed_count(&self) -> Result<usize> {
        let dir = self.processed_dir();
        if !dir.exists() {
            return Ok(0);
        }
        let mut count = 0;
        for entry in fs::read_dir(&dir)? {
            if task_ordinal(&entry?.path()).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Pending tasks in natural ordinal order: task 10 sorts after task 9,
    /// never between 1 and 2 the way a string sort would place it.
    pub fn pending(&self) -> Result<Vec<ConfigTask>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut tasks = Vec::new();
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("failed to scan task directory {}", self.root.display()))?
        {
            let path = entry?.path();
            if let Some(ordinal) = task_ordinal(&path) {
                tasks.push(ConfigTask { ordinal, path });
            }
        }
        tasks.sort_by_key(|t| t.ordinal);
        Ok(tasks)
    }

    /// Completion transition. Only called after the recorder write
    /// succeeded; a crash before this point leaves the task pending so a
    /// resumed run retries it (at-least-once semantics).
    pub fn mark_processed(&self, task: &ConfigTask) -> Result<()> {
        let target = self.processed_dir().join(task.file_name());
        if !task.path.exists() {
            bail!("task file missing, cannot mark processed: {}", task.path.display());
        }
        fs::rename(&task.path, &target).with_context(|| {
            format!(
                "failed to move {} to {}",
                task.path.display(),
                target.display()
            )
        })?;
        Ok(())
    }
}

fn task_ordinal(path: &Path) -> Option<u64> {
    if !path.is_file() {
        return None;
    }
    if path.extension().and_then(|e| e.to_str()) != Some(TASK_EXTENSION) {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse::<u64>().ok())
}
