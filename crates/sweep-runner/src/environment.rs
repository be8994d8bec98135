use anyhow::{anyhow, bail, Result};
use std::path::{Path, PathBuf};

use crate::config::ResultsFormat;

#[cfg(windows)]
pub const ENGINE_BINARY: &str = "lc0.exe";
#[cfg(not(windows))]
pub const ENGINE_BINARY: &str = "lc0";

const OPTIONS_FILE: &str = "options.json";
const TASKS_DIR: &str = "configs";

/// Resolved on-disk layout for one run: everything lives next to the
/// program, matching how operators deploy the harness alongside the engine.
#[derive(Debug, Clone)]
pub struct Environment {
    pub app_dir: PathBuf,
    pub options_path: PathBuf,
    pub tasks_dir: PathBuf,
}

impl Environment {
    /// Layout rooted at the running executable's directory.
    pub fn discover() -> Result<Self> {
        let exe = std::env::current_exe()?;
        let app_dir = exe
            .parent()
            .ok_or_else(|| anyhow!("executable path has no parent directory"))?
            .to_path_buf();
        Ok(Self::at(&app_dir))
    }

    /// Layout rooted at an explicit directory.
    pub fn at(app_dir: &Path) -> Self {
        Self {
            app_dir: app_dir.to_path_buf(),
            options_path: app_dir.join(OPTIONS_FILE),
            tasks_dir: app_dir.join(TASKS_DIR),
        }
    }

    /// Path to the engine binary, validated to exist.
    pub fn engine_path(&self) -> Result<PathBuf> {
        let path = self.app_dir.join(ENGINE_BINARY);
        if !path.exists() {
            bail!(
                "unable to find the {} executable at {} - it must sit in the same directory as this program",
                ENGINE_BINARY,
                path.display()
            );
        }
        Ok(path)
    }

    pub fn results_path(&self, format: ResultsFormat) -> PathBuf {
        self.app_dir.join(format!("results.{}", format.extension()))
    }
}
