use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{ResultsFormat, SweepConfig};
use crate::engine::EngineMetrics;
use crate::queue::ConfigTask;

/// Rows start below the title row and the header row.
const HEADER_ROWS: u64 = 2;
const METRIC_COLUMNS: &[&str] = &["Filename", "NPS", "DEPTH", "SELDEPTH", "TIME"];
const SHEET_NAME: &str = "Results";

/// Closed set of result-store backends, selected once per run by the
/// options document and dispatched exhaustively.
pub enum Recorder {
    Csv(CsvRecorder),
    Xlsx(XlsxRecorder),
}

impl Recorder {
    /// Opens the backing store. When `resume` is set and the store exists it
    /// is opened in place, preserving prior rows; otherwise it is created
    /// fresh.
    pub fn open(
        format: ResultsFormat,
        path: &Path,
        config: &SweepConfig,
        resume: bool,
    ) -> Result<Self> {
        let option_columns: Vec<String> = config.options.keys().cloned().collect();
        match format {
            ResultsFormat::Csv => Ok(Recorder::Csv(CsvRecorder::open(
                path,
                option_columns,
                resume,
            )?)),
            ResultsFormat::Xlsx => Ok(Recorder::Xlsx(XlsxRecorder::open(
                path,
                option_columns,
                resume,
            )?)),
        }
    }

    /// Persists one result row keyed by the task's ordinal and durably
    /// flushes it. Absent metrics are coerced to zeros; every option's
    /// assigned value is echoed so the row is self-describing. The caller
    /// may only mark the task processed after this returns Ok.
    pub fn record(&mut self, task: &ConfigTask, metrics: Option<&EngineMetrics>) -> Result<()> {
        match self {
            Recorder::Csv(r) => r.record(task, metrics),
            Recorder::Xlsx(r) => r.record(task, metrics),
        }
    }

    pub fn finalize(self) -> Result<()> {
        match self {
            Recorder::Csv(r) => r.finalize(),
            Recorder::Xlsx(r) => r.finalize(),
        }
    }
}

fn option_values(task: &ConfigTask, option_columns: &[String]) -> Result<Vec<String>> {
    let assignment = task.assignment()?;
    option_columns
        .iter()
        .map(|flag| {
            assignment.get(flag).cloned().ok_or_else(|| {
                anyhow!(
                    "task {} does not assign option '{}' - the task directory does not match the current option space (restart the run)",
                    task.file_name(),
                    flag
                )
            })
        })
        .collect()
}

fn metric_cells(metrics: Option<&EngineMetrics>) -> [u64; 4] {
    match metrics {
        Some(m) => [m.nps, m.depth, m.seldepth, m.time_ms],
        None => [0; 4],
    }
}

pub struct CsvRecorder {
    writer: csv::Writer<fs::File>,
    option_columns: Vec<String>,
}

impl CsvRecorder {
    fn open(path: &Path, option_columns: Vec<String>, resume: bool) -> Result<Self> {
        let reopen = resume && path.exists();
        let file = if reopen {
            fs::OpenOptions::new()
                .append(true)
                .open(path)
                .with_context(|| format!("failed to reopen result store {}", path.display()))?
        } else {
            fs::File::create(path)
                .with_context(|| format!("failed to create result store {}", path.display()))?
        };
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if !reopen {
            let mut header: Vec<String> =
                METRIC_COLUMNS.iter().map(|c| c.to_string()).collect();
            header.extend(option_columns.iter().cloned());
            writer
                .write_record(&header)
                .and_then(|_| writer.flush().map_err(Into::into))
                .with_context(|| format!("failed to write header to {}", path.display()))?;
        }
        Ok(Self {
            writer,
            option_columns,
        })
    }

    fn record(&mut self, task: &ConfigTask, metrics: Option<&EngineMetrics>) -> Result<()> {
        let [nps, depth, seldepth, time_ms] = metric_cells(metrics);
        let mut row = vec![
            task.file_name(),
            nps.to_string(),
            depth.to_string(),
            seldepth.to_string(),
            time_ms.to_string(),
        ];
        row.extend(option_values(task, &self.option_columns)?);
        self.writer
            .write_record(&row)
            .with_context(|| format!("failed to record result row for {}", task.file_name()))?;
        self.writer
            .flush()
            .with_context(|| format!("failed to flush result row for {}", task.file_name()))?;
        Ok(())
    }

    fn finalize(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

pub struct XlsxRecorder {
    book: umya_spreadsheet::Spreadsheet,
    path: PathBuf,
    option_columns: Vec<String>,
}

impl XlsxRecorder {
    fn open(path: &Path, option_columns: Vec<String>, resume: bool) -> Result<Self> {
        let mut book = if resume && path.exists() {
            umya_spreadsheet::reader::xlsx::read(path)
                .map_err(|e| anyhow!("failed to reopen result store {}: {:?}", path.display(), e))?
        } else {
            umya_spreadsheet::new_file()
        };
        if book.get_sheet_by_name(SHEET_NAME).is_none() {
            book.new_sheet(SHEET_NAME)
                .map_err(|e| anyhow!("failed to create results sheet: {}", e))?;
        }

        let mut recorder = Self {
            book,
            path: path.to_path_buf(),
            option_columns,
        };
        recorder.write_headers()?;
        recorder.save()?;
        Ok(recorder)
    }

    fn sheet(&mut self) -> Result<&mut umya_spreadsheet::Worksheet> {
        self.book
            .get_sheet_by_name_mut(SHEET_NAME)
            .ok_or_else(|| anyhow!("results sheet disappeared from workbook"))
    }

    /// Header area: title, data column names, and the live best-of
    /// aggregates the spreadsheet recomputes itself. Rewritten on every
    /// open; the layout is a pure function of the option set.
    fn write_headers(&mut self) -> Result<()> {
        let option_columns = self.option_columns.clone();
        let aggregate_col = METRIC_COLUMNS.len() as u32 + option_columns.len() as u32 + 2;
        let sheet = self.sheet()?;
        sheet
            .get_cell_mut((1, 1))
            .set_value("Engine Parameters Run Results");
        for (i, name) in METRIC_COLUMNS.iter().enumerate() {
            sheet.get_cell_mut((i as u32 + 1, 2)).set_value(*name);
        }
        for (i, name) in option_columns.iter().enumerate() {
            sheet
                .get_cell_mut((METRIC_COLUMNS.len() as u32 + 1 + i as u32, 2))
                .set_value(name.as_str());
        }

        // Best NPS / DEPTH / SELDEPTH, each with the originating filename.
        for (i, (label, data_col)) in [("Best NPS", "B"), ("Best Depth", "C"), ("Best SelDepth", "D")]
            .iter()
            .enumerate()
        {
            let row = 2 + 3 * i as u32;
            sheet.get_cell_mut((aggregate_col, row)).set_value(*label);
            sheet
                .get_cell_mut((aggregate_col + 1, row))
                .set_value("Filename");
            sheet
                .get_cell_mut((aggregate_col, row + 1))
                .set_formula(format!("=MAX({col}:{col})", col = data_col));
            sheet.get_cell_mut((aggregate_col + 1, row + 1)).set_formula(format!(
                "=INDIRECT(\"A\" & MATCH(MAX({col}:{col}), {col}:{col}, 0))",
                col = data_col
            ));
        }
        Ok(())
    }

    fn record(&mut self, task: &ConfigTask, metrics: Option<&EngineMetrics>) -> Result<()> {
        let [nps, depth, seldepth, time_ms] = metric_cells(metrics);
        let options = option_values(task, &self.option_columns)?;
        let row = (task.ordinal + HEADER_ROWS) as u32;
        let sheet = self.sheet()?;
        sheet.get_cell_mut((1, row)).set_value(task.file_name());
        sheet.get_cell_mut((2, row)).set_value_number(nps as f64);
        sheet.get_cell_mut((3, row)).set_value_number(depth as f64);
        sheet
            .get_cell_mut((4, row))
            .set_value_number(seldepth as f64);
        sheet
            .get_cell_mut((5, row))
            .set_value_number(time_ms as f64);
        for (i, value) in options.iter().enumerate() {
            sheet
                .get_cell_mut((METRIC_COLUMNS.len() as u32 + 1 + i as u32, row))
                .set_value(value.as_str());
        }
        self.save()
            .with_context(|| format!("failed to save result row for {}", task.file_name()))?;
        Ok(())
    }

    fn save(&self) -> Result<()> {
        umya_spreadsheet::writer::xlsx::write(&self.book, &self.path).map_err(|e| {
            anyhow!(
                "failed to write result store {}: {:?}",
                self.path.display(),
                e
            )
        })
    }

    fn finalize(self) -> Result<()> {
        self.save()
    }
}
