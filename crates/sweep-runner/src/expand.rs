use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::config::SweepConfig;
use crate::queue::TASK_EXTENSION;

/// Expands the option space into one full assignment per combination.
///
/// Pure lexicographic cartesian product: the first option varies slowest,
/// each option's candidate-list order is preserved. Position in the returned
/// vector is the task's ordinal minus one, so re-running against an
/// unchanged option space reproduces the same ordinal->assignment mapping.
pub fn expand_assignments(
    options: &BTreeMap<String, Vec<Value>>,
) -> Vec<BTreeMap<String, Value>> {
    let flags: Vec<(&String, &Vec<Value>)> = options.iter().collect();
    product(&flags)
}

fn product(flags: &[(&String, &Vec<Value>)]) -> Vec<BTreeMap<String, Value>> {
    let Some(((flag, values), rest)) = flags.split_first() else {
        return vec![BTreeMap::new()];
    };
    let tails = product(rest);
    let mut out = Vec::with_capacity(values.len() * tails.len());
    for value in values.iter() {
        for tail in &tails {
            let mut assignment = tail.clone();
            assignment.insert((*flag).clone(), value.clone());
            out.push(assignment);
        }
    }
    out
}

/// Writes every combination as a numbered task file under `tasks_dir`.
///
/// This is a full reset: any prior pending/processed partitions are wiped
/// first. Resuming a run is handled upstream by not calling this at all.
/// Validation failures are reported before any directory is touched.
pub fn generate_task_files(tasks_dir: &Path, config: &SweepConfig) -> Result<usize> {
    config.validate()?;

    if tasks_dir.exists() {
        fs::remove_dir_all(tasks_dir)
            .with_context(|| format!("failed to clear task directory {}", tasks_dir.display()))?;
    }
    fs::create_dir_all(tasks_dir.join("processed"))
        .with_context(|| format!("failed to create task directory {}", tasks_dir.display()))?;

    let assignments = expand_assignments(&config.options);
    for (i, assignment) in assignments.iter().enumerate() {
        let path = tasks_dir.join(format!("{}.{}", i + 1, TASK_EXTENSION));
        let mut file = fs::File::create(&path)
            .with_context(|| format!("failed to create task file {}", path.display()))?;
        for (flag, value) in assignment {
            writeln!(file, "--{}={}", flag, render_value(value))?;
        }
    }
    Ok(assignments.len())
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResultsFormat;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn space(entries: &[(&str, &[Value])]) -> BTreeMap<String, Vec<Value>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sweep_expand_{}_{}", tag, std::process::id()))
    }

    #[test]
    fn product_size_and_uniqueness() {
        let options = space(&[
            ("a", &[json!(1), json!(2)]),
            ("b", &[json!("x"), json!("y"), json!("z")]),
            ("c", &[json!(true)]),
        ]);
        let assignments = expand_assignments(&options);
        assert_eq!(assignments.len(), 2 * 3 * 1);
        let distinct: BTreeSet<String> = assignments
            .iter()
            .map(|a| serde_json::to_string(a).expect("serialize"))
            .collect();
        assert_eq!(distinct.len(), assignments.len());
        for assignment in &assignments {
            assert_eq!(assignment.len(), 3);
        }
    }

    #[test]
    fn expansion_is_deterministic() {
        let options = space(&[
            ("backend", &[json!("a"), json!("b")]),
            ("threads", &[json!(1), json!(2)]),
        ]);
        assert_eq!(expand_assignments(&options), expand_assignments(&options));
    }

    #[test]
    fn reference_ordering_first_option_varies_slowest() {
        let options = space(&[
            ("backend", &[json!("a"), json!("b")]),
            ("threads", &[json!(1), json!(2)]),
        ]);
        let assignments = expand_assignments(&options);
        let pairs: Vec<(String, i64)> = assignments
            .iter()
            .map(|a| {
                (
                    a["backend"].as_str().expect("str").to_string(),
                    a["threads"].as_i64().expect("int"),
                )
            })
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), 1),
                ("a".to_string(), 2),
                ("b".to_string(), 1),
                ("b".to_string(), 2),
            ]
        );
    }

    #[test]
    fn task_files_are_numbered_from_one_and_reparseable() {
        let dir = temp_dir("generate");
        let config = SweepConfig {
            seconds_per_move: 5.0,
            results_file_format: ResultsFormat::Csv,
            options: space(&[
                ("backend", &[json!("a"), json!("b")]),
                ("threads", &[json!(1), json!(2)]),
            ]),
        };
        let count = generate_task_files(&dir, &config).expect("generate");
        assert_eq!(count, 4);
        for i in 1..=4 {
            assert!(dir.join(format!("{}.config", i)).exists(), "task {}", i);
        }
        let first = fs::read_to_string(dir.join("1.config")).expect("read");
        assert_eq!(first, "--backend=a\n--threads=1\n");
        assert!(dir.join("processed").is_dir());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn regeneration_is_a_full_reset() {
        let dir = temp_dir("reset");
        let config = SweepConfig {
            seconds_per_move: 5.0,
            results_file_format: ResultsFormat::Csv,
            options: space(&[("threads", &[json!(1)])]),
        };
        generate_task_files(&dir, &config).expect("first generate");
        fs::write(dir.join("processed").join("1.config"), "--threads=1\n").expect("seed processed");
        generate_task_files(&dir, &config).expect("second generate");
        assert!(dir.join("1.config").exists());
        assert!(!dir.join("processed").join("1.config").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_candidate_list_fails_before_any_file_is_written() {
        let dir = temp_dir("empty_list");
        let config = SweepConfig {
            seconds_per_move: 5.0,
            results_file_format: ResultsFormat::Csv,
            options: space(&[("threads", &[])]),
        };
        assert!(generate_task_files(&dir, &config).is_err());
        assert!(!dir.exists());
    }
}
