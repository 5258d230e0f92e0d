//! JSON output formatting
//!
//! The coordinator's run report is written as a single JSON document: plan,
//! result, and one entry per worker with its assignment and partial sum.

use crate::distributed::coordinator::RunReport;
use crate::Result;
use anyhow::Context;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write any report to `output_path`
pub fn write_json_output<T: Serialize>(output_path: &Path, report: &T, pretty: bool) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create JSON output: {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);

    if pretty {
        serde_json::to_writer_pretty(&mut writer, report)?;
    } else {
        serde_json::to_writer(&mut writer, report)?;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to write JSON output: {}", output_path.display()))?;

    Ok(())
}

/// Write the coordinator's run report as pretty JSON
pub fn write_run_report(output_path: &Path, report: &RunReport) -> Result<()> {
    write_json_output(output_path, report, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::aggregation::{CompletionPolicy, PartialResult, ResultSource};
    use crate::distributed::partition::{partition, IntegrationPlan};

    fn sample_report() -> RunReport {
        let plan = IntegrationPlan::new(0.0, 1.0, 1000);
        let workers = partition(&plan, &[2, 4])
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(slot, assignment)| PartialResult {
                slot,
                peer: format!("10.0.0.{}:5000", slot + 1).parse().unwrap(),
                core_count: assignment.core_count,
                assignment,
                value: 1.0 / 6.0,
                source: if slot == 0 {
                    ResultSource::Worker
                } else {
                    ResultSource::Recomputed
                },
            })
            .collect();

        RunReport {
            function: "square".to_string(),
            result: 1.0 / 3.0,
            exact: Some(1.0 / 3.0),
            plan,
            step_width: plan.step_width(),
            total_cores: 6,
            completion_policy: CompletionPolicy::Recompute,
            workers,
            elapsed_secs: 0.25,
        }
    }

    #[test]
    fn test_write_run_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");

        write_run_report(&path, &sample_report()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["function"], "square");
        assert_eq!(value["total_cores"], 6);
        assert_eq!(value["completion_policy"], "recompute");
        assert_eq!(value["plan"]["steps"], 1000);
        assert_eq!(value["workers"].as_array().unwrap().len(), 2);
        assert_eq!(value["workers"][0]["assignment"]["step_count"], 333);
        assert_eq!(value["workers"][1]["assignment"]["step_count"], 667);
        assert_eq!(value["workers"][1]["source"], "recomputed");
        assert_eq!(value["workers"][0]["peer"], "10.0.0.1:5000");
        // Pretty output spans lines
        assert!(text.lines().count() > 10);
    }

    #[test]
    fn test_compact_output_is_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");

        write_json_output(&path, &sample_report(), false).unwrap();

        // Everything buffered has reached the file once the call returns
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["workers"][1]["assignment"]["step_count"], 667);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_flush_failure_is_reported() {
        // Every write to /dev/full fails with ENOSPC
        let path = Path::new("/dev/full");
        if !path.exists() {
            return;
        }
        assert!(write_run_report(path, &sample_report()).is_err());
    }

    #[test]
    fn test_write_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("run.json");
        assert!(write_run_report(&path, &sample_report()).is_err());
    }
}
