//! Purpose: Stable JSON envelopes for `average` and `check` results.
//! Exports: `run_json`, `check_json`.
//! Role: Keep stdout payload shape in one place for the CLI and its tests.
//! Invariants: Key names are stable; fields are additive-only.
//! Invariants: Non-finite numbers never reach stdout (they serialize as null).

use std::path::Path;

use haverscan::core::pipeline::{PipelineConfig, Report};
use serde_json::{Map, Value, json};

pub(crate) fn run_json(path: &Path, config: &PipelineConfig, report: &Report, ts: &str) -> Value {
    let mut map = Map::new();
    map.insert("ts".to_string(), json!(ts));
    map.insert("input".to_string(), json!(path.display().to_string()));
    map.insert("format".to_string(), json!(config.format));
    map.insert("structure".to_string(), json!(config.structure));
    map.insert("threads".to_string(), json!(config.threads));
    map.insert("radius".to_string(), json!(config.radius));
    map.insert("mean".to_string(), json!(report.mean));
    map.insert("count".to_string(), json!(report.count));
    map.insert("bytes".to_string(), json!(report.bytes));
    map.insert("timing".to_string(), timing_json(report));
    map.insert("throughput".to_string(), json!(report.throughput));
    Value::Object(map)
}

fn timing_json(report: &Report) -> Value {
    json!({
        "precision": report.timing,
        "parse_secs": report.parse_secs,
        "compute_secs": report.compute_secs,
        "total_secs": report.total_secs,
        "parse_mb_per_sec": report.parse_mb_per_sec,
        "compute_mb_per_sec": report.compute_mb_per_sec,
    })
}

pub(crate) fn check_json(path: &Path, records: u64, bytes: usize) -> Value {
    json!({
        "input": path.display().to_string(),
        "records": records,
        "bytes": bytes,
        "balanced": true,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use haverscan::core::pipeline::{PipelineConfig, Report, TimingPrecision};

    use super::{check_json, run_json};

    #[test]
    fn run_json_has_stable_keys() {
        let report = Report {
            mean: 5005.18,
            count: 2,
            bytes: 2 * 1024 * 1024,
            parse_secs: 0.5,
            compute_secs: 1.5,
            total_secs: 2.0,
            parse_mb_per_sec: Some(2.0),
            compute_mb_per_sec: Some(2.0),
            throughput: Some(1.0),
            timing: TimingPrecision::Fine,
        };
        let value = run_json(
            Path::new("data.json"),
            &PipelineConfig::default(),
            &report,
            "2026-01-01T00:00:00Z",
        );

        assert_eq!(value["input"], "data.json");
        assert_eq!(value["format"], "json");
        assert_eq!(value["structure"], "lenient");
        assert_eq!(value["count"], 2);
        assert_eq!(value["mean"], 5005.18);
        assert_eq!(value["throughput"], 1.0);
        assert_eq!(value["timing"]["precision"], "fine");
        assert_eq!(value["timing"]["total_secs"], 2.0);
        assert_eq!(value["bytes"], 2 * 1024 * 1024);
        assert_eq!(value["timing"]["compute_mb_per_sec"], 2.0);
    }

    #[test]
    fn missing_throughput_is_null() {
        let report = Report {
            mean: 0.0,
            count: 0,
            bytes: 0,
            parse_secs: 0.0,
            compute_secs: 0.0,
            total_secs: 0.0,
            parse_mb_per_sec: None,
            compute_mb_per_sec: None,
            throughput: None,
            timing: TimingPrecision::Coarse,
        };
        let value = run_json(Path::new("x"), &PipelineConfig::default(), &report, "t");
        assert!(value["throughput"].is_null());
        assert!(value["timing"]["parse_mb_per_sec"].is_null());
        assert!(value["timing"]["compute_mb_per_sec"].is_null());
        assert_eq!(value["timing"]["precision"], "coarse");
    }

    #[test]
    fn check_json_reports_balance() {
        let value = check_json(Path::new("x.json"), 3, 120);
        assert_eq!(value["records"], 3);
        assert_eq!(value["balanced"], true);
    }
}
