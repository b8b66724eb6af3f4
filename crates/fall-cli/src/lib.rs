//! # Fall CLI
//!
//! Line-oriented front-end for the fall monitor. Every input line is one JSON
//! request; every request yields exactly one JSON response line.
//!
//! - no `op` or `"op": "telemetry"`: ingest the line as a telemetry record
//! - `"op": "state"`: query `deviceId`
//! - `"op": "reset"`: reset `deviceId`

use std::fs;
use std::io::{BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use fall_core::{FallError, TelemetryRecord};
use fall_registry::{ErrorResponse, FallMonitor, RegistryConfig};
use log::{debug, warn};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Telemetry(TelemetryRecord),
    State { device_id: String },
    Reset { device_id: String },
}

/// Counters for one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub lines: usize,
    pub rejected: usize,
    pub falls: usize,
    pub evicted: usize,
}

/// Load a registry config from a JSON file; no path means defaults.
pub fn load_config(path: Option<&Path>) -> Result<RegistryConfig> {
    let Some(path) = path else {
        return Ok(RegistryConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = serde_json::from_str(&text)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

pub fn parse_request(line: &str) -> Result<Request> {
    let value: Value = serde_json::from_str(line).context("request is not valid JSON")?;
    let op = value.get("op").and_then(Value::as_str).unwrap_or("telemetry");
    let device_id = || {
        value
            .get("deviceId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Ok(match op {
        "telemetry" => Request::Telemetry(serde_json::from_value(value.clone())?),
        "state" => Request::State {
            device_id: device_id(),
        },
        "reset" => Request::Reset {
            device_id: device_id(),
        },
        other => bail!("unknown op '{other}'"),
    })
}

fn respond(monitor: &FallMonitor, line: &str, fallback_now: f64) -> Result<Value> {
    let value = match parse_request(line)? {
        Request::Telemetry(record) => serde_json::to_value(monitor.ingest_at(&record, fallback_now)?)?,
        Request::State { device_id } => serde_json::to_value(monitor.state(&device_id)?)?,
        Request::Reset { device_id } => serde_json::to_value(monitor.reset(&device_id)?)?,
    };
    Ok(value)
}

/// Answer one request line. Rejected requests become an `{error, message}` body.
pub fn handle_line(monitor: &FallMonitor, line: &str, fallback_now: f64) -> Result<Value> {
    match respond(monitor, line, fallback_now) {
        Ok(value) => Ok(value),
        Err(e) => {
            let body = match e.downcast_ref::<FallError>() {
                Some(fall_error) => ErrorResponse::from(fall_error),
                None => ErrorResponse::new(format!("{e:#}")),
            };
            debug!("rejected request: {}", body.message);
            Ok(serde_json::to_value(body)?)
        }
    }
}

/// Replay every line of `input` through `monitor`, writing one response per
/// line to `output`. Blank lines are skipped. With `sweep_every`, idle
/// detectors are evicted every that many lines, measured against the newest
/// telemetry timestamp seen so far.
pub fn run<R: BufRead, W: Write>(
    monitor: &FallMonitor,
    input: R,
    mut output: W,
    sweep_every: Option<usize>,
) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    let mut latest_at = f64::NEG_INFINITY;

    for line in input.lines() {
        let line = line.context("reading input")?;
        if line.trim().is_empty() {
            continue;
        }
        stats.lines += 1;

        let response = handle_line(monitor, &line, fall_core::wall_clock_ms())?;
        if response.get("error").and_then(Value::as_bool) == Some(true) {
            stats.rejected += 1;
        }
        if response.get("fall").and_then(Value::as_bool) == Some(true) {
            stats.falls += 1;
        }
        if let Some(at) = response.get("at").and_then(Value::as_f64) {
            latest_at = latest_at.max(at);
        }
        writeln!(output, "{response}")?;

        if let Some(every) = sweep_every.filter(|n| *n > 0) {
            if stats.lines % every == 0 && latest_at.is_finite() {
                stats.evicted += monitor.sweep(latest_at);
            }
        }
    }
    output.flush()?;
    if stats.rejected > 0 {
        warn!("{} of {} request(s) rejected", stats.rejected, stats.lines);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn monitor() -> FallMonitor {
        FallMonitor::new(RegistryConfig::default()).unwrap()
    }

    fn fall_lines(device: &str) -> String {
        let mut lines = vec![
            format!(r#"{{"deviceId":"{device}","t":0,"pitchDeg":0,"gyroDegPerS":0}}"#),
            format!(r#"{{"deviceId":"{device}","t":300,"pitchDeg":-10,"gyroDegPerS":500}}"#),
        ];
        for t in [700, 950, 1200, 1450, 1700] {
            lines.push(format!(
                r#"{{"deviceId":"{device}","t":{t},"pitchDeg":-60,"gyroDegPerS":450}}"#
            ));
        }
        for t in (1710..=2500).step_by(10) {
            lines.push(format!(
                r#"{{"deviceId":"{device}","t":{t},"pitchDeg":-70,"gyroDegPerS":0}}"#
            ));
        }
        lines.join("\n")
    }

    #[test]
    fn parse_defaults_to_telemetry() {
        let req = parse_request(r#"{"deviceId":"d","t":5,"pitchDeg":1.5}"#).unwrap();
        match req {
            Request::Telemetry(record) => {
                assert_eq!(record.device_id.as_deref(), Some("d"));
                assert_eq!(record.pitch_deg, Some(1.5));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            parse_request(r#"{"op":"state","deviceId":"d"}"#).unwrap(),
            Request::State { device_id: "d".into() }
        );
        assert_eq!(
            parse_request(r#"{"op":"reset"}"#).unwrap(),
            Request::Reset { device_id: String::new() }
        );
        assert!(parse_request(r#"{"op":"dance"}"#).is_err());
        assert!(parse_request("not json").is_err());
    }

    #[test]
    fn handle_line_reports_client_errors_as_bodies() {
        let monitor = monitor();
        let out = handle_line(&monitor, r#"{"pitchDeg":3}"#, 0.0).unwrap();
        assert_eq!(out, serde_json::json!({"error": true, "message": "deviceId required"}));

        let out = handle_line(&monitor, r#"{"op":"reset"}"#, 0.0).unwrap();
        assert_eq!(out["error"], true);

        let out = handle_line(&monitor, "{", 0.0).unwrap();
        assert_eq!(out["error"], true);
    }

    #[test]
    fn out_of_range_number_drops_only_that_field() {
        let monitor = monitor();
        let out = handle_line(
            &monitor,
            r#"{"deviceId":"d","t":1000,"pitchDeg":1e400,"yawDeg":3}"#,
            0.0,
        )
        .unwrap();
        assert_eq!(out["ok"], true);
        assert_eq!(out["at"], 1000.0);
        assert_eq!(out["debug"]["pitchNow"], Value::Null);
        assert_eq!(out["debug"]["baselinePitch"], Value::Null);
        assert_eq!(monitor.state("d").unwrap().state, fall_core::Phase::Idle);
    }

    #[test]
    fn handle_line_answers_state_and_reset() {
        let monitor = monitor();
        let out = handle_line(&monitor, r#"{"op":"state","deviceId":"x"}"#, 0.0).unwrap();
        assert_eq!(out, serde_json::json!({"deviceId": "x", "state": "idle", "lastFallAt": null}));
        let out = handle_line(&monitor, r#"{"op":"reset","deviceId":"x"}"#, 0.0).unwrap();
        assert_eq!(out, serde_json::json!({"ok": true}));
    }

    #[test]
    fn replay_detects_the_fall_once() {
        let monitor = monitor();
        let input = format!("{}\n\n{{\"op\":\"state\",\"deviceId\":\"w1\"}}\n", fall_lines("w1"));
        let mut output = Vec::new();
        let stats = run(&monitor, Cursor::new(input), &mut output, None).unwrap();

        assert_eq!(stats.falls, 1);
        assert_eq!(stats.rejected, 0);
        let text = String::from_utf8(output).unwrap();
        assert_eq!(text.lines().count(), stats.lines);

        let last: Value = serde_json::from_str(text.lines().last().unwrap()).unwrap();
        assert_eq!(last["state"], "confirm");
        assert_eq!(last["lastFallAt"], 2460.0);
    }

    #[test]
    fn replay_sweeps_against_newest_timestamp() {
        let config = RegistryConfig {
            idle_ttl_ms: Some(1000.0),
            ..RegistryConfig::default()
        };
        let monitor = FallMonitor::new(config).unwrap();
        let input = [
            r#"{"deviceId":"old","t":0}"#,
            r#"{"deviceId":"new","t":5000}"#,
        ]
        .join("\n");
        let stats = run(&monitor, Cursor::new(input), Vec::new(), Some(2)).unwrap();
        assert_eq!(stats.evicted, 1);
        assert_eq!(monitor.registry().device_ids(), vec!["new"]);
    }

    #[test]
    fn load_config_merges_over_defaults() {
        let path = std::env::temp_dir().join(format!("fallwatch-config-{}.json", std::process::id()));
        fs::write(&path, r#"{"idleTtlMs": 60000, "detector": {"staggerRmsThresh": 75}}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(config.idle_ttl_ms, Some(60000.0));
        assert_eq!(config.detector.stagger_rms_thresh, 75.0);
        assert_eq!(config.detector.downward_delta_deg, 50.0);
        assert_eq!(load_config(None).unwrap(), RegistryConfig::default());
        assert!(load_config(Some(Path::new("/nonexistent/fallwatch.json"))).is_err());
    }
}
