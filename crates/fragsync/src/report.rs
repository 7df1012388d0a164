//! Per-job sync summaries.
//!
//! After every job the scheduler hands its [`JobReport`] to a
//! [`SyncReporter`]: one event with before/after counters and duration.
//! The JSON reporter writes to **stderr** so stdout stays parseable for
//! scripts.

use std::io::Write;

use tracing::info;

use crate::job::{JobExit, JobReport};

pub trait SyncReporter: Send + Sync {
    fn report(&self, report: &JobReport);
}

/// Summary as a structured `tracing` event.
pub struct LogReporter;

impl SyncReporter for LogReporter {
    fn report(&self, report: &JobReport) {
        let (chunks, documents, errors) = deltas(report);
        if chunks == 0 && documents == 0 && errors == 0 && report.exit.is_drained() {
            info!(
                connector_id = %report.connector_id,
                connector_type = %report.connector_type,
                "no new items found"
            );
            return;
        }
        info!(
            connector_id = %report.connector_id,
            connector_type = %report.connector_type,
            exit = exit_label(&report.exit),
            new_chunks = chunks,
            new_documents = documents,
            new_errors = errors,
            duration = %format_duration_ms(report.duration_ms),
            "connector sync complete"
        );
    }
}

/// Machine-readable summary: one JSON object per line on stderr.
pub struct JsonReporter;

impl SyncReporter for JsonReporter {
    fn report(&self, report: &JobReport) {
        let obj = serde_json::json!({
            "event": "sync",
            "report": report,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter when summaries are disabled.
pub struct NoReporter;

impl SyncReporter for NoReporter {
    fn report(&self, _report: &JobReport) {}
}

/// Counter changes over the job, preferring the persisted before/after
/// values and falling back to what the aggregator saw.
pub fn deltas(report: &JobReport) -> (i64, i64, i64) {
    match report.after {
        Some(after) => (
            after.num_chunks - report.before.num_chunks,
            after.num_documents - report.before.num_documents,
            after.num_errors - report.before.num_errors,
        ),
        None => (
            report.totals.chunks,
            report.totals.documents,
            report.totals.errors,
        ),
    }
}

fn exit_label(exit: &JobExit) -> &'static str {
    match exit {
        JobExit::Drained => "drained",
        JobExit::Fatal { .. } => "fatal",
        JobExit::Cancelled => "cancelled",
    }
}

fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else {
        format!("{}.{}s", ms / 1000, (ms % 1000) / 100)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReportMode {
    Off,
    Log,
    Json,
}

impl ReportMode {
    /// Log summaries when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ReportMode::Log
        } else {
            ReportMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncReporter> {
        match self {
            ReportMode::Off => Box::new(NoReporter),
            ReportMode::Log => Box::new(LogReporter),
            ReportMode::Json => Box::new(JsonReporter),
        }
    }
}

impl std::str::FromStr for ReportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ReportMode::Off),
            "log" => Ok(ReportMode::Log),
            "json" => Ok(ReportMode::Json),
            other => Err(format!("invalid report mode '{other}': expected off, log or json")),
        }
    }
}
