//! Drive diagnostics
//!
//! A suite is an ordered list of [`ProbeKind`]s chosen by the caller. Probes
//! never run implicitly: destructive ones (they overwrite or move the
//! medium) only run when named.

pub mod orchestrator;
pub mod probes;

pub use orchestrator::DiagnosticsOrchestrator;

use crate::error::{LtfsError, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeKind {
    Status,
    TapeHealth,
    Position,
    HardwareInfo,
    ReadWriteIntegrity,
    LoadUnload,
    SeekPerformance,
    LogPages,
    ErrorStats,
    Firmware,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 10] = [
        ProbeKind::Status,
        ProbeKind::TapeHealth,
        ProbeKind::Position,
        ProbeKind::HardwareInfo,
        ProbeKind::ReadWriteIntegrity,
        ProbeKind::LoadUnload,
        ProbeKind::SeekPerformance,
        ProbeKind::LogPages,
        ProbeKind::ErrorStats,
        ProbeKind::Firmware,
    ];

    /// Selection used when the caller names no probes
    pub fn non_destructive() -> Vec<ProbeKind> {
        Self::ALL.iter().copied().filter(|p| !p.is_destructive()).collect()
    }

    /// A failure of a required probe fails the whole report
    pub fn is_required(&self) -> bool {
        matches!(
            self,
            ProbeKind::Status
                | ProbeKind::TapeHealth
                | ProbeKind::Position
                | ProbeKind::ReadWriteIntegrity
                | ProbeKind::LoadUnload
                | ProbeKind::SeekPerformance
        )
    }

    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            ProbeKind::ReadWriteIntegrity | ProbeKind::LoadUnload | ProbeKind::SeekPerformance
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProbeKind::Status => "status",
            ProbeKind::TapeHealth => "tape-health",
            ProbeKind::Position => "position",
            ProbeKind::HardwareInfo => "hardware-info",
            ProbeKind::ReadWriteIntegrity => "read-write",
            ProbeKind::LoadUnload => "load-unload",
            ProbeKind::SeekPerformance => "seek",
            ProbeKind::LogPages => "log-pages",
            ProbeKind::ErrorStats => "error-stats",
            ProbeKind::Firmware => "firmware",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProbeKind {
    type Err = LtfsError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        ProbeKind::ALL
            .iter()
            .copied()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = ProbeKind::ALL.iter().map(|p| p.name()).collect();
                LtfsError::parameter_validation(format!(
                    "Unknown probe '{}' (expected one of: {})",
                    s,
                    names.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    pub probe: ProbeKind,
    pub status: ProbeStatus,
    pub duration_ms: u64,
    pub detail: String,
}

impl DiagnosticResult {
    pub fn skipped(probe: ProbeKind, reason: &str) -> Self {
        Self {
            probe,
            status: ProbeStatus::Skipped,
            duration_ms: 0,
            detail: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
    Incomplete,
}

impl Verdict {
    pub fn from_results(results: &[DiagnosticResult], cancelled: bool) -> Self {
        if cancelled {
            Verdict::Incomplete
        } else if results
            .iter()
            .any(|r| r.status == ProbeStatus::Fail && r.probe.is_required())
        {
            Verdict::Fail
        } else {
            Verdict::Pass
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub id: uuid::Uuid,
    pub device: String,
    pub started_at: DateTime<Local>,
    pub results: Vec<DiagnosticResult>,
    pub verdict: Verdict,
}

impl DiagnosticReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LtfsError::parse(format!("Cannot serialize report: {}", e)))
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Diagnostic report for {}", self.device);
        let _ = writeln!(out, "Started: {}", self.started_at.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "Verdict: {:?}", self.verdict);
        for result in &self.results {
            let _ = writeln!(
                out,
                "\n[{:?}] {} ({} ms){}",
                result.status,
                result.probe,
                result.duration_ms,
                if result.probe.is_required() { "" } else { " optional" }
            );
            for line in result.detail.lines() {
                let _ = writeln!(out, "    {}", line);
            }
        }
        out
    }
}

/// Progress updates sent while a suite runs
#[derive(Debug, Clone)]
pub enum DiagnosticEvent {
    ProbeStarted {
        index: usize,
        total: usize,
        probe: ProbeKind,
    },
    ProbeFinished {
        index: usize,
        total: usize,
        result: DiagnosticResult,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(probe: ProbeKind, status: ProbeStatus) -> DiagnosticResult {
        DiagnosticResult {
            probe,
            status,
            duration_ms: 1,
            detail: String::new(),
        }
    }

    #[test]
    fn test_default_selection_is_non_destructive() {
        let defaults = ProbeKind::non_destructive();
        assert_eq!(defaults.len(), 7);
        assert!(defaults.iter().all(|p| !p.is_destructive()));
        assert_eq!(defaults[0], ProbeKind::Status);
    }

    #[test]
    fn test_verdict() {
        let optional_fail = vec![
            result(ProbeKind::Status, ProbeStatus::Pass),
            result(ProbeKind::LogPages, ProbeStatus::Fail),
        ];
        assert_eq!(Verdict::from_results(&optional_fail, false), Verdict::Pass);

        let required_fail = vec![result(ProbeKind::Position, ProbeStatus::Fail)];
        assert_eq!(Verdict::from_results(&required_fail, false), Verdict::Fail);
        assert_eq!(Verdict::from_results(&required_fail, true), Verdict::Incomplete);
    }

    #[test]
    fn test_parse_probe_names() {
        assert_eq!("read-write".parse::<ProbeKind>().unwrap(), ProbeKind::ReadWriteIntegrity);
        assert_eq!("TAPE_HEALTH".parse::<ProbeKind>().unwrap(), ProbeKind::TapeHealth);
        assert!(matches!(
            "defrag".parse::<ProbeKind>(),
            Err(LtfsError::ParameterValidation(_))
        ));
    }

    #[test]
    fn test_report_renders_and_serializes() {
        let report = DiagnosticReport {
            id: uuid::Uuid::new_v4(),
            device: "/dev/st0".into(),
            started_at: Local::now(),
            results: vec![DiagnosticResult {
                probe: ProbeKind::Status,
                status: ProbeStatus::Pass,
                duration_ms: 12,
                detail: "BOT ONLINE".into(),
            }],
            verdict: Verdict::Pass,
        };
        let text = report.render_text();
        assert!(text.contains("[Pass] status (12 ms)"));
        assert!(text.contains("    BOT ONLINE"));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["verdict"], "Pass");
        assert_eq!(json["results"][0]["probe"], "Status");
    }
}
