//! Runs a probe suite against one drive
//!
//! Probes run strictly in the order given. Cancellation is honoured between
//! probes only; a running probe is never interrupted. A probe that fails or
//! times out does not stop the suite.

use super::probes::{self, ProbeStep, INTEGRITY_PAYLOAD_BYTES};
use super::{DiagnosticEvent, DiagnosticReport, DiagnosticResult, ProbeKind, ProbeStatus, Verdict};
use crate::cancel::CancelFlag;
use crate::config::Timeouts;
use crate::device::DeviceNode;
use crate::error::{LtfsError, Result};
use crate::mount::{DeviceGuard, Registry};
use crate::runner::{CommandRunner, CommandSpec};
use chrono::Local;
use crossbeam::channel::Sender;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct DiagnosticsOrchestrator {
    runner: Arc<dyn CommandRunner>,
    registry: Arc<Registry>,
    timeouts: Timeouts,
    scratch_dir: PathBuf,
}

/// Outcome of one probe before it is stamped with a duration
struct ProbeRun {
    passed: bool,
    detail: String,
}

/// Per-probe deadline shared by all of its steps
struct Budget {
    deadline: Instant,
    total: Duration,
}

impl Budget {
    fn new(total: Duration) -> Self {
        Self {
            deadline: Instant::now() + total,
            total,
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
    }
}

impl DiagnosticsOrchestrator {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        registry: Arc<Registry>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            runner,
            registry,
            timeouts,
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Directory for the integrity probe's payload files
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn run_suite(
        &self,
        device: &DeviceNode,
        block_size: u32,
        selected: &[ProbeKind],
        cancel: &CancelFlag,
        events: Option<&Sender<DiagnosticEvent>>,
    ) -> Result<DiagnosticReport> {
        let guard = self.registry.lock(&device.path, "diagnostics")?;
        self.run_suite_locked(&guard, device, block_size, selected, cancel, events)
    }

    /// [`DiagnosticsOrchestrator::run_suite`] under a lock the caller holds
    pub fn run_suite_locked(
        &self,
        guard: &DeviceGuard,
        device: &DeviceNode,
        block_size: u32,
        selected: &[ProbeKind],
        cancel: &CancelFlag,
        events: Option<&Sender<DiagnosticEvent>>,
    ) -> Result<DiagnosticReport> {
        guard.ensure_holds(&device.path)?;
        if let Some(session) = self.registry.session(&device.path) {
            if selected.iter().any(ProbeKind::is_destructive) {
                return Err(LtfsError::device_busy(format!(
                    "{} is {} at {}; destructive probes need an unmounted drive",
                    device.path,
                    session.state,
                    session.mount_point.display()
                )));
            }
        }

        let started_at = Local::now();
        let total = selected.len();
        let mut results = Vec::with_capacity(total);
        let mut cancelled = false;
        info!("Running {} probe(s) on {}", total, device.path);

        for (index, probe) in selected.iter().copied().enumerate() {
            if !cancelled && cancel.is_cancelled() {
                info!("Diagnostics on {} cancelled after {} probe(s)", device.path, index);
                cancelled = true;
            }
            if cancelled {
                results.push(DiagnosticResult::skipped(probe, "cancelled"));
                continue;
            }

            notify(events, DiagnosticEvent::ProbeStarted { index, total, probe });
            let result = self.run_probe(device, block_size, probe);
            debug!("Probe {} finished: {:?}", probe, result.status);
            notify(
                events,
                DiagnosticEvent::ProbeFinished {
                    index,
                    total,
                    result: result.clone(),
                },
            );
            results.push(result);
        }

        let verdict = Verdict::from_results(&results, cancelled);
        info!("Diagnostics on {}: {:?}", device.path, verdict);
        Ok(DiagnosticReport {
            id: uuid::Uuid::new_v4(),
            device: device.path.clone(),
            started_at,
            results,
            verdict,
        })
    }

    fn run_probe(
        &self,
        device: &DeviceNode,
        block_size: u32,
        probe: ProbeKind,
    ) -> DiagnosticResult {
        let budget = Budget::new(self.timeouts.probe(probe.is_destructive()));
        let start = Instant::now();
        let run = match probe {
            ProbeKind::ReadWriteIntegrity => self.integrity(device, block_size, &budget),
            _ => self.run_steps(&probes::steps(probe, &device.path), &budget),
        };
        let status = if run.passed { ProbeStatus::Pass } else { ProbeStatus::Fail };
        if !run.passed {
            warn!("Probe {} failed on {}", probe, device.path);
        }
        DiagnosticResult {
            probe,
            status,
            duration_ms: start.elapsed().as_millis() as u64,
            detail: run.detail,
        }
    }

    fn run_steps(&self, steps: &[ProbeStep], budget: &Budget) -> ProbeRun {
        let mut detail = String::new();
        let mut passed = true;
        for step in steps {
            match self.step(&step.command, budget) {
                Ok(out) => {
                    let _ = writeln!(detail, "{}: {}", step.label, out.trim());
                }
                Err(e) => {
                    let _ = writeln!(detail, "{}: {}", step.label, e);
                    if matches!(e, LtfsError::TimeoutExceeded { .. }) {
                        return ProbeRun { passed: false, detail };
                    }
                    if step.required {
                        passed = false;
                    }
                }
            }
        }
        ProbeRun { passed, detail }
    }

    /// Run one command inside the probe budget; stdout on success
    fn step(&self, command: &CommandSpec, budget: &Budget) -> Result<String> {
        let timeout = budget.remaining().ok_or_else(|| LtfsError::TimeoutExceeded {
            command: command.to_string(),
            timeout: budget.total,
        })?;
        let output = self.runner.run(command, timeout)?;
        if output.is_timeout() {
            return Err(LtfsError::TimeoutExceeded {
                command: command.to_string(),
                timeout: budget.total,
            });
        }
        if !output.is_success() {
            return Err(LtfsError::command_failed(output.diagnostic()));
        }
        Ok(output.stdout)
    }

    /// Write a generated payload, rewind, read it back and compare digests
    fn integrity(&self, device: &DeviceNode, block_size: u32, budget: &Budget) -> ProbeRun {
        let tag = uuid::Uuid::new_v4();
        let payload = self.scratch_dir.join(format!("ltfs-rw-{}.bin", tag));
        let readback = self.scratch_dir.join(format!("ltfs-rw-{}.read", tag));

        let run = self.integrity_steps(device, block_size, budget, &payload, &readback);
        for path in [&payload, &readback] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot remove {}: {}", path.display(), e);
                }
            }
        }
        match run {
            Ok(detail) => ProbeRun { passed: true, detail },
            Err(e) => ProbeRun {
                passed: false,
                detail: e.to_string(),
            },
        }
    }

    fn integrity_steps(
        &self,
        device: &DeviceNode,
        block_size: u32,
        budget: &Budget,
        payload: &std::path::Path,
        readback: &std::path::Path,
    ) -> Result<String> {
        let expected = probes::generate_payload(payload, device.path.as_bytes())?;
        self.step(&probes::write_payload(payload, &device.path, block_size), budget)?;
        self.step(&CommandSpec::mt(&device.path, "rewind"), budget)?;
        self.step(&probes::read_payload(&device.path, readback, block_size), budget)?;
        let actual = probes::file_digest(readback, INTEGRITY_PAYLOAD_BYTES)?;
        if actual != expected {
            return Err(LtfsError::command_failed(format!(
                "data verification failed: wrote {}, read back {}",
                expected, actual
            )));
        }
        Ok(format!(
            "{} MiB written and verified at block size {} (sha256 {})",
            INTEGRITY_PAYLOAD_BYTES / (1024 * 1024),
            block_size,
            expected
        ))
    }
}

fn notify(events: Option<&Sender<DiagnosticEvent>>, event: DiagnosticEvent) {
    if let Some(tx) = events {
        // A caller that stopped listening does not stop the suite
        let _ = tx.send(event);
    }
}
