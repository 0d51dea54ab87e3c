//! Diagnose Command Handler
//!
//! Runs the probe suite with a progress bar. Ctrl-C stops the suite after
//! the probe in flight finishes; the partial report is still printed.

use crossbeam::channel;
use indicatif::{ProgressBar, ProgressStyle};
use ltfs_manager::device::DeviceNode;
use ltfs_manager::diagnostics::{DiagnosticEvent, ProbeKind, Verdict};
use ltfs_manager::{display, CancelFlag, LtfsError, Result, TapeService};
use std::path::PathBuf;
use tracing::{info, warn};

pub async fn execute(
    service: &TapeService,
    device: String,
    probes: Vec<ProbeKind>,
    output: Option<PathBuf>,
) -> Result<()> {
    let probes = if probes.is_empty() {
        ProbeKind::non_destructive()
    } else {
        probes
    };
    if probes.iter().any(ProbeKind::is_destructive) {
        println!("⚠️  Destructive probes selected; data on the tape may be overwritten");
    }

    let cancel = CancelFlag::new();
    let watcher = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing the current probe");
            watcher.cancel();
        }
    });

    let bar = ProgressBar::new(probes.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    let (tx, rx) = channel::unbounded();
    let progress = bar.clone();
    let listener = std::thread::spawn(move || {
        for event in rx {
            match event {
                DiagnosticEvent::ProbeStarted { probe, .. } => {
                    progress.set_message(format!("{} ...", probe));
                }
                DiagnosticEvent::ProbeFinished { result, .. } => {
                    progress.suspend(|| display::display_probe_result(&result));
                    progress.inc(1);
                }
            }
        }
    });

    info!("Running {} probe(s) on {}", probes.len(), device);
    let report = service
        .run_diagnostics(DeviceNode::from_path(&device), probes, cancel, Some(tx))
        .await;
    ctrl_c.abort();
    if listener.join().is_err() {
        warn!("Progress listener stopped unexpectedly");
    }
    bar.finish_and_clear();
    let report = report?;

    println!();
    print!("{}", report.render_text());

    if let Some(path) = output {
        let content = if path.extension().is_some_and(|ext| ext == "json") {
            report.to_json()?
        } else {
            report.render_text()
        };
        std::fs::write(&path, content)?;
        println!("📝 Report written to {}", path.display());
    }

    match report.verdict {
        Verdict::Fail => Err(LtfsError::command_failed(format!(
            "Diagnostics failed on {}",
            device
        ))),
        _ => Ok(()),
    }
}
