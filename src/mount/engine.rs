//! Mount strategy engine
//!
//! A mount request walks `Idle -> Preparing -> Attempting(i) -> Succeeded`
//! (or `Exhausted`, `Aborted`, `Cancelled`). [`transition`] is the whole
//! state table; [`MountEngine`] feeds it events produced by running
//! commands.

use super::allocator::{self, MountPointAllocator};
use super::policy::{CompatibilityPolicy, OptionSet};
use super::session::{DeviceGuard, Registry};
use super::table::{normalize_mount_point, MountTable};
use super::{AttemptOutcome, MountAttempt, MountSession, SessionState};
use crate::cancel::CancelFlag;
use crate::config::{PollSchedule, Timeouts};
use crate::device::DeviceNode;
use crate::error::{LtfsError, Result};
use crate::runner::{CommandRunner, CommandSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Preparing,
    /// 0-based index into the policy combinations
    Attempting(usize),
    Succeeded(usize),
    Exhausted,
    Aborted(usize),
    /// Number of attempts completed before cancellation
    Cancelled(usize),
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineState::Succeeded(_)
                | EngineState::Exhausted
                | EngineState::Aborted(_)
                | EngineState::Cancelled(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start,
    /// Rewind finished, successfully or not
    Prepared,
    AttemptFinished(AttemptOutcome),
    /// The mount table shows the mount point active; credits attempt `n`
    MountDetected(usize),
    Cancel,
}

/// Mount state table. Events that do not apply leave the state unchanged.
pub fn transition(state: EngineState, event: Event, total: usize) -> EngineState {
    use EngineState::*;
    match (state, event) {
        (Idle, Event::Start) => Preparing,
        (Preparing, Event::Prepared) if total == 0 => Exhausted,
        (Preparing, Event::Prepared) => Attempting(0),
        (Preparing, Event::Cancel) => Cancelled(0),
        (Attempting(i), Event::AttemptFinished(AttemptOutcome::Success)) => Succeeded(i),
        (Attempting(i), Event::AttemptFinished(AttemptOutcome::FatalFailure)) => Aborted(i),
        (Attempting(i), Event::AttemptFinished(_)) if i + 1 < total => Attempting(i + 1),
        (Attempting(_), Event::AttemptFinished(_)) => Exhausted,
        (Attempting(_), Event::MountDetected(n)) => Succeeded(n),
        (Attempting(i), Event::Cancel) => Cancelled(i),
        (Exhausted, Event::MountDetected(n)) => Succeeded(n),
        (state, _) => state,
    }
}

/// Diagnostics that no other option combination can fix
const FATAL_PATTERNS: &[&str] = &[
    "permission denied",
    "operation not permitted",
    "device or resource busy",
    "device is busy",
    "already in use",
    "no such device",
    "no such file or directory",
    "device not found",
    "mountpoint is not empty",
];

/// Tape state and timing problems a different option set may get past
const TRANSIENT_PATTERNS: &[&str] = &[
    "not ready",
    "becoming ready",
    "unit attention",
    "medium",
    "end of data",
    "eod",
    "index",
    "sync",
    "in progress",
    "timed out",
];

/// Classify a failed mount by its diagnostic text.
///
/// Unrecognised text is transient.
pub fn classify_failure(diagnostic: &str) -> AttemptOutcome {
    let lower = diagnostic.to_lowercase();
    if FATAL_PATTERNS.iter().any(|p| lower.contains(p)) {
        return AttemptOutcome::FatalFailure;
    }
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        debug!("Recognised transient mount failure: {}", diagnostic);
    } else {
        debug!("Unrecognised mount failure treated as transient: {}", diagnostic);
    }
    AttemptOutcome::TransientFailure
}

#[derive(Debug, Clone, Default)]
pub struct MountRequest {
    /// Explicit mount point; allocated when absent
    pub mount_point: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MountOutcome {
    pub session: MountSession,
    pub attempts: Vec<MountAttempt>,
    /// An existing session was returned without running anything
    pub reused: bool,
}

pub struct MountEngine {
    runner: Arc<dyn CommandRunner>,
    table: Arc<dyn MountTable>,
    registry: Arc<Registry>,
    allocator: MountPointAllocator,
    timeouts: Timeouts,
    poll: PollSchedule,
}

impl MountEngine {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        table: Arc<dyn MountTable>,
        registry: Arc<Registry>,
        allocator: MountPointAllocator,
        timeouts: Timeouts,
        poll: PollSchedule,
    ) -> Self {
        Self {
            runner,
            table,
            registry,
            allocator,
            timeouts,
            poll,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Mount `device`, walking the policy's option combinations in order
    pub fn mount(
        &self,
        device: &DeviceNode,
        policy: &CompatibilityPolicy,
        request: &MountRequest,
        cancel: &CancelFlag,
    ) -> Result<MountOutcome> {
        let guard = self.registry.lock(&device.path, "mount")?;
        self.mount_locked(&guard, device, policy, request, cancel)
    }

    /// [`MountEngine::mount`] for a caller that already holds the device lock
    pub fn mount_locked(
        &self,
        guard: &DeviceGuard,
        device: &DeviceNode,
        policy: &CompatibilityPolicy,
        request: &MountRequest,
        cancel: &CancelFlag,
    ) -> Result<MountOutcome> {
        guard.ensure_holds(&device.path)?;

        if let Some(existing) = self.registry.session(&device.path) {
            match existing.state {
                SessionState::Mounted => {
                    let same_point = request
                        .mount_point
                        .as_ref()
                        .map_or(true, |mp| normalize_mount_point(mp) == existing.mount_point);
                    if same_point {
                        info!(
                            "{} already mounted at {}",
                            device.path,
                            existing.mount_point.display()
                        );
                        return Ok(MountOutcome {
                            session: existing,
                            attempts: Vec::new(),
                            reused: true,
                        });
                    }
                    return Err(LtfsError::device_busy(format!(
                        "{}: already mounted at {}",
                        device.path,
                        existing.mount_point.display()
                    )));
                }
                SessionState::Unmounting => {
                    return Err(LtfsError::device_busy(format!(
                        "{}: {}",
                        device.path,
                        SessionState::Unmounting
                    )));
                }
                SessionState::Unmounted => {
                    self.registry.remove(&device.path);
                }
            }
        }

        let (mount_point, allocated) = match &request.mount_point {
            Some(requested) => (self.prepare_requested(requested)?, false),
            None => (self.allocator.allocate(device)?, true),
        };

        match self.run_sequence(device, policy, &mount_point, cancel) {
            Ok(attempts) => {
                let session = MountSession::new(device.clone(), mount_point, allocated);
                self.registry.insert(session.clone());
                info!(
                    "Mounted {} at {} after {} attempt(s)",
                    device.path,
                    session.mount_point.display(),
                    attempts.len()
                );
                Ok(MountOutcome {
                    session,
                    attempts,
                    reused: false,
                })
            }
            Err(e) => {
                if allocated {
                    allocator::release(&mount_point);
                }
                Err(e)
            }
        }
    }

    /// Create the requested directory and resolve it to the path the mount
    /// table will report
    fn prepare_requested(&self, requested: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(requested)
            .map_err(|e| LtfsError::mount_point_unavailable(requested, e.to_string()))?;
        let mount_point = requested
            .canonicalize()
            .map_err(|e| LtfsError::mount_point_unavailable(requested, e.to_string()))?;
        if self.table.is_active(&mount_point)? {
            return Err(LtfsError::mount_point_unavailable(
                mount_point,
                "something is already mounted there",
            ));
        }
        Ok(mount_point)
    }

    fn run_sequence(
        &self,
        device: &DeviceNode,
        policy: &CompatibilityPolicy,
        mount_point: &Path,
        cancel: &CancelFlag,
    ) -> Result<Vec<MountAttempt>> {
        let total = policy.combinations.len();
        let mut state = transition(EngineState::Idle, Event::Start, total);

        if cancel.is_cancelled() {
            state = transition(state, Event::Cancel, total);
        } else {
            self.rewind(device);
            state = transition(state, Event::Prepared, total);
        }

        let mut attempts: Vec<MountAttempt> = Vec::with_capacity(total);
        let mut last_timeout: Option<usize> = None;

        while !state.is_terminal() {
            let EngineState::Attempting(i) = state else {
                break;
            };
            if cancel.is_cancelled() {
                state = transition(state, Event::Cancel, total);
                break;
            }

            let attempt = self.attempt(device, policy, i, mount_point);
            let outcome = attempt.outcome;
            match outcome {
                AttemptOutcome::Success => {}
                AttemptOutcome::TransientFailure => {
                    warn!("{}", LtfsError::TransientMountFailure(attempt.clone()));
                }
                AttemptOutcome::FatalFailure => {
                    error!(
                        "Attempt {} ({}) failed fatally: {}",
                        attempt.sequence_index, attempt.option_set, attempt.raw_diagnostic
                    );
                }
                AttemptOutcome::Timeout => {
                    warn!(
                        "Attempt {} ({}) timed out after {:?}, continuing",
                        attempt.sequence_index, attempt.option_set, policy.mount_timeout
                    );
                    last_timeout = Some(i);
                }
            }
            attempts.push(attempt);

            let event = if outcome == AttemptOutcome::Timeout && self.mount_active(mount_point) {
                info!("Timed-out attempt {} did mount {}", i + 1, mount_point.display());
                Event::MountDetected(i)
            } else {
                Event::AttemptFinished(outcome)
            };
            state = transition(state, event, total);
        }

        // A detached attempt may have finished mounting since it was abandoned
        if let (EngineState::Exhausted, Some(n)) = (state, last_timeout) {
            if self.mount_active(mount_point) {
                info!(
                    "{} became active after attempt {} timed out, adopting it",
                    mount_point.display(),
                    n + 1
                );
                state = transition(state, Event::MountDetected(n), total);
            }
        }

        match state {
            EngineState::Succeeded(_) => Ok(attempts),
            EngineState::Aborted(_) => Err(LtfsError::FatalMountFailure { attempts }),
            EngineState::Cancelled(completed) => {
                info!("Mount of {} cancelled after {} attempt(s)", device.path, completed);
                Err(LtfsError::Cancelled { completed })
            }
            _ => {
                error!("All {} option combinations failed for {}", total, device.path);
                Err(LtfsError::MountExhausted { attempts })
            }
        }
    }

    fn rewind(&self, device: &DeviceNode) {
        let command = CommandSpec::mt(&device.path, "rewind");
        match self.runner.run(&command, self.timeouts.rewind()) {
            Ok(output) if output.is_success() => debug!("Rewound {}", device.path),
            Ok(output) => warn!(
                "Rewind of {} failed, continuing: {}",
                device.path,
                output.diagnostic()
            ),
            Err(e) => warn!("Rewind of {} could not run, continuing: {}", device.path, e),
        }
    }

    fn attempt(
        &self,
        device: &DeviceNode,
        policy: &CompatibilityPolicy,
        index: usize,
        mount_point: &Path,
    ) -> MountAttempt {
        let set: &OptionSet = &policy.combinations[index];
        let options = policy.render(set, &device.path);
        let command = CommandSpec::new("ltfs")
            .arg("-o")
            .arg(options.as_str())
            .arg(mount_point.to_string_lossy());
        info!("Mount attempt {}/{}: {}", index + 1, policy.combinations.len(), command);

        let (outcome, raw_diagnostic) = match self.runner.run(&command, policy.mount_timeout) {
            Ok(output) if output.is_success() => (AttemptOutcome::Success, output.diagnostic()),
            Ok(output) if output.is_timeout() => (
                AttemptOutcome::Timeout,
                LtfsError::TimeoutExceeded {
                    command: command.to_string(),
                    timeout: policy.mount_timeout,
                }
                .to_string(),
            ),
            Ok(output) => {
                let diagnostic = output.diagnostic();
                (classify_failure(&diagnostic), diagnostic)
            }
            // The mount tool itself is unusable; no option set changes that
            Err(e) => (AttemptOutcome::FatalFailure, e.to_string()),
        };

        MountAttempt {
            sequence_index: index + 1,
            option_set: options,
            outcome,
            raw_diagnostic,
        }
    }

    fn mount_active(&self, mount_point: &Path) -> bool {
        self.table.is_active(mount_point).unwrap_or_else(|e| {
            warn!("Cannot read mount table: {}", e);
            false
        })
    }

    /// Issue the unmount and poll until the mount point is gone.
    ///
    /// A session already `Unmounting` is only re-polled.
    pub fn unmount(&self, device: &DeviceNode) -> Result<MountSession> {
        let _guard = self.registry.lock(&device.path, "unmount")?;
        let session = self.registry.session(&device.path).ok_or_else(|| {
            LtfsError::device_not_found(format!("{}: no mounted session", device.path))
        })?;

        if session.state == SessionState::Mounted {
            self.registry.set_state(&device.path, SessionState::Unmounting);
            if let Err(e) = self.issue_unmount(&session.mount_point) {
                self.registry.set_state(&device.path, SessionState::Mounted);
                return Err(e);
            }
        } else {
            info!(
                "Unmount of {} already issued, re-checking",
                session.mount_point.display()
            );
        }

        self.await_unmount(session)
    }

    /// Re-poll a session left `Unmounting` by an earlier timeout
    pub fn confirm_unmount(&self, device: &DeviceNode) -> Result<MountSession> {
        let _guard = self.registry.lock(&device.path, "unmount")?;
        let session = self.registry.session(&device.path).ok_or_else(|| {
            LtfsError::device_not_found(format!("{}: no mounted session", device.path))
        })?;
        if session.state != SessionState::Unmounting {
            return Err(LtfsError::parameter_validation(format!(
                "{} is {}, not being unmounted",
                device.path, session.state
            )));
        }
        self.await_unmount(session)
    }

    /// Register an LTFS mount made outside this registry
    pub fn adopt(&self, device: &DeviceNode, mount_point: &Path) -> Result<MountSession> {
        let _guard = self.registry.lock(&device.path, "adopt")?;
        if let Some(existing) = self.registry.session(&device.path) {
            return Ok(existing);
        }
        if !self.table.is_active(mount_point)? {
            return Err(LtfsError::mount_point_unavailable(mount_point, "not an active mount"));
        }
        let session = MountSession::new(device.clone(), mount_point.to_path_buf(), false);
        self.registry.insert(session.clone());
        debug!("Adopted mount {} for {}", mount_point.display(), device.path);
        Ok(session)
    }

    fn issue_unmount(&self, mount_point: &Path) -> Result<()> {
        let target = mount_point.to_string_lossy();
        let fusermount = CommandSpec::new("fusermount").arg("-u").arg(target.as_ref());
        let output = match self.runner.run(&fusermount, self.timeouts.unmount()) {
            Ok(output) => output,
            Err(e) => {
                warn!("{}, falling back to umount", e);
                self.runner
                    .run(&CommandSpec::new("umount").arg(target.as_ref()), self.timeouts.unmount())?
            }
        };
        if !output.is_success() {
            // Completion is judged by the mount table, not the exit status
            warn!("Unmount of {} reported: {}", mount_point.display(), output.diagnostic());
        }
        Ok(())
    }

    fn await_unmount(&self, mut session: MountSession) -> Result<MountSession> {
        let device = session.device.path.clone();
        for n in 0..self.poll.attempts {
            if n > 0 {
                std::thread::sleep(self.poll.delay(n - 1));
            }
            if !self.table.is_active(&session.mount_point)? {
                self.registry.remove(&device);
                session.state = SessionState::Unmounted;
                if session.allocated {
                    allocator::release(&session.mount_point);
                }
                info!("Unmounted {} ({})", session.mount_point.display(), device);
                return Ok(session);
            }
            debug!("{} still mounted (poll {})", session.mount_point.display(), n + 1);
        }

        warn!(
            "{} still mounted after {} polls; session left unmounting",
            session.mount_point.display(),
            self.poll.attempts
        );
        Err(LtfsError::UnmountTimeout {
            mount_point: session.mount_point,
            polls: self.poll.attempts,
        })
    }
}
