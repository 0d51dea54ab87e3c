//! Per-device locks and live mount sessions
//!
//! The [`Registry`] is created once by the caller and handed to every
//! component that needs it. A device can have at most one in-flight
//! operation: a second request is rejected with `DeviceBusy` immediately.

use super::{MountSession, SessionState};
use crate::error::{LtfsError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Which operation holds each device
#[derive(Debug, Default)]
pub struct DeviceLocks {
    held: Mutex<HashMap<String, &'static str>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(
        self: &Arc<Self>,
        device: &str,
        operation: &'static str,
    ) -> Result<DeviceGuard> {
        let mut held = self.held.lock();
        if let Some(current) = held.get(device) {
            debug!("Rejecting {} on {}: {} in progress", operation, device, current);
            return Err(LtfsError::device_busy(format!(
                "{}: {} in progress",
                device, current
            )));
        }
        held.insert(device.to_string(), operation);
        trace!("Lock {} acquired for {}", device, operation);
        Ok(DeviceGuard {
            locks: Arc::clone(self),
            device: device.to_string(),
        })
    }

    fn release(&self, device: &str) {
        self.held.lock().remove(device);
        trace!("Lock {} released", device);
    }
}

/// Released when dropped, on every exit path
#[derive(Debug)]
pub struct DeviceGuard {
    locks: Arc<DeviceLocks>,
    device: String,
}

impl DeviceGuard {
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Fails unless this guard holds the lock for `device`
    pub fn ensure_holds(&self, device: &str) -> Result<()> {
        if self.device() == device {
            Ok(())
        } else {
            Err(LtfsError::parameter_validation(format!(
                "lock held for {}, not {}",
                self.device(),
                device
            )))
        }
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.locks.release(&self.device);
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    locks: Arc<DeviceLocks>,
    sessions: Mutex<HashMap<String, MountSession>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, device: &str, operation: &'static str) -> Result<DeviceGuard> {
        self.locks.try_acquire(device, operation)
    }

    pub fn session(&self, device: &str) -> Option<MountSession> {
        self.sessions.lock().get(device).cloned()
    }

    pub fn session_at(&self, mount_point: &std::path::Path) -> Option<MountSession> {
        self.sessions
            .lock()
            .values()
            .find(|s| s.mount_point == mount_point)
            .cloned()
    }

    pub fn insert(&self, session: MountSession) {
        self.sessions
            .lock()
            .insert(session.device.path.clone(), session);
    }

    pub fn set_state(&self, device: &str, state: SessionState) -> Option<MountSession> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(device)?;
        session.state = state;
        Some(session.clone())
    }

    pub fn remove(&self, device: &str) -> Option<MountSession> {
        self.sessions.lock().remove(device)
    }

    pub fn sessions(&self) -> Vec<MountSession> {
        let mut all: Vec<MountSession> = self.sessions.lock().values().cloned().collect();
        all.sort_by(|a, b| a.device.path.cmp(&b.device.path));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceNode;
    use std::path::PathBuf;

    #[test]
    fn test_second_lock_is_busy_until_drop() {
        let registry = Registry::new();
        let guard = registry.lock("/dev/st0", "mount").unwrap();
        let err = registry.lock("/dev/st0", "diagnostics").unwrap_err();
        assert!(matches!(err, LtfsError::DeviceBusy(ref m) if m.contains("mount in progress")));

        // other devices are independent
        let other = registry.lock("/dev/st1", "mount").unwrap();
        assert_eq!(other.device(), "/dev/st1");

        drop(guard);
        assert!(registry.lock("/dev/st0", "diagnostics").is_ok());
    }

    #[test]
    fn test_guard_released_on_error_path() {
        fn failing(registry: &Registry) -> Result<()> {
            let _guard = registry.lock("/dev/st0", "format")?;
            Err(LtfsError::command_failed("mkltfs failed"))
        }
        let registry = Registry::new();
        assert!(failing(&registry).is_err());
        assert!(registry.lock("/dev/st0", "mount").is_ok());
    }

    #[test]
    fn test_guard_only_covers_its_device() {
        let registry = Registry::new();
        let guard = registry.lock("/dev/st0", "mount").unwrap();
        assert!(guard.ensure_holds("/dev/st0").is_ok());
        let err = guard.ensure_holds("/dev/st1").unwrap_err();
        assert!(matches!(err, LtfsError::ParameterValidation(_)));
    }

    #[test]
    fn test_session_state_changes() {
        let registry = Registry::new();
        let device = DeviceNode::from_path("/dev/st0");
        registry.insert(MountSession::new(device, PathBuf::from("/media/a/ltfs_st0"), true));
        let updated = registry.set_state("/dev/st0", SessionState::Unmounting).unwrap();
        assert_eq!(updated.state.to_string(), "unmount in progress");
        assert!(registry
            .session_at(std::path::Path::new("/media/a/ltfs_st0"))
            .is_some());
        assert!(registry.remove("/dev/st0").is_some());
        assert!(registry.sessions().is_empty());
    }
}
