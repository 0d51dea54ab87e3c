//! Scripted stand-ins for external commands and the mount table

use crate::error::{LtfsError, Result};
use crate::mount::table::{MountEntry, MountTable};
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone)]
enum Response {
    Output(CommandOutput),
    SpawnError,
}

struct Gate {
    key: String,
    entered: Sender<()>,
    release: Receiver<()>,
}

/// Command runner that answers from per-command scripts.
///
/// A script key matches a command when the rendered command line equals the
/// key or starts with the key followed by a space; the longest matching key
/// wins. Responses are consumed in order and the last one repeats.
#[derive(Default)]
pub(crate) struct FakeRunner {
    scripts: Mutex<Vec<(String, VecDeque<Response>)>>,
    calls: Mutex<Vec<String>>,
    gate: Mutex<Option<Gate>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, key: &str, output: CommandOutput) {
        self.push(key, Response::Output(output));
    }

    pub fn fail_spawn(&self, key: &str) {
        self.push(key, Response::SpawnError);
    }

    fn push(&self, key: &str, response: Response) {
        let mut scripts = self.scripts.lock();
        match scripts.iter_mut().find(|(k, _)| k == key) {
            Some((_, queue)) => queue.push_back(response),
            None => scripts.push((key.to_string(), VecDeque::from([response]))),
        }
    }

    /// Block commands matching `key` until the returned sender fires.
    /// The receiver signals each time such a command starts.
    pub fn gate(&self, key: &str) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = channel::unbounded();
        let (release_tx, release_rx) = channel::unbounded();
        *self.gate.lock() = Some(Gate {
            key: key.to_string(),
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, key: &str) -> usize {
        self.calls.lock().iter().filter(|c| matches(c, key)).count()
    }
}

fn matches(line: &str, key: &str) -> bool {
    line == key || line.starts_with(&format!("{} ", key))
}

impl CommandRunner for FakeRunner {
    fn run(&self, command: &CommandSpec, _timeout: Duration) -> Result<CommandOutput> {
        let line = command.to_string();
        self.calls.lock().push(line.clone());

        let gate = self
            .gate
            .lock()
            .as_ref()
            .filter(|g| matches(&line, &g.key))
            .map(|g| (g.entered.clone(), g.release.clone()));
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv_timeout(Duration::from_secs(10));
        }

        let response = {
            let mut scripts = self.scripts.lock();
            scripts
                .iter_mut()
                .filter(|(key, _)| matches(&line, key))
                .max_by_key(|(key, _)| key.len())
                .and_then(|(_, queue)| {
                    if queue.len() > 1 {
                        queue.pop_front()
                    } else {
                        queue.front().cloned()
                    }
                })
        };

        match response {
            Some(Response::Output(output)) => Ok(output),
            Some(Response::SpawnError) => Err(LtfsError::command_failed(format!(
                "cannot start {}: No such file or directory",
                command.program
            ))),
            None => Ok(CommandOutput::failure(1, format!("unscripted command: {}", line))),
        }
    }
}

/// In-memory mount table.
///
/// A mount point can be made to stay active for a number of queries before
/// it disappears, to exercise the unmount confirmation poll.
#[derive(Default)]
pub(crate) struct FakeMountTable {
    active: Mutex<HashMap<PathBuf, Option<u32>>>,
    pending: Mutex<HashMap<PathBuf, u32>>,
    queries: Mutex<u32>,
}

impl FakeMountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&self, path: &Path) {
        self.active.lock().insert(path.to_path_buf(), None);
    }

    /// Stays active for `queries` more `is_active` calls
    pub fn deactivate_after(&self, path: &Path, queries: u32) {
        self.active.lock().insert(path.to_path_buf(), Some(queries));
    }

    /// Inactive for `queries` more `is_active` calls, active afterwards
    pub fn activate_after(&self, path: &Path, queries: u32) {
        self.pending.lock().insert(path.to_path_buf(), queries);
    }

    pub fn clear(&self, path: &Path) {
        self.active.lock().remove(path);
        self.pending.lock().remove(path);
    }

    pub fn queries(&self) -> u32 {
        *self.queries.lock()
    }
}

impl MountTable for FakeMountTable {
    fn is_active(&self, mount_point: &Path) -> Result<bool> {
        *self.queries.lock() += 1;
        {
            let mut pending = self.pending.lock();
            if let Some(remaining) = pending.get_mut(mount_point) {
                if *remaining == 0 {
                    pending.remove(mount_point);
                    self.active.lock().insert(mount_point.to_path_buf(), None);
                } else {
                    *remaining -= 1;
                    return Ok(false);
                }
            }
        }
        let mut active = self.active.lock();
        match active.get_mut(mount_point) {
            None => Ok(false),
            Some(None) => Ok(true),
            Some(Some(0)) => {
                active.remove(mount_point);
                Ok(false)
            }
            Some(Some(remaining)) => {
                *remaining -= 1;
                Ok(true)
            }
        }
    }

    fn ltfs_mounts(&self) -> Result<Vec<MountEntry>> {
        Ok(self
            .active
            .lock()
            .keys()
            .map(|path| MountEntry {
                source: "ltfs".to_string(),
                mount_point: path.clone(),
                fs_type: "fuse".to_string(),
            })
            .collect())
    }
}
