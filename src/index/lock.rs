//! Cross-process advisory lock on a bank's index
//!
//! Writers take an exclusive lock, readers a shared one, on a sidecar lock
//! file next to the index store. Locks are `flock(2)` locks, so they are
//! released by the kernel when a process dies.
//!
//! Within one [`LockManager`] a thread may re-acquire a lock it already
//! holds: exclusive covers any nested request, shared covers nested shared
//! requests. Asking for exclusive while holding shared is refused with
//! [`BankError::LockUpgrade`] instead of deadlocking on ourselves.

use crate::storage::error::{BankError, BankResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const POLL_START: Duration = Duration::from_millis(1);
const POLL_MAX: Duration = Duration::from_millis(50);

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct Holder {
    mode: LockMode,
    depth: usize,
    file: File,
}

/// Re-entrant, cross-process lock scoped to one index
pub struct LockManager {
    path: PathBuf,
    holders: Mutex<HashMap<ThreadId, Holder>>,
}

impl LockManager {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            holders: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode currently held by the calling thread, if any
    pub fn held_mode(&self) -> Option<LockMode> {
        self.holders
            .lock()
            .get(&thread::current().id())
            .map(|h| h.mode)
    }

    /// Acquire the lock, polling with backoff until `timeout` elapses
    pub fn acquire(&self, mode: LockMode, timeout: Duration) -> BankResult<LockGuard<'_>> {
        let thread = thread::current().id();

        {
            let mut holders = self.holders.lock();
            if let Some(holder) = holders.get_mut(&thread) {
                if holder.mode == LockMode::Exclusive || mode == LockMode::Shared {
                    holder.depth += 1;
                    trace!(depth = holder.depth, "Re-entered index lock");
                    return Ok(LockGuard::new(self, thread));
                }
                return Err(BankError::LockUpgrade);
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let started = Instant::now();
        let deadline = started + timeout;
        let mut pause = POLL_START;

        loop {
            if sys::try_lock(&file, mode)? {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BankError::IndexLocked {
                    path: self.path.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            thread::sleep(pause.min(deadline - now));
            pause = (pause * 2).min(POLL_MAX);
        }

        debug!(
            ?mode,
            waited_ms = started.elapsed().as_millis() as u64,
            "Acquired index lock"
        );
        self.holders.lock().insert(
            thread,
            Holder {
                mode,
                depth: 1,
                file,
            },
        );
        Ok(LockGuard::new(self, thread))
    }

    fn release(&self, thread: ThreadId) {
        let mut holders = self.holders.lock();
        let done = match holders.get_mut(&thread) {
            Some(holder) => {
                holder.depth -= 1;
                holder.depth == 0
            }
            None => false,
        };
        if done {
            if let Some(holder) = holders.remove(&thread) {
                sys::unlock(&holder.file);
            }
        }
    }
}

/// Releases one level of the lock when dropped
///
/// Tied to the acquiring thread, so it is neither `Send` nor `Sync`.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl<'a> LockGuard<'a> {
    fn new(manager: &'a LockManager, thread: ThreadId) -> Self {
        Self {
            manager,
            thread,
            _not_send: PhantomData,
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(self.thread);
    }
}

#[cfg(unix)]
mod sys {
    use super::LockMode;
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub fn try_lock(file: &File, mode: LockMode) -> io::Result<bool> {
        let op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };
        let rc = unsafe { libc::flock(file.as_raw_fd(), op | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) || err.kind() == io::ErrorKind::Interrupted {
            Ok(false)
        } else {
            Err(err)
        }
    }

    pub fn unlock(file: &File) {
        unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    }
}

#[cfg(not(unix))]
mod sys {
    use super::LockMode;
    use std::fs::{File, TryLockError};
    use std::io;

    pub fn try_lock(file: &File, mode: LockMode) -> io::Result<bool> {
        let result = match mode {
            LockMode::Shared => file.try_lock_shared(),
            LockMode::Exclusive => file.try_lock(),
        };
        match result {
            Ok(()) => Ok(true),
            Err(TryLockError::WouldBlock) => Ok(false),
            Err(TryLockError::Error(e)) => Err(e),
        }
    }

    pub fn unlock(file: &File) {
        let _ = file.unlock();
    }
}
