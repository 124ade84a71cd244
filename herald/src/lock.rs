use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Advisory `flock(2)` on a fixed path, shared by every herald process.
///
/// The file is never removed: deleting it would let a releasing process and
/// a newly arriving one lock two different inodes.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
    held: bool,
}

/// Exclusive ownership of the lock. Releases on drop.
#[derive(Debug)]
pub struct LockGuard<'a> {
    lock: &'a mut InstanceLock,
}

impl InstanceLock {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file, path: path.to_path_buf(), held: false })
    }

    /// Blocks until the lock is ours. `cancelled` is consulted before every
    /// blocking wait and after each interrupted one; once it returns true the
    /// wait is abandoned and `None` is returned.
    pub fn acquire(&mut self, cancelled: impl Fn() -> bool) -> io::Result<Option<LockGuard<'_>>> {
        if !self.try_lock()? {
            debug!("another notification is showing, waiting on {}", self.path.display());
            loop {
                if cancelled() {
                    debug!("gave up waiting for {}", self.path.display());
                    return Ok(None);
                }
                match self.flock(libc::LOCK_EX) {
                    Ok(()) => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
        }
        self.held = true;
        debug!("acquired {}", self.path.display());
        Ok(Some(LockGuard { lock: self }))
    }

    /// False when another process holds the lock.
    fn try_lock(&mut self) -> io::Result<bool> {
        match self.flock(libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Safe to call any number of times, held or not.
    pub fn release(&mut self) {
        if !self.held { return; }
        self.held = false;
        match self.flock(libc::LOCK_UN) {
            Ok(()) => debug!("released {}", self.path.display()),
            // Closing the file drops the lock anyway.
            Err(e) => warn!("failed to unlock {}: {e}", self.path.display()),
        }
    }

    fn flock(&self, op: libc::c_int) -> io::Result<()> {
        // SAFETY: the descriptor is owned by `self.file` and stays open.
        if unsafe { libc::flock(self.file.as_raw_fd(), op) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

impl LockGuard<'_> {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
