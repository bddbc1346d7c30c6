//! Cross-process port reservation.
//!
//! Shards started at the same time race for listen ports. Each one claims a
//! port by creating the directory `<lock_dir>/<port>`; directory creation is
//! atomic, so exactly one process wins. Losers move on to the next port.
//! The winner keeps the directory until its listener is bound and a grace
//! period has passed, then removes it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortLockError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No free port in {attempts} attempts starting at {start}")]
    Exhausted { start: u16, attempts: u16 },
}

/// A held port lock. Released on drop.
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
    path: PathBuf,
    released: bool,
}

impl PortReservation {
    /// Claim the first free port in `start..start + max_attempts`.
    pub fn reserve(lock_dir: &Path, start: u16, max_attempts: u16) -> Result<Self, PortLockError> {
        std::fs::create_dir_all(lock_dir)?;
        for offset in 0..max_attempts {
            let Some(port) = start.checked_add(offset) else {
                break;
            };
            let path = lock_dir.join(port.to_string());
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    tracing::debug!(port, path = %path.display(), "Port lock acquired");
                    return Ok(Self {
                        port,
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(port, "Port lock held elsewhere, trying next port");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(PortLockError::Exhausted {
            start,
            attempts: max_attempts,
        })
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock directory. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_dir(&self.path) {
            Ok(()) => tracing::debug!(port = self.port, "Port lock released"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(port = self.port, error = %e, "Failed to release port lock"),
        }
    }

    /// Release the lock from a background thread after `grace`.
    pub fn release_after(self, grace: Duration) -> std::thread::JoinHandle<()> {
        let mut reservation = self;
        std::thread::spawn(move || {
            std::thread::sleep(grace);
            reservation.release();
        })
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
