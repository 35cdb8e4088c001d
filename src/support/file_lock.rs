//-
// Copyright (c) 2026, the Maildirquota developers
//
// This file is part of Maildirquota.
//
// Maildirquota is free software: you can redistribute it and/or modify it
// under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Maildirquota is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Maildirquota. If not, see <http://www.gnu.org/licenses/>.

//! Advisory, cross-process file locking.
//!
//! Locks are taken with `flock(2)` on a dedicated lock file. The lock file
//! itself is never removed: deleting it would let a process that already
//! opened the old inode believe it holds the lock while a newcomer locks a
//! fresh one.
//!
//! `flock` locks belong to the open file description, so two `FileLock`s on
//! the same path exclude each other even within one process.

use std::fs;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error};
use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};

use crate::support::error::Error;

/// How to behave when the lock is already held.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Poll every `retry_delay` until the lock is obtained, failing with
    /// `Error::LockTimeout` once `timeout` has elapsed.
    Blocking {
        timeout: Duration,
        retry_delay: Duration,
    },
    /// Fail immediately with `Error::WouldBlock`.
    NonBlocking,
}

impl Default for LockMode {
    fn default() -> Self {
        LockMode::Blocking {
            timeout: Duration::from_secs(10),
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// An exclusive lock over a lock file.
///
/// The lock is released when this value is dropped, which covers early
/// returns through `?` and unwinding.
#[derive(Debug)]
pub struct FileLock {
    file: fs::File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock at `path`, creating the lock file if needed.
    pub fn acquire(
        path: impl AsRef<Path>,
        mode: LockMode,
    ) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(path)?;

        match mode {
            LockMode::NonBlocking => {
                if !try_flock(&file)? {
                    debug!("{} is locked elsewhere", path.display());
                    return Err(Error::WouldBlock(path.to_owned()));
                }
            }

            LockMode::Blocking {
                timeout,
                retry_delay,
            } => {
                let start = Instant::now();
                while !try_flock(&file)? {
                    let elapsed = start.elapsed();
                    if elapsed >= timeout {
                        debug!(
                            "Timed out waiting for {} after {:?}",
                            path.display(),
                            elapsed
                        );
                        return Err(Error::LockTimeout {
                            path: path.to_owned(),
                            timeout,
                        });
                    }

                    thread::sleep(retry_delay.min(timeout - elapsed));
                }
            }
        }

        debug!("Acquired {}", path.display());
        Ok(FileLock {
            file,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock anyway; unlocking
        // explicitly just makes the release happen at a well-defined point.
        if let Err(e) = flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            error!("Failed to unlock {}: {}", self.path.display(), e);
        } else {
            debug!("Released {}", self.path.display());
        }
    }
}

/// Make one non-blocking attempt to lock `file`.
///
/// Returns whether the lock was obtained.
fn try_flock(file: &fs::File) -> Result<bool, Error> {
    loop {
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => return Ok(true),
            // EWOULDBLOCK is EAGAIN everywhere flock(2) exists
            Err(nix::Error::Sys(Errno::EAGAIN)) => return Ok(false),
            Err(nix::Error::Sys(Errno::EINTR)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
