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

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::support::sysexits::*;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed quota rule: {0}")]
    MalformedRule(String),
    #[error("Corrupt quota control file {}: {}", .path.display(), .reason)]
    CorruptControlFile { path: PathBuf, reason: String },
    #[error("Lock on {} is held by someone else", .0.display())]
    WouldBlock(PathBuf),
    #[error(
        "Gave up waiting for lock on {} after {:?}",
        .path.display(),
        .timeout
    )]
    LockTimeout { path: PathBuf, timeout: Duration },
    #[error("Failed to scan {}: {}", .path.display(), .source)]
    ScanIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No such mailbox: {}", .0.display())]
    NoSuchMailbox(PathBuf),
    #[error("No such message: {0}")]
    NxMessage(String),
    #[error("Unsafe folder name")]
    UnsafeName,
    #[error("Folder not empty: {0}")]
    FolderNotEmpty(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Whether this error only means that another process currently holds
    /// the quota lock.
    pub fn is_lock_contention(&self) -> bool {
        matches!(*self, Error::WouldBlock(..) | Error::LockTimeout { .. })
    }

    /// The `sysexits.h` code a command line tool should exit with when it
    /// fails with this error.
    pub fn sysexit(&self) -> Sysexit {
        match *self {
            Error::MalformedRule(..) => EX_DATAERR,
            Error::CorruptControlFile { .. } => EX_DATAERR,
            Error::WouldBlock(..) | Error::LockTimeout { .. } => EX_TEMPFAIL,
            Error::NoSuchMailbox(..) | Error::NxMessage(..) => EX_NOINPUT,
            Error::UnsafeName => EX_USAGE,
            Error::FolderNotEmpty(..) => EX_DATAERR,
            Error::ScanIo { .. } | Error::Io(..) => EX_IOERR,
            Error::Nix(..) => EX_OSERR,
        }
    }
}
