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

//! Lazy enumeration of maildir directories.
//!
//! Large maildirs can hold hundreds of thousands of messages, so listings are
//! streamed entry by entry instead of being collected up front.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::Path;

/// One entry produced by a `DirectoryLister`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedEntry {
    pub name: OsString,
    pub is_dir: bool,
    /// The size of the file in bytes, if the lister got it for free.
    ///
    /// When `None`, consumers needing the size must `stat` the file
    /// themselves.
    pub size: Option<u64>,
}

/// The stream of entries returned by `DirectoryLister::list`.
pub type Listing<'a> = Box<dyn Iterator<Item = io::Result<ListedEntry>> + 'a>;

/// Something that can enumerate the entries in a directory.
///
/// Each call to `list` starts a fresh scan; a listing cannot be rewound.
/// Errors may be reported either when starting the listing or for any
/// individual entry.
pub trait DirectoryLister {
    fn list<'a>(&'a self, dir: &Path) -> io::Result<Listing<'a>>;
}

impl<T: DirectoryLister + ?Sized> DirectoryLister for &T {
    fn list<'a>(&'a self, dir: &Path) -> io::Result<Listing<'a>> {
        (**self).list(dir)
    }
}

/// A `DirectoryLister` backed by `std::fs::read_dir`.
///
/// Whether an entry is a directory comes from the directory entry itself on
/// most file systems, so no `stat` is done. Sizes are never reported.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadDirLister;

impl DirectoryLister for ReadDirLister {
    fn list<'a>(&'a self, dir: &Path) -> io::Result<Listing<'a>> {
        let entries = fs::read_dir(dir)?;
        Ok(Box::new(entries.map(|entry| {
            let entry = entry?;
            let file_type = entry.file_type()?;
            Ok(ListedEntry {
                name: entry.file_name(),
                is_dir: file_type.is_dir(),
                size: None,
            })
        })))
    }
}
