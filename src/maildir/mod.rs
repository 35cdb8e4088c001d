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

//! Minimal maildir handling.
//!
//! Only what quota accounting needs is here: creating the directory
//! structure, delivering and removing messages, adding and removing
//! Maildir++ subfolders, and cleaning up abandoned deliveries. Message
//! content is never interpreted.

use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::prelude::*;
use log::info;
use nix::unistd::{Gid, Uid};
use rand::{rngs::OsRng, Rng};

use crate::support::error::Error;
use crate::support::file_ops::{self, IgnoreKinds};
use crate::support::safe_name::is_safe_folder_name;

pub mod quota_maildir;

pub use self::quota_maildir::QuotaMaildir;

const SUBDIRS: [&str; 3] = ["tmp", "new", "cur"];

/// The marker file Maildir++ puts into every subfolder.
const FOLDER_MARKER: &str = "maildirfolder";

/// How the directories of a maildir are set up when it is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreateOptions {
    /// Permission bits, applied regardless of the umask.
    pub mode: u32,
    /// Owner to give the directories, if not the current user.
    pub uid: Option<Uid>,
    /// Group to give the directories. This also sets the setgid bit so
    /// that messages delivered later inherit the group.
    pub gid: Option<Gid>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        CreateOptions {
            mode: 0o700,
            uid: None,
            gid: None,
        }
    }
}

impl CreateOptions {
    fn apply(&self, dir: &Path) -> Result<(), Error> {
        // chown() can clear the setgid bit, so it goes first
        if self.uid.is_some() || self.gid.is_some() {
            nix::unistd::chown(dir, self.uid, self.gid)?;
        }

        let mode = if self.gid.is_some() {
            self.mode | 0o2000
        } else {
            self.mode
        };
        file_ops::chmod(dir, mode)?;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Maildir {
    root: PathBuf,
    options: CreateOptions,
}

impl Maildir {
    /// Open the maildir at `root`.
    ///
    /// If `root` is not a maildir and `create` is true, the missing
    /// directories are created with the given `mode`. Otherwise,
    /// `Error::NoSuchMailbox` is returned.
    pub fn open(
        root: impl AsRef<Path>,
        create: bool,
        mode: u32,
    ) -> Result<Self, Error> {
        Self::open_with(
            root,
            create,
            CreateOptions {
                mode,
                ..CreateOptions::default()
            },
        )
    }

    /// Like `open`, but with full control over how the directories are
    /// created.
    ///
    /// Other processes may be creating the same maildir at the same time;
    /// that is not an error. Subfolders added later through `add_folder` are
    /// created with the same options.
    pub fn open_with(
        root: impl AsRef<Path>,
        create: bool,
        options: CreateOptions,
    ) -> Result<Self, Error> {
        let root = root.as_ref().to_owned();
        let is_maildir = SUBDIRS.iter().all(|sub| root.join(sub).is_dir());

        if !is_maildir {
            if !create {
                return Err(Error::NoSuchMailbox(root));
            }

            fs::DirBuilder::new()
                .mode(options.mode)
                .recursive(true)
                .create(&root)?;
            options.apply(&root)?;
            for sub in &SUBDIRS {
                let path = root.join(sub);
                fs::DirBuilder::new()
                    .mode(options.mode)
                    .create(&path)
                    .ignore_already_exists()?;
                options.apply(&path)?;
            }
        }

        Ok(Maildir { root, options })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deliver a new message into `new/`.
    ///
    /// Returns the unique key of the message and its size in bytes.
    pub fn deliver(&self, data: &[u8]) -> Result<(String, u64), Error> {
        let tmp = self.root.join("tmp");
        let new = self.root.join("new");

        loop {
            let key = unique_name();
            match file_ops::spit(&tmp, new.join(&key), false, 0o600, data) {
                Ok(()) => return Ok((key, data.len() as u64)),
                Err(e) if io::ErrorKind::AlreadyExists == e.kind() => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Find the message with the given unique key in `new/` or `cur/`.
    pub fn lookup(&self, key: &str) -> Result<PathBuf, Error> {
        for sub in &["new", "cur"] {
            let dir = self.root.join(sub);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if io::ErrorKind::NotFound == e.kind() => continue,
                Err(e) => return Err(e.into()),
            };

            for entry in entries {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if key == name.split(':').next().unwrap_or("") {
                    return Ok(entry.path());
                }
            }
        }

        Err(Error::NxMessage(key.to_owned()))
    }

    /// Remove the message with the given unique key.
    ///
    /// Returns the size of the removed message.
    pub fn remove(&self, key: &str) -> Result<u64, Error> {
        let path = self.lookup(key)?;
        let gone = || Error::NxMessage(key.to_owned());

        let size = match fs::metadata(&path) {
            Ok(md) => md.len(),
            Err(e) if io::ErrorKind::NotFound == e.kind() => return Err(gone()),
            Err(e) => return Err(e.into()),
        };

        match fs::remove_file(&path) {
            Ok(()) => Ok(size),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Err(gone()),
            Err(e) => Err(e.into()),
        }
    }

    /// Iterate over the names of the Maildir++ subfolders of this maildir.
    pub fn folders(
        &self,
    ) -> Result<impl Iterator<Item = Result<String, Error>>, Error> {
        let entries = fs::read_dir(&self.root)?;
        Ok(entries.filter_map(|entry| {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };

            let name = entry.file_name().into_string().ok()?;
            if name.len() < 2 || !name.starts_with('.') || ".." == name {
                return None;
            }

            match entry.file_type() {
                Ok(ft) if ft.is_dir() => Some(Ok(name[1..].to_owned())),
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            }
        }))
    }

    /// Open the existing subfolder `name`.
    pub fn folder(&self, name: &str) -> Result<Maildir, Error> {
        Maildir::open_with(self.folder_path(name)?, false, self.options)
    }

    /// Open the subfolder `name`, creating it if needed.
    pub fn add_folder(&self, name: &str) -> Result<Maildir, Error> {
        let folder =
            Maildir::open_with(self.folder_path(name)?, true, self.options)?;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o600)
            .open(folder.root.join(FOLDER_MARKER))?;
        Ok(folder)
    }

    /// Delete the subfolder `name` and everything in it.
    ///
    /// The folder must not contain any messages in `new/` or `cur/`, nor
    /// any directories besides `tmp`, `new` and `cur`; otherwise
    /// `Error::FolderNotEmpty` is returned and nothing is deleted. Leftovers
    /// in `tmp/` and dot-files do not count as content.
    pub fn remove_folder(&self, name: &str) -> Result<(), Error> {
        let path = self.folder_path(name)?;
        if !path.is_dir() {
            return Err(Error::NoSuchMailbox(path));
        }

        let not_empty = || Error::FolderNotEmpty(name.to_owned());

        for sub in &["new", "cur"] {
            let entries = match fs::read_dir(path.join(sub)) {
                Ok(entries) => entries,
                Err(e) if io::ErrorKind::NotFound == e.kind() => continue,
                Err(e) => return Err(e.into()),
            };

            for entry in entries {
                if !entry?.file_name().to_string_lossy().starts_with('.') {
                    return Err(not_empty());
                }
            }
        }

        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let entry_name = entry.file_name();
            if !SUBDIRS.iter().any(|sub| entry_name == **sub)
                && entry.file_type()?.is_dir()
            {
                return Err(not_empty());
            }
        }

        fs::remove_dir_all(&path)?;
        info!("{}: removed folder {:?}", self.root.display(), name);
        Ok(())
    }

    fn folder_path(&self, name: &str) -> Result<PathBuf, Error> {
        if !is_safe_folder_name(name) {
            return Err(Error::UnsafeName);
        }

        Ok(self.root.join(format!(".{}", name)))
    }

    /// Delete files in `tmp/` which have not been modified for `max_age`.
    ///
    /// These are deliveries which were abandoned part way through. Returns
    /// the number of files deleted.
    pub fn clean(&self, max_age: Duration) -> Result<usize, Error> {
        let tmp = self.root.join("tmp");
        let now = SystemTime::now();
        let mut deleted = 0;

        for entry in fs::read_dir(&tmp)? {
            let entry = entry?;
            let md = match entry.metadata() {
                Ok(md) => md,
                Err(e) if io::ErrorKind::NotFound == e.kind() => continue,
                Err(e) => return Err(e.into()),
            };

            if !md.is_file() {
                continue;
            }

            let age = now
                .duration_since(md.modified()?)
                .unwrap_or_default();
            if age > max_age {
                fs::remove_file(entry.path()).ignore_not_found()?;
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(
                "{}: removed {} abandoned file(s) from tmp",
                self.root.display(),
                deleted
            );
        }

        Ok(deleted)
    }
}

/// Generate a new unique maildir name, per the modern convention of
/// `<seconds>.M<micros>P<pid>R<random>.<host>`.
fn unique_name() -> String {
    let now = Utc::now();
    format!(
        "{}.M{}P{}R{:016x}.{}",
        now.timestamp(),
        now.timestamp_subsec_micros(),
        nix::unistd::getpid().as_raw(),
        OsRng.gen::<u64>(),
        hostname()
    )
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    match nix::unistd::gethostname(&mut buf) {
        // / and : are not allowed in the host part of the name
        Ok(name) => name
            .to_string_lossy()
            .replace('/', "\\057")
            .replace(':', "\\072"),
        Err(_) => "localhost".to_owned(),
    }
}
