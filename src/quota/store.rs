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

//! The authoritative quota usage of one mailbox.
//!
//! Every read-modify-write of the control file happens under the quota lock,
//! which is a file lock so that any number of processes can work on the same
//! mailbox at once. Reads alone need no lock since the control file is only
//! ever replaced atomically.

use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info, warn};

use super::control_file::{self, ControlFormat, ControlRecord, ControlSnapshot};
use super::model::{DeltaOutcome, QuotaUsage};
use super::rules::QuotaRules;
use crate::support::dir_lister::{DirectoryLister, Listing};
use crate::support::error::Error;
use crate::support::file_lock::{FileLock, LockMode};
use crate::support::system_config::{QuotaConfig, SystemConfig};

/// The maildir subdirectories holding delivered messages. Deliveries still
/// in `tmp` are not counted.
const MESSAGE_DIRS: [&str; 2] = ["new", "cur"];

#[derive(Debug)]
pub struct QuotaStore {
    root: PathBuf,
    control_path: PathBuf,
    lock_path: PathBuf,
    config: QuotaConfig,
    lock_mode: LockMode,

    usage: QuotaUsage,
    rules: QuotaRules,
    has_control_file: bool,
    needs_recount: bool,
}

impl QuotaStore {
    fn new(root: &Path, config: &SystemConfig) -> Self {
        QuotaStore {
            root: root.to_owned(),
            control_path: root.join(&config.quota.control_file),
            lock_path: root.join(config.quota.lock_file()),
            config: config.quota.clone(),
            lock_mode: config.lock.mode(),
            usage: QuotaUsage::default(),
            rules: QuotaRules::unlimited(),
            has_control_file: false,
            needs_recount: false,
        }
    }

    /// Load the quota state of the mailbox rooted at `root`.
    ///
    /// If there is no control file yet, the store starts with zero usage and
    /// no limits; nothing is written until the first recount or update.
    ///
    /// A control file which exists but cannot be understood results in
    /// `Error::CorruptControlFile`. Use `load_or_repair` to rebuild it
    /// instead.
    pub fn load(
        root: impl AsRef<Path>,
        config: &SystemConfig,
    ) -> Result<Self, Error> {
        let mut this = Self::new(root.as_ref(), config);
        if let Some(snapshot) = this.read_control()? {
            this.adopt(&snapshot);
        }

        Ok(this)
    }

    /// Like `load`, but a corrupt control file is only logged and flagged so
    /// that the next `current_usage` rebuilds it with a recount.
    pub fn load_or_repair(
        root: impl AsRef<Path>,
        config: &SystemConfig,
    ) -> Result<Self, Error> {
        let mut this = Self::new(root.as_ref(), config);
        match this.read_control() {
            Ok(Some(snapshot)) => this.adopt(&snapshot),
            Ok(None) => (),
            Err(Error::CorruptControlFile { reason, .. }) => {
                warn!(
                    "{}: ignoring corrupt quota file ({})",
                    this.root.display(),
                    reason
                );
                this.has_control_file = true;
                this.needs_recount = true;
            }
            Err(e) => return Err(e),
        }

        Ok(this)
    }

    /// The usage as of the last load, recount or update by this store.
    pub fn usage(&self) -> QuotaUsage {
        self.usage
    }

    pub fn rules(&self) -> &QuotaRules {
        &self.rules
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    /// Whether a control file existed the last time this store looked.
    pub fn has_control_file(&self) -> bool {
        self.has_control_file
    }

    /// Whether the control file is known to be unusable and will be
    /// rebuilt by the next `current_usage`.
    pub fn needs_recount(&self) -> bool {
        self.needs_recount
    }

    /// Override how the quota lock is acquired.
    pub fn set_lock_mode(&mut self, lock_mode: LockMode) {
        self.lock_mode = lock_mode;
    }

    /// Whether the known usage is over any limit.
    ///
    /// This is purely informational; nothing here stops a mailbox from
    /// growing past its quota.
    pub fn is_over_quota(&self) -> bool {
        self.rules.exceeds(&self.usage)
    }

    /// Return the current usage of the mailbox.
    ///
    /// The control file is re-read so that updates from other processes are
    /// seen. It is trusted unless it does not exist, was flagged for rebuild,
    /// or claims the mailbox is over quota but has not been written for a
    /// while, in which case the mailbox is recounted.
    ///
    /// If the control file is missing or flagged but another process holds
    /// the quota lock, the mailbox is still counted and the result returned;
    /// only writing the control file is skipped.
    pub fn current_usage(
        &mut self,
        lister: &impl DirectoryLister,
    ) -> Result<QuotaUsage, Error> {
        let snapshot = match self.read_control() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                self.has_control_file = false;
                return self.recount_or_scan(lister);
            }
            Err(Error::CorruptControlFile { .. }) if self.needs_recount => {
                return self.recount_or_scan(lister);
            }
            Err(e) => return Err(e),
        };
        self.adopt(&snapshot);

        let verify = if self.needs_recount {
            info!("{}: rebuilding quota file", self.root.display());
            true
        } else if self.is_over_quota()
            && age(snapshot.modified) > self.config.stale_after()
        {
            info!(
                "{}: verifying over-quota usage {}",
                self.root.display(),
                self.usage
            );
            true
        } else {
            false
        };

        if !verify {
            return Ok(self.usage);
        }

        match self.recount(lister) {
            Err(e) if e.is_lock_contention() => {
                // Someone else is busy changing the usage, so there's no
                // point in fighting over it. The cached value will do.
                debug!("{}: skipping recount: {}", self.root.display(), e);
                Ok(self.usage)
            }
            r => r,
        }
    }

    /// Recompute the usage from the contents of the mailbox and store it.
    ///
    /// This is the only way to correct drift. The quota lock is held for the
    /// whole scan. If the scan fails, the control file is left untouched.
    pub fn recount(
        &mut self,
        lister: &impl DirectoryLister,
    ) -> Result<QuotaUsage, Error> {
        let _lock = self.lock()?;
        let usage = self.scan(lister)?;

        // The rules may have been changed since we loaded them. A corrupt
        // file is exactly what a recount is for, so that's not fatal here.
        let rules = match self.read_control() {
            Ok(Some(snapshot)) => snapshot.record.rules,
            Ok(None) => self.rules.clone(),
            Err(Error::CorruptControlFile { reason, .. }) => {
                warn!(
                    "{}: replacing corrupt quota file ({})",
                    self.root.display(),
                    reason
                );
                self.rules.clone()
            }
            Err(e) => return Err(e),
        };

        self.persist(ControlRecord { usage, rules })?;
        self.needs_recount = false;
        info!(
            "{}: recounted quota usage: {} bytes in {} messages",
            self.root.display(),
            usage.bytes,
            usage.count
        );

        Ok(usage)
    }

    /// Adjust the usage by the given deltas, typically after delivering or
    /// removing a single message.
    ///
    /// The stored usage is re-read under the lock before the deltas are
    /// applied, so concurrent updates are never lost. If the result would be
    /// negative, it is clamped at 0 and the anomaly is returned and logged.
    pub fn apply_delta(
        &mut self,
        byte_delta: i64,
        count_delta: i64,
    ) -> Result<DeltaOutcome, Error> {
        let _lock = self.lock()?;
        if let Some(snapshot) = self.read_control()? {
            self.adopt(&snapshot);
        }

        let (usage, clamped) = self.usage.apply_delta(byte_delta, count_delta);
        if let Some(anomaly) = clamped {
            warn!(
                "{}: quota usage {} adjusted by {} {} went below zero \
                 by {} bytes and {} messages; clamped to {}",
                self.root.display(),
                self.usage,
                byte_delta,
                count_delta,
                anomaly.bytes_shortfall,
                anomaly.count_shortfall,
                usage
            );
        }

        self.persist(ControlRecord {
            usage,
            rules: self.rules.clone(),
        })?;

        Ok(DeltaOutcome { usage, clamped })
    }

    /// Replace the quota rules, keeping the stored usage.
    ///
    /// If there is no usable control file yet, the usage to store alongside
    /// the rules is counted through `lister` first.
    pub fn set_rules(
        &mut self,
        rules: QuotaRules,
        lister: &impl DirectoryLister,
    ) -> Result<(), Error> {
        let _lock = self.lock()?;
        let usage = match self.read_control() {
            Ok(Some(snapshot)) => {
                self.adopt(&snapshot);
                if self.needs_recount {
                    self.scan(lister)?
                } else {
                    self.usage
                }
            }
            Ok(None) => self.scan(lister)?,
            Err(Error::CorruptControlFile { reason, .. }) => {
                warn!(
                    "{}: replacing corrupt quota file ({})",
                    self.root.display(),
                    reason
                );
                self.scan(lister)?
            }
            Err(e) => return Err(e),
        };

        info!(
            "{}: quota rules changed from {:?} to {:?}",
            self.root.display(),
            self.rules.serialize(),
            rules.serialize()
        );
        self.persist(ControlRecord { usage, rules })?;
        self.needs_recount = false;
        Ok(())
    }

    /// Recount, or if the lock is busy, count without storing the result.
    fn recount_or_scan(
        &mut self,
        lister: &impl DirectoryLister,
    ) -> Result<QuotaUsage, Error> {
        match self.recount(lister) {
            Err(e) if e.is_lock_contention() => {
                debug!(
                    "{}: counting without updating quota file: {}",
                    self.root.display(),
                    e
                );
                let usage = self.scan(lister)?;
                self.usage = usage;
                Ok(usage)
            }
            r => r,
        }
    }

    fn lock(&self) -> Result<FileLock, Error> {
        FileLock::acquire(&self.lock_path, self.lock_mode)
    }

    fn read_control(&self) -> Result<Option<ControlSnapshot>, Error> {
        control_file::read(&self.control_path, self.config.legacy_size_limit)
    }

    fn adopt(&mut self, snapshot: &ControlSnapshot) {
        self.usage = snapshot.record.usage;
        self.rules = snapshot.record.rules.clone();
        self.has_control_file = true;
        if let ControlFormat::Legacy { oversized: true } = snapshot.format {
            self.needs_recount = true;
        }
    }

    fn persist(&mut self, record: ControlRecord) -> Result<(), Error> {
        control_file::write(&self.root, &self.control_path, &record)?;
        self.usage = record.usage;
        self.rules = record.rules;
        self.has_control_file = true;
        Ok(())
    }

    fn scan(&self, lister: &impl DirectoryLister) -> Result<QuotaUsage, Error> {
        let mut usage = QuotaUsage::default();
        scan_maildir(lister, &self.root, &mut usage)?;

        if !self.config.include_subfolders {
            return Ok(usage);
        }

        for entry in list(lister, &self.root)? {
            let entry = entry.map_err(|e| scan_error(&self.root, e))?;
            let name = entry.name.as_bytes();
            if !entry.is_dir || name.len() < 2 || b'.' != name[0] || b".." == name
            {
                continue;
            }

            let folder = String::from_utf8_lossy(&name[1..]);
            if self.config.excluded_folders.iter().any(|x| *x == folder) {
                continue;
            }

            scan_maildir(lister, &self.root.join(&entry.name), &mut usage)?;
        }

        Ok(usage)
    }
}

/// Add the messages of the maildir at `dir` (ignoring its subfolders) to
/// `usage`.
fn scan_maildir(
    lister: &impl DirectoryLister,
    dir: &Path,
    usage: &mut QuotaUsage,
) -> Result<(), Error> {
    for sub in &MESSAGE_DIRS {
        let path = dir.join(sub);
        for entry in list(lister, &path)? {
            let entry = entry.map_err(|e| scan_error(&path, e))?;
            if entry.is_dir || Some(&b'.') == entry.name.as_bytes().first() {
                continue;
            }

            let size = match entry.size {
                Some(size) => size,
                None => match fs::metadata(path.join(&entry.name)) {
                    Ok(md) => md.len(),
                    // Expunged since it was listed
                    Err(e) if io::ErrorKind::NotFound == e.kind() => continue,
                    Err(e) => return Err(scan_error(&path, e)),
                },
            };

            usage.bytes = usage.bytes.saturating_add(size);
            usage.count += 1;
        }
    }

    Ok(())
}

/// List `dir`, treating a missing directory as empty.
fn list<'a>(
    lister: &'a impl DirectoryLister,
    dir: &Path,
) -> Result<Listing<'a>, Error> {
    match lister.list(dir) {
        Ok(listing) => Ok(listing),
        Err(e) if io::ErrorKind::NotFound == e.kind() => {
            Ok(Box::new(std::iter::empty()))
        }
        Err(e) => Err(scan_error(dir, e)),
    }
}

fn scan_error(path: &Path, source: io::Error) -> Error {
    Error::ScanIo {
        path: path.to_owned(),
        source,
    }
}

fn age(modified: SystemTime) -> std::time::Duration {
    SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default()
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use rayon::prelude::*;

    use super::*;
    use crate::quota::model::ClampAnomaly;
    use crate::support::dir_lister::{ListedEntry, ReadDirLister};

    fn set_up() -> tempfile::TempDir {
        crate::init_test_log();

        let root = tempfile::TempDir::new().unwrap();
        for sub in &["tmp", "new", "cur"] {
            fs::create_dir(root.path().join(sub)).unwrap();
        }
        root
    }

    fn put(dir: &Path, name: &str, size: usize) {
        fs::write(dir.join(name), vec![b'x'; size]).unwrap();
    }

    fn control_content(root: &Path) -> String {
        fs::read_to_string(root.join("maildirsize")).unwrap()
    }

    /// Lists through `ReadDirLister`, but fails after yielding `fail_after`
    /// entries from any one directory.
    struct FailingLister {
        fail_after: usize,
    }

    impl DirectoryLister for FailingLister {
        fn list<'a>(&'a self, dir: &Path) -> io::Result<Listing<'a>> {
            let fail_after = self.fail_after;
            Ok(Box::new(ReadDirLister.list(dir)?.enumerate().map(
                move |(ix, entry)| {
                    if ix >= fail_after {
                        Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
                    } else {
                        entry
                    }
                },
            )))
        }
    }

    /// Reports sizes directly instead of leaving them to be stat()ed.
    struct SizedLister(Vec<(&'static str, u64)>);

    impl DirectoryLister for SizedLister {
        fn list<'a>(&'a self, dir: &Path) -> io::Result<Listing<'a>> {
            if !dir.ends_with("cur") {
                return Ok(Box::new(std::iter::empty()));
            }

            Ok(Box::new(self.0.iter().map(|&(name, size)| {
                Ok(ListedEntry {
                    name: name.into(),
                    is_dir: false,
                    size: Some(size),
                })
            })))
        }
    }

    #[test]
    fn load_without_control_file() {
        let root = set_up();
        let store =
            QuotaStore::load(root.path(), &SystemConfig::default()).unwrap();

        assert_eq!(QuotaUsage::default(), store.usage());
        assert!(store.rules().is_unlimited());
        assert!(!store.has_control_file());
        assert!(!store.is_over_quota());
        assert!(!root.path().join("maildirsize").exists());
    }

    #[test]
    fn recount_ignores_tmp() {
        let root = set_up();
        put(&root.path().join("cur"), "1.a:2,S", 100);
        put(&root.path().join("cur"), "2.b:2,", 200);
        put(&root.path().join("cur"), "3.c:2,RS", 300);
        put(&root.path().join("tmp"), "4.d", 50);

        let mut store =
            QuotaStore::load(root.path(), &SystemConfig::default()).unwrap();
        let usage = store.recount(&ReadDirLister).unwrap();

        assert_eq!(QuotaUsage::new(600, 3), usage);
        assert_eq!(usage, store.usage());
        assert!(store.has_control_file());
        assert_eq!("maildirquota 1\n600 3\n\n", control_content(root.path()));

        let reloaded =
            QuotaStore::load(root.path(), &SystemConfig::default()).unwrap();
        assert_eq!(usage, reloaded.usage());
    }

    #[test]
    fn recount_covers_new_and_subfolders() {
        let root = set_up();
        put(&root.path().join("new"), "1.a", 10);
        put(&root.path().join("cur"), "2.b:2,", 20);
        // Not messages
        put(&root.path().join("cur"), ".hidden", 1000);
        fs::create_dir(root.path().join("cur/subdir")).unwrap();

        for folder in &[".Sent", ".Archive.2020", ".Trash"] {
            for sub in &["tmp", "new", "cur"] {
                fs::create_dir_all(root.path().join(folder).join(sub))
                    .unwrap();
            }
            put(&root.path().join(folder).join("cur"), "3.c:2,", 100);
            put(&root.path().join(folder).join("tmp"), "4.d", 100);
        }
        // A subfolder in the middle of being created
        fs::create_dir(root.path().join(".Drafts")).unwrap();

        let config = SystemConfig::default();
        let mut store = QuotaStore::load(root.path(), &config).unwrap();
        assert_eq!(
            QuotaUsage::new(230, 4),
            store.recount(&ReadDirLister).unwrap()
        );

        let mut config = SystemConfig::default();
        config.quota.excluded_folders.clear();
        let mut store = QuotaStore::load(root.path(), &config).unwrap();
        assert_eq!(
            QuotaUsage::new(330, 5),
            store.recount(&ReadDirLister).unwrap()
        );

        config.quota.include_subfolders = false;
        let mut store = QuotaStore::load(root.path(), &config).unwrap();
        assert_eq!(
            QuotaUsage::new(30, 2),
            store.recount(&ReadDirLister).unwrap()
        );
    }

    #[test]
    fn recount_uses_listed_sizes() {
        let root = set_up();
        let mut store =
            QuotaStore::load(root.path(), &SystemConfig::default()).unwrap();
        let lister = SizedLister(vec![("a", 1), ("b", 2), (".c", 4)]);
        assert_eq!(QuotaUsage::new(3, 2), store.recount(&lister).unwrap());
    }

    #[test]
    fn negative_delta_is_clamped() {
        let root = set_up();
        put(&root.path().join("cur"), "1.a:2,", 500);

        let mut store =
            QuotaStore::load(root.path(), &SystemConfig::default()).unwrap();
        store.recount(&ReadDirLister).unwrap();
        assert_eq!(QuotaUsage::new(500, 1), store.usage());

        let outcome = store.apply_delta(-1000, -1).unwrap();
        assert_eq!(QuotaUsage::new(0, 0), outcome.usage);
        assert_eq!(
            Some(ClampAnomaly {
                bytes_shortfall: 500,
                count_shortfall: 0,
            }),
            outcome.clamped
        );
        assert_eq!(QuotaUsage::new(0, 0), store.usage());
        assert_eq!("maildirquota 1\n0 0\n\n", control_content(root.path()));

        let outcome = store.apply_delta(10, 1).unwrap();
        assert_eq!(QuotaUsage::new(10, 1), outcome.usage);
        assert_eq!(None, outcome.clamped);
    }

    #[test]
    fn interleaved_deltas_are_not_lost() {
        let root = set_up();
        let config = SystemConfig::default();
        QuotaStore::load(root.path(), &config)
            .unwrap()
            .recount(&ReadDirLister)
            .unwrap();

        // Both stores start out believing the usage is 0
        let mut a = QuotaStore::load(root.path(), &config).unwrap();
        let mut b = QuotaStore::load(root.path(), &config).unwrap();

        assert_eq!(QuotaUsage::new(10, 1), a.apply_delta(10, 1).unwrap().usage);
        assert_eq!(QuotaUsage::new(20, 2), b.apply_delta(10, 1).unwrap().usage);

        let reloaded = QuotaStore::load(root.path(), &config).unwrap();
        assert_eq!(QuotaUsage::new(20, 2), reloaded.usage());
    }

    #[test]
    fn concurrent_deltas_are_serialised() {
        let root = set_up();
        let config = SystemConfig::default();
        QuotaStore::load(root.path(), &config)
            .unwrap()
            .recount(&ReadDirLister)
            .unwrap();

        (0..64).into_par_iter().for_each(|_| {
            let mut store = QuotaStore::load(root.path(), &config).unwrap();
            store.apply_delta(10, 1).unwrap();
        });

        let reloaded = QuotaStore::load(root.path(), &config).unwrap();
        assert_eq!(QuotaUsage::new(640, 64), reloaded.usage());
    }

    #[test]
    fn failed_recount_preserves_control_file() {
        let root = set_up();
        put(&root.path().join("cur"), "1.a:2,", 100);

        let mut store =
            QuotaStore::load(root.path(), &SystemConfig::default()).unwrap();
        store
            .set_rules(QuotaRules::parse("1kS").unwrap(), &ReadDirLister)
            .unwrap();
        let before = fs::read(root.path().join("maildirsize")).unwrap();

        for i in 0..5 {
            put(&root.path().join("cur"), &format!("{}.b:2,", i + 2), 10);
        }

        assert_matches!(
            Err(Error::ScanIo { .. }),
            store.recount(&FailingLister { fail_after: 3 })
        );
        assert_eq!(before, fs::read(root.path().join("maildirsize")).unwrap());
        assert_eq!(QuotaUsage::new(100, 1), store.usage());

        // The lock was released despite the failure
        assert_eq!(
            QuotaUsage::new(150, 6),
            store.recount(&ReadDirLister).unwrap()
        );
    }

    #[test]
    fn recount_keeps_rules_set_elsewhere() {
        let root = set_up();
        put(&root.path().join("new"), "1.a", 7);
        let config = SystemConfig::default();

        let mut stale = QuotaStore::load(root.path(), &config).unwrap();
        let mut admin = QuotaStore::load(root.path(), &config).unwrap();
        admin
            .set_rules(QuotaRules::parse("5S,10C").unwrap(), &ReadDirLister)
            .unwrap();

        stale.recount(&ReadDirLister).unwrap();
        assert_eq!("5S,10C", stale.rules().serialize());
        assert!(stale.is_over_quota());
        assert_eq!(
            "maildirquota 1\n7 1\n5S,10C\n",
            control_content(root.path())
        );
    }

    #[test]
    fn corrupt_control_file() {
        let root = set_up();
        put(&root.path().join("cur"), "1.a:2,", 42);
        fs::write(root.path().join("maildirsize"), b"maildirquota 1\nxyz\n")
            .unwrap();
        let config = SystemConfig::default();

        assert_matches!(
            Err(Error::CorruptControlFile { .. }),
            QuotaStore::load(root.path(), &config)
        );

        let mut store = QuotaStore::load_or_repair(root.path(), &config).unwrap();
        assert_matches!(
            Err(Error::CorruptControlFile { .. }),
            store.apply_delta(1, 1)
        );
        assert_eq!(
            QuotaUsage::new(42, 1),
            store.current_usage(&ReadDirLister).unwrap()
        );
        assert_eq!(
            QuotaUsage::new(42, 1),
            QuotaStore::load(root.path(), &config).unwrap().usage()
        );
    }

    #[test]
    fn current_usage_creates_control_file() {
        let root = set_up();
        put(&root.path().join("new"), "1.a", 5);
        let mut store =
            QuotaStore::load(root.path(), &SystemConfig::default()).unwrap();

        assert_eq!(
            QuotaUsage::new(5, 1),
            store.current_usage(&ReadDirLister).unwrap()
        );
        assert!(root.path().join("maildirsize").is_file());

        // Trusts the control file from now on
        put(&root.path().join("new"), "2.b", 5);
        assert_eq!(
            QuotaUsage::new(5, 1),
            store.current_usage(&ReadDirLister).unwrap()
        );

        // But sees what other processes record
        QuotaStore::load(root.path(), &SystemConfig::default())
            .unwrap()
            .apply_delta(5, 1)
            .unwrap();
        assert_eq!(
            QuotaUsage::new(10, 2),
            store.current_usage(&ReadDirLister).unwrap()
        );
    }

    #[test]
    fn stale_over_quota_is_verified() {
        use nix::sys::time::{TimeVal, TimeValLike};

        let root = set_up();
        put(&root.path().join("cur"), "1.a:2,", 100);
        let control = root.path().join("maildirsize");
        fs::write(&control, b"maildirquota 1\n5000 50\n10C\n").unwrap();

        let mut store =
            QuotaStore::load(root.path(), &SystemConfig::default()).unwrap();
        assert!(store.is_over_quota());
        // Fresh, so it is believed
        assert_eq!(
            QuotaUsage::new(5000, 50),
            store.current_usage(&ReadDirLister).unwrap()
        );

        let an_hour_ago = TimeVal::seconds(
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap()
                .as_secs() as i64
                - 3600,
        );
        nix::sys::stat::utimes(control.as_path(), &an_hour_ago, &an_hour_ago)
            .unwrap();

        assert_eq!(
            QuotaUsage::new(100, 1),
            store.current_usage(&ReadDirLister).unwrap()
        );
        assert!(!store.is_over_quota());
        assert_eq!("maildirquota 1\n100 1\n10C\n", control_content(root.path()));
    }

    #[test]
    fn oversized_legacy_file_is_rebuilt() {
        let root = set_up();
        put(&root.path().join("cur"), "1.a:2,", 100);

        let mut legacy = "1000S\n".to_owned();
        for _ in 0..2000 {
            legacy.push_str("9 1\n");
        }
        fs::write(root.path().join("maildirsize"), legacy.as_bytes())
            .unwrap();

        let mut store =
            QuotaStore::load(root.path(), &SystemConfig::default()).unwrap();
        assert_eq!(QuotaUsage::new(18_000, 2000), store.usage());
        assert_eq!(
            QuotaUsage::new(100, 1),
            store.current_usage(&ReadDirLister).unwrap()
        );
        assert_eq!(
            "maildirquota 1\n100 1\n1000S\n",
            control_content(root.path())
        );
    }

    #[test]
    fn small_legacy_file_is_converted_on_write() {
        let root = set_up();
        fs::write(root.path().join("maildirsize"), b"10C\n300 3\n-100 -1\n")
            .unwrap();

        let mut store =
            QuotaStore::load(root.path(), &SystemConfig::default()).unwrap();
        assert_eq!(QuotaUsage::new(200, 2), store.usage());
        store.apply_delta(50, 1).unwrap();
        assert_eq!(
            "maildirquota 1\n250 3\n10C\n",
            control_content(root.path())
        );
    }

    #[test]
    fn lock_contention() {
        let root = set_up();
        let mut config = SystemConfig::default();
        config.lock.blocking = false;

        let mut store = QuotaStore::load(root.path(), &config).unwrap();
        store.recount(&ReadDirLister).unwrap();
        let before = control_content(root.path());

        let held = FileLock::acquire(
            root.path().join("maildirsize.lock"),
            LockMode::NonBlocking,
        )
        .unwrap();

        assert_matches!(Err(Error::WouldBlock(_)), store.apply_delta(1, 1));
        assert_matches!(
            Err(Error::WouldBlock(_)),
            store.recount(&ReadDirLister)
        );

        store.set_lock_mode(LockMode::Blocking {
            timeout: Duration::from_millis(20),
            retry_delay: Duration::from_millis(5),
        });
        assert_matches!(
            Err(Error::LockTimeout { .. }),
            store.set_rules(QuotaRules::unlimited(), &ReadDirLister)
        );
        assert_eq!(before, control_content(root.path()));

        drop(held);
        store.apply_delta(1, 1).unwrap();
    }

    #[test]
    fn set_rules_counts_missing_usage() {
        let root = set_up();
        put(&root.path().join("cur"), "1.a:2,", 30);
        put(&root.path().join("new"), "2.b", 20);

        let mut store =
            QuotaStore::load(root.path(), &SystemConfig::default()).unwrap();
        store
            .set_rules(QuotaRules::parse("40S").unwrap(), &ReadDirLister)
            .unwrap();
        assert_eq!(QuotaUsage::new(50, 2), store.usage());
        assert!(store.is_over_quota());
        assert_eq!(
            "maildirquota 1\n50 2\n40S\n",
            control_content(root.path())
        );

        // With a control file in place, its usage is kept as is
        put(&root.path().join("new"), "3.c", 20);
        store
            .set_rules(QuotaRules::parse("100S").unwrap(), &ReadDirLister)
            .unwrap();
        assert_eq!(
            "maildirquota 1\n50 2\n100S\n",
            control_content(root.path())
        );
    }

    #[test]
    fn set_rules_replaces_corrupt_control_file() {
        let root = set_up();
        put(&root.path().join("cur"), "1.a:2,", 9);
        fs::write(root.path().join("maildirsize"), b"garbage\n").unwrap();
        let config = SystemConfig::default();

        let mut store = QuotaStore::load_or_repair(root.path(), &config).unwrap();
        assert!(store.needs_recount());
        store
            .set_rules(QuotaRules::parse("5C").unwrap(), &ReadDirLister)
            .unwrap();
        assert!(!store.needs_recount());
        assert_eq!(
            "maildirquota 1\n9 1\n5C\n",
            control_content(root.path())
        );
    }

    #[test]
    fn current_usage_counts_when_locked_out() {
        let root = set_up();
        put(&root.path().join("cur"), "1.a:2,", 11);
        put(&root.path().join("new"), "2.b", 22);
        let mut config = SystemConfig::default();
        config.lock.blocking = false;

        let held = FileLock::acquire(
            root.path().join("maildirsize.lock"),
            LockMode::NonBlocking,
        )
        .unwrap();

        let mut store = QuotaStore::load(root.path(), &config).unwrap();
        assert_eq!(
            QuotaUsage::new(33, 2),
            store.current_usage(&ReadDirLister).unwrap()
        );
        assert_eq!(QuotaUsage::new(33, 2), store.usage());
        assert!(!root.path().join("maildirsize").exists());

        drop(held);
        assert_eq!(
            QuotaUsage::new(33, 2),
            store.current_usage(&ReadDirLister).unwrap()
        );
        assert!(root.path().join("maildirsize").is_file());
    }
}
