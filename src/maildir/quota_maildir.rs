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

use std::convert::TryFrom;
use std::path::Path;
use std::time::Duration;

use log::warn;

use super::Maildir;
use crate::quota::{QuotaRules, QuotaStore, QuotaUsage};
use crate::support::dir_lister::{DirectoryLister, ReadDirLister};
use crate::support::error::Error;
use crate::support::system_config::SystemConfig;

/// A maildir whose quota usage is kept up to date as messages come and go.
///
/// Quota tracking is delegated to a `QuotaStore`; how the maildir is scanned
/// when usage has to be recounted is up to the `DirectoryLister`.
#[derive(Debug)]
pub struct QuotaMaildir<L = ReadDirLister> {
    maildir: Maildir,
    quota: QuotaStore,
    lister: L,
    tmp_max_age: Duration,
}

impl QuotaMaildir<ReadDirLister> {
    /// Open the maildir at `root`, creating it if `create` is true.
    ///
    /// New directories are set up according to `config.maildir`.
    pub fn open(
        root: impl AsRef<Path>,
        create: bool,
        config: &SystemConfig,
    ) -> Result<Self, Error> {
        let maildir = Maildir::open_with(
            root,
            create,
            config.maildir.create_options(),
        )?;
        Self::with_lister(maildir, config, ReadDirLister)
    }
}

impl<L: DirectoryLister> QuotaMaildir<L> {
    /// Wrap `maildir`, recounting through `lister` when needed.
    ///
    /// A corrupt quota file does not prevent opening the maildir; it is
    /// rebuilt by the next operation that needs the usage.
    pub fn with_lister(
        maildir: Maildir,
        config: &SystemConfig,
        lister: L,
    ) -> Result<Self, Error> {
        let quota = QuotaStore::load_or_repair(maildir.root(), config)?;
        Ok(QuotaMaildir {
            maildir,
            quota,
            lister,
            tmp_max_age: config.quota.tmp_max_age(),
        })
    }

    pub fn maildir(&self) -> &Maildir {
        &self.maildir
    }

    pub fn quota(&self) -> &QuotaStore {
        &self.quota
    }

    pub fn quota_mut(&mut self) -> &mut QuotaStore {
        &mut self.quota
    }

    /// Return the current usage, creating the quota file if needed.
    pub fn usage(&mut self) -> Result<QuotaUsage, Error> {
        self.quota.current_usage(&self.lister)
    }

    /// Rebuild the usage from the contents of the maildir.
    pub fn recount(&mut self) -> Result<QuotaUsage, Error> {
        self.quota.recount(&self.lister)
    }

    pub fn rules(&self) -> &QuotaRules {
        self.quota.rules()
    }

    /// Change the quota rules of this maildir.
    pub fn set_rules(&mut self, rules: QuotaRules) -> Result<(), Error> {
        self.quota.set_rules(rules, &self.lister)
    }

    /// Whether the maildir was over quota as of the last update. Advisory
    /// only.
    pub fn is_over_quota(&self) -> bool {
        self.quota.is_over_quota()
    }

    /// Deliver a message and account for it.
    ///
    /// Returns the unique key of the new message.
    pub fn deliver(&mut self, data: &[u8]) -> Result<String, Error> {
        let (key, size) = self.maildir.deliver(data)?;
        self.account(i64::try_from(size).unwrap_or(i64::MAX), 1)?;
        Ok(key)
    }

    /// Remove a message and account for it.
    ///
    /// Returns the size of the removed message.
    pub fn remove(&mut self, key: &str) -> Result<u64, Error> {
        let size = self.maildir.remove(key)?;
        self.account(-i64::try_from(size).unwrap_or(i64::MAX), -1)?;
        Ok(size)
    }

    /// Delete abandoned deliveries from `tmp/`.
    pub fn clean(&self) -> Result<usize, Error> {
        self.maildir.clean(self.tmp_max_age)
    }

    fn account(
        &mut self,
        byte_delta: i64,
        count_delta: i64,
    ) -> Result<(), Error> {
        // Without a usable quota file there is nothing to adjust; a new one
        // is built from a full count, which includes the message just
        // handled.
        let result = if !self.quota.has_control_file()
            || self.quota.needs_recount()
        {
            self.quota.recount(&self.lister).map(|_| ())
        } else {
            match self.quota.apply_delta(byte_delta, count_delta) {
                Err(Error::CorruptControlFile { reason, .. }) => {
                    warn!(
                        "{}: quota file became unreadable ({}); recounting",
                        self.maildir.root().display(),
                        reason
                    );
                    self.quota.recount(&self.lister).map(|_| ())
                }
                r => r.map(|_| ()),
            }
        };

        match result {
            // The message operation itself already happened, so losing the
            // update is preferable to failing. The next recount repairs it.
            Err(e) if e.is_lock_contention() => {
                warn!(
                    "{}: quota usage not updated by {} {}: {}",
                    self.maildir.root().display(),
                    byte_delta,
                    count_delta,
                    e
                );
                Ok(())
            }
            r => r,
        }
    }
}
