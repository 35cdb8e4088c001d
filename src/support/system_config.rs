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

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::maildir::CreateOptions;
use crate::support::file_lock::LockMode;

/// The configuration for Maildirquota.
///
/// The command line tool reads this from the TOML file given by `--config`.
/// Every field has a default, so an empty file (or no file at all) is valid.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
pub struct SystemConfig {
    /// How quota usage is tracked.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// How the quota lock is acquired.
    #[serde(default)]
    pub lock: LockConfig,

    /// How new maildirs and folders are created.
    #[serde(default)]
    pub maildir: MaildirConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// The name of the quota control file within the mailbox root.
    ///
    /// The lock file is this name with `.lock` appended.
    pub control_file: String,

    /// If true, Maildir++ subfolders (`.Name` directories in the mailbox
    /// root) count towards the usage of the mailbox.
    pub include_subfolders: bool,

    /// Subfolders which never count towards usage, even with
    /// `include_subfolders`.
    pub excluded_folders: Vec<String>,

    /// An over-quota reading from a control file last written more than
    /// this many seconds ago is verified by a recount before being trusted.
    pub stale_after_secs: u64,

    /// Legacy Maildir++ control files grow by one line per delivery. Once
    /// one is bigger than this many bytes, it is replaced by a recount
    /// instead of being summed.
    pub legacy_size_limit: u64,

    /// Files in `tmp/` older than this many seconds are considered abandoned
    /// deliveries and are removed by `clean`.
    pub tmp_max_age_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        QuotaConfig {
            control_file: "maildirsize".to_owned(),
            include_subfolders: true,
            excluded_folders: vec!["Trash".to_owned()],
            stale_after_secs: 15 * 60,
            legacy_size_limit: 5120,
            tmp_max_age_secs: 36 * 60 * 60,
        }
    }
}

impl QuotaConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn tmp_max_age(&self) -> Duration {
        Duration::from_secs(self.tmp_max_age_secs)
    }

    pub fn lock_file(&self) -> String {
        format!("{}.lock", self.control_file)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    /// If false, fail immediately when another process holds the lock.
    pub blocking: bool,

    /// How long to wait for the lock in blocking mode.
    pub timeout_ms: u64,

    /// How long to sleep between attempts in blocking mode.
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            blocking: true,
            timeout_ms: 10_000,
            retry_delay_ms: 50,
        }
    }
}

impl LockConfig {
    pub fn mode(&self) -> LockMode {
        if self.blocking {
            LockMode::Blocking {
                timeout: Duration::from_millis(self.timeout_ms),
                retry_delay: Duration::from_millis(self.retry_delay_ms),
            }
        } else {
            LockMode::NonBlocking
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MaildirConfig {
    /// Permission bits for created directories, e.g. 448 for 0o700.
    pub mode: u32,

    /// If set, created directories are owned by this user.
    pub uid: Option<u32>,

    /// If set, created directories belong to this group and have the setgid
    /// bit so that everything created in them inherits the group.
    pub gid: Option<u32>,
}

impl Default for MaildirConfig {
    fn default() -> Self {
        MaildirConfig {
            mode: 0o700,
            uid: None,
            gid: None,
        }
    }
}

impl MaildirConfig {
    pub fn create_options(&self) -> CreateOptions {
        CreateOptions {
            mode: self.mode,
            uid: self.uid.map(nix::unistd::Uid::from_raw),
            gid: self.gid.map(nix::unistd::Gid::from_raw),
        }
    }
}
