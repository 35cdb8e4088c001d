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

use std::fs;
use std::path::Path;

use chrono::prelude::*;
use log::error;

use super::main::{Command, Options};
use crate::maildir::{Maildir, QuotaMaildir};
use crate::quota::{QuotaStore, QuotaUsage};
use crate::support::dir_lister::ReadDirLister;
use crate::support::error::Error;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

pub(super) fn run(
    config: &SystemConfig,
    options: Options,
) -> Result<(), Sysexit> {
    let root = options.maildir;
    // Only operate on things that actually look like maildirs
    Maildir::open(&root, false, 0o700).map_err(|e| fail(&root, e))?;

    match options.command {
        Command::Usage { repair } => usage(config, &root, repair),
        Command::Recount => {
            let mut store = QuotaStore::load_or_repair(&root, config)
                .map_err(|e| fail(&root, e))?;
            let usage =
                store.recount(&ReadDirLister).map_err(|e| fail(&root, e))?;
            print_usage(&store, usage);
            Ok(())
        }
        Command::SetRules { rules } => {
            let mut maildir = QuotaMaildir::open(&root, false, config)
                .map_err(|e| fail(&root, e))?;
            maildir.set_rules(rules).map_err(|e| fail(&root, e))?;
            print_usage(maildir.quota(), maildir.quota().usage());
            Ok(())
        }
        Command::Clean => {
            let maildir = QuotaMaildir::open(&root, false, config)
                .map_err(|e| fail(&root, e))?;
            let deleted = maildir.clean().map_err(|e| fail(&root, e))?;
            println!("removed: {}", deleted);
            Ok(())
        }
    }
}

fn usage(
    config: &SystemConfig,
    root: &Path,
    repair: bool,
) -> Result<(), Sysexit> {
    let store = if repair {
        QuotaStore::load_or_repair(root, config)
    } else {
        QuotaStore::load(root, config)
    };
    let mut store = store.map_err(|e| fail(root, e))?;

    let usage = store
        .current_usage(&ReadDirLister)
        .map_err(|e| fail(root, e))?;
    print_usage(&store, usage);
    Ok(())
}

fn print_usage(store: &QuotaStore, usage: QuotaUsage) {
    let rules = store.rules();
    println!("bytes: {}", usage.bytes);
    println!("messages: {}", usage.count);
    if rules.is_unlimited() {
        println!("rules: none");
    } else {
        println!("rules: {}", rules);
    }
    println!(
        "over quota: {}",
        if rules.exceeds(&usage) { "yes" } else { "no" }
    );

    if let Ok(modified) =
        fs::metadata(store.control_path()).and_then(|md| md.modified())
    {
        println!(
            "updated: {}",
            DateTime::<Local>::from(modified).format("%Y-%m-%d %H:%M:%S %z")
        );
    }
}

fn fail(root: &Path, e: Error) -> Sysexit {
    error!("{}: {}", root.display(), e);
    if let Error::CorruptControlFile { .. } = e {
        eprintln!("Run with `usage --repair` or `recount` to rebuild it.");
    }

    e.sysexit()
}
