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

//! Maildir++ quota accounting.
//!
//! Maildirquota tracks how much space a maildir uses, following the Maildir++
//! quota convention: the byte and message totals live in a small control file
//! in the mailbox root together with the rules limiting them. Totals are
//! adjusted incrementally as messages are delivered and removed, and can be
//! rebuilt from a full scan of the maildir whenever they drift.
//!
//! Updates are serialised across processes with a file lock, so any number
//! of delivery agents and readers may share a mailbox. Quotas are reported
//! but never enforced.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod cli;
pub mod maildir;
pub mod quota;
pub mod support;

pub use crate::maildir::{CreateOptions, Maildir, QuotaMaildir};
pub use crate::quota::{DeltaOutcome, QuotaRules, QuotaStore, QuotaUsage};
pub use crate::support::error::Error;

/// Send log output at `level` and above to standard error.
pub fn init_simple_log(level: log::LevelFilter) {
    use log4rs::append::console::{ConsoleAppender, Target};
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}",
        )))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .expect("Failed to build logging configuration");

    // Only fails if something already installed a logger, in which case that
    // one is just as good.
    let _ = log4rs::init_config(config);
}

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| init_simple_log(log::LevelFilter::Debug))
}
