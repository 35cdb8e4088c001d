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
use std::io::Read;
use std::path::PathBuf;

use structopt::StructOpt;

use crate::quota::QuotaRules;
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

macro_rules! die {
    ($ex:expr, $($stuff:tt)*) => {{
        eprintln!($($stuff)*);
        $ex.exit()
    }};
}

/// Inspect and maintain Maildir++ quota usage.
///
/// Usage is tracked in a control file in the root of the maildir (by default
/// `maildirsize`). Quotas are only reported; nothing here prevents a maildir
/// from growing past its limits.
#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
pub(super) struct Options {
    /// Read configuration from this TOML file.
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Configure logging from this log4rs TOML file when not running
    /// interactively. Without it, non-interactive runs log to syslog.
    #[structopt(long, parse(from_os_str))]
    log_config: Option<PathBuf>,

    /// Fail immediately instead of waiting if another process holds the
    /// quota lock.
    #[structopt(long)]
    non_blocking: bool,

    /// The root directory of the maildir.
    #[structopt(parse(from_os_str))]
    pub(super) maildir: PathBuf,

    #[structopt(subcommand)]
    pub(super) command: Command,
}

#[derive(StructOpt)]
pub(super) enum Command {
    /// Show the current usage and quota rules.
    ///
    /// If there is no quota file yet, the maildir is counted and one is
    /// created.
    Usage {
        /// Rebuild a corrupt quota file instead of failing.
        #[structopt(long)]
        repair: bool,
    },
    /// Count the contents of the maildir and rewrite the quota file.
    ///
    /// This corrects any drift between the recorded and actual usage, and
    /// replaces a corrupt quota file.
    Recount,
    /// Change the quota rules, e.g. "10MS,1000C".
    ///
    /// S limits storage in bytes (optionally scaled by k, M or G), C limits
    /// the number of messages. A limit of 0, or an empty string, means
    /// unlimited.
    SetRules {
        #[structopt(parse(try_from_str))]
        rules: QuotaRules,
    },
    /// Delete abandoned deliveries from tmp/.
    Clean,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let options = Options::from_clap(&match Options::clap().get_matches_safe()
    {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let mut system_config = match options.config {
        None => SystemConfig::default(),
        Some(ref path) => {
            let mut system_config_toml = Vec::new();
            if let Err(e) = fs::File::open(path)
                .and_then(|mut f| f.read_to_end(&mut system_config_toml))
            {
                die!(EX_CONFIG, "Error reading '{}': {}", path.display(), e);
            }

            match toml::from_slice(&system_config_toml) {
                Ok(config) => config,
                Err(e) => die!(
                    EX_CONFIG,
                    "Error in config file at '{}': {}",
                    path.display(),
                    e
                ),
            }
        }
    };

    if options.non_blocking {
        system_config.lock.blocking = false;
    }

    init_log(options.log_config.as_ref());

    if let Err(exit) = super::quota::run(&system_config, options) {
        exit.exit();
    }
}

fn init_log(log_config_file: Option<&PathBuf>) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log(log::LevelFilter::Info);
    } else if let Some(log_config_file) = log_config_file {
        log4rs::init_file(log_config_file, log4rs::file::Deserializers::new())
            .expect("Failed to initialise logging");
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_MAIL,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        let logger =
            syslog::unix(formatter).expect("Failed to connect to syslog");
        log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
            .map(|_| log::set_max_level(log::LevelFilter::Info))
            .expect("Failed to initialise logging");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        Options::from_clap(&Options::clap().get_matches_from_safe(args).unwrap())
    }

    #[test]
    fn parse_commands() {
        let options = parse(&["maildirquota", "/mail", "usage", "--repair"]);
        assert_eq!(PathBuf::from("/mail"), options.maildir);
        assert!(matches!(options.command, Command::Usage { repair: true }));

        let options = parse(&["maildirquota", "--non-blocking", "/m", "recount"]);
        assert!(options.non_blocking);
        assert!(matches!(options.command, Command::Recount));

        match parse(&["maildirquota", "/m", "set-rules", "1kS,10C"]).command {
            Command::SetRules { rules } => {
                assert_eq!(Some(1024), rules.storage_limit());
                assert_eq!(Some(10), rules.count_limit());
            }
            _ => panic!("Wrong command"),
        }

        assert!(Options::clap()
            .get_matches_from_safe(&["maildirquota", "/m", "set-rules", "10X"])
            .is_err());
    }
}
