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

//! Encoding of the quota control file.
//!
//! The control file lives in the mailbox root and looks like
//!
//! ```text
//! maildirquota 1
//! <bytes> <messages>
//! <rule string>
//! ```
//!
//! It is always replaced atomically, so it can be read without holding the
//! quota lock.
//!
//! Files written by other Maildir++ implementations are also understood:
//! those put the rule string on the first line and follow it with any number
//! of signed `<bytes> <messages>` lines which are summed together. Such files
//! are converted to the format above the next time they are written.

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::SystemTime;

use log::warn;

use super::model::QuotaUsage;
use super::rules::QuotaRules;
use crate::support::error::Error;
use crate::support::file_ops;

pub const FORMAT_MARKER: &str = "maildirquota 1";

/// The usage and rules stored in a control file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControlRecord {
    pub usage: QuotaUsage,
    pub rules: QuotaRules,
}

/// Which layout a control file was found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlFormat {
    Current,
    /// A Maildir++ file from another implementation. `oversized` is set if
    /// the file has grown past the point where it should be rebuilt from a
    /// recount.
    Legacy { oversized: bool },
}

/// A control file as read from disk.
#[derive(Clone, Debug)]
pub struct ControlSnapshot {
    pub record: ControlRecord,
    pub format: ControlFormat,
    pub modified: SystemTime,
}

impl ControlRecord {
    pub fn encode(&self) -> String {
        format!(
            "{}\n{} {}\n{}\n",
            FORMAT_MARKER, self.usage.bytes, self.usage.count, self.rules
        )
    }

    /// Decode the content of a control file.
    ///
    /// On failure, returns a description of what is wrong.
    pub fn decode(data: &str) -> Result<(Self, ControlFormat), String> {
        let mut lines = data.lines();
        let first = lines.next().ok_or("empty file")?;

        if FORMAT_MARKER == first.trim_end() {
            let usage_line = lines.next().ok_or("missing usage line")?;
            let usage = parse_usage(usage_line)?;
            let rules = QuotaRules::parse(lines.next().unwrap_or(""))
                .map_err(|e| e.to_string())?;

            if lines.any(|l| !l.trim().is_empty()) {
                return Err("trailing garbage".to_owned());
            }

            Ok((ControlRecord { usage, rules }, ControlFormat::Current))
        } else {
            let rules = QuotaRules::parse(first).map_err(|e| {
                format!("unknown format marker or {}", e)
            })?;

            let mut bytes = 0i128;
            let mut count = 0i128;
            let mut any_usage = false;
            for line in lines.filter(|l| !l.trim().is_empty()) {
                let (b, c) = parse_signed_usage(line)?;
                bytes += i128::from(b);
                count += i128::from(c);
                any_usage = true;
            }

            if !any_usage {
                return Err("missing usage line".to_owned());
            }

            if bytes < 0 || count < 0 {
                warn!(
                    "Legacy quota file sums to negative usage ({} {}); \
                     treating as 0",
                    bytes, count
                );
            }

            let usage = QuotaUsage::new(clamp_u64(bytes), clamp_u64(count));
            Ok((
                ControlRecord { usage, rules },
                ControlFormat::Legacy { oversized: false },
            ))
        }
    }
}

fn parse_usage(line: &str) -> Result<QuotaUsage, String> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(bytes), Some(count), None) => Ok(QuotaUsage::new(
            bytes
                .parse()
                .map_err(|_| format!("bad byte count {:?}", bytes))?,
            count
                .parse()
                .map_err(|_| format!("bad message count {:?}", count))?,
        )),
        _ => Err(format!("bad usage line {:?}", line)),
    }
}

fn parse_signed_usage(line: &str) -> Result<(i64, i64), String> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(bytes), Some(count), None) => Ok((
            bytes
                .parse()
                .map_err(|_| format!("bad byte delta {:?}", bytes))?,
            count
                .parse()
                .map_err(|_| format!("bad message delta {:?}", count))?,
        )),
        _ => Err(format!("bad usage line {:?}", line)),
    }
}

fn clamp_u64(v: i128) -> u64 {
    if v < 0 {
        0
    } else if v > i128::from(u64::MAX) {
        u64::MAX
    } else {
        v as u64
    }
}

/// Read and decode the control file at `path`.
///
/// Returns `None` if there is no control file. Legacy files larger than
/// `legacy_size_limit` bytes are flagged as oversized.
pub fn read(
    path: &Path,
    legacy_size_limit: u64,
) -> Result<Option<ControlSnapshot>, Error> {
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if io::ErrorKind::NotFound == e.kind() => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata()?;
    let mut data = String::new();
    match file.read_to_string(&mut data) {
        Ok(_) => (),
        Err(e) if io::ErrorKind::InvalidData == e.kind() => {
            return Err(corrupt(path, "not valid UTF-8"));
        }
        Err(e) => return Err(e.into()),
    }

    let (record, mut format) =
        ControlRecord::decode(&data).map_err(|reason| corrupt(path, reason))?;
    if let ControlFormat::Legacy { ref mut oversized } = format {
        *oversized = data.len() as u64 > legacy_size_limit;
    }

    Ok(Some(ControlSnapshot {
        record,
        format,
        modified: metadata.modified()?,
    }))
}

/// Atomically replace the control file at `path` with `record`.
///
/// The new content is staged in `tmp`, which must be on the same file system.
pub fn write(
    tmp: &Path,
    path: &Path,
    record: &ControlRecord,
) -> Result<(), Error> {
    file_ops::spit(tmp, path, true, 0o600, record.encode().as_bytes())?;
    Ok(())
}

fn corrupt(path: &Path, reason: impl Into<String>) -> Error {
    Error::CorruptControlFile {
        path: path.to_owned(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode(s: &str) -> (ControlRecord, ControlFormat) {
        ControlRecord::decode(s).unwrap()
    }

    #[test]
    fn current_format() {
        let record = ControlRecord {
            usage: QuotaUsage::new(600, 3),
            rules: QuotaRules::parse("10S,100C").unwrap(),
        };
        let encoded = record.encode();
        assert_eq!("maildirquota 1\n600 3\n10S,100C\n", encoded);
        assert_eq!((record, ControlFormat::Current), decode(&encoded));

        let (unlimited, _) = decode("maildirquota 1\n5 1\n\n");
        assert_eq!(QuotaUsage::new(5, 1), unlimited.usage);
        assert!(unlimited.rules.is_unlimited());

        let (no_rule_line, _) = decode("maildirquota 1\n5 1");
        assert!(no_rule_line.rules.rules().is_empty());
    }

    #[test]
    fn current_format_corruption() {
        for bad in &[
            "",
            "maildirquota 1\n",
            "maildirquota 1\nfoo bar\n\n",
            "maildirquota 1\n-1 1\n\n",
            "maildirquota 1\n1\n\n",
            "maildirquota 1\n1 2 3\n\n",
            "maildirquota 1\n1 2\n10X\n",
            "maildirquota 1\n1 2\n10S\nmore\n",
            "maildirquota 2\n1 2\n10S\n",
        ] {
            assert!(ControlRecord::decode(bad).is_err(), "Accepted {:?}", bad);
        }
    }

    #[test]
    fn legacy_format() {
        let (record, format) = decode("1000S,10C\n300 3\n50 1\n-100 -1\n");
        assert_eq!(ControlFormat::Legacy { oversized: false }, format);
        assert_eq!(QuotaUsage::new(250, 3), record.usage);
        assert_eq!(Some(1000), record.rules.storage_limit());

        // Courier writes an empty rule line when there is no quota
        let (record, _) = decode("\n12 1\n");
        assert_eq!(QuotaUsage::new(12, 1), record.usage);
        assert!(record.rules.is_unlimited());

        let (record, _) = decode("10C\n5 1\n-50 -3\n");
        assert_eq!(QuotaUsage::new(0, 0), record.usage);

        assert!(ControlRecord::decode("10C\n").is_err());
        assert!(ControlRecord::decode("10C\nfoo\n").is_err());
        assert!(ControlRecord::decode("garbage\n1 1\n").is_err());
    }

    #[test]
    fn read_and_write() {
        let root = tempfile::TempDir::new().unwrap();
        let path = root.path().join("maildirsize");

        assert!(read(&path, 5120).unwrap().is_none());

        let record = ControlRecord {
            usage: QuotaUsage::new(42, 2),
            rules: QuotaRules::parse("1MS").unwrap(),
        };
        write(root.path(), &path, &record).unwrap();

        let snapshot = read(&path, 5120).unwrap().unwrap();
        assert_eq!(record, snapshot.record);
        assert_eq!(ControlFormat::Current, snapshot.format);

        fs::write(&path, b"\xFF\xFE\n").unwrap();
        assert_matches!(
            Err(Error::CorruptControlFile { .. }),
            read(&path, 5120)
        );

        let mut legacy = "100C\n".to_owned();
        for _ in 0..10 {
            legacy.push_str("1000 1\n");
        }
        fs::write(&path, legacy.as_bytes()).unwrap();
        let snapshot = read(&path, 5120).unwrap().unwrap();
        assert_eq!(ControlFormat::Legacy { oversized: false }, snapshot.format);
        assert_eq!(QuotaUsage::new(10_000, 10), snapshot.record.usage);
        let snapshot = read(&path, 16).unwrap().unwrap();
        assert_eq!(ControlFormat::Legacy { oversized: true }, snapshot.format);
    }
}
