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

//! The Maildir++ quota rule mini-language.
//!
//! A rule string is a comma-separated list of limits, such as `10S,100C`:
//! at most 10 bytes of storage and at most 100 messages. Storage limits may
//! carry a binary scale letter (`100kS` is 102400 bytes). A limit of 0 means
//! that dimension is unlimited, and an empty string means no limits at all.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use super::model::QuotaUsage;
use crate::support::error::Error;

/// What a `QuotaRule` limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QuotaUnit {
    /// Total message size, in bytes.
    Storage,
    /// Number of messages.
    Count,
}

impl QuotaUnit {
    fn suffix(self) -> char {
        match self {
            QuotaUnit::Storage => 'S',
            QuotaUnit::Count => 'C',
        }
    }
}

/// Multiplier applied to the magnitude of a storage rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scale {
    One,
    Kilo,
    Mega,
    Giga,
}

impl Scale {
    pub fn multiplier(self) -> u64 {
        match self {
            Scale::One => 1,
            Scale::Kilo => 1 << 10,
            Scale::Mega => 1 << 20,
            Scale::Giga => 1 << 30,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "" => Some(Scale::One),
            "k" | "K" => Some(Scale::Kilo),
            "m" | "M" => Some(Scale::Mega),
            "g" | "G" => Some(Scale::Giga),
            _ => None,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Scale::One => "",
            Scale::Kilo => "k",
            Scale::Mega => "M",
            Scale::Giga => "G",
        }
    }
}

/// A single limit, as written in the rule string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaRule {
    pub magnitude: u64,
    pub scale: Scale,
    pub unit: QuotaUnit,
}

impl QuotaRule {
    /// The effective limit, in bytes or messages. 0 means unlimited.
    pub fn limit(&self) -> u64 {
        self.magnitude.saturating_mul(self.scale.multiplier())
    }

    fn parse(fragment: &str) -> Result<Self, Error> {
        lazy_static! {
            static ref FRAGMENT: Regex =
                Regex::new("^([0-9]+)([a-zA-Z]?)([SC])$").unwrap();
        }

        let captures = FRAGMENT.captures(fragment).ok_or_else(|| {
            Error::MalformedRule(format!("unrecognised limit {:?}", fragment))
        })?;

        let unit = if "S" == &captures[3] {
            QuotaUnit::Storage
        } else {
            QuotaUnit::Count
        };

        let scale = Scale::parse(&captures[2])
            .filter(|&s| Scale::One == s || QuotaUnit::Storage == unit)
            .ok_or_else(|| {
                Error::MalformedRule(format!(
                    "bad scale in {:?}",
                    fragment
                ))
            })?;

        let magnitude = captures[1].parse::<u64>().map_err(|_| {
            Error::MalformedRule(format!("{:?} is too large", fragment))
        })?;
        if magnitude.checked_mul(scale.multiplier()).is_none() {
            return Err(Error::MalformedRule(format!(
                "{:?} is too large",
                fragment
            )));
        }

        Ok(QuotaRule {
            magnitude,
            scale,
            unit,
        })
    }
}

impl fmt::Display for QuotaRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.magnitude,
            self.scale.prefix(),
            self.unit.suffix()
        )
    }
}

/// A parsed quota rule string.
///
/// The empty rule set is valid and imposes no limits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuotaRules {
    rules: Vec<QuotaRule>,
}

impl QuotaRules {
    /// The rule set without any limits.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Parse a rule string such as `10S,100C`.
    ///
    /// Leading and trailing whitespace is ignored. Every fragment must be
    /// well-formed and each unit may appear only once; nothing is skipped.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::unlimited());
        }

        let mut rules = Vec::<QuotaRule>::new();
        for fragment in s.split(',') {
            if fragment.is_empty() {
                return Err(Error::MalformedRule(format!(
                    "empty limit in {:?}",
                    s
                )));
            }

            let rule = QuotaRule::parse(fragment)?;
            if rules.iter().any(|r| r.unit == rule.unit) {
                return Err(Error::MalformedRule(format!(
                    "more than one {} limit in {:?}",
                    rule.unit.suffix(),
                    s
                )));
            }

            rules.push(rule);
        }

        Ok(QuotaRules { rules })
    }

    /// Render these rules back into a rule string that `parse` accepts.
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    pub fn rules(&self) -> &[QuotaRule] {
        &self.rules
    }

    /// Whether no dimension is limited.
    pub fn is_unlimited(&self) -> bool {
        self.rules.iter().all(|r| 0 == r.limit())
    }

    /// The storage limit in bytes, if one is present and non-zero.
    pub fn storage_limit(&self) -> Option<u64> {
        self.limit(QuotaUnit::Storage)
    }

    /// The message count limit, if one is present and non-zero.
    pub fn count_limit(&self) -> Option<u64> {
        self.limit(QuotaUnit::Count)
    }

    fn limit(&self, unit: QuotaUnit) -> Option<u64> {
        self.rules
            .iter()
            .find(|r| unit == r.unit)
            .map(QuotaRule::limit)
            .filter(|&l| 0 != l)
    }

    /// Whether `usage` is strictly over any of the limits.
    pub fn exceeds(&self, usage: &QuotaUsage) -> bool {
        self.storage_limit().map_or(false, |l| usage.bytes > l)
            || self.count_limit().map_or(false, |l| usage.count > l)
    }
}

impl fmt::Display for QuotaRules {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (ix, rule) in self.rules.iter().enumerate() {
            if ix > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", rule)?;
        }
        Ok(())
    }
}

impl FromStr for QuotaRules {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        QuotaRules::parse(s)
    }
}
