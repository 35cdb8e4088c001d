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

use std::fmt;

/// Measured usage of a mailbox.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuotaUsage {
    /// Total size of all counted messages, in bytes.
    pub bytes: u64,
    /// Number of counted messages.
    pub count: u64,
}

impl QuotaUsage {
    pub fn new(bytes: u64, count: u64) -> Self {
        QuotaUsage { bytes, count }
    }

    /// Apply signed deltas to this usage, clamping each field at 0.
    ///
    /// Returns the new usage and, if either field would have gone negative,
    /// by how much.
    pub fn apply_delta(
        self,
        byte_delta: i64,
        count_delta: i64,
    ) -> (QuotaUsage, Option<ClampAnomaly>) {
        let (bytes, bytes_shortfall) = clamped_add(self.bytes, byte_delta);
        let (count, count_shortfall) = clamped_add(self.count, count_delta);

        let anomaly = if 0 != bytes_shortfall || 0 != count_shortfall {
            Some(ClampAnomaly {
                bytes_shortfall,
                count_shortfall,
            })
        } else {
            None
        };

        (QuotaUsage { bytes, count }, anomaly)
    }
}

impl fmt::Display for QuotaUsage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.bytes, self.count)
    }
}

/// Returns `(max(0, base + delta), max(0, -(base + delta)))`, saturating at
/// `u64::MAX` on the way up.
fn clamped_add(base: u64, delta: i64) -> (u64, u64) {
    if delta >= 0 {
        (base.saturating_add(delta as u64), 0)
    } else {
        let magnitude = delta.unsigned_abs();
        if magnitude > base {
            (0, magnitude - base)
        } else {
            (base - magnitude, 0)
        }
    }
}

/// Reported when an incremental update would have driven usage below zero.
///
/// This is not an error; it means the recorded usage had drifted from the
/// real contents of the mailbox, which a recount will fix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClampAnomaly {
    /// How many bytes below zero the unclamped result was.
    pub bytes_shortfall: u64,
    /// How many messages below zero the unclamped result was.
    pub count_shortfall: u64,
}

/// The result of `QuotaStore::apply_delta`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeltaOutcome {
    /// The usage now recorded.
    pub usage: QuotaUsage,
    /// Set if the result had to be clamped at 0.
    pub clamped: Option<ClampAnomaly>,
}
