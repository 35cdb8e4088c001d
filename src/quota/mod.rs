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
//! `QuotaStore` tracks how many bytes and messages a mailbox holds and keeps
//! that in a control file in the mailbox root, alongside the `QuotaRules`
//! limiting the mailbox. Quotas are only reported, never enforced.

pub mod control_file;
pub mod model;
pub mod rules;
pub mod store;

pub use self::model::{ClampAnomaly, DeltaOutcome, QuotaUsage};
pub use self::rules::{QuotaRule, QuotaRules, QuotaUnit, Scale};
pub use self::store::QuotaStore;
