// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Billing facts: the dated external events that drive generation.
//!
//! Facts are ordered by effective date, not by when they were recorded; a
//! fact may land retroactively inside already-invoiced spans, which is
//! what the repair machinery exists for.

use crate::base::SubscriptionId;
use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Billing period of a recurring subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Monthly,
    Annual,
}

impl BillingPeriod {
    fn months(&self) -> u32 {
        match self {
            BillingPeriod::Monthly => 1,
            BillingPeriod::Annual => 12,
        }
    }

    /// The `n`-th period boundary anchored at `start`. Anchoring at the
    /// start date (rather than advancing from the previous boundary)
    /// keeps the billing day stable across short months.
    pub fn boundary(&self, start: NaiveDate, n: u32) -> NaiveDate {
        start
            .checked_add_months(Months::new(n * self.months()))
            .expect("billing span beyond representable dates")
    }
}

/// How a cancellation maps its requested date to a billing-effective one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingActionPolicy {
    /// Billing stops at the requested date; the open span is truncated.
    Immediate,
    /// Billing runs to the end of the period containing the requested
    /// date.
    EndOfTerm,
}

/// A dated external event driving invoice generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingFact {
    SubscriptionStart {
        subscription_id: SubscriptionId,
        effective: NaiveDate,
        period: BillingPeriod,
    },
    /// Plan change; forces a span boundary so pricing can differ on each
    /// side.
    SubscriptionChange {
        subscription_id: SubscriptionId,
        effective: NaiveDate,
    },
    SubscriptionCancel {
        subscription_id: SubscriptionId,
        requested: NaiveDate,
        policy: BillingActionPolicy,
    },
    FixedCharge {
        subscription_id: Option<SubscriptionId>,
        effective: NaiveDate,
        amount: Decimal,
    },
    /// Account-level credit; generates a credit invoice and available
    /// credit for later consumption.
    Credit {
        effective: NaiveDate,
        amount: Decimal,
    },
}

impl BillingFact {
    pub fn effective(&self) -> NaiveDate {
        match self {
            Self::SubscriptionStart { effective, .. } => *effective,
            Self::SubscriptionChange { effective, .. } => *effective,
            Self::SubscriptionCancel { requested, .. } => *requested,
            Self::FixedCharge { effective, .. } => *effective,
            Self::Credit { effective, .. } => *effective,
        }
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        match self {
            Self::SubscriptionStart {
                subscription_id, ..
            } => Some(*subscription_id),
            Self::SubscriptionChange {
                subscription_id, ..
            } => Some(*subscription_id),
            Self::SubscriptionCancel {
                subscription_id, ..
            } => Some(*subscription_id),
            Self::FixedCharge {
                subscription_id, ..
            } => *subscription_id,
            Self::Credit { .. } => None,
        }
    }
}
