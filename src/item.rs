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

//! Invoice items, the atomic unit of financial effect.
//!
//! Items are created once and never mutated or deleted after commit; every
//! correction is an additive reversal. A [`ItemKind::RepairAdj`] item
//! carries a link to the item it reverses and negates its amount.

use crate::base::{InvoiceId, ItemId, SubscriptionId};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of financial effect an item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// One-off charge at a point date.
    Fixed,
    /// Charge for a recurring billing span.
    Recurring,
    /// Reversal of a previously committed item.
    RepairAdj,
    /// Credit-balance adjustment: positive generates credit for the
    /// account, negative consumes it.
    CbaAdj,
    /// Account-level credit granted by a billing fact (negative amount on
    /// the invoice it lands on).
    CreditAdj,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Fixed => "fixed",
            ItemKind::Recurring => "recurring",
            ItemKind::RepairAdj => "repair_adj",
            ItemKind::CbaAdj => "cba_adj",
            ItemKind::CreditAdj => "credit_adj",
        }
    }

    /// Chargeable kinds participate in generation diffs and can be
    /// reversed by repairs. Credit machinery (`CbaAdj`) and repairs
    /// themselves are excluded.
    pub fn is_chargeable(&self) -> bool {
        matches!(
            self,
            ItemKind::Fixed | ItemKind::Recurring | ItemKind::CreditAdj
        )
    }
}

/// Value identity of an item for generation diffs.
///
/// Two items with equal keys represent the same financial fact; matching is
/// multiset-based so duplicate facts (two identical charges on one day)
/// pair up one-to-one.
pub type ItemKey = (
    ItemKind,
    Option<SubscriptionId>,
    NaiveDate,
    Option<NaiveDate>,
    Decimal,
);

/// A single invoice item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: ItemId,
    pub kind: ItemKind,
    pub invoice_id: InvoiceId,
    /// `None` for account-level items (fixed account charges, credits).
    pub subscription_id: Option<SubscriptionId>,
    pub start: NaiveDate,
    /// `None` for point items.
    pub end: Option<NaiveDate>,
    /// Signed; repairs and consumed credit are negative.
    pub amount: Decimal,
    /// For repairs, the item this one reverses.
    pub linked_item_id: Option<ItemId>,
}

impl InvoiceItem {
    pub fn new(
        kind: ItemKind,
        invoice_id: InvoiceId,
        subscription_id: Option<SubscriptionId>,
        start: NaiveDate,
        end: Option<NaiveDate>,
        amount: Decimal,
    ) -> Self {
        Self {
            id: ItemId::new(),
            kind,
            invoice_id,
            subscription_id,
            start,
            end,
            amount,
            linked_item_id: None,
        }
    }

    /// Builds the reversing item for `original` on invoice `invoice_id`:
    /// same span, negated amount, link back to the original.
    pub fn repair_of(original: &InvoiceItem, invoice_id: InvoiceId) -> Self {
        Self {
            id: ItemId::new(),
            kind: ItemKind::RepairAdj,
            invoice_id,
            subscription_id: original.subscription_id,
            start: original.start,
            end: original.end,
            amount: -original.amount,
            linked_item_id: Some(original.id),
        }
    }

    /// Builds a credit-balance adjustment on `invoice_id`. Positive
    /// `amount` generates credit, negative consumes it.
    pub fn cba(invoice_id: InvoiceId, date: NaiveDate, amount: Decimal) -> Self {
        Self::new(ItemKind::CbaAdj, invoice_id, None, date, None, amount)
    }

    pub fn key(&self) -> ItemKey {
        (
            self.kind,
            self.subscription_id,
            self.start,
            self.end,
            self.amount,
        )
    }
}
