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

//! Invoices: dated groupings of items for one account.
//!
//! Status follows a monotonic state machine:
//!
//! ```text
//! Draft ──commit──► Committed ──pay──► Paid
//!                        │
//!                        └──void──► Void
//! ```
//!
//! `Committed -> Void` is allowed only when no successful, non-refunded
//! payment is applied; that precondition lives in the void handler, which
//! consults the payment collaborator.

use crate::base::{AccountId, InvoiceId};
use crate::error::BillingError;
use crate::item::InvoiceItem;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Invoice lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Committed,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Committed => "committed",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }

    /// Transitions are monotonic; `Paid` and `Void` are terminal.
    pub fn can_transition_to(&self, to: InvoiceStatus) -> bool {
        matches!(
            (self, to),
            (InvoiceStatus::Draft, InvoiceStatus::Committed)
                | (InvoiceStatus::Committed, InvoiceStatus::Paid)
                | (InvoiceStatus::Committed, InvoiceStatus::Void)
        )
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ISO currency for the amounts on an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dated grouping of invoice items for one account.
///
/// Invoices are never created empty: a reconciliation pass that produces
/// no items produces no invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub account_id: AccountId,
    pub invoice_date: NaiveDate,
    pub target_date: NaiveDate,
    pub status: InvoiceStatus,
    pub currency: Currency,
    pub items: Vec<InvoiceItem>,
}

impl Invoice {
    pub fn draft(
        id: InvoiceId,
        account_id: AccountId,
        invoice_date: NaiveDate,
        target_date: NaiveDate,
        currency: Currency,
        items: Vec<InvoiceItem>,
    ) -> Self {
        Self {
            id,
            account_id,
            invoice_date,
            target_date,
            status: InvoiceStatus::Draft,
            currency,
            items,
        }
    }

    /// Sum of item amounts, before payments.
    pub fn raw_balance(&self) -> Decimal {
        self.items.iter().map(|item| item.amount).sum()
    }

    /// Applies a monotonic status transition.
    ///
    /// # Errors
    ///
    /// [`BillingError::InvalidTransition`] when the transition would move
    /// backwards or out of a terminal status.
    pub fn transition(&mut self, to: InvoiceStatus) -> Result<(), BillingError> {
        if !self.status.can_transition_to(to) {
            return Err(BillingError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn invoice_with_amounts(amounts: &[Decimal]) -> Invoice {
        let id = InvoiceId::new();
        let items = amounts
            .iter()
            .map(|amount| {
                InvoiceItem::new(
                    ItemKind::Fixed,
                    id,
                    None,
                    date(2015, 6, 14),
                    None,
                    *amount,
                )
            })
            .collect();
        Invoice::draft(
            id,
            AccountId::new(),
            date(2015, 6, 14),
            date(2015, 6, 14),
            Currency::Usd,
            items,
        )
    }

    #[test]
    fn raw_balance_sums_items() {
        let invoice = invoice_with_amounts(&[dec!(100.00), dec!(-30.00), dec!(5.50)]);
        assert_eq!(invoice.raw_balance(), dec!(75.50));
    }

    #[test]
    fn transitions_are_monotonic() {
        let mut invoice = invoice_with_amounts(&[dec!(10.00)]);
        invoice.transition(InvoiceStatus::Committed).unwrap();
        invoice.transition(InvoiceStatus::Void).unwrap();

        let result = invoice.transition(InvoiceStatus::Committed);
        assert_eq!(
            result,
            Err(BillingError::InvalidTransition {
                from: InvoiceStatus::Void,
                to: InvoiceStatus::Committed,
            })
        );
    }

    #[test]
    fn draft_cannot_void() {
        let mut invoice = invoice_with_amounts(&[dec!(10.00)]);
        assert!(invoice.transition(InvoiceStatus::Void).is_err());
    }

    #[test]
    fn paid_is_terminal() {
        let mut invoice = invoice_with_amounts(&[dec!(10.00)]);
        invoice.transition(InvoiceStatus::Committed).unwrap();
        invoice.transition(InvoiceStatus::Paid).unwrap();
        assert!(invoice.transition(InvoiceStatus::Void).is_err());
    }
}
