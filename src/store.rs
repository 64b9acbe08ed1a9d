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

//! Ledger store boundary.
//!
//! Durable persistence is an external concern; the engine talks to it
//! through [`LedgerStore`]. The store is append-mostly: invoices and their
//! items are immutable once committed, apart from the invoice status
//! field. A commit is a single atomic unit: a pass that dies before
//! commit leaves nothing behind.

use crate::base::{AccountId, InvoiceId};
use crate::error::BillingError;
use crate::invoice::{Invoice, InvoiceStatus};
use dashmap::DashMap;

/// Durable collection of invoices keyed by account.
pub trait LedgerStore: Send + Sync {
    /// All invoices for the account, oldest first, voided included.
    fn invoices_for_account(&self, account: AccountId) -> Vec<Invoice>;

    fn invoice(&self, id: InvoiceId) -> Option<Invoice>;

    /// Atomically persists a committed invoice with all its items.
    fn commit(&self, invoice: Invoice) -> Result<(), BillingError>;

    /// Applies a monotonic status transition to a stored invoice.
    fn set_status(&self, id: InvoiceId, status: InvoiceStatus) -> Result<(), BillingError>;
}

/// In-memory ledger store.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    invoices: DashMap<InvoiceId, Invoice>,
    /// Insertion-ordered invoice ids per account.
    by_account: DashMap<AccountId, Vec<InvoiceId>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            invoices: DashMap::new(),
            by_account: DashMap::new(),
        }
    }
}

impl LedgerStore for MemoryLedger {
    fn invoices_for_account(&self, account: AccountId) -> Vec<Invoice> {
        let Some(ids) = self.by_account.get(&account) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.invoices.get(id).map(|entry| entry.clone()))
            .collect()
    }

    fn invoice(&self, id: InvoiceId) -> Option<Invoice> {
        self.invoices.get(&id).map(|entry| entry.clone())
    }

    fn commit(&self, invoice: Invoice) -> Result<(), BillingError> {
        if invoice.status != InvoiceStatus::Committed {
            return Err(BillingError::CommitFailed(format!(
                "refusing to store invoice in status {}",
                invoice.status
            )));
        }
        if invoice.items.is_empty() {
            return Err(BillingError::CommitFailed(
                "refusing to store an invoice with no items".to_string(),
            ));
        }
        if invoice.items.iter().any(|item| item.invoice_id != invoice.id) {
            return Err(BillingError::CommitFailed(
                "item does not belong to this invoice".to_string(),
            ));
        }
        if self.invoices.contains_key(&invoice.id) {
            return Err(BillingError::CommitFailed(format!(
                "invoice {} already committed",
                invoice.id
            )));
        }

        let account = invoice.account_id;
        let id = invoice.id;
        self.invoices.insert(id, invoice);
        self.by_account.entry(account).or_default().push(id);
        Ok(())
    }

    fn set_status(&self, id: InvoiceId, status: InvoiceStatus) -> Result<(), BillingError> {
        let mut invoice = self
            .invoices
            .get_mut(&id)
            .ok_or(BillingError::UnknownInvoice)?;
        invoice.transition(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::Currency;
    use crate::item::{InvoiceItem, ItemKind};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn committed_invoice(account: AccountId) -> Invoice {
        let id = InvoiceId::new();
        let item = InvoiceItem::new(
            ItemKind::Fixed,
            id,
            None,
            date(2015, 6, 14),
            None,
            dec!(10.00),
        );
        let mut invoice = Invoice::draft(
            id,
            account,
            date(2015, 6, 14),
            date(2015, 6, 14),
            Currency::Usd,
            vec![item],
        );
        invoice.transition(InvoiceStatus::Committed).unwrap();
        invoice
    }

    #[test]
    fn commit_then_fetch() {
        let store = MemoryLedger::new();
        let account = AccountId::new();
        let invoice = committed_invoice(account);
        let id = invoice.id;
        store.commit(invoice).unwrap();

        assert_eq!(store.invoices_for_account(account).len(), 1);
        assert!(store.invoice(id).is_some());
    }

    #[test]
    fn invoices_keep_insertion_order() {
        let store = MemoryLedger::new();
        let account = AccountId::new();
        let first = committed_invoice(account);
        let second = committed_invoice(account);
        let (first_id, second_id) = (first.id, second.id);
        store.commit(first).unwrap();
        store.commit(second).unwrap();

        let fetched = store.invoices_for_account(account);
        assert_eq!(fetched[0].id, first_id);
        assert_eq!(fetched[1].id, second_id);
    }

    #[test]
    fn empty_invoice_is_rejected() {
        let store = MemoryLedger::new();
        let account = AccountId::new();
        let mut invoice = committed_invoice(account);
        invoice.items.clear();

        assert!(matches!(
            store.commit(invoice),
            Err(BillingError::CommitFailed(_))
        ));
        assert!(store.invoices_for_account(account).is_empty());
    }

    #[test]
    fn duplicate_commit_is_rejected() {
        let store = MemoryLedger::new();
        let account = AccountId::new();
        let invoice = committed_invoice(account);
        store.commit(invoice.clone()).unwrap();

        assert!(matches!(
            store.commit(invoice),
            Err(BillingError::CommitFailed(_))
        ));
        assert_eq!(store.invoices_for_account(account).len(), 1);
    }

    #[test]
    fn status_updates_are_monotonic() {
        let store = MemoryLedger::new();
        let account = AccountId::new();
        let invoice = committed_invoice(account);
        let id = invoice.id;
        store.commit(invoice).unwrap();

        store.set_status(id, InvoiceStatus::Void).unwrap();
        let result = store.set_status(id, InvoiceStatus::Paid);
        assert!(matches!(
            result,
            Err(BillingError::InvalidTransition { .. })
        ));
        assert_eq!(store.invoice(id).unwrap().status, InvoiceStatus::Void);
    }

    #[test]
    fn unknown_invoice_status_update_fails() {
        let store = MemoryLedger::new();
        assert_eq!(
            store.set_status(InvoiceId::new(), InvoiceStatus::Void),
            Err(BillingError::UnknownInvoice)
        );
    }
}
