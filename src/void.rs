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

//! Void handling.
//!
//! Voiding flips a committed, unpaid invoice to VOID and emits one
//! reversing repair item for each of its items still live in the ledger,
//! onto a new invoice. Items already netted by earlier repairs get no
//! second reversal; the same closure walk that drives generation decides
//! what is still live, which is what keeps voiding an already-repaired
//! invoice from double-reversing or dangling.
//!
//! The voided invoice's own items are never mutated or deleted; they stay
//! visible for audit. Credit the invoice consumed is restored; credit it
//! generated is revoked.

use crate::base::InvoiceId;
use crate::closure;
use crate::dispatcher::Dispatcher;
use crate::error::BillingError;
use crate::invoice::{Invoice, InvoiceStatus};
use crate::item::{InvoiceItem, ItemKind};
use crate::notify::Notification;
use rust_decimal::Decimal;

impl Dispatcher {
    /// Voids a committed invoice.
    ///
    /// Returns the reversing invoice when one was generated (`None` when
    /// every item of the voided invoice was already netted by earlier
    /// repairs). Shares the per-account lock with reconciliation, so a
    /// void and a generation pass can never interleave.
    ///
    /// # Errors
    ///
    /// All preconditions are checked before any mutation; on error the
    /// ledger is untouched.
    ///
    /// - [`BillingError::UnknownInvoice`]: no such invoice.
    /// - [`BillingError::AlreadyVoid`]: the invoice is already void.
    /// - [`BillingError::NotCommitted`]: still a draft.
    /// - [`BillingError::CannotVoidPaid`]: a successful payment is
    ///   applied and not fully refunded.
    /// - [`BillingError::InsufficientCredit`]: the invoice generated
    ///   credit that has since been spent; voiding it would drive the
    ///   account's credit negative.
    /// - [`BillingError::LockTimeout`]: retryable.
    pub fn void_invoice(&self, invoice_id: InvoiceId) -> Result<Option<Invoice>, BillingError> {
        let probe = self
            .store
            .invoice(invoice_id)
            .ok_or(BillingError::UnknownInvoice)?;
        let account = probe.account_id;

        let lock = self.account_lock(account);
        let Some(_guard) = lock.try_lock_for(self.config.lock_timeout) else {
            return Err(BillingError::LockTimeout);
        };

        // Re-fetch under the lock; the probe may be stale.
        let invoice = self
            .store
            .invoice(invoice_id)
            .ok_or(BillingError::UnknownInvoice)?;
        match invoice.status {
            InvoiceStatus::Void => return Err(BillingError::AlreadyVoid),
            InvoiceStatus::Draft => return Err(BillingError::NotCommitted),
            InvoiceStatus::Paid => return Err(BillingError::CannotVoidPaid),
            InvoiceStatus::Committed => {}
        }

        let applied: Decimal = self
            .payments
            .payments_for_account(account)
            .iter()
            .filter(|payment| payment.invoice_id == invoice_id)
            .map(|payment| payment.applied())
            .sum();
        if applied > Decimal::ZERO {
            return Err(BillingError::CannotVoidPaid);
        }

        let committed = self.store.invoices_for_account(account);
        let netted = match closure::net_closure(&committed) {
            Ok(netted) => netted,
            Err(error) if error.is_consistency() => {
                self.park(account, invoice.target_date, &error);
                return Err(BillingError::AccountParked { account });
            }
            Err(error) => return Err(error),
        };

        // Net credit this invoice moved: negative means it consumed
        // credit, positive means it generated some.
        let cba_net: Decimal = invoice
            .items
            .iter()
            .filter(|item| item.kind == ItemKind::CbaAdj)
            .map(|item| item.amount)
            .sum();
        if cba_net > Decimal::ZERO && self.credit.available(account) < cba_net {
            return Err(BillingError::InsufficientCredit);
        }

        let still_live: Vec<&InvoiceItem> = invoice
            .items
            .iter()
            .filter(|item| item.kind.is_chargeable() && !netted.contains(&item.id))
            .collect();

        let reversing = if still_live.is_empty() {
            None
        } else {
            let reversing_id = InvoiceId::new();
            let items = still_live
                .iter()
                .map(|original| InvoiceItem::repair_of(original, reversing_id))
                .collect();
            let mut reversing = Invoice::draft(
                reversing_id,
                account,
                invoice.target_date,
                invoice.target_date,
                invoice.currency,
                items,
            );
            reversing.transition(InvoiceStatus::Committed)?;
            self.store.commit(reversing.clone())?;
            Some(reversing)
        };

        self.store.set_status(invoice_id, InvoiceStatus::Void)?;

        if cba_net < Decimal::ZERO {
            self.credit.restore(account, -cba_net, invoice_id)?;
        } else if cba_net > Decimal::ZERO {
            self.credit.revoke(account, cba_net, invoice_id)?;
        }

        tracing::info!(
            account = %account,
            invoice = %invoice_id,
            reversing_items = reversing.as_ref().map(|r| r.items.len()).unwrap_or(0),
            "invoice voided"
        );

        self.notifications.push(Notification::InvoiceVoided {
            account,
            invoice: invoice_id,
        });
        if let Some(reversing) = &reversing {
            self.notifications.push(Notification::InvoiceCommitted {
                account,
                invoice: reversing.id,
            });
        }

        Ok(reversing)
    }
}
