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

//! The invoice dispatcher: one reconciliation pass per account.
//!
//! Each attempt runs the state machine
//!
//! ```text
//! Requested ──► Locked ──► Generating ──► Committed
//!                               │
//!                               └──► Parked
//! ```
//!
//! Accounts reconcile concurrently, but each account is serialized
//! through its own exclusive lock, shared with the void handler. On a
//! fatal consistency violation the account is parked: automatic
//! reconciliation stops, diagnostics are recorded, and nothing is
//! committed. A parked account re-attempts from scratch on an explicit
//! trigger and un-parks only by producing a clean result.

use crate::base::{AccountId, InvoiceId, ItemId};
use crate::closure;
use crate::credit::CreditLedger;
use crate::error::BillingError;
use crate::generator;
use crate::invoice::{Currency, Invoice, InvoiceStatus};
use crate::item::InvoiceItem;
use crate::notify::{Notification, NotificationQueue};
use crate::providers::{FactSource, PaymentSource, Pricer, TagPolicy};
use crate::store::LedgerStore;
use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Engine-level settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub currency: Currency,
    /// Bound on per-account lock acquisition; expiry is reported as a
    /// retryable [`BillingError::LockTimeout`].
    pub lock_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            currency: Currency::Usd,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Reconciliation attempt states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Requested,
    Locked,
    Generating,
    Committed,
    Parked,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttemptState::Requested => "requested",
            AttemptState::Locked => "locked",
            AttemptState::Generating => "generating",
            AttemptState::Committed => "committed",
            AttemptState::Parked => "parked",
        };
        f.write_str(name)
    }
}

/// Operator-visible context for a parked account.
#[derive(Debug, Clone, PartialEq)]
pub struct ParkDiagnostics {
    pub account: AccountId,
    pub target_date: NaiveDate,
    pub failing_items: Vec<ItemId>,
    pub message: String,
}

/// Central reconciliation engine.
pub struct Dispatcher {
    pub(crate) store: Arc<dyn LedgerStore>,
    pub(crate) facts: Arc<dyn FactSource>,
    pub(crate) pricer: Arc<dyn Pricer>,
    pub(crate) payments: Arc<dyn PaymentSource>,
    pub(crate) tags: Arc<dyn TagPolicy>,
    pub(crate) credit: CreditLedger,
    /// One exclusive lock per account, shared by reconcile and void.
    pub(crate) locks: DashMap<AccountId, Arc<Mutex<()>>>,
    pub(crate) parked: DashMap<AccountId, ParkDiagnostics>,
    pub(crate) notifications: NotificationQueue,
    pub(crate) config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        facts: Arc<dyn FactSource>,
        pricer: Arc<dyn Pricer>,
        payments: Arc<dyn PaymentSource>,
        tags: Arc<dyn TagPolicy>,
    ) -> Self {
        Self::with_config(store, facts, pricer, payments, tags, DispatcherConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn LedgerStore>,
        facts: Arc<dyn FactSource>,
        pricer: Arc<dyn Pricer>,
        payments: Arc<dyn PaymentSource>,
        tags: Arc<dyn TagPolicy>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            facts,
            pricer,
            payments,
            tags,
            credit: CreditLedger::new(),
            locks: DashMap::new(),
            parked: DashMap::new(),
            notifications: NotificationQueue::new(),
            config,
        }
    }

    pub(crate) fn account_lock(&self, account: AccountId) -> Arc<Mutex<()>> {
        self.locks
            .entry(account)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn advance(&self, account: AccountId, state: &mut AttemptState, to: AttemptState) {
        tracing::debug!(account = %account, from = %state, to = %to, "reconcile attempt");
        *state = to;
    }

    /// Runs one reconciliation pass for the account, explicitly triggered.
    ///
    /// Returns the newly committed invoice, or `None` when the ledger
    /// already matches the fact stream (a second invocation with no new
    /// facts is a no-op). A pass on a parked account re-attempts from
    /// scratch and un-parks on a clean result.
    ///
    /// # Errors
    ///
    /// - [`BillingError::LockTimeout`]: retryable, nothing happened.
    /// - [`BillingError::AccountParked`]: a fatal consistency violation
    ///   was detected; diagnostics are available via
    ///   [`Self::park_diagnostics`] and nothing was committed.
    pub fn reconcile(
        &self,
        account: AccountId,
        target_date: NaiveDate,
    ) -> Result<Option<Invoice>, BillingError> {
        let mut state = AttemptState::Requested;
        let lock = self.account_lock(account);
        let Some(_guard) = lock.try_lock_for(self.config.lock_timeout) else {
            return Err(BillingError::LockTimeout);
        };
        self.advance(account, &mut state, AttemptState::Locked);
        self.advance(account, &mut state, AttemptState::Generating);

        match self.generate_pass(account, target_date) {
            Ok(outcome) => {
                self.parked.remove(&account);
                self.advance(account, &mut state, AttemptState::Committed);
                Ok(outcome)
            }
            Err(error) if error.is_consistency() => {
                self.park(account, target_date, &error);
                self.advance(account, &mut state, AttemptState::Parked);
                Err(BillingError::AccountParked { account })
            }
            Err(error) => Err(error),
        }
    }

    /// Scheduler entry point: like [`Self::reconcile`] but refuses to
    /// touch a parked account.
    pub fn reconcile_auto(
        &self,
        account: AccountId,
        target_date: NaiveDate,
    ) -> Result<Option<Invoice>, BillingError> {
        if self.parked.contains_key(&account) {
            return Err(BillingError::AccountParked { account });
        }
        self.reconcile(account, target_date)
    }

    /// Generation and atomic commit; runs with the account lock held.
    fn generate_pass(
        &self,
        account: AccountId,
        target: NaiveDate,
    ) -> Result<Option<Invoice>, BillingError> {
        let facts = self.facts.facts_for_account(account, target);
        let proposed = generator::generate(&facts, target, self.pricer.as_ref());
        let committed = self.store.invoices_for_account(account);
        if committed
            .iter()
            .any(|invoice| invoice.currency != self.config.currency)
        {
            return Err(BillingError::CurrencyMismatch);
        }
        let resolution = closure::resolve(proposed, &committed)?;

        if resolution.new_items.is_empty() && resolution.repaired.is_empty() {
            tracing::debug!(account = %account, target = %target, "nothing to invoice");
            return Ok(None);
        }

        let invoice_id = InvoiceId::new();
        let mut items: Vec<InvoiceItem> = resolution
            .new_items
            .into_iter()
            .map(|proposal| proposal.into_item(invoice_id))
            .collect();
        for original in &resolution.repaired {
            items.push(InvoiceItem::repair_of(original, invoice_id));
        }

        // Credit settlement: a negative draft converts its excess to
        // generated credit; a positive draft consumes available credit.
        let net: Decimal = items.iter().map(|item| item.amount).sum();
        let mut granted = Decimal::ZERO;
        let mut consumed = Decimal::ZERO;
        if net < Decimal::ZERO {
            granted = -net;
            items.push(InvoiceItem::cba(invoice_id, target, granted));
        } else if net > Decimal::ZERO {
            consumed = net.min(self.credit.available(account));
            if consumed > Decimal::ZERO {
                items.push(InvoiceItem::cba(invoice_id, target, -consumed));
            }
        }

        let mut invoice = Invoice::draft(
            invoice_id,
            account,
            target,
            target,
            self.config.currency,
            items,
        );
        invoice.transition(InvoiceStatus::Committed)?;
        self.store.commit(invoice.clone())?;

        if granted > Decimal::ZERO {
            self.credit.grant(account, granted, invoice_id)?;
        }
        if consumed > Decimal::ZERO {
            self.credit.consume(account, consumed, invoice_id)?;
        }

        tracing::info!(
            account = %account,
            invoice = %invoice.id,
            items = invoice.items.len(),
            balance = %invoice.raw_balance(),
            "invoice committed"
        );

        self.notifications.push(Notification::InvoiceCommitted {
            account,
            invoice: invoice.id,
        });
        let balance = invoice.raw_balance();
        if balance > Decimal::ZERO && !self.tags.is_auto_pay_off(account) {
            self.notifications.push(Notification::PaymentRequested {
                account,
                invoice: invoice.id,
                amount: balance,
            });
        }

        Ok(Some(invoice))
    }

    pub(crate) fn park(&self, account: AccountId, target_date: NaiveDate, error: &BillingError) {
        tracing::warn!(
            account = %account,
            target = %target_date,
            error = %error,
            "illegal invoicing state detected, parking account"
        );
        self.parked.insert(
            account,
            ParkDiagnostics {
                account,
                target_date,
                failing_items: error.failing_items(),
                message: error.to_string(),
            },
        );
    }

    pub fn is_parked(&self, account: AccountId) -> bool {
        self.parked.contains_key(&account)
    }

    pub fn park_diagnostics(&self, account: AccountId) -> Option<ParkDiagnostics> {
        self.parked.get(&account).map(|entry| entry.clone())
    }

    /// Operator override: clears the parked flag without reconciling.
    pub fn clear_park(&self, account: AccountId) {
        self.parked.remove(&account);
    }

    /// Invoices for the account in commit order, optionally including
    /// voided ones.
    pub fn invoices_for_account(&self, account: AccountId, include_voided: bool) -> Vec<Invoice> {
        self.store
            .invoices_for_account(account)
            .into_iter()
            .filter(|invoice| include_voided || invoice.status != InvoiceStatus::Void)
            .collect()
    }

    pub fn invoice(&self, id: InvoiceId) -> Option<Invoice> {
        self.store.invoice(id)
    }

    /// Outstanding balance: live item amounts on non-void invoices minus
    /// applied payments.
    ///
    /// # Errors
    ///
    /// Consistency violations in the committed ledger surface here the
    /// same way they do during generation.
    pub fn account_balance(&self, account: AccountId) -> Result<Decimal, BillingError> {
        let invoices = self.store.invoices_for_account(account);
        let netted = closure::net_closure(&invoices)?;

        let mut applied: HashMap<InvoiceId, Decimal> = HashMap::new();
        for payment in self.payments.payments_for_account(account) {
            *applied.entry(payment.invoice_id).or_default() += payment.applied();
        }

        let mut balance = Decimal::ZERO;
        for invoice in invoices
            .iter()
            .filter(|invoice| invoice.status != InvoiceStatus::Void)
        {
            let items: Decimal = invoice
                .items
                .iter()
                .filter(|item| !netted.contains(&item.id))
                .map(|item| item.amount)
                .sum();
            balance += items - applied.get(&invoice.id).copied().unwrap_or_default();
        }
        Ok(balance)
    }

    /// Unconsumed credit available to the account.
    pub fn account_credit(&self, account: AccountId) -> Decimal {
        self.credit.available(account)
    }

    /// Removes and returns all pending post-commit notifications.
    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.notifications.drain()
    }
}
