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

//! External collaborator boundaries.
//!
//! Accounts, catalog pricing, payments, and tag policies live outside this
//! crate; the engine consumes them through the traits here. The in-memory
//! implementations double as fixtures for the CLI, tests, and benches.

use crate::base::{AccountId, InvoiceId, SubscriptionId};
use crate::fact::{BillingActionPolicy, BillingFact, BillingPeriod};
use chrono::NaiveDate;
use dashmap::{DashMap, DashSet};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Source of billing facts per account.
pub trait FactSource: Send + Sync {
    /// Facts effective up to `as_of`, ordered by effective date.
    fn facts_for_account(&self, account: AccountId, as_of: NaiveDate) -> Vec<BillingFact>;
}

/// Pricing/catalog collaborator: proration and cancellation policy.
pub trait Pricer: Send + Sync {
    /// Price for a subscription span `[start, end)`, prorated however the
    /// catalog sees fit.
    fn price_span(
        &self,
        subscription: SubscriptionId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Decimal;

    /// Maps a cancellation's requested date to the date billing actually
    /// stops. The default follows the policy literally; catalogs with
    /// richer entitlement rules override this.
    fn billing_cutoff(
        &self,
        _subscription: SubscriptionId,
        requested: NaiveDate,
        policy: BillingActionPolicy,
        period_end: NaiveDate,
    ) -> NaiveDate {
        match policy {
            BillingActionPolicy::Immediate => requested,
            BillingActionPolicy::EndOfTerm => period_end,
        }
    }
}

/// A payment as seen by the payment subsystem. Read-only here; the void
/// handler only checks preconditions against it.
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: InvoiceId,
    pub amount: Decimal,
    pub refunded: Decimal,
    pub succeeded: bool,
}

impl Payment {
    /// Amount still applied against the invoice.
    pub fn applied(&self) -> Decimal {
        if self.succeeded {
            self.amount - self.refunded
        } else {
            Decimal::ZERO
        }
    }
}

/// Read access to the payment subsystem.
pub trait PaymentSource: Send + Sync {
    fn payments_for_account(&self, account: AccountId) -> Vec<Payment>;
}

/// Tag-based policy switches consulted before side effects.
pub trait TagPolicy: Send + Sync {
    /// When true, the dispatcher does not request payment after commit.
    fn is_auto_pay_off(&self, account: AccountId) -> bool;
}

/// In-memory fact source keyed by account.
#[derive(Debug, Default)]
pub struct MemoryFacts {
    facts: DashMap<AccountId, Vec<BillingFact>>,
}

impl MemoryFacts {
    pub fn new() -> Self {
        Self {
            facts: DashMap::new(),
        }
    }

    pub fn push(&self, account: AccountId, fact: BillingFact) {
        self.facts.entry(account).or_default().push(fact);
    }
}

impl FactSource for MemoryFacts {
    fn facts_for_account(&self, account: AccountId, as_of: NaiveDate) -> Vec<BillingFact> {
        let mut facts: Vec<BillingFact> = self
            .facts
            .get(&account)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|fact| fact.effective() <= as_of)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        facts.sort_by_key(|fact| fact.effective());
        facts
    }
}

/// Flat-rate pricer: one rate per subscription and period, prorated by
/// day for partial spans, rounded to currency scale.
#[derive(Debug, Default)]
pub struct FlatPricer {
    rates: DashMap<SubscriptionId, (Decimal, BillingPeriod)>,
}

impl FlatPricer {
    pub fn new() -> Self {
        Self {
            rates: DashMap::new(),
        }
    }

    pub fn set_rate(&self, subscription: SubscriptionId, rate: Decimal, period: BillingPeriod) {
        self.rates.insert(subscription, (rate, period));
    }
}

impl Pricer for FlatPricer {
    fn price_span(
        &self,
        subscription: SubscriptionId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Decimal {
        let Some(entry) = self.rates.get(&subscription) else {
            return Decimal::ZERO;
        };
        let (rate, period) = *entry;

        let period_end = period.boundary(start, 1);
        if end == period_end {
            return rate;
        }
        let span_days = Decimal::from((end - start).num_days());
        let period_days = Decimal::from((period_end - start).num_days());
        (rate * span_days / period_days).round_dp(2)
    }
}

/// In-memory payment records keyed by account.
#[derive(Debug, Default)]
pub struct MemoryPayments {
    payments: DashMap<AccountId, Vec<Payment>>,
}

impl MemoryPayments {
    pub fn new() -> Self {
        Self {
            payments: DashMap::new(),
        }
    }

    pub fn push(&self, account: AccountId, payment: Payment) {
        self.payments.entry(account).or_default().push(payment);
    }

    /// Marks an amount of an existing payment as refunded.
    pub fn refund(&self, account: AccountId, payment_id: Uuid, amount: Decimal) {
        if let Some(mut entry) = self.payments.get_mut(&account) {
            for payment in entry.iter_mut() {
                if payment.id == payment_id {
                    payment.refunded += amount;
                }
            }
        }
    }
}

impl PaymentSource for MemoryPayments {
    fn payments_for_account(&self, account: AccountId) -> Vec<Payment> {
        self.payments
            .get(&account)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }
}

/// Static tag set; only the auto-pay-off switch matters to this crate.
#[derive(Debug, Default)]
pub struct StaticTags {
    auto_pay_off: DashSet<AccountId>,
}

impl StaticTags {
    pub fn new() -> Self {
        Self {
            auto_pay_off: DashSet::new(),
        }
    }

    pub fn set_auto_pay_off(&self, account: AccountId, off: bool) {
        if off {
            self.auto_pay_off.insert(account);
        } else {
            self.auto_pay_off.remove(&account);
        }
    }
}

impl TagPolicy for StaticTags {
    fn is_auto_pay_off(&self, account: AccountId) -> bool {
        self.auto_pay_off.contains(&account)
    }
}
