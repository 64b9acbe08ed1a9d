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

//! Property-based tests for the reconciliation engine.
//!
//! These verify invariants that should hold for any fact stream: repairs
//! always resolve and negate their originals, reconciliation is
//! idempotent, generated invoices never go negative, and available credit
//! never goes negative.

use chrono::{Days, NaiveDate};
use invoice_ledger_rs::{
    AccountId, BillingActionPolicy, BillingFact, BillingPeriod, CreditLedger, Dispatcher,
    FlatPricer, InvoiceId, InvoiceStatus, ItemKind, MemoryFacts, MemoryLedger, MemoryPayments,
    StaticTags, SubscriptionId,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2015, 1, 1).unwrap()
}

/// Positive amounts with two decimal places, 1.00 to 1000.00.
fn arb_rate() -> impl Strategy<Value = Decimal> {
    (100i64..=100_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Day offsets within roughly one year.
fn arb_offset() -> impl Strategy<Value = u64> {
    0u64..365
}

/// One subscription: monthly rate, start offset, optional cancel offset
/// relative to the start.
fn arb_subscription() -> impl Strategy<Value = (Decimal, u64, Option<u64>)> {
    (arb_rate(), arb_offset(), prop::option::of(1u64..120))
}

struct Harness {
    engine: Dispatcher,
    facts: Arc<MemoryFacts>,
    pricer: Arc<FlatPricer>,
}

fn harness() -> Harness {
    let facts = Arc::new(MemoryFacts::new());
    let pricer = Arc::new(FlatPricer::new());
    let engine = Dispatcher::new(
        Arc::new(MemoryLedger::new()),
        facts.clone(),
        pricer.clone(),
        Arc::new(MemoryPayments::new()),
        Arc::new(StaticTags::new()),
    );
    Harness {
        engine,
        facts,
        pricer,
    }
}

/// Seeds the harness and runs two passes: one before the cancellations
/// are known, one after, so retroactive repairs actually happen.
fn run_lifecycle(
    harness: &Harness,
    account: AccountId,
    subscriptions: &[(Decimal, u64, Option<u64>)],
) {
    let mut cancels = Vec::new();
    for (rate, start_offset, cancel_offset) in subscriptions {
        let subscription = SubscriptionId::new();
        let start = base_date() + Days::new(*start_offset);
        harness
            .pricer
            .set_rate(subscription, *rate, BillingPeriod::Monthly);
        harness.facts.push(
            account,
            BillingFact::SubscriptionStart {
                subscription_id: subscription,
                effective: start,
                period: BillingPeriod::Monthly,
            },
        );
        if let Some(offset) = cancel_offset {
            cancels.push(BillingFact::SubscriptionCancel {
                subscription_id: subscription,
                requested: start + Days::new(*offset),
                policy: BillingActionPolicy::Immediate,
            });
        }
    }

    let mid = base_date() + Days::new(200);
    let late = base_date() + Days::new(500);
    harness.engine.reconcile(account, mid).unwrap();
    for cancel in cancels {
        harness.facts.push(account, cancel);
    }
    harness.engine.reconcile(account, late).unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Reconciling twice with no new facts commits nothing the second
    /// time.
    #[test]
    fn reconcile_is_idempotent(
        subscriptions in prop::collection::vec(arb_subscription(), 1..4),
    ) {
        let harness = harness();
        let account = AccountId::new();
        run_lifecycle(&harness, account, &subscriptions);

        let before = harness.engine.invoices_for_account(account, true).len();
        let again = harness
            .engine
            .reconcile(account, base_date() + Days::new(500))
            .unwrap();
        prop_assert!(again.is_none());
        prop_assert_eq!(
            harness.engine.invoices_for_account(account, true).len(),
            before
        );
    }

    /// Every repair in the committed ledger resolves to an existing item
    /// and negates its amount.
    #[test]
    fn repairs_resolve_and_negate(
        subscriptions in prop::collection::vec(arb_subscription(), 1..4),
    ) {
        let harness = harness();
        let account = AccountId::new();
        run_lifecycle(&harness, account, &subscriptions);

        let invoices = harness.engine.invoices_for_account(account, true);
        let mut arena = HashMap::new();
        for invoice in &invoices {
            for item in &invoice.items {
                arena.insert(item.id, item);
            }
        }
        for invoice in &invoices {
            for item in &invoice.items {
                if item.kind != ItemKind::RepairAdj {
                    continue;
                }
                let linked = item.linked_item_id;
                prop_assert!(linked.is_some());
                let original = arena.get(&linked.unwrap());
                prop_assert!(original.is_some());
                prop_assert_eq!(item.amount, -original.unwrap().amount);
            }
        }

        // And the balance derivation sees no consistency violation.
        prop_assert!(harness.engine.account_balance(account).is_ok());
    }

    /// Generation never commits an invoice with a negative balance; the
    /// excess of any repair-heavy pass converts to credit instead.
    #[test]
    fn generated_invoices_never_negative(
        subscriptions in prop::collection::vec(arb_subscription(), 1..4),
    ) {
        let harness = harness();
        let account = AccountId::new();
        run_lifecycle(&harness, account, &subscriptions);

        for invoice in harness.engine.invoices_for_account(account, true) {
            prop_assert!(invoice.status != InvoiceStatus::Draft);
            prop_assert!(invoice.raw_balance() >= Decimal::ZERO);
        }
        prop_assert!(harness.engine.account_credit(account) >= Decimal::ZERO);
    }

    /// Available credit never goes negative, whatever the sequence of
    /// grants and consumes.
    #[test]
    fn credit_never_negative(
        operations in prop::collection::vec((0u8..3, arb_rate()), 1..40),
    ) {
        let ledger = CreditLedger::new();
        let account = AccountId::new();

        for (op, amount) in operations {
            let source = InvoiceId::new();
            match op {
                0 => {
                    ledger.grant(account, amount, source).unwrap();
                }
                1 => {
                    // May fail with insufficient credit; that's the point.
                    let _ = ledger.consume(account, amount, source);
                }
                _ => {
                    ledger.restore(account, amount, source).unwrap();
                }
            }
            prop_assert!(ledger.available(account) >= Decimal::ZERO);
        }
    }
}
