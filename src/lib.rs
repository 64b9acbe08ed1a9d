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

//! # Invoice Ledger
//!
//! This library provides an invoice reconciliation engine for
//! subscription accounts. Billing facts (subscription starts,
//! cancellations, plan changes, fixed charges, credits) arrive out of
//! temporal order; the engine regenerates what *should* exist up to a
//! target date, diffs it against the committed ledger, and commits the
//! minimal set of new charges, reversing repairs, and credit-balance
//! adjustments, always additively and never by mutating committed items.
//!
//! ## Core Components
//!
//! - [`Dispatcher`]: per-account reconciliation passes, parking, queries
//! - [`generate`]: billing facts to should-exist items
//! - [`closure`]: repair-closure resolution over the committed ledger
//! - [`CreditLedger`]: per-account unconsumed credit
//! - [`BillingError`]: domain / consistency / transient error taxonomy
//!
//! ## Example
//!
//! ```
//! use invoice_ledger_rs::{
//!     AccountId, BillingFact, BillingPeriod, Dispatcher, FlatPricer, MemoryFacts,
//!     MemoryLedger, MemoryPayments, StaticTags, SubscriptionId,
//! };
//! use chrono::NaiveDate;
//! use rust_decimal_macros::dec;
//! use std::sync::Arc;
//!
//! let facts = Arc::new(MemoryFacts::new());
//! let pricer = Arc::new(FlatPricer::new());
//! let account = AccountId::new();
//! let subscription = SubscriptionId::new();
//! let start = NaiveDate::from_ymd_opt(2015, 6, 14).unwrap();
//!
//! pricer.set_rate(subscription, dec!(249.95), BillingPeriod::Monthly);
//! facts.push(
//!     account,
//!     BillingFact::SubscriptionStart {
//!         subscription_id: subscription,
//!         effective: start,
//!         period: BillingPeriod::Monthly,
//!     },
//! );
//!
//! let engine = Dispatcher::new(
//!     Arc::new(MemoryLedger::new()),
//!     facts.clone(),
//!     pricer.clone(),
//!     Arc::new(MemoryPayments::new()),
//!     Arc::new(StaticTags::new()),
//! );
//!
//! let invoice = engine.reconcile(account, start).unwrap().unwrap();
//! assert_eq!(invoice.raw_balance(), dec!(249.95));
//!
//! // Nothing new to invoice: reconciliation is idempotent.
//! assert!(engine.reconcile(account, start).unwrap().is_none());
//! ```
//!
//! ## Thread Safety
//!
//! Accounts reconcile concurrently. Each account is serialized through
//! its own exclusive lock, shared between reconciliation and void
//! handling, so the two can never interleave for one account.

pub mod closure;

mod base;
mod credit;
mod dispatcher;
pub mod error;
mod fact;
mod generator;
mod invoice;
mod item;
mod notify;
pub mod providers;
mod store;
mod void;

pub use base::{AccountId, InvoiceId, ItemId, SubscriptionId};
pub use credit::CreditLedger;
pub use dispatcher::{AttemptState, Dispatcher, DispatcherConfig, ParkDiagnostics};
pub use error::BillingError;
pub use fact::{BillingActionPolicy, BillingFact, BillingPeriod};
pub use generator::{ProposedItem, generate};
pub use invoice::{Currency, Invoice, InvoiceStatus};
pub use item::{InvoiceItem, ItemKey, ItemKind};
pub use notify::{Notification, NotificationQueue};
pub use providers::{
    FactSource, FlatPricer, MemoryFacts, MemoryPayments, Payment, PaymentSource, Pricer,
    StaticTags, TagPolicy,
};
pub use store::{LedgerStore, MemoryLedger};
