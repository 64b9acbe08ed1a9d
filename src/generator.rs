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

//! Item generation: billing facts in, should-exist items out.
//!
//! Generation is a pure function of the fact stream, the target date, and
//! the pricing collaborator. It never consults the committed ledger; the
//! resolver in [`crate::closure`] diffs its output against what was
//! committed, which is how retroactive facts turn into repairs instead of
//! in-place mutation.
//!
//! Billing runs in advance: a recurring span is proposed as soon as its
//! start date reaches the target date.

use crate::base::{InvoiceId, SubscriptionId};
use crate::fact::{BillingActionPolicy, BillingFact, BillingPeriod};
use crate::item::{InvoiceItem, ItemKey, ItemKind};
use crate::providers::Pricer;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// An item the generator says should exist. Identifiers are assigned when
/// the dispatcher materializes the item onto an invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedItem {
    pub kind: ItemKind,
    pub subscription_id: Option<SubscriptionId>,
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
    pub amount: Decimal,
}

impl ProposedItem {
    pub fn key(&self) -> ItemKey {
        (
            self.kind,
            self.subscription_id,
            self.start,
            self.end,
            self.amount,
        )
    }

    pub fn into_item(self, invoice_id: InvoiceId) -> InvoiceItem {
        InvoiceItem::new(
            self.kind,
            invoice_id,
            self.subscription_id,
            self.start,
            self.end,
            self.amount,
        )
    }
}

/// Per-subscription view of the fact stream.
#[derive(Debug)]
struct Timeline {
    start: NaiveDate,
    period: BillingPeriod,
    changes: Vec<NaiveDate>,
    cancel: Option<(NaiveDate, BillingActionPolicy)>,
}

/// Produces the ordered sequence of items that should exist for every
/// subscription span up to `target`.
///
/// Deterministic: a fixed fact stream and target date always yield the
/// same sequence. Zero-duration spans produce no item.
pub fn generate(
    facts: &[BillingFact],
    target: NaiveDate,
    pricer: &dyn Pricer,
) -> Vec<ProposedItem> {
    let mut sorted: Vec<BillingFact> = facts.to_vec();
    sorted.sort_by_key(BillingFact::effective);

    let mut timelines: BTreeMap<SubscriptionId, Timeline> = BTreeMap::new();
    let mut proposed = Vec::new();

    for fact in &sorted {
        match *fact {
            BillingFact::SubscriptionStart {
                subscription_id,
                effective,
                period,
            } => {
                // First start wins; duplicates are producer noise.
                timelines.entry(subscription_id).or_insert(Timeline {
                    start: effective,
                    period,
                    changes: Vec::new(),
                    cancel: None,
                });
            }
            BillingFact::SubscriptionChange {
                subscription_id,
                effective,
            } => {
                if let Some(timeline) = timelines.get_mut(&subscription_id) {
                    timeline.changes.push(effective);
                }
            }
            BillingFact::SubscriptionCancel {
                subscription_id,
                requested,
                policy,
            } => {
                if let Some(timeline) = timelines.get_mut(&subscription_id) {
                    timeline.cancel = Some((requested, policy));
                }
            }
            BillingFact::FixedCharge {
                subscription_id,
                effective,
                amount,
            } => {
                if effective <= target {
                    proposed.push(ProposedItem {
                        kind: ItemKind::Fixed,
                        subscription_id,
                        start: effective,
                        end: None,
                        amount,
                    });
                }
            }
            BillingFact::Credit { effective, amount } => {
                if effective <= target {
                    // Credit lands negative on its invoice; the matching
                    // positive CBA is appended at settlement.
                    proposed.push(ProposedItem {
                        kind: ItemKind::CreditAdj,
                        subscription_id: None,
                        start: effective,
                        end: None,
                        amount: -amount,
                    });
                }
            }
        }
    }

    for (subscription_id, timeline) in &timelines {
        recurring_spans(*subscription_id, timeline, target, pricer, &mut proposed);
    }

    proposed
}

/// Walks period boundaries anchored at the subscription start, splitting
/// at change dates and truncating at the billing-effective cancellation
/// cutoff.
fn recurring_spans(
    subscription_id: SubscriptionId,
    timeline: &Timeline,
    target: NaiveDate,
    pricer: &dyn Pricer,
    out: &mut Vec<ProposedItem>,
) {
    let cutoff = timeline.cancel.map(|(requested, policy)| {
        let period_end = period_end_containing(timeline, requested);
        pricer.billing_cutoff(subscription_id, requested, policy, period_end)
    });

    let mut n = 0u32;
    loop {
        let span_start = timeline.period.boundary(timeline.start, n);
        if span_start > target {
            break;
        }
        if let Some(cutoff) = cutoff {
            if span_start >= cutoff {
                break;
            }
        }

        let mut span_end = timeline.period.boundary(timeline.start, n + 1);
        if let Some(cutoff) = cutoff {
            span_end = span_end.min(cutoff);
        }

        // Change dates inside the span force pricing boundaries.
        let mut bounds = vec![span_start];
        for change in &timeline.changes {
            if *change > span_start && *change < span_end {
                bounds.push(*change);
            }
        }
        bounds.push(span_end);
        bounds.sort();

        for pair in bounds.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a == b {
                continue;
            }
            out.push(ProposedItem {
                kind: ItemKind::Recurring,
                subscription_id: Some(subscription_id),
                start: a,
                end: Some(b),
                amount: pricer.price_span(subscription_id, a, b),
            });
        }

        n += 1;
    }
}

/// End of the billing period containing `date` (the next boundary at or
/// after it). Dates before the subscription start map to the start, so a
/// pre-start cancellation yields no spans at all.
fn period_end_containing(timeline: &Timeline, date: NaiveDate) -> NaiveDate {
    if date < timeline.start {
        return timeline.start;
    }
    let mut n = 0u32;
    loop {
        let boundary = timeline.period.boundary(timeline.start, n + 1);
        if boundary > date {
            return boundary;
        }
        n += 1;
    }
}
