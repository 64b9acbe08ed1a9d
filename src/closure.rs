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

//! Repair closure resolution.
//!
//! The resolver compares the generator's should-exist set against what was
//! previously committed and classifies every item: untouched, new, or
//! repaired. Repairs are walked transitively over an arena of items
//! indexed by identifier, so repairs-of-repairs reach their terminal item
//! and a dangling link is detected rather than silently dropped.
//!
//! The arena spans *all* committed items, including those on VOID
//! invoices: a repair committed before its target's invoice was voided
//! must still resolve. Liveness is a separate question: items on VOID
//! invoices are absent from the live set, and a repair whose terminal
//! target sits on a VOID invoice is neutralized along with it.

use crate::base::{InvoiceId, ItemId};
use crate::error::BillingError;
use crate::generator::ProposedItem;
use crate::invoice::{Invoice, InvoiceStatus};
use crate::item::{InvoiceItem, ItemKey};
use std::collections::{HashMap, HashSet};

/// Outcome of diffing a should-exist set against the committed ledger.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Committed items confirmed by the should-exist set; left alone.
    pub untouched: Vec<ItemId>,
    /// Should-exist items with no committed counterpart; to be added.
    pub new_items: Vec<ProposedItem>,
    /// Committed items invalidated by the should-exist set; each gets
    /// exactly one reversing repair.
    pub repaired: Vec<InvoiceItem>,
}

/// Item ids netted out of the live set: originals reversed by live
/// repairs, the repairs themselves, and orphaned repairs whose terminal
/// target lives on a VOID invoice.
///
/// # Errors
///
/// Fatal consistency violations: a repair without a link, a link that
/// resolves to no committed item (the "missing cancelled item" failure
/// class), or a link cycle. Callers must halt reconciliation for the
/// account rather than commit.
pub fn net_closure(invoices: &[Invoice]) -> Result<HashSet<ItemId>, BillingError> {
    let mut arena: HashMap<ItemId, &InvoiceItem> = HashMap::new();
    let mut voided: HashSet<InvoiceId> = HashSet::new();
    for invoice in invoices {
        if invoice.status == InvoiceStatus::Void {
            voided.insert(invoice.id);
        }
        for item in &invoice.items {
            arena.insert(item.id, item);
        }
    }

    let mut netted = HashSet::new();
    for invoice in invoices {
        if invoice.status == InvoiceStatus::Void {
            continue;
        }
        for item in &invoice.items {
            if item.kind != crate::item::ItemKind::RepairAdj {
                continue;
            }
            let terminal = walk_to_terminal(item, &arena)?;
            netted.insert(item.id);
            if !voided.contains(&terminal.invoice_id) {
                netted.insert(terminal.id);
            }
        }
    }
    Ok(netted)
}

/// Follows a repair's link chain to the first non-repair item.
fn walk_to_terminal<'a>(
    repair: &'a InvoiceItem,
    arena: &HashMap<ItemId, &'a InvoiceItem>,
) -> Result<&'a InvoiceItem, BillingError> {
    let mut seen: HashSet<ItemId> = HashSet::from([repair.id]);
    let mut current = repair;
    loop {
        let linked = current
            .linked_item_id
            .ok_or(BillingError::UnlinkedRepair { item: current.id })?;
        let target = *arena
            .get(&linked)
            .ok_or(BillingError::MissingLinkedItem {
                item: current.id,
                linked,
            })?;
        if target.kind != crate::item::ItemKind::RepairAdj {
            return Ok(target);
        }
        if !seen.insert(target.id) {
            return Err(BillingError::RepairCycle { item: target.id });
        }
        current = target;
    }
}

/// Chargeable items on non-VOID invoices, minus the net closure.
pub fn live_items<'a>(
    invoices: &'a [Invoice],
    netted: &HashSet<ItemId>,
) -> Vec<&'a InvoiceItem> {
    invoices
        .iter()
        .filter(|invoice| invoice.status != InvoiceStatus::Void)
        .flat_map(|invoice| invoice.items.iter())
        .filter(|item| item.kind.is_chargeable() && !netted.contains(&item.id))
        .collect()
}

/// Diffs the should-exist set against the committed ledger.
///
/// Matching is by value key with multiset semantics: each committed item
/// pairs with at most one proposed item. Unmatched proposed items become
/// new items; unmatched live committed items are returned for repair.
pub fn resolve(
    proposed: Vec<ProposedItem>,
    invoices: &[Invoice],
) -> Result<Resolution, BillingError> {
    let netted = net_closure(invoices)?;
    let live = live_items(invoices, &netted);

    let mut by_key: HashMap<ItemKey, Vec<&InvoiceItem>> = HashMap::new();
    for item in live {
        by_key.entry(item.key()).or_default().push(item);
    }

    let mut resolution = Resolution::default();
    for proposal in proposed {
        match by_key.get_mut(&proposal.key()).and_then(Vec::pop) {
            Some(existing) => resolution.untouched.push(existing.id),
            None => resolution.new_items.push(proposal),
        }
    }
    for (_, leftovers) in by_key {
        for item in leftovers {
            resolution.repaired.push(item.clone());
        }
    }
    // Deterministic repair order regardless of hash iteration.
    resolution.repaired.sort_by_key(|item| (item.start, item.id));

    Ok(resolution)
}
