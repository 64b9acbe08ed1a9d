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

//! Error types for invoice reconciliation and void handling.
//!
//! Errors fall into three classes:
//! - **Domain errors**: expected, reported to the caller, no side effect.
//! - **Consistency errors**: fatal for the account; the dispatcher parks
//!   the account instead of committing. Retrying with the same inputs
//!   reproduces the same result, so these are never retried automatically.
//! - **Transient errors**: retryable (lock timeout, commit failure); the
//!   pass leaves no partial state behind.

use crate::base::{AccountId, ItemId};
use crate::invoice::InvoiceStatus;
use thiserror::Error;

/// Billing engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    /// Invoice is already void
    #[error("invoice is already void")]
    AlreadyVoid,

    /// Invoice has a successful, non-refunded payment applied
    #[error("cannot void an invoice that is paid")]
    CannotVoidPaid,

    /// Operation requires a committed invoice
    #[error("invoice has not been committed")]
    NotCommitted,

    /// Credit consumption exceeds the available balance
    #[error("insufficient credit available")]
    InsufficientCredit,

    /// Amount is zero or negative where a positive amount is required
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Invoice status transitions are monotonic
    #[error("invalid invoice status transition: {from} -> {to}")]
    InvalidTransition {
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    /// Referenced invoice does not exist
    #[error("invoice not found")]
    UnknownInvoice,

    /// Account reconciliation is parked pending operator intervention
    #[error("account {account} is parked")]
    AccountParked { account: AccountId },

    /// A repair item carries no link to the item it reverses
    #[error("repair item {item} has no linked item")]
    UnlinkedRepair { item: ItemId },

    /// A repair item's link does not resolve to a committed item
    #[error("missing linked item {linked} for repair item {item}")]
    MissingLinkedItem { item: ItemId, linked: ItemId },

    /// Repair links form a cycle
    #[error("repair link cycle detected at item {item}")]
    RepairCycle { item: ItemId },

    /// A reconciliation pass mixed more than one currency
    #[error("mixed currencies in one reconciliation pass")]
    CurrencyMismatch,

    /// Per-account lock could not be acquired within the timeout
    #[error("timed out waiting for the account lock")]
    LockTimeout,

    /// Ledger store rejected the commit
    #[error("ledger commit failed: {0}")]
    CommitFailed(String),
}

impl BillingError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyVoid => "ALREADY_VOID",
            Self::CannotVoidPaid => "ALREADY_PAID",
            Self::NotCommitted => "NOT_COMMITTED",
            Self::InsufficientCredit => "INSUFFICIENT_CREDIT",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::UnknownInvoice => "UNKNOWN_INVOICE",
            Self::AccountParked { .. } => "ACCOUNT_PARKED",
            Self::UnlinkedRepair { .. } => "UNLINKED_REPAIR",
            Self::MissingLinkedItem { .. } => "MISSING_LINKED_ITEM",
            Self::RepairCycle { .. } => "REPAIR_CYCLE",
            Self::CurrencyMismatch => "CURRENCY_MISMATCH",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::CommitFailed(_) => "COMMIT_FAILED",
        }
    }

    /// True for fatal ledger-consistency violations that park the account.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            Self::UnlinkedRepair { .. }
                | Self::MissingLinkedItem { .. }
                | Self::RepairCycle { .. }
                | Self::CurrencyMismatch
        )
    }

    /// True for retryable failures that leave no partial state.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::LockTimeout | Self::CommitFailed(_))
    }

    /// Item identifiers involved in a consistency violation, for parking
    /// diagnostics.
    pub fn failing_items(&self) -> Vec<ItemId> {
        match self {
            Self::UnlinkedRepair { item } => vec![*item],
            Self::MissingLinkedItem { item, linked } => vec![*item, *linked],
            Self::RepairCycle { item } => vec![*item],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BillingError;
    use crate::base::ItemId;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            BillingError::AlreadyVoid.to_string(),
            "invoice is already void"
        );
        assert_eq!(
            BillingError::CannotVoidPaid.to_string(),
            "cannot void an invoice that is paid"
        );
        assert_eq!(
            BillingError::InsufficientCredit.to_string(),
            "insufficient credit available"
        );
        assert_eq!(
            BillingError::LockTimeout.to_string(),
            "timed out waiting for the account lock"
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(BillingError::AlreadyVoid.code(), "ALREADY_VOID");
        assert_eq!(BillingError::CannotVoidPaid.code(), "ALREADY_PAID");
        assert_eq!(BillingError::InsufficientCredit.code(), "INSUFFICIENT_CREDIT");
    }

    #[test]
    fn classification() {
        let item = ItemId::new();
        let linked = ItemId::new();
        let missing = BillingError::MissingLinkedItem { item, linked };
        assert!(missing.is_consistency());
        assert!(!missing.is_transient());
        assert_eq!(missing.failing_items(), vec![item, linked]);

        assert!(BillingError::LockTimeout.is_transient());
        assert!(!BillingError::LockTimeout.is_consistency());
        assert!(!BillingError::CannotVoidPaid.is_consistency());
        assert!(!BillingError::CannotVoidPaid.is_transient());
    }

    #[test]
    fn errors_are_cloneable() {
        let error = BillingError::InsufficientCredit;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
