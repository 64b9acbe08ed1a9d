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

//! Credit ledger: per-account running balance of unconsumed credit.
//!
//! The balance mirrors the credit-balance-adjustment items on the
//! account's invoices: generation grants or consumes, void handling
//! restores or revokes. Every mutation names the invoice it stems from,
//! so credit stays traceable to its source. Available credit is never
//! negative; a consume request exceeding it is rejected, never clamped.

use crate::base::{AccountId, InvoiceId};
use crate::error::BillingError;
use dashmap::DashMap;
use rust_decimal::Decimal;

/// Per-account credit balances.
#[derive(Debug, Default)]
pub struct CreditLedger {
    balances: DashMap<AccountId, Decimal>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self {
            balances: DashMap::new(),
        }
    }

    /// Unconsumed credit available to the account.
    pub fn available(&self, account: AccountId) -> Decimal {
        self.balances
            .get(&account)
            .map(|entry| *entry)
            .unwrap_or(Decimal::ZERO)
    }

    /// Adds credit generated on `source`.
    pub fn grant(
        &self,
        account: AccountId,
        amount: Decimal,
        source: InvoiceId,
    ) -> Result<(), BillingError> {
        if amount <= Decimal::ZERO {
            return Err(BillingError::InvalidAmount);
        }
        let mut balance = self.balances.entry(account).or_insert(Decimal::ZERO);
        *balance += amount;
        tracing::debug!(account = %account, source = %source, amount = %amount, "credit granted");
        Ok(())
    }

    /// Spends credit against `source`.
    ///
    /// # Errors
    ///
    /// [`BillingError::InsufficientCredit`] when `amount` exceeds the
    /// available balance; the balance is left untouched.
    pub fn consume(
        &self,
        account: AccountId,
        amount: Decimal,
        source: InvoiceId,
    ) -> Result<(), BillingError> {
        if amount <= Decimal::ZERO {
            return Err(BillingError::InvalidAmount);
        }
        let mut balance = self.balances.entry(account).or_insert(Decimal::ZERO);
        if *balance < amount {
            return Err(BillingError::InsufficientCredit);
        }
        *balance -= amount;
        debug_assert!(
            *balance >= Decimal::ZERO,
            "available credit went negative: {}",
            *balance
        );
        tracing::debug!(account = %account, source = %source, amount = %amount, "credit consumed");
        Ok(())
    }

    /// Returns credit that the now-voided `source` had consumed.
    pub fn restore(
        &self,
        account: AccountId,
        amount: Decimal,
        source: InvoiceId,
    ) -> Result<(), BillingError> {
        if amount <= Decimal::ZERO {
            return Err(BillingError::InvalidAmount);
        }
        let mut balance = self.balances.entry(account).or_insert(Decimal::ZERO);
        *balance += amount;
        tracing::debug!(account = %account, source = %source, amount = %amount, "credit restored");
        Ok(())
    }

    /// Removes credit that the now-voided `source` had generated. Same
    /// guard as [`Self::consume`]; the caller decides how to treat a
    /// shortfall.
    pub fn revoke(
        &self,
        account: AccountId,
        amount: Decimal,
        source: InvoiceId,
    ) -> Result<(), BillingError> {
        self.consume(account, amount, source)
    }
}
