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

//! Post-commit notifications for interested collaborators.
//!
//! Signals are pushed only after a pass has committed, never before, so
//! observers cannot see state that later rolls back. Delivery plumbing
//! (an event bus, webhooks) is external; this queue is the boundary.

use crate::base::{AccountId, InvoiceId};
use crossbeam::queue::SegQueue;
use rust_decimal::Decimal;

/// A signal emitted after a successful commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    InvoiceCommitted {
        account: AccountId,
        invoice: InvoiceId,
    },
    InvoiceVoided {
        account: AccountId,
        invoice: InvoiceId,
    },
    /// The committed invoice carries a positive balance and the account
    /// does not have auto-pay switched off; the payment subsystem should
    /// collect.
    PaymentRequested {
        account: AccountId,
        invoice: InvoiceId,
        amount: Decimal,
    },
}

/// Lock-free FIFO of pending notifications.
#[derive(Debug, Default)]
pub struct NotificationQueue {
    queue: SegQueue<Notification>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
        }
    }

    pub fn push(&self, notification: Notification) {
        self.queue.push(notification);
    }

    /// Removes and returns all pending notifications in FIFO order.
    pub fn drain(&self) -> Vec<Notification> {
        let mut drained = Vec::new();
        while let Some(notification) = self.queue.pop() {
            drained.push(notification);
        }
        drained
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
