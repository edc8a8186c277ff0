//! Account entity: per-address activity counters.

use serde::{Deserialize, Serialize};

use crate::domain::Address;

/// An address that has interacted with the protocol, with lifetime activity
/// counters. Counters split into gas-spending actions the account initiated
/// and passive ones it was subjected to; only the former count toward
/// new-user detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub position_count: u64,
    pub open_position_count: u64,
    pub closed_position_count: u64,
    pub deposit_count: u64,
    pub withdraw_count: u64,
    pub borrow_count: u64,
    pub repay_count: u64,
    /// Liquidations this account performed.
    pub liquidate_count: u64,
    /// Liquidations this account suffered.
    pub liquidated_count: u64,
    /// Transfers this account sent.
    pub transferred_count: u64,
    /// Transfers this account received.
    pub received_count: u64,
    pub flashloan_count: u64,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Account {
            address,
            position_count: 0,
            open_position_count: 0,
            closed_position_count: 0,
            deposit_count: 0,
            withdraw_count: 0,
            borrow_count: 0,
            repay_count: 0,
            liquidate_count: 0,
            liquidated_count: 0,
            transferred_count: 0,
            received_count: 0,
            flashloan_count: 0,
        }
    }

    /// True until the account performs its first gas-spending action.
    ///
    /// Being liquidated or receiving a transfer does not make an address a
    /// user; only actions it initiated do.
    pub fn is_new_user(&self) -> bool {
        self.deposit_count == 0
            && self.withdraw_count == 0
            && self.borrow_count == 0
            && self.repay_count == 0
            && self.liquidate_count == 0
            && self.transferred_count == 0
            && self.flashloan_count == 0
    }
}
