// src/credit/mod.rs — Two-phase credit reservation and settlement
//
// Every paid operation follows the same allocate-then-settle pattern:
// the estimated cost is taken out of the workspace balance before the
// external call, and settlement replaces it with the real cost once
// usage is known. The ledger is the one genuinely shared,
// concurrently-mutated resource in the engine; reserve / release /
// deduct all operate on a single numeric balance per workspace and are
// linearizable behind one account-map lock.

use std::collections::HashMap;
use std::ops::{Add, AddAssign, Sub};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::infra::errors::WeftError;
use crate::provider::TokenUsage;
use crate::tenant::{UserId, WorkspaceId};

/// A credit amount. Credits are the platform's internal metering unit;
/// conversion to money happens in the billing layer, not here.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreditCount(f64);

impl CreditCount {
    pub const ZERO: CreditCount = CreditCount(0.0);

    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0.0
    }
}

impl Add for CreditCount {
    type Output = CreditCount;
    fn add(self, rhs: CreditCount) -> CreditCount {
        CreditCount(self.0 + rhs.0)
    }
}

impl AddAssign for CreditCount {
    fn add_assign(&mut self, rhs: CreditCount) {
        self.0 += rhs.0;
    }
}

impl Sub for CreditCount {
    type Output = CreditCount;
    fn sub(self, rhs: CreditCount) -> CreditCount {
        CreditCount(self.0 - rhs.0)
    }
}

impl std::fmt::Display for CreditCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A hold on workspace credit, referenced by the session until
/// settlement. Released in full on any terminal failure; released and
/// replaced by a real deduction on success.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: ReservationId,
    pub workspace: WorkspaceId,
    pub amount: CreditCount,
}

#[derive(Debug, Default)]
struct Account {
    balance: f64,
    /// Amounts of reservations not yet released, by id. Tracking them
    /// here is what makes `release` idempotent.
    outstanding: HashMap<ReservationId, f64>,
}

/// Per-workspace credit accounts with atomic reserve / release / deduct.
#[derive(Debug, Default)]
pub struct CreditLedger {
    accounts: Mutex<HashMap<WorkspaceId, Account>>,
}

impl CreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or reset a workspace balance.
    pub fn open_account(&self, workspace: WorkspaceId, balance: CreditCount) {
        let mut accounts = self.accounts.lock().unwrap();
        accounts.entry(workspace).or_default().balance = balance.value();
    }

    /// Add credits to a workspace (plan renewal, top-up).
    pub fn top_up(&self, workspace: WorkspaceId, amount: CreditCount) {
        let mut accounts = self.accounts.lock().unwrap();
        accounts.entry(workspace).or_default().balance += amount.value();
    }

    /// The balance net of outstanding reservations — what the next
    /// reservation can draw on.
    pub fn balance(&self, workspace: WorkspaceId) -> CreditCount {
        let accounts = self.accounts.lock().unwrap();
        CreditCount(accounts.get(&workspace).map_or(0.0, |a| a.balance))
    }

    /// Take the estimated amount out of the balance. Two sessions racing
    /// for the same balance cannot both succeed past what it covers.
    pub fn reserve(
        &self,
        workspace: WorkspaceId,
        amount: CreditCount,
    ) -> Result<Reservation, WeftError> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(workspace).or_default();
        if account.balance < amount.value() {
            return Err(WeftError::InsufficientCredit {
                workspace: workspace.to_string(),
                requested: amount.value(),
                available: account.balance,
            });
        }

        let reservation = Reservation {
            id: ReservationId::new(),
            workspace,
            amount,
        };
        account.balance -= amount.value();
        account.outstanding.insert(reservation.id, amount.value());
        debug!(workspace = %workspace, amount = amount.value(), "credit reserved");
        Ok(reservation)
    }

    /// Return a reservation's amount to the balance. Idempotent: a
    /// second release of the same reservation, or a release after the
    /// reservation was consumed by settlement, is a no-op.
    pub fn release(&self, reservation: &Reservation) {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(reservation.workspace).or_default();
        match account.outstanding.remove(&reservation.id) {
            Some(amount) => {
                account.balance += amount;
                debug!(workspace = %reservation.workspace, amount, "reservation released");
            }
            None => {
                debug!(reservation = %reservation.id, "release of settled reservation ignored");
            }
        }
    }

    /// Subtract a real cost from the balance.
    pub fn deduct(
        &self,
        workspace: WorkspaceId,
        amount: CreditCount,
        allow_negative: bool,
    ) -> Result<(), WeftError> {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(workspace).or_default();
        if !allow_negative && account.balance < amount.value() {
            return Err(WeftError::InsufficientCredit {
                workspace: workspace.to_string(),
                requested: amount.value(),
                available: account.balance,
            });
        }
        account.balance -= amount.value();
        debug!(workspace = %workspace, amount = amount.value(), "credit deducted");
        Ok(())
    }

    /// Settlement: deduct the real cost, then release the original
    /// reservation, atomically. The net balance change across the whole
    /// session is exactly `-real_cost`, once, regardless of the
    /// estimate.
    ///
    /// When negative balances are not permitted and the remaining funds
    /// (balance plus the still-held estimate) cannot cover the real
    /// cost, the charge is clamped rather than failing the
    /// already-delivered answer. Returns the amount actually charged.
    pub fn settle(
        &self,
        reservation: &Reservation,
        real_cost: CreditCount,
        allow_negative: bool,
    ) -> CreditCount {
        let mut accounts = self.accounts.lock().unwrap();
        let account = accounts.entry(reservation.workspace).or_default();
        let held = account
            .outstanding
            .get(&reservation.id)
            .copied()
            .unwrap_or(0.0);

        let charged = if allow_negative {
            real_cost.value()
        } else {
            let coverable = (account.balance + held).max(0.0);
            if real_cost.value() > coverable {
                warn!(
                    workspace = %reservation.workspace,
                    real_cost = real_cost.value(),
                    coverable,
                    "balance cannot cover real cost, charge clamped"
                );
                coverable
            } else {
                real_cost.value()
            }
        };

        // Deduct precedes the matching release; the release is the
        // correction for the originally-estimated amount.
        account.balance -= charged;
        if account.outstanding.remove(&reservation.id).is_some() {
            account.balance += held;
        }

        debug!(
            workspace = %reservation.workspace,
            estimate = reservation.amount.value(),
            charged,
            "session settled"
        );
        CreditCount(charged)
    }
}

/// Accounting record emitted once per settled generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub workspace: WorkspaceId,
    pub user: UserId,
    pub model: String,
    pub usage: TokenUsage,
    pub cost: CreditCount,
    /// True when the call ran on a workspace-supplied credential and was
    /// therefore not billed.
    pub custom_key: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ledger_with(balance: f64) -> (CreditLedger, WorkspaceId) {
        let ledger = CreditLedger::new();
        let workspace = WorkspaceId::new();
        ledger.open_account(workspace, CreditCount::new(balance));
        (ledger, workspace)
    }

    #[test]
    fn test_reserve_takes_from_balance() {
        let (ledger, ws) = ledger_with(10.0);
        let r = ledger.reserve(ws, CreditCount::new(10.0)).unwrap();
        assert_eq!(ledger.balance(ws).value(), 0.0);
        ledger.release(&r);
        assert_eq!(ledger.balance(ws).value(), 10.0);
    }

    #[test]
    fn test_concurrent_reserve_cannot_overdraw() {
        let (ledger, ws) = ledger_with(10.0);
        let first = ledger.reserve(ws, CreditCount::new(10.0)).unwrap();
        let err = ledger.reserve(ws, CreditCount::new(1.0)).unwrap_err();
        assert!(matches!(err, WeftError::InsufficientCredit { .. }));
        ledger.release(&first);
        assert!(ledger.reserve(ws, CreditCount::new(1.0)).is_ok());
    }

    #[test]
    fn test_release_is_idempotent() {
        let (ledger, ws) = ledger_with(10.0);
        let r = ledger.reserve(ws, CreditCount::new(4.0)).unwrap();
        ledger.release(&r);
        ledger.release(&r);
        assert_eq!(ledger.balance(ws).value(), 10.0);
    }

    #[test]
    fn test_deduct_respects_negative_policy() {
        let (ledger, ws) = ledger_with(5.0);
        let err = ledger
            .deduct(ws, CreditCount::new(7.0), false)
            .unwrap_err();
        assert!(matches!(err, WeftError::InsufficientCredit { .. }));
        ledger.deduct(ws, CreditCount::new(7.0), true).unwrap();
        assert_eq!(ledger.balance(ws).value(), -2.0);
    }

    #[test]
    fn test_settle_nets_exactly_real_cost() {
        let (ledger, ws) = ledger_with(10.0);
        let r = ledger.reserve(ws, CreditCount::new(10.0)).unwrap();
        let charged = ledger.settle(&r, CreditCount::new(6.0), false);
        assert_eq!(charged.value(), 6.0);
        assert_eq!(ledger.balance(ws).value(), 4.0);
        // A straggling release after settlement changes nothing.
        ledger.release(&r);
        assert_eq!(ledger.balance(ws).value(), 4.0);
    }

    #[test]
    fn test_manual_deduct_then_release_pair() {
        // Settling spelled out as its two primitive operations: the
        // deduction lands first, and the release that follows corrects
        // for the estimate — the pair nets -real exactly once.
        let (ledger, ws) = ledger_with(10.0);
        let r = ledger.reserve(ws, CreditCount::new(4.0)).unwrap();
        assert_eq!(ledger.balance(ws).value(), 6.0);
        ledger.deduct(ws, CreditCount::new(3.0), false).unwrap();
        assert_eq!(ledger.balance(ws).value(), 3.0);
        ledger.release(&r);
        assert_eq!(ledger.balance(ws).value(), 7.0);
    }

    #[test]
    fn test_settle_clamps_without_negative_policy() {
        let (ledger, ws) = ledger_with(2.0);
        let r = ledger.reserve(ws, CreditCount::new(2.0)).unwrap();
        let charged = ledger.settle(&r, CreditCount::new(5.0), false);
        assert_eq!(charged.value(), 2.0);
        assert_eq!(ledger.balance(ws).value(), 0.0);
    }

    #[test]
    fn test_settle_goes_negative_with_policy() {
        let (ledger, ws) = ledger_with(2.0);
        let r = ledger.reserve(ws, CreditCount::new(2.0)).unwrap();
        let charged = ledger.settle(&r, CreditCount::new(5.0), true);
        assert_eq!(charged.value(), 5.0);
        assert_eq!(ledger.balance(ws).value(), -3.0);
    }

    #[test]
    fn test_interleaved_sessions_sum_to_real_costs() {
        let ledger = Arc::new(CreditLedger::new());
        let ws = WorkspaceId::new();
        ledger.open_account(ws, CreditCount::new(1000.0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    let estimate = CreditCount::new(4.0);
                    let real = CreditCount::new(1.0 + (i % 3) as f64);
                    let r = ledger.reserve(ws, estimate).unwrap();
                    ledger.settle(&r, real, false);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Independent of interleaving: initial minus the sum of real
        // costs of the completed sessions.
        let mut expected = 1000.0;
        for i in 0..8u32 {
            expected -= 25.0 * (1.0 + (i % 3) as f64);
        }
        assert_eq!(ledger.balance(ws).value(), expected);
    }

    #[test]
    fn test_unknown_workspace_defaults_to_zero() {
        let ledger = CreditLedger::new();
        let ws = WorkspaceId::new();
        assert_eq!(ledger.balance(ws).value(), 0.0);
        assert!(ledger.reserve(ws, CreditCount::new(0.5)).is_err());
    }
}
