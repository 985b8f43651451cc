//! Round and claim-ledger state machine.
//!
//! Everything in this module is plain deterministic Rust: callers pass the
//! caller identity, attached value and current block explicitly, and get a
//! receipt back describing what the host has to do (emit events, move value).
//! The contract in `lib.rs` is the only place that talks to the runtime.
//!
//! ```text
//!                 follow (pays ≥ 2 × pot)
//!   ┌──────────┐ ─────────────────────────► ┌──────────────┐
//!   │ Inactive │                            │ Active(start)│ ◄─┐ follow by
//!   └──────────┘ ◄───────────────────────── └──────────────┘ ──┘ someone else
//!                 checkpoint: now ≥ start + round_length
//!                 (settle, split pot, credit ledger)
//! ```

use ink::env::{DefaultEnvironment, Environment};
use ink::prelude::vec::Vec;
use ink::storage::traits::StorageKey;
use ink::storage::Mapping;

use crate::constants::*;

pub type AccountId = <DefaultEnvironment as Environment>::AccountId;
pub type Balance = <DefaultEnvironment as Environment>::Balance;
pub type BlockNumber = <DefaultEnvironment as Environment>::BlockNumber;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(feature = "std", derive(scale_info::TypeInfo))]
pub enum Error {
    /// Constructor value is below `MIN_SEED_FUNDING`.
    InsufficientFunding,
    /// Constructor round length is zero or above `MAX_ROUND_LENGTH`.
    InvalidRoundLength,
    /// Admin-only operation called by someone else.
    Unauthorized,
    /// The pot cannot be changed while a round is running.
    RoundInProgress,
    /// The current leader tried to outbid itself.
    InvalidCaller,
    /// `follow` paid less than twice the pot.
    InsufficientPayment,
    /// Caller has no claimable balance.
    NothingToClaim,
    /// Arithmetic overflow.
    Overflow,
    /// Settlement or ledger totals do not add up.
    AccountingBroken,
    /// A native value transfer failed.
    TransferFailed,
}

// =============================================================================
// CLAIM LEDGER
// =============================================================================

/// Per-identity claimable balances. Missing entries read as zero.
pub trait ClaimLedger {
    fn claimable(&self, who: &AccountId) -> Balance;

    /// Writing zero removes the entry.
    fn set_claimable(&mut self, who: &AccountId, amount: Balance);
}

impl<KeyType: StorageKey> ClaimLedger for Mapping<AccountId, Balance, KeyType> {
    fn claimable(&self, who: &AccountId) -> Balance {
        self.get(who).unwrap_or(0)
    }

    fn set_claimable(&mut self, who: &AccountId, amount: Balance) {
        if amount == 0 {
            self.remove(who);
        } else {
            self.insert(who, &amount);
        }
    }
}

// =============================================================================
// SETTLEMENT
// =============================================================================

/// Who triggered a settlement. Decides the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settler {
    Admin,
    Leader,
    Outsider,
}

impl Settler {
    /// The admin check wins when the admin is also the leader.
    pub fn classify(caller: &AccountId, admin: &AccountId, leader: &AccountId) -> Self {
        if caller == admin {
            Settler::Admin
        } else if caller == leader {
            Settler::Leader
        } else {
            Settler::Outsider
        }
    }

    /// Share of the pot (in percent) kept as the next seed. The admin is
    /// credited the same share; the leader gets the rest.
    pub const fn seed_percent(self) -> Balance {
        match self {
            Settler::Admin => ADMIN_SETTLE_PERCENT,
            Settler::Leader => LEADER_SETTLE_PERCENT,
            Settler::Outsider => OUTSIDER_SETTLE_PERCENT,
        }
    }
}

/// Split `pot` into `(seed, leader_credit)`.
///
/// `seed = pot × p / 100`, floored at `MIN_CARRIED_SEED`, and
/// `leader_credit = pot − 2 × seed`, so truncation dust lands with the leader.
/// Fails with [`Error::AccountingBroken`] unless
/// `leader_credit + 2 × seed == pot` and `seed < pot`.
pub fn split_pot(pot: Balance, settler: Settler) -> Result<(Balance, Balance), Error> {
    let seed = pot
        .checked_mul(settler.seed_percent())
        .ok_or(Error::Overflow)?
        / PERCENT;
    let seed = seed.max(MIN_CARRIED_SEED);

    let seed_and_admin = seed.checked_mul(2).ok_or(Error::Overflow)?;
    let leader_credit = pot
        .checked_sub(seed_and_admin)
        .ok_or(Error::AccountingBroken)?;

    let accounted = leader_credit
        .checked_add(seed_and_admin)
        .ok_or(Error::Overflow)?;
    if accounted != pot || seed >= pot {
        return Err(Error::AccountingBroken);
    }

    Ok((seed, leader_credit))
}

/// A closed round: who settled it and where the pot went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub settler: Settler,
    pub settled_by: AccountId,
    pub leader: AccountId,
    pub admin: AccountId,
    /// Pot before settlement.
    pub pot: Balance,
    /// Carried into the next round, and credited once more to the admin.
    pub seed: Balance,
    pub leader_credit: Balance,
}

impl Settlement {
    /// Total newly claimable value (leader credit plus admin cut).
    pub fn credited(&self) -> Balance {
        self.pot - self.seed
    }

    /// Ledger balances after this settlement, computed without writing.
    fn credited_balances<L: ClaimLedger>(
        &self,
        ledger: &L,
    ) -> Result<Vec<(AccountId, Balance)>, Error> {
        let leader_after = ledger
            .claimable(&self.leader)
            .checked_add(self.leader_credit)
            .ok_or(Error::Overflow)?;

        if self.leader == self.admin {
            let combined = leader_after.checked_add(self.seed).ok_or(Error::Overflow)?;
            return Ok(ink::prelude::vec![(self.leader, combined)]);
        }

        let admin_after = ledger
            .claimable(&self.admin)
            .checked_add(self.seed)
            .ok_or(Error::Overflow)?;
        Ok(ink::prelude::vec![(self.leader, leader_after), (self.admin, admin_after)])
    }
}

// =============================================================================
// RECEIPTS
// =============================================================================

/// Outcome of a successful `follow`. The host refunds `refund` to `leader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowReceipt {
    pub settlement: Option<Settlement>,
    pub leader: AccountId,
    pub pot: Balance,
    pub refund: Balance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedReceipt {
    pub settlement: Option<Settlement>,
    pub old_pot: Balance,
    pub new_pot: Balance,
}

/// Outcome of a successful `withdraw`. The host pays `amount` to `claimant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawReceipt {
    pub settlement: Option<Settlement>,
    pub claimant: AccountId,
    pub amount: Balance,
}

// =============================================================================
// ENGINE
// =============================================================================

/// The whole game state. Every mutating operation stages the next state on a
/// copy, runs all checks, and only then writes the ledger and itself, so a
/// failed call leaves both untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, scale::Encode, scale::Decode)]
#[cfg_attr(
    feature = "std",
    derive(scale_info::TypeInfo, ink::storage::traits::StorageLayout)
)]
pub struct RoundEngine {
    admin: AccountId,
    round_length: BlockNumber,
    pot: Balance,
    /// Equals `admin` whenever no round has been opened since the last settlement.
    leader: AccountId,
    /// Block at which the current leader took the lead. `None` = no round.
    round_start: Option<BlockNumber>,

    // ── Lifetime stats ────────────────────────────────────────────────────
    rounds_settled: u32,
    /// Sum of every ledger balance not yet withdrawn.
    outstanding_claims: Balance,
    total_withdrawn: Balance,
}

impl RoundEngine {
    pub fn new(
        admin: AccountId,
        round_length: BlockNumber,
        funding: Balance,
    ) -> Result<Self, Error> {
        if round_length == 0 || round_length > MAX_ROUND_LENGTH {
            return Err(Error::InvalidRoundLength);
        }
        if funding < MIN_SEED_FUNDING {
            return Err(Error::InsufficientFunding);
        }

        Ok(Self {
            admin,
            round_length,
            pot: funding,
            leader: admin,
            round_start: None,
            rounds_settled: 0,
            outstanding_claims: 0,
            total_withdrawn: 0,
        })
    }

    // -------------------------------------------------------------------------
    // Checkpoint
    // -------------------------------------------------------------------------

    /// Stage the state that results from settling an expired round with
    /// `caller` as settler. Returns an unchanged copy when nothing expired.
    fn checkpoint(
        &self,
        caller: &AccountId,
        now: BlockNumber,
    ) -> Result<(RoundEngine, Option<Settlement>), Error> {
        let mut next = *self;
        if !self.is_expired(now) {
            return Ok((next, None));
        }

        let settler = Settler::classify(caller, &self.admin, &self.leader);
        let (seed, leader_credit) = split_pot(self.pot, settler)?;
        let settlement = Settlement {
            settler,
            settled_by: *caller,
            leader: self.leader,
            admin: self.admin,
            pot: self.pot,
            seed,
            leader_credit,
        };

        next.pot = seed;
        next.round_start = None;
        next.rounds_settled = next.rounds_settled.saturating_add(1);
        next.outstanding_claims = next
            .outstanding_claims
            .checked_add(settlement.credited())
            .ok_or(Error::Overflow)?;

        Ok((next, Some(settlement)))
    }

    /// Write staged ledger balances and the staged engine state.
    fn commit<L: ClaimLedger>(
        &mut self,
        ledger: &mut L,
        next: RoundEngine,
        balances: &[(AccountId, Balance)],
    ) {
        for (who, amount) in balances {
            ledger.set_claimable(who, *amount);
        }
        *self = next;
    }

    fn staged_balances<L: ClaimLedger>(
        ledger: &L,
        settlement: Option<&Settlement>,
    ) -> Result<Vec<(AccountId, Balance)>, Error> {
        match settlement {
            Some(s) => s.credited_balances(ledger),
            None => Ok(Vec::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Mutating operations
    // -------------------------------------------------------------------------

    /// Settle the round if it has expired. Returns the settlement, if any.
    pub fn settle<L: ClaimLedger>(
        &mut self,
        ledger: &mut L,
        caller: AccountId,
        now: BlockNumber,
    ) -> Result<Option<Settlement>, Error> {
        let (next, settlement) = self.checkpoint(&caller, now)?;
        let balances = Self::staged_balances(ledger, settlement.as_ref())?;
        self.commit(ledger, next, &balances);
        Ok(settlement)
    }

    /// Take the lead by paying at least twice the pot.
    pub fn follow<L: ClaimLedger>(
        &mut self,
        ledger: &mut L,
        caller: AccountId,
        paid: Balance,
        now: BlockNumber,
    ) -> Result<FollowReceipt, Error> {
        let (mut next, settlement) = self.checkpoint(&caller, now)?;

        // The leader settled by this very call may not take the lead again.
        let settled_leader = settlement.as_ref().map(|s| s.leader);
        if next.round_start.is_none() {
            next.leader = next.admin;
        }
        if caller == next.leader || settled_leader == Some(caller) {
            return Err(Error::InvalidCaller);
        }

        let required = next
            .pot
            .checked_mul(FOLLOW_MULTIPLIER)
            .ok_or(Error::Overflow)?;
        if paid < required {
            return Err(Error::InsufficientPayment);
        }
        let refund = paid - required;

        next.pot = required;
        next.leader = caller;
        next.round_start = Some(now);

        let balances = Self::staged_balances(ledger, settlement.as_ref())?;
        self.commit(ledger, next, &balances);

        Ok(FollowReceipt {
            settlement,
            leader: caller,
            pot: required,
            refund,
        })
    }

    /// Admin top-up of the pot between rounds.
    pub fn increase_seed<L: ClaimLedger>(
        &mut self,
        ledger: &mut L,
        caller: AccountId,
        amount: Balance,
        now: BlockNumber,
    ) -> Result<SeedReceipt, Error> {
        if caller != self.admin {
            return Err(Error::Unauthorized);
        }

        let (mut next, settlement) = self.checkpoint(&caller, now)?;
        if next.round_start.is_some() {
            return Err(Error::RoundInProgress);
        }

        let old_pot = next.pot;
        next.pot = old_pot.checked_add(amount).ok_or(Error::Overflow)?;

        let balances = Self::staged_balances(ledger, settlement.as_ref())?;
        self.commit(ledger, next, &balances);

        Ok(SeedReceipt {
            settlement,
            old_pot,
            new_pot: self.pot,
        })
    }

    /// Zero the caller's claimable balance and hand it to the host for payout.
    pub fn withdraw<L: ClaimLedger>(
        &mut self,
        ledger: &mut L,
        caller: AccountId,
        now: BlockNumber,
    ) -> Result<WithdrawReceipt, Error> {
        let (mut next, settlement) = self.checkpoint(&caller, now)?;
        let mut balances = Self::staged_balances(ledger, settlement.as_ref())?;

        let amount = balances
            .iter()
            .find(|(who, _)| *who == caller)
            .map(|(_, amount)| *amount)
            .unwrap_or_else(|| ledger.claimable(&caller));
        if amount == 0 {
            return Err(Error::NothingToClaim);
        }

        next.outstanding_claims = next
            .outstanding_claims
            .checked_sub(amount)
            .ok_or(Error::AccountingBroken)?;
        next.total_withdrawn = next
            .total_withdrawn
            .checked_add(amount)
            .ok_or(Error::Overflow)?;

        // Zeroed last so it overrides any credit staged for the caller.
        balances.push((caller, 0));
        self.commit(ledger, next, &balances);

        Ok(WithdrawReceipt {
            settlement,
            claimant: caller,
            amount,
        })
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn is_active(&self) -> bool {
        self.round_start.is_some()
    }

    /// Blocks the current leader has held the lead at `now`.
    fn elapsed(&self, now: BlockNumber) -> Option<BlockNumber> {
        self.round_start.map(|start| now.saturating_sub(start))
    }

    /// Active, and the leader has survived `round_length` blocks.
    pub fn is_expired(&self, now: BlockNumber) -> bool {
        self.elapsed(now)
            .map_or(false, |elapsed| elapsed >= self.round_length)
    }

    /// The pot, or the admin-rate seed projection once the round has expired
    /// but not yet settled. The admin rate is the largest seed any settler
    /// produces, so paying `2 ×` this always covers the real settlement.
    pub fn amount_to_follow(&self, now: BlockNumber) -> Balance {
        if self.is_expired(now) {
            split_pot(self.pot, Settler::Admin)
                .map(|(seed, _)| seed)
                .unwrap_or(self.pot)
        } else {
            self.pot
        }
    }

    /// Minimum `follow` payment at `now`, using the same projection.
    pub fn required_payment(&self, now: BlockNumber) -> Balance {
        self.amount_to_follow(now).saturating_mul(FOLLOW_MULTIPLIER)
    }

    pub fn blocks_remaining(&self, now: BlockNumber) -> BlockNumber {
        self.elapsed(now)
            .map_or(0, |elapsed| self.round_length.saturating_sub(elapsed))
    }

    /// Stale after expiry until some call runs the checkpoint.
    pub fn current_leader(&self) -> AccountId {
        self.leader
    }

    pub fn admin(&self) -> AccountId {
        self.admin
    }

    pub fn round_length(&self) -> BlockNumber {
        self.round_length
    }

    pub fn pot(&self) -> Balance {
        self.pot
    }

    pub fn round_start(&self) -> Option<BlockNumber> {
        self.round_start
    }

    pub fn rounds_settled(&self) -> u32 {
        self.rounds_settled
    }

    pub fn outstanding_claims(&self) -> Balance {
        self.outstanding_claims
    }

    pub fn total_withdrawn(&self) -> Balance {
        self.total_withdrawn
    }
}

// =============================================================================
// UNIT TESTS
// =============================================================================
