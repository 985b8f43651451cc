#![cfg_attr(not(feature = "std"), no_std, no_main)]

pub mod round;

pub mod constants {
    use crate::round::Balance;

    /// Smallest value the deployer may attach as the opening pot.
    pub const MIN_SEED_FUNDING: Balance = 1_000;

    /// Each `follow` pays at least this multiple of the pot.
    pub const FOLLOW_MULTIPLIER: Balance = 2;

    /// Denominator for the settlement split.
    pub const PERCENT: Balance = 100;

    /// Seed share when the admin settles (the admin gets the same again).
    pub const ADMIN_SETTLE_PERCENT: Balance = 10;
    /// Seed share when the winning leader settles.
    pub const LEADER_SETTLE_PERCENT: Balance = 5;
    /// Seed share when anyone else settles.
    pub const OUTSIDER_SETTLE_PERCENT: Balance = 8;

    /// The pot never drops below this after settlement.
    pub const MIN_CARRIED_SEED: Balance = 1;

    /// Longest round a deployer may configure.
    pub const MAX_ROUND_LENGTH: crate::round::BlockNumber = 1_000_000;
}

/// # Jackpot — Escalating Pot Contract
///
/// **Role:** Host for the round state machine in [`crate::round`]. Supplies the
/// caller, the attached value and the current block, moves native value and
/// emits events. All game rules live in [`crate::round::RoundEngine`].
///
/// ## Game loop
///
/// ```text
///   deploy (value ≥ MIN_SEED_FUNDING) ──► pot = value, no round
///
///   follow (value ≥ 2 × pot)   ──► leader = caller, pot = 2 × pot, refund excess
///   ...nobody follows for round_length blocks...
///   next follow / withdraw / increase_seed / settle
///                              ──► settle first, split depends on the caller:
///
///   SETTLED BY        SEED   ADMIN   LEADER
///   admin              10%    10%     80%
///   current leader      5%     5%     90%
///   anyone else         8%     8%     84%
/// ```
///
/// Winnings are credited to a claim ledger and paid out by `withdraw`.
///
/// ## Value flow
/// Every state change (round state and ledger) is written before any
/// outgoing transfer, and a claim is zeroed before it is paid.
#[ink::contract]
mod jackpot {
    use ink::storage::Mapping;

    use crate::round::{Error, RoundEngine, Settlement};

    pub type Result<T> = core::result::Result<T, Error>;

    // =========================================================================
    // STORAGE
    // =========================================================================

    #[ink(storage)]
    pub struct Jackpot {
        engine: RoundEngine,
        /// Claimable winnings per account.
        claims: Mapping<AccountId, Balance>,
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    #[ink(event)]
    pub struct LeaderChanged {
        #[ink(topic)]
        leader: AccountId,
        pot: Balance,
        refund: Balance,
    }

    #[ink(event)]
    pub struct SeedIncreased {
        old_pot: Balance,
        new_pot: Balance,
    }

    #[ink(event)]
    pub struct Withdrawn {
        #[ink(topic)]
        account: AccountId,
        amount: Balance,
    }

    #[ink(event)]
    pub struct RoundSettled {
        #[ink(topic)]
        former_leader: AccountId,
        former_pot: Balance,
        #[ink(topic)]
        settled_by: AccountId,
        seed: Balance,
        leader_credit: Balance,
    }

    // =========================================================================
    // IMPLEMENTATION
    // =========================================================================

    impl Jackpot {
        // ---------------------------------------------------------------------
        // Constructors
        // ---------------------------------------------------------------------

        /// Deploy with the caller as admin. The attached value is the opening pot.
        #[ink(constructor, payable)]
        pub fn new(round_length: BlockNumber) -> Result<Self> {
            Self::with_admin(Self::env().caller(), round_length)
        }

        #[ink(constructor, payable)]
        pub fn with_admin(admin: AccountId, round_length: BlockNumber) -> Result<Self> {
            let funding = Self::env().transferred_value();
            let engine = RoundEngine::new(admin, round_length, funding)?;

            Ok(Self {
                engine,
                claims: Mapping::default(),
            })
        }

        // =====================================================================
        // GAME
        // =====================================================================

        /// Take the lead. Attach at least `required_payment()`; the excess
        /// over twice the pot is refunded.
        ///
        /// # Errors
        /// - [`Error::InvalidCaller`] — caller already leads (or is the admin
        ///   trying to open a round).
        /// - [`Error::InsufficientPayment`] — attached value below twice the pot.
        #[ink(message, payable)]
        pub fn follow(&mut self) -> Result<()> {
            let caller = self.env().caller();
            let paid = self.env().transferred_value();
            let now = self.env().block_number();

            let receipt = self.engine.follow(&mut self.claims, caller, paid, now)?;

            self.emit_settlement(receipt.settlement.as_ref());
            self.env().emit_event(LeaderChanged {
                leader: receipt.leader,
                pot: receipt.pot,
                refund: receipt.refund,
            });

            if receipt.refund > 0 {
                self.pay(caller, receipt.refund)?;
            }
            Ok(())
        }

        /// Admin top-up of the pot while no round is running.
        #[ink(message, payable)]
        pub fn increase_seed(&mut self) -> Result<()> {
            let caller = self.env().caller();
            let amount = self.env().transferred_value();
            let now = self.env().block_number();

            let receipt = self
                .engine
                .increase_seed(&mut self.claims, caller, amount, now)?;

            self.emit_settlement(receipt.settlement.as_ref());
            self.env().emit_event(SeedIncreased {
                old_pot: receipt.old_pot,
                new_pot: receipt.new_pot,
            });
            Ok(())
        }

        /// Pay out the caller's claimable balance. Settles an expired round
        /// first, so a winning leader can collect in the same call.
        #[ink(message)]
        pub fn withdraw(&mut self) -> Result<Balance> {
            let caller = self.env().caller();
            let now = self.env().block_number();

            let receipt = self.engine.withdraw(&mut self.claims, caller, now)?;

            self.emit_settlement(receipt.settlement.as_ref());
            self.pay(receipt.claimant, receipt.amount)?;
            self.env().emit_event(Withdrawn {
                account: receipt.claimant,
                amount: receipt.amount,
            });
            Ok(receipt.amount)
        }

        /// Close an expired round without doing anything else. Returns
        /// `false` when there was nothing to settle.
        #[ink(message)]
        pub fn settle(&mut self) -> Result<bool> {
            let caller = self.env().caller();
            let now = self.env().block_number();

            let settlement = self.engine.settle(&mut self.claims, caller, now)?;

            self.emit_settlement(settlement.as_ref());
            Ok(settlement.is_some())
        }

        // =====================================================================
        // INTERNAL
        // =====================================================================

        fn emit_settlement(&self, settlement: Option<&Settlement>) {
            let Some(s) = settlement else {
                return;
            };

            ink::env::debug_println!(
                "jackpot: round settled by {:?} ({:?}), pot {} -> seed {}, leader credit {}",
                s.settled_by,
                s.settler,
                s.pot,
                s.seed,
                s.leader_credit
            );

            self.env().emit_event(RoundSettled {
                former_leader: s.leader,
                former_pot: s.pot,
                settled_by: s.settled_by,
                seed: s.seed,
                leader_credit: s.leader_credit,
            });
        }

        fn pay(&self, to: AccountId, amount: Balance) -> Result<()> {
            ink::env::debug_println!("jackpot: transferring {} to {:?}", amount, to);
            self.env()
                .transfer(to, amount)
                .map_err(|_| Error::TransferFailed)
        }

        // =====================================================================
        // VIEW FUNCTIONS
        // =====================================================================

        /// The pot, or a 10% seed projection if the round expired unsettled.
        #[ink(message)]
        pub fn amount_to_follow(&self) -> Balance {
            self.engine.amount_to_follow(self.env().block_number())
        }

        #[ink(message)]
        pub fn required_payment(&self) -> Balance {
            self.engine.required_payment(self.env().block_number())
        }

        #[ink(message)]
        pub fn blocks_remaining(&self) -> BlockNumber {
            self.engine.blocks_remaining(self.env().block_number())
        }

        #[ink(message)]
        pub fn current_leader(&self) -> AccountId {
            self.engine.current_leader()
        }

        #[ink(message)]
        pub fn balance_of(&self, account: AccountId) -> Balance {
            self.claims.get(account).unwrap_or(0)
        }

        #[ink(message)]
        pub fn is_round_active(&self) -> bool {
            self.engine.is_active()
        }

        #[ink(message)]
        pub fn is_round_expired(&self) -> bool {
            self.engine.is_expired(self.env().block_number())
        }

        /// `(rounds_settled, outstanding_claims, total_withdrawn)`
        #[ink(message)]
        pub fn get_stats(&self) -> (u32, Balance, Balance) {
            (
                self.engine.rounds_settled(),
                self.engine.outstanding_claims(),
                self.engine.total_withdrawn(),
            )
        }

        #[ink(message)]
        pub fn get_pot(&self) -> Balance { self.engine.pot() }

        #[ink(message)]
        pub fn get_round_start(&self) -> Option<BlockNumber> { self.engine.round_start() }

        #[ink(message)]
        pub fn get_admin(&self) -> AccountId { self.engine.admin() }

        #[ink(message)]
        pub fn get_round_length(&self) -> BlockNumber { self.engine.round_length() }
    }

    // =========================================================================
    // UNIT TESTS
    // =========================================================================

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::constants::*;
        use ink::env::{test, DefaultEnvironment};

        type Env = DefaultEnvironment;

        const ROUND_LENGTH: BlockNumber = 20;
        const OPENING_POT: Balance = 1_000;

        fn accounts() -> test::DefaultAccounts<Env> {
            test::default_accounts::<Env>()
        }

        fn contract_id() -> AccountId {
            AccountId::from([0xC0; 32])
        }

        fn set_caller(addr: AccountId) {
            test::set_caller::<Env>(addr);
        }

        fn set_block(block: BlockNumber) {
            test::set_block_number::<Env>(block);
        }

        fn balance(addr: AccountId) -> Balance {
            test::get_account_balance::<Env>(addr).unwrap_or(0)
        }

        /// Simulate attaching `value` to the next call: it lands in the
        /// contract's own balance.
        fn attach(value: Balance) {
            test::set_value_transferred::<Env>(value);
            test::set_account_balance::<Env>(contract_id(), balance(contract_id()) + value);
        }

        fn deploy() -> Jackpot {
            let accs = accounts();
            set_caller(accs.alice);
            set_block(0);
            test::set_callee::<Env>(contract_id());
            test::set_account_balance::<Env>(contract_id(), 0);
            attach(OPENING_POT);
            Jackpot::new(ROUND_LENGTH).expect("funded deployment")
        }

        fn follow_as(jackpot: &mut Jackpot, who: AccountId, value: Balance) -> Result<()> {
            set_caller(who);
            attach(value);
            jackpot.follow()
        }

        fn withdraw_as(jackpot: &mut Jackpot, who: AccountId) -> Result<Balance> {
            set_caller(who);
            test::set_value_transferred::<Env>(0);
            jackpot.withdraw()
        }

        /// alice deploys with 1000; bob leads with 2000 from block 5.
        fn deploy_with_bob_leading() -> Jackpot {
            let mut jackpot = deploy();
            set_block(5);
            follow_as(&mut jackpot, accounts().bob, 2_000).unwrap();
            jackpot
        }

        fn event_count() -> usize {
            test::recorded_events().count()
        }

        // ── Constructor ───────────────────────────────────────────────────────

        #[ink::test]
        fn constructor_sets_fields() {
            let jackpot = deploy();
            let accs = accounts();
            assert_eq!(jackpot.get_admin(), accs.alice);
            assert_eq!(jackpot.get_round_length(), ROUND_LENGTH);
            assert_eq!(jackpot.get_pot(), OPENING_POT);
            assert_eq!(jackpot.current_leader(), accs.alice);
            assert!(!jackpot.is_round_active());
            assert_eq!(jackpot.get_stats(), (0, 0, 0));
        }

        #[ink::test]
        fn constructor_rejects_underfunding() {
            set_caller(accounts().alice);
            test::set_value_transferred::<Env>(MIN_SEED_FUNDING - 1);
            assert_eq!(
                Jackpot::new(ROUND_LENGTH).err(),
                Some(Error::InsufficientFunding)
            );
        }

        #[ink::test]
        fn constructor_rejects_zero_round_length() {
            set_caller(accounts().alice);
            test::set_value_transferred::<Env>(OPENING_POT);
            assert_eq!(Jackpot::new(0).err(), Some(Error::InvalidRoundLength));
        }

        #[ink::test]
        fn with_admin_sets_explicit_admin() {
            let accs = accounts();
            set_caller(accs.alice);
            test::set_value_transferred::<Env>(OPENING_POT);
            let jackpot = Jackpot::with_admin(accs.eve, ROUND_LENGTH).unwrap();
            assert_eq!(jackpot.get_admin(), accs.eve);
            assert_eq!(jackpot.current_leader(), accs.eve);
        }

        // ── Follow ────────────────────────────────────────────────────────────

        #[ink::test]
        fn first_follow_doubles_pot_and_takes_lead() {
            let jackpot = deploy_with_bob_leading();
            assert_eq!(jackpot.get_pot(), 2_000);
            assert_eq!(jackpot.current_leader(), accounts().bob);
            assert_eq!(jackpot.get_round_start(), Some(5));
            assert_eq!(jackpot.blocks_remaining(), ROUND_LENGTH);
            assert_eq!(event_count(), 1);
        }

        #[ink::test]
        fn overpayment_is_refunded() {
            let mut jackpot = deploy();
            let bob = accounts().bob;
            let bob_before = balance(bob);

            follow_as(&mut jackpot, bob, 2_500).unwrap();

            assert_eq!(balance(bob), bob_before + 500);
            assert_eq!(balance(contract_id()), OPENING_POT + 2_000);
        }

        #[ink::test]
        fn admin_cannot_open_a_round() {
            let mut jackpot = deploy();
            assert_eq!(
                follow_as(&mut jackpot, accounts().alice, 2_000),
                Err(Error::InvalidCaller)
            );
            assert!(!jackpot.is_round_active());
        }

        #[ink::test]
        fn leader_cannot_follow_twice() {
            let mut jackpot = deploy_with_bob_leading();
            set_block(6);
            assert_eq!(
                follow_as(&mut jackpot, accounts().bob, 4_000),
                Err(Error::InvalidCaller)
            );
            assert_eq!(jackpot.get_pot(), 2_000);
        }

        #[ink::test]
        fn underpaid_follow_leaves_state_unchanged() {
            let mut jackpot = deploy_with_bob_leading();
            let accs = accounts();
            set_block(6);

            assert_eq!(
                follow_as(&mut jackpot, accs.charlie, 3_999),
                Err(Error::InsufficientPayment)
            );
            assert_eq!(jackpot.get_pot(), 2_000);
            assert_eq!(jackpot.current_leader(), accs.bob);
            assert_eq!(jackpot.get_round_start(), Some(5));
        }

        #[ink::test]
        fn outbidding_restarts_the_clock() {
            let mut jackpot = deploy_with_bob_leading();
            set_block(20);
            follow_as(&mut jackpot, accounts().charlie, 4_000).unwrap();

            set_block(30);
            assert!(!jackpot.is_round_expired());
            assert_eq!(jackpot.blocks_remaining(), 10);
            assert_eq!(jackpot.required_payment(), 8_000);
        }

        // ── Settlement ────────────────────────────────────────────────────────

        #[ink::test]
        fn outsider_settlement_splits_eight_percent() {
            let mut jackpot = deploy_with_bob_leading();
            let accs = accounts();
            set_block(30);

            // charlie's withdraw alone reverts with NothingToClaim, settlement
            // included, so the round is closed through settle().
            set_caller(accs.charlie);
            assert_eq!(jackpot.settle(), Ok(true));

            assert_eq!(jackpot.balance_of(accs.bob), 1_680);
            assert_eq!(jackpot.balance_of(accs.alice), 160);
            assert_eq!(jackpot.get_pot(), 160);
            assert_eq!(jackpot.get_round_start(), None);
            assert_eq!(withdraw_as(&mut jackpot, accs.charlie), Err(Error::NothingToClaim));
        }

        #[ink::test]
        fn admin_settlement_splits_ten_percent() {
            let mut jackpot = deploy_with_bob_leading();
            let accs = accounts();
            set_block(30);

            set_caller(accs.alice);
            assert_eq!(jackpot.settle(), Ok(true));

            assert_eq!(jackpot.balance_of(accs.bob), 1_600);
            assert_eq!(jackpot.balance_of(accs.alice), 200);
            assert_eq!(jackpot.get_pot(), 200);
        }

        #[ink::test]
        fn leader_withdraw_settles_and_pays_out() {
            let mut jackpot = deploy_with_bob_leading();
            let accs = accounts();
            let bob_before = balance(accs.bob);
            set_block(30);

            assert_eq!(withdraw_as(&mut jackpot, accs.bob), Ok(1_800));

            assert_eq!(balance(accs.bob), bob_before + 1_800);
            assert_eq!(jackpot.balance_of(accs.bob), 0);
            assert_eq!(jackpot.balance_of(accs.alice), 100);
            assert_eq!(jackpot.get_pot(), 100);
            assert_eq!(jackpot.get_stats(), (1, 100, 1_800));
            // LeaderChanged, RoundSettled, Withdrawn
            assert_eq!(event_count(), 3);
        }

        #[ink::test]
        fn settle_before_expiry_does_nothing() {
            let mut jackpot = deploy_with_bob_leading();
            set_block(24);
            set_caller(accounts().charlie);
            assert_eq!(jackpot.settle(), Ok(false));
            assert_eq!(jackpot.get_pot(), 2_000);
            assert_eq!(jackpot.blocks_remaining(), 1);
        }

        #[ink::test]
        fn empty_withdraw_after_expiry_does_not_settle() {
            let mut jackpot = deploy_with_bob_leading();
            let accs = accounts();
            set_block(30);

            assert_eq!(withdraw_as(&mut jackpot, accs.charlie), Err(Error::NothingToClaim));
            assert!(jackpot.is_round_expired());
            assert_eq!(jackpot.get_pot(), 2_000);
            assert_eq!(jackpot.balance_of(accs.bob), 0);
        }

        #[ink::test]
        fn withdraw_twice_yields_nothing_to_claim() {
            let mut jackpot = deploy_with_bob_leading();
            let accs = accounts();
            set_block(30);

            assert_eq!(withdraw_as(&mut jackpot, accs.bob), Ok(1_800));
            assert_eq!(withdraw_as(&mut jackpot, accs.bob), Err(Error::NothingToClaim));
        }

        #[ink::test]
        fn expired_leader_cannot_follow_in_settling_call() {
            let mut jackpot = deploy_with_bob_leading();
            let accs = accounts();
            set_block(30);

            assert_eq!(follow_as(&mut jackpot, accs.bob, 200), Err(Error::InvalidCaller));

            assert!(jackpot.is_round_expired());
            assert_eq!(jackpot.get_pot(), 2_000);
            assert_eq!(jackpot.balance_of(accs.bob), 0);
        }

        #[ink::test]
        fn previous_leader_can_open_round_after_settle() {
            let mut jackpot = deploy_with_bob_leading();
            let accs = accounts();
            set_block(30);
            set_caller(accs.bob);
            assert_eq!(jackpot.settle(), Ok(true));

            set_block(31);
            // Settled as leader (seed 100), bob opens with 2 × 100.
            follow_as(&mut jackpot, accs.bob, 200).unwrap();

            assert_eq!(jackpot.balance_of(accs.bob), 1_800);
            assert_eq!(jackpot.get_pot(), 200);
            assert_eq!(jackpot.current_leader(), accs.bob);
            assert_eq!(jackpot.get_round_start(), Some(31));
        }

        // ── Seed top-up ───────────────────────────────────────────────────────

        #[ink::test]
        fn increase_seed_only_admin() {
            let mut jackpot = deploy();
            set_caller(accounts().bob);
            attach(500);
            assert_eq!(jackpot.increase_seed(), Err(Error::Unauthorized));
        }

        #[ink::test]
        fn increase_seed_rejected_during_round() {
            let mut jackpot = deploy_with_bob_leading();
            set_block(10);
            set_caller(accounts().alice);
            attach(500);
            assert_eq!(jackpot.increase_seed(), Err(Error::RoundInProgress));
        }

        #[ink::test]
        fn increase_seed_between_rounds() {
            let mut jackpot = deploy();
            set_caller(accounts().alice);
            attach(500);
            jackpot.increase_seed().unwrap();
            assert_eq!(jackpot.get_pot(), 1_500);
            assert_eq!(event_count(), 1);
        }

        #[ink::test]
        fn increase_seed_after_expiry_settles_with_admin_split() {
            let mut jackpot = deploy_with_bob_leading();
            set_block(25);
            set_caller(accounts().alice);
            attach(50);

            jackpot.increase_seed().unwrap();

            assert_eq!(jackpot.get_pot(), 250);
            assert_eq!(jackpot.balance_of(accounts().bob), 1_600);
        }

        // ── Queries ───────────────────────────────────────────────────────────

        #[ink::test]
        fn expired_round_previews_admin_seed() {
            let jackpot = deploy_with_bob_leading();
            set_block(25);
            assert!(jackpot.is_round_expired());
            assert_eq!(jackpot.amount_to_follow(), 200);
            assert_eq!(jackpot.blocks_remaining(), 0);
            // Not refreshed until a mutating call settles the round.
            assert_eq!(jackpot.current_leader(), accounts().bob);
        }

        #[ink::test]
        fn contract_stays_solvent_across_rounds() {
            let mut jackpot = deploy_with_bob_leading();
            let accs = accounts();

            set_block(30);
            set_caller(accs.charlie);
            jackpot.settle().unwrap();
            follow_as(&mut jackpot, accs.django, 320).unwrap();
            set_block(60);
            withdraw_as(&mut jackpot, accs.bob).unwrap();

            let (settled, outstanding, _) = jackpot.get_stats();
            assert_eq!(settled, 2);
            assert!(balance(contract_id()) >= jackpot.get_pot() + outstanding);
        }
    }
}
