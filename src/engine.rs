//! Vesting state machine.
//!
//! Every rule lives here as a pure function of the decoded instruction, the
//! referenced accounts, the escrow's stored stream and the clock. The
//! processor binds it to `AccountInfo`s; [`Ledger`] binds it to an in-memory
//! arena so whole lifecycles can be driven without a validator.

use std::collections::BTreeMap;

use solana_program::{
    instruction::Instruction as SolInstruction,
    pubkey::Pubkey,
    system_program,
};

use crate::{
    accounts::{self, AccountRef},
    constants::*,
    error::StreamError,
    ix::Instruction,
    state::StreamAccount,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Env {
    /// Unix seconds.
    pub now: i64,
    /// Lamports kept on the escrow to make it rent exempt.
    pub rent_reserve: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamStatus {
    Pending,
    Streaming,
    Settled,
}

/// Lamports leaving the escrow for the account at position `to`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Payout {
    pub to: usize,
    pub amount: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transition {
    /// Escrow is created holding `funding` = deposit + rent reserve.
    Open { stream: StreamAccount, funding: u64 },
    /// Stream stays open with `stream` as its new state.
    Withdraw { stream: StreamAccount, payout: Payout },
    /// Payouts are made, then whatever is left goes to `collector` and the escrow closes.
    Close {
        recipient: Payout,
        refund: Option<Payout>,
        collector: usize,
    },
}

// --- Vesting math ---

/// Lamports unlocked at `now`: floor(deposit * elapsed / duration), clamped to the window.
pub fn vested_amount(stream: &StreamAccount, now: i64) -> u64 {
    let start = i64::from(stream.start_time);
    let end = i64::from(stream.end_time);
    if now <= start {
        return 0;
    }
    if now >= end {
        return stream.deposit_amount;
    }
    let elapsed = (now - start) as u128;
    let duration = (end - start) as u128;
    // elapsed < duration, so the quotient is below deposit.
    (u128::from(stream.deposit_amount) * elapsed / duration) as u64
}

pub fn withdrawable_amount(stream: &StreamAccount, now: i64) -> u64 {
    vested_amount(stream, now).saturating_sub(stream.withdrawn_amount)
}

/// Part of the deposit still locked at `now`.
pub fn refundable_amount(stream: &StreamAccount, now: i64) -> u64 {
    stream.deposit_amount - vested_amount(stream, now)
}

/// `(to_recipient, to_sender)` for a cancel at `now`. The two always sum to
/// the outstanding deposit, even when `now` precedes an earlier withdraw.
pub fn cancel_split(stream: &StreamAccount, now: i64) -> (u64, u64) {
    let outstanding = stream.outstanding();
    let to_recipient = withdrawable_amount(stream, now).min(outstanding);
    (to_recipient, outstanding - to_recipient)
}

pub fn status(stream: &StreamAccount, now: i64) -> StreamStatus {
    if now <= i64::from(stream.start_time) {
        StreamStatus::Pending
    } else if now < i64::from(stream.end_time) {
        StreamStatus::Streaming
    } else {
        StreamStatus::Settled
    }
}

// --- Transitions ---

/// Position of the escrow in the instruction's account list.
pub fn escrow_position(ix: &Instruction) -> usize {
    match ix {
        Instruction::Init { .. } => INIT_ESCROW,
        Instruction::Withdraw { .. } => WITHDRAW_ESCROW,
        Instruction::Cancel => CANCEL_ESCROW,
    }
}

/// Validates `ix` and computes its effect. Nothing is mutated; a rejection
/// leaves every account exactly as it was.
pub fn transition(
    ix: &Instruction,
    accounts: &[AccountRef],
    escrow: Option<&StreamAccount>,
    env: &Env,
) -> Result<Transition, StreamError> {
    match *ix {
        Instruction::Init { start_time, end_time, amount } => {
            open(accounts, escrow, start_time, end_time, amount, env)
        }
        Instruction::Withdraw { amount } => withdraw(accounts, escrow, amount, env),
        Instruction::Cancel => cancel(accounts, escrow, env),
    }
}

fn open(
    accounts: &[AccountRef],
    escrow: Option<&StreamAccount>,
    start_time: u32,
    end_time: u32,
    amount: u64,
    env: &Env,
) -> Result<Transition, StreamError> {
    accounts::expect_len(accounts, INIT_ACCOUNTS)?;
    let sender = &accounts[INIT_SENDER];
    let recipient = &accounts[INIT_RECIPIENT];
    let a_escrow = &accounts[INIT_ESCROW];
    let system = &accounts[INIT_SYSTEM];

    accounts::expect_signer(sender, StreamError::SenderMustSign)?;
    accounts::expect_writable(sender)?;
    accounts::expect_writable(recipient)?;
    accounts::expect_signer(a_escrow, StreamError::EscrowMustSign)?;
    accounts::expect_writable(a_escrow)?;
    accounts::expect_key(system, &system_program::id(), StreamError::InvalidSystemProgram)?;
    let collector = accounts.get(INIT_RENT_COLLECTOR).unwrap_or(sender);
    accounts::expect_distinct(a_escrow, &[sender, recipient, collector])?;

    if escrow.is_some() || a_escrow.lamports != 0 || a_escrow.data_len != 0 {
        return Err(StreamError::EscrowAlreadyInUse);
    }
    if amount == 0 {
        return Err(StreamError::ZeroDeposit);
    }
    if end_time <= start_time {
        return Err(StreamError::InvalidTimeRange);
    }
    if i64::from(start_time) < env.now {
        return Err(StreamError::StartTimeInPast);
    }

    let funding = amount
        .checked_add(env.rent_reserve)
        .ok_or(StreamError::ArithmeticOverflow)?;
    if sender.lamports < funding {
        return Err(StreamError::InsufficientSenderFunds);
    }

    let stream = StreamAccount::new(
        &sender.key,
        &recipient.key,
        &collector.key,
        amount,
        start_time,
        end_time,
    );
    Ok(Transition::Open { stream, funding })
}

fn withdraw(
    accounts: &[AccountRef],
    escrow: Option<&StreamAccount>,
    requested: u64,
    env: &Env,
) -> Result<Transition, StreamError> {
    accounts::expect_len(accounts, WITHDRAW_ACCOUNTS)?;
    let recipient = &accounts[WITHDRAW_RECIPIENT];
    let a_escrow = &accounts[WITHDRAW_ESCROW];
    let collector = &accounts[WITHDRAW_RENT_COLLECTOR];
    let system = &accounts[WITHDRAW_SYSTEM];

    accounts::expect_signer(recipient, StreamError::RecipientMustSign)?;
    accounts::expect_writable(recipient)?;
    accounts::expect_writable(a_escrow)?;
    accounts::expect_writable(collector)?;
    accounts::expect_key(system, &system_program::id(), StreamError::InvalidSystemProgram)?;

    let stream = escrow.ok_or(StreamError::StreamNotFound)?;
    accounts::expect_key(recipient, &stream.recipient(), StreamError::RecipientMismatch)?;
    accounts::expect_key(collector, &stream.rent_collector(), StreamError::RentCollectorMismatch)?;
    accounts::expect_distinct(a_escrow, &[recipient, collector])?;
    expect_funded(a_escrow, stream)?;

    let available = withdrawable_amount(stream, env.now);
    if available == 0 {
        return Err(StreamError::NothingToWithdraw);
    }
    let amount = if requested == 0 { available } else { requested.min(available) };
    credit_check(recipient, amount)?;

    let mut next = *stream;
    next.withdrawn_amount = next
        .withdrawn_amount
        .checked_add(amount)
        .ok_or(StreamError::ArithmeticOverflow)?;
    let payout = Payout { to: WITHDRAW_RECIPIENT, amount };

    if next.withdrawn_amount == next.deposit_amount {
        let residual = a_escrow
            .lamports
            .checked_sub(amount)
            .ok_or(StreamError::EscrowUnderfunded)?;
        credit_check(collector, residual)?;
        return Ok(Transition::Close {
            recipient: payout,
            refund: None,
            collector: WITHDRAW_RENT_COLLECTOR,
        });
    }
    Ok(Transition::Withdraw { stream: next, payout })
}

fn cancel(
    accounts: &[AccountRef],
    escrow: Option<&StreamAccount>,
    env: &Env,
) -> Result<Transition, StreamError> {
    accounts::expect_len(accounts, CANCEL_ACCOUNTS)?;
    let sender = &accounts[CANCEL_SENDER];
    let recipient = &accounts[CANCEL_RECIPIENT];
    let a_escrow = &accounts[CANCEL_ESCROW];
    let system = &accounts[CANCEL_SYSTEM];

    accounts::expect_signer(sender, StreamError::SenderMustSign)?;
    accounts::expect_writable(sender)?;
    accounts::expect_writable(recipient)?;
    accounts::expect_writable(a_escrow)?;
    accounts::expect_key(system, &system_program::id(), StreamError::InvalidSystemProgram)?;

    let stream = escrow.ok_or(StreamError::StreamNotFound)?;
    accounts::expect_key(sender, &stream.sender(), StreamError::SenderMismatch)?;
    accounts::expect_key(recipient, &stream.recipient(), StreamError::RecipientMismatch)?;

    let collector = if stream.rent_collector() == sender.key {
        CANCEL_SENDER
    } else {
        let c = accounts
            .get(CANCEL_RENT_COLLECTOR)
            .ok_or(StreamError::NotEnoughAccounts)?;
        accounts::expect_key(c, &stream.rent_collector(), StreamError::RentCollectorMismatch)?;
        accounts::expect_writable(c)?;
        CANCEL_RENT_COLLECTOR
    };
    accounts::expect_distinct(a_escrow, &[sender, recipient, &accounts[collector]])?;
    expect_funded(a_escrow, stream)?;

    let (to_recipient, to_sender) = cancel_split(stream, env.now);
    let residual = a_escrow
        .lamports
        .checked_sub(stream.outstanding())
        .ok_or(StreamError::EscrowUnderfunded)?;
    credit_check(recipient, to_recipient)?;
    credit_check(sender, to_sender)?;
    credit_check(&accounts[collector], residual)?;

    Ok(Transition::Close {
        recipient: Payout { to: CANCEL_RECIPIENT, amount: to_recipient },
        refund: (to_sender > 0).then_some(Payout { to: CANCEL_SENDER, amount: to_sender }),
        collector,
    })
}

fn expect_funded(a_escrow: &AccountRef, stream: &StreamAccount) -> Result<(), StreamError> {
    if a_escrow.lamports < stream.outstanding() {
        return Err(StreamError::EscrowUnderfunded);
    }
    Ok(())
}

fn credit_check(a: &AccountRef, amount: u64) -> Result<(), StreamError> {
    a.lamports
        .checked_add(amount)
        .map(|_| ())
        .ok_or(StreamError::ArithmeticOverflow)
}

// --- Ledger ---

/// In-memory arena of balances and stream accounts that executes real
/// program instructions through [`transition`].
#[derive(Clone, Debug)]
pub struct Ledger {
    program_id: Pubkey,
    rent_reserve: u64,
    balances: BTreeMap<Pubkey, u64>,
    streams: BTreeMap<Pubkey, StreamAccount>,
}

impl Ledger {
    pub fn new(program_id: Pubkey, rent_reserve: u64) -> Self {
        Self {
            program_id,
            rent_reserve,
            balances: BTreeMap::new(),
            streams: BTreeMap::new(),
        }
    }

    pub fn airdrop(&mut self, key: Pubkey, lamports: u64) {
        let bal = self.balances.entry(key).or_insert(0);
        *bal = bal.saturating_add(lamports);
    }

    pub fn balance(&self, key: &Pubkey) -> u64 {
        self.balances.get(key).copied().unwrap_or(0)
    }

    pub fn stream(&self, escrow: &Pubkey) -> Option<&StreamAccount> {
        self.streams.get(escrow)
    }

    pub fn total_lamports(&self) -> u128 {
        self.balances.values().map(|&b| u128::from(b)).sum()
    }

    /// Runs one instruction at `now`. On error the ledger is untouched.
    pub fn process(&mut self, ix: &SolInstruction, now: i64) -> Result<Transition, StreamError> {
        if ix.program_id != self.program_id {
            return Err(StreamError::IncorrectProgramId);
        }
        let decoded = Instruction::decode(&ix.data)?;

        let refs: Vec<AccountRef> = ix
            .accounts
            .iter()
            .map(|m| AccountRef {
                key: m.pubkey,
                is_signer: m.is_signer,
                is_writable: m.is_writable,
                lamports: self.balance(&m.pubkey),
                data_len: if self.streams.contains_key(&m.pubkey) { STREAM_LEN } else { 0 },
            })
            .collect();
        let escrow_key = refs.get(escrow_position(&decoded)).map(|a| a.key);
        let escrow = escrow_key.and_then(|k| self.streams.get(&k)).copied();

        let env = Env { now, rent_reserve: self.rent_reserve };
        let t = transition(&decoded, &refs, escrow.as_ref(), &env)?;
        self.apply(&refs, escrow_position(&decoded), &t)?;
        Ok(t)
    }

    fn apply(
        &mut self,
        refs: &[AccountRef],
        escrow_at: usize,
        t: &Transition,
    ) -> Result<(), StreamError> {
        let escrow_key = refs[escrow_at].key;
        let mut staged: BTreeMap<Pubkey, u64> = BTreeMap::new();

        match *t {
            Transition::Open { stream, funding } => {
                self.stage_move(&mut staged, &refs[INIT_SENDER].key, &escrow_key, funding)?;
                self.commit(staged);
                self.streams.insert(escrow_key, stream);
            }
            Transition::Withdraw { stream, payout } => {
                self.stage_move(&mut staged, &escrow_key, &refs[payout.to].key, payout.amount)?;
                self.commit(staged);
                self.streams.insert(escrow_key, stream);
            }
            Transition::Close { recipient, refund, collector } => {
                let to = refs[recipient.to].key;
                self.stage_move(&mut staged, &escrow_key, &to, recipient.amount)?;
                if let Some(r) = refund {
                    self.stage_move(&mut staged, &escrow_key, &refs[r.to].key, r.amount)?;
                }
                let residual = self.staged_balance(&staged, &escrow_key);
                self.stage_move(&mut staged, &escrow_key, &refs[collector].key, residual)?;
                self.commit(staged);
                self.balances.remove(&escrow_key);
                self.streams.remove(&escrow_key);
            }
        }
        Ok(())
    }

    fn staged_balance(&self, staged: &BTreeMap<Pubkey, u64>, key: &Pubkey) -> u64 {
        staged.get(key).copied().unwrap_or_else(|| self.balance(key))
    }

    fn stage_move(
        &self,
        staged: &mut BTreeMap<Pubkey, u64>,
        from: &Pubkey,
        to: &Pubkey,
        amount: u64,
    ) -> Result<(), StreamError> {
        let src = self
            .staged_balance(staged, from)
            .checked_sub(amount)
            .ok_or(StreamError::EscrowUnderfunded)?;
        staged.insert(*from, src);
        let dst = self
            .staged_balance(staged, to)
            .checked_add(amount)
            .ok_or(StreamError::ArithmeticOverflow)?;
        staged.insert(*to, dst);
        Ok(())
    }

    fn commit(&mut self, staged: BTreeMap<Pubkey, u64>) {
        self.balances.extend(staged);
    }
}
