//! Streamflow: single-file Solana program for linearly vesting lamport streams.

#![deny(unsafe_code)]

solana_program::declare_id!("2DvvSEde36Ch3B52g9hKWDYbfmJimLpJwVBV9Cknypi4");

pub mod engine;

// 1. mod constants
pub mod constants {
    use core::mem::size_of;
    use crate::state::StreamAccount;

    pub const MAGIC: u64 = 0x5354524d464c4f57; // "STRMFLOW"
    pub const VERSION: u32 = 1;

    pub const STREAM_LEN: usize = size_of::<StreamAccount>();

    // Wire sizes, discriminant byte included.
    pub const INIT_LEN: usize = 17;
    pub const WITHDRAW_LEN: usize = 9;
    pub const CANCEL_LEN: usize = 1;

    // Account positions.
    pub const INIT_SENDER: usize = 0;
    pub const INIT_RECIPIENT: usize = 1;
    pub const INIT_ESCROW: usize = 2;
    pub const INIT_SYSTEM: usize = 3;
    pub const INIT_RENT_COLLECTOR: usize = 4;
    pub const INIT_ACCOUNTS: usize = 4;

    pub const WITHDRAW_RECIPIENT: usize = 0;
    pub const WITHDRAW_ESCROW: usize = 1;
    pub const WITHDRAW_RENT_COLLECTOR: usize = 2;
    pub const WITHDRAW_SYSTEM: usize = 3;
    pub const WITHDRAW_ACCOUNTS: usize = 4;

    pub const CANCEL_SENDER: usize = 0;
    pub const CANCEL_RECIPIENT: usize = 1;
    pub const CANCEL_ESCROW: usize = 2;
    pub const CANCEL_SYSTEM: usize = 3;
    pub const CANCEL_RENT_COLLECTOR: usize = 4;
    pub const CANCEL_ACCOUNTS: usize = 4;
}

// 2. mod error
pub mod error {
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive;
    use solana_program::{
        decode_error::DecodeError,
        msg,
        program_error::{PrintProgramError, ProgramError},
    };
    use thiserror::Error;

    /// Coarse classification of every rejection the program can produce.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum ErrorKind {
        Encoding,
        Decoding,
        Authorization,
        State,
        InsufficientFunds,
        InvalidParams,
    }

    /// Errors returned by the program as `ProgramError::Custom(code)`.
    /// Codes are the discriminants and must stay stable.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Error, FromPrimitive)]
    pub enum StreamError {
        #[error("Instruction data is malformed")]
        MalformedInstruction = 0,
        #[error("Not enough account keys")]
        NotEnoughAccounts = 1,
        #[error("Sender must sign")]
        SenderMustSign = 2,
        #[error("Recipient must sign")]
        RecipientMustSign = 3,
        #[error("Escrow must sign")]
        EscrowMustSign = 4,
        #[error("Account must be writable")]
        AccountNotWritable = 5,
        #[error("Sender does not match the stream")]
        SenderMismatch = 6,
        #[error("Recipient does not match the stream")]
        RecipientMismatch = 7,
        #[error("Rent collector does not match the stream")]
        RentCollectorMismatch = 8,
        #[error("Escrow account is already in use")]
        EscrowAlreadyInUse = 9,
        #[error("Stream not found")]
        StreamNotFound = 10,
        #[error("Unsupported stream account version")]
        InvalidVersion = 11,
        #[error("Escrow is not owned by this program")]
        IllegalEscrowOwner = 12,
        #[error("Escrow holds less than the outstanding deposit")]
        EscrowUnderfunded = 13,
        #[error("Sender cannot cover the deposit and rent")]
        InsufficientSenderFunds = 14,
        #[error("Nothing vested to withdraw")]
        NothingToWithdraw = 15,
        #[error("Deposit amount must be positive")]
        ZeroDeposit = 16,
        #[error("End time must be after start time")]
        InvalidTimeRange = 17,
        #[error("Start time is in the past")]
        StartTimeInPast = 18,
        #[error("Arithmetic overflow")]
        ArithmeticOverflow = 19,
        #[error("Expected the system program")]
        InvalidSystemProgram = 20,
        #[error("Escrow cannot also be a payout account")]
        EscrowAliased = 21,
        #[error("Instruction targets another program")]
        IncorrectProgramId = 22,
    }

    impl StreamError {
        pub fn kind(self) -> ErrorKind {
            use StreamError::*;
            match self {
                MalformedInstruction => ErrorKind::Decoding,
                SenderMustSign | RecipientMustSign | EscrowMustSign | AccountNotWritable
                | SenderMismatch | RecipientMismatch | RentCollectorMismatch => {
                    ErrorKind::Authorization
                }
                EscrowAlreadyInUse | StreamNotFound | InvalidVersion | IllegalEscrowOwner
                | EscrowUnderfunded | ArithmeticOverflow => ErrorKind::State,
                InsufficientSenderFunds | NothingToWithdraw => ErrorKind::InsufficientFunds,
                NotEnoughAccounts | ZeroDeposit | InvalidTimeRange | StartTimeInPast
                | InvalidSystemProgram | EscrowAliased | IncorrectProgramId => {
                    ErrorKind::InvalidParams
                }
            }
        }
    }

    impl From<StreamError> for ProgramError {
        fn from(e: StreamError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }

    impl<T> DecodeError<T> for StreamError {
        fn type_of() -> &'static str {
            "StreamError"
        }
    }

    impl PrintProgramError for StreamError {
        fn print<E>(&self)
        where
            E: 'static + std::error::Error + DecodeError<E> + PrintProgramError + FromPrimitive,
        {
            msg!("STREAM-ERROR: {}", self);
        }
    }

    /// Errors produced by the instruction codec.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
    pub enum CodecError {
        #[error("instruction data is empty")]
        Empty,
        #[error("unknown instruction discriminant {0}")]
        UnknownDiscriminant(u8),
        #[error("instruction {tag} takes {expected} bytes, got {actual}")]
        InvalidLength { tag: u8, expected: usize, actual: usize },
        #[error("start time {0} does not fit in 32 bits")]
        StartTimeOutOfRange(i64),
        #[error("end time {0} does not fit in 32 bits")]
        EndTimeOutOfRange(i64),
        #[error("amount {0} does not fit in 64 bits")]
        AmountOutOfRange(u128),
        #[error("buffer holds {available} bytes, {required} required")]
        BufferTooSmall { required: usize, available: usize },
    }

    impl CodecError {
        pub fn kind(&self) -> ErrorKind {
            match self {
                CodecError::Empty
                | CodecError::UnknownDiscriminant(_)
                | CodecError::InvalidLength { .. } => ErrorKind::Decoding,
                CodecError::StartTimeOutOfRange(_)
                | CodecError::EndTimeOutOfRange(_)
                | CodecError::AmountOutOfRange(_)
                | CodecError::BufferTooSmall { .. } => ErrorKind::Encoding,
            }
        }
    }

    impl From<CodecError> for ProgramError {
        fn from(_: CodecError) -> Self {
            ProgramError::InvalidInstructionData
        }
    }

    impl From<CodecError> for StreamError {
        fn from(_: CodecError) -> Self {
            StreamError::MalformedInstruction
        }
    }
}

// 3. mod ix
pub mod ix {
    use arrayref::{array_mut_ref, array_ref, array_refs, mut_array_refs};
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive;
    use crate::{
        constants::{CANCEL_LEN, INIT_LEN, WITHDRAW_LEN},
        error::CodecError,
    };

    /// Leading discriminant byte.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, FromPrimitive)]
    #[repr(u8)]
    pub enum Tag {
        Init = 0,
        Withdraw = 1,
        Cancel = 2,
    }

    impl Tag {
        pub const fn packed_len(self) -> usize {
            match self {
                Tag::Init => INIT_LEN,
                Tag::Withdraw => WITHDRAW_LEN,
                Tag::Cancel => CANCEL_LEN,
            }
        }
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Instruction {
        /// Opens a stream and escrows `amount` lamports.
        ///
        /// 0. `[signer, writable]` sender
        /// 1. `[writable]` recipient
        /// 2. `[signer, writable]` escrow (fresh)
        /// 3. `[]` system program
        /// 4. `[]` rent collector, optional (defaults to the sender)
        Init { start_time: u32, end_time: u32, amount: u64 },
        /// Releases vested lamports. `amount == 0` withdraws everything available.
        ///
        /// 0. `[signer, writable]` recipient
        /// 1. `[writable]` escrow
        /// 2. `[writable]` rent collector
        /// 3. `[]` system program
        Withdraw { amount: u64 },
        /// Settles the stream and closes the escrow.
        ///
        /// 0. `[signer, writable]` sender
        /// 1. `[writable]` recipient
        /// 2. `[writable]` escrow
        /// 3. `[]` system program
        /// 4. `[writable]` rent collector, required when it is not the sender
        Cancel,
    }

    impl Instruction {
        /// Builds an `Init`, rejecting values wider than their wire fields.
        pub fn try_init(start_time: i64, end_time: i64, amount: u128) -> Result<Self, CodecError> {
            let start = u32::try_from(start_time)
                .map_err(|_| CodecError::StartTimeOutOfRange(start_time))?;
            let end = u32::try_from(end_time).map_err(|_| CodecError::EndTimeOutOfRange(end_time))?;
            let amount = u64::try_from(amount).map_err(|_| CodecError::AmountOutOfRange(amount))?;
            Ok(Instruction::Init { start_time: start, end_time: end, amount })
        }

        pub fn try_withdraw(amount: u128) -> Result<Self, CodecError> {
            let amount = u64::try_from(amount).map_err(|_| CodecError::AmountOutOfRange(amount))?;
            Ok(Instruction::Withdraw { amount })
        }

        pub fn tag(&self) -> Tag {
            match self {
                Instruction::Init { .. } => Tag::Init,
                Instruction::Withdraw { .. } => Tag::Withdraw,
                Instruction::Cancel => Tag::Cancel,
            }
        }

        pub fn packed_len(&self) -> usize {
            self.tag().packed_len()
        }

        pub fn decode(input: &[u8]) -> Result<Self, CodecError> {
            let (&byte, _) = input.split_first().ok_or(CodecError::Empty)?;
            let tag = Tag::from_u8(byte).ok_or(CodecError::UnknownDiscriminant(byte))?;
            let expected = tag.packed_len();
            if input.len() != expected {
                return Err(CodecError::InvalidLength { tag: byte, expected, actual: input.len() });
            }

            match tag {
                Tag::Init => {
                    let src = array_ref![input, 0, INIT_LEN];
                    let (_, start, end, amount) = array_refs![src, 1, 4, 4, 8];
                    Ok(Instruction::Init {
                        start_time: u32::from_le_bytes(*start),
                        end_time: u32::from_le_bytes(*end),
                        amount: u64::from_le_bytes(*amount),
                    })
                }
                Tag::Withdraw => {
                    let src = array_ref![input, 0, WITHDRAW_LEN];
                    let (_, amount) = array_refs![src, 1, 8];
                    Ok(Instruction::Withdraw { amount: u64::from_le_bytes(*amount) })
                }
                Tag::Cancel => Ok(Instruction::Cancel),
            }
        }

        pub fn encode(&self) -> Vec<u8> {
            let mut buf = vec![0u8; self.packed_len()];
            self.pack(&mut buf);
            buf
        }

        /// Writes the instruction at the front of `dst`, returning the bytes written.
        pub fn encode_into(&self, dst: &mut [u8]) -> Result<usize, CodecError> {
            let len = self.packed_len();
            if dst.len() < len {
                return Err(CodecError::BufferTooSmall { required: len, available: dst.len() });
            }
            self.pack(&mut dst[..len]);
            Ok(len)
        }

        // `dst.len()` is exactly `packed_len()`.
        fn pack(&self, dst: &mut [u8]) {
            match *self {
                Instruction::Init { start_time, end_time, amount } => {
                    let dst = array_mut_ref![dst, 0, INIT_LEN];
                    let (tag, start, end, amt) = mut_array_refs![dst, 1, 4, 4, 8];
                    tag[0] = Tag::Init as u8;
                    *start = start_time.to_le_bytes();
                    *end = end_time.to_le_bytes();
                    *amt = amount.to_le_bytes();
                }
                Instruction::Withdraw { amount } => {
                    let dst = array_mut_ref![dst, 0, WITHDRAW_LEN];
                    let (tag, amt) = mut_array_refs![dst, 1, 8];
                    tag[0] = Tag::Withdraw as u8;
                    *amt = amount.to_le_bytes();
                }
                Instruction::Cancel => {
                    dst[0] = Tag::Cancel as u8;
                }
            }
        }
    }

}

// 4. mod instruction (client builders)
pub mod instruction {
    use solana_program::{
        instruction::{AccountMeta, Instruction as SolInstruction},
        pubkey::Pubkey,
        system_program,
    };
    use crate::ix::Instruction;

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct StreamParams {
        pub start_time: u32,
        pub end_time: u32,
        pub amount: u64,
    }

    pub fn init(
        program_id: &Pubkey,
        sender: &Pubkey,
        recipient: &Pubkey,
        escrow: &Pubkey,
        params: &StreamParams,
    ) -> SolInstruction {
        let data = Instruction::Init {
            start_time: params.start_time,
            end_time: params.end_time,
            amount: params.amount,
        }
        .encode();
        SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*sender, true),
                AccountMeta::new(*recipient, false),
                AccountMeta::new(*escrow, true),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data,
        }
    }

    /// Like [`init`], recording `rent_collector` instead of the sender.
    pub fn init_with_rent_collector(
        program_id: &Pubkey,
        sender: &Pubkey,
        recipient: &Pubkey,
        escrow: &Pubkey,
        rent_collector: &Pubkey,
        params: &StreamParams,
    ) -> SolInstruction {
        let mut ix = init(program_id, sender, recipient, escrow, params);
        ix.accounts.push(AccountMeta::new_readonly(*rent_collector, false));
        ix
    }

    pub fn withdraw(
        program_id: &Pubkey,
        recipient: &Pubkey,
        escrow: &Pubkey,
        rent_collector: &Pubkey,
        amount: u64,
    ) -> SolInstruction {
        SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*recipient, true),
                AccountMeta::new(*escrow, false),
                AccountMeta::new(*rent_collector, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data: Instruction::Withdraw { amount }.encode(),
        }
    }

    pub fn cancel(
        program_id: &Pubkey,
        sender: &Pubkey,
        recipient: &Pubkey,
        escrow: &Pubkey,
    ) -> SolInstruction {
        SolInstruction {
            program_id: *program_id,
            accounts: vec![
                AccountMeta::new(*sender, true),
                AccountMeta::new(*recipient, false),
                AccountMeta::new(*escrow, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
            data: Instruction::Cancel.encode(),
        }
    }

    pub fn cancel_with_rent_collector(
        program_id: &Pubkey,
        sender: &Pubkey,
        recipient: &Pubkey,
        escrow: &Pubkey,
        rent_collector: &Pubkey,
    ) -> SolInstruction {
        let mut ix = cancel(program_id, sender, recipient, escrow);
        ix.accounts.push(AccountMeta::new(*rent_collector, false));
        ix
    }
}

// 5. mod accounts
pub mod accounts {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};
    use crate::error::StreamError;

    /// What the state machine observes about one referenced account.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct AccountRef {
        pub key: Pubkey,
        pub is_signer: bool,
        pub is_writable: bool,
        pub lamports: u64,
        pub data_len: usize,
    }

    impl AccountRef {
        pub fn from_info(ai: &AccountInfo) -> Self {
            Self {
                key: *ai.key,
                is_signer: ai.is_signer,
                is_writable: ai.is_writable,
                lamports: ai.lamports(),
                data_len: ai.data_len(),
            }
        }
    }

    pub fn expect_len(accounts: &[AccountRef], n: usize) -> Result<(), StreamError> {
        if accounts.len() < n {
            return Err(StreamError::NotEnoughAccounts);
        }
        Ok(())
    }

    pub fn expect_signer(a: &AccountRef, err: StreamError) -> Result<(), StreamError> {
        if !a.is_signer {
            return Err(err);
        }
        Ok(())
    }

    pub fn expect_writable(a: &AccountRef) -> Result<(), StreamError> {
        if !a.is_writable {
            return Err(StreamError::AccountNotWritable);
        }
        Ok(())
    }

    pub fn expect_key(
        a: &AccountRef,
        expected: &Pubkey,
        err: StreamError,
    ) -> Result<(), StreamError> {
        if a.key != *expected {
            return Err(err);
        }
        Ok(())
    }

    pub fn expect_distinct(escrow: &AccountRef, others: &[&AccountRef]) -> Result<(), StreamError> {
        if others.iter().any(|o| o.key == escrow.key) {
            return Err(StreamError::EscrowAliased);
        }
        Ok(())
    }

    pub fn expect_owner(ai: &AccountInfo, owner: &Pubkey) -> Result<(), ProgramError> {
        if ai.owner != owner {
            return Err(StreamError::IllegalEscrowOwner.into());
        }
        Ok(())
    }
}

// 6. mod state
pub mod state {
    use arrayref::array_ref;
    use bytemuck::{Pod, Zeroable};
    use memoffset::offset_of;
    use solana_program::{program_error::ProgramError, pubkey::Pubkey};
    use crate::{
        constants::{MAGIC, STREAM_LEN, VERSION},
        error::StreamError,
    };

    /// Escrow account data. Lamports held = rent reserve + (deposit - withdrawn).
    #[repr(C)]
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Pod, Zeroable)]
    pub struct StreamAccount {
        pub magic: u64,
        pub version: u32,
        pub _padding: [u8; 4],
        pub sender: [u8; 32],
        pub recipient: [u8; 32],
        pub rent_collector: [u8; 32],
        pub deposit_amount: u64,
        pub withdrawn_amount: u64,
        pub start_time: u32,
        pub end_time: u32,
    }

    impl StreamAccount {
        pub fn new(
            sender: &Pubkey,
            recipient: &Pubkey,
            rent_collector: &Pubkey,
            deposit_amount: u64,
            start_time: u32,
            end_time: u32,
        ) -> Self {
            Self {
                magic: MAGIC,
                version: VERSION,
                _padding: [0; 4],
                sender: sender.to_bytes(),
                recipient: recipient.to_bytes(),
                rent_collector: rent_collector.to_bytes(),
                deposit_amount,
                withdrawn_amount: 0,
                start_time,
                end_time,
            }
        }

        pub fn sender(&self) -> Pubkey {
            Pubkey::new_from_array(self.sender)
        }

        pub fn recipient(&self) -> Pubkey {
            Pubkey::new_from_array(self.recipient)
        }

        pub fn rent_collector(&self) -> Pubkey {
            Pubkey::new_from_array(self.rent_collector)
        }

        /// Deposit not yet paid out to the recipient.
        pub fn outstanding(&self) -> u64 {
            self.deposit_amount.saturating_sub(self.withdrawn_amount)
        }
    }

    /// `Ok(None)` when the data holds no stream (empty, zeroed after close, or foreign).
    pub fn load(data: &[u8]) -> Result<Option<StreamAccount>, StreamError> {
        if data.len() < STREAM_LEN {
            return Ok(None);
        }
        let magic = u64::from_le_bytes(*array_ref![data, offset_of!(StreamAccount, magic), 8]);
        if magic != MAGIC {
            return Ok(None);
        }
        let version = u32::from_le_bytes(*array_ref![data, offset_of!(StreamAccount, version), 4]);
        if version != VERSION {
            return Err(StreamError::InvalidVersion);
        }

        let mut s = StreamAccount::zeroed();
        bytemuck::bytes_of_mut(&mut s).copy_from_slice(&data[..STREAM_LEN]);
        Ok(Some(s))
    }

    pub fn write(data: &mut [u8], s: &StreamAccount) -> Result<(), ProgramError> {
        if data.len() < STREAM_LEN {
            return Err(ProgramError::InvalidAccountData);
        }
        data[..STREAM_LEN].copy_from_slice(bytemuck::bytes_of(s));
        Ok(())
    }
}

// 7. mod lamports
pub mod lamports {
    use solana_program::{
        account_info::AccountInfo,
        entrypoint::ProgramResult,
        program::invoke,
        pubkey::Pubkey,
        system_instruction,
    };
    use crate::{constants::STREAM_LEN, error::StreamError};

    /// Allocates the escrow and funds it in one system CPI.
    pub fn create_escrow<'a>(
        program_id: &Pubkey,
        sender: &AccountInfo<'a>,
        escrow: &AccountInfo<'a>,
        system_program: &AccountInfo<'a>,
        funding: u64,
    ) -> ProgramResult {
        let ix = system_instruction::create_account(
            sender.key,
            escrow.key,
            funding,
            STREAM_LEN as u64,
            program_id,
        );
        invoke(&ix, &[sender.clone(), escrow.clone(), system_program.clone()])
    }

    /// Moves lamports out of a program-owned account.
    pub fn transfer(from: &AccountInfo, to: &AccountInfo, amount: u64) -> ProgramResult {
        if amount == 0 {
            return Ok(());
        }
        let mut src = from.try_borrow_mut_lamports()?;
        let mut dst = to.try_borrow_mut_lamports()?;
        **src = src.checked_sub(amount).ok_or(StreamError::EscrowUnderfunded)?;
        **dst = dst.checked_add(amount).ok_or(StreamError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Zeroes the account data and sweeps every remaining lamport to `collector`.
    pub fn close(account: &AccountInfo, collector: &AccountInfo) -> ProgramResult {
        account.try_borrow_mut_data()?.fill(0);
        let residual = account.lamports();
        transfer(account, collector, residual)
    }
}

// 8. mod processor
pub mod processor {
    use solana_program::{
        account_info::AccountInfo,
        entrypoint::ProgramResult,
        msg,
        program_error::ProgramError,
        pubkey::Pubkey,
        rent::Rent,
        sysvar::{clock::Clock, Sysvar},
    };
    use crate::{
        accounts::{self, AccountRef},
        constants::{INIT_ESCROW, INIT_SENDER, INIT_SYSTEM, STREAM_LEN},
        engine::{self, Env, Transition},
        ix::Instruction,
        lamports,
        state::{self, StreamAccount},
    };

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        let env = Env {
            now: Clock::get()?.unix_timestamp,
            rent_reserve: Rent::get()?.minimum_balance(STREAM_LEN),
        };
        process_instruction_at(program_id, accounts, instruction_data, &env)
    }

    /// Executes one instruction against an explicit clock and rent reserve.
    pub fn process_instruction_at<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
        env: &Env,
    ) -> ProgramResult {
        let instruction = Instruction::decode(instruction_data).map_err(|e| {
            msg!("Invalid instruction: {}", e);
            ProgramError::from(e)
        })?;

        let refs: Vec<AccountRef> = accounts.iter().map(AccountRef::from_info).collect();
        let escrow = match accounts.get(engine::escrow_position(&instruction)) {
            Some(ai) => load_stream(program_id, ai)?,
            None => None,
        };

        let transition = engine::transition(&instruction, &refs, escrow.as_ref(), env)
            .map_err(|e| {
                msg!("Rejected {:?}: {}", instruction.tag(), e);
                e
            })?;

        match transition {
            Transition::Open { stream, funding } => {
                let a_escrow = &accounts[INIT_ESCROW];
                lamports::create_escrow(
                    program_id,
                    &accounts[INIT_SENDER],
                    a_escrow,
                    &accounts[INIT_SYSTEM],
                    funding,
                )?;
                let mut data = a_escrow.try_borrow_mut_data()?;
                state::write(&mut data, &stream)?;
                msg!(
                    "Stream opened: deposit={} start={} end={}",
                    stream.deposit_amount,
                    stream.start_time,
                    stream.end_time
                );
            }
            Transition::Withdraw { stream, payout } => {
                let a_escrow = &accounts[engine::escrow_position(&instruction)];
                lamports::transfer(a_escrow, &accounts[payout.to], payout.amount)?;
                let mut data = a_escrow.try_borrow_mut_data()?;
                state::write(&mut data, &stream)?;
                msg!(
                    "Withdrew {} ({} of {})",
                    payout.amount,
                    stream.withdrawn_amount,
                    stream.deposit_amount
                );
            }
            Transition::Close { recipient, refund, collector } => {
                let a_escrow = &accounts[engine::escrow_position(&instruction)];
                lamports::transfer(a_escrow, &accounts[recipient.to], recipient.amount)?;
                if let Some(refund) = refund {
                    lamports::transfer(a_escrow, &accounts[refund.to], refund.amount)?;
                }
                let residual = a_escrow.lamports();
                lamports::close(a_escrow, &accounts[collector])?;
                msg!(
                    "Stream closed: recipient={} sender={} rent={}",
                    recipient.amount,
                    refund.map_or(0, |r| r.amount),
                    residual
                );
            }
        }
        Ok(())
    }

    fn load_stream(
        program_id: &Pubkey,
        escrow: &AccountInfo,
    ) -> Result<Option<StreamAccount>, ProgramError> {
        let data = escrow.try_borrow_data()?;
        let stream = state::load(&data)?;
        if stream.is_some() {
            accounts::expect_owner(escrow, program_id)?;
        }
        Ok(stream)
    }
}

// 9. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
#[allow(unsafe_code)]
pub mod entrypoint {
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult,
        program_error::PrintProgramError, pubkey::Pubkey,
    };
    use crate::{error::StreamError, processor};

    entrypoint!(process_instruction);

    fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        if let Err(error) = processor::process_instruction(program_id, accounts, instruction_data) {
            error.print::<StreamError>();
            return Err(error);
        }
        Ok(())
    }

    solana_security_txt::security_txt! {
        name: "streamflow-prog",
        project_url: "https://github.com/StreamFlow-Finance/streamflow-program",
        contacts: "link:https://github.com/StreamFlow-Finance/streamflow-program/issues",
        policy: "https://github.com/StreamFlow-Finance/streamflow-program/security/policy"
    }
}
