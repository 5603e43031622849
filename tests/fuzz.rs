use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use solana_program::pubkey::Pubkey;
use streamflow_prog::{
    engine::{self, Ledger, Transition},
    instruction::{self, StreamParams},
};

const RENT: u64 = 1_837_440;

struct Stream {
    escrow: Pubkey,
    sender: Pubkey,
    recipient: Pubkey,
    collector: Pubkey,
    /// Collector key used by this stream only, so its balance is exactly the rent it received.
    fresh_collector: bool,
    deposit: u64,
    paid: u64,
}

impl Stream {
    fn cancel_ix(&self, program_id: &Pubkey) -> solana_program::instruction::Instruction {
        if self.collector == self.sender {
            instruction::cancel(program_id, &self.sender, &self.recipient, &self.escrow)
        } else {
            instruction::cancel_with_rent_collector(
                program_id,
                &self.sender,
                &self.recipient,
                &self.escrow,
                &self.collector,
            )
        }
    }
}

#[test]
fn deterministic_fuzz_simulation() {
    let seed = [0x5au8; 16];
    let mut rng = XorShiftRng::from_seed(seed);
    let program_id = streamflow_prog::id();
    let mut ledger = Ledger::new(program_id, RENT);

    let users: Vec<Pubkey> = (0..6).map(|_| Pubkey::new_unique()).collect();
    for u in &users {
        ledger.airdrop(*u, 50_000_000_000);
    }
    let total = ledger.total_lamports();

    let mut open: Vec<Stream> = Vec::new();
    let mut now: i64 = 1_000;
    let mut latest = now;

    for _ in 0..2_000 {
        // Clock readings are not monotonic across slots.
        now = (now + rng.gen_range(-30..40)).max(1_000);
        latest = latest.max(now);
        let op: u8 = rng.gen_range(0..4);

        match op {
            0 => {
                // Open
                let sender = users[rng.gen_range(0..users.len())];
                let recipient = users[rng.gen_range(0..users.len())];
                let escrow = Pubkey::new_unique();
                let (collector, fresh_collector) = match rng.gen_range(0..3) {
                    0 => (sender, false),
                    1 => (users[rng.gen_range(0..users.len())], false),
                    _ => (Pubkey::new_unique(), true),
                };
                let start = now + rng.gen_range(-5..50);
                let end = start + rng.gen_range(-2..400);
                let amount = rng.gen_range(0..5_000_000_000u64);
                let params =
                    StreamParams { start_time: start as u32, end_time: end as u32, amount };
                let ix = instruction::init_with_rent_collector(
                    &program_id,
                    &sender,
                    &recipient,
                    &escrow,
                    &collector,
                    &params,
                );
                if ledger.process(&ix, now).is_ok() {
                    assert!(start >= now && end > start && amount > 0);
                    assert_eq!(ledger.stream(&escrow).unwrap().rent_collector(), collector);
                    open.push(Stream {
                        escrow,
                        sender,
                        recipient,
                        collector,
                        fresh_collector,
                        deposit: amount,
                        paid: 0,
                    });
                }
            }
            1 | 2 => {
                // Withdraw
                if open.is_empty() {
                    continue;
                }
                let idx = rng.gen_range(0..open.len());
                let s = &mut open[idx];
                let amount = if rng.gen_bool(0.5) { 0 } else { rng.gen_range(1..=s.deposit) };
                let before = ledger.balance(&s.recipient);
                let available = ledger
                    .stream(&s.escrow)
                    .map(|st| engine::withdrawable_amount(st, now))
                    .unwrap_or(0);
                let expected = if amount == 0 { available } else { amount.min(available) };
                let ix = instruction::withdraw(
                    &program_id,
                    &s.recipient,
                    &s.escrow,
                    &s.collector,
                    amount,
                );
                match ledger.process(&ix, now) {
                    Ok(Transition::Withdraw { payout, .. }) => {
                        assert!(expected > 0);
                        assert_eq!(payout.amount, expected);
                        s.paid += payout.amount;
                    }
                    Ok(Transition::Close { recipient, refund, .. }) => {
                        assert_eq!(recipient.amount, expected);
                        assert!(refund.is_none());
                        assert_eq!(s.paid + recipient.amount, s.deposit);
                        if s.fresh_collector {
                            assert_eq!(ledger.balance(&s.collector), RENT);
                        }
                        open.swap_remove(idx);
                    }
                    Ok(other) => panic!("withdraw produced {:?}", other),
                    Err(_) => {
                        assert_eq!(expected, 0);
                        assert_eq!(ledger.balance(&s.recipient), before);
                    }
                }
            }
            _ => {
                // Cancel
                if open.is_empty() {
                    continue;
                }
                let idx = rng.gen_range(0..open.len());
                let s = &open[idx];
                match ledger.process(&s.cancel_ix(&program_id), now) {
                    Ok(Transition::Close { recipient, refund, .. }) => {
                        let refunded = refund.map_or(0, |r| r.amount);
                        // Everything deposited ends up with either the recipient or the sender.
                        assert_eq!(s.paid + recipient.amount + refunded, s.deposit);
                        if s.fresh_collector {
                            assert_eq!(ledger.balance(&s.collector), RENT);
                        }
                        open.swap_remove(idx);
                    }
                    Ok(other) => panic!("cancel produced {:?}", other),
                    Err(_) => assert!(ledger.stream(&s.escrow).is_some()),
                }
            }
        }

        // Lamports are only ever moved, never created or destroyed.
        assert_eq!(ledger.total_lamports(), total);
        for s in &open {
            let st = ledger.stream(&s.escrow).unwrap();
            assert!(st.withdrawn_amount <= engine::vested_amount(st, latest));
            assert!(st.withdrawn_amount < st.deposit_amount);
            assert_eq!(st.withdrawn_amount, s.paid);
            assert_eq!(ledger.balance(&s.escrow), RENT + st.deposit_amount - st.withdrawn_amount);
        }
    }
}

#[test]
fn vested_is_monotonic_and_bounded() {
    let mut rng = XorShiftRng::from_seed([0x11u8; 16]);
    for _ in 0..1_000 {
        let start: u32 = rng.gen();
        let end = start.saturating_add(rng.gen_range(1..1_000_000));
        if end <= start {
            continue;
        }
        let deposit: u64 = rng.gen();
        let k = Pubkey::new_unique();
        let s = streamflow_prog::state::StreamAccount::new(&k, &k, &k, deposit, start, end);

        let mut prev = 0u64;
        let mut t = i64::from(start) - 10;
        while t <= i64::from(end) + 10 {
            let v = engine::vested_amount(&s, t);
            assert!(v >= prev && v <= deposit);
            assert_eq!(engine::refundable_amount(&s, t) + v, deposit);
            prev = v;
            t += i64::from((end - start) / 7).max(1);
        }
        assert_eq!(engine::vested_amount(&s, i64::from(end)), deposit);
    }
}
