//! Benchmarks for envelope assembly
//!
//! Assembly measures every candidate envelope on the wire encoding, so its
//! cost grows with the number of staging chunks. Benchmarks:
//! - Attestation planning
//! - Full assembly across payload sizes
//! - Address derivation for a purchase

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use listing_purchase::config::AssemblerConfig;
use listing_purchase::oracle::{FeedId, PriceAttestation};
use listing_purchase::program::PurchaseAccounts;
use listing_purchase::tx_builder::{ResolvedAttestations, TransactionAssembler};

fn attestation(len: usize) -> PriceAttestation {
    PriceAttestation {
        feed_id: FeedId::new([7; 32]),
        payload: vec![0x5a; len],
        snapshot: None,
    }
}

fn consumer(feed: FeedId) -> impl Fn(&ResolvedAttestations) -> anyhow::Result<Vec<Instruction>> {
    let program = Pubkey::new_unique();
    move |resolved: &ResolvedAttestations| {
        let price = resolved
            .get(&feed)
            .ok_or_else(|| anyhow::anyhow!("missing feed"))?;
        Ok(vec![Instruction {
            program_id: program,
            accounts: vec![AccountMeta::new_readonly(price, false)],
            data: vec![1; 80],
        }])
    }
}

fn bench_plan_attestations(c: &mut Criterion) {
    let asm = TransactionAssembler::new(AssemblerConfig::default(), Pubkey::new_unique());
    let payer = Pubkey::new_unique();
    let att = [attestation(1_000)];

    c.bench_function("plan_attestations_1k", |b| {
        b.iter(|| black_box(asm.plan_attestations(&payer, black_box(&att)).unwrap()))
    });
}

fn bench_assemble_payload_sizes(c: &mut Criterion) {
    let asm = TransactionAssembler::new(AssemblerConfig::default(), Pubkey::new_unique());
    let payer = Pubkey::new_unique();
    let mut group = c.benchmark_group("assemble");

    for len in [200usize, 1_000, 4_000] {
        let att = attestation(len);
        let plan = asm.plan_attestations(&payer, &[att.clone()]).unwrap();
        let builder = consumer(att.feed_id);

        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| black_box(asm.assemble(&payer, &plan, &builder).unwrap()))
        });
    }
    group.finish();
}

fn bench_compile_envelope(c: &mut Criterion) {
    let asm = TransactionAssembler::new(AssemblerConfig::default(), Pubkey::new_unique());
    let payer = Pubkey::new_unique();
    let att = attestation(300);
    let plan = asm.plan_attestations(&payer, &[att.clone()]).unwrap();
    let envelopes = asm.assemble(&payer, &plan, &consumer(att.feed_id)).unwrap();
    let blockhash = Hash::new_unique();

    c.bench_function("compile_envelope", |b| {
        b.iter(|| black_box(envelopes[0].compile(&payer, blockhash).unwrap()))
    });
}

fn bench_purchase_derivation(c: &mut Criterion) {
    let program = Pubkey::new_unique();
    let buyer = Pubkey::new_unique();
    let seller = Pubkey::new_unique();
    let disambiguator = Pubkey::new_unique();

    c.bench_function("derive_purchase_accounts", |b| {
        b.iter(|| {
            black_box(
                PurchaseAccounts::derive(&program, &buyer, &seller, "Super Sword", &disambiguator)
                    .unwrap(),
            )
        })
    });
}

criterion_group!(
    benches,
    bench_plan_attestations,
    bench_assemble_payload_sizes,
    bench_compile_envelope,
    bench_purchase_derivation,
);
criterion_main!(benches);
