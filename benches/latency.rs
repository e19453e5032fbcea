//! Latency benchmarks for the firewall pipeline
//!
//! Everything before the validator runs on every `eth_sendRawTransaction`:
//! - Decode & classify
//! - Selector resolution and argument decoding
//! - Reviewer payload serialization

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{address, Address, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tx_firewall::address_book::{AddressBook, AddressBookStore, KnownContract};
use tx_firewall::builder::TransactionBuilder;
use tx_firewall::decoder::{decode_transaction, hex_to_bytes};
use tx_firewall::jsonrpc::RpcBody;
use tx_firewall::standard_abis::find_standard_function;
use tx_firewall::transaction::classify;

#[path = "../tests/common/mod.rs"]
mod common;

sol! {
    function transfer(address to, uint256 value) returns (bool);
}

const TOKEN: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
const RECIPIENT: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");

fn transfer_hex() -> String {
    let call = transferCall {
        to: RECIPIENT,
        value: U256::from(1_000_000u64),
    };
    common::legacy_hex(TOKEN, 0, 20_000_000_000, call.abi_encode())
}

/// Benchmark transaction decoding and classification
fn bench_decode_transaction(c: &mut Criterion) {
    let raw = hex_to_bytes(&transfer_hex()).unwrap();

    c.bench_function("decode_and_classify", |b| {
        b.iter(|| {
            let tx = decode_transaction(black_box(&raw)).unwrap();
            black_box(classify(&tx))
        })
    });
}

/// Benchmark standard ABI selector probing
fn bench_selector_resolution(c: &mut Criterion) {
    let transfer: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
    let unknown: [u8; 4] = [0x38, 0xed, 0x17, 0x39];

    c.bench_function("standard_selector_hit", |b| {
        b.iter(|| black_box(find_standard_function(black_box(&transfer))))
    });
    c.bench_function("standard_selector_miss", |b| {
        b.iter(|| black_box(find_standard_function(black_box(&unknown))))
    });
}

/// Benchmark the full builder with a warm selector cache
fn bench_build_enriched(c: &mut Criterion) {
    let book = AddressBook::new(
        HashMap::from([(common::sender(), "Treasury".to_string())]),
        HashMap::from([(
            TOKEN,
            KnownContract {
                label: "USDC".to_string(),
                abi: None,
            },
        )]),
    );
    let builder = TransactionBuilder::new(Arc::new(AddressBookStore::from_book(book)));
    let raw = transfer_hex();

    c.bench_function("build_enriched_transaction", |b| {
        b.iter(|| black_box(builder.from_raw_hex(black_box(&raw), None).unwrap()))
    });
}

/// Benchmark request parsing and reviewer payload serialization
fn bench_format_payload(c: &mut Criterion) {
    let body = serde_json::to_vec(&common::send_raw(1, &transfer_hex())).unwrap();
    let builder = TransactionBuilder::new(Arc::new(AddressBookStore::from_book(AddressBook::new(
        HashMap::new(),
        HashMap::new(),
    ))));
    let tx = builder.from_raw_hex(&transfer_hex(), None).unwrap();

    c.bench_function("parse_rpc_body", |b| {
        b.iter(|| black_box(RpcBody::parse(black_box(&body)).unwrap()))
    });
    c.bench_function("format_payload_json", |b| {
        b.iter(|| black_box(tx.payload().to_json().unwrap()))
    });
}

criterion_group!(
    benches,
    bench_decode_transaction,
    bench_selector_resolution,
    bench_build_enriched,
    bench_format_payload
);

criterion_main!(benches);
