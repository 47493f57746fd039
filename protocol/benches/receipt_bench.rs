// Receipt benchmarks for the POD protocol.
//
// Covers receipt hashing, buyer-side signing, seller-side recovery, and the
// wire encode/decode of a signed receipt.

use alloy_primitives::{Address, B256, U256};
use alloy_signer_local::PrivateKeySigner;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use pod_protocol::trade::{receipt_hash, ComplaintReceipt, Receipt, ReceiptBody, SignedReceipt};

const SESSION_ID: u64 = 42;

fn body() -> ReceiptBody {
    ReceiptBody {
        price: U256::from(1_000u64),
        expire_at: 1_900_000_000,
        receipt: Receipt::Complaint(ComplaintReceipt {
            seed2: B256::repeat_byte(0x22),
            k_root: B256::repeat_byte(0x33),
            count: 11,
        }),
    }
}

fn bench_receipt_hash(c: &mut Criterion) {
    let body = body();
    let (seller, buyer) = (Address::repeat_byte(1), Address::repeat_byte(2));
    c.bench_function("receipt/hash", |b| {
        b.iter(|| receipt_hash(SESSION_ID, seller, buyer, &body));
    });
}

fn bench_sign(c: &mut Criterion) {
    let signer = PrivateKeySigner::random();
    let seller = Address::repeat_byte(1);
    c.bench_function("receipt/sign", |b| {
        b.iter(|| SignedReceipt::sign(&signer, SESSION_ID, seller, signer.address(), body()));
    });
}

fn bench_verify(c: &mut Criterion) {
    let signer = PrivateKeySigner::random();
    let seller = Address::repeat_byte(1);
    let signed = SignedReceipt::sign(&signer, SESSION_ID, seller, signer.address(), body())
        .expect("sign");
    c.bench_function("receipt/verify", |b| {
        b.iter(|| signed.verify(SESSION_ID, seller, signer.address()));
    });
}

fn bench_wire(c: &mut Criterion) {
    let signer = PrivateKeySigner::random();
    let signed = SignedReceipt::sign(&signer, SESSION_ID, Address::ZERO, signer.address(), body())
        .expect("sign");
    let encoded = signed.encode().expect("encode");

    let mut group = c.benchmark_group("receipt/wire");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode", |b| b.iter(|| signed.encode()));
    group.bench_function("decode", |b| b.iter(|| SignedReceipt::decode(&encoded)));
    group.finish();
}

criterion_group!(benches, bench_receipt_hash, bench_sign, bench_verify, bench_wire);
criterion_main!(benches);
