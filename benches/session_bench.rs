//! Benchmarks for session setup, ratchet messaging and sealed sender.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sealed_ratchet::chat::{
    IdentityKeyPair, PreKeyBundle, PreKeyRecord, ProtocolAddress, SenderAddress, SessionBuilder,
    SessionCipher, SignedPreKeyRecord,
};
use sealed_ratchet::crypto::KeyPair;
use sealed_ratchet::sealed::{
    sealed_sender_decrypt, sealed_sender_encrypt, SenderCertificate, ServerCertificate,
};
use sealed_ratchet::storage::{InMemoryProtocolStore, PreKeyStore, SignedPreKeyStore};

fn alice_address() -> ProtocolAddress {
    ProtocolAddress::new("alice", 1)
}

fn bob_address() -> ProtocolAddress {
    ProtocolAddress::new("bob", 1)
}

fn setup(rng: &mut StdRng) -> (InMemoryProtocolStore, InMemoryProtocolStore, PreKeyBundle) {
    let alice = InMemoryProtocolStore::new(IdentityKeyPair::generate(rng), 1);
    let mut bob = InMemoryProtocolStore::new(IdentityKeyPair::generate(rng), 2);

    let identity = bob.identity_key_pair().clone();
    let signed = SignedPreKeyRecord::generate(1, 0, &identity, rng);
    let pre_key = PreKeyRecord::new(1, KeyPair::generate(rng));
    bob.save_signed_pre_key(1, &signed).unwrap();
    bob.save_pre_key(1, &pre_key).unwrap();

    let bundle = PreKeyBundle::new(
        2,
        1,
        Some((1, pre_key.public_key())),
        1,
        signed.public_key(),
        signed.signature().to_vec(),
        *identity.identity_key(),
    );
    (alice, bob, bundle)
}

/// Both directions have carried one message.
fn established(rng: &mut StdRng) -> (InMemoryProtocolStore, InMemoryProtocolStore) {
    let (mut alice, mut bob, bundle) = setup(rng);
    let hello = SessionCipher::new(bob_address())
        .encrypt_with_bundle(b"hello", &bundle, &mut alice, rng)
        .unwrap();
    SessionCipher::new(alice_address())
        .decrypt(&hello, &mut bob, rng)
        .unwrap();
    let reply = SessionCipher::new(alice_address())
        .encrypt(b"reply", &mut bob)
        .unwrap();
    SessionCipher::new(bob_address())
        .decrypt(&reply, &mut alice, rng)
        .unwrap();
    (alice, bob)
}

fn bench_session_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_setup");
    let mut rng = StdRng::seed_from_u64(1);

    group.bench_function("process_pre_key_bundle", |b| {
        b.iter_batched(
            || setup(&mut rng),
            |(mut alice, _bob, bundle)| {
                let mut rng = StdRng::seed_from_u64(2);
                SessionBuilder::new(bob_address())
                    .process_pre_key_bundle(black_box(&bundle), &mut alice, &mut rng)
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("first_pre_key_message_round_trip", |b| {
        b.iter_batched(
            || setup(&mut rng),
            |(mut alice, mut bob, bundle)| {
                let mut rng = StdRng::seed_from_u64(3);
                let message = SessionCipher::new(bob_address())
                    .encrypt_with_bundle(b"hello", &bundle, &mut alice, &mut rng)
                    .unwrap();
                SessionCipher::new(alice_address())
                    .decrypt(&message, &mut bob, &mut rng)
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_ratchet_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("ratchet_messages");
    let mut rng = StdRng::seed_from_u64(4);

    for size in [64usize, 1024, 64 * 1024] {
        let plaintext = vec![0x42u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        let (mut alice, _bob) = established(&mut rng);
        group.bench_function(format!("encrypt_{}b", size), |b| {
            b.iter(|| {
                SessionCipher::new(bob_address())
                    .encrypt(black_box(&plaintext), &mut alice)
                    .unwrap()
            })
        });

        group.bench_function(format!("encrypt_decrypt_{}b", size), |b| {
            b.iter_batched(
                || established(&mut rng),
                |(mut alice, mut bob)| {
                    let mut rng = StdRng::seed_from_u64(5);
                    let message = SessionCipher::new(bob_address())
                        .encrypt(&plaintext, &mut alice)
                        .unwrap();
                    SessionCipher::new(alice_address())
                        .decrypt(&message, &mut bob, &mut rng)
                        .unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_sealed_sender(c: &mut Criterion) {
    let mut group = c.benchmark_group("sealed_sender");
    let mut rng = StdRng::seed_from_u64(6);

    let trust_root = IdentityKeyPair::generate(&mut rng);
    let server_key = IdentityKeyPair::generate(&mut rng);
    let server = ServerCertificate::new(1, *server_key.identity_key(), &trust_root).unwrap();

    group.bench_function("certificate_validate", |b| {
        let identity = IdentityKeyPair::generate(&mut rng);
        let certificate = SenderCertificate::new(
            SenderAddress::new("alice", None, 1),
            *identity.identity_key(),
            u64::MAX,
            server.clone(),
            &server_key,
        )
        .unwrap();
        b.iter(|| {
            certificate
                .validate(black_box(trust_root.identity_key()), 0)
                .unwrap()
        })
    });

    group.bench_function("seal_and_open", |b| {
        b.iter_batched(
            || {
                let (alice, bob) = established(&mut rng);
                let certificate = SenderCertificate::new(
                    SenderAddress::new("alice", None, 1),
                    *alice.identity_key_pair().identity_key(),
                    u64::MAX,
                    server.clone(),
                    &server_key,
                )
                .unwrap();
                (alice, bob, certificate)
            },
            |(mut alice, mut bob, certificate)| {
                let mut rng = StdRng::seed_from_u64(7);
                let envelope =
                    sealed_sender_encrypt(&bob_address(), &certificate, b"sealed", &mut alice, &mut rng)
                        .unwrap();
                sealed_sender_decrypt(&envelope, trust_root.identity_key(), 0, &mut bob, &mut rng)
                    .unwrap()
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_session_setup,
    bench_ratchet_messages,
    bench_sealed_sender
);
criterion_main!(benches);
