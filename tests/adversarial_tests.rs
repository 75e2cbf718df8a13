//! Adversarial tests
//!
//! These tests simulate a hostile network: forged MACs, truncated and random
//! input, oversized counter jumps and attempts to exhaust the skipped-key
//! cache. Every rejection must leave the stores as they were.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sealed_ratchet::chat::{
    CiphertextMessage, CiphertextMessageType, IdentityKey, IdentityKeyPair, PreKeyBundle,
    PreKeyId, PreKeyRecord, PreKeySignalMessage, ProtocolAddress, SenderKeyName, SenderKeyRecord,
    SessionBuilder, SessionCipher, SessionRecord, SignalMessage, SignedPreKeyRecord,
};
use sealed_ratchet::crypto::KeyPair;
use sealed_ratchet::storage::{
    Direction, IdentityKeyStore, InMemoryProtocolStore, PreKeyStore, SenderKeyStore, SessionStore,
    SignedPreKeyStore,
};
use sealed_ratchet::{ProtocolError, Result, SessionConfig};

fn alice_address() -> ProtocolAddress {
    ProtocolAddress::new("alice", 1)
}

fn bob_address() -> ProtocolAddress {
    ProtocolAddress::new("bob", 1)
}

/// Publishes a signed prekey (id 1) and one-time prekey 2 into `bob`.
fn bob_bundle(bob: &mut InMemoryProtocolStore, rng: &mut StdRng) -> PreKeyBundle {
    let bob_identity = bob.identity_key_pair().clone();
    let signed = SignedPreKeyRecord::generate(1, 0, &bob_identity, rng);
    let pre_key = PreKeyRecord::new(2, KeyPair::generate(rng));
    bob.save_signed_pre_key(1, &signed).unwrap();
    bob.save_pre_key(2, &pre_key).unwrap();

    PreKeyBundle::new(
        2,
        1,
        Some((2, pre_key.public_key())),
        1,
        signed.public_key(),
        signed.signature().to_vec(),
        *bob_identity.identity_key(),
    )
}

/// Alice holds a session with Bob, nothing sent yet.
fn setup(seed: u64) -> (StdRng, InMemoryProtocolStore, InMemoryProtocolStore) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut alice = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut rng), 1);
    let mut bob = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut rng), 2);

    let bundle = bob_bundle(&mut bob, &mut rng);
    SessionBuilder::new(bob_address())
        .process_pre_key_bundle(&bundle, &mut alice, &mut rng)
        .unwrap();
    (rng, alice, bob)
}

/// Both directions have carried one message.
fn established(seed: u64) -> (StdRng, InMemoryProtocolStore, InMemoryProtocolStore) {
    let (mut rng, mut alice, mut bob) = setup(seed);
    let hello = SessionCipher::new(bob_address())
        .encrypt(b"hello", &mut alice)
        .unwrap();
    SessionCipher::new(alice_address())
        .decrypt(&hello, &mut bob, &mut rng)
        .unwrap();
    let reply = SessionCipher::new(alice_address())
        .encrypt(b"reply", &mut bob)
        .unwrap();
    SessionCipher::new(bob_address())
        .decrypt(&reply, &mut alice, &mut rng)
        .unwrap();
    (rng, alice, bob)
}

fn session_bytes(store: &InMemoryProtocolStore, address: &ProtocolAddress) -> Vec<u8> {
    store
        .load_session(address)
        .unwrap()
        .expect("session exists")
        .serialize()
        .unwrap()
}

#[test]
fn test_forward_jump_limit() {
    let (mut rng, mut alice, mut bob) = setup(200);
    let config = SessionConfig {
        max_forward_jumps: 10,
        ..SessionConfig::default()
    };

    let messages: Vec<CiphertextMessage> = (0..12u8)
        .map(|i| {
            SessionCipher::new(bob_address())
                .encrypt(&[i], &mut alice)
                .unwrap()
        })
        .collect();

    let cipher = SessionCipher::new(alice_address())
        .with_config(config)
        .unwrap();
    let result = cipher.decrypt(&messages[11], &mut bob, &mut rng);
    assert!(matches!(result, Err(ProtocolError::InvalidMessage(_))));
    assert!(bob.contains_pre_key(2));
    assert!(bob.load_session(&alice_address()).unwrap().is_none());

    assert_eq!(cipher.decrypt(&messages[10], &mut bob, &mut rng).unwrap(), vec![10]);
    // The chain now stands at counter 11.
    assert_eq!(cipher.decrypt(&messages[11], &mut bob, &mut rng).unwrap(), vec![11]);
}

#[test]
fn test_forged_mac_rejected_without_side_effects() {
    let (mut rng, mut alice, mut bob) = established(201);
    let message = SessionCipher::new(bob_address())
        .encrypt(b"authentic", &mut alice)
        .unwrap();
    let before = session_bytes(&bob, &alice_address());

    let bytes = message.serialize().to_vec();
    for index in [1, 10, 40, bytes.len() - 9, bytes.len() - 1] {
        let mut forged = bytes.clone();
        forged[index] ^= 0x04;
        let result = SignalMessage::deserialize(&forged).and_then(|parsed| {
            SessionCipher::new(alice_address()).decrypt(
                &CiphertextMessage::SignalMessage(parsed),
                &mut bob,
                &mut rng,
            )
        });
        assert!(result.is_err(), "forgery at byte {} accepted", index);
        assert_eq!(session_bytes(&bob, &alice_address()), before);
    }

    let plaintext = SessionCipher::new(alice_address())
        .decrypt(&message, &mut bob, &mut rng)
        .unwrap();
    assert_eq!(plaintext, b"authentic");
}

#[test]
fn test_message_replayed_under_other_address() {
    let (mut rng, mut alice, mut bob) = established(202);
    let message = SessionCipher::new(bob_address())
        .encrypt(b"to bob", &mut alice)
        .unwrap();

    // Carol replays Alice's message to Bob under her own address.
    let result = SessionCipher::new(ProtocolAddress::new("carol", 1)).decrypt(&message, &mut bob, &mut rng);
    assert!(matches!(result, Err(ProtocolError::SessionNotFound(_))));
}

#[test]
fn test_truncated_messages_rejected() {
    let (_rng, mut alice, _bob) = setup(203);
    let message = SessionCipher::new(bob_address())
        .encrypt(b"truncate me", &mut alice)
        .unwrap();
    assert_eq!(message.message_type(), CiphertextMessageType::PreKey);
    let bytes = message.serialize();

    for len in 0..bytes.len() {
        assert!(
            PreKeySignalMessage::deserialize(&bytes[..len]).is_err(),
            "truncation to {} bytes accepted",
            len
        );
    }

    let inner = match &message {
        CiphertextMessage::PreKeySignalMessage(m) => m.message().serialized().to_vec(),
        CiphertextMessage::SignalMessage(_) => unreachable!(),
    };
    for len in 0..inner.len() {
        assert!(SignalMessage::deserialize(&inner[..len]).is_err());
    }

    let mut extended = inner.clone();
    extended.push(0);
    assert!(SignalMessage::deserialize(&extended).is_err());
}

#[test]
fn test_random_input_never_panics() {
    let mut rng = StdRng::seed_from_u64(204);
    for _ in 0..500 {
        let len = rng.gen_range(0..300);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        // Give some inputs a valid version byte to reach deeper parsing.
        if len > 0 && rng.gen_bool(0.5) {
            data[0] = 0x33;
        }

        let _ = SignalMessage::deserialize(&data);
        let _ = PreKeySignalMessage::deserialize(&data);
        let _ = CiphertextMessage::deserialize(CiphertextMessageType::Whisper, &data);
    }
}

#[test]
fn test_unsupported_version_rejected() {
    let (_rng, mut alice, _bob) = established(205);
    let message = SessionCipher::new(bob_address())
        .encrypt(b"v", &mut alice)
        .unwrap();

    let mut bytes = message.serialize().to_vec();
    bytes[0] = 0x23;
    assert!(matches!(
        SignalMessage::deserialize(&bytes),
        Err(ProtocolError::InvalidMessage(_))
    ));
}

#[test]
fn test_skipped_key_cache_is_bounded() {
    let (mut rng, mut alice, mut bob) = established(206);
    let config = SessionConfig {
        max_skipped_message_keys: 3,
        ..SessionConfig::default()
    };
    let cipher = SessionCipher::new(alice_address())
        .with_config(config)
        .unwrap();

    let messages: Vec<CiphertextMessage> = (0..6u8)
        .map(|i| {
            SessionCipher::new(bob_address())
                .encrypt(&[i], &mut alice)
                .unwrap()
        })
        .collect();
    let alice_ratchet_key = *alice
        .load_session(&bob_address())
        .unwrap()
        .unwrap()
        .session_state()
        .unwrap()
        .sender_ratchet_key();

    assert_eq!(cipher.decrypt(&messages[5], &mut bob, &mut rng).unwrap(), vec![5]);
    let cached = |bob: &InMemoryProtocolStore| {
        bob.load_session(&alice_address())
            .unwrap()
            .unwrap()
            .session_state()
            .unwrap()
            .skipped_key_count(&alice_ratchet_key)
    };
    assert_eq!(cached(&bob), 3);

    // Keys 0 and 1 were evicted, 2 to 4 are still cached.
    assert!(matches!(
        cipher.decrypt(&messages[0], &mut bob, &mut rng),
        Err(ProtocolError::DuplicateMessage { counter: 0, .. })
    ));
    assert_eq!(cipher.decrypt(&messages[3], &mut bob, &mut rng).unwrap(), vec![3]);
    assert_eq!(cached(&bob), 2);
    assert_eq!(cipher.decrypt(&messages[2], &mut bob, &mut rng).unwrap(), vec![2]);
    assert_eq!(cipher.decrypt(&messages[4], &mut bob, &mut rng).unwrap(), vec![4]);
    assert_eq!(cached(&bob), 0);
}

#[test]
fn test_receiver_chain_count_bounded() {
    let (mut rng, mut alice, mut bob) = established(207);
    let config = SessionConfig {
        max_receiver_chains: 2,
        ..SessionConfig::default()
    };

    for round in 0..6u8 {
        let m = SessionCipher::new(bob_address())
            .encrypt(&[round], &mut alice)
            .unwrap();
        SessionCipher::new(alice_address())
            .with_config(config.clone())
            .unwrap()
            .decrypt(&m, &mut bob, &mut rng)
            .unwrap();
        let r = SessionCipher::new(alice_address())
            .encrypt(&[round], &mut bob)
            .unwrap();
        SessionCipher::new(bob_address())
            .decrypt(&r, &mut alice, &mut rng)
            .unwrap();
    }

    let record = bob.load_session(&alice_address()).unwrap().unwrap();
    assert_eq!(record.session_state().unwrap().receiver_chain_count(), 2);
}

#[test]
fn test_pre_key_message_with_unknown_signed_pre_key() {
    let (mut rng, mut alice, mut bob) = setup(208);
    let message = SessionCipher::new(bob_address())
        .encrypt(b"x", &mut alice)
        .unwrap();

    let mut fresh_bob = InMemoryProtocolStore::new(bob.identity_key_pair().clone(), 2);
    let result = SessionCipher::new(alice_address()).decrypt(&message, &mut fresh_bob, &mut rng);
    assert!(matches!(result, Err(ProtocolError::InvalidKeyIdentifier(_))));

    assert!(SessionCipher::new(alice_address())
        .decrypt(&message, &mut bob, &mut rng)
        .is_ok());
}

/// In-memory store whose session writes fail while `fail_session_writes` is
/// set, like a persistent store with a full disk.
struct FailingSessionWrites {
    inner: InMemoryProtocolStore,
    fail_session_writes: bool,
}

impl FailingSessionWrites {
    fn new(inner: InMemoryProtocolStore) -> Self {
        Self {
            inner,
            fail_session_writes: true,
        }
    }
}

impl IdentityKeyStore for FailingSessionWrites {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair> {
        self.inner.get_identity_key_pair()
    }

    fn get_local_registration_id(&self) -> Result<u32> {
        self.inner.get_local_registration_id()
    }

    fn save_identity(
        &mut self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
    ) -> Result<bool> {
        self.inner.save_identity(address, identity)
    }

    fn is_trusted_identity(
        &self,
        address: &ProtocolAddress,
        identity: &IdentityKey,
        direction: Direction,
    ) -> Result<bool> {
        self.inner.is_trusted_identity(address, identity, direction)
    }

    fn get_identity(&self, address: &ProtocolAddress) -> Result<Option<IdentityKey>> {
        self.inner.get_identity(address)
    }

    fn remove_identity(&mut self, address: &ProtocolAddress) -> Result<()> {
        self.inner.remove_identity(address)
    }
}

impl PreKeyStore for FailingSessionWrites {
    fn get_pre_key(&self, id: PreKeyId) -> Result<PreKeyRecord> {
        self.inner.get_pre_key(id)
    }

    fn save_pre_key(&mut self, id: PreKeyId, record: &PreKeyRecord) -> Result<()> {
        self.inner.save_pre_key(id, record)
    }

    fn remove_pre_key(&mut self, id: PreKeyId) -> Result<()> {
        self.inner.remove_pre_key(id)
    }
}

impl SignedPreKeyStore for FailingSessionWrites {
    fn get_signed_pre_key(&self, id: PreKeyId) -> Result<SignedPreKeyRecord> {
        self.inner.get_signed_pre_key(id)
    }

    fn save_signed_pre_key(&mut self, id: PreKeyId, record: &SignedPreKeyRecord) -> Result<()> {
        self.inner.save_signed_pre_key(id, record)
    }
}

impl SessionStore for FailingSessionWrites {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        self.inner.load_session(address)
    }

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        if self.fail_session_writes {
            return Err(ProtocolError::storage("disk full"));
        }
        self.inner.store_session(address, record)
    }
}

impl SenderKeyStore for FailingSessionWrites {
    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>> {
        self.inner.load_sender_key(name)
    }

    fn store_sender_key(&mut self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()> {
        self.inner.store_sender_key(name, record)
    }
}

#[test]
fn test_failed_session_write_restores_pre_key_and_identity() {
    let (mut rng, mut alice, bob) = setup(209);
    let message = SessionCipher::new(bob_address())
        .encrypt(b"first contact", &mut alice)
        .unwrap();
    let mut bob = FailingSessionWrites::new(bob);

    let result = SessionCipher::new(alice_address()).decrypt(&message, &mut bob, &mut rng);
    assert!(matches!(result, Err(ProtocolError::Storage(_))));
    assert!(bob.inner.contains_pre_key(2));
    assert!(bob.get_identity(&alice_address()).unwrap().is_none());
    assert!(bob.load_session(&alice_address()).unwrap().is_none());

    bob.fail_session_writes = false;
    assert_eq!(
        SessionCipher::new(alice_address())
            .decrypt(&message, &mut bob, &mut rng)
            .unwrap(),
        b"first contact"
    );
    assert!(!bob.inner.contains_pre_key(2));
    assert!(bob.get_identity(&alice_address()).unwrap().is_some());
}

#[test]
fn test_failed_session_write_leaves_builder_unpinned() {
    let mut rng = StdRng::seed_from_u64(210);
    let alice = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut rng), 1);
    let mut bob = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut rng), 2);
    let bundle = bob_bundle(&mut bob, &mut rng);
    let mut alice = FailingSessionWrites::new(alice);

    let result =
        SessionBuilder::new(bob_address()).process_pre_key_bundle(&bundle, &mut alice, &mut rng);
    assert!(matches!(result, Err(ProtocolError::Storage(_))));
    assert!(alice.get_identity(&bob_address()).unwrap().is_none());
    assert!(alice.load_session(&bob_address()).unwrap().is_none());
}

#[test]
fn test_failed_session_write_keeps_previous_identity() {
    let (_rng, alice, _bob) = established(211);
    let pinned = alice.get_identity(&bob_address()).unwrap().unwrap();
    let before = session_bytes(&alice, &bob_address());
    let mut alice = FailingSessionWrites::new(alice);

    let result = SessionCipher::new(bob_address()).encrypt(b"lost", &mut alice);
    assert!(matches!(result, Err(ProtocolError::Storage(_))));
    assert!(alice.get_identity(&bob_address()).unwrap().unwrap().ct_equals(&pinned));
    assert_eq!(session_bytes(&alice.inner, &bob_address()), before);
}

#[test]
fn test_reserved_bundle_pre_key_id_rejected() {
    let mut rng = StdRng::seed_from_u64(212);
    let mut alice = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut rng), 1);
    let bob_identity = IdentityKeyPair::generate(&mut rng);
    let signed = SignedPreKeyRecord::generate(1, 0, &bob_identity, &mut rng);
    let pre_key = KeyPair::generate(&mut rng);

    let bundle = PreKeyBundle::new(
        2,
        1,
        Some((0xFFFF_FFFF, pre_key.public_key)),
        1,
        signed.public_key(),
        signed.signature().to_vec(),
        *bob_identity.identity_key(),
    );
    let result =
        SessionBuilder::new(bob_address()).process_pre_key_bundle(&bundle, &mut alice, &mut rng);
    assert!(matches!(result, Err(ProtocolError::InvalidKeyIdentifier(_))));
    assert!(alice.get_identity(&bob_address()).unwrap().is_none());
    assert!(alice.load_session(&bob_address()).unwrap().is_none());
}

#[test]
fn test_invalid_config_rejected_at_construction() {
    let zero_chains = SessionConfig {
        max_receiver_chains: 0,
        ..SessionConfig::default()
    };
    assert!(matches!(
        SessionCipher::new(alice_address()).with_config(zero_chains.clone()),
        Err(ProtocolError::Config(_))
    ));
    assert!(matches!(
        SessionBuilder::new(alice_address()).with_config(zero_chains.clone()),
        Err(ProtocolError::Config(_))
    ));
    assert!(matches!(
        sealed_ratchet::sealed::SealedSessionCipher::new(zero_chains),
        Err(ProtocolError::Config(_))
    ));
}
