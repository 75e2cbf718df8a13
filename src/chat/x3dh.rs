//! X3DH agreement and initial ratchet state.
//!
//! Both sides compute the same concatenation of agreements, prefixed with 32
//! bytes of `0xFF`:
//!
//! | Alice (initiator)    | Bob (responder)      |
//! |----------------------|----------------------|
//! | `DH(IK_A, SPK_B)`    | `DH(SPK_B, IK_A)`    |
//! | `DH(EK_A, IK_B)`     | `DH(IK_B, EK_A)`     |
//! | `DH(EK_A, SPK_B)`    | `DH(SPK_B, EK_A)`    |
//! | `DH(EK_A, OPK_B)`?   | `DH(OPK_B, EK_A)`?   |
//!
//! HKDF over the result yields the root key and the first chain key.

use crate::chat::identity::{IdentityKey, IdentityKeyPair};
use crate::chat::kdf_info;
use crate::chat::ratchet::{split_root_and_chain, ChainKey, RootKey, CHAIN_KEY_SIZE, ROOT_KEY_SIZE};
use crate::chat::state::SessionState;
use crate::chat::CIPHERTEXT_MESSAGE_CURRENT_VERSION;
use crate::crypto::{derive_secrets, KeyPair, PublicKey};
use crate::error::Result;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

const DISCONTINUITY_BYTES: [u8; 32] = [0xFF; 32];

pub(crate) struct AliceParameters<'a> {
    pub our_identity: &'a IdentityKeyPair,
    pub our_base_key: &'a KeyPair,
    pub their_identity: &'a IdentityKey,
    pub their_signed_pre_key: &'a PublicKey,
    pub their_one_time_pre_key: Option<&'a PublicKey>,
}

pub(crate) struct BobParameters<'a> {
    pub our_identity: &'a IdentityKeyPair,
    pub our_signed_pre_key: &'a KeyPair,
    pub our_one_time_pre_key: Option<&'a KeyPair>,
    pub their_identity: &'a IdentityKey,
    pub their_base_key: &'a PublicKey,
}

fn derive_keys(secret: &[u8]) -> Result<(RootKey, ChainKey)> {
    let derived = Zeroizing::new(derive_secrets(
        None,
        secret,
        kdf_info::X3DH,
        ROOT_KEY_SIZE + CHAIN_KEY_SIZE,
    )?);
    let (root, chain) = split_root_and_chain(&derived);
    Ok((RootKey::new(root), ChainKey::new(chain, 0)))
}

/// Builds the initiator state.
///
/// Alice immediately steps the ratchet against Bob's signed prekey with a
/// fresh sending key, so her first message already carries a new ratchet key.
pub(crate) fn initialize_alice_session<R: CryptoRng + RngCore>(
    params: &AliceParameters<'_>,
    rng: &mut R,
) -> Result<SessionState> {
    let their_identity_agreement = params.their_identity.agreement_key()?;

    let mut secret = Zeroizing::new(Vec::with_capacity(32 * 5));
    secret.extend_from_slice(&DISCONTINUITY_BYTES);
    secret.extend_from_slice(
        &params
            .our_identity
            .calculate_agreement(params.their_signed_pre_key),
    );
    secret.extend_from_slice(
        &params
            .our_base_key
            .calculate_agreement(&their_identity_agreement),
    );
    secret.extend_from_slice(
        &params
            .our_base_key
            .calculate_agreement(params.their_signed_pre_key),
    );
    if let Some(one_time) = params.their_one_time_pre_key {
        secret.extend_from_slice(&params.our_base_key.calculate_agreement(one_time));
    }

    let (root_key, chain_key) = derive_keys(&secret)?;

    let sending_ratchet_key = KeyPair::generate(rng);
    let (sending_root, sending_chain) =
        root_key.create_chain(params.their_signed_pre_key, &sending_ratchet_key)?;

    let mut state = SessionState::new(
        CIPHERTEXT_MESSAGE_CURRENT_VERSION,
        *params.our_identity.identity_key(),
        *params.their_identity,
        sending_root,
        sending_ratchet_key,
        sending_chain,
        params.our_base_key.public_key,
    );
    state.add_receiver_chain(*params.their_signed_pre_key, chain_key, 1);
    Ok(state)
}

/// Builds the responder state. Bob's first sending ratchet key is his signed
/// prekey.
pub(crate) fn initialize_bob_session(params: &BobParameters<'_>) -> Result<SessionState> {
    let their_identity_agreement = params.their_identity.agreement_key()?;

    let mut secret = Zeroizing::new(Vec::with_capacity(32 * 5));
    secret.extend_from_slice(&DISCONTINUITY_BYTES);
    secret.extend_from_slice(
        &params
            .our_signed_pre_key
            .calculate_agreement(&their_identity_agreement),
    );
    secret.extend_from_slice(
        &params
            .our_identity
            .calculate_agreement(params.their_base_key),
    );
    secret.extend_from_slice(
        &params
            .our_signed_pre_key
            .calculate_agreement(params.their_base_key),
    );
    if let Some(one_time) = params.our_one_time_pre_key {
        secret.extend_from_slice(&one_time.calculate_agreement(params.their_base_key));
    }

    let (root_key, chain_key) = derive_keys(&secret)?;

    Ok(SessionState::new(
        CIPHERTEXT_MESSAGE_CURRENT_VERSION,
        *params.our_identity.identity_key(),
        *params.their_identity,
        root_key,
        params.our_signed_pre_key.clone(),
        chain_key,
        *params.their_base_key,
    ))
}
