//! Webhook wire protocol: packet shapes, opcodes, signatures, challenges.
//!
//! Signature scheme: the tenant secret is stretched into a 32-byte Ed25519
//! seed by cyclic repetition; the platform signs `timestamp || body` with
//! the key derived from that seed. Challenge responses sign
//! `event_ts || plain_token` with the same key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Event dispatch
pub const OP_EVENT_DISPATCH: i64 = 0;
/// Legacy challenge
pub const OP_LEGACY_CHALLENGE: i64 = 1;
/// Heartbeat
pub const OP_HEARTBEAT: i64 = 11;
/// Heartbeat ACK
pub const OP_HEARTBEAT_ACK: i64 = 12;
/// HTTP callback ACK (same opcode as the heartbeat ACK, per the platform)
pub const OP_HTTP_CALLBACK_ACK: i64 = 12;
/// Callback validation
pub const OP_CALLBACK_VALIDATION: i64 = 13;

/// Signature headers required on every request.
pub const SIGNATURE_TIMESTAMP_HEADER: &str = "x-signature-timestamp";
pub const SIGNATURE_ED25519_HEADER: &str = "x-signature-ed25519";

/// Inbound webhook packet envelope.
#[derive(Debug, Deserialize)]
pub struct WebhookPacket {
    pub op: i64,
    #[serde(default)]
    pub d: serde_json::Value,
}

/// ACK response envelope.
#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub op: i64,
    pub d: u32,
}

/// Challenge payload carried in `d` for ops 1 and 13.
#[derive(Debug, Deserialize)]
pub struct ChallengeData {
    pub plain_token: String,
    pub event_ts: String,
}

/// Challenge response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub plain_token: String,
    pub signature: String,
}

/// ACK for an event dispatch.
///
/// Always carries `d = 0` regardless of downstream outcome: the platform
/// retries on non-zero acknowledgements, and retries under failure would
/// amplify an outage.
pub fn dispatch_ack() -> Vec<u8> {
    let ack = AckResponse {
        op: OP_HTTP_CALLBACK_ACK,
        d: 0,
    };
    serde_json::to_vec(&ack).unwrap_or_else(|_| b"{\"op\":12,\"d\":0}".to_vec())
}

/// ACK for a heartbeat, echoing the sequence number.
pub fn heartbeat_ack(seq: u32) -> Vec<u8> {
    let ack = AckResponse {
        op: OP_HEARTBEAT_ACK,
        d: seq,
    };
    serde_json::to_vec(&ack).unwrap_or_else(|_| b"{\"op\":12,\"d\":0}".to_vec())
}

/// Derive the 32-byte Ed25519 seed from a tenant secret by repeating the
/// secret until 32 bytes are filled. Returns None for an empty secret.
pub fn derive_seed(secret: &str) -> Option<[u8; 32]> {
    let bytes = secret.as_bytes();
    if bytes.is_empty() {
        return None;
    }

    let mut seed = [0u8; 32];
    for (i, slot) in seed.iter_mut().enumerate() {
        *slot = bytes[i % bytes.len()];
    }
    Some(seed)
}

fn signing_key(secret: &str) -> Option<SigningKey> {
    derive_seed(secret).map(|seed| SigningKey::from_bytes(&seed))
}

/// Verify the Ed25519 signature headers against `timestamp || body`.
pub fn verify_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> bool {
    let Some(timestamp) = headers
        .get(SIGNATURE_TIMESTAMP_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        debug!("missing signature timestamp header");
        return false;
    };

    let Some(signature_hex) = headers
        .get(SIGNATURE_ED25519_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        debug!("missing signature header");
        return false;
    };

    let Ok(signature_bytes) = hex::decode(signature_hex) else {
        debug!("signature is not valid hex");
        return false;
    };

    let Ok(signature) = Signature::from_slice(&signature_bytes) else {
        debug!("signature has wrong length");
        return false;
    };

    let Some(key) = signing_key(secret) else {
        debug!("tenant secret is empty");
        return false;
    };

    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);

    key.verifying_key().verify(&message, &signature).is_ok()
}

/// Sign a challenge: `event_ts || plain_token` with the tenant key.
///
/// Returns None when the secret is empty and no key can be derived.
pub fn sign_challenge(data: &ChallengeData, secret: &str) -> Option<ChallengeResponse> {
    let key = signing_key(secret)?;

    let mut message = Vec::with_capacity(data.event_ts.len() + data.plain_token.len());
    message.extend_from_slice(data.event_ts.as_bytes());
    message.extend_from_slice(data.plain_token.as_bytes());

    let signature = key.sign(&message);

    Some(ChallengeResponse {
        plain_token: data.plain_token.clone(),
        signature: hex::encode(signature.to_bytes()),
    })
}
