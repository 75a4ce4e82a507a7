use bech32::Hrp;
use secp256k1::{Keypair, Message, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::ForwarderError;
use crate::event::{Event, UnsignedEvent};

const NSEC_HRP: &str = "nsec";

/// Signs events on behalf of the forwarder. The forwarding core only ever
/// reads `id`/`pubkey`/`kind`/tag values from the events it handles; all
/// signature verification and production is isolated here.
pub trait Signer: Send + Sync {
    fn pubkey(&self) -> &str;
    fn sign(&self, unsigned: UnsignedEvent) -> Result<Event, ForwarderError>;
}

/// A signer backed by a secp256k1 keypair, accepting either a raw 64-char
/// hex secret key or a bech32 `nsec1...` key.
pub struct Secp256k1Signer {
    secp: Secp256k1<secp256k1::All>,
    keypair: Keypair,
    pubkey_hex: String,
}

impl Secp256k1Signer {
    pub fn from_config_value(raw: &str) -> Result<Self, ForwarderError> {
        let secret_bytes = if raw.starts_with(NSEC_HRP) {
            decode_nsec(raw)?
        } else {
            hex::decode(raw)
                .map_err(|e| ForwarderError::KeyInvalid(format!("not valid hex: {e}")))?
        };
        let secret_key = SecretKey::from_slice(&secret_bytes)
            .map_err(|e| ForwarderError::KeyInvalid(format!("not a valid secp256k1 key: {e}")))?;
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let (xonly, _parity) = keypair.x_only_public_key();
        let pubkey_hex = hex::encode(xonly.serialize());
        Ok(Self {
            secp,
            keypair,
            pubkey_hex,
        })
    }
}

impl Signer for Secp256k1Signer {
    fn pubkey(&self) -> &str {
        &self.pubkey_hex
    }

    fn sign(&self, unsigned: UnsignedEvent) -> Result<Event, ForwarderError> {
        let id = event_id(&unsigned);
        // Sign over the id bytes directly, per NIP-01 (the id already is
        // the sha256 digest of the serialized array).
        let id_bytes =
            hex::decode(&id).map_err(|e| ForwarderError::KeyInvalid(format!("bad id: {e}")))?;
        let message = Message::from_digest_slice(&id_bytes)
            .map_err(|e| ForwarderError::KeyInvalid(format!("bad id digest: {e}")))?;
        let sig = self.secp.sign_schnorr(&message, &self.keypair);
        Ok(Event {
            id,
            pubkey: unsigned.pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: hex::encode(sig.as_ref()),
        })
    }
}

/// Computes the NIP-01 event id: sha256 of the JSON-serialized array
/// `[0, pubkey, created_at, kind, tags, content]`.
fn event_id(unsigned: &UnsignedEvent) -> String {
    let arr = serde_json::json!([
        0,
        unsigned.pubkey,
        unsigned.created_at,
        unsigned.kind,
        unsigned.tags,
        unsigned.content,
    ]);
    let serialized = serde_json::to_string(&arr).expect("array of primitives always serializes");
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(digest)
}

fn decode_nsec(raw: &str) -> Result<Vec<u8>, ForwarderError> {
    let (hrp, data) =
        bech32::decode(raw).map_err(|e| ForwarderError::KeyInvalid(format!("bad bech32: {e}")))?;
    if hrp != Hrp::parse(NSEC_HRP).expect("valid hrp literal") {
        return Err(ForwarderError::KeyInvalid(format!(
            "expected hrp '{NSEC_HRP}', found '{hrp}'"
        )));
    }
    Ok(data)
}
