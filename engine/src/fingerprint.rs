//! Deterministic window fingerprints.
//!
//! A fingerprint identifies "this content, processed by this code under this
//! configuration". Only stable inputs are hashed: event timestamps (ms),
//! authors and texts in window order, the code reference and the config
//! digest. Every variable-length field is length-prefixed.

use std::fmt::Write as _;

use serde::Serialize;
use sha2::{Digest, Sha256};

use quill_types::{ConfigDigest, Fingerprint, Window};

/// Code reference recorded when none is configured.
pub const DEFAULT_CODE_REF: &str = concat!("quill-", env!("CARGO_PKG_VERSION"));

const WINDOW_DOMAIN: &[u8] = b"quill/window/v1";
const CONFIG_DOMAIN: &[u8] = b"quill/config/v1";

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn to_hex(digest: &[u8]) -> String {
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Fingerprint of `window` (overlap included) under `code_ref` and `config`.
#[must_use]
pub fn fingerprint(window: &Window, code_ref: &str, config: &ConfigDigest) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(WINDOW_DOMAIN);
    update_field(&mut hasher, code_ref.as_bytes());
    update_field(&mut hasher, config.as_str().as_bytes());
    hasher.update((window.len() as u64).to_le_bytes());
    for event in window.events() {
        hasher.update(event.ordering_key().to_le_bytes());
        update_field(&mut hasher, event.author.as_bytes());
        update_field(&mut hasher, event.text.as_bytes());
    }
    Fingerprint::from_hex(to_hex(&hasher.finalize()))
}

/// Digest of the semantic configuration.
///
/// The value is serialised through `serde_json::Value`, whose maps are
/// key-sorted, so field and key order do not matter. Never pass credentials.
pub fn config_digest<T: Serialize + ?Sized>(config: &T) -> Result<ConfigDigest, serde_json::Error> {
    let canonical = serde_json::to_vec(&serde_json::to_value(config)?)?;
    let mut hasher = Sha256::new();
    hasher.update(CONFIG_DOMAIN);
    hasher.update(&canonical);
    Ok(ConfigDigest::from_hex(to_hex(&hasher.finalize())))
}
