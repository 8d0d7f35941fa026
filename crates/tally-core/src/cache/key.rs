//! Key -> file name derivation.
//!
//! `<slug>-<sha256(key)>.json`: the slug keeps names greppable, the digest
//! keeps them stable and collision-free for any key string.

use sha2::{Digest, Sha256};

const SLUG_MAX_CHARS: usize = 40;

pub(crate) fn file_name_for(key: &str) -> String {
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}-{digest}.json", slug(key))
}

/// Filesystem-safe, readable prefix of `raw`.
pub(crate) fn slug(raw: &str) -> String {
    let slug: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(SLUG_MAX_CHARS)
        .collect();
    let slug = slug.trim_start_matches('.');
    if slug.is_empty() {
        "artifact".to_string()
    } else {
        slug.to_string()
    }
}
