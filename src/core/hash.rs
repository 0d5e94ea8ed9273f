//! Content Fingerprints
//!
//! SHA-256 fingerprints of serializable values. Used to tag the ad config
//! in logs and status snapshots so a config change is visible at a glance.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type Fingerprint = [u8; 32];

/// Domain separator for ad config fingerprints.
pub const AD_CONFIG_DOMAIN: &[u8] = b"MTC_AD_CONFIG_V1";

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Fingerprint a value through its JSON encoding.
///
/// Map-typed fields must iterate in a stable order (`BTreeMap`) for the
/// fingerprint to be stable.
pub fn fingerprint_json<T: Serialize>(domain: &[u8], value: &T) -> Fingerprint {
    // Serializing plain data structs cannot fail; an empty body still
    // yields a usable, domain-separated digest.
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hash_with_domain(domain, &bytes)
}

/// Short hex form for log lines.
pub fn short_hex(fingerprint: &Fingerprint) -> String {
    hex::encode(&fingerprint[..6])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_fingerprint_stable_for_equal_values() {
        let mut a = BTreeMap::new();
        a.insert("google", 1);
        a.insert("facebook", 2);
        let mut b = BTreeMap::new();
        b.insert("facebook", 2);
        b.insert("google", 1);

        assert_eq!(
            fingerprint_json(AD_CONFIG_DOMAIN, &a),
            fingerprint_json(AD_CONFIG_DOMAIN, &b),
        );
    }

    #[test]
    fn test_domain_separation() {
        let data = b"same payload";
        assert_ne!(hash_with_domain(b"A", data), hash_with_domain(b"B", data));
    }

    #[test]
    fn test_short_hex_length() {
        let fp = hash_with_domain(AD_CONFIG_DOMAIN, b"x");
        assert_eq!(short_hex(&fp).len(), 12);
    }
}
