//! HMAC-SHA256 helpers shared by the outcome generator, the wallet client
//! and the webhook client.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn keyed(key: &[u8]) -> HmacSha256 {
    match <HmacSha256 as Mac>::new_from_slice(key) {
        Ok(mac) => mac,
        // HMAC takes keys of any length
        Err(_) => unreachable!("HMAC-SHA256 rejected a {}-byte key", key.len()),
    }
}

/// Raw MAC over the concatenation of `parts`
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = keyed(key);
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

pub fn sign_hex(key: &[u8], parts: &[&[u8]]) -> String {
    hex::encode(hmac_sha256(key, parts))
}

/// Constant-time comparison against a hex-encoded signature
pub fn verify_hex(key: &[u8], parts: &[&[u8]], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = keyed(key);
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(&expected).is_ok()
}

/// Canonical wallet payload `<player_id>:<amount>:<request_id>`, amount with
/// six decimal places.
pub fn wallet_payload(player_id: i64, amount: f64, request_id: &str) -> String {
    format!("{}:{:.6}:{}", player_id, amount, request_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4231_case_2() {
        let mac = sign_hex(b"Jefe", &[b"what do ya want ", b"for nothing?"]);
        assert_eq!(
            mac,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_rfc4231_case_6_long_key() {
        let key = [0xaa_u8; 131];
        let mac = sign_hex(&key, &[b"Test Using Larger Than Block-Size Key - Hash Key First"]);
        assert_eq!(
            mac,
            "60e431591ee0b67f0d8a26aacbf5b77f8e0bc6213728c5140546040f0ee37f54"
        );
    }

    #[test]
    fn test_verify_hex() {
        let sig = sign_hex(b"secret", &[b"1:10.000000:abc"]);
        assert!(verify_hex(b"secret", &[b"1:10.000000:abc"], &sig));
        assert!(!verify_hex(b"other", &[b"1:10.000000:abc"], &sig));
        assert!(!verify_hex(b"secret", &[b"1:10.000000:abc"], "not-hex"));
    }

    #[test]
    fn test_wallet_payload_format() {
        assert_eq!(wallet_payload(7, 10.0, "k-1"), "7:10.000000:k-1");
        assert_eq!(wallet_payload(7, 0.5, "k-1-win"), "7:0.500000:k-1-win");
    }
}
