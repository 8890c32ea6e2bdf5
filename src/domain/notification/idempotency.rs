//! Idempotency key derivation.
//!
//! The key is a SHA-256 hash over the identity fields of a notification:
//! event name, recipient, channel, template key and the template payload.
//! Two enqueue calls with identical identity fields always derive the same
//! key, so the store's unique constraint resolves them to one row.

use sha2::{Digest, Sha256};

use super::types::{Channel, Payload};

/// Compute the deterministic idempotency key for a notification identity.
///
/// The payload is serialized through `serde_json`, whose default map is
/// BTree-backed; key ordering is therefore canonical and independent of
/// insertion order.
pub fn idempotency_key(
    event_name: &str,
    recipient_id: &str,
    channel: Channel,
    template_key: &str,
    payload: &Payload,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event_name.as_bytes());
    hasher.update(b"\n");
    hasher.update(recipient_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(channel.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(template_key.as_bytes());
    hasher.update(b"\n");
    // Map serialization cannot fail: keys are strings, values are JSON values
    let canonical = serde_json::to_string(payload).unwrap_or_default();
    hasher.update(canonical.as_bytes());

    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, serde_json::Value)]) -> Payload {
        let mut map = Payload::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        map
    }

    #[test]
    fn test_deterministic_for_identical_inputs() {
        let p = payload(&[("name", json!("Alice")), ("count", json!(3))]);
        let a = idempotency_key("booking.created", "u1", Channel::Telegram, "t1", &p);
        let b = idempotency_key("booking.created", "u1", Channel::Telegram, "t1", &p);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_payload_insertion_order_does_not_matter() {
        let a = payload(&[("a", json!(1)), ("b", json!(2))]);
        let b = payload(&[("b", json!(2)), ("a", json!(1))]);
        assert_eq!(
            idempotency_key("e", "u", Channel::Telegram, "t", &a),
            idempotency_key("e", "u", Channel::Telegram, "t", &b)
        );
    }

    #[test]
    fn test_each_field_changes_the_key() {
        let p = payload(&[("name", json!("Alice"))]);
        let base = idempotency_key("e", "u", Channel::Telegram, "t", &p);

        assert_ne!(base, idempotency_key("e2", "u", Channel::Telegram, "t", &p));
        assert_ne!(base, idempotency_key("e", "u2", Channel::Telegram, "t", &p));
        assert_ne!(base, idempotency_key("e", "u", Channel::Email, "t", &p));
        assert_ne!(base, idempotency_key("e", "u", Channel::Telegram, "t2", &p));

        let other = payload(&[("name", json!("Bob"))]);
        assert_ne!(base, idempotency_key("e", "u", Channel::Telegram, "t", &other));
    }

    #[test]
    fn test_no_collision_across_recipients() {
        let p = payload(&[]);
        let u1 = idempotency_key("e", "u1", Channel::Telegram, "t", &p);
        let u2 = idempotency_key("e", "u2", Channel::Telegram, "t", &p);
        assert_ne!(u1, u2);
    }
}
