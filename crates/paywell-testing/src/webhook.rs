//! Signed billing webhook builders.

use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";

/// Hex HMAC-SHA256 of `payload` under `secret`, as the provider signs it.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Provider envelope `{id, type, created, data: {object}}` stamped now.
pub fn envelope(event_id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": event_id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": { "object": object },
    })
}

/// `checkout.session.completed` for `user_id` buying `plan_id`.
pub fn checkout_completed(event_id: &str, user_id: &str, plan_id: &str) -> Value {
    envelope(
        event_id,
        "checkout.session.completed",
        json!({
            "id": format!("cs_{event_id}"),
            "payment_intent": format!("pi_{event_id}"),
            "amount_total": 999,
            "currency": "usd",
            "metadata": {
                "user_id": user_id,
                "plan_id": plan_id,
                "order_id": format!("order_{event_id}"),
            },
        }),
    )
}

/// Serialized body plus its signature.
pub fn signed(secret: &str, body: &Value) -> (Vec<u8>, String) {
    let bytes = serde_json::to_vec(body).unwrap();
    let signature = sign(secret, &bytes);
    (bytes, signature)
}
