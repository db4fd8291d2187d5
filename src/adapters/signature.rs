//! Webhook authenticity checks.
//!
//! storeA signs the raw body with HMAC-SHA256 (`sha256=<hex>` or base64).
//! storeB sends an HS256 token whose claims are the body's JSON content.
//! Every failure is `false`, never an error: the ingress only needs a
//! yes/no.

use {
    crate::domain::provider::Provider,
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    hmac::{Hmac, Mac},
    jsonwebtoken::{Algorithm, DecodingKey, Validation, decode},
    sha2::Sha256,
    subtle::ConstantTimeEq,
};

type HmacSha256 = Hmac<Sha256>;

pub const STORE_A_SIGNATURE_HEADER: &str = "x-store-a-signature";
pub const STORE_B_SIGNATURE_HEADER: &str = "x-store-b-signature";

const HEX_PREFIX: &str = "sha256=";

/// Registered JWT claims a signer may add on top of the body.
const REGISTERED_CLAIMS: [&str; 6] = ["iat", "exp", "nbf", "iss", "aud", "jti"];

pub fn signature_header(provider: Provider) -> &'static str {
    match provider {
        Provider::StoreA => STORE_A_SIGNATURE_HEADER,
        Provider::StoreB => STORE_B_SIGNATURE_HEADER,
    }
}

pub fn verify(raw_body: &[u8], signature_header: &str, provider: Provider, secret: &str) -> bool {
    if raw_body.is_empty() || signature_header.trim().is_empty() || secret.is_empty() {
        tracing::warn!(%provider, "missing body, signature or secret");
        return false;
    }
    match provider {
        Provider::StoreA => verify_hmac(raw_body, signature_header.trim(), secret),
        Provider::StoreB => verify_token(raw_body, signature_header.trim(), secret),
    }
}

fn verify_hmac(raw_body: &[u8], header: &str, secret: &str) -> bool {
    let provided = match header.strip_prefix(HEX_PREFIX) {
        Some(hex_sig) => hex::decode(hex_sig).ok(),
        None => BASE64.decode(header).ok(),
    };
    let Some(provided) = provided else {
        tracing::debug!("signature is neither sha256=<hex> nor base64");
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    let expected = mac.finalize().into_bytes();

    constant_time_eq(&expected, &provided)
}

fn verify_token(raw_body: &[u8], token: &str, secret: &str) -> bool {
    let Ok(body) = serde_json::from_slice::<serde_json::Value>(raw_body) else {
        tracing::debug!("storeB body is not JSON");
        return false;
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_aud = false;

    let claims = match decode::<serde_json::Value>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => data.claims,
        Err(e) => {
            tracing::debug!(error = %e, "storeB token rejected");
            return false;
        }
    };

    let (serde_json::Value::Object(mut claims), serde_json::Value::Object(body)) = (claims, body)
    else {
        return false;
    };
    for claim in REGISTERED_CLAIMS {
        if !body.contains_key(claim) {
            claims.remove(claim);
        }
    }
    claims == body
}

/// Length check first, then a comparison whose time does not depend on
/// where the inputs differ.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// `sha256=<hex>` header value for `body`. Used by senders and tests.
pub fn sign_store_a(body: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("{HEX_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}
