//! Tokens for the follow/unfollow confirmation form.
//!
//! A token is `<expiry>.<hex HMAC-SHA256(user_id:expiry)>` keyed with the
//! server secret, so it is only valid for the user it was issued to.

use anyhow::Result;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LIFETIME_SECS: i64 = 3600;

pub fn issue(secret: &str, user_id: Uuid, now: DateTime<Utc>) -> Result<String> {
    let expires = now.timestamp() + TOKEN_LIFETIME_SECS;
    let mac = signer(secret, user_id, expires)?;
    Ok(format!("{}.{}", expires, hex::encode(mac.finalize().into_bytes())))
}

pub fn verify(secret: &str, user_id: Uuid, token: &str, now: DateTime<Utc>) -> bool {
    let Some((expires, signature)) = token.split_once('.') else {
        return false;
    };
    let Ok(expires) = expires.parse::<i64>() else {
        return false;
    };
    if expires < now.timestamp() {
        return false;
    }
    let Ok(signature) = hex::decode(signature) else {
        return false;
    };

    match signer(secret, user_id, expires) {
        Ok(mac) => mac.verify_slice(&signature).is_ok(),
        Err(_) => false,
    }
}

fn signer(secret: &str, user_id: Uuid, expires: i64) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(format!("{}:{}", user_id, expires).as_bytes());
    Ok(mac)
}
