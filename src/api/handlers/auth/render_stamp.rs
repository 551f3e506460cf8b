//! Signed render timestamps for public forms.
//!
//! A stamp is `base64url(unix_seconds).base64url(hmac_sha256(secret, "render:" + unix_seconds))`.
//! It is minted when a form is served and checked on submission to tell scripted
//! submissions (too fast) and stale tabs (too old) apart from people.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampCheck {
    Fresh,
    /// Submitted faster than a person could fill the form.
    TooFast,
    /// Older than the accepted window; the client should reload the form.
    Stale,
    /// Missing, malformed, or not signed by us.
    Invalid,
}

#[derive(Clone)]
pub struct RenderStamper {
    key: SecretString,
    min_age: Duration,
    max_age: Duration,
}

impl std::fmt::Debug for RenderStamper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderStamper")
            .field("min_age", &self.min_age)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl RenderStamper {
    #[must_use]
    pub fn new(key: SecretString, min_age: Duration, max_age: Duration) -> Self {
        Self {
            key,
            min_age,
            max_age,
        }
    }

    fn mac(&self, timestamp: &str) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret().as_bytes()).ok()?;
        mac.update(b"render:");
        mac.update(timestamp.as_bytes());
        Some(mac)
    }

    /// Mint a stamp for a form rendered at `now` (unix seconds).
    #[must_use]
    pub fn mint_at(&self, now: i64) -> String {
        let timestamp = now.to_string();
        let signature = self
            .mac(&timestamp)
            .map(|mac| URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
            .unwrap_or_default();
        format!("{}.{}", URL_SAFE_NO_PAD.encode(timestamp.as_bytes()), signature)
    }

    /// Classify a submitted stamp against the clock value `now`.
    #[must_use]
    pub fn check_at(&self, stamp: Option<&str>, now: i64) -> StampCheck {
        let Some(rendered_at) = stamp.and_then(|stamp| self.rendered_at(stamp)) else {
            return StampCheck::Invalid;
        };

        let age = now - rendered_at;
        let min_age = i64::try_from(self.min_age.as_secs()).unwrap_or(i64::MAX);
        let max_age = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);

        if age < min_age {
            StampCheck::TooFast
        } else if age > max_age {
            StampCheck::Stale
        } else {
            StampCheck::Fresh
        }
    }

    fn rendered_at(&self, stamp: &str) -> Option<i64> {
        let (encoded_timestamp, encoded_signature) = stamp.trim().split_once('.')?;
        let timestamp = String::from_utf8(URL_SAFE_NO_PAD.decode(encoded_timestamp).ok()?).ok()?;
        let signature = URL_SAFE_NO_PAD.decode(encoded_signature).ok()?;

        self.mac(&timestamp)?.verify_slice(&signature).ok()?;
        timestamp.parse::<i64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn stamper() -> RenderStamper {
        RenderStamper::new(
            SecretString::from("0123456789abcdef0123456789abcdef"),
            Duration::from_secs(2),
            Duration::from_secs(30 * 60),
        )
    }

    #[test]
    fn fresh_window() {
        let stamper = stamper();
        let stamp = stamper.mint_at(NOW);
        assert_eq!(stamper.check_at(Some(&stamp), NOW + 2), StampCheck::Fresh);
        assert_eq!(stamper.check_at(Some(&stamp), NOW + 30 * 60), StampCheck::Fresh);
    }

    #[test]
    fn too_fast_and_stale() {
        let stamper = stamper();
        let stamp = stamper.mint_at(NOW);
        assert_eq!(stamper.check_at(Some(&stamp), NOW), StampCheck::TooFast);
        assert_eq!(stamper.check_at(Some(&stamp), NOW + 1), StampCheck::TooFast);
        assert_eq!(
            stamper.check_at(Some(&stamp), NOW + 30 * 60 + 1),
            StampCheck::Stale
        );
    }

    #[test]
    fn tampered_or_missing_is_invalid() {
        let stamper = stamper();
        assert_eq!(stamper.check_at(None, NOW), StampCheck::Invalid);
        assert_eq!(stamper.check_at(Some(""), NOW), StampCheck::Invalid);
        assert_eq!(stamper.check_at(Some("garbage"), NOW), StampCheck::Invalid);

        let stamp = stamper.mint_at(NOW);
        let (_, signature) = stamp.split_once('.').unwrap_or_default();
        let forged = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode((NOW - 60).to_string()),
            signature
        );
        assert_eq!(stamper.check_at(Some(&forged), NOW), StampCheck::Invalid);

        // Plain base64 timestamps without a signature are rejected.
        let unsigned = URL_SAFE_NO_PAD.encode((NOW - 60).to_string());
        assert_eq!(stamper.check_at(Some(&unsigned), NOW), StampCheck::Invalid);
    }

    #[test]
    fn other_key_is_invalid() {
        let other = RenderStamper::new(
            SecretString::from("ffffffffffffffffffffffffffffffff"),
            Duration::from_secs(2),
            Duration::from_secs(30 * 60),
        );
        let stamp = other.mint_at(NOW);
        assert_eq!(stamper().check_at(Some(&stamp), NOW + 10), StampCheck::Invalid);
    }
}
