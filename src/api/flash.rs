//! One-shot flash messages carried in a signed cookie

use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Name of the flash cookie
pub const FLASH_COOKIE: &str = "family_flash";

/// Maximum queued messages; older ones are dropped
const MAX_FLASHES: usize = 5;

/// Flash message category, used as a CSS class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Info,
    Danger,
}

impl Level {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Info => "info",
            Self::Danger => "danger",
        }
    }
}

/// A message shown once on the next rendered page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: Level,
    pub message: String,
}

impl Flash {
    /// CSS class for the message
    #[must_use]
    pub const fn category(&self) -> &'static str {
        self.level.as_str()
    }
}

fn decode(value: &str) -> Vec<Flash> {
    URL_SAFE_NO_PAD
        .decode(value)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

fn encode(flashes: &[Flash]) -> String {
    // Serializing plain strings and enums cannot fail
    let json = serde_json::to_vec(flashes).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

fn flash_cookie(value: String) -> Cookie<'static> {
    Cookie::build((FLASH_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Queue a message for the next page
#[must_use]
pub fn push(jar: SignedCookieJar, level: Level, message: impl Into<String>) -> SignedCookieJar {
    let mut flashes = jar
        .get(FLASH_COOKIE)
        .map(|c| decode(c.value()))
        .unwrap_or_default();

    flashes.push(Flash {
        level,
        message: message.into(),
    });
    if flashes.len() > MAX_FLASHES {
        flashes.drain(..flashes.len() - MAX_FLASHES);
    }

    jar.add(flash_cookie(encode(&flashes)))
}

/// Take all queued messages, clearing the cookie
#[must_use]
pub fn take(jar: SignedCookieJar) -> (SignedCookieJar, Vec<Flash>) {
    match jar.get(FLASH_COOKIE) {
        Some(cookie) => {
            let flashes = decode(cookie.value());
            (jar.remove(flash_cookie(String::new())), flashes)
        }
        None => (jar, Vec::new()),
    }
}
