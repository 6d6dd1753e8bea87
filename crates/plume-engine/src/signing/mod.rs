//! Request signing for the two vendors that reject bearer tokens.
//!
//! Both protocols are pure: the timestamp travels in [`SigningContext`], so
//! the same inputs always produce the same headers.

mod tc3;
mod volc;

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

pub use tc3::{sign_tc3, Tc3Scope, TC3_ALGORITHM, TC3_CONTENT_TYPE};
pub use volc::{sign_volc, VolcScope, VOLC_ALGORITHM};

pub type SignedHeaders = BTreeMap<String, String>;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy)]
pub struct KeyPair<'a> {
    pub access_key_id: &'a str,
    pub secret_key: &'a str,
}

/// Canonical description of the outgoing request.
#[derive(Debug, Clone)]
pub struct SigningContext {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl SigningContext {
    pub fn post(host: &str, body: impl Into<Vec<u8>>, timestamp: DateTime<Utc>) -> Self {
        Self {
            method: "POST".to_string(),
            path: "/".to_string(),
            query: Vec::new(),
            headers: vec![("Host".to_string(), host.to_string())],
            body: body.into(),
            timestamp,
        }
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|err| anyhow!("invalid HMAC key: {err}"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
