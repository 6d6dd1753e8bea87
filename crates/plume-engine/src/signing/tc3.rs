use anyhow::Result;

use super::{hmac_sha256, sha256_hex, KeyPair, SignedHeaders, SigningContext};

pub const TC3_ALGORITHM: &str = "TC3-HMAC-SHA256";
pub const TC3_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const DEFAULT_REGION: &str = "ap-guangzhou";

#[derive(Debug, Clone, Copy)]
pub struct Tc3Scope<'a> {
    pub service: &'a str,
    pub action: &'a str,
    pub version: &'a str,
    pub region: Option<&'a str>,
}

/// Tencent Cloud TC3 signature. The canonical request is fixed to
/// `POST /` with `content-type;host` as the signed header set.
pub fn sign_tc3(key: KeyPair<'_>, ctx: &SigningContext, scope: Tc3Scope<'_>) -> Result<SignedHeaders> {
    let timestamp = ctx.timestamp.timestamp().to_string();
    let date = ctx.timestamp.format("%Y-%m-%d").to_string();
    let host = ctx.header("host").unwrap_or_default();

    let canonical_request = [
        "POST".to_string(),
        "/".to_string(),
        String::new(),
        format!("content-type:{TC3_CONTENT_TYPE}"),
        format!("host:{host}"),
        String::new(),
        "content-type;host".to_string(),
        sha256_hex(&ctx.body),
    ]
    .join("\n");

    let credential_scope = format!("{date}/{}/tc3_request", scope.service);
    let string_to_sign = [
        TC3_ALGORITHM,
        timestamp.as_str(),
        credential_scope.as_str(),
        sha256_hex(canonical_request.as_bytes()).as_str(),
    ]
    .join("\n");

    let secret_date = hmac_sha256(
        format!("TC3{}", key.secret_key).as_bytes(),
        date.as_bytes(),
    )?;
    let secret_service = hmac_sha256(&secret_date, scope.service.as_bytes())?;
    let secret_signing = hmac_sha256(&secret_service, b"tc3_request")?;
    let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes())?);

    let mut out = SignedHeaders::new();
    out.insert(
        "Authorization".to_string(),
        format!(
            "{TC3_ALGORITHM} Credential={}/{credential_scope}, SignedHeaders=content-type;host, Signature={signature}",
            key.access_key_id
        ),
    );
    out.insert("Content-Type".to_string(), TC3_CONTENT_TYPE.to_string());
    out.insert("Host".to_string(), host.to_string());
    out.insert("X-TC-Action".to_string(), scope.action.to_string());
    out.insert("X-TC-Timestamp".to_string(), timestamp);
    out.insert("X-TC-Version".to_string(), scope.version.to_string());
    out.insert(
        "X-TC-Region".to_string(),
        scope.region.unwrap_or(DEFAULT_REGION).to_string(),
    );
    Ok(out)
}
