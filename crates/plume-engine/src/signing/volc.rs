use std::collections::BTreeMap;

use anyhow::Result;

use super::{hmac_sha256, sha256_hex, KeyPair, SignedHeaders, SigningContext};

pub const VOLC_ALGORITHM: &str = "HMAC-SHA256";

#[derive(Debug, Clone, Copy)]
pub struct VolcScope<'a> {
    pub region: &'a str,
    pub service: &'a str,
}

/// Volcengine OpenAPI signature (SigV4 family, `request` terminator).
pub fn sign_volc(key: KeyPair<'_>, ctx: &SigningContext, scope: VolcScope<'_>) -> Result<SignedHeaders> {
    let x_date = ctx.timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let short_date = &x_date[..8];

    let mut headers_to_sign = BTreeMap::new();
    for (name, value) in &ctx.headers {
        let lowered = name.trim().to_ascii_lowercase();
        if lowered == "host" || lowered == "content-type" || lowered.starts_with("x-") {
            headers_to_sign.insert(lowered, value.trim().to_string());
        }
    }
    headers_to_sign.insert("x-date".to_string(), x_date.clone());

    let canonical_headers = headers_to_sign
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect::<String>();
    let signed_headers = headers_to_sign
        .keys()
        .map(String::as_str)
        .collect::<Vec<&str>>()
        .join(";");

    let canonical_request = [
        ctx.method.to_ascii_uppercase(),
        ctx.path.clone(),
        canonical_query(&ctx.query),
        canonical_headers,
        signed_headers.clone(),
        sha256_hex(&ctx.body),
    ]
    .join("\n");

    let credential_scope = format!(
        "{short_date}/{}/{}/request",
        scope.region, scope.service
    );
    let string_to_sign = [
        VOLC_ALGORITHM,
        x_date.as_str(),
        credential_scope.as_str(),
        sha256_hex(canonical_request.as_bytes()).as_str(),
    ]
    .join("\n");

    let k_date = hmac_sha256(key.secret_key.as_bytes(), short_date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, scope.region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, scope.service.as_bytes())?;
    let k_signing = hmac_sha256(&k_service, b"request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

    let mut out = SignedHeaders::new();
    out.insert(
        "Authorization".to_string(),
        format!(
            "{VOLC_ALGORITHM} Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
            key.access_key_id
        ),
    );
    out.insert("X-Date".to_string(), x_date);
    out.insert("Content-Type".to_string(), "application/json".to_string());
    Ok(out)
}

fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs = query
        .iter()
        .map(|(key, value)| {
            (
                urlencoding::encode(key).into_owned(),
                urlencoding::encode(value).into_owned(),
            )
        })
        .collect::<Vec<(String, String)>>();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<String>>()
        .join("&")
}
