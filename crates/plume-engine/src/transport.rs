use std::time::Duration;

use plume_contracts::GatewayError;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::StatusCode;
use serde_json::Value;

const BODY_EXCERPT_CHARS: usize = 512;

pub(crate) fn build_http_client(timeout: Duration) -> Result<HttpClient, GatewayError> {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| GatewayError::Internal(format!("http client setup failed: {err}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaultKind {
    Moderation,
    Credential,
    Other,
}

/// Error envelope a vendor reported inside its response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VendorFault {
    pub kind: FaultKind,
    pub code: Option<String>,
    pub message: String,
}

impl VendorFault {
    pub fn new(kind: FaultKind, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct VendorReply {
    pub status: StatusCode,
    pub body: Value,
}

impl VendorReply {
    /// Resolves the reply into its payload, or the taxonomy error that the
    /// status code and the vendor's own envelope describe.
    pub fn into_payload(
        self,
        provider: &str,
        inspect: impl Fn(&Value) -> Option<VendorFault>,
    ) -> Result<Value, GatewayError> {
        let code = self.status.as_u16();
        let fault = inspect(&self.body);

        if let Some(fault) = fault.as_ref().filter(|f| f.kind == FaultKind::Moderation) {
            return Err(GatewayError::ContentModeration {
                message: fault.message.clone(),
                code: fault.code.clone(),
            });
        }
        if matches!(self.status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(GatewayError::InvalidCredential {
                message: fault
                    .as_ref()
                    .map(|f| f.message.clone())
                    .unwrap_or_else(|| format!("{provider} rejected the credential ({code})")),
                code: fault
                    .and_then(|f| f.code)
                    .or_else(|| Some(code.to_string())),
            });
        }
        if let Some(fault) = fault {
            return Err(match fault.kind {
                FaultKind::Credential => GatewayError::InvalidCredential {
                    message: fault.message,
                    code: fault.code,
                },
                _ => GatewayError::VendorUnavailable {
                    message: format!("{provider} error: {}", fault.message),
                    code: fault.code.or_else(|| Some(code.to_string())),
                },
            });
        }
        if !self.status.is_success() {
            return Err(GatewayError::VendorUnavailable {
                message: format!(
                    "{provider} request failed ({code}): {}",
                    truncate_text(&body_text(&self.body), BODY_EXCERPT_CHARS)
                ),
                code: Some(code.to_string()),
            });
        }
        Ok(self.body)
    }
}

pub(crate) fn send(provider: &str, request: RequestBuilder) -> Result<VendorReply, GatewayError> {
    let response = request.send().map_err(|err| transport_error(provider, &err))?;
    read_reply(provider, response)
}

fn read_reply(provider: &str, response: HttpResponse) -> Result<VendorReply, GatewayError> {
    let status = response.status();
    let text = response
        .text()
        .map_err(|err| transport_error(provider, &err))?;
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => parsed,
            Err(_) if status.is_success() => {
                return Err(GatewayError::invalid_response(format!(
                    "{provider} returned invalid JSON payload"
                )))
            }
            Err(_) => Value::String(truncate_text(&text, BODY_EXCERPT_CHARS)),
        }
    };
    Ok(VendorReply { status, body })
}

fn transport_error(provider: &str, err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        return GatewayError::Timeout(format!("{provider} request timed out"));
    }
    let message = if err.is_connect() {
        format!("{provider} connection failed: {err}")
    } else {
        format!("{provider} request failed: {err}")
    };
    GatewayError::unavailable(message)
}

fn body_text(body: &Value) -> String {
    match body {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Vendor codes arrive as numbers or strings; normalize both to text.
pub(crate) fn code_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub(crate) fn str_at<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub(crate) fn require_str<'a>(
    provider: &str,
    payload: &'a Value,
    pointer: &str,
) -> Result<&'a str, GatewayError> {
    str_at(payload, pointer).ok_or_else(|| {
        GatewayError::invalid_response(format!("{provider} response is missing '{pointer}'"))
    })
}

pub(crate) fn require_array<'a>(
    provider: &str,
    payload: &'a Value,
    pointer: &str,
) -> Result<&'a Vec<Value>, GatewayError> {
    payload
        .pointer(pointer)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            GatewayError::invalid_response(format!(
                "{provider} response is missing array '{pointer}'"
            ))
        })
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing: &String| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
