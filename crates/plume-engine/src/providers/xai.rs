use plume_contracts::{Credential, GatewayError, NormalizedRequest, ProviderId};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    no_images, references_from, require_bearer, require_prompt, resolve_model, ImageProvider,
    Submission, VendorOutput,
};
use crate::transport::{self, code_text, require_array, str_at, FaultKind, VendorFault};

const VENDOR: &str = "xAI";
const MODELS: &[&str] = &["grok-2-image", "grok-2-image-1212"];
const MAX_IMAGES: i64 = 10;

pub struct XaiProvider {
    api_base: String,
    http: HttpClient,
}

impl XaiProvider {
    pub fn new(api_base: &str, http: HttpClient) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/images/generations", self.api_base)
    }
}

impl ImageProvider for XaiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Xai
    }

    fn models(&self) -> &'static [&'static str] {
        MODELS
    }

    fn generate(
        &self,
        request: &NormalizedRequest,
        credential: &Credential,
    ) -> Result<Submission, GatewayError> {
        let prompt = require_prompt(request)?;
        let model = resolve_model(self.id(), request, MODELS, false)?;
        let api_key = require_bearer(self.id(), credential)?;
        let n = request.option_i64("n").unwrap_or(1).clamp(1, MAX_IMAGES);
        let response_format = match request.option_str("response_format") {
            Some("b64_json") => "b64_json",
            _ => "url",
        };

        let payload = json!({
            "model": model,
            "prompt": prompt,
            "n": n,
            "response_format": response_format,
        });
        debug!(target: "plume::provider", provider = VENDOR, model = %model, n, "generating");
        let reply = transport::send(
            VENDOR,
            self.http
                .post(self.endpoint())
                .bearer_auth(api_key)
                .json(&payload),
        )?;
        let body = reply.into_payload(VENDOR, vendor_fault)?;

        let data = require_array(VENDOR, &body, "/data")?;
        let references = references_from(data, "url", "b64_json");
        if references.is_empty() {
            return Err(no_images(self.id()));
        }
        Ok(Submission::Completed(VendorOutput {
            model,
            references,
            revised_prompt: str_at(&body, "/data/0/revised_prompt").map(str::to_string),
            metadata: Map::new(),
        }))
    }
}

/// xAI reports `{"error": "..."}` or `{"error": {"message", "code"}}`.
fn vendor_fault(body: &Value) -> Option<VendorFault> {
    let error = body.get("error")?;
    let message = error
        .as_str()
        .or_else(|| error.get("message").and_then(Value::as_str))
        .unwrap_or("request rejected");
    let code = code_text(body.get("code").or_else(|| error.get("code")));
    Some(VendorFault::new(FaultKind::Other, code, message))
}

#[cfg(test)]
mod tests {
    use plume_contracts::{
        Credential, ErrorKind, GatewayError, ImageReference, NormalizedRequest,
    };
    use reqwest::blocking::Client as HttpClient;
    use serde_json::json;

    use super::XaiProvider;
    use crate::providers::{ImageProvider, Submission};

    #[test]
    fn returns_urls_and_revised_prompt() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/images/generations")
            .match_header("authorization", "Bearer xai-key")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "grok-2-image",
                "prompt": "a cat",
                "n": 1,
                "response_format": "url",
            })))
            .with_status(200)
            .with_body(
                json!({"data": [{"url": "https://x.example/1.jpg", "revised_prompt": "a fluffy cat"}]})
                    .to_string(),
            )
            .create();
        let provider = XaiProvider::new(&server.url(), HttpClient::new());
        let submission =
            provider.generate(&NormalizedRequest::new("a cat"), &Credential::api_key("xai-key"))?;
        mock.assert();
        let Submission::Completed(output) = submission else {
            panic!("xAI is synchronous");
        };
        assert_eq!(output.references, vec![ImageReference::url("https://x.example/1.jpg")]);
        assert_eq!(output.revised_prompt.as_deref(), Some("a fluffy cat"));
        assert_eq!(output.model, "grok-2-image");
        Ok(())
    }

    #[test]
    fn base64_format_yields_encoded_references() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/images/generations")
            .match_body(mockito::Matcher::PartialJson(json!({"response_format": "b64_json", "n": 2})))
            .with_status(200)
            .with_body(json!({"data": [{"b64_json": "AAAA"}, {"b64_json": "BBBB"}]}).to_string())
            .create();
        let provider = XaiProvider::new(&server.url(), HttpClient::new());
        let request = NormalizedRequest::new("two cats")
            .with_option("response_format", json!("b64_json"))
            .with_option("n", json!(2));
        let Submission::Completed(output) =
            provider.generate(&request, &Credential::api_key("xai-key"))?
        else {
            panic!("xAI is synchronous");
        };
        assert_eq!(
            output.references,
            vec![ImageReference::encoded("AAAA"), ImageReference::encoded("BBBB")]
        );
        Ok(())
    }

    #[test]
    fn missing_prompt_and_key_fail_before_any_call() {
        let provider = XaiProvider::new("http://127.0.0.1:9", HttpClient::new());
        let err = provider
            .generate(&NormalizedRequest::new("  "), &Credential::api_key("k"))
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidParameter));
        let err = provider
            .generate(&NormalizedRequest::new("a cat"), &Credential::api_key(""))
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidCredential));
    }

    #[test]
    fn rejected_key_maps_to_invalid_credential() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/images/generations")
            .with_status(401)
            .with_body(r#"{"error":"Incorrect API key provided"}"#)
            .create();
        let provider = XaiProvider::new(&server.url(), HttpClient::new());
        let err = provider
            .generate(&NormalizedRequest::new("a cat"), &Credential::api_key("bad"))
            .err();
        assert_eq!(
            err,
            Some(GatewayError::InvalidCredential {
                message: "Incorrect API key provided".to_string(),
                code: Some("401".to_string()),
            })
        );
    }
}
