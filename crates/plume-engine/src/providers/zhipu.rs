use plume_contracts::{Credential, GatewayError, NormalizedRequest, ProviderId};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    map_object, no_images, references_from, require_bearer, require_prompt, resolve_model,
    ImageProvider, Submission, VendorOutput,
};
use crate::transport::{self, code_text, require_array, FaultKind, VendorFault};

const VENDOR: &str = "ZhipuAI";
const MODELS: &[&str] = &["cogview-3-flash", "cogview-3", "cogview-3-plus"];
const DEFAULT_SIZE: &str = "1024x1024";
/// Zhipu's "unsafe or sensitive content" code.
const MODERATION_CODE: &str = "1301";

pub struct ZhipuProvider {
    api_base: String,
    http: HttpClient,
}

impl ZhipuProvider {
    pub fn new(api_base: &str, http: HttpClient) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }
}

impl ImageProvider for ZhipuProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Zhipu
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
        let model = resolve_model(self.id(), request, MODELS, true)?;
        let api_key = require_bearer(self.id(), credential)?;
        let size = request.size().unwrap_or(DEFAULT_SIZE);

        let mut payload = map_object(json!({
            "model": model,
            "prompt": prompt,
            "size": size,
        }));
        if let Some(user_id) = request.option_str("user_id") {
            payload.insert("user_id".to_string(), json!(user_id));
        }

        debug!(target: "plume::provider", provider = VENDOR, model = %model, "generating");
        let reply = transport::send(
            VENDOR,
            self.http
                .post(format!("{}/images/generations", self.api_base))
                .bearer_auth(api_key)
                .json(&Value::Object(payload)),
        )?;
        let body = reply.into_payload(VENDOR, vendor_fault)?;

        let data = require_array(VENDOR, &body, "/data")?;
        let references = references_from(data, "url", "b64_json");
        if references.is_empty() {
            return Err(no_images(self.id()));
        }
        let mut output = VendorOutput {
            model,
            references,
            ..VendorOutput::default()
        };
        output.metadata.insert("size".to_string(), json!(size));
        Ok(Submission::Completed(output))
    }
}

fn vendor_fault(body: &Value) -> Option<VendorFault> {
    let error = body.get("error")?;
    let code = code_text(error.get("code"));
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("request rejected")
        .to_string();
    let kind = if code.as_deref() == Some(MODERATION_CODE) {
        FaultKind::Moderation
    } else {
        FaultKind::Other
    };
    Some(VendorFault::new(kind, code, message))
}

#[cfg(test)]
mod tests {
    use plume_contracts::{Credential, ErrorKind, GatewayError, ImageReference, NormalizedRequest};
    use reqwest::blocking::Client as HttpClient;
    use serde_json::json;

    use super::ZhipuProvider;
    use crate::providers::{ImageProvider, Submission};

    #[test]
    fn model_is_required() {
        let provider = ZhipuProvider::new("http://127.0.0.1:9", HttpClient::new());
        let err = provider
            .generate(&NormalizedRequest::new("a cat"), &Credential::api_key("zp-key"))
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidParameter));
    }

    #[test]
    fn forwards_user_id_and_reads_urls() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/images/generations")
            .match_header("authorization", "Bearer zp-key")
            .match_body(mockito::Matcher::Json(json!({
                "model": "cogview-3-plus",
                "prompt": "a cat",
                "size": "1024x1024",
                "user_id": "u-1",
            })))
            .with_status(200)
            .with_body(json!({"created": 1, "data": [{"url": "https://zp.example/a.png"}]}).to_string())
            .create();
        let provider = ZhipuProvider::new(&server.url(), HttpClient::new());
        let request = NormalizedRequest::new("a cat")
            .with_model("cogview-3-plus")
            .with_option("user_id", json!("u-1"));
        let Submission::Completed(output) =
            provider.generate(&request, &Credential::api_key("zp-key"))?
        else {
            panic!("Zhipu is synchronous");
        };
        mock.assert();
        assert_eq!(output.references, vec![ImageReference::url("https://zp.example/a.png")]);
        Ok(())
    }

    #[test]
    fn sensitive_content_code_is_moderation() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/images/generations")
            .with_status(400)
            .with_body(r#"{"error":{"code":"1301","message":"contains unsafe content"}}"#)
            .create();
        let provider = ZhipuProvider::new(&server.url(), HttpClient::new());
        let request = NormalizedRequest::new("bad prompt").with_model("cogview-3");
        let err = provider
            .generate(&request, &Credential::api_key("zp-key"))
            .err();
        assert_eq!(
            err,
            Some(GatewayError::ContentModeration {
                message: "contains unsafe content".to_string(),
                code: Some("1301".to_string()),
            })
        );
    }
}
