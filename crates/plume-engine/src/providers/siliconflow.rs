use plume_contracts::{Credential, GatewayError, NormalizedRequest, ProviderId};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    map_object, no_images, references_from, require_bearer, require_prompt, resolve_model,
    ImageProvider, Submission, VendorOutput,
};
use crate::transport::{self, code_text, require_array, FaultKind, VendorFault};

const VENDOR: &str = "SiliconFlow";
const MODELS: &[&str] = &[
    "black-forest-labs/FLUX.1-schnell",
    "black-forest-labs/FLUX.1-dev",
    "black-forest-labs/FLUX.1-pro",
];
const DEFAULT_SIZE: &str = "1024x1024";

pub struct SiliconFlowProvider {
    api_base: String,
    http: HttpClient,
}

impl SiliconFlowProvider {
    pub fn new(api_base: &str, http: HttpClient) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }
}

impl ImageProvider for SiliconFlowProvider {
    fn id(&self) -> ProviderId {
        ProviderId::SiliconFlow
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

        let mut payload = map_object(json!({
            "model": model,
            "prompt": prompt,
            "image_size": request.size().unwrap_or(DEFAULT_SIZE),
        }));
        if let Some(negative) = request.negative_prompt() {
            payload.insert("negative_prompt".to_string(), json!(negative));
        }
        if let Some(seed) = request.seed() {
            payload.insert("seed".to_string(), json!(seed));
        }
        if let Some(steps) = request.option_i64("num_inference_steps") {
            payload.insert("num_inference_steps".to_string(), json!(steps.clamp(1, 50)));
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

        let images = require_array(VENDOR, &body, "/images")?;
        let references = references_from(images, "url", "b64_json");
        if references.is_empty() {
            return Err(no_images(self.id()));
        }

        let mut output = VendorOutput {
            model,
            references,
            ..VendorOutput::default()
        };
        if let Some(inference) = body.pointer("/timings/inference").filter(|v| v.is_number()) {
            output
                .metadata
                .insert("inferenceMs".to_string(), inference.clone());
        }
        if let Some(seed) = body
            .get("seed")
            .filter(|v| v.is_number())
            .cloned()
            .or_else(|| request.seed().map(Value::from))
        {
            output.metadata.insert("seed".to_string(), seed);
        }
        Ok(Submission::Completed(output))
    }
}

/// Error bodies look like `{"code": 20012, "message": "...", "data": null}`.
fn vendor_fault(body: &Value) -> Option<VendorFault> {
    if body.get("images").is_some() {
        return None;
    }
    let message = body.get("message").and_then(Value::as_str)?;
    Some(VendorFault::new(
        FaultKind::Other,
        code_text(body.get("code")),
        message,
    ))
}

#[cfg(test)]
mod tests {
    use plume_contracts::{Credential, ErrorKind, GatewayError, ImageReference, NormalizedRequest};
    use reqwest::blocking::Client as HttpClient;
    use serde_json::json;

    use super::SiliconFlowProvider;
    use crate::providers::{ImageProvider, Submission};

    #[test]
    fn optional_fields_are_sent_only_when_supplied() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/images/generations")
            .match_header("authorization", "Bearer sf-key")
            .match_body(mockito::Matcher::Json(json!({
                "model": "black-forest-labs/FLUX.1-dev",
                "prompt": "a lighthouse",
                "image_size": "768x1024",
                "negative_prompt": "blurry",
                "seed": 7,
            })))
            .with_status(200)
            .with_body(
                json!({
                    "images": [{"url": "https://sf.example/1.png"}],
                    "timings": {"inference": 812},
                    "seed": 7
                })
                .to_string(),
            )
            .create();
        let provider = SiliconFlowProvider::new(&server.url(), HttpClient::new());
        let request = NormalizedRequest::new("a lighthouse")
            .with_model("black-forest-labs/FLUX.1-dev")
            .with_size("768x1024")
            .with_negative_prompt("blurry")
            .with_seed(7);
        let Submission::Completed(output) =
            provider.generate(&request, &Credential::api_key("sf-key"))?
        else {
            panic!("SiliconFlow is synchronous");
        };
        mock.assert();
        assert_eq!(output.references, vec![ImageReference::url("https://sf.example/1.png")]);
        assert_eq!(output.metadata["inferenceMs"], json!(812));
        assert_eq!(output.metadata["seed"], json!(7));
        Ok(())
    }

    #[test]
    fn unknown_model_is_rejected() {
        let provider = SiliconFlowProvider::new("http://127.0.0.1:9", HttpClient::new());
        let request = NormalizedRequest::new("a cat").with_model("stable-diffusion-xl");
        let err = provider
            .generate(&request, &Credential::api_key("sf-key"))
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidParameter));
    }

    #[test]
    fn vendor_error_keeps_code_and_message() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/images/generations")
            .with_status(429)
            .with_body(r#"{"code":50603,"message":"System is too busy now","data":null}"#)
            .create();
        let provider = SiliconFlowProvider::new(&server.url(), HttpClient::new());
        let err = provider
            .generate(&NormalizedRequest::new("a cat"), &Credential::api_key("sf-key"))
            .err();
        assert_eq!(
            err,
            Some(GatewayError::VendorUnavailable {
                message: "SiliconFlow error: System is too busy now".to_string(),
                code: Some("50603".to_string()),
            })
        );
    }
}
