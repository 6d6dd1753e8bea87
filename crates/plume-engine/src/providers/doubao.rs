use std::sync::Arc;

use plume_contracts::{Credential, GatewayError, ImageReference, NormalizedRequest, ProviderId};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    host_of, map_object, no_images, parse_size, references_from, require_bearer,
    require_key_pair, require_prompt, resolve_model, ImageProvider, Submission, VendorOutput,
};
use crate::clock::Clock;
use crate::signing::{sign_volc, SigningContext, VolcScope};
use crate::transport::{self, code_text, require_array, str_at, FaultKind, VendorFault};

const VENDOR: &str = "Doubao";
const VISUAL_VENDOR: &str = "Volcengine Visual";
const VISUAL_MODEL: &str = "high_aes_general_v30l_zt2i";
const MODELS: &[&str] = &[
    "doubao-seedream-4-5-251128",
    "doubao-seedream-4-0-250828",
    "doubao-seedream-3-0-t2i-250415",
    "doubao-seededit-3-0-i2i-250628",
    VISUAL_MODEL,
];
const DEFAULT_SIZE: &str = "2048x2048";
const ARK_MODERATION_CODE: &str = "content_policy_violation";

const VISUAL_SCOPE: VolcScope<'static> = VolcScope {
    region: "cn-north-1",
    service: "cv",
};
const VISUAL_ACTION: &str = "CVProcess";
const VISUAL_VERSION: &str = "2022-08-31";
const VISUAL_SUCCESS_CODE: &str = "10000";
const VISUAL_MODERATION_CODE: &str = "50412";
const VISUAL_DEFAULT_EDGE: u32 = 512;
const VISUAL_CREDENTIAL_CODES: &[&str] = &[
    "InvalidAccessKey",
    "SignatureDoesNotMatch",
    "InvalidCredential",
];

/// Which request shape an Ark model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArkFamily {
    /// Seedream 4.x: multi-reference, sequential generation.
    Seedream4,
    /// Seedream 3.0: text only, seed and guidance scale.
    Seedream3,
    /// SeedEdit: one reference, adaptive size, seed and guidance scale.
    Edit,
}

impl ArkFamily {
    fn of(model: &str) -> Self {
        if model.contains("seededit") {
            Self::Edit
        } else if model.contains("seedream-3-0") {
            Self::Seedream3
        } else {
            Self::Seedream4
        }
    }
}

pub struct DoubaoProvider {
    ark_base: String,
    visual_base: String,
    http: HttpClient,
    clock: Arc<dyn Clock>,
}

impl DoubaoProvider {
    pub fn new(ark_base: &str, visual_base: &str, http: HttpClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            ark_base: ark_base.trim_end_matches('/').to_string(),
            visual_base: visual_base.trim_end_matches('/').to_string(),
            http,
            clock,
        }
    }

    fn ark_payload(request: &NormalizedRequest, prompt: &str, model: &str) -> Value {
        let family = ArkFamily::of(model);
        let size = match family {
            ArkFamily::Edit => "adaptive",
            _ => request.size().unwrap_or(DEFAULT_SIZE),
        };
        let mut payload = map_object(json!({
            "model": model,
            "prompt": prompt,
            "size": size,
            "response_format": request.option_str("response_format").unwrap_or("url"),
            "watermark": request.option_bool("watermark").unwrap_or(true),
        }));

        let references = request.reference_images();
        match (family, references) {
            (_, []) => {}
            (ArkFamily::Edit, [first, ..]) | (_, [first]) => {
                payload.insert("image".to_string(), json!(first));
            }
            (_, all) => {
                payload.insert("image".to_string(), json!(all));
            }
        }

        match family {
            ArkFamily::Seedream3 | ArkFamily::Edit => {
                if let Some(seed) = request.seed() {
                    payload.insert("seed".to_string(), json!(seed));
                }
                if let Some(scale) = request.option_f64("guidance_scale") {
                    payload.insert("guidance_scale".to_string(), json!(scale));
                }
            }
            ArkFamily::Seedream4 => {
                let mode = request
                    .option_str("sequential_image_generation")
                    .unwrap_or("disabled");
                payload.insert("sequential_image_generation".to_string(), json!(mode));
                if mode == "auto" {
                    if let Some(options) = request.option("sequential_image_generation_options") {
                        payload.insert(
                            "sequential_image_generation_options".to_string(),
                            options.clone(),
                        );
                    }
                }
            }
        }
        Value::Object(payload)
    }

    fn generate_ark(
        &self,
        request: &NormalizedRequest,
        credential: &Credential,
        prompt: &str,
        model: String,
    ) -> Result<Submission, GatewayError> {
        let api_key = require_bearer(ProviderId::Doubao, credential)?;
        let payload = Self::ark_payload(request, prompt, &model);
        debug!(target: "plume::provider", provider = VENDOR, model = %model, "generating");
        let reply = transport::send(
            VENDOR,
            self.http
                .post(format!("{}/images/generations", self.ark_base))
                .bearer_auth(api_key)
                .json(&payload),
        )?;
        let body = reply.into_payload(VENDOR, ark_fault)?;

        let data = require_array(VENDOR, &body, "/data")?;
        let references = references_from(data, "url", "b64_json");
        if references.is_empty() {
            return Err(no_images(ProviderId::Doubao));
        }
        let mut output = VendorOutput {
            model,
            references,
            ..VendorOutput::default()
        };
        if let Some(size) = payload.get("size") {
            output.metadata.insert("size".to_string(), size.clone());
        }
        if let Some(tokens) = body.pointer("/usage/total_tokens").filter(|v| v.is_number()) {
            output
                .metadata
                .insert("totalTokens".to_string(), tokens.clone());
        }
        Ok(Submission::Completed(output))
    }

    fn generate_visual(
        &self,
        request: &NormalizedRequest,
        credential: &Credential,
        prompt: &str,
    ) -> Result<Submission, GatewayError> {
        let key = require_key_pair(ProviderId::Doubao, credential)?;
        let (width, height) = request
            .size()
            .and_then(parse_size)
            .unwrap_or((VISUAL_DEFAULT_EDGE, VISUAL_DEFAULT_EDGE));
        let return_url = request.option_str("response_format").unwrap_or("url") == "url";
        let payload = json!({
            "req_key": VISUAL_MODEL,
            "prompt": prompt,
            "seed": request.seed().unwrap_or(-1),
            "scale": request.option_f64("scale").unwrap_or(3.5),
            "ddim_steps": request.option_i64("ddim_steps").unwrap_or(25),
            "width": width,
            "height": height,
            "use_pre_llm": request.option_bool("use_pre_llm").unwrap_or(true),
            "use_sr": request.option_bool("use_sr").unwrap_or(true),
            "return_url": return_url,
        });
        let bytes = serde_json::to_vec(&payload)
            .map_err(|err| GatewayError::Internal(format!("failed encoding payload: {err}")))?;

        let host = host_of(ProviderId::Doubao, &self.visual_base)?;
        let context = SigningContext::post(&host, bytes.clone(), self.clock.now())
            .with_query("Action", VISUAL_ACTION)
            .with_query("Version", VISUAL_VERSION)
            .with_header("Content-Type", "application/json");
        let signed = sign_volc(key, &context, VISUAL_SCOPE)
            .map_err(|err| GatewayError::Internal(format!("request signing failed: {err:#}")))?;

        debug!(target: "plume::provider", provider = VISUAL_VENDOR, width, height, "generating");
        let mut builder = self
            .http
            .post(format!("{}/", self.visual_base))
            .query(&[("Action", VISUAL_ACTION), ("Version", VISUAL_VERSION)]);
        for (name, value) in &signed {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let reply = transport::send(VISUAL_VENDOR, builder.body(bytes))?;
        let body = reply.into_payload(VISUAL_VENDOR, visual_fault)?;

        let data = body
            .get("data")
            .filter(|data| data.is_object())
            .ok_or_else(|| GatewayError::invalid_response("Volcengine Visual response is missing 'data'"))?;
        let mut references: Vec<ImageReference> = strings_at(data, "image_urls")
            .map(ImageReference::url)
            .collect();
        references.extend(strings_at(data, "binary_data_base64").map(ImageReference::encoded));
        if references.is_empty() {
            return Err(no_images(ProviderId::Doubao));
        }
        let mut output = VendorOutput {
            model: VISUAL_MODEL.to_string(),
            references,
            revised_prompt: str_at(data, "/rephraser_result").map(str::to_string),
            ..VendorOutput::default()
        };
        output
            .metadata
            .insert("size".to_string(), json!(format!("{width}x{height}")));
        Ok(Submission::Completed(output))
    }
}

impl ImageProvider for DoubaoProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Doubao
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
        if model == VISUAL_MODEL {
            return self.generate_visual(request, credential, prompt);
        }
        self.generate_ark(request, credential, prompt, model)
    }
}

fn strings_at<'a>(data: &'a Value, key: &str) -> impl Iterator<Item = &'a str> {
    data.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn ark_fault(body: &Value) -> Option<VendorFault> {
    let error = body.get("error")?;
    let code = code_text(error.get("code"));
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("request rejected");
    let kind = match code.as_deref() {
        Some(ARK_MODERATION_CODE) => FaultKind::Moderation,
        Some("AuthenticationError") => FaultKind::Credential,
        _ => FaultKind::Other,
    };
    Some(VendorFault::new(kind, code, message))
}

/// OpenAPI gateway errors sit in `ResponseMetadata.Error`; service errors
/// are a top-level `code` other than 10000.
fn visual_fault(body: &Value) -> Option<VendorFault> {
    let (code, name, message) = match body.pointer("/ResponseMetadata/Error") {
        Some(error) => (
            code_text(error.get("CodeN")).or_else(|| code_text(error.get("Code"))),
            code_text(error.get("Code")),
            error.get("Message").and_then(Value::as_str).unwrap_or_default(),
        ),
        None => {
            let code = code_text(body.get("code"))?;
            if code == VISUAL_SUCCESS_CODE {
                return None;
            }
            (
                Some(code),
                None,
                body.get("message").and_then(Value::as_str).unwrap_or_default(),
            )
        }
    };
    let kind = if code.as_deref() == Some(VISUAL_MODERATION_CODE)
        || message.contains("Text Risk Not Pass")
    {
        FaultKind::Moderation
    } else if name
        .as_deref()
        .is_some_and(|name| VISUAL_CREDENTIAL_CODES.contains(&name))
    {
        FaultKind::Credential
    } else {
        FaultKind::Other
    };
    let message = if message.is_empty() {
        "request rejected"
    } else {
        message
    };
    Some(VendorFault::new(kind, code, message))
}
