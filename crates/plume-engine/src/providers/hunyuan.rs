use std::sync::Arc;
use std::time::Duration;

use plume_contracts::{Credential, GatewayError, ImageReference, NormalizedRequest, ProviderId};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    host_of, map_object, no_images, parse_size, require_key_pair, require_prompt, resolve_model,
    ImageProvider, Submission, VendorOutput,
};
use crate::clock::Clock;
use crate::poller::{JobHandle, JobSnapshot, PollPolicy, StatusMarkers};
use crate::signing::{sign_tc3, SigningContext, Tc3Scope};
use crate::transport::{self, code_text, str_at, FaultKind, VendorFault};

const VENDOR: &str = "Hunyuan";
const LITE_MODEL: &str = "hunyuan-lite";
const PRO_MODEL: &str = "hunyuan-3.0";
const MODELS: &[&str] = &[LITE_MODEL, PRO_MODEL];
const DEFAULT_RESOLUTION: &str = "1024:1024";

const LITE_SCOPE: Tc3Scope<'static> = Tc3Scope {
    service: "aiart",
    action: "TextToImageLite",
    version: "2022-12-29",
    region: None,
};
const SUBMIT_SCOPE: Tc3Scope<'static> = Tc3Scope {
    service: "hunyuan",
    action: "SubmitHunyuanImageJob",
    version: "2023-09-01",
    region: None,
};
const QUERY_SCOPE: Tc3Scope<'static> = Tc3Scope {
    action: "QueryHunyuanImageJob",
    ..SUBMIT_SCOPE
};

/// `5` means finished with some images failing; it still carries results.
const SUCCESS_CODES: &[&str] = &["4", "5"];
const FAILURE_CODES: &[&str] = &["3"];
const POLL_INTERVAL: Duration = Duration::from_millis(1500);
const MAX_POLLS: u32 = 40;

const MODERATION_CODES: &[&str] = &[
    "OperationDenied.TextIllegalDetected",
    "OperationDenied.ImageIllegalDetected",
];

pub struct HunyuanProvider {
    hunyuan_base: String,
    aiart_base: String,
    http: HttpClient,
    clock: Arc<dyn Clock>,
}

impl HunyuanProvider {
    pub fn new(hunyuan_base: &str, aiart_base: &str, http: HttpClient, clock: Arc<dyn Clock>) -> Self {
        Self {
            hunyuan_base: hunyuan_base.trim_end_matches('/').to_string(),
            aiart_base: aiart_base.trim_end_matches('/').to_string(),
            http,
            clock,
        }
    }

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: POLL_INTERVAL,
            max_attempts: MAX_POLLS,
            markers: StatusMarkers::new(SUCCESS_CODES, FAILURE_CODES),
        }
    }

    /// Older hosts pick the edition with `mode` instead of a model: `lite`
    /// (or no mode) is the sync edition, any other mode the async one.
    fn model_for(request: &NormalizedRequest) -> Result<String, GatewayError> {
        if request.model().is_none() {
            let lite = request
                .option_str("mode")
                .map_or(true, |mode| mode.trim().eq_ignore_ascii_case("lite"));
            return Ok(if lite { LITE_MODEL } else { PRO_MODEL }.to_string());
        }
        resolve_model(ProviderId::Hunyuan, request, MODELS, false)
    }

    /// Signs `body` for `scope` and posts it to `base`, returning the
    /// `Response` object of the reply.
    fn call(
        &self,
        base: &str,
        scope: Tc3Scope<'_>,
        body: &Value,
        credential: &Credential,
    ) -> Result<Value, GatewayError> {
        let key = require_key_pair(ProviderId::Hunyuan, credential)?;
        let host = host_of(ProviderId::Hunyuan, base)?;
        let bytes = serde_json::to_vec(body)
            .map_err(|err| GatewayError::Internal(format!("failed encoding payload: {err}")))?;
        let context = SigningContext::post(&host, bytes.clone(), self.clock.now());
        let signed = sign_tc3(key, &context, scope)
            .map_err(|err| GatewayError::Internal(format!("request signing failed: {err:#}")))?;

        let mut builder = self.http.post(format!("{base}/"));
        for (name, value) in signed.iter().filter(|(name, _)| name.as_str() != "Host") {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let reply = transport::send(VENDOR, builder.body(bytes))?;
        let payload = reply.into_payload(VENDOR, vendor_fault)?;
        payload
            .get("Response")
            .cloned()
            .ok_or_else(|| GatewayError::invalid_response("Hunyuan response is missing 'Response'"))
    }

    fn base_payload(
        request: &NormalizedRequest,
        prompt: &str,
        resolution: &str,
    ) -> Map<String, Value> {
        let mut payload = map_object(json!({
            "Prompt": prompt,
            "Resolution": resolution,
            "LogoAdd": i64::from(request.option_bool("logo_add").unwrap_or(false)),
        }));
        if let Some(negative) = request.negative_prompt() {
            payload.insert("NegativePrompt".to_string(), json!(negative));
        }
        if let Some(seed) = request.seed() {
            payload.insert("Seed".to_string(), json!(seed));
        }
        payload
    }
}

impl ImageProvider for HunyuanProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Hunyuan
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
        let model = Self::model_for(request)?;
        require_key_pair(self.id(), credential)?;
        let resolution = match request.size() {
            Some(raw) => {
                let (width, height) = parse_size(raw).ok_or_else(|| {
                    GatewayError::invalid_parameter(format!("unsupported resolution '{raw}'"))
                })?;
                format!("{width}:{height}")
            }
            None => DEFAULT_RESOLUTION.to_string(),
        };
        let mut payload = Self::base_payload(request, prompt, &resolution);
        debug!(target: "plume::provider", provider = VENDOR, model = %model, "generating");

        if model == LITE_MODEL {
            payload.insert("RspImgType".to_string(), json!("url"));
            let response = self.call(&self.aiart_base, LITE_SCOPE, &Value::Object(payload), credential)?;
            let url = str_at(&response, "/ResultImage").ok_or_else(|| no_images(self.id()))?;
            let mut output = VendorOutput {
                model,
                references: vec![ImageReference::url(url)],
                ..VendorOutput::default()
            };
            output.metadata.insert("resolution".to_string(), json!(resolution));
            if let Some(seed) = response.get("Seed").filter(|v| v.is_number()) {
                output.metadata.insert("seed".to_string(), seed.clone());
            }
            return Ok(Submission::Completed(output));
        }

        payload.insert(
            "Num".to_string(),
            json!(request.option_i64("num").unwrap_or(1).clamp(1, 4)),
        );
        payload.insert(
            "Revise".to_string(),
            json!(i64::from(request.option_bool("revise").unwrap_or(true))),
        );
        if let Some(style) = request.option_str("style") {
            payload.insert("Style".to_string(), json!(style));
        }
        let response = self.call(&self.hunyuan_base, SUBMIT_SCOPE, &Value::Object(payload), credential)?;
        let job_id = str_at(&response, "/JobId")
            .ok_or_else(|| GatewayError::invalid_response("Hunyuan response is missing 'JobId'"))?;
        debug!(target: "plume::provider", provider = VENDOR, job_id, "job submitted");
        Ok(Submission::Pending(
            JobHandle::new(job_id, model, Self::policy()).with_metadata("resolution", json!(resolution)),
        ))
    }

    fn query_job(
        &self,
        handle: &JobHandle,
        credential: &Credential,
    ) -> Result<JobSnapshot, GatewayError> {
        let response = self.call(
            &self.hunyuan_base,
            QUERY_SCOPE,
            &json!({ "JobId": handle.job_id }),
            credential,
        )?;
        let status = code_text(response.get("JobStatusCode")).ok_or_else(|| {
            GatewayError::invalid_response("Hunyuan response is missing 'JobStatusCode'")
        })?;
        Ok(JobSnapshot {
            status,
            message: str_at(&response, "/JobErrorMsg").map(str::to_string),
            payload: response,
        })
    }

    fn collect_job(&self, handle: &JobHandle, payload: &Value) -> Result<VendorOutput, GatewayError> {
        let references: Vec<_> = match payload.get("ResultImage") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(ImageReference::url)
                .collect(),
            Some(Value::String(url)) if !url.trim().is_empty() => {
                vec![ImageReference::url(url.trim())]
            }
            _ => Vec::new(),
        };
        if references.is_empty() {
            return Err(no_images(self.id()));
        }
        Ok(VendorOutput {
            model: handle.model.clone(),
            references,
            revised_prompt: str_at(payload, "/RevisedPrompt/0").map(str::to_string),
            metadata: handle.metadata.clone(),
        })
    }
}

/// Tencent Cloud answers 200 with `Response.Error{Code, Message}` on failure.
fn vendor_fault(body: &Value) -> Option<VendorFault> {
    let error = body.pointer("/Response/Error")?;
    let code = code_text(error.get("Code"));
    let message = error
        .get("Message")
        .and_then(Value::as_str)
        .unwrap_or("request rejected");
    let kind = match code.as_deref() {
        Some(code) if MODERATION_CODES.contains(&code) => FaultKind::Moderation,
        Some(code) if code.starts_with("AuthFailure") => FaultKind::Credential,
        _ => FaultKind::Other,
    };
    Some(VendorFault::new(kind, code, message))
}
