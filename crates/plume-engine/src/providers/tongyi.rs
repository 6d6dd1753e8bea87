use std::time::Duration;

use plume_contracts::{Credential, GatewayError, NormalizedRequest, ProviderId};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    map_object, no_images, parse_size, references_from, require_bearer, require_prompt,
    resolve_model, ImageProvider, Submission, VendorOutput,
};
use crate::poller::{JobHandle, JobSnapshot, PollPolicy, StatusMarkers};
use crate::transport::{
    self, code_text, require_array, require_str, str_at, FaultKind, VendorFault,
};

const VENDOR: &str = "Tongyi";
const MODELS: &[&str] = &["wanx2.1-t2i-turbo", "wanx2.1-t2i-plus", "wanx2.0-t2i-turbo"];
const DEFAULT_SIZE: &str = "1024*1024";
const MODERATION_CODE: &str = "DataInspectionFailed";
const POLL_INTERVAL: Duration = Duration::from_millis(1000);
const MAX_POLLS: u32 = 60;

pub struct TongyiProvider {
    api_base: String,
    http: HttpClient,
}

impl TongyiProvider {
    pub fn new(api_base: &str, http: HttpClient) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            http,
        }
    }

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: POLL_INTERVAL,
            max_attempts: MAX_POLLS,
            markers: StatusMarkers::new(&["SUCCEEDED"], &["FAILED", "CANCELED", "UNKNOWN"]),
        }
    }
}

impl ImageProvider for TongyiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Tongyi
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

        let size = match request.size() {
            Some(raw) => {
                let (width, height) = parse_size(raw).ok_or_else(|| {
                    GatewayError::invalid_parameter(format!("unsupported size '{raw}'"))
                })?;
                format!("{width}*{height}")
            }
            None => DEFAULT_SIZE.to_string(),
        };
        let mut input = map_object(json!({ "prompt": prompt }));
        if let Some(negative) = request.negative_prompt() {
            input.insert("negative_prompt".to_string(), json!(negative));
        }
        let mut parameters = map_object(json!({
            "size": size,
            "n": request.option_i64("n").unwrap_or(1).clamp(1, 4),
            "prompt_extend": request.option_bool("prompt_extend").unwrap_or(true),
        }));
        if let Some(seed) = request.seed() {
            parameters.insert("seed".to_string(), json!(seed));
        }
        let payload = json!({
            "model": model,
            "input": input,
            "parameters": parameters,
        });

        let reply = transport::send(
            VENDOR,
            self.http
                .post(format!(
                    "{}/services/aigc/text2image/image-synthesis",
                    self.api_base
                ))
                .bearer_auth(api_key)
                .header("X-DashScope-Async", "enable")
                .json(&payload),
        )?;
        let body = reply.into_payload(VENDOR, vendor_fault)?;
        let task_id = require_str(VENDOR, &body, "/output/task_id")?;
        debug!(target: "plume::provider", provider = VENDOR, model = %model, task_id, "task submitted");

        let mut handle = JobHandle::new(task_id, model, Self::policy()).with_metadata("size", json!(size));
        if let Some(negative) = request.negative_prompt() {
            handle = handle.with_metadata("negativePrompt", json!(negative));
        }
        Ok(Submission::Pending(handle))
    }

    fn query_job(
        &self,
        handle: &JobHandle,
        credential: &Credential,
    ) -> Result<JobSnapshot, GatewayError> {
        let api_key = require_bearer(self.id(), credential)?;
        let reply = transport::send(
            VENDOR,
            self.http
                .get(format!("{}/tasks/{}", self.api_base, handle.job_id))
                .bearer_auth(api_key),
        )?;
        let body = reply.into_payload(VENDOR, vendor_fault)?;
        let status = require_str(VENDOR, &body, "/output/task_status")?.to_string();
        let code = code_text(body.pointer("/output/code"));
        let message = str_at(&body, "/output/message").map(str::to_string);
        if code.as_deref() == Some(MODERATION_CODE) {
            return Err(GatewayError::ContentModeration {
                message: message.unwrap_or_else(|| "output failed content inspection".to_string()),
                code,
            });
        }
        Ok(JobSnapshot {
            status,
            message: message.map(|text| match code.as_deref() {
                Some(code) => format!("{code}: {text}"),
                None => text,
            }),
            payload: body,
        })
    }

    fn collect_job(&self, handle: &JobHandle, payload: &Value) -> Result<VendorOutput, GatewayError> {
        let results = require_array(VENDOR, payload, "/output/results")?;
        let references = references_from(results, "url", "b64_image");
        if references.is_empty() {
            return Err(no_images(self.id()));
        }
        let mut metadata = handle.metadata.clone();
        if let Some(count) = payload.pointer("/usage/image_count").filter(|v| v.is_number()) {
            metadata.insert("imageCount".to_string(), count.clone());
        }
        Ok(VendorOutput {
            model: handle.model.clone(),
            references,
            revised_prompt: str_at(payload, "/output/results/0/actual_prompt").map(str::to_string),
            metadata,
        })
    }
}

/// DashScope puts `code`/`message` at the top level of error bodies.
fn vendor_fault(body: &Value) -> Option<VendorFault> {
    let code = code_text(body.get("code"))?;
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("request rejected");
    let kind = match code.as_str() {
        MODERATION_CODE => FaultKind::Moderation,
        "InvalidApiKey" => FaultKind::Credential,
        _ => FaultKind::Other,
    };
    Some(VendorFault::new(kind, Some(code), message))
}
