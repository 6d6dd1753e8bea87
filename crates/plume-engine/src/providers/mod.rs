//! Vendor adapters behind one capability interface.
//!
//! An adapter validates the request, builds the vendor payload, signs it if
//! the vendor requires, and either returns image references directly or a
//! [`JobHandle`] the gateway drives through the poller.

mod doubao;
mod hunyuan;
mod siliconflow;
mod tongyi;
mod xai;
mod zhipu;

use std::sync::Arc;

use plume_contracts::{
    Credential, GatewayError, ImageReference, NamedProvider, NormalizedRequest, ProviderId,
    ProviderRegistry,
};
use reqwest::blocking::Client as HttpClient;
use serde_json::{Map, Value};

use crate::clock::Clock;
use crate::config::VendorEndpoints;
use crate::poller::{JobHandle, JobSnapshot};
use crate::signing::KeyPair;

pub use doubao::DoubaoProvider;
pub use hunyuan::HunyuanProvider;
pub use siliconflow::SiliconFlowProvider;
pub use tongyi::TongyiProvider;
pub use xai::XaiProvider;
pub use zhipu::ZhipuProvider;

/// Image references plus whatever the vendor said about them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VendorOutput {
    pub model: String,
    pub references: Vec<ImageReference>,
    pub revised_prompt: Option<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Completed(VendorOutput),
    Pending(JobHandle),
}

pub trait ImageProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Supported models; the first entry is the default when the vendor has one.
    fn models(&self) -> &'static [&'static str];

    fn generate(
        &self,
        request: &NormalizedRequest,
        credential: &Credential,
    ) -> Result<Submission, GatewayError>;

    fn query_job(
        &self,
        handle: &JobHandle,
        _credential: &Credential,
    ) -> Result<JobSnapshot, GatewayError> {
        Err(GatewayError::Internal(format!(
            "{} does not run asynchronous jobs (job {})",
            self.id(),
            handle.job_id
        )))
    }

    fn collect_job(&self, handle: &JobHandle, _payload: &Value) -> Result<VendorOutput, GatewayError> {
        Err(GatewayError::Internal(format!(
            "{} does not run asynchronous jobs (job {})",
            self.id(),
            handle.job_id
        )))
    }
}

impl NamedProvider for Box<dyn ImageProvider> {
    fn name(&self) -> &str {
        self.id().as_str()
    }
}

pub type ImageProviderRegistry = ProviderRegistry<Box<dyn ImageProvider>>;

/// Shared plumbing handed to every adapter.
#[derive(Clone)]
pub struct ProviderDeps {
    pub endpoints: VendorEndpoints,
    pub http: HttpClient,
    pub clock: Arc<dyn Clock>,
}

/// One adapter per entry of the static provider table.
pub fn default_registry(deps: &ProviderDeps) -> ImageProviderRegistry {
    let providers = ProviderId::ALL
        .iter()
        .map(|id| build_provider(*id, deps))
        .collect();
    ImageProviderRegistry::new(providers)
}

pub fn build_provider(id: ProviderId, deps: &ProviderDeps) -> Box<dyn ImageProvider> {
    let http = deps.http.clone();
    let endpoints = &deps.endpoints;
    match id {
        ProviderId::Xai => Box::new(XaiProvider::new(&endpoints.xai, http)),
        ProviderId::SiliconFlow => Box::new(SiliconFlowProvider::new(&endpoints.siliconflow, http)),
        ProviderId::Tongyi => Box::new(TongyiProvider::new(&endpoints.dashscope, http)),
        ProviderId::Hunyuan => Box::new(HunyuanProvider::new(
            &endpoints.hunyuan,
            &endpoints.aiart,
            http,
            deps.clock.clone(),
        )),
        ProviderId::Zhipu => Box::new(ZhipuProvider::new(&endpoints.zhipu, http)),
        ProviderId::Doubao => Box::new(DoubaoProvider::new(
            &endpoints.ark,
            &endpoints.volc_visual,
            http,
            deps.clock.clone(),
        )),
    }
}

pub(crate) fn require_prompt(request: &NormalizedRequest) -> Result<&str, GatewayError> {
    let prompt = request.prompt().trim();
    if prompt.is_empty() {
        return Err(GatewayError::invalid_parameter("prompt is required"));
    }
    Ok(prompt)
}

/// Picks the requested model if allowed, else the first allowed model.
/// With `required`, a missing model is rejected instead.
pub(crate) fn resolve_model(
    provider: ProviderId,
    request: &NormalizedRequest,
    allowed: &[&str],
    required: bool,
) -> Result<String, GatewayError> {
    match request.model() {
        Some(model) if allowed.contains(&model) => Ok(model.to_string()),
        Some(model) => Err(GatewayError::invalid_parameter(format!(
            "model '{model}' is not supported by {provider}; expected one of: {}",
            allowed.join(", ")
        ))),
        None if required => Err(GatewayError::invalid_parameter(format!(
            "model is required for {provider}"
        ))),
        None => allowed
            .first()
            .map(|model| (*model).to_string())
            .ok_or_else(|| GatewayError::Internal(format!("{provider} has no models"))),
    }
}

pub(crate) fn require_bearer(
    provider: ProviderId,
    credential: &Credential,
) -> Result<&str, GatewayError> {
    credential.bearer().ok_or_else(|| {
        GatewayError::credential(format!("{} API key is required", provider.display_name()))
    })
}

pub(crate) fn require_key_pair(
    provider: ProviderId,
    credential: &Credential,
) -> Result<KeyPair<'_>, GatewayError> {
    credential
        .pair()
        .map(|(access_key_id, secret_key)| KeyPair {
            access_key_id,
            secret_key,
        })
        .ok_or_else(|| {
            GatewayError::credential(format!(
                "{} requires an access key id and secret key",
                provider.display_name()
            ))
        })
}

/// Accepts `1024x1024`, `1024*1024` and `1024:1024`.
pub(crate) fn parse_size(raw: &str) -> Option<(u32, u32)> {
    let normalized = raw.trim().to_ascii_lowercase().replace(['*', ':', '×'], "x");
    let (width, height) = normalized.split_once('x')?;
    let width = width.trim().parse::<u32>().ok().filter(|value| *value > 0)?;
    let height = height.trim().parse::<u32>().ok().filter(|value| *value > 0)?;
    Some((width, height))
}

/// `Host` header value (with port when explicit) for a signed vendor base URL.
pub(crate) fn host_of(provider: ProviderId, base: &str) -> Result<String, GatewayError> {
    let url = reqwest::Url::parse(base).map_err(|err| {
        GatewayError::Internal(format!("{provider} base url is invalid: {err}"))
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| GatewayError::Internal(format!("{provider} base url has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

pub(crate) fn map_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub(crate) fn references_from(items: &[Value], url_key: &str, b64_key: &str) -> Vec<ImageReference> {
    items
        .iter()
        .filter_map(|item| {
            let text = |key: &str| {
                item.get(key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
            };
            text(url_key)
                .map(ImageReference::url)
                .or_else(|| text(b64_key).map(ImageReference::encoded))
        })
        .collect()
}

pub(crate) fn no_images(provider: ProviderId) -> GatewayError {
    GatewayError::invalid_response(format!("{} returned no images", provider.display_name()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use plume_contracts::{ErrorKind, ImageReference, NormalizedRequest, ProviderId};
    use reqwest::blocking::Client as HttpClient;
    use serde_json::json;

    use super::{
        default_registry, host_of, parse_size, references_from, resolve_model, ProviderDeps,
    };
    use crate::clock::ManualClock;
    use crate::config::VendorEndpoints;

    #[test]
    fn default_registry_covers_every_provider() {
        let deps = ProviderDeps {
            endpoints: VendorEndpoints::default(),
            http: HttpClient::new(),
            clock: Arc::new(ManualClock::at_unix(0)),
        };
        let registry = default_registry(&deps);
        assert_eq!(
            registry.list(),
            vec![
                "doubao-image".to_string(),
                "siliconflow-image".to_string(),
                "tencent-hunyuan-image".to_string(),
                "tongyi-image".to_string(),
                "xai-image".to_string(),
                "zhipuai-image".to_string(),
            ]
        );
        for id in ProviderId::ALL {
            let provider = registry.get(id.as_str());
            assert_eq!(provider.map(|p| p.id()), Some(id));
        }
    }

    #[test]
    fn model_resolution_defaults_and_rejects() {
        let allowed = ["m-1", "m-2"];
        let request = NormalizedRequest::new("a cat");
        assert_eq!(
            resolve_model(ProviderId::Xai, &request, &allowed, false).ok(),
            Some("m-1".to_string())
        );
        assert_eq!(
            resolve_model(ProviderId::Zhipu, &request, &allowed, true)
                .err()
                .map(|err| err.kind()),
            Some(ErrorKind::InvalidParameter)
        );
        let unknown = NormalizedRequest::new("a cat").with_model("m-9");
        assert_eq!(
            resolve_model(ProviderId::Xai, &unknown, &allowed, false)
                .err()
                .map(|err| err.kind()),
            Some(ErrorKind::InvalidParameter)
        );
    }

    #[test]
    fn sizes_parse_in_every_separator_style() {
        assert_eq!(parse_size("1024x768"), Some((1024, 768)));
        assert_eq!(parse_size("1024*768"), Some((1024, 768)));
        assert_eq!(parse_size("16:9"), Some((16, 9)));
        assert_eq!(parse_size("adaptive"), None);
        assert_eq!(parse_size("0x10"), None);
    }

    #[test]
    fn host_keeps_explicit_port() -> anyhow::Result<()> {
        assert_eq!(host_of(ProviderId::Hunyuan, "http://127.0.0.1:4010")?, "127.0.0.1:4010");
        assert_eq!(
            host_of(ProviderId::Hunyuan, "https://hunyuan.tencentcloudapi.com")?,
            "hunyuan.tencentcloudapi.com"
        );
        Ok(())
    }

    #[test]
    fn references_prefer_url_then_encoded() {
        let items = [
            json!({"url": "https://a.example/1.png"}),
            json!({"b64_json": "aGVsbG8="}),
            json!({"url": "  "}),
        ];
        assert_eq!(
            references_from(&items, "url", "b64_json"),
            vec![
                ImageReference::url("https://a.example/1.png"),
                ImageReference::encoded("aGVsbG8="),
            ]
        );
    }
}
