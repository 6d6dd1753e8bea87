//! Builds the unified [`GenerationResult`] from whatever the adapter, the
//! poller and the persistence pipeline produced.

use std::time::Duration;

use plume_contracts::summary::{render_error, render_images, SummaryOptions};
use plume_contracts::{ErrorInfo, GatewayError, GenerationResult, ImageArtifact, ProviderId};
use serde_json::{json, Map, Value};

use crate::persistence::STORAGE_NOT_CONFIGURED;
use crate::providers::VendorOutput;

const CORE_KEYS: [&str; 4] = ["provider", "model", "prompt", "elapsedMs"];

/// Request-level facts every result reports.
#[derive(Debug, Clone, Copy)]
pub struct ResultContext<'a> {
    pub provider: &'a str,
    pub prompt: &'a str,
    pub model: Option<&'a str>,
    pub elapsed: Duration,
}

impl<'a> ResultContext<'a> {
    pub fn new(provider: &'a str, prompt: &'a str, model: Option<&'a str>, elapsed: Duration) -> Self {
        Self {
            provider,
            prompt,
            model,
            elapsed,
        }
    }

    fn metadata(&self) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("provider".to_string(), json!(self.provider));
        if let Some(model) = self.model {
            metadata.insert("model".to_string(), json!(model));
        }
        metadata.insert("prompt".to_string(), json!(self.prompt));
        metadata.insert(
            "elapsedMs".to_string(),
            json!(u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)),
        );
        metadata
    }
}

/// A result is a success as soon as one artifact is usable. With none usable
/// the artifacts stay attached for diagnosis and `error` explains why.
pub fn assemble(
    context: ResultContext<'_>,
    output: VendorOutput,
    artifacts: Vec<ImageArtifact>,
) -> GenerationResult {
    let context = ResultContext {
        model: Some(output.model.as_str()),
        ..context
    };
    let mut metadata = context.metadata();
    for (key, value) in &output.metadata {
        if !CORE_KEYS.contains(&key.as_str()) {
            metadata.insert(key.clone(), value.clone());
        }
    }

    let usable = artifacts.iter().filter(|artifact| artifact.is_usable()).count();
    if usable == 0 {
        let error = unusable_batch_error(&artifacts);
        let info = ErrorInfo::from(&error);
        return GenerationResult {
            images: artifacts,
            revised_prompt: output.revised_prompt,
            metadata,
            summary: render_error(&info),
            error: Some(info),
        };
    }

    let failed = artifacts.len() - usable;
    let mut extra = output
        .metadata
        .iter()
        .filter(|(key, _)| !CORE_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), display_value(value)))
        .collect::<Vec<(String, String)>>();
    if failed > 0 {
        extra.push(("failedImages".to_string(), failed.to_string()));
    }
    let urls = artifacts
        .iter()
        .filter(|artifact| artifact.is_usable())
        .filter_map(|artifact| artifact.persisted_url.as_deref())
        .collect::<Vec<&str>>();
    let summary = render_images(
        &urls,
        &SummaryOptions {
            prompt: context.prompt,
            revised_prompt: output.revised_prompt.as_deref(),
            model: context.model,
            extra,
        },
    );

    GenerationResult {
        images: artifacts,
        revised_prompt: output.revised_prompt,
        metadata,
        error: None,
        summary,
    }
}

pub fn assemble_error(context: ResultContext<'_>, error: &GatewayError) -> GenerationResult {
    let info = ErrorInfo::from(error);
    GenerationResult::failed(error, context.metadata(), render_error(&info))
}

/// Without storage, encoded images fail for a gateway-side reason, which is
/// reported as an internal error instead of a vendor one.
fn unusable_batch_error(artifacts: &[ImageArtifact]) -> GatewayError {
    let storage_missing = !artifacts.is_empty()
        && artifacts
            .iter()
            .all(|artifact| artifact.error.as_deref() == Some(STORAGE_NOT_CONFIGURED));
    if storage_missing {
        return GatewayError::Internal(format!(
            "none of the {} vendor images could be delivered: {STORAGE_NOT_CONFIGURED}",
            artifacts.len()
        ));
    }
    let first = artifacts
        .iter()
        .find_map(|artifact| artifact.error.as_deref())
        .unwrap_or("vendor returned no images");
    GatewayError::unavailable(format!(
        "none of the {} vendor images could be delivered: {first}",
        artifacts.len()
    ))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Display name for result metadata when the provider id is known.
pub fn provider_label(id: Option<ProviderId>, raw: &str) -> String {
    id.map(|id| id.as_str().to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use plume_contracts::{ErrorKind, GatewayError, ImageArtifact, ImageReference};
    use serde_json::json;

    use super::{assemble, assemble_error, ResultContext};
    use crate::persistence::STORAGE_NOT_CONFIGURED;
    use crate::providers::VendorOutput;

    fn context() -> ResultContext<'static> {
        ResultContext::new("xai-image", "a cat", None, Duration::from_millis(1234))
    }

    fn output(count: usize) -> VendorOutput {
        let mut output = VendorOutput {
            model: "grok-2-image".to_string(),
            references: (0..count)
                .map(|idx| ImageReference::url(format!("https://x.example/{idx}.png")))
                .collect(),
            revised_prompt: Some("a fluffy cat".to_string()),
            ..VendorOutput::default()
        };
        output.metadata.insert("seed".to_string(), json!(7));
        output.metadata.insert("provider".to_string(), json!("spoofed"));
        output
    }

    fn persisted(url: &str) -> ImageArtifact {
        let mut artifact = ImageArtifact::pending(ImageReference::url(url));
        artifact.mark_persisted(url.to_string(), "image/png".to_string());
        artifact
    }

    fn failed(message: &str) -> ImageArtifact {
        let mut artifact = ImageArtifact::pending(ImageReference::url("https://x.example/gone.png"));
        artifact.mark_failed(message.to_string());
        artifact
    }

    #[test]
    fn partial_failure_is_still_success() {
        let result = assemble(
            context(),
            output(2),
            vec![persisted("https://blob.example/a.png"), failed("image download failed (404)")],
        );
        assert!(result.is_success());
        assert_eq!(result.http_status(), 200);
        assert_eq!(result.images.len(), 2);
        assert_eq!(result.usable_urls(), vec!["https://blob.example/a.png"]);
        assert_eq!(result.metadata["provider"], json!("xai-image"));
        assert_eq!(result.metadata["model"], json!("grok-2-image"));
        assert_eq!(result.metadata["elapsedMs"], json!(1234));
        assert_eq!(result.metadata["seed"], json!(7));
        assert!(result.summary.contains("![Generated Image](https://blob.example/a.png)"));
        assert!(result.summary.contains("**Revised prompt**: a fluffy cat"));
        assert!(result.summary.contains("*failedImages: 1*"));
    }

    #[test]
    fn no_usable_artifact_sets_error() {
        let result = assemble(context(), output(1), vec![failed("image download failed (404)")]);
        let error = result.error.clone().map(|error| (error.kind, error.message));
        assert_eq!(
            error,
            Some((
                ErrorKind::VendorUnavailable,
                "none of the 1 vendor images could be delivered: image download failed (404)"
                    .to_string()
            ))
        );
        assert_eq!(result.http_status(), 502);
    }

    #[test]
    fn missing_storage_is_an_internal_error() {
        let mut artifact = ImageArtifact::pending(ImageReference::encoded("iVBORw0KGgo="));
        artifact.mark_failed(STORAGE_NOT_CONFIGURED.to_string());
        let result = assemble(context(), output(1), vec![artifact]);
        assert_eq!(
            result.error.as_ref().map(|error| error.kind),
            Some(ErrorKind::InternalError)
        );
        assert_eq!(result.http_status(), 500);
        assert_eq!(result.images.len(), 1);
    }

    #[test]
    fn mixed_failures_with_missing_storage_stay_vendor_unavailable() {
        let mut encoded = ImageArtifact::pending(ImageReference::encoded("iVBORw0KGgo="));
        encoded.mark_failed(STORAGE_NOT_CONFIGURED.to_string());
        let result = assemble(
            context(),
            output(2),
            vec![encoded, failed("image download failed (404)")],
        );
        assert_eq!(
            result.error.as_ref().map(|error| error.kind),
            Some(ErrorKind::VendorUnavailable)
        );
    }

    #[test]
    fn error_result_has_no_images_and_keeps_vendor_code() {
        let error = GatewayError::ContentModeration {
            message: "prompt rejected".to_string(),
            code: Some("50412".to_string()),
        };
        let result = assemble_error(context(), &error);
        assert!(result.images.is_empty());
        assert_eq!(result.http_status(), 400);
        assert_eq!(
            result.error.as_ref().and_then(|error| error.code.as_deref()),
            Some("50412")
        );
        assert!(result.metadata.get("model").is_none());
        assert!(result.summary.contains("prompt rejected (code: 50412)"));
    }
}
