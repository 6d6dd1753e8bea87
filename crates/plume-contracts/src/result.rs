use serde::Serialize;
use serde_json::{Map, Value};

use crate::artifact::ImageArtifact;
use crate::error::{ErrorInfo, GatewayError};

/// Unified output of one generation call.
///
/// `error` is populated only when no artifact is usable; otherwise per-image
/// failures stay on their artifacts and the call counts as a success.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub images: Vec<ImageArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub summary: String,
}

impl GenerationResult {
    pub fn failed(error: &GatewayError, metadata: Map<String, Value>, summary: String) -> Self {
        Self {
            images: Vec::new(),
            revised_prompt: None,
            metadata,
            error: Some(ErrorInfo::from(error)),
            summary,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn usable_urls(&self) -> Vec<&str> {
        self.images
            .iter()
            .filter(|image| image.is_usable())
            .filter_map(|image| image.persisted_url.as_deref())
            .collect()
    }

    /// Status a host should respond with: 200 on success, the error kind's
    /// mapping otherwise.
    pub fn http_status(&self) -> u16 {
        self.error
            .as_ref()
            .map(|error| error.kind.http_status())
            .unwrap_or(200)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::GenerationResult;
    use crate::error::{ErrorKind, GatewayError};

    #[test]
    fn failed_result_has_empty_images_and_error() {
        let result = GenerationResult::failed(
            &GatewayError::Timeout("job 7 still running".to_string()),
            Map::new(),
            String::new(),
        );
        assert!(!result.is_success());
        assert!(result.images.is_empty());
        assert_eq!(result.http_status(), 504);
        let json = result.to_json();
        assert_eq!(json["error"]["kind"], json!("Timeout"));
        assert_eq!(json["images"], json!([]));
        assert!(json.get("revisedPrompt").is_none());
        assert_eq!(
            result.error.map(|error| error.kind),
            Some(ErrorKind::Timeout)
        );
    }
}
