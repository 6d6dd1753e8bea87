use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    RemoteUrl,
    EncodedBytes,
}

/// Raw image reference as returned by a vendor, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub kind: SourceKind,
    pub value: String,
}

impl ImageReference {
    pub fn url(value: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::RemoteUrl,
            value: value.into(),
        }
    }

    pub fn encoded(value: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::EncodedBytes,
            value: value.into(),
        }
    }
}

/// One vendor image and the outcome of persisting it.
///
/// Written at most once by the persistence pipeline: either `persisted_url`
/// or `error` is set, except for a remote URL that fell back to its original
/// location, which carries the URL and `fallback = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageArtifact {
    #[serde(rename = "source")]
    pub source_kind: SourceKind,
    #[serde(skip_serializing)]
    pub raw_value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(rename = "url", skip_serializing_if = "Option::is_none")]
    pub persisted_url: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageArtifact {
    pub fn pending(reference: ImageReference) -> Self {
        Self {
            source_kind: reference.kind,
            raw_value: reference.value,
            content_type: None,
            persisted_url: None,
            fallback: false,
            error: None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.persisted_url.is_some() && self.error.is_none()
    }

    pub fn mark_persisted(&mut self, url: String, content_type: String) {
        self.persisted_url = Some(url);
        self.content_type = Some(content_type);
    }

    pub fn mark_fallback(&mut self) {
        self.persisted_url = Some(self.raw_value.clone());
        self.fallback = true;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.persisted_url = None;
        self.error = Some(error);
    }
}
