use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Generation request handed over by the host framework.
///
/// Fields are private so a request cannot change after it is built; adapters
/// read it through accessors and validate it against their own model tables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRequest {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    reference_images: Vec<String>,
    #[serde(default)]
    seed: Option<i64>,
    #[serde(default)]
    negative_prompt: Option<String>,
    #[serde(default, alias = "vendorSpecificOptions")]
    vendor_options: Map<String, Value>,
}

impl NormalizedRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            size: None,
            reference_images: Vec::new(),
            seed: None,
            negative_prompt: None,
            vendor_options: Map::new(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_reference_images<I, S>(mut self, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reference_images = images.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.vendor_options.insert(key.into(), value);
        self
    }

    pub fn prompt(&self) -> &str {
        self.prompt.trim()
    }

    /// Requested model, `None` when absent or blank.
    pub fn model(&self) -> Option<&str> {
        non_blank(self.model.as_deref())
    }

    pub fn size(&self) -> Option<&str> {
        non_blank(self.size.as_deref())
    }

    pub fn reference_images(&self) -> &[String] {
        &self.reference_images
    }

    pub fn seed(&self) -> Option<i64> {
        self.seed
    }

    pub fn negative_prompt(&self) -> Option<&str> {
        non_blank(self.negative_prompt.as_deref())
    }

    pub fn vendor_options(&self) -> &Map<String, Value> {
        &self.vendor_options
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.vendor_options.get(key).filter(|value| !value.is_null())
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        non_blank(self.option(key).and_then(Value::as_str))
    }

    /// Integer option; numeric strings are accepted since hosts often forward
    /// form values verbatim.
    pub fn option_i64(&self, key: &str) -> Option<i64> {
        match self.option(key)? {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|value| value as i64)),
            Value::String(raw) => raw.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn option_f64(&self, key: &str) -> Option<f64> {
        match self.option(key)? {
            Value::Number(number) => number.as_f64(),
            Value::String(raw) => raw.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn option_bool(&self, key: &str) -> Option<bool> {
        match self.option(key)? {
            Value::Bool(flag) => Some(*flag),
            Value::Number(number) => number.as_i64().map(|value| value != 0),
            Value::String(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Per-call vendor secret supplied by the host. Never persisted or logged.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Credential {
    KeyPair {
        #[serde(alias = "accessKeyId", alias = "secretId")]
        access_key_id: String,
        #[serde(alias = "secretKey", alias = "secretAccessKey")]
        secret_key: SecretString,
    },
    ApiKey {
        #[serde(alias = "apiKey")]
        api_key: SecretString,
    },
}

impl Credential {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey {
            api_key: SecretString::from(key.into()),
        }
    }

    pub fn key_pair(access_key_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self::KeyPair {
            access_key_id: access_key_id.into(),
            secret_key: SecretString::from(secret_key.into()),
        }
    }

    /// Bearer token, if this credential carries a non-empty one.
    pub fn bearer(&self) -> Option<&str> {
        match self {
            Self::ApiKey { api_key } => non_blank(Some(api_key.expose_secret())),
            Self::KeyPair { .. } => None,
        }
    }

    /// `(access key id, secret key)` pair, if both halves are present.
    pub fn pair(&self) -> Option<(&str, &str)> {
        match self {
            Self::KeyPair {
                access_key_id,
                secret_key,
            } => {
                let id = non_blank(Some(access_key_id.as_str()))?;
                let secret = non_blank(Some(secret_key.expose_secret()))?;
                Some((id, secret))
            }
            Self::ApiKey { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Credential, NormalizedRequest};

    #[test]
    fn request_deserializes_camel_case_contract() -> anyhow::Result<()> {
        let request: NormalizedRequest = serde_json::from_value(json!({
            "prompt": "  a cat ",
            "model": "grok-2-image",
            "referenceImages": ["https://img.example/a.png"],
            "negativePrompt": "",
            "vendorSpecificOptions": {"n": "2", "watermark": false}
        }))?;
        assert_eq!(request.prompt(), "a cat");
        assert_eq!(request.model(), Some("grok-2-image"));
        assert_eq!(request.reference_images().len(), 1);
        assert_eq!(request.negative_prompt(), None);
        assert_eq!(request.option_i64("n"), Some(2));
        assert_eq!(request.option_bool("watermark"), Some(false));
        Ok(())
    }

    #[test]
    fn request_without_prompt_still_deserializes() -> anyhow::Result<()> {
        let request: NormalizedRequest =
            serde_json::from_value(json!({"model": "cogview-3", "size": "1024x1024"}))?;
        assert_eq!(request.prompt(), "");
        assert_eq!(request.model(), Some("cogview-3"));
        assert_eq!(request.size(), Some("1024x1024"));
        Ok(())
    }

    #[test]
    fn blank_model_reads_as_absent() {
        let request = NormalizedRequest::new("boat").with_model("   ");
        assert_eq!(request.model(), None);
    }

    #[test]
    fn credential_shapes_are_distinguished() -> anyhow::Result<()> {
        let bearer: Credential = serde_json::from_value(json!({"apiKey": "sk-1"}))?;
        assert_eq!(bearer.bearer(), Some("sk-1"));
        assert!(bearer.pair().is_none());

        let pair: Credential =
            serde_json::from_value(json!({"secretId": "AKID", "secretKey": "shh"}))?;
        assert_eq!(pair.pair(), Some(("AKID", "shh")));
        assert!(pair.bearer().is_none());
        Ok(())
    }

    #[test]
    fn credential_debug_output_redacts_secrets() {
        let rendered = format!("{:?}", Credential::key_pair("AKID", "super-secret"));
        assert!(rendered.contains("AKID"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn empty_api_key_is_not_a_bearer() {
        assert_eq!(Credential::api_key("  ").bearer(), None);
    }
}
