use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_VENDOR_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PERSIST_CONCURRENCY: usize = 3;
const MAX_PERSIST_CONCURRENCY: usize = 8;

/// Base URLs for every vendor endpoint the adapters talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorEndpoints {
    pub xai: String,
    pub siliconflow: String,
    pub dashscope: String,
    pub hunyuan: String,
    pub aiart: String,
    pub zhipu: String,
    pub ark: String,
    pub volc_visual: String,
}

impl Default for VendorEndpoints {
    fn default() -> Self {
        Self {
            xai: "https://api.x.ai/v1".to_string(),
            siliconflow: "https://api.siliconflow.cn/v1".to_string(),
            dashscope: "https://dashscope.aliyuncs.com/api/v1".to_string(),
            hunyuan: "https://hunyuan.tencentcloudapi.com".to_string(),
            aiart: "https://aiart.tencentcloudapi.com".to_string(),
            zhipu: "https://open.bigmodel.cn/api/paas/v4".to_string(),
            ark: "https://ark.cn-beijing.volces.com/api/v3".to_string(),
            volc_visual: "https://visual.volcengineapi.com".to_string(),
        }
    }
}

impl VendorEndpoints {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            xai: api_base("XAI_API_BASE", defaults.xai),
            siliconflow: api_base("SILICONFLOW_API_BASE", defaults.siliconflow),
            dashscope: api_base("DASHSCOPE_API_BASE", defaults.dashscope),
            hunyuan: api_base("HUNYUAN_API_BASE", defaults.hunyuan),
            aiart: api_base("AIART_API_BASE", defaults.aiart),
            zhipu: api_base("ZHIPUAI_API_BASE", defaults.zhipu),
            ark: api_base("ARK_API_BASE", defaults.ark),
            volc_visual: api_base("VOLC_VISUAL_API_BASE", defaults.volc_visual),
        }
    }

    /// Points every vendor at one base URL; used against local fakes.
    pub fn all(base: &str) -> Self {
        let base = base.trim().trim_end_matches('/').to_string();
        Self {
            xai: base.clone(),
            siliconflow: base.clone(),
            dashscope: base.clone(),
            hunyuan: base.clone(),
            aiart: base.clone(),
            zhipu: base.clone(),
            ark: base.clone(),
            volc_visual: base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub endpoints: VendorEndpoints,
    pub vendor_timeout: Duration,
    pub download_timeout: Duration,
    pub persist_concurrency: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoints: VendorEndpoints::default(),
            vendor_timeout: DEFAULT_VENDOR_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            persist_concurrency: DEFAULT_PERSIST_CONCURRENCY,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            endpoints: VendorEndpoints::from_env(),
            vendor_timeout: env_secs("PLUME_VENDOR_TIMEOUT_SECS").unwrap_or(DEFAULT_VENDOR_TIMEOUT),
            download_timeout: env_secs("PLUME_DOWNLOAD_TIMEOUT_SECS")
                .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT),
            persist_concurrency: non_empty_env("PLUME_PERSIST_CONCURRENCY")
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(DEFAULT_PERSIST_CONCURRENCY),
        }
        .normalized()
    }

    pub fn normalized(mut self) -> Self {
        self.persist_concurrency = self.persist_concurrency.clamp(1, MAX_PERSIST_CONCURRENCY);
        self
    }
}

/// Which object store, if any, receives persisted images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    NotConfigured,
    Blob {
        endpoint: String,
        token: String,
    },
    LocalDir {
        root: PathBuf,
        public_base: String,
    },
}

pub const DEFAULT_BLOB_ENDPOINT: &str = "https://blob.vercel-storage.com";

impl StorageConfig {
    pub fn from_env() -> Self {
        if let Some(token) = non_empty_env("BLOB_READ_WRITE_TOKEN") {
            return Self::Blob {
                endpoint: api_base("PLUME_BLOB_ENDPOINT", DEFAULT_BLOB_ENDPOINT.to_string()),
                token,
            };
        }
        if let Some(root) = non_empty_env("PLUME_STORE_DIR") {
            let root = PathBuf::from(root);
            let public_base = non_empty_env("PLUME_STORE_PUBLIC_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("file://{}", root.display()));
            return Self::LocalDir { root, public_base };
        }
        Self::NotConfigured
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self, Self::NotConfigured)
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn api_base(key: &str, default: String) -> String {
    non_empty_env(key)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
}

fn env_secs(key: &str) -> Option<Duration> {
    non_empty_env(key)
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(Duration::from_secs_f64)
}
