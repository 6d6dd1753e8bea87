use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Vendors known at compile time. Lookup from the host's string identifier
/// goes through [`ProviderId::parse`] over a static table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderId {
    Xai,
    SiliconFlow,
    Tongyi,
    Hunyuan,
    Zhipu,
    Doubao,
}

const PROVIDER_TABLE: &[(ProviderId, &str, &str)] = &[
    (ProviderId::Xai, "xai-image", "xAI Image Generator"),
    (
        ProviderId::SiliconFlow,
        "siliconflow-image",
        "SiliconFlow Image Generator",
    ),
    (ProviderId::Tongyi, "tongyi-image", "Tongyi Wanxiang Image Generator"),
    (
        ProviderId::Hunyuan,
        "tencent-hunyuan-image",
        "Tencent Hunyuan Image Generator",
    ),
    (ProviderId::Zhipu, "zhipuai-image", "ZhipuAI CogView Image Generator"),
    (ProviderId::Doubao, "doubao-image", "Doubao Image Generator"),
];

impl ProviderId {
    pub const ALL: [ProviderId; 6] = [
        ProviderId::Xai,
        ProviderId::SiliconFlow,
        ProviderId::Tongyi,
        ProviderId::Hunyuan,
        ProviderId::Zhipu,
        ProviderId::Doubao,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim();
        PROVIDER_TABLE
            .iter()
            .find(|(_, id, _)| id.eq_ignore_ascii_case(wanted))
            .map(|(provider, _, _)| *provider)
    }

    pub fn as_str(self) -> &'static str {
        self.row().1
    }

    pub fn display_name(self) -> &'static str {
        self.row().2
    }

    fn row(self) -> &'static (ProviderId, &'static str, &'static str) {
        PROVIDER_TABLE
            .iter()
            .find(|(provider, _, _)| *provider == self)
            .unwrap_or(&PROVIDER_TABLE[0])
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait NamedProvider {
    fn name(&self) -> &str;
}

/// Name-keyed collection that keeps registration order.
#[derive(Debug, Clone)]
pub struct ProviderRegistry<T: NamedProvider> {
    providers: IndexMap<String, T>,
}

impl<T: NamedProvider> Default for ProviderRegistry<T> {
    fn default() -> Self {
        Self {
            providers: IndexMap::new(),
        }
    }
}

impl<T: NamedProvider> ProviderRegistry<T> {
    pub fn new(providers: Vec<T>) -> Self {
        let mut registry = Self::default();
        for provider in providers {
            registry.register(provider);
        }
        registry
    }

    pub fn register(&mut self, provider: T) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.providers.get(name)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names = self.providers.keys().cloned().collect::<Vec<String>>();
        names.sort();
        names
    }

    pub fn providers(&self) -> impl Iterator<Item = &T> {
        self.providers.values()
    }
}
