use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use plume_contracts::{
    Credential, GatewayError, GenerationResult, ImageArtifact, NormalizedRequest, ProviderId,
};
use tracing::{info, warn};

use crate::assembler::{assemble, assemble_error, provider_label, ResultContext};
use crate::clock::{Clock, SystemClock};
use crate::config::{GatewayConfig, StorageConfig};
use crate::persistence::{store_from_config, ArtifactPipeline, ObjectStore};
use crate::poller::{JobPoller, PollOutcome};
use crate::providers::{
    default_registry, ImageProvider, ImageProviderRegistry, ProviderDeps, Submission, VendorOutput,
};
use crate::transport::build_http_client;

const INTERNAL_ERROR_MESSAGE: &str = "internal error while generating image";

/// Entry point for hosts: resolves the provider, runs it to completion and
/// always answers with a [`GenerationResult`].
pub struct Gateway {
    registry: ImageProviderRegistry,
    pipeline: ArtifactPipeline,
    clock: Arc<dyn Clock>,
}

impl Gateway {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(GatewayConfig::from_env(), &StorageConfig::from_env())
    }

    pub fn new(config: GatewayConfig, storage: &StorageConfig) -> anyhow::Result<Self> {
        let config = config.normalized();
        let store = store_from_config(storage, config.vendor_timeout)?;
        Ok(Self::with_parts(config, store, Arc::new(SystemClock))?)
    }

    /// Builds a gateway around an explicit store and clock.
    pub fn with_parts(
        config: GatewayConfig,
        store: Option<Arc<dyn ObjectStore>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GatewayError> {
        let config = config.normalized();
        let http = build_http_client(config.vendor_timeout)?;
        let deps = ProviderDeps {
            endpoints: config.endpoints.clone(),
            http: http.clone(),
            clock: clock.clone(),
        };
        Ok(Self {
            registry: default_registry(&deps),
            pipeline: ArtifactPipeline::new(
                store,
                http,
                config.download_timeout,
                config.persist_concurrency,
            ),
            clock,
        })
    }

    /// Replaces the adapter registered under the same provider id.
    pub fn register(&mut self, provider: Box<dyn ImageProvider>) {
        self.registry.register(provider);
    }

    pub fn provider(&self, id: ProviderId) -> Option<&dyn ImageProvider> {
        self.registry.get(id.as_str()).map(|provider| provider.as_ref())
    }

    pub fn providers(&self) -> impl Iterator<Item = &dyn ImageProvider> {
        self.registry.providers().map(|provider| provider.as_ref())
    }

    pub fn generate(
        &self,
        provider_id: &str,
        request: &NormalizedRequest,
        credential: &Credential,
    ) -> GenerationResult {
        let started = Instant::now();
        let id = ProviderId::parse(provider_id);
        let label = provider_label(id, provider_id);
        let prompt = request.prompt();
        let fail = |error: &GatewayError| {
            warn!(
                target: "plume::gateway",
                provider = %label,
                kind = %error.kind(),
                code = error.vendor_code().unwrap_or_default(),
                message = error.message(),
                "image generation failed"
            );
            assemble_error(
                ResultContext::new(&label, prompt, request.model(), started.elapsed()),
                error,
            )
        };

        let Some(provider) = id.and_then(|id| self.provider(id)) else {
            return fail(&GatewayError::invalid_parameter(format!(
                "unknown provider '{}'",
                provider_id.trim()
            )));
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let output = self.run(provider, request, credential)?;
            let artifacts = self
                .pipeline
                .persist_all(provider.id().as_str(), output.references.clone());
            Ok::<(VendorOutput, Vec<ImageArtifact>), GatewayError>((output, artifacts))
        }));

        match outcome {
            Ok(Ok((output, artifacts))) => {
                let result = assemble(
                    ResultContext::new(&label, prompt, None, started.elapsed()),
                    output,
                    artifacts,
                );
                match result.error.as_ref() {
                    Some(error) => warn!(
                        target: "plume::gateway",
                        provider = %label,
                        kind = %error.kind,
                        message = %error.message,
                        "no image could be delivered"
                    ),
                    None => info!(
                        target: "plume::gateway",
                        provider = %label,
                        images = result.images.len(),
                        usable = result.usable_urls().len(),
                        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "image generation finished"
                    ),
                }
                result
            }
            Ok(Err(error)) => fail(&error),
            Err(_) => fail(&GatewayError::Internal(INTERNAL_ERROR_MESSAGE.to_string())),
        }
    }

    fn run(
        &self,
        provider: &dyn ImageProvider,
        request: &NormalizedRequest,
        credential: &Credential,
    ) -> Result<VendorOutput, GatewayError> {
        let handle = match provider.generate(request, credential)? {
            Submission::Completed(output) => return Ok(output),
            Submission::Pending(handle) => handle,
        };
        info!(
            target: "plume::gateway",
            provider = %provider.id(),
            job_id = %handle.job_id,
            max_attempts = handle.policy.max_attempts,
            "polling vendor job"
        );
        let poller = JobPoller::new(self.clock.as_ref());
        match poller.run(&handle, |_| provider.query_job(&handle, credential))? {
            PollOutcome::Succeeded(payload) => provider.collect_job(&handle, &payload),
            PollOutcome::Failed(message) => Err(GatewayError::VendorUnavailable {
                message: format!(
                    "{} job {} failed: {message}",
                    provider.id().display_name(),
                    handle.job_id
                ),
                code: None,
            }),
            PollOutcome::TimedOut { attempts } => Err(GatewayError::Timeout(format!(
                "{} job {} still running after {attempts} status checks",
                provider.id().display_name(),
                handle.job_id
            ))),
        }
    }
}
