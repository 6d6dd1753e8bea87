pub mod artifact;
pub mod error;
pub mod providers;
pub mod request;
pub mod result;
pub mod summary;

pub use artifact::{ImageArtifact, ImageReference, SourceKind};
pub use error::{ErrorInfo, ErrorKind, GatewayError};
pub use providers::{NamedProvider, ProviderId, ProviderRegistry};
pub use request::{Credential, NormalizedRequest};
pub use result::GenerationResult;
