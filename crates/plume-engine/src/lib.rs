//! Image-generation gateway engine: vendor adapters, request signing, job
//! polling, artifact persistence and result assembly.

pub mod assembler;
pub mod clock;
pub mod config;
mod gateway;
pub mod persistence;
pub mod poller;
pub mod providers;
pub mod signing;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GatewayConfig, StorageConfig, VendorEndpoints};
pub use gateway::Gateway;
pub use persistence::{ArtifactPipeline, LocalDirStore, ObjectStore};
pub use providers::{ImageProvider, ImageProviderRegistry, Submission, VendorOutput};
