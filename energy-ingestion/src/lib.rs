pub mod api;
pub mod blob;
pub mod config;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod transform;
pub mod trigger;

pub use pipeline::{Envelope, PipelineError, StorageError};
pub use trigger::IngestionTrigger;
