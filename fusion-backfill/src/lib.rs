pub mod api;
pub mod backfill;
pub mod clock;
pub mod config;
pub mod errors;
pub mod metrics_server;
pub mod normalize;
pub mod observability;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod transform;
pub mod writer;

pub use errors::{FusionError, FusionResult};
pub use pipeline::{Envelope, Pipeline};
