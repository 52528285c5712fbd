//! Infrastructure layer: event stores, projection storage, dispatch, config.

pub mod config;
pub mod dispatcher;
pub mod event_store;
pub mod locks;
pub mod replay;
pub mod repository;

pub use config::{ConfigError, SourcererConfig, StoreBackend};
pub use dispatcher::{DispatchError, DispatchOutcome, DispatchStage, Sourcerer, SourcererBuilder};
pub use replay::{ReplayError, ReplayReport};
pub use repository::{AggregateRepository, InMemoryAggregateRepository, RepositoryError};
