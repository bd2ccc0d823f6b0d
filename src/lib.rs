pub mod api;
pub mod catalog;
pub mod commons;
pub mod error;
pub mod normalization;
pub mod pipeline;
pub mod tracing;

pub mod util {
    pub mod env;
}

pub use catalog::Catalog;
pub use error::{ApiError, CatalogError};
pub use pipeline::{MediaRecord, Pipeline, PipelineConfig, PipelineOutput};
