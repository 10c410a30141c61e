pub mod config;
pub mod error;
pub mod executor;
pub mod generator;
pub mod ingest;
pub mod llm;
pub mod planner;
pub mod result;
pub mod sanitizer;
pub mod schema;
pub mod selector;
pub mod templates;
pub mod text;

pub use error::{PlannerError, Result};
pub use planner::{PlanResponse, QueryPlanner};
pub use schema::SchemaDescriptor;
