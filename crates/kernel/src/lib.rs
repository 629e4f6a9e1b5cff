//! Apix Kernel Library
//!
//! Declarative filtering, sorting, pagination and response projection for
//! API endpoints. The `apix` binary is a developer tool for trying
//! definitions against JSON records and inspecting generated SQL.

pub mod config;
pub mod error;
pub mod filter;
pub mod identity;
pub mod path_table;
pub mod projection;
pub mod query;
pub mod record;
pub mod response;

pub use config::Config;
pub use error::{Error, Result};
pub use filter::{FilterContext, FilterDefinition, FilterEngine, FilterRequest, SortSpec};
pub use identity::{Identity, Principal};
pub use path_table::PathTable;
pub use projection::{FormatRegistry, Operations, ProjectionSpec, Transformer, TransformerDefinition};
pub use query::{Condition, FilterOperator, FilterValue, Page, PageMeta, PaginationMode, Query, RecordSource};
pub use record::{Record, Related};
pub use response::ApiResponse;
