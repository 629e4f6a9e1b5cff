//! Declarative record projection.
//!
//! A transformer describes how stored records become response trees: named
//! views select fields and relations, and per-attribute tables rename,
//! guard, format and default the values.

pub mod operations;
pub mod registry;
pub mod spec;
pub mod transformer;

pub use operations::{FormatterCall, FormatterChain, Operations};
pub use registry::FormatRegistry;
pub use spec::{Attribute, ProjectionSpec, SpecNode};
pub use transformer::{Transformer, TransformerBuilder, TransformerDefinition};
