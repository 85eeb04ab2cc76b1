// Core types and collaborators for the Conduit MCP hub

pub mod types;
pub mod catalog;

pub use types::*;
pub use catalog::{CatalogTool, IntegrationDirectory, StaticCatalog, ToolCatalog};
