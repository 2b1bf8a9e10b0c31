//! Process-wide registries: tools and sub-workflows.
//!
//! Registries outlive any single run. They are read-mostly: registration
//! happens at host startup, lookups happen on the hot path. Mutating a
//! registry while a run is in flight is the caller's responsibility.

mod subflows;
mod tools;

pub use subflows::{PortSpec, PortType, SubflowDefinition, SubflowRegistry};
pub use tools::{ToolCallFallback, ToolError, ToolHandler, ToolRegistry};
