//! Tools Module
//!
//! This module contains all built-in MCP tool implementations. Each tool is
//! implemented as a separate module that exports a `register` function to add
//! the tool to the registry during server initialization.

pub mod calculator;
pub mod echo;
pub mod system;

use crate::core::error::RegistryError;
use crate::core::registry::ToolRegistry;

/// Register every built-in tool.
///
/// # Errors
/// Fails if a tool name is already present in `registry`.
pub fn register_all(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    // Add new tool registrations here following this pattern:
    // your_tool::register(registry)?;
    echo::register(registry)?;
    calculator::register(registry)?;
    system::register_current_time(registry)?;
    system::register_system_info(registry)?;
    Ok(())
}
