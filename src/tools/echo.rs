/// Echo Tool Implementation
///
/// The echo tool takes a message parameter and returns it behind a fixed
/// label. It is the smallest complete example of a tool: a schema, a handler,
/// and a registration function.

use crate::core::error::{RegistryError, ToolError};
use crate::core::registry::{ParamSpec, ToolArgs, ToolOutput, ToolRegistry, ToolSchema};

pub const NAME: &str = "echo";

/// Label prepended to every echoed message.
pub const PREFIX: &str = "Echo: ";

/// Register the echo tool with the tool registry.
///
/// # Errors
/// Fails if a tool named `echo` is already registered.
pub fn register(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    let schema = ToolSchema::new().param(
        ParamSpec::string("message", "Message to echo back").required(),
    );
    registry.register(NAME, "Echo back the input message", schema, handle)
}

fn handle(args: ToolArgs) -> Result<ToolOutput, ToolError> {
    // Presence and type were checked by the schema
    let message = args
        .str("message")
        .ok_or_else(|| ToolError::invalid("message", "missing required parameter"))?;

    tracing::debug!(tool.message = %message, "echoing");

    let mut result = String::with_capacity(PREFIX.len() + message.len());
    result.push_str(PREFIX);
    result.push_str(message);
    Ok(ToolOutput::Text(result))
}
