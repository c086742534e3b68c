/// System Tools
///
/// `current_time` reports the server clock, `system_info` a short summary of
/// the host the server runs on. Neither takes arguments.

use chrono::{SecondsFormat, Utc};

use crate::core::error::{RegistryError, ToolError};
use crate::core::registry::{ToolArgs, ToolOutput, ToolRegistry, ToolSchema};

pub const CURRENT_TIME: &str = "current_time";
pub const SYSTEM_INFO: &str = "system_info";

/// # Errors
/// Fails if a tool named `current_time` is already registered.
pub fn register_current_time(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    registry.register(
        CURRENT_TIME,
        "Get the current system time",
        ToolSchema::new(),
        current_time,
    )
}

/// # Errors
/// Fails if a tool named `system_info` is already registered.
pub fn register_system_info(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    registry.register(
        SYSTEM_INFO,
        "Get basic system information",
        ToolSchema::new(),
        system_info,
    )
}

fn current_time(_args: ToolArgs) -> Result<ToolOutput, ToolError> {
    Ok(ToolOutput::Text(
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    ))
}

fn system_info(_args: ToolArgs) -> Result<ToolOutput, ToolError> {
    let text = format!(
        "System Info:\n- OS: {}\n- Arch: {}\n- CPUs: {}\n- Server Version: {}\n- Timestamp: {}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        num_cpus::get(),
        env!("CARGO_PKG_VERSION"),
        Utc::now().timestamp(),
    );
    Ok(ToolOutput::Text(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_time_is_rfc3339() {
        let ToolOutput::Text(text) = current_time(ToolArgs::default()).unwrap() else {
            panic!("text expected");
        };
        assert!(chrono::DateTime::parse_from_rfc3339(&text).is_ok(), "{}", text);
    }

    #[test]
    fn system_info_mentions_os_and_cpus() {
        let ToolOutput::Text(text) = system_info(ToolArgs::default()).unwrap() else {
            panic!("text expected");
        };
        assert!(text.contains(std::env::consts::OS));
        assert!(text.contains(&format!("CPUs: {}", num_cpus::get())));
    }
}
