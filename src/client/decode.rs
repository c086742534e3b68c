/// Result Decoder
///
/// The first content block of a tool result is authoritative. Text blocks
/// yield their text as-is; any other kind is rendered as its JSON form.

use serde_json::Value;

use crate::core::error::ClientError;
use crate::core::protocol::{CallToolResult, ContentBlock};

/// The authoritative response string of `result`.
///
/// # Errors
/// `ResultParse` when the content sequence is empty.
pub fn result_text(result: &CallToolResult) -> Result<String, ClientError> {
    match result.content.first() {
        Some(ContentBlock::Text { text }) => Ok(text.clone()),
        Some(other) => {
            tracing::debug!(kind = other.kind(), "rendering non-text block as JSON");
            serde_json::to_string(other).map_err(|e| ClientError::ResultParse(e.to_string()))
        }
        None => Err(ClientError::ResultParse("empty content".to_string())),
    }
}

/// Turn an `isError` result into `ClientError::Tool` carrying its text.
///
/// # Errors
/// `Tool` when the result is flagged as an error.
pub fn ensure_success(result: CallToolResult) -> Result<CallToolResult, ClientError> {
    if !result.is_error {
        return Ok(result);
    }
    let message = result_text(&result).unwrap_or_else(|_| "tool reported an error".to_string());
    Err(ClientError::Tool(message))
}

/// # Errors
/// `ResultParse` unless `text` is a finite floating-point number.
pub fn parse_number(text: &str) -> Result<f64, ClientError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ClientError::ResultParse("no text result".to_string()));
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(value) => Err(ClientError::ResultParse(format!("non-finite number: {}", value))),
        Err(e) => Err(ClientError::ResultParse(format!("'{}' is not a number: {}", trimmed, e))),
    }
}

/// Conversion from a successful tool result to a caller's expected type.
pub trait FromToolResult: Sized {
    /// # Errors
    /// `ResultParse` when the payload does not fit `Self`.
    fn from_tool_result(result: &CallToolResult) -> Result<Self, ClientError>;
}

impl FromToolResult for String {
    fn from_tool_result(result: &CallToolResult) -> Result<Self, ClientError> {
        result_text(result)
    }
}

impl FromToolResult for f64 {
    fn from_tool_result(result: &CallToolResult) -> Result<Self, ClientError> {
        parse_number(&result_text(result)?)
    }
}

impl FromToolResult for Value {
    fn from_tool_result(result: &CallToolResult) -> Result<Self, ClientError> {
        let text = result_text(result)?;
        serde_json::from_str(&text).map_err(|e| ClientError::ResultParse(e.to_string()))
    }
}
