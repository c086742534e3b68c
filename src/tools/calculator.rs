/// Calculator Tool Implementation
///
/// Basic arithmetic over two numeric operands. Results are formatted with two
/// decimal places; dividing by zero is a domain error returned to the caller
/// as an error result.

use serde::{Deserialize, Serialize};

use crate::core::error::{RegistryError, ToolError};
use crate::core::registry::{ParamSpec, ToolArgs, ToolOutput, ToolRegistry, ToolSchema};

pub const NAME: &str = "calculator";

/// Arithmetic operation accepted by the calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Add,
        Operation::Subtract,
        Operation::Multiply,
        Operation::Divide,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
        }
    }

    /// # Errors
    /// `ToolError::Execution` when dividing by zero or when the result is
    /// not a finite number.
    pub fn apply(self, x: f64, y: f64) -> Result<f64, ToolError> {
        let result = match self {
            Operation::Add => x + y,
            Operation::Subtract => x - y,
            Operation::Multiply => x * y,
            Operation::Divide => {
                if y == 0.0 {
                    return Err(ToolError::execution("cannot divide by zero"));
                }
                x / y
            }
        };
        if !result.is_finite() {
            return Err(ToolError::execution(format!(
                "{} overflowed: result is not a finite number",
                self.as_str()
            )));
        }
        Ok(result)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct CalculatorArgs {
    operation: Operation,
    x: f64,
    y: f64,
}

/// Render a result the way the calculator sends it.
pub fn format_result(value: f64) -> String {
    format!("{:.2}", value)
}

/// Register the calculator tool with the tool registry.
///
/// # Errors
/// Fails if a tool named `calculator` is already registered.
pub fn register(registry: &mut ToolRegistry) -> Result<(), RegistryError> {
    let schema = ToolSchema::new()
        .param(
            ParamSpec::string(
                "operation",
                "The operation to perform (add, subtract, multiply, divide)",
            )
            .required()
            .one_of(Operation::ALL.iter().map(|op| op.as_str())),
        )
        .param(ParamSpec::number("x", "First number").required())
        .param(ParamSpec::number("y", "Second number").required());

    registry.register(NAME, "Perform basic arithmetic operations", schema, handle)
}

fn handle(args: ToolArgs) -> Result<ToolOutput, ToolError> {
    let CalculatorArgs { operation, x, y } = args.parse()?;
    let result = operation.apply(x, y)?;
    tracing::debug!(tool.operation = %operation, tool.x = x, tool.y = y, tool.result = result, "calculated");
    Ok(ToolOutput::Text(format_result(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::Arguments;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn calculate(args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let mut registry = ToolRegistry::new();
        register(&mut registry).unwrap();
        let arguments: Arguments = args.as_object().cloned().unwrap_or_default();
        registry.lookup(NAME).unwrap().invoke(&arguments)
    }

    fn text(args: serde_json::Value) -> String {
        match calculate(args).unwrap() {
            ToolOutput::Text(text) => text,
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn adds_to_two_decimals() {
        assert_eq!(text(json!({"operation": "add", "x": 3, "y": 4})), "7.00");
    }

    #[test]
    fn every_operation_matches_native_arithmetic() {
        let cases = [
            ("add", 1.25, 2.5, 1.25 + 2.5),
            ("subtract", 10.0, 0.5, 10.0 - 0.5),
            ("multiply", -3.0, 7.0, -3.0 * 7.0),
            ("divide", 1.0, 3.0, 1.0 / 3.0),
        ];
        for (op, x, y, expected) in cases {
            assert_eq!(
                text(json!({"operation": op, "x": x, "y": y})),
                format!("{:.2}", expected),
                "{} {} {}",
                op,
                x,
                y
            );
        }
    }

    #[test]
    fn divide_by_zero_is_a_domain_error() {
        let err = calculate(json!({"operation": "divide", "x": 5, "y": 0})).unwrap_err();
        assert_eq!(err, ToolError::execution("cannot divide by zero"));
        assert!(err.to_string().contains("zero"));

        let err = calculate(json!({"operation": "divide", "x": 0, "y": -0.0})).unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }

    #[test]
    fn unknown_operation_is_invalid_argument() {
        let err = calculate(json!({"operation": "modulo", "x": 5, "y": 2})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { ref param, .. } if param == "operation"));
    }

    #[test]
    fn overflow_is_reported_not_returned_as_infinity() {
        let err = calculate(json!({"operation": "multiply", "x": 1e308, "y": 10})).unwrap_err();
        assert!(matches!(err, ToolError::Execution(_)));
    }

    #[test]
    fn operation_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Operation::Divide).unwrap(), json!("divide"));
    }
}
