/// Typed consumers of the built-in tools.
///
/// These sit at the edge of the client: `sum_dice` absorbs any session error
/// and falls back to computing locally.

use serde_json::{Value, json};

use crate::client::session::SharedSession;
use crate::core::context::CallContext;
use crate::core::error::ClientError;
use crate::core::protocol::Arguments;
use crate::tools::calculator::{self, Operation};
use crate::tools::echo;

/// Argument map from a JSON object literal. Non-objects give an empty map.
pub fn arguments(value: Value) -> Arguments {
    match value {
        Value::Object(map) => map,
        _ => Arguments::new(),
    }
}

/// Run `operation` on the server's calculator.
///
/// # Errors
/// `Tool` for a domain failure such as dividing by zero, `ResultParse` if
/// the answer is not numeric, or any session error.
pub async fn call_calculator(
    session: &SharedSession,
    ctx: &CallContext,
    operation: Operation,
    x: f64,
    y: f64,
) -> Result<f64, ClientError> {
    let args = arguments(json!({ "operation": operation.as_str(), "x": x, "y": y }));
    session.call_tool_as(ctx, calculator::NAME, args).await
}

/// # Errors
/// `Tool` for an error result, or any session error.
pub async fn call_echo(session: &SharedSession, ctx: &CallContext, message: &str) -> Result<String, ClientError> {
    session
        .call_tool_as(ctx, echo::NAME, arguments(json!({ "message": message })))
        .await
}

/// Where a dice sum came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumSource {
    Remote,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceSum {
    pub dice: (u8, u8),
    pub total: u32,
    pub source: SumSource,
}

/// Two six-sided dice.
pub fn roll_dice() -> (u8, u8) {
    (fastrand::u8(1..=6), fastrand::u8(1..=6))
}

/// Add two dice through the calculator, or locally if the call fails for
/// any reason.
pub async fn sum_dice(session: &SharedSession, ctx: &CallContext, d1: u8, d2: u8) -> DiceSum {
    let local = u32::from(d1) + u32::from(d2);
    let (total, source) = match call_calculator(session, ctx, Operation::Add, f64::from(d1), f64::from(d2)).await {
        Ok(value) if value >= 0.0 && value.fract() == 0.0 => (value as u32, SumSource::Remote),
        Ok(value) => {
            tracing::warn!(value, "calculator returned a non-integral sum, computing locally");
            (local, SumSource::Local)
        }
        Err(e) => {
            tracing::warn!(error = %e, "remote sum failed, computing locally");
            (local, SumSource::Local)
        }
    };

    tracing::info!(d1, d2, total, source = ?source, "dice rolled");
    DiceSum {
        dice: (d1, d2),
        total,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ClientConfig;
    use std::time::Duration;

    #[test]
    fn dice_stay_in_range() {
        for _ in 0..200 {
            let (a, b) = roll_dice();
            assert!((1..=6).contains(&a) && (1..=6).contains(&b));
        }
    }

    #[test]
    fn non_object_arguments_are_empty() {
        assert!(arguments(json!([1, 2])).is_empty());
        assert_eq!(arguments(json!({"x": 1})).len(), 1);
    }

    #[tokio::test]
    async fn sum_falls_back_when_server_is_unreachable() {
        let mut config = ClientConfig::new("http://127.0.0.1:9");
        config.handshake_timeout = Duration::from_secs(2);
        let session = SharedSession::new(config);

        let sum = sum_dice(&session, &CallContext::new(), 4, 5).await;
        assert_eq!(sum.total, 9);
        assert_eq!(sum.source, SumSource::Local);
    }
}
