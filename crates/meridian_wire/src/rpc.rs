//! Cross-process remote function calls.
//!
//! The generic escape hatch of the wire protocol: plugin code on either
//! side can invoke a named function on the other side with positional and
//! keyword arguments. Failures are caught at the responder and travel
//! back as a structured [`FunctionOutcome::Error`]; a broken call never
//! tears down the shared link.

use crate::message::{WireCommand, WireMessage};
use crate::WireError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

/// A named invocation with positional and keyword arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Caller-assigned id matched against the reply.
    pub call_id: u32,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl FunctionCall {
    pub fn new(call_id: u32, name: impl Into<String>) -> Self {
        Self {
            call_id,
            name: name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Wraps the call in a wire message.
    pub fn into_message(self, sessid: u32) -> Result<WireMessage, WireError> {
        Ok(WireMessage {
            command: WireCommand::FunctionCall,
            sessid,
            payload: serde_json::to_vec(&self)?,
        })
    }

    /// Parses a [`WireCommand::FunctionCall`] payload.
    pub fn from_message(msg: &WireMessage) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(&msg.payload)?)
    }
}

/// Result of a remote invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum FunctionOutcome {
    Ok(Value),
    Error(String),
}

/// Reply frame for a [`FunctionCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionReply {
    pub call_id: u32,
    pub outcome: FunctionOutcome,
}

impl FunctionReply {
    pub fn into_message(self, sessid: u32) -> Result<WireMessage, WireError> {
        Ok(WireMessage {
            command: WireCommand::FunctionReply,
            sessid,
            payload: serde_json::to_vec(&self)?,
        })
    }

    pub fn from_message(msg: &WireMessage) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(&msg.payload)?)
    }
}

/// Signature of a registered remote-callable function.
pub type RemoteFn =
    Arc<dyn Fn(Vec<Value>, Map<String, Value>) -> Result<Value, String> + Send + Sync>;

/// Responder-side table of callable functions.
///
/// Populated at startup via constructor injection, like the command-set
/// factory registry. Unknown names and handler failures are both absorbed
/// into error outcomes.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, RemoteFn>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function under a name, replacing any previous one.
    pub fn register<F>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(Vec<Value>, Map<String, Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Executes a call, converting every failure mode into a reply.
    pub fn handle(&self, call: FunctionCall) -> FunctionReply {
        let outcome = match self.functions.get(&call.name) {
            Some(function) => match function(call.args, call.kwargs) {
                Ok(value) => FunctionOutcome::Ok(value),
                Err(message) => {
                    warn!(name = %call.name, %message, "remote function returned error");
                    FunctionOutcome::Error(message)
                }
            },
            None => {
                warn!(name = %call.name, "remote function not registered");
                FunctionOutcome::Error(format!("unknown remote function '{}'", call.name))
            }
        };
        FunctionReply {
            call_id: call.call_id,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_reply_round_trip_through_messages() {
        let mut kwargs = Map::new();
        kwargs.insert("loud".into(), json!(true));
        let call = FunctionCall::new(11, "announce")
            .with_args(vec![json!("hello")])
            .with_kwargs(kwargs);

        let msg = call.clone().into_message(4).unwrap();
        assert_eq!(msg.command, WireCommand::FunctionCall);
        assert_eq!(FunctionCall::from_message(&msg).unwrap(), call);

        let reply = FunctionReply {
            call_id: 11,
            outcome: FunctionOutcome::Ok(json!(3)),
        };
        let msg = reply.clone().into_message(4).unwrap();
        assert_eq!(FunctionReply::from_message(&msg).unwrap(), reply);
    }

    #[test]
    fn test_registry_dispatch() {
        let registry = FunctionRegistry::new();
        registry.register("sum", |args, _kwargs| {
            let total: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
            Ok(json!(total))
        });

        let reply = registry.handle(
            FunctionCall::new(1, "sum").with_args(vec![json!(1), json!(2), json!(3)]),
        );
        assert_eq!(reply.outcome, FunctionOutcome::Ok(json!(6)));
    }

    #[test]
    fn test_failures_become_structured_errors() {
        let registry = FunctionRegistry::new();
        registry.register("explode", |_, _| Err("boom".to_string()));

        let reply = registry.handle(FunctionCall::new(2, "explode"));
        assert_eq!(reply.outcome, FunctionOutcome::Error("boom".to_string()));

        let reply = registry.handle(FunctionCall::new(3, "missing"));
        assert!(matches!(reply.outcome, FunctionOutcome::Error(_)));
        assert_eq!(reply.call_id, 3);
    }
}
