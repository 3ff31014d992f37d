//! Function-call dispatch for validated outputs.

use std::collections::HashMap;

use anyhow::Result;

use loreguard_parser::FunctionCall;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionCallResult {
    Success { name: String, output: String },
    Error { name: String, message: String },
    Unknown { name: String },
}

type Handler = Box<dyn Fn(&FunctionCall) -> Result<String> + Send + Sync>;

/// Table of named handlers. Names match case-insensitively; an unregistered
/// name yields `Unknown`. Handler errors are trapped and reported as values.
#[derive(Default)]
pub struct FunctionCallDispatcher {
    handlers: HashMap<String, Handler>,
}

impl FunctionCallDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl Fn(&FunctionCall) -> Result<String> + Send + Sync + 'static,
    ) {
        self.handlers.insert(name.into().to_lowercase(), Box::new(handler));
    }

    pub fn dispatch(&self, call: &FunctionCall) -> FunctionCallResult {
        let Some(handler) = self.handlers.get(&call.name.to_lowercase()) else {
            return FunctionCallResult::Unknown {
                name: call.name.clone(),
            };
        };
        match handler(call) {
            Ok(output) => FunctionCallResult::Success {
                name: call.name.clone(),
                output,
            },
            Err(error) => {
                tracing::warn!(function = %call.name, error = %error, "function handler failed");
                FunctionCallResult::Error {
                    name: call.name.clone(),
                    message: error.to_string(),
                }
            }
        }
    }

    pub fn dispatch_all(&self, calls: &[FunctionCall]) -> Vec<FunctionCallResult> {
        calls.iter().map(|call| self.dispatch(call)).collect()
    }
}
