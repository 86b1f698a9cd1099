//! The capability registry: a static, validated catalog of invocable tools.
//!
//! Capabilities are values implementing the [`Capability`] trait; the
//! registry is built once at startup and read-only afterwards. Input
//! contracts are JSON Schemas compiled with `jsonschema` at registration, so
//! validation happens once, identically, regardless of transport.

use crate::error::{Error, Result};
use crate::types::{CallToolResult, Tool, ToolAnnotations};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// A named, independently invocable operation with a declared input contract.
///
/// One implementing type per capability; handlers are stateless and shared
/// across all sessions. `execute` receives arguments already validated
/// against `input_schema` plus the session's credential, if one is bound.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;

    /// Whether invoking this capability requires a bound session credential.
    fn requires_credential(&self) -> bool {
        false
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        None
    }

    async fn execute(&self, arguments: Value, credential: Option<&str>)
        -> Result<CallToolResult>;
}

/// A capability plus its compiled argument validator.
pub struct RegisteredCapability {
    capability: Arc<dyn Capability>,
    descriptor: Tool,
    validator: jsonschema::Validator,
}

impl RegisteredCapability {
    pub fn descriptor(&self) -> &Tool {
        &self.descriptor
    }

    /// Validates raw arguments against the declared input contract. Fails
    /// with a protocol fault before any side effect occurs.
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        self.validator.validate(arguments).map_err(|e| {
            Error::InvalidParams(format!(
                "arguments for '{}' rejected: {}",
                self.descriptor.name, e
            ))
        })
    }

    /// Validates and runs the capability.
    ///
    /// Contract violations and a missing required credential are protocol
    /// faults and fail the call before the handler runs. Errors thrown by
    /// the handler itself are downstream data: they come back as an
    /// `is_error` result so the caller can inspect and react.
    pub async fn invoke(
        &self,
        arguments: Value,
        credential: Option<&str>,
    ) -> Result<CallToolResult> {
        self.validate(&arguments)?;
        if self.capability.requires_credential() && credential.is_none() {
            return Err(Error::MissingCredential(self.descriptor.name.clone()));
        }
        match self.capability.execute(arguments, credential).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(capability = %self.descriptor.name, error = %e, "capability handler failed");
                Ok(CallToolResult::error(format!(
                    "'{}' failed: {}",
                    self.descriptor.name, e
                )))
            }
        }
    }
}

// Handlers and compiled validators carry no useful Debug output of their
// own; render the descriptor instead.
impl fmt::Debug for RegisteredCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredCapability")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Immutable-at-runtime catalog of capabilities, keyed by unique name.
pub struct CapabilityRegistry {
    entries: Vec<RegisteredCapability>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .entries
            .iter()
            .map(|e| e.descriptor.name.as_str())
            .collect();
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &names)
            .finish()
    }
}

impl CapabilityRegistry {
    /// Builds the registry, compiling every input contract.
    ///
    /// Duplicate names fail the whole build, and therefore startup; a
    /// capability is never silently shadowed.
    pub fn build(capabilities: Vec<Arc<dyn Capability>>) -> Result<Self> {
        let mut entries = Vec::with_capacity(capabilities.len());
        let mut index = HashMap::with_capacity(capabilities.len());

        for capability in capabilities {
            let name = capability.name().to_string();
            if index.contains_key(&name) {
                return Err(Error::DuplicateCapability(name));
            }
            let schema = capability.input_schema();
            let validator = jsonschema::validator_for(&schema).map_err(|e| {
                Error::Internal(format!("input schema for '{name}' does not compile: {e}"))
            })?;
            let descriptor = Tool {
                name: name.clone(),
                description: capability.description().to_string(),
                input_schema: schema,
                annotations: capability.annotations(),
            };
            index.insert(name, entries.len());
            entries.push(RegisteredCapability {
                capability,
                descriptor,
                validator,
            });
        }

        Ok(Self { entries, index })
    }

    /// Looks up a capability by name; a miss is a protocol fault.
    pub fn lookup(&self, name: &str) -> Result<&RegisteredCapability> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| Error::UnknownCapability(name.to_string()))
    }

    /// The full catalog, in registration order.
    pub fn snapshot(&self) -> Vec<Tool> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
