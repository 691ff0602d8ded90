//! Guardrail configuration and resolution.
//!
//! Guardrails are declared at two levels: on the service (applied to every
//! method) and per method. [`GuardrailsConfig::resolve`] merges the two
//! once, when the service is built; the service-level guardrails run first,
//! in declaration order, followed by the method's own.

use serde::{Deserialize, Serialize};

use crate::guardrail::{
    InputGuardrail, InputGuardrailChain, OutputGuardrail, OutputGuardrailChain,
};

/// Default number of retries and reprompts allowed per invocation.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Settings of the output guardrail controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputGuardrailsConfig {
    /// Retries and reprompts allowed per invocation; `0` disables both.
    pub max_retries: u32,
}

impl Default for OutputGuardrailsConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl OutputGuardrailsConfig {
    /// Create a config with the given retry budget.
    #[must_use]
    pub const fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

/// Guardrails declared for a single service method.
#[derive(Debug, Clone, Default)]
pub struct MethodConfig {
    /// Input guardrails, run after the service-level ones.
    pub input_guardrails: Vec<InputGuardrail>,
    /// Output guardrails, run after the service-level ones.
    pub output_guardrails: Vec<OutputGuardrail>,
    /// Overrides the service retry budget for this method.
    pub max_retries: Option<u32>,
}

impl MethodConfig {
    /// Create an empty method configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input guardrail.
    #[must_use]
    pub fn input_guardrail(mut self, guardrail: InputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    /// Add an output guardrail.
    #[must_use]
    pub fn output_guardrail(mut self, guardrail: OutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    /// Override the retry budget.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Service-level guardrails and controller settings.
#[derive(Debug, Clone, Default)]
pub struct GuardrailsConfig {
    /// Input guardrails applied to every method.
    pub input_guardrails: Vec<InputGuardrail>,
    /// Output guardrails applied to every method.
    pub output_guardrails: Vec<OutputGuardrail>,
    /// Controller settings.
    pub output: OutputGuardrailsConfig,
}

/// Chains and retry budget of one method, ready to execute.
#[derive(Debug, Clone, Default)]
pub struct ResolvedGuardrails {
    /// Input chain.
    pub input: InputGuardrailChain,
    /// Output chain.
    pub output: OutputGuardrailChain,
    /// Retry budget.
    pub max_retries: u32,
}

impl GuardrailsConfig {
    /// Merge the service-level guardrails with a method's own.
    ///
    /// Without a method configuration the service-level guardrails apply
    /// alone.
    #[must_use]
    pub fn resolve(&self, method: Option<&MethodConfig>) -> ResolvedGuardrails {
        let mut input = InputGuardrailChain::new(self.input_guardrails.clone());
        let mut output = OutputGuardrailChain::new(self.output_guardrails.clone());
        let mut max_retries = self.output.max_retries;

        if let Some(method) = method {
            for guardrail in &method.input_guardrails {
                input.push(guardrail.clone());
            }
            for guardrail in &method.output_guardrails {
                output.push(guardrail.clone());
            }
            max_retries = method.max_retries.unwrap_or(max_retries);
        }

        ResolvedGuardrails {
            input,
            output,
            max_retries,
        }
    }
}
