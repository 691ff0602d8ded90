//! Telemetry for guarded invocations using the `tracing` ecosystem.
//!
//! Every invocation runs inside an `ai_service_invocation` span; guardrail
//! executions, retries, reprompts and rewrites are emitted as events.
//! [`InvocationMetrics`] is the lightweight summary returned to the caller,
//! while the detailed telemetry is handled by whatever tracing subscriber
//! the application installs.
//!
//! ```rust,ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("chatguard=debug")
//!     .init();
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{Span, info, info_span};
use uuid::Uuid;

use crate::chat::TokenUsage;

/// Counters collected during one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationMetrics {
    /// Input guardrail executions.
    pub input_guardrail_runs: u32,
    /// Output guardrail executions, across all validation passes.
    pub output_guardrail_runs: u32,
    /// Retries granted by the controller.
    pub retries: u32,
    /// Reprompts granted by the controller.
    pub reprompts: u32,
    /// Rewrites applied by guardrails of either kind.
    pub rewrites: u32,
    /// Token usage summed over every model call.
    pub usage: TokenUsage,
    /// Total duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

impl InvocationMetrics {
    /// Number of model calls (the first call plus every retry and reprompt).
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        1 + self.retries + self.reprompts
    }

    /// Record an input guardrail execution.
    pub const fn record_input_guardrail(&mut self) {
        self.input_guardrail_runs += 1;
    }

    /// Record an output guardrail execution.
    pub const fn record_output_guardrail(&mut self) {
        self.output_guardrail_runs += 1;
    }

    /// Record a granted retry.
    pub const fn record_retry(&mut self) {
        self.retries += 1;
    }

    /// Record a granted reprompt.
    pub const fn record_reprompt(&mut self) {
        self.reprompts += 1;
    }

    /// Record a rewrite.
    pub const fn record_rewrite(&mut self) {
        self.rewrites += 1;
    }

    /// Record token usage of a model call.
    pub fn record_usage(&mut self, usage: Option<TokenUsage>) {
        if let Some(usage) = usage {
            self.usage += usage;
        }
    }

    /// Complete the invocation with its final duration.
    pub const fn complete(&mut self, duration: Duration) {
        self.duration = Some(duration);
    }
}

impl std::fmt::Display for InvocationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Invocation Metrics")?;
        writeln!(f, "  Attempts:   {}", self.attempts())?;
        writeln!(
            f,
            "  Guardrails: {} input, {} output",
            self.input_guardrail_runs, self.output_guardrail_runs
        )?;
        writeln!(
            f,
            "  Recovery:   {} retries, {} reprompts, {} rewrites",
            self.retries, self.reprompts, self.rewrites
        )?;
        writeln!(
            f,
            "  Tokens:     {} (in: {}, out: {})",
            self.usage.total(),
            self.usage.input_tokens,
            self.usage.output_tokens
        )?;
        if let Some(d) = self.duration {
            writeln!(f, "  Duration:   {:.2}s", d.as_secs_f64())?;
        }
        Ok(())
    }
}

/// Metrics collector that integrates with tracing.
#[derive(Debug, Clone, Copy)]
pub struct Telemetry {
    start: Instant,
    /// Metrics collected so far.
    pub metrics: InvocationMetrics,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Start collecting.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            metrics: InvocationMetrics::default(),
        }
    }

    /// Complete the invocation and return the final metrics.
    #[must_use]
    pub fn complete(mut self) -> InvocationMetrics {
        let duration = self.start.elapsed();
        self.metrics.complete(duration);

        info!(
            attempts = self.metrics.attempts(),
            retries = self.metrics.retries,
            reprompts = self.metrics.reprompts,
            rewrites = self.metrics.rewrites,
            duration_ms = duration.as_millis(),
            "invocation_completed"
        );

        self.metrics
    }

    /// Create the span wrapping one invocation.
    #[must_use]
    pub fn invocation_span(method: &str, invocation_id: Uuid) -> Span {
        info_span!("ai_service_invocation", method = %method, invocation_id = %invocation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_metrics() {
        let mut metrics = InvocationMetrics::default();
        metrics.record_retry();
        metrics.record_reprompt();
        metrics.record_output_guardrail();
        metrics.record_usage(Some(TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
        }));
        metrics.record_usage(None);
        metrics.complete(Duration::from_millis(1500));

        assert_eq!(metrics.attempts(), 3);
        assert_eq!(metrics.usage.total(), 150);
        assert!(metrics.to_string().contains("1 retries, 1 reprompts"));
    }

    #[test]
    fn test_telemetry_complete_sets_duration() {
        let mut telemetry = Telemetry::new();
        telemetry.metrics.record_rewrite();
        let metrics = telemetry.complete();
        assert!(metrics.duration.is_some());
        assert_eq!(metrics.rewrites, 1);
        assert_eq!(metrics.attempts(), 1);
    }
}
