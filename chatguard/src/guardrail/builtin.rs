//! Ready-made guardrails.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{
    InputGuardrail, InputGuardrailCheck, InputGuardrailRequest, InputGuardrailResult,
    OutputGuardrail, OutputGuardrailCheck, OutputGuardrailRequest, OutputGuardrailResult,
};
use crate::error::{Error, Result};

/// Corrective instruction sent when a response holds no valid JSON.
pub const DEFAULT_JSON_REPROMPT: &str =
    "Make sure you return a valid JSON object following the specified format";

/// Extracts a JSON document from the model response.
///
/// Accepts a bare JSON document, a fenced code block, or JSON embedded in
/// prose (the first object or array that parses). On success the response is
/// rewritten to the compact JSON text and the parsed value is attached, so
/// typed calls deserialize it directly. Otherwise the model is reprompted.
#[derive(Debug, Clone)]
pub struct JsonExtractorOutputGuardrail {
    reprompt: String,
}

impl Default for JsonExtractorOutputGuardrail {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonExtractorOutputGuardrail {
    /// Guardrail name used by [`into_guardrail`](Self::into_guardrail).
    pub const NAME: &'static str = "json-extractor";

    /// Create the guardrail with the default corrective instruction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reprompt: DEFAULT_JSON_REPROMPT.to_owned(),
        }
    }

    /// Use a custom corrective instruction.
    #[must_use]
    pub fn with_reprompt(mut self, reprompt: impl Into<String>) -> Self {
        self.reprompt = reprompt.into();
        self
    }

    /// Wrap into a named [`OutputGuardrail`].
    #[must_use]
    pub fn into_guardrail(self) -> OutputGuardrail {
        OutputGuardrail::new(Self::NAME, self)
    }

    /// Find the JSON document in `text`.
    #[must_use]
    pub fn extract(text: &str) -> Option<Value> {
        let trimmed = text.trim();
        if let Ok(value) = serde_json::from_str(trimmed) {
            return Some(value);
        }
        if let Some(value) = fenced_block(trimmed).and_then(|b| serde_json::from_str(b).ok()) {
            return Some(value);
        }
        trimmed
            .match_indices(['{', '['])
            .find_map(|(start, _)| {
                serde_json::Deserializer::from_str(&trimmed[start..])
                    .into_iter::<Value>()
                    .next()?
                    .ok()
            })
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let rest = &text[open + 3..];
    let body_start = rest.find('\n')? + 1;
    let body = &rest[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

#[async_trait]
impl OutputGuardrailCheck for JsonExtractorOutputGuardrail {
    async fn validate(
        &self,
        request: &OutputGuardrailRequest<'_>,
    ) -> Result<OutputGuardrailResult> {
        match Self::extract(request.text()) {
            Some(value) => {
                let text = serde_json::to_string(&value)?;
                Ok(OutputGuardrailResult::success_with_value(text, value))
            }
            None => {
                debug!(attempt = request.attempt, "no JSON document in response");
                Ok(OutputGuardrailResult::reprompt(
                    "Invalid JSON in the model response",
                    self.reprompt.clone(),
                ))
            }
        }
    }
}

/// Rejects user messages matching any of a list of regular expressions.
#[derive(Debug, Clone)]
pub struct BlockedPatternsInputGuardrail {
    patterns: Vec<Regex>,
}

impl BlockedPatternsInputGuardrail {
    /// Guardrail name used by [`into_guardrail`](Self::into_guardrail).
    pub const NAME: &'static str = "blocked-patterns";

    /// Compile the deny-list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a pattern is not a valid regular expression.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref())
                    .map_err(|e| Error::config(format!("invalid blocked pattern '{}': {e}", p.as_ref())))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Wrap into a named [`InputGuardrail`].
    #[must_use]
    pub fn into_guardrail(self) -> InputGuardrail {
        InputGuardrail::new(Self::NAME, self)
    }
}

#[async_trait]
impl InputGuardrailCheck for BlockedPatternsInputGuardrail {
    async fn validate(&self, request: &InputGuardrailRequest<'_>) -> Result<InputGuardrailResult> {
        let text = request.text();
        Ok(self
            .patterns
            .iter()
            .find(|re| re.is_match(text))
            .map_or_else(InputGuardrailResult::success, |re| {
                InputGuardrailResult::failure(format!(
                    "message matches blocked pattern '{}'",
                    re.as_str()
                ))
            }))
    }
}

/// Rejects user messages longer than a number of characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxLengthInputGuardrail {
    /// Maximum number of characters.
    pub max_chars: usize,
}

impl MaxLengthInputGuardrail {
    /// Guardrail name used by [`into_guardrail`](Self::into_guardrail).
    pub const NAME: &'static str = "max-length";

    /// Create the guardrail.
    #[must_use]
    pub const fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Wrap into a named [`InputGuardrail`].
    #[must_use]
    pub fn into_guardrail(self) -> InputGuardrail {
        InputGuardrail::new(Self::NAME, self)
    }
}

#[async_trait]
impl InputGuardrailCheck for MaxLengthInputGuardrail {
    async fn validate(&self, request: &InputGuardrailRequest<'_>) -> Result<InputGuardrailResult> {
        let len = request.text().chars().count();
        if len > self.max_chars {
            return Ok(InputGuardrailResult::failure(format!(
                "message is {len} characters long, the limit is {}",
                self.max_chars
            )));
        }
        Ok(InputGuardrailResult::success())
    }
}
