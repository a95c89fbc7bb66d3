//! Generation parameter overrides.
//!
//! A [`ParameterPreset`] is sparse: a field that is `None` is never written
//! into an outgoing request, even when a provider default exists for it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Named starting points for a preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinPreset {
    Creative,
    Balanced,
    Precise,
    Deterministic,
    Coding,
}

impl BuiltinPreset {
    pub fn preset(self) -> ParameterPreset {
        match self {
            BuiltinPreset::Creative => ParameterPreset {
                temperature: Some(1.3),
                top_p: Some(0.9),
                top_k: Some(40),
                frequency_penalty: Some(0.3),
                presence_penalty: Some(0.3),
                ..Default::default()
            },
            BuiltinPreset::Balanced => ParameterPreset {
                temperature: Some(1.0),
                top_p: Some(1.0),
                top_k: Some(0),
                frequency_penalty: Some(0.0),
                presence_penalty: Some(0.0),
                ..Default::default()
            },
            BuiltinPreset::Precise => ParameterPreset {
                temperature: Some(0.3),
                top_p: Some(0.7),
                top_k: Some(10),
                frequency_penalty: Some(0.0),
                presence_penalty: Some(0.0),
                ..Default::default()
            },
            BuiltinPreset::Deterministic => ParameterPreset {
                temperature: Some(0.0),
                top_p: Some(1.0),
                top_k: Some(1),
                seed: Some(42),
                ..Default::default()
            },
            BuiltinPreset::Coding => ParameterPreset {
                temperature: Some(0.2),
                top_p: Some(0.95),
                top_k: Some(0),
                frequency_penalty: Some(0.1),
                presence_penalty: Some(0.1),
                stop: Some(vec!["```".to_string(), "\n\n\n".to_string()]),
                ..Default::default()
            },
        }
    }
}

/// Sparse set of request parameters. `tools`, `tool_choice` and `logit_bias`
/// are free-form JSON text, parsed when applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterPreset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<BuiltinPreset>,

    // Sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_a: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,

    // Repetition control
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f64>,

    // Output control
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,

    // Tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    // Advanced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<i64>,
}

impl ParameterPreset {
    /// Explicit fields layered over the named base, if any
    pub fn resolved(&self) -> ParameterPreset {
        let Some(base) = self.base.map(BuiltinPreset::preset) else {
            return self.clone();
        };

        ParameterPreset {
            base: None,
            temperature: self.temperature.or(base.temperature),
            top_p: self.top_p.or(base.top_p),
            top_k: self.top_k.or(base.top_k),
            min_p: self.min_p.or(base.min_p),
            top_a: self.top_a.or(base.top_a),
            seed: self.seed.or(base.seed),
            frequency_penalty: self.frequency_penalty.or(base.frequency_penalty),
            presence_penalty: self.presence_penalty.or(base.presence_penalty),
            repetition_penalty: self.repetition_penalty.or(base.repetition_penalty),
            max_tokens: self.max_tokens.or(base.max_tokens),
            stop: self.stop.clone().or(base.stop),
            response_format: self.response_format.clone().or(base.response_format),
            tools: self.tools.clone().or(base.tools),
            tool_choice: self.tool_choice.clone().or(base.tool_choice),
            logit_bias: self.logit_bias.clone().or(base.logit_bias),
            logprobs: self.logprobs.or(base.logprobs),
            top_logprobs: self.top_logprobs.or(base.top_logprobs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let p = self.resolved();

        check_range(p.temperature, 0.0, 2.0, "Temperature")?;
        check_range(p.top_p, 0.0, 1.0, "Top P")?;
        check_range(p.frequency_penalty, -2.0, 2.0, "Frequency penalty")?;
        check_range(p.presence_penalty, -2.0, 2.0, "Presence penalty")?;
        check_range(p.repetition_penalty, 0.0, 2.0, "Repetition penalty")?;
        check_range(p.min_p, 0.0, 1.0, "Min P")?;
        check_range(p.top_a, 0.0, 1.0, "Top A")?;

        if matches!(p.top_k, Some(k) if k < 0) {
            anyhow::bail!("Top K must be 0 or above");
        }
        if matches!(p.max_tokens, Some(n) if n < 1) {
            anyhow::bail!("Max tokens must be 1 or above");
        }
        if matches!(p.top_logprobs, Some(n) if !(0..=20).contains(&n)) {
            anyhow::bail!("Top logprobs must be between 0 and 20");
        }

        Ok(())
    }

    /// Write every present field into `target`, replacing what the client sent.
    ///
    /// Bad JSON text in `tools`, `tool_choice` or `logit_bias` is logged and
    /// that single field is skipped.
    pub fn apply_to(&self, target: &mut Map<String, Value>) {
        let p = self.resolved();

        insert_present(target, "temperature", p.temperature);
        insert_present(target, "top_p", p.top_p);
        insert_present(target, "top_k", p.top_k);
        insert_present(target, "min_p", p.min_p);
        insert_present(target, "top_a", p.top_a);
        insert_present(target, "seed", p.seed);
        insert_present(target, "frequency_penalty", p.frequency_penalty);
        insert_present(target, "presence_penalty", p.presence_penalty);
        insert_present(target, "repetition_penalty", p.repetition_penalty);
        insert_present(target, "max_tokens", p.max_tokens);
        insert_present(target, "logprobs", p.logprobs);
        insert_present(target, "top_logprobs", p.top_logprobs);

        if let Some(stop) = p.stop.filter(|s| !s.is_empty()) {
            target.insert("stop".to_string(), json!(stop));
        }

        if let Some(kind) = p
            .response_format
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            target.insert("response_format".to_string(), json!({ "type": kind }));
        }

        insert_json_text(target, "tools", p.tools.as_deref());
        insert_json_text(target, "tool_choice", p.tool_choice.as_deref());
        insert_json_text(target, "logit_bias", p.logit_bias.as_deref());
    }
}

fn check_range(value: Option<f64>, min: f64, max: f64, label: &str) -> Result<()> {
    match value {
        Some(v) if !(min..=max).contains(&v) => {
            anyhow::bail!("{} must be between {:.1} and {:.1}", label, min, max)
        }
        _ => Ok(()),
    }
}

fn insert_present<T: Into<Value>>(target: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        target.insert(key.to_string(), value.into());
    }
}

fn insert_json_text(target: &mut Map<String, Value>, key: &str, text: Option<&str>) {
    let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
        return;
    };

    match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            target.insert(key.to_string(), value);
        }
        Err(e) => {
            tracing::error!("Failed to parse JSON for parameter '{}': {} ({})", key, text, e);
        }
    }
}
