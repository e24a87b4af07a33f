use serde::{Deserialize, Serialize};

/// Model tiers available for contract review
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Balanced tier - good drafting quality at medium cost (claude-sonnet-4.5)
    Balanced,
    /// Smart tier - strongest drafting for long, dense agreements (claude-opus-4.5)
    Smart,
}

/// Output ceiling for every tier. A full set of block edits over a long
/// contract fits comfortably; runaway generations do not.
const MODEL_MAX_TOKENS: u32 = 16384;

/// Near-deterministic sampling: the same contract should get the same edits.
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

impl Model {
    pub fn id(&self) -> &'static str {
        match self {
            Model::Balanced => "anthropic/claude-sonnet-4.5",
            Model::Smart => "anthropic/claude-opus-4.5",
        }
    }

    pub fn max_tokens(&self) -> u32 {
        MODEL_MAX_TOKENS
    }

    /// Resolve a tier name ("balanced", "smart") or pass a raw model id through.
    pub fn resolve_id(name: &str) -> String {
        match name.trim().to_lowercase().as_str() {
            "balanced" => Model::Balanced.id().to_string(),
            "smart" => Model::Smart.id().to_string(),
            _ => name.trim().to_string(),
        }
    }
}

/// API usage information reported at the end of a stream
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    /// Actual cost in USD as reported by the provider (`cost` or `total_cost`).
    #[serde(default, alias = "total_cost")]
    pub cost: Option<f64>,
}

impl Usage {
    /// Reported cost, or 0.0 when the provider did not say. Never estimated.
    pub fn cost(&self) -> f64 {
        self.cost.unwrap_or(0.0)
    }
}

/// Merge two optional Usage values, summing their token counts and costs
pub fn merge_usage(primary: Option<Usage>, secondary: Option<Usage>) -> Option<Usage> {
    match (primary, secondary) {
        (Some(p), Some(s)) => Some(Usage {
            prompt_tokens: p.prompt_tokens + s.prompt_tokens,
            completion_tokens: p.completion_tokens + s.completion_tokens,
            total_tokens: p.total_tokens + s.total_tokens,
            cost: match (p.cost, s.cost) {
                (Some(pc), Some(sc)) => Some(pc + sc),
                (Some(pc), None) => Some(pc),
                (None, Some(sc)) => Some(sc),
                (None, None) => None,
            },
        }),
        (Some(p), None) => Some(p),
        (None, Some(s)) => Some(s),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_ids() {
        assert!(Model::Balanced.id().contains("sonnet"));
        assert!(Model::Smart.id().contains("opus"));
        assert_eq!(Model::Smart.max_tokens(), MODEL_MAX_TOKENS);
    }

    #[test]
    fn test_resolve_id_accepts_tiers_and_raw_ids() {
        assert_eq!(Model::resolve_id("Smart"), Model::Smart.id());
        assert_eq!(Model::resolve_id(" openai/gpt-5 "), "openai/gpt-5");
    }

    #[test]
    fn test_usage_deserialize_with_total_cost() {
        let json = r#"{"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150, "total_cost": 0.0025}"#;
        let usage: Usage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(usage.cost(), 0.0025);
    }

    #[test]
    fn test_usage_returns_zero_when_no_cost() {
        assert_eq!(Usage::default().cost(), 0.0);
    }

    #[test]
    fn test_merge_usage_sums_both_attempts() {
        let a = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cost: Some(0.01),
        };
        let b = Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
            total_tokens: 30,
            cost: None,
        };
        let merged = merge_usage(Some(a.clone()), Some(b)).unwrap();
        assert_eq!(merged.total_tokens, 45);
        assert_eq!(merged.cost, Some(0.01));
        assert_eq!(merge_usage(Some(a.clone()), None), Some(a));
        assert_eq!(merge_usage(None, None), None);
    }
}
