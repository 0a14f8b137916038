use serde::Deserialize;

/// Default chat model when the config does not override it.
pub const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4.5";

/// Default embedding model for the retrieval index.
pub const DEFAULT_EMBEDDING_MODEL: &str = "openai/text-embedding-3-small";

/// Completion budget requested per oracle call.
pub const MODEL_MAX_TOKENS: u32 = 16384;

/// API usage information reported by the provider.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Merge two optional Usage values, summing their token counts.
pub fn merge_usage(primary: Option<Usage>, secondary: Option<Usage>) -> Option<Usage> {
    match (primary, secondary) {
        (Some(p), Some(s)) => Some(Usage {
            prompt_tokens: p.prompt_tokens + s.prompt_tokens,
            completion_tokens: p.completion_tokens + s.completion_tokens,
            total_tokens: p.total_tokens + s.total_tokens,
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
    fn test_merge_usage_sums_counts() {
        let a = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        let b = Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        };
        let merged = merge_usage(Some(a), Some(b)).unwrap();
        assert_eq!(merged.total_tokens, 18);
    }

    #[test]
    fn test_merge_usage_handles_missing_sides() {
        assert!(merge_usage(None, None).is_none());
        let only = merge_usage(
            Some(Usage {
                total_tokens: 7,
                ..Default::default()
            }),
            None,
        )
        .unwrap();
        assert_eq!(only.total_tokens, 7);
    }
}
