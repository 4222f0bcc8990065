use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token accounting for a single generation call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        TokenUsage {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: Self) -> Self::Output {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Per-run usage ledger, owned by a single pipeline run
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageTracker {
    calls: u32,
    stages: Vec<(&'static str, TokenUsage)>,
}

impl UsageTracker {
    pub fn record(&mut self, stage: &'static str, usage: TokenUsage, calls: u32) {
        self.calls += calls;
        match self.stages.iter_mut().find(|(name, _)| *name == stage) {
            Some((_, total)) => *total += usage,
            None => self.stages.push((stage, usage)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    pub fn total(&self) -> TokenUsage {
        self.stages
            .iter()
            .fold(TokenUsage::default(), |acc, (_, usage)| acc + *usage)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let stages = self
            .stages
            .iter()
            .map(|(name, usage)| (name.to_string(), serde_json::json!(usage)))
            .collect::<serde_json::Map<_, _>>();

        serde_json::json!({
            "calls": self.calls,
            "total": self.total(),
            "stages": stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_aggregates_per_stage() {
        let mut tracker = UsageTracker::default();
        tracker.record("scoring", TokenUsage::new(100, 20), 1);
        tracker.record("writing", TokenUsage::new(400, 900), 1);
        tracker.record("writing", TokenUsage::new(50, 30), 1);

        assert_eq!(tracker.calls(), 3);
        assert_eq!(tracker.total(), TokenUsage::new(550, 950));

        let json = tracker.to_json();
        assert_eq!(json["stages"]["writing"]["prompt_tokens"], 450);
        assert_eq!(json["total"]["completion_tokens"], 950);
    }

    #[test]
    fn test_fresh_tracker_is_empty() {
        let tracker = UsageTracker::default();
        assert_eq!(tracker.calls(), 0);
        assert_eq!(tracker.total().total(), 0);
    }
}
