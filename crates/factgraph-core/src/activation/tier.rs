//! Retention tiers derived from activation

use serde::{Deserialize, Serialize};

/// Activation strictly above this is Hot
pub const HOT_THRESHOLD: f64 = 2.0;

/// Activation at or above this (and not Hot) is Warm
pub const WARM_THRESHOLD: f64 = 1.0;

/// Read-only classification of a fact by its current activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionTier {
    Hot,
    Warm,
    Cool,
}

impl RetentionTier {
    pub fn classify(activation: f64) -> Self {
        if activation > HOT_THRESHOLD {
            Self::Hot
        } else if activation >= WARM_THRESHOLD {
            Self::Warm
        } else {
            Self::Cool
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cool => "cool",
        }
    }
}

impl std::fmt::Display for RetentionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Number of facts per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub hot: u64,
    pub warm: u64,
    pub cool: u64,
}

impl TierCounts {
    pub fn total(&self) -> u64 {
        self.hot + self.warm + self.cool
    }

    pub fn add(&mut self, tier: RetentionTier) {
        match tier {
            RetentionTier::Hot => self.hot += 1,
            RetentionTier::Warm => self.warm += 1,
            RetentionTier::Cool => self.cool += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(RetentionTier::classify(2.5), RetentionTier::Hot);
        assert_eq!(RetentionTier::classify(2.0), RetentionTier::Warm);
        assert_eq!(RetentionTier::classify(1.0), RetentionTier::Warm);
        assert_eq!(RetentionTier::classify(0.99), RetentionTier::Cool);
        assert_eq!(RetentionTier::classify(0.0), RetentionTier::Cool);
    }

    #[test]
    fn test_tier_counts() {
        let mut counts = TierCounts::default();
        for activation in [3.0, 1.5, 0.2, 0.0] {
            counts.add(RetentionTier::classify(activation));
        }
        assert_eq!(counts, TierCounts { hot: 1, warm: 1, cool: 2 });
        assert_eq!(counts.total(), 4);
    }
}
