//! RetryPolicy - リトライ上限と能力ティアの昇格

/// Retry policy for failed tasks.
///
/// A failure here means a release with an error: a nonzero runner exit or a
/// spawn error. There is no backoff; a released task is eligible again on
/// the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Records with `retry_count >= max_retries` are no longer dispatched.
    pub max_retries: u32,

    /// Capability tiers, cheapest first.
    pub tiers: Vec<String>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, tiers: Vec<String>) -> Self {
        Self { max_retries, tiers }
    }

    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Tier for the next launch: `tiers[retry_count % len]`, so each failure
    /// moves one step up and wraps around.
    pub fn tier_for(&self, retry_count: u32) -> &str {
        if self.tiers.is_empty() {
            return "";
        }
        let idx = retry_count as usize % self.tiers.len();
        &self.tiers[idx]
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, vec!["sonnet".to_string(), "opus".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.tiers, vec!["sonnet", "opus"]);
    }

    #[rstest]
    #[case(0, false)]
    #[case(2, false)]
    #[case(3, true)]
    #[case(7, true)]
    fn exhaustion(#[case] retries: u32, #[case] exhausted: bool) {
        assert_eq!(RetryPolicy::default().is_exhausted(retries), exhausted);
    }

    #[rstest]
    #[case(0, "sonnet")]
    #[case(1, "opus")]
    #[case(2, "sonnet")]
    fn tier_escalates_and_wraps(#[case] retries: u32, #[case] tier: &str) {
        assert_eq!(RetryPolicy::default().tier_for(retries), tier);
    }
}
