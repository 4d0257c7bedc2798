//! Per-term gate deciding whether a posting list is worth truncating.

use crate::truncate::config::TriggerConfig;

/// Decides from a term's document frequency whether to truncate it.
///
/// Terms at or below the threshold are copied unmodified. The threshold is
/// never lower than the profile's limit, since shorter lists have nothing to
/// cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveBitmapTrigger {
    threshold: usize,
}

impl AdaptiveBitmapTrigger {
    pub fn new(config: Option<&TriggerConfig>, limit: usize, target_doc_count: u32) -> Self {
        let mut threshold = limit;
        if let Some(config) = config {
            if let Some(min_df) = config.min_doc_freq {
                // Terms with at least `min_df` postings are truncated.
                threshold = threshold.max((min_df as usize).saturating_sub(1));
            }
            if let Some(ratio) = config.min_doc_freq_ratio {
                let min_df = (target_doc_count as f64 * ratio).ceil() as usize;
                threshold = threshold.max(min_df.saturating_sub(1));
            }
        }
        AdaptiveBitmapTrigger { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn need_truncate(&self, doc_freq: usize) -> bool {
        doc_freq > self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_without_config_cuts_above_limit() {
        let trigger = AdaptiveBitmapTrigger::new(None, 3, 100);
        assert!(!trigger.need_truncate(3));
        assert!(trigger.need_truncate(4));
    }

    #[test]
    fn test_min_doc_freq() {
        let config = TriggerConfig {
            min_doc_freq: Some(10),
            min_doc_freq_ratio: None,
        };
        let trigger = AdaptiveBitmapTrigger::new(Some(&config), 3, 100);
        assert!(!trigger.need_truncate(9));
        assert!(trigger.need_truncate(10));
    }

    #[test]
    fn test_ratio() {
        let config = TriggerConfig {
            min_doc_freq: None,
            min_doc_freq_ratio: Some(0.5),
        };
        let trigger = AdaptiveBitmapTrigger::new(Some(&config), 2, 40);
        assert_eq!(trigger.threshold(), 19);
        assert!(trigger.need_truncate(20));
    }
}
