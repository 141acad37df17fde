use serde::{Deserialize, Serialize};

use super::{Applicability, ConfigurationError, DocumentType, ProvisionRule, TriggerKind};

/// Maps a failed rule and trigger kind to a bounded numeric risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub min_score: u8,
    pub max_score: u8,
    /// Subtracted from the base score when a recommended-only provision is absent.
    pub recommended_discount: u8,
    /// Subtracted from the base score when a provision is present but vague.
    pub vague_discount: u8,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            min_score: 1,
            max_score: 10,
            recommended_discount: 2,
            vague_discount: 1,
        }
    }
}

impl ScoringPolicy {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.min_score == 0 || self.min_score > self.max_score || self.max_score > 10 {
            return Err(ConfigurationError::InvalidScoreBounds {
                min_score: self.min_score,
                max_score: self.max_score,
            });
        }
        Ok(())
    }

    /// Score a rule failure. Missing and vague findings never outrank the base score.
    pub fn score(
        &self,
        rule: &ProvisionRule,
        trigger: TriggerKind,
        document_type: DocumentType,
    ) -> u8 {
        let base = rule.base_risk_score;
        let raw = match trigger {
            TriggerKind::Problematic => base,
            TriggerKind::Missing => match rule.applicability(document_type) {
                Applicability::Recommended => base.saturating_sub(self.recommended_discount).max(1),
                _ => base,
            },
            TriggerKind::Vague => base.saturating_sub(self.vague_discount).max(1),
            TriggerKind::Unclassified => self.max_score,
        };
        self.clamp(raw)
    }

    /// Score assigned to the synthetic unclassified-document finding.
    pub fn ceiling(&self) -> u8 {
        self.max_score
    }

    pub fn clamp(&self, score: u8) -> u8 {
        score.max(self.min_score).min(self.max_score)
    }
}
