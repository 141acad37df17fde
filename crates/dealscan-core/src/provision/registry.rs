use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use tracing::{debug, info};

use super::{ConfigurationError, ProvisionRule, RuleRepository, Span};

/// A validated rule with every pattern compiled case-insensitively.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: ProvisionRule,
    presence: Vec<Regex>,
    vague: Vec<Regex>,
    problematic: Vec<Regex>,
}

impl CompiledRule {
    pub fn compile(rule: ProvisionRule) -> Result<Self, ConfigurationError> {
        rule.validate()?;
        let presence = compile_patterns(&rule.id, &rule.presence_patterns)?;
        let vague = compile_patterns(&rule.id, &rule.vague_patterns)?;
        let problematic = compile_patterns(&rule.id, &rule.problematic_patterns)?;
        Ok(Self {
            rule,
            presence,
            vague,
            problematic,
        })
    }

    pub fn rule(&self) -> &ProvisionRule {
        &self.rule
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    /// Rules without presence patterns are treated as always present.
    pub fn has_presence_patterns(&self) -> bool {
        !self.presence.is_empty()
    }

    pub fn find_presence(&self, text: &str) -> Option<Span> {
        first_match(&self.presence, text)
    }

    pub fn find_vague(&self, text: &str) -> Option<Span> {
        first_match(&self.vague, text)
    }

    pub fn find_problematic(&self, text: &str) -> Option<Span> {
        first_match(&self.problematic, text)
    }
}

fn compile_patterns(rule_id: &str, patterns: &[String]) -> Result<Vec<Regex>, ConfigurationError> {
    patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|err| ConfigurationError::InvalidPattern {
                    rule_id: rule_id.to_string(),
                    pattern: pattern.clone(),
                    reason: err.to_string(),
                })
        })
        .collect()
}

/// First pattern in declaration order that matches, at its leftmost non-empty match.
fn first_match(patterns: &[Regex], text: &str) -> Option<Span> {
    patterns.iter().find_map(|regex| {
        regex
            .find_iter(text)
            .find(|mat| mat.start() < mat.end())
            .map(|mat| (mat.start(), mat.end()))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Pending,
    Active,
    Done,
}

/// Immutable, validated collection of provision rules in pack order.
#[derive(Debug, Clone, Default)]
pub struct ProvisionRegistry {
    rules: Vec<CompiledRule>,
    index: HashMap<String, usize>,
}

impl ProvisionRegistry {
    /// Validate and compile every rule. Any invalid rule rejects the whole set.
    pub fn new(rules: Vec<ProvisionRule>) -> Result<Self, ConfigurationError> {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut index = HashMap::with_capacity(rules.len());
        for rule in rules {
            if index.contains_key(&rule.id) {
                return Err(ConfigurationError::DuplicateId { rule_id: rule.id });
            }
            index.insert(rule.id.clone(), compiled.len());
            compiled.push(CompiledRule::compile(rule)?);
        }

        let registry = Self {
            rules: compiled,
            index,
        };
        registry.check_acyclic()?;
        registry.log_diagnostics();
        Ok(registry)
    }

    /// Load rules from a repository and build the registry from them.
    pub async fn load<R>(repo: &R) -> Result<Self>
    where
        R: RuleRepository + ?Sized,
    {
        let rules = repo.load_rules().await?;
        let registry = Self::new(rules).context("rule pack failed validation")?;
        info!(rules = registry.len(), "provision registry ready");
        Ok(registry)
    }

    pub fn all_rules(&self) -> impl ExactSizeIterator<Item = &ProvisionRule> + '_ {
        self.rules.iter().map(CompiledRule::rule)
    }

    pub fn compiled(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn get(&self, rule_id: &str) -> Option<&ProvisionRule> {
        self.index
            .get(rule_id)
            .map(|position| self.rules[*position].rule())
    }

    /// Position of a rule in pack order.
    pub fn position(&self, rule_id: &str) -> Option<usize> {
        self.index.get(rule_id).copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Distinct section names in order of first appearance.
    pub fn sections(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.all_rules()
            .map(|rule| rule.section.as_str())
            .filter(|section| !section.is_empty() && seen.insert(*section))
            .collect()
    }

    /// Depth-first walk over related-provision links between loaded rules.
    fn check_acyclic(&self) -> Result<(), ConfigurationError> {
        let mut marks = vec![Visit::Pending; self.rules.len()];
        let mut path = Vec::new();
        for position in 0..self.rules.len() {
            self.visit(position, &mut marks, &mut path)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        position: usize,
        marks: &mut [Visit],
        path: &mut Vec<usize>,
    ) -> Result<(), ConfigurationError> {
        match marks[position] {
            Visit::Done => return Ok(()),
            Visit::Active => {
                let start = path.iter().position(|p| *p == position).unwrap_or(0);
                let cycle: Vec<String> = path[start..]
                    .iter()
                    .chain(std::iter::once(&position))
                    .map(|p| self.rules[*p].id().to_string())
                    .collect();
                return Err(ConfigurationError::CyclicReference { path: cycle });
            }
            Visit::Pending => {}
        }

        marks[position] = Visit::Active;
        path.push(position);
        for related in &self.rules[position].rule().related_provisions {
            // Ids outside the registry are reported by `log_diagnostics`.
            if let Some(next) = self.index.get(related) {
                self.visit(*next, marks, path)?;
            }
        }
        path.pop();
        marks[position] = Visit::Done;
        Ok(())
    }

    fn log_diagnostics(&self) {
        for rule in self.all_rules() {
            for related in &rule.related_provisions {
                if !self.index.contains_key(related) {
                    debug!(rule_id = %rule.id, %related, "related provision not present in registry");
                }
            }
            let can_fire = rule.absence_is_flag
                || !rule.vague_patterns.is_empty()
                || !rule.problematic_patterns.is_empty();
            if !can_fire {
                debug!(rule_id = %rule.id, "rule only records presence and never produces findings");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::test_support::rule;
    use async_trait::async_trait;

    #[test]
    fn preserves_pack_order_and_indexes_ids() {
        let registry =
            ProvisionRegistry::new(vec![rule("escrow"), rule("earnout"), rule("tax")]).unwrap();
        let ids: Vec<_> = registry.all_rules().map(|rule| rule.id.as_str()).collect();
        assert_eq!(ids, vec!["escrow", "earnout", "tax"]);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.position("tax"), Some(2));
        assert_eq!(registry.get("earnout").map(|r| r.id.as_str()), Some("earnout"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = ProvisionRegistry::new(vec![rule("escrow"), rule("escrow")]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::DuplicateId {
                rule_id: "escrow".into()
            }
        );
    }

    #[test]
    fn rejects_patterns_the_engine_cannot_compile() {
        let mut unbalanced = rule("escrow");
        unbalanced.presence_patterns = vec![r"escrow\s+(amount".into()];
        let err = ProvisionRegistry::new(vec![unbalanced]).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::InvalidPattern { ref rule_id, ref pattern, .. }
                if rule_id == "escrow" && pattern == r"escrow\s+(amount"
        ));

        let mut lookaround = rule("ordinary_course");
        lookaround.vague_patterns = vec![r"ordinary\s+course(?!\s+of\s+business)".into()];
        assert!(matches!(
            ProvisionRegistry::new(vec![lookaround]),
            Err(ConfigurationError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn one_invalid_rule_rejects_the_whole_set() {
        let mut invalid = rule("tax");
        invalid.base_risk_score = 0;
        assert!(ProvisionRegistry::new(vec![rule("escrow"), invalid]).is_err());
    }

    #[test]
    fn matching_is_case_insensitive_and_skips_empty_matches() {
        let mut scoped = rule("escrow");
        scoped.presence_patterns = vec![r"x*".into(), r"Escrow\s+Clause".into()];
        let registry = ProvisionRegistry::new(vec![scoped]).unwrap();
        let compiled = &registry.compiled()[0];
        assert_eq!(compiled.find_presence("the ESCROW CLAUSE"), Some((4, 17)));
        assert_eq!(compiled.find_presence("no match"), None);
    }

    #[test]
    fn first_declared_pattern_wins_over_earlier_match() {
        let mut scoped = rule("price");
        scoped.vague_patterns = vec![r"tbd".into(), r"approximately".into()];
        let registry = ProvisionRegistry::new(vec![scoped]).unwrap();
        let text = "approximately $5m, closing date tbd";
        let span = registry.compiled()[0].find_vague(text).unwrap();
        assert_eq!(&text[span.0..span.1], "tbd");
    }

    #[test]
    fn sections_are_listed_once_in_first_seen_order() {
        let mut a = rule("escrow");
        a.section = "Purchase Price".into();
        let mut b = rule("earnout");
        b.section = "Purchase Price".into();
        let mut c = rule("tax");
        c.section = "Covenants".into();
        let registry = ProvisionRegistry::new(vec![a, b, c]).unwrap();
        assert_eq!(registry.sections(), vec!["Purchase Price", "Covenants"]);
    }

    #[test]
    fn rejects_mutual_related_references() {
        let mut a = rule("escrow");
        a.related_provisions = vec!["earnout".into()];
        let mut b = rule("earnout");
        b.related_provisions = vec!["escrow".into()];
        assert_eq!(
            ProvisionRegistry::new(vec![a, b]).unwrap_err(),
            ConfigurationError::CyclicReference {
                path: vec!["escrow".into(), "earnout".into(), "escrow".into()]
            }
        );
    }

    #[test]
    fn rejects_longer_related_cycles() {
        let mut a = rule("escrow");
        a.related_provisions = vec!["earnout".into()];
        let mut b = rule("earnout");
        b.related_provisions = vec!["tax".into()];
        let mut c = rule("tax");
        c.related_provisions = vec!["escrow".into()];
        let err = ProvisionRegistry::new(vec![a, b, c]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "related provisions form a cycle: escrow -> earnout -> tax -> escrow"
        );
    }

    #[test]
    fn shared_and_unknown_related_references_are_allowed() {
        let mut a = rule("escrow");
        a.related_provisions = vec!["earnout".into(), "tax".into(), "not_loaded".into()];
        let mut b = rule("earnout");
        b.related_provisions = vec!["tax".into(), "not_loaded".into()];
        let registry = ProvisionRegistry::new(vec![a, b, rule("tax")]).unwrap();
        assert_eq!(registry.len(), 3);
    }

    struct StaticRepo {
        rules: Vec<ProvisionRule>,
    }

    #[async_trait]
    impl RuleRepository for StaticRepo {
        async fn load_rules(&self) -> Result<Vec<ProvisionRule>> {
            Ok(self.rules.clone())
        }

        async fn get_rule(&self, rule_id: &str) -> Result<Option<ProvisionRule>> {
            Ok(self.rules.iter().find(|rule| rule.id == rule_id).cloned())
        }
    }

    #[tokio::test]
    async fn loads_from_repository() {
        let repo = StaticRepo {
            rules: vec![rule("escrow"), rule("earnout")],
        };
        let registry = ProvisionRegistry::load(&repo).await.unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn repository_validation_errors_carry_context() {
        let repo = StaticRepo {
            rules: vec![rule("escrow"), rule("escrow")],
        };
        let err = ProvisionRegistry::load(&repo).await.unwrap_err();
        assert!(err.to_string().contains("rule pack failed validation"));
        assert!(matches!(
            err.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::DuplicateId { .. })
        ));
    }
}
