use tracing::trace;

use super::{
    registry::CompiledRule, Applicability, DocumentType, EngineConfig, Finding, MatchContext,
    RecommendedAbsence, Span, TriggerKind,
};

/// Document text alongside its case-normalised form.
///
/// Normalisation is ASCII-only so byte offsets in the lowered text are valid
/// offsets into the original.
#[derive(Debug, Clone)]
pub struct NormalizedText<'a> {
    original: &'a str,
    lowered: String,
}

impl<'a> NormalizedText<'a> {
    pub fn new(original: &'a str) -> Self {
        Self {
            original,
            lowered: original.to_ascii_lowercase(),
        }
    }

    pub fn original(&self) -> &'a str {
        self.original
    }

    pub fn lowered(&self) -> &str {
        &self.lowered
    }

    pub fn len(&self) -> usize {
        self.original.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }
}

/// Applies one compiled rule to a classified document.
#[derive(Debug, Clone, Copy)]
pub struct RuleEvaluator<'a> {
    config: &'a EngineConfig,
}

impl<'a> RuleEvaluator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Evaluate a rule, producing at most one finding.
    ///
    /// Problematic language outranks absence, which outranks vagueness.
    pub fn evaluate(
        &self,
        compiled: &CompiledRule,
        document: &NormalizedText<'_>,
        document_type: DocumentType,
    ) -> Option<Finding> {
        let rule = compiled.rule();
        let applicability = rule.applicability(document_type);
        let in_scope = applicability != Applicability::Inapplicable;
        let text = document.lowered();

        if in_scope || self.config.problematic_outside_scope {
            if let Some(span) = compiled.find_problematic(text) {
                trace!(rule_id = %rule.id, ?span, "problematic language matched");
                return Some(self.finding(
                    compiled,
                    TriggerKind::Problematic,
                    document_type,
                    Some(span),
                    document,
                ));
            }
        }
        if !in_scope {
            trace!(rule_id = %rule.id, document_type = document_type.as_str(), "rule not applicable");
            return None;
        }

        if compiled.has_presence_patterns() && compiled.find_presence(text).is_none() {
            if !rule.absence_is_flag {
                return None;
            }
            if applicability == Applicability::Recommended
                && self.config.recommended_absence == RecommendedAbsence::Ignore
            {
                trace!(rule_id = %rule.id, "recommended provision absent, ignored by policy");
                return None;
            }
            trace!(rule_id = %rule.id, "provision absent");
            return Some(self.finding(
                compiled,
                TriggerKind::Missing,
                document_type,
                None,
                document,
            ));
        }

        let span = compiled.find_vague(text)?;
        trace!(rule_id = %rule.id, ?span, "vague language matched");
        Some(self.finding(
            compiled,
            TriggerKind::Vague,
            document_type,
            Some(span),
            document,
        ))
    }

    fn finding(
        &self,
        compiled: &CompiledRule,
        trigger: TriggerKind,
        document_type: DocumentType,
        span: Option<Span>,
        document: &NormalizedText<'_>,
    ) -> Finding {
        let rule = compiled.rule();
        let risk_score = self.config.scoring.score(rule, trigger, document_type);
        let context = span.map(|span| {
            extract_context(
                document.original(),
                span,
                self.config.context_window,
                self.config.max_excerpt_chars,
            )
        });
        Finding::from_rule(rule, trigger, risk_score, context)
    }
}

/// Cut the matched span plus `window` characters either side, capped at `max_chars`.
pub fn extract_context(text: &str, span: Span, window: usize, max_chars: usize) -> MatchContext {
    let match_start = floor_char_boundary(text, span.0);
    let match_end = ceil_char_boundary(text, span.1.max(span.0));

    let start = text[..match_start]
        .char_indices()
        .rev()
        .take(window)
        .last()
        .map_or(match_start, |(idx, _)| idx);
    let end = text[match_end..]
        .char_indices()
        .nth(window)
        .map_or(text.len(), |(idx, _)| match_end + idx);

    let excerpt: String = text[start..end].chars().take(max_chars).collect();
    MatchContext {
        span: (match_start, match_end),
        excerpt,
    }
}

fn floor_char_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut cursor = idx;
    while cursor > 0 && !text.is_char_boundary(cursor) {
        cursor -= 1;
    }
    cursor
}

fn ceil_char_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut cursor = idx;
    while cursor < text.len() && !text.is_char_boundary(cursor) {
        cursor += 1;
    }
    cursor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::{test_support::rule, ProvisionRule};

    fn compile(rule: ProvisionRule) -> CompiledRule {
        CompiledRule::compile(rule).expect("test rule should compile")
    }

    fn evaluate_with(
        config: &EngineConfig,
        rule: ProvisionRule,
        text: &str,
        document_type: DocumentType,
    ) -> Option<Finding> {
        RuleEvaluator::new(config).evaluate(&compile(rule), &NormalizedText::new(text), document_type)
    }

    fn evaluate(rule: ProvisionRule, text: &str, document_type: DocumentType) -> Option<Finding> {
        evaluate_with(&EngineConfig::default(), rule, text, document_type)
    }

    fn price_rule() -> ProvisionRule {
        let mut price = rule("purchase_price");
        price.presence_patterns = vec![r"purchase\s+price".into()];
        price.vague_patterns = vec![r"subject\s+to\s+(?:further\s+)?discussion".into()];
        price.problematic_patterns = vec![r"price\s+to\s+be\s+determined\s+by\s+buyer".into()];
        price.base_risk_score = 9;
        price
    }

    #[test]
    fn absent_required_provision_is_missing_without_context() {
        let mut scoped = price_rule();
        scoped.required_in = vec![DocumentType::StockPurchase];
        let finding = evaluate(scoped, "Nothing about money here.", DocumentType::StockPurchase)
            .expect("absence should be flagged");
        assert_eq!(finding.trigger, TriggerKind::Missing);
        assert_eq!(finding.risk_score, 9);
        assert!(finding.context.is_none());
    }

    #[test]
    fn problematic_language_outranks_absence_and_vagueness() {
        let text = "The price to be determined by Buyer, subject to discussion.";
        let finding = evaluate(price_rule(), text, DocumentType::Unknown).unwrap();
        assert_eq!(finding.trigger, TriggerKind::Problematic);
        let context = finding.context.unwrap();
        assert_eq!(
            &text[context.span.0..context.span.1],
            "price to be determined by Buyer"
        );
    }

    #[test]
    fn vague_language_reported_when_present() {
        let text = "The Purchase Price is subject to further discussion.";
        let finding = evaluate(price_rule(), text, DocumentType::Unknown).unwrap();
        assert_eq!(finding.trigger, TriggerKind::Vague);
        assert_eq!(finding.risk_score, 8);
        // Category comes from the rule even for vague findings.
        assert_eq!(finding.category, price_rule().category);
        assert_eq!(
            finding.context.unwrap().excerpt,
            text,
            "short documents fit inside the context window"
        );
    }

    #[test]
    fn present_and_clear_provision_yields_nothing() {
        assert!(evaluate(price_rule(), "The Purchase Price is $5,000,000.", DocumentType::Loi).is_none());
    }

    #[test]
    fn inapplicable_rules_are_skipped_entirely() {
        let mut scoped = price_rule();
        scoped.required_in = vec![DocumentType::StockPurchase];
        let text = "price to be determined by buyer";
        assert!(evaluate(scoped.clone(), text, DocumentType::Loi).is_none());
        assert!(evaluate(scoped.clone(), text, DocumentType::Unknown).is_none());

        let config = EngineConfig {
            problematic_outside_scope: true,
            ..EngineConfig::default()
        };
        let finding = evaluate_with(&config, scoped.clone(), text, DocumentType::Loi).unwrap();
        assert_eq!(finding.trigger, TriggerKind::Problematic);
        // Absence still respects scope.
        assert!(evaluate_with(&config, scoped, "nothing", DocumentType::Loi).is_none());
    }

    #[test]
    fn recommended_absence_follows_policy() {
        let mut scoped = price_rule();
        scoped.recommended_in = vec![DocumentType::Loi];
        let finding = evaluate(scoped.clone(), "nothing", DocumentType::Loi).unwrap();
        assert_eq!(finding.trigger, TriggerKind::Missing);
        assert_eq!(finding.risk_score, 7);

        let config = EngineConfig {
            recommended_absence: RecommendedAbsence::Ignore,
            ..EngineConfig::default()
        };
        assert!(evaluate_with(&config, scoped, "nothing", DocumentType::Loi).is_none());
    }

    #[test]
    fn rules_without_presence_patterns_count_as_present() {
        let mut vague_only = rule("efforts");
        vague_only.presence_patterns.clear();
        vague_only.absence_is_flag = false;
        vague_only.vague_patterns = vec![r"commercially\s+reasonable\s+efforts".into()];

        assert!(evaluate(vague_only.clone(), "best efforts", DocumentType::Unknown).is_none());
        let finding = evaluate(
            vague_only,
            "use Commercially Reasonable Efforts",
            DocumentType::Unknown,
        )
        .unwrap();
        assert_eq!(finding.trigger, TriggerKind::Vague);
    }

    #[test]
    fn absence_without_flag_is_silent() {
        let mut informational = price_rule();
        informational.absence_is_flag = false;
        assert!(evaluate(informational, "nothing", DocumentType::Unknown).is_none());
    }

    #[test]
    fn context_is_windowed_around_match() {
        let text = "aaaaaaaaaa MATCH bbbbbbbbbb";
        let context = extract_context(text, (11, 16), 3, 480);
        assert_eq!(context.span, (11, 16));
        assert_eq!(context.excerpt, "aa MATCH bb");
    }

    #[test]
    fn context_respects_char_boundaries_and_cap() {
        let text = "héllo wörld";
        let context = extract_context(text, (0, 2), 2, 480);
        assert_eq!(context.span, (0, 3));
        assert_eq!(context.excerpt, "héll");

        let capped = extract_context(text, (0, 1), 50, 4);
        assert_eq!(capped.excerpt, "héll");
    }

    #[test]
    fn context_excerpt_preserves_original_casing() {
        let text = "The PRICE TO BE DETERMINED BY BUYER.";
        let finding = evaluate(price_rule(), text, DocumentType::Unknown).unwrap();
        assert!(finding
            .context
            .unwrap()
            .excerpt
            .contains("PRICE TO BE DETERMINED BY BUYER"));
    }
}
