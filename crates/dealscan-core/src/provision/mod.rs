use std::{cmp::Ordering, fmt};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod classifier;
pub mod default_analyzer;
pub mod evaluator;
pub mod file_repository;
pub mod registry;
pub mod scoring;

pub use scoring::ScoringPolicy;

/// Byte span within the analyzed text `(start, end)` where `start <= end`.
pub type Span = (usize, usize);

/// Kind of transaction document the engine recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Loi,
    TermSheet,
    StockPurchase,
    AssetPurchase,
    MergerAgreement,
    Unknown,
}

impl DocumentType {
    /// Every type a classifier can produce, in tie-break order.
    pub const CLASSIFIED: [DocumentType; 5] = [
        DocumentType::Loi,
        DocumentType::TermSheet,
        DocumentType::StockPurchase,
        DocumentType::AssetPurchase,
        DocumentType::MergerAgreement,
    ];

    /// Letters of intent and term sheets precede a definitive agreement.
    pub fn is_preliminary(self) -> bool {
        matches!(self, Self::Loi | Self::TermSheet)
    }

    /// Stable machine identifier, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loi => "loi",
            Self::TermSheet => "term_sheet",
            Self::StockPurchase => "stock_purchase",
            Self::AssetPurchase => "asset_purchase",
            Self::MergerAgreement => "merger_agreement",
            Self::Unknown => "unknown",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Loi => "Letter of Intent",
            Self::TermSheet => "Term Sheet",
            Self::StockPurchase => "Stock Purchase Agreement",
            Self::AssetPurchase => "Asset Purchase Agreement",
            Self::MergerAgreement => "Merger Agreement",
            Self::Unknown => "Unknown",
        }
    }

    pub(crate) fn classified_index(self) -> Option<usize> {
        Self::CLASSIFIED.iter().position(|candidate| *candidate == self)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Qualitative severity of a finding. `Critical` is the greatest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Declaration order, most severe first.
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
            Self::Info => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Info => "INFO",
        }
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a finding was raised; orthogonal to severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    MissingProvision,
    VagueLanguage,
    UnfavorableTerms,
    StructuralIssue,
    ComplianceRisk,
    FinancialRisk,
    TimelineIssue,
    Ambiguity,
    NonStandard,
    IncompleteDefinition,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingProvision => "missing_provision",
            Self::VagueLanguage => "vague_language",
            Self::UnfavorableTerms => "unfavorable_terms",
            Self::StructuralIssue => "structural_issue",
            Self::ComplianceRisk => "compliance_risk",
            Self::FinancialRisk => "financial_risk",
            Self::TimelineIssue => "timeline_issue",
            Self::Ambiguity => "ambiguity",
            Self::NonStandard => "non_standard",
            Self::IncompleteDefinition => "incomplete_definition",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rule relates to a given document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    Required,
    Recommended,
    /// The rule declares no document-type allow-list.
    Unrestricted,
    Inapplicable,
}

/// The reason a finding was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Problematic,
    Missing,
    Vague,
    /// Synthesised once per report when no document type could be determined.
    Unclassified,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Problematic => "problematic",
            Self::Missing => "missing",
            Self::Vague => "vague",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Definition of a single provision check, as supplied by a rule pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionRule {
    /// Unique identifier (snake case, e.g. `binding_nonbinding_designation`).
    pub id: String,
    /// Human-readable title shown in reports.
    pub name: String,
    /// Rule-pack section the rule belongs to. Informational only.
    #[serde(default)]
    pub section: String,
    pub description: String,
    pub severity: Severity,
    pub category: Category,
    /// Any match marks the provision as present.
    #[serde(default)]
    pub presence_patterns: Vec<String>,
    /// Any match flags the provision as vaguely drafted, even when present.
    #[serde(default)]
    pub vague_patterns: Vec<String>,
    /// Any match flags the document regardless of presence.
    #[serde(default)]
    pub problematic_patterns: Vec<String>,
    /// Flag the document when no presence pattern matches.
    #[serde(default)]
    pub absence_is_flag: bool,
    #[serde(default)]
    pub required_in: Vec<DocumentType>,
    #[serde(default)]
    pub recommended_in: Vec<DocumentType>,
    /// Baseline risk contribution (1..=10 inclusive).
    pub base_risk_score: u8,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_perspective: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_perspective: Option<String>,
    /// Cross references to other rule ids. Never traversed by the engine.
    #[serde(default)]
    pub related_provisions: Vec<String>,
    /// Finer-grained requirements reported alongside a failed rule.
    #[serde(default)]
    pub sub_checks: Vec<String>,
}

impl ProvisionRule {
    /// Lowest and highest accepted `base_risk_score`.
    pub const RISK_SCORE_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

    /// Resolve whether this rule is required, recommended or inapplicable for a document type.
    pub fn applicability(&self, document_type: DocumentType) -> Applicability {
        if !self.is_restricted() {
            Applicability::Unrestricted
        } else if self.required_in.contains(&document_type) {
            Applicability::Required
        } else if self.recommended_in.contains(&document_type) {
            Applicability::Recommended
        } else {
            Applicability::Inapplicable
        }
    }

    /// True when the rule carries a `required_in` or `recommended_in` allow-list.
    pub fn is_restricted(&self) -> bool {
        !self.required_in.is_empty() || !self.recommended_in.is_empty()
    }

    /// Validate structural invariants. Pattern compilation is checked by the registry.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.id.trim().is_empty() {
            return Err(ConfigurationError::EmptyId);
        }
        if !Self::RISK_SCORE_RANGE.contains(&self.base_risk_score) {
            return Err(ConfigurationError::InvalidRiskScore {
                rule_id: self.id.clone(),
                score: self.base_risk_score,
            });
        }
        let has_patterns = !self.presence_patterns.is_empty()
            || !self.vague_patterns.is_empty()
            || !self.problematic_patterns.is_empty();
        if !has_patterns && !self.absence_is_flag {
            return Err(ConfigurationError::NoDetectionCriteria {
                rule_id: self.id.clone(),
            });
        }
        if self.absence_is_flag && self.presence_patterns.is_empty() {
            return Err(ConfigurationError::AbsenceWithoutPresence {
                rule_id: self.id.clone(),
            });
        }
        if self
            .presence_patterns
            .iter()
            .chain(&self.vague_patterns)
            .chain(&self.problematic_patterns)
            .any(|pattern| pattern.trim().is_empty())
        {
            return Err(ConfigurationError::EmptyPattern {
                rule_id: self.id.clone(),
            });
        }
        if self
            .required_in
            .iter()
            .chain(&self.recommended_in)
            .any(|doc| *doc == DocumentType::Unknown)
        {
            return Err(ConfigurationError::UnknownApplicability {
                rule_id: self.id.clone(),
            });
        }
        if let Some(document_type) = self
            .required_in
            .iter()
            .find(|doc| self.recommended_in.contains(doc))
        {
            return Err(ConfigurationError::ConflictingApplicability {
                rule_id: self.id.clone(),
                document_type: *document_type,
            });
        }
        if self.related_provisions.iter().any(|related| *related == self.id) {
            return Err(ConfigurationError::SelfReference {
                rule_id: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// Fatal rule-pack problems, surfaced before any document is analyzed.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigurationError {
    #[error("rule id must not be blank")]
    EmptyId,
    #[error("duplicate rule id `{rule_id}`")]
    DuplicateId { rule_id: String },
    #[error("rule `{rule_id}` base_risk_score must be within 1..=10 (got {score})")]
    InvalidRiskScore { rule_id: String, score: u8 },
    #[error("rule `{rule_id}` declares no patterns and does not flag absence")]
    NoDetectionCriteria { rule_id: String },
    #[error("rule `{rule_id}` flags absence but has no presence patterns to test")]
    AbsenceWithoutPresence { rule_id: String },
    #[error("rule `{rule_id}` contains an empty pattern")]
    EmptyPattern { rule_id: String },
    #[error("rule `{rule_id}` lists `unknown` as a required or recommended document type")]
    UnknownApplicability { rule_id: String },
    #[error("rule `{rule_id}` lists `{document_type}` as both required and recommended")]
    ConflictingApplicability {
        rule_id: String,
        document_type: DocumentType,
    },
    #[error("rule `{rule_id}` lists itself as a related provision")]
    SelfReference { rule_id: String },
    #[error("related provisions form a cycle: {}", .path.join(" -> "))]
    CyclicReference { path: Vec<String> },
    #[error("rule `{rule_id}` has invalid pattern `{pattern}`: {reason}")]
    InvalidPattern {
        rule_id: String,
        pattern: String,
        reason: String,
    },
    #[error("classifier signal `{phrase}` is invalid: {reason}")]
    InvalidSignal { phrase: String, reason: String },
    #[error("scoring bounds must satisfy 1 <= min_score <= max_score <= 10 (got {min_score}..={max_score})")]
    InvalidScoreBounds { min_score: u8, max_score: u8 },
}

/// Matched text plus surrounding characters, cut from the original input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchContext {
    pub span: Span,
    pub excerpt: String,
}

/// A provision issue raised against one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub provision_id: String,
    pub provision_name: String,
    pub severity: Severity,
    pub category: Category,
    pub trigger: TriggerKind,
    pub risk_score: u8,
    pub description: String,
    pub recommendation: String,
    /// `None` for absence-based findings.
    pub context: Option<MatchContext>,
    /// Unscored sub-check placeholders inherited from the rule.
    pub sub_checks: Vec<String>,
}

impl Finding {
    /// Build a finding that copies the rule's qualitative classification verbatim.
    pub fn from_rule(
        rule: &ProvisionRule,
        trigger: TriggerKind,
        risk_score: u8,
        context: Option<MatchContext>,
    ) -> Self {
        Self {
            provision_id: rule.id.clone(),
            provision_name: rule.name.clone(),
            severity: rule.severity,
            category: rule.category,
            trigger,
            risk_score,
            description: rule.description.clone(),
            recommendation: rule.recommendation.clone(),
            context,
            sub_checks: rule.sub_checks.clone(),
        }
    }

    /// Validate span invariants and score bounds.
    pub fn validate(&self, scoring: &ScoringPolicy) -> Result<(), FindingValidationError> {
        if let Some(context) = &self.context {
            if context.span.0 > context.span.1 {
                return Err(FindingValidationError::InvalidSpan {
                    provision_id: self.provision_id.clone(),
                    span: context.span,
                });
            }
        }
        if !(scoring.min_score..=scoring.max_score).contains(&self.risk_score) {
            return Err(FindingValidationError::ScoreOutOfBounds {
                provision_id: self.provision_id.clone(),
                risk_score: self.risk_score,
            });
        }
        Ok(())
    }
}

/// Validation errors for findings emitted by the analyzer.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingValidationError {
    #[error("finding for `{provision_id}` has invalid span ({span:?})")]
    InvalidSpan { provision_id: String, span: Span },
    #[error("finding for `{provision_id}` risk score {risk_score} is outside the configured bounds")]
    ScoreOutOfBounds { provision_id: String, risk_score: u8 },
}

/// Whether a recommended-only provision that is absent still produces a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAbsence {
    /// Flag with the reduced recommended-only score.
    #[default]
    Flag,
    Ignore,
}

/// Tunable engine behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Characters of surrounding text captured on each side of a match.
    pub context_window: usize,
    /// Upper bound on excerpt length, in characters.
    pub max_excerpt_chars: usize,
    pub scoring: ScoringPolicy,
    pub recommended_absence: RecommendedAbsence,
    /// Check problematic patterns even for rules inapplicable to the document type.
    pub problematic_outside_scope: bool,
    /// Evaluate rules on the rayon thread pool.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_window: 80,
            max_excerpt_chars: 480,
            scoring: ScoringPolicy::default(),
            recommended_absence: RecommendedAbsence::Flag,
            problematic_outside_scope: false,
            parallel: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.scoring.validate()
    }
}

/// Finding counts per severity plus the highest risk score in a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
    pub highest_risk_score: Option<u8>,
}

impl ReportSummary {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self {
            total: findings.len(),
            ..Self::default()
        };
        for finding in findings {
            match finding.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Info => summary.info += 1,
            }
        }
        summary.highest_risk_score = findings.iter().map(|finding| finding.risk_score).max();
        summary
    }

    pub fn count(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

/// End-to-end result of analyzing one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub document_type: DocumentType,
    /// Classifier signal phrases found in the document.
    pub signals: Vec<String>,
    /// Ordered by severity, then base risk, then registry order.
    pub findings: Vec<Finding>,
    pub analyzed_len: usize,
    pub rules_evaluated: usize,
    pub summary: ReportSummary,
}

impl AnalysisReport {
    pub fn new(
        document_type: DocumentType,
        signals: Vec<String>,
        findings: Vec<Finding>,
        analyzed_len: usize,
        rules_evaluated: usize,
    ) -> Self {
        let summary = ReportSummary::from_findings(&findings);
        Self {
            document_type,
            signals,
            findings,
            analyzed_len,
            rules_evaluated,
            summary,
        }
    }

    pub fn finding(&self, provision_id: &str) -> Option<&Finding> {
        self.findings
            .iter()
            .find(|finding| finding.provision_id == provision_id)
    }
}

/// Abstraction over rule loading so different backends (files, HTTP, in-memory) can be swapped transparently.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Retrieve the full rule set in pack order.
    async fn load_rules(&self) -> AnyResult<Vec<ProvisionRule>>;

    /// Fetch a single rule by identifier if it exists.
    async fn get_rule(&self, rule_id: &str) -> AnyResult<Option<ProvisionRule>>;
}

/// Primary analysis interface that transforms document text into a structured report.
pub trait Analyzer: Send + Sync {
    /// Analyze UTF-8 document text. Total over any input for a valid registry.
    fn analyze(&self, input: &str) -> AnalysisReport;
}
