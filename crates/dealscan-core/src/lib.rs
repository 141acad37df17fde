pub mod provision;
pub mod report;

pub use provision::{
    classifier::{Classification, ClassifierSignal, DocumentClassifier},
    default_analyzer::{ProvisionAnalyzer, UNCLASSIFIED_FINDING_ID},
    file_repository::{FileRuleRepository, RulePackFile},
    registry::ProvisionRegistry,
    AnalysisReport, Analyzer, Applicability, Category, ConfigurationError, DocumentType,
    EngineConfig, Finding, FindingValidationError, MatchContext, ProvisionRule,
    RecommendedAbsence, ReportSummary, RuleRepository, ScoringPolicy, Severity, Span, TriggerKind,
};
pub use report::{render_classification, render_report, render_rules, OutputFormat};
