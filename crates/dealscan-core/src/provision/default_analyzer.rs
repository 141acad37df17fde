use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, instrument, trace};

use super::{
    classifier::DocumentClassifier,
    evaluator::{NormalizedText, RuleEvaluator},
    registry::{CompiledRule, ProvisionRegistry},
    AnalysisReport, Analyzer, Category, ConfigurationError, DocumentType, EngineConfig, Finding,
    Severity, TriggerKind,
};

/// Identifier of the synthetic finding raised for unclassifiable documents.
pub const UNCLASSIFIED_FINDING_ID: &str = "document_classification";

/// Analyzer that classifies a document and evaluates every registry rule against it.
pub struct ProvisionAnalyzer {
    registry: Arc<ProvisionRegistry>,
    classifier: DocumentClassifier,
    config: EngineConfig,
}

struct RankedFinding {
    order: usize,
    base_risk: u8,
    finding: Finding,
}

impl ProvisionAnalyzer {
    pub fn new(registry: Arc<ProvisionRegistry>) -> Result<Self, ConfigurationError> {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(
        registry: Arc<ProvisionRegistry>,
        config: EngineConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            registry,
            classifier: DocumentClassifier::new()?,
            config,
        })
    }

    pub fn with_classifier(mut self, classifier: DocumentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn registry(&self) -> &ProvisionRegistry {
        &self.registry
    }

    pub fn classifier(&self) -> &DocumentClassifier {
        &self.classifier
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn evaluate_rules(
        &self,
        document: &NormalizedText<'_>,
        document_type: DocumentType,
    ) -> Vec<RankedFinding> {
        let evaluator = RuleEvaluator::new(&self.config);
        let evaluate = |(position, compiled): (usize, &CompiledRule)| {
            trace!(rule_id = %compiled.id(), "evaluating provision");
            evaluator
                .evaluate(compiled, document, document_type)
                .map(|finding| RankedFinding {
                    order: position + 1,
                    base_risk: compiled.rule().base_risk_score,
                    finding,
                })
        };

        let compiled = self.registry.compiled();
        if self.config.parallel {
            compiled.par_iter().enumerate().filter_map(&evaluate).collect()
        } else {
            compiled.iter().enumerate().filter_map(&evaluate).collect()
        }
    }

    fn unclassified_finding(&self) -> RankedFinding {
        let risk_score = self.config.scoring.ceiling();
        RankedFinding {
            order: 0,
            base_risk: risk_score,
            finding: Finding {
                provision_id: UNCLASSIFIED_FINDING_ID.into(),
                provision_name: "Document Classification".into(),
                severity: Severity::Critical,
                category: Category::StructuralIssue,
                trigger: TriggerKind::Unclassified,
                risk_score,
                description: "The document could not be identified as a letter of intent, term \
                              sheet, purchase agreement or merger agreement. Only provisions \
                              without document-type restrictions were evaluated."
                    .into(),
                recommendation: "Title the document clearly and confirm its type before relying \
                                 on this analysis."
                    .into(),
                context: None,
                sub_checks: Vec::new(),
            },
        }
    }
}

impl Analyzer for ProvisionAnalyzer {
    #[instrument(name = "analyze_document", skip(self, input), fields(input_len = input.len()))]
    fn analyze(&self, input: &str) -> AnalysisReport {
        let document = NormalizedText::new(input);
        let classification = self.classifier.classify_with_signals(document.lowered());
        let document_type = classification.document_type;
        debug!(document_type = document_type.as_str(), "document classified");

        let mut ranked = self.evaluate_rules(&document, document_type);
        if document_type == DocumentType::Unknown {
            ranked.push(self.unclassified_finding());
        }

        ranked.sort_by(|a, b| {
            b.finding
                .severity
                .cmp(&a.finding.severity)
                .then_with(|| b.base_risk.cmp(&a.base_risk))
                .then_with(|| a.order.cmp(&b.order))
        });
        let findings: Vec<_> = ranked.into_iter().map(|ranked| ranked.finding).collect();

        let report = AnalysisReport::new(
            document_type,
            classification.signals,
            findings,
            document.len(),
            self.registry.len(),
        );
        debug!(
            findings = report.findings.len(),
            critical = report.summary.critical,
            "analysis completed"
        );
        report
    }
}
