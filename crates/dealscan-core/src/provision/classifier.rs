use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{ConfigurationError, DocumentType};

/// Phrase whose presence counts toward a document type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierSignal {
    pub phrase: String,
    pub document_type: DocumentType,
    pub weight: u32,
}

impl ClassifierSignal {
    pub fn new(phrase: impl Into<String>, document_type: DocumentType, weight: u32) -> Self {
        Self {
            phrase: phrase.into(),
            document_type,
            weight,
        }
    }
}

/// Built-in signal table. Titles carry more weight than incidental wording.
pub fn default_signals() -> Vec<ClassifierSignal> {
    use DocumentType::*;
    vec![
        ClassifierSignal::new("letter of intent", Loi, 3),
        ClassifierSignal::new("memorandum of understanding", Loi, 2),
        ClassifierSignal::new("non-binding", Loi, 1),
        ClassifierSignal::new("not binding", Loi, 1),
        ClassifierSignal::new("term sheet", TermSheet, 3),
        ClassifierSignal::new("summary of terms", TermSheet, 2),
        ClassifierSignal::new("stock purchase agreement", StockPurchase, 3),
        ClassifierSignal::new("share purchase agreement", StockPurchase, 3),
        ClassifierSignal::new("indemnification", StockPurchase, 1),
        ClassifierSignal::new("asset purchase agreement", AssetPurchase, 3),
        ClassifierSignal::new("merger agreement", MergerAgreement, 3),
        ClassifierSignal::new("agreement and plan of merger", MergerAgreement, 3),
    ]
}

/// Outcome of classification together with the phrases that drove it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub document_type: DocumentType,
    /// Matched signal phrases in table order, each listed once.
    pub signals: Vec<String>,
}

/// Assigns exactly one [`DocumentType`] to a document using weighted phrase signals.
#[derive(Debug, Clone)]
pub struct DocumentClassifier {
    automaton: AhoCorasick,
    signals: Vec<ClassifierSignal>,
}

impl DocumentClassifier {
    pub fn new() -> Result<Self, ConfigurationError> {
        Self::with_signals(default_signals())
    }

    pub fn with_signals(signals: Vec<ClassifierSignal>) -> Result<Self, ConfigurationError> {
        for signal in &signals {
            let reason = if signal.phrase.trim().is_empty() {
                Some("phrase must not be blank")
            } else if signal.document_type == DocumentType::Unknown {
                Some("signals cannot point at the unknown document type")
            } else if signal.weight == 0 {
                Some("weight must be positive")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ConfigurationError::InvalidSignal {
                    phrase: signal.phrase.clone(),
                    reason: reason.into(),
                });
            }
        }

        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(signals.iter().map(|signal| signal.phrase.as_str()))
            .map_err(|err| ConfigurationError::InvalidSignal {
                phrase: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self { automaton, signals })
    }

    pub fn signals(&self) -> &[ClassifierSignal] {
        &self.signals
    }

    pub fn classify(&self, text: &str) -> DocumentType {
        self.classify_with_signals(text).document_type
    }

    /// Preliminary types win whenever any of their signals fire; otherwise the
    /// highest-scoring definitive type wins. Ties go to the earlier type.
    pub fn classify_with_signals(&self, text: &str) -> Classification {
        let mut matched = vec![false; self.signals.len()];
        for mat in self.automaton.find_overlapping_iter(text) {
            matched[mat.pattern().as_usize()] = true;
        }

        let mut scores = [0u32; DocumentType::CLASSIFIED.len()];
        let mut phrases = Vec::new();
        for (signal, _) in self
            .signals
            .iter()
            .zip(&matched)
            .filter(|(_, matched)| **matched)
        {
            if let Some(index) = signal.document_type.classified_index() {
                scores[index] = scores[index].saturating_add(signal.weight);
            }
            phrases.push(signal.phrase.clone());
        }

        let preliminary_hit = DocumentType::CLASSIFIED
            .iter()
            .zip(&scores)
            .any(|(doc, score)| doc.is_preliminary() && *score > 0);

        let mut best = (DocumentType::Unknown, 0u32);
        for (doc, score) in DocumentType::CLASSIFIED.iter().zip(scores) {
            if doc.is_preliminary() != preliminary_hit {
                continue;
            }
            if score > best.1 {
                best = (*doc, score);
            }
        }

        trace!(document_type = best.0.as_str(), score = best.1, ?phrases, "document classified");
        Classification {
            document_type: best.0,
            signals: phrases,
        }
    }
}
