use std::fmt::Write;

use serde::Serialize;

use crate::provision::{
    classifier::Classification, AnalysisReport, DocumentType, Finding, ProvisionRule,
    ReportSummary, Severity,
};

/// Format styles supported in default reporter implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Produce a report string from an `AnalysisReport` using the desired format.
pub fn render_report(report: &AnalysisReport, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_human(report),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&JsonReport::from(report))?),
    }
}

/// Render the outcome of classification on its own.
pub fn render_classification(
    classification: &Classification,
    format: OutputFormat,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(classification)?),
        OutputFormat::Human => {
            let mut out = String::new();
            write_document_type(&mut out, classification.document_type)?;
            write_signals(&mut out, &classification.signals)?;
            Ok(out)
        }
    }
}

/// Render the loaded rule pack, grouped by section in pack order.
pub fn render_rules(rules: &[ProvisionRule], format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(rules)?);
    }

    let mut out = String::new();
    writeln!(out, "Loaded {} rule(s):", rules.len())?;
    let mut current_section: Option<&str> = None;
    for rule in rules {
        if current_section != Some(rule.section.as_str()) {
            writeln!(out, "\n[{}]", rule.section)?;
            current_section = Some(rule.section.as_str());
        }
        let scope = if rule.is_restricted() {
            let required = join_types(&rule.required_in);
            let recommended = join_types(&rule.recommended_in);
            format!("required: {required}; recommended: {recommended}")
        } else {
            "all documents".to_string()
        };
        writeln!(
            out,
            "  - {id:<40} {severity:<8} risk {score:>2}  ({scope})",
            id = rule.id,
            severity = rule.severity.as_str(),
            score = rule.base_risk_score,
        )?;
    }
    Ok(out)
}

fn join_types(types: &[DocumentType]) -> String {
    if types.is_empty() {
        return "-".into();
    }
    types
        .iter()
        .map(|doc| doc.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_human(report: &AnalysisReport) -> anyhow::Result<String> {
    let mut out = String::new();
    write_document_type(&mut out, report.document_type)?;
    write_signals(&mut out, &report.signals)?;
    writeln!(
        out,
        "Rules Evaluated: {} • Analyzed Length: {} bytes",
        report.rules_evaluated, report.analyzed_len
    )?;
    writeln!(out)?;

    if report.findings.is_empty() {
        writeln!(out, "No findings detected.")?;
        return Ok(out);
    }

    writeln!(out, "Findings: {}", summary_line(&report.summary))?;
    for finding in &report.findings {
        writeln!(out, "  - {}", finding_header(finding))?;
        if !finding.description.is_empty() {
            writeln!(out, "    {}", finding.description)?;
        }
        if let Some(context) = &finding.context {
            if !context.excerpt.trim().is_empty() {
                writeln!(
                    out,
                    "    @ {}..{}: \"{}\"",
                    context.span.0,
                    context.span.1,
                    sanitize_excerpt(&context.excerpt)
                )?;
            }
        }
        if !finding.recommendation.is_empty() {
            writeln!(out, "    Recommendation: {}", finding.recommendation)?;
        }
        if !finding.sub_checks.is_empty() {
            writeln!(out, "    Sub-checks: {}", finding.sub_checks.join("; "))?;
        }
    }

    if let Some(highest) = report.summary.highest_risk_score {
        writeln!(out, "\nHighest risk score: {highest}")?;
    }
    Ok(out)
}

fn write_document_type(out: &mut String, document_type: DocumentType) -> std::fmt::Result {
    writeln!(
        out,
        "Document Type: {} ({})",
        document_type.label(),
        document_type.as_str()
    )
}

fn write_signals(out: &mut String, signals: &[String]) -> std::fmt::Result {
    if signals.is_empty() {
        writeln!(out, "Signals: none")
    } else {
        writeln!(out, "Signals: {}", signals.join(", "))
    }
}

fn summary_line(summary: &ReportSummary) -> String {
    let counts = Severity::ALL
        .iter()
        .map(|severity| {
            format!(
                "{} {}",
                severity.as_str().to_ascii_lowercase(),
                summary.count(*severity)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} ({counts})", summary.total)
}

fn finding_header(finding: &Finding) -> String {
    format!(
        "[{severity}] {id} :: {name} ({trigger}, risk {score})",
        severity = finding.severity,
        id = finding.provision_id,
        name = finding.provision_name,
        trigger = finding.trigger,
        score = finding.risk_score,
    )
}

fn sanitize_excerpt(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            _ => c,
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    document_type: DocumentType,
    document_label: &'static str,
    signals: &'a [String],
    analyzed_len: usize,
    rules_evaluated: usize,
    summary: &'a ReportSummary,
    findings: &'a [Finding],
}

impl<'a> From<&'a AnalysisReport> for JsonReport<'a> {
    fn from(report: &'a AnalysisReport) -> Self {
        Self {
            document_type: report.document_type,
            document_label: report.document_type.label(),
            signals: &report.signals,
            analyzed_len: report.analyzed_len,
            rules_evaluated: report.rules_evaluated,
            summary: &report.summary,
            findings: &report.findings,
        }
    }
}
