//! Portfolio compiler
//!
//! Renders reconciled state as a self-contained HTML report: one section
//! per unit, one table per learning outcome, and an evidence appendix with
//! provenance and assessor attribution. Output depends only on its inputs
//! and the log sheet table, so compiling twice yields identical HTML.

use crate::catalogue::{Catalogue, Unit};
use crate::error::{PortfolioError, Result};
use crate::logsheet::LogSheetAllocator;
use crate::reconcile::{compute_completion, summarize};
use crate::types::{AssessmentStatus, CriterionCompletion, EvidenceItem, IndexedEvidence};
use crate::utils::codes::{normalize, unit_folder_matches};
use chrono::{DateTime, Utc};
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};
use std::fmt::Write;
use std::sync::Arc;
use tracing::info;

const STYLE: &str = "body{font-family:sans-serif;margin:2em;color:#222}\
table{border-collapse:collapse;width:100%;margin-bottom:1.5em}\
th,td{border:1px solid #bbb;padding:4px 8px;text-align:left;vertical-align:top}\
th{background:#eee}.complete{color:#1a7f37}.missing{color:#999}\
.warning{color:#b35900}.review{background:#fff4e0}footer{margin-top:2em;font-size:0.9em}";

/// Who and when the report is for
#[derive(Debug, Clone)]
pub struct ReportHeader {
    pub candidate: String,
    pub site_id: String,
    pub generated_at: DateTime<Utc>,
}

/// Reconciled state of one unit, ready to render
struct UnitSection<'a> {
    unit: &'a Unit,
    completions: Vec<CriterionCompletion>,
    unmatched: Vec<&'a EvidenceItem>,
}

/// Compiles portfolio reports, numbering approved occasions
pub struct PortfolioCompiler {
    log_sheets: Arc<LogSheetAllocator>,
}

impl PortfolioCompiler {
    pub fn new(log_sheets: Arc<LogSheetAllocator>) -> Self {
        Self { log_sheets }
    }

    /// Compile a report for `units`, in the order given.
    ///
    /// Log sheet numbers are allocated for approved occasions in render
    /// order; occasions that already hold a number keep it.
    pub fn compile(
        &self,
        header: &ReportHeader,
        catalogue: &Catalogue,
        units: &[&Unit],
        evidence: &IndexedEvidence,
    ) -> Result<String> {
        let sections: Vec<UnitSection> = units
            .iter()
            .map(|&unit| UnitSection {
                unit,
                completions: compute_completion(
                    unit,
                    &evidence.items,
                    &evidence.gaps,
                    &catalogue.cross_references_for(&unit.code),
                ),
                unmatched: evidence
                    .unmatched()
                    .filter(|item| unit_folder_matches(&unit.code, &item.unit_code))
                    .collect(),
            })
            .collect();

        let html = self
            .render(header, &sections)
            .map_err(|e| PortfolioError::Other(format!("failed to render report: {}", e)))?;

        info!(
            "Compiled portfolio for {} ({} unit(s), next log sheet {})",
            header.candidate,
            sections.len(),
            self.log_sheets.next_number()
        );
        Ok(html)
    }

    fn render(
        &self,
        header: &ReportHeader,
        sections: &[UnitSection],
    ) -> std::result::Result<String, std::fmt::Error> {
        let mut out = String::new();
        self.render_into(&mut out, header, sections)?;
        Ok(out)
    }

    fn render_into(
        &self,
        out: &mut String,
        header: &ReportHeader,
        sections: &[UnitSection],
    ) -> std::fmt::Result {
        writeln!(out, "<!DOCTYPE html>")?;
        writeln!(out, "<html lang=\"en\">")?;
        writeln!(out, "<head>")?;
        writeln!(out, "<meta charset=\"utf-8\">")?;
        writeln!(out, "<title>Evidence Portfolio: {}</title>", text(&header.candidate))?;
        writeln!(out, "<style>{}</style>", STYLE)?;
        writeln!(out, "</head>")?;
        writeln!(out, "<body>")?;
        writeln!(out, "<h1>Evidence Portfolio</h1>")?;
        writeln!(
            out,
            "<p class=\"meta\">Candidate: {}<br>Site: {}<br>Generated: {}</p>",
            text(&header.candidate),
            text(&header.site_id),
            header.generated_at.format("%Y-%m-%d %H:%M UTC")
        )?;

        for section in sections {
            self.render_unit(out, section)?;
        }

        writeln!(out, "<h2 id=\"evidence-details\">Evidence Details</h2>")?;
        for section in sections {
            self.render_details(out, section)?;
        }

        writeln!(
            out,
            "<footer>Log sheet counter: {} issued, next number {}</footer>",
            self.log_sheets.issued(),
            self.log_sheets.next_number()
        )?;
        writeln!(out, "</body>")?;
        writeln!(out, "</html>")
    }

    fn render_unit(&self, out: &mut String, section: &UnitSection) -> std::fmt::Result {
        let unit = section.unit;
        let progress = summarize(unit, &section.completions);

        writeln!(
            out,
            "<section class=\"unit\" id=\"unit-{}\">",
            attr(&normalize(&unit.code))
        )?;
        writeln!(out, "<h2>{} {}</h2>", text(&unit.code), text(&unit.title))?;
        writeln!(
            out,
            "<p class=\"progress\">{} of {} criteria complete ({}%){}</p>",
            progress.completed,
            progress.total,
            progress.percent(),
            if unit.requires_two_occasions {
                "; two occasions required"
            } else {
                ""
            }
        )?;
        if progress.scan_incomplete {
            writeln!(
                out,
                "<p class=\"warning\">Some evidence folders for this unit could not be read. \
                 Criteria marked Scan Incomplete may have evidence not shown here.</p>"
            )?;
        }

        let occasions = if unit.requires_two_occasions { 2 } else { 1 };
        for outcome in &unit.learning_outcomes {
            if outcome.title.is_empty() {
                writeln!(out, "<h3>Learning Outcome {}</h3>", outcome.number)?;
            } else {
                writeln!(
                    out,
                    "<h3>Learning Outcome {}: {}</h3>",
                    outcome.number,
                    text(&outcome.title)
                )?;
            }

            write!(out, "<table><thead><tr><th>Criterion</th><th>Description</th>")?;
            for occasion in 1..=occasions {
                write!(out, "<th>Occasion {}</th>", occasion)?;
            }
            writeln!(out, "<th>Status</th></tr></thead><tbody>")?;

            for completion in section
                .completions
                .iter()
                .filter(|c| c.learning_outcome == outcome.number)
            {
                self.render_row(out, unit, completion, occasions)?;
            }
            writeln!(out, "</tbody></table>")?;
        }
        writeln!(out, "</section>")
    }

    fn render_row(
        &self,
        out: &mut String,
        unit: &Unit,
        completion: &CriterionCompletion,
        occasions: usize,
    ) -> std::fmt::Result {
        write!(
            out,
            "<tr><td>{}</td><td>{}</td>",
            text(&completion.criterion_code),
            text(&completion.description)
        )?;

        if !completion.has_evidence() {
            write!(
                out,
                "<td class=\"missing\" colspan=\"{}\">No Evidence</td>",
                occasions
            )?;
        } else {
            for index in 1..=occasions {
                match completion.occasion(index) {
                    Some(item) => {
                        write!(out, "<td>{}</td>", self.occasion_cell(unit, completion, index, item))?
                    }
                    None => write!(out, "<td class=\"missing\">Awaiting evidence</td>")?,
                }
            }
        }

        let (class, label) = if completion.is_complete {
            ("complete", "Complete")
        } else if completion.scan_incomplete {
            ("warning", "Scan Incomplete")
        } else if completion.has_evidence() {
            ("", "In Progress")
        } else {
            ("missing", "Not Started")
        };
        writeln!(out, "<td class=\"{}\">{}</td></tr>", class, label)
    }

    fn occasion_cell(
        &self,
        unit: &Unit,
        completion: &CriterionCompletion,
        index: usize,
        item: &EvidenceItem,
    ) -> String {
        if item.is_approved() {
            let number = self.log_sheets.number_for(
                &unit.code,
                &completion.criterion_code,
                index as u32,
            );
            format!(
                "Approved<br>Log Sheet {}<br><small>{}</small>",
                number,
                text(&item.name)
            )
        } else {
            format!("{}<br><small>{}</small>", item.status, text(&item.name))
        }
    }

    fn render_details(&self, out: &mut String, section: &UnitSection) -> std::fmt::Result {
        let unit = section.unit;
        let evidenced: Vec<&CriterionCompletion> = section
            .completions
            .iter()
            .filter(|c| c.has_evidence())
            .collect();
        if evidenced.is_empty() && section.unmatched.is_empty() {
            return Ok(());
        }

        writeln!(out, "<h3>{}</h3>", text(&unit.code))?;
        writeln!(
            out,
            "<table><thead><tr><th>Criterion</th><th>Occasion</th><th>File</th>\
             <th>Uploaded</th><th>Status</th><th>Assessment</th></tr></thead><tbody>"
        )?;

        for completion in evidenced {
            for (position, item) in completion.evidence.iter().enumerate() {
                let occasion = position + 1;
                let occasion_label = if occasion <= completion.required_occasions() {
                    occasion.to_string()
                } else {
                    format!("{} (additional)", occasion)
                };
                writeln!(
                    out,
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                    text(&completion.criterion_code),
                    occasion_label,
                    provenance(item),
                    item.uploaded_at.format("%Y-%m-%d %H:%M"),
                    item.status,
                    attribution(item)
                )?;
            }
        }

        for item in &section.unmatched {
            writeln!(
                out,
                "<tr class=\"review\"><td>Unmatched</td><td>-</td><td>{}</td><td>{}</td>\
                 <td>{}</td><td>Not filed under a criterion; requires manual review. {}</td></tr>",
                provenance(item),
                item.uploaded_at.format("%Y-%m-%d %H:%M"),
                item.status,
                attribution(item)
            )?;
        }
        writeln!(out, "</tbody></table>")
    }
}

/// File name with its remote path, linked when the store gave a URL
fn provenance(item: &EvidenceItem) -> String {
    let path = item.remote_path();
    match &item.web_url {
        Some(url) => format!(
            "<a href=\"{}\">{}</a><br><small>{} &middot; {}</small>",
            attr(url),
            text(&item.name),
            item.kind,
            text(&path)
        ),
        None => format!(
            "{}<br><small>{} &middot; {}</small>",
            text(&item.name),
            item.kind,
            text(&path)
        ),
    }
}

/// Assessor attribution; feedback is only shown when it was recorded
fn attribution(item: &EvidenceItem) -> String {
    let assessor = item
        .assessor_name
        .as_deref()
        .map(|name| text(name).into_owned())
        .unwrap_or_else(|| "an unrecorded assessor".to_string());

    match (item.status, item.feedback()) {
        (AssessmentStatus::Pending, _) => "Awaiting assessment".to_string(),
        (AssessmentStatus::Approved, Some(feedback)) => format!(
            "Approved by {} with feedback: &ldquo;{}&rdquo;",
            assessor,
            text(feedback)
        ),
        (AssessmentStatus::Approved, None) => {
            format!("Approved by {} (no feedback recorded)", assessor)
        }
        (status, Some(feedback)) => format!(
            "{} by {}: &ldquo;{}&rdquo;",
            status,
            assessor,
            text(feedback)
        ),
        (status, None) => format!("{} by {} (no feedback recorded)", status, assessor),
    }
}
