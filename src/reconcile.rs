//! Reconciliation of evidence against the catalogue
//!
//! Pure and synchronous: takes the items an index produced and yields one
//! [`CriterionCompletion`] per criterion of a unit, in catalogue order.
//! Occasions are assigned only after all matching items have been collected
//! and sorted by upload time.

use crate::catalogue::{CrossReference, Unit};
use crate::types::{CriterionCompletion, EvidenceItem, ScanGap, UnitProgress};
use crate::utils::codes::unit_folder_matches;
use std::collections::HashSet;

/// Compute occasion-aware completion for every criterion in `unit`.
///
/// Evidence for other units is ignored, so a site-wide index can be passed
/// as-is. `cross_references` let approved items filed under one criterion
/// count toward others in the same unit. A criterion that a scan gap may
/// hide is flagged `scan_incomplete`; its completion reflects only what was
/// actually read.
pub fn compute_completion(
    unit: &Unit,
    evidence: &[EvidenceItem],
    gaps: &[ScanGap],
    cross_references: &[&CrossReference],
) -> Vec<CriterionCompletion> {
    let in_unit: Vec<&EvidenceItem> = evidence
        .iter()
        .filter(|item| unit_folder_matches(&unit.code, &item.unit_code))
        .collect();

    unit.criteria()
        .map(|(learning_outcome, criterion)| {
            let mut selected: Vec<&EvidenceItem> = in_unit
                .iter()
                .copied()
                .filter(|item| item.matches_criterion(&criterion.code))
                .collect();

            let mut seen: HashSet<&str> =
                selected.iter().copied().map(|item| item.id.as_str()).collect();
            for reference in cross_references
                .iter()
                .filter(|r| r.applies(&unit.code, &criterion.code))
            {
                for item in in_unit.iter().copied().filter(|item| {
                    item.is_approved() && item.matches_criterion(&reference.source_criterion)
                }) {
                    if seen.insert(item.id.as_str()) {
                        selected.push(item);
                    }
                }
            }

            selected.sort_by(|a, b| {
                (a.uploaded_at, &a.name, &a.id).cmp(&(b.uploaded_at, &b.name, &b.id))
            });

            let first_occasion_approved = selected.first().map(|item| item.is_approved());
            let second_occasion_approved = selected.get(1).map(|item| item.is_approved());
            let is_complete = first_occasion_approved == Some(true)
                && (!unit.requires_two_occasions || second_occasion_approved == Some(true));

            CriterionCompletion {
                criterion_code: criterion.code.clone(),
                description: criterion.description.clone(),
                learning_outcome,
                evidence: selected.into_iter().cloned().collect(),
                first_occasion_approved,
                second_occasion_approved,
                requires_two_occasions: unit.requires_two_occasions,
                is_complete,
                scan_incomplete: gaps
                    .iter()
                    .any(|gap| gap.covers_criterion(&unit.code, &criterion.code)),
            }
        })
        .collect()
}

/// Count completed criteria
pub fn summarize(unit: &Unit, completions: &[CriterionCompletion]) -> UnitProgress {
    UnitProgress {
        unit_code: unit.code.clone(),
        completed: completions.iter().filter(|c| c.is_complete).count(),
        total: completions.len(),
        scan_incomplete: completions.iter().any(|c| c.scan_incomplete),
    }
}
