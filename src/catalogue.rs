//! Qualification catalogue
//!
//! Read-only table of units, learning outcomes and performance criteria,
//! loaded once at startup from JSON. Also carries the two-occasion
//! allow-list and the criteria cross references used during reconciliation.

use crate::error::{PortfolioError, Result};
use crate::utils::codes::{compact, normalize, unit_folder_matches};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// A single performance criterion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceCriterion {
    pub code: String,
    pub description: String,
}

/// Learning outcome grouping criteria within a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningOutcome {
    pub number: u32,
    #[serde(default)]
    pub title: String,
    pub criteria: Vec<PerformanceCriterion>,
}

/// A qualification unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub code: String,
    #[serde(default)]
    pub title: String,
    /// Set from the catalogue's two-occasion allow-list at load time
    #[serde(default)]
    pub requires_two_occasions: bool,
    pub learning_outcomes: Vec<LearningOutcome>,
}

impl Unit {
    /// Criteria in canonical order, paired with their learning outcome number
    pub fn criteria(&self) -> impl Iterator<Item = (u32, &PerformanceCriterion)> {
        self.learning_outcomes
            .iter()
            .flat_map(|lo| lo.criteria.iter().map(move |pc| (lo.number, pc)))
    }

    pub fn criterion_count(&self) -> usize {
        self.learning_outcomes.iter().map(|lo| lo.criteria.len()).sum()
    }
}

/// Approved evidence filed under `source_criterion` also counts for `covers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReference {
    pub unit_code: String,
    pub source_criterion: String,
    pub covers: Vec<String>,
}

impl CrossReference {
    /// Whether this reference lets evidence for `source` count toward `target`
    pub fn applies(&self, unit_code: &str, target: &str) -> bool {
        normalize(&self.unit_code) == normalize(unit_code)
            && self.covers.iter().any(|c| normalize(c) == normalize(target))
    }
}

#[derive(Debug, Deserialize)]
struct CatalogueFile {
    units: Vec<Unit>,
    #[serde(default)]
    two_occasion_units: Vec<String>,
    #[serde(default)]
    cross_references: Vec<CrossReference>,
}

/// The qualification catalogue
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    units: Vec<Unit>,
    cross_references: Vec<CrossReference>,
}

impl Catalogue {
    /// Build a catalogue, marking units on the two-occasion allow-list
    pub fn new(
        mut units: Vec<Unit>,
        two_occasion_units: &[String],
        cross_references: Vec<CrossReference>,
    ) -> Self {
        let allow_list: HashSet<String> = two_occasion_units.iter().map(|c| compact(c)).collect();
        for unit in &mut units {
            if allow_list.contains(&compact(&unit.code)) {
                unit.requires_two_occasions = true;
            }
        }
        Self {
            units,
            cross_references,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: CatalogueFile = serde_json::from_str(json)?;
        let catalogue = Self::new(file.units, &file.two_occasion_units, file.cross_references);
        debug!(
            "Loaded catalogue: {} units, {} cross references",
            catalogue.units.len(),
            catalogue.cross_references.len()
        );
        Ok(catalogue)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Units in catalogue order
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Look up a unit by any accepted spelling of its code
    pub fn unit(&self, code: &str) -> Option<&Unit> {
        let token = normalize(code);
        let compacted = compact(code);
        self.units
            .iter()
            .find(|u| normalize(&u.code) == token)
            .or_else(|| self.units.iter().find(|u| compact(&u.code) == compacted))
    }

    pub fn require_unit(&self, code: &str) -> Result<&Unit> {
        self.unit(code)
            .ok_or_else(|| PortfolioError::UnknownUnit(code.to_string()))
    }

    /// Resolve a remote unit folder name to a catalogue unit
    pub fn unit_for_folder(&self, folder_name: &str) -> Option<&Unit> {
        self.unit(folder_name).or_else(|| {
            self.units
                .iter()
                .find(|u| unit_folder_matches(&u.code, folder_name))
        })
    }

    pub fn cross_references(&self) -> &[CrossReference] {
        &self.cross_references
    }

    /// Cross references that apply to one unit
    pub fn cross_references_for(&self, unit_code: &str) -> Vec<&CrossReference> {
        let token = normalize(unit_code);
        self.cross_references
            .iter()
            .filter(|r| normalize(&r.unit_code) == token)
            .collect()
    }
}
