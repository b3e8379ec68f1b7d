//! Core data types for the portfolio engine
//!
//! Evidence discovered on the remote store, the assessment status attached
//! to each file, and the per-criterion completion state derived from them.

use crate::utils::codes::{criteria_folder_name, normalize, tokens_match};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of evidence, inferred from MIME type or file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Photo,
    Video,
    Audio,
    Document,
    Other,
}

impl EvidenceKind {
    /// Infer kind from the remote MIME type, falling back to the file extension
    pub fn infer(mime_type: Option<&str>, file_name: &str) -> Self {
        if let Some(mime) = mime_type {
            let mime = mime.to_ascii_lowercase();
            if mime.starts_with("image/") {
                return EvidenceKind::Photo;
            }
            if mime.starts_with("video/") {
                return EvidenceKind::Video;
            }
            if mime.starts_with("audio/") {
                return EvidenceKind::Audio;
            }
            if mime == "application/pdf"
                || mime.starts_with("text/")
                || mime.contains("officedocument")
                || mime.contains("msword")
            {
                return EvidenceKind::Document;
            }
        }

        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "jpg" | "jpeg" | "png" | "heic" | "gif" | "webp" => EvidenceKind::Photo,
            "mp4" | "mov" | "avi" | "mkv" | "webm" => EvidenceKind::Video,
            "mp3" | "m4a" | "wav" | "ogg" => EvidenceKind::Audio,
            "pdf" | "doc" | "docx" | "txt" | "xlsx" | "pptx" | "rtf" => EvidenceKind::Document,
            _ => EvidenceKind::Other,
        }
    }
}

impl std::fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EvidenceKind::Photo => "Photo",
            EvidenceKind::Video => "Video",
            EvidenceKind::Audio => "Audio",
            EvidenceKind::Document => "Document",
            EvidenceKind::Other => "File",
        };
        f.write_str(label)
    }
}

/// Assessment status persisted as a custom field on each remote file
///
/// Every file starts as `Pending`. Assessors move it to `Approved`,
/// `Rejected` or `NeedsRevision`, and may re-open any decided file back to
/// `Pending`. The engine never changes status on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AssessmentStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    NeedsRevision,
}

impl AssessmentStatus {
    /// Parse the remote field value. Missing or unrecognised values read as `Pending`.
    pub fn from_field(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase().replace([' ', '_', '-'], "")) {
            Some(v) if v == "approved" => AssessmentStatus::Approved,
            Some(v) if v == "rejected" => AssessmentStatus::Rejected,
            Some(v) if v == "needsrevision" => AssessmentStatus::NeedsRevision,
            _ => AssessmentStatus::Pending,
        }
    }

    /// Value written to the remote `AssessmentStatus` field
    pub fn as_field_value(&self) -> &'static str {
        match self {
            AssessmentStatus::Pending => "Pending",
            AssessmentStatus::Approved => "Approved",
            AssessmentStatus::Rejected => "Rejected",
            AssessmentStatus::NeedsRevision => "NeedsRevision",
        }
    }

    /// Whether an assessor may move a file from `self` to `next`.
    ///
    /// Rewriting the same status (to edit feedback) is always allowed.
    pub fn can_transition_to(&self, next: AssessmentStatus) -> bool {
        *self == next
            || *self == AssessmentStatus::Pending
            || next == AssessmentStatus::Pending
    }

    pub fn is_decided(&self) -> bool {
        !matches!(self, AssessmentStatus::Pending)
    }
}

impl std::fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssessmentStatus::NeedsRevision => f.write_str("Needs Revision"),
            other => f.write_str(other.as_field_value()),
        }
    }
}

impl std::str::FromStr for AssessmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = AssessmentStatus::from_field(Some(s));
        if parsed == AssessmentStatus::Pending && !s.trim().eq_ignore_ascii_case("pending") {
            return Err(format!(
                "unknown status '{}' (expected pending, approved, rejected or needs-revision)",
                s
            ));
        }
        Ok(parsed)
    }
}

/// One evidence file discovered during a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Remote file id
    pub id: String,

    /// Display name (file name)
    pub name: String,

    pub kind: EvidenceKind,

    /// Upload time, used to order occasions
    pub uploaded_at: DateTime<Utc>,

    /// Remote folder holding the file, e.g. `Evidence/netp3_01/1_1_1_2`
    pub folder_path: String,

    /// Unit the file was filed under
    pub unit_code: String,

    /// Criteria inferred from the folder name; empty when unmatched
    #[serde(default)]
    pub criteria_codes: Vec<String>,

    #[serde(default)]
    pub status: AssessmentStatus,

    #[serde(default)]
    pub assessor_name: Option<String>,

    #[serde(default)]
    pub assessor_feedback: Option<String>,

    /// Browser link to the file, used for report provenance
    #[serde(default)]
    pub web_url: Option<String>,
}

impl EvidenceItem {
    /// Combined folder token for the item's criteria (`1_1_1_2`)
    pub fn criteria_token(&self) -> String {
        criteria_folder_name(&self.criteria_codes)
    }

    /// Filed directly in a unit folder, or in a folder that could not be parsed
    pub fn is_unmatched(&self) -> bool {
        self.criteria_codes.is_empty()
    }

    pub fn matches_criterion(&self, criterion_code: &str) -> bool {
        !self.is_unmatched() && tokens_match(criterion_code, &self.criteria_token())
    }

    pub fn is_approved(&self) -> bool {
        self.status == AssessmentStatus::Approved
    }

    /// Full remote path of the file
    pub fn remote_path(&self) -> String {
        format!("{}/{}", self.folder_path.trim_end_matches('/'), self.name)
    }

    /// Feedback text, ignoring blank strings
    pub fn feedback(&self) -> Option<&str> {
        self.assessor_feedback
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }
}

/// How much of the tree a scan gap hides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapLevel {
    /// The evidence root itself could not be listed
    Root,
    /// A unit folder could not be listed
    Unit,
    /// A criteria folder could not be listed
    CriteriaFolder,
    /// A single file's status could not be read
    File,
}

/// Part of a scan that could not be completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanGap {
    /// Remote path that could not be read
    pub path: String,

    pub level: GapLevel,

    /// Unit the path belongs to, when known
    pub unit_code: Option<String>,

    /// Criteria the folder represents; empty above criteria level
    pub criteria_codes: Vec<String>,

    pub reason: String,
}

impl ScanGap {
    /// Whether this gap may hide evidence for the criterion
    pub fn covers_criterion(&self, unit_code: &str, criterion_code: &str) -> bool {
        let same_unit = self
            .unit_code
            .as_deref()
            .map_or(true, |gap_unit| normalize(gap_unit) == normalize(unit_code));

        match self.level {
            GapLevel::Root | GapLevel::Unit => same_unit,
            GapLevel::CriteriaFolder => {
                same_unit
                    && (self.criteria_codes.is_empty()
                        || tokens_match(
                            criterion_code,
                            &criteria_folder_name(&self.criteria_codes),
                        ))
            }
            GapLevel::File => {
                same_unit
                    && self
                        .criteria_codes
                        .iter()
                        .any(|c| tokens_match(criterion_code, c))
            }
        }
    }
}

/// Result of indexing one scope on one site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexedEvidence {
    pub items: Vec<EvidenceItem>,

    /// Folders that could not be listed
    pub gaps: Vec<ScanGap>,

    /// Criteria folders whose names could not be tokenized
    pub malformed_folders: Vec<String>,
}

impl IndexedEvidence {
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }

    /// Items not tagged with any criterion
    pub fn unmatched(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.items.iter().filter(|item| item.is_unmatched())
    }

    pub fn pending(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.items
            .iter()
            .filter(|item| item.status == AssessmentStatus::Pending)
    }
}

/// Occasion-aware completion of one performance criterion.
///
/// Derived on every reconciliation and never persisted. Occasion flags are
/// `None` when no evidence exists for that occasion, distinguishing "no
/// evidence" from "evidence present but not approved".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionCompletion {
    pub criterion_code: String,

    pub description: String,

    /// Parent learning outcome number
    pub learning_outcome: u32,

    /// Matching evidence sorted by upload time; the first two are the occasions
    pub evidence: Vec<EvidenceItem>,

    pub first_occasion_approved: Option<bool>,

    pub second_occasion_approved: Option<bool>,

    pub requires_two_occasions: bool,

    pub is_complete: bool,

    /// A folder that may hold evidence for this criterion could not be scanned
    #[serde(default)]
    pub scan_incomplete: bool,
}

impl CriterionCompletion {
    pub fn has_evidence(&self) -> bool {
        !self.evidence.is_empty()
    }

    /// Evidence for occasion `index` (1-based)
    pub fn occasion(&self, index: usize) -> Option<&EvidenceItem> {
        index.checked_sub(1).and_then(|i| self.evidence.get(i))
    }

    /// Number of occasions that count toward completion
    pub fn required_occasions(&self) -> usize {
        if self.requires_two_occasions {
            2
        } else {
            1
        }
    }
}

/// Completed criteria count for one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProgress {
    pub unit_code: String,
    pub completed: usize,
    pub total: usize,
    pub scan_incomplete: bool,
}

impl UnitProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((self.completed * 100) / self.total) as u8
        }
    }
}
