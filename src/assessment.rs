//! Assessment status store
//!
//! Status, feedback and assessor name live as custom fields on each remote
//! file. Reads enrich an [`EvidenceItem`]; writes patch all three fields in
//! one request and then re-read them, so callers always see what the store
//! actually holds rather than what they asked for.

use crate::error::{PortfolioError, Result};
use crate::remote::{FieldMap, RemoteStore, FIELD_ASSESSOR, FIELD_FEEDBACK, FIELD_STATUS};
use crate::types::{AssessmentStatus, EvidenceItem};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An assessor's decision on one evidence file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentUpdate {
    pub status: AssessmentStatus,
    /// `None` clears any existing feedback
    pub feedback: Option<String>,
    pub assessor_name: String,
}

/// Reads and writes assessment fields on remote files
#[derive(Clone)]
pub struct AssessmentStatusStore {
    store: Arc<dyn RemoteStore>,
}

impl AssessmentStatusStore {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Enrich an item with the status fields currently stored remotely
    pub async fn fetch_status(&self, site: &str, mut item: EvidenceItem) -> Result<EvidenceItem> {
        let fields = self.store.get_fields(site, &item.id).await?;
        apply_fields(&mut item, &fields);
        Ok(item)
    }

    /// Write a decision and return the item as stored after the write.
    ///
    /// Transitions outside the status state machine are rejected before
    /// anything is written. Write failures are returned as-is; there is no
    /// retry. If another writer lands between the patch and the re-read,
    /// the re-read value wins.
    pub async fn update_status(
        &self,
        site: &str,
        item: &EvidenceItem,
        update: &AssessmentUpdate,
    ) -> Result<EvidenceItem> {
        let assessor = update.assessor_name.trim();
        if assessor.is_empty() {
            return Err(PortfolioError::Other(
                "assessor name is required to record an assessment".to_string(),
            ));
        }

        let current = self.fetch_status(site, item.clone()).await?;
        if !current.status.can_transition_to(update.status) {
            return Err(PortfolioError::InvalidTransition {
                from: current.status.to_string(),
                to: update.status.to_string(),
            });
        }

        let mut fields = FieldMap::new();
        fields.insert(FIELD_STATUS.to_string(), update.status.as_field_value().to_string());
        fields.insert(
            FIELD_FEEDBACK.to_string(),
            update.feedback.clone().unwrap_or_default(),
        );
        fields.insert(FIELD_ASSESSOR.to_string(), assessor.to_string());

        debug!(
            "Setting {} on {} ({} -> {})",
            FIELD_STATUS, item.id, current.status, update.status
        );
        self.store.patch_fields(site, &item.id, fields).await?;

        let stored = self.fetch_status(site, current).await?;
        if stored.status != update.status {
            warn!(
                "Status of {} reads back as {} after writing {}; another assessor wrote last",
                stored.id, stored.status, update.status
            );
        } else {
            info!("{} marked {} by {}", stored.name, stored.status, assessor);
        }
        Ok(stored)
    }
}

/// Copy assessment fields onto an item; absent fields reset to defaults
pub fn apply_fields(item: &mut EvidenceItem, fields: &FieldMap) {
    let text = |key: &str| {
        fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    item.status = AssessmentStatus::from_field(fields.get(FIELD_STATUS).map(String::as_str));
    item.assessor_feedback = text(FIELD_FEEDBACK);
    item.assessor_name = text(FIELD_ASSESSOR);
}
