//! Common test utilities and helpers

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use portfolio_core::config::SiteConfig;
use portfolio_core::remote::{FieldMap, FIELD_ASSESSOR, FIELD_FEEDBACK, FIELD_STATUS};
use portfolio_core::{AssessmentService, Catalogue, EngineConfig, InMemoryStore};
use std::sync::Arc;

pub const SITE: &str = "site-a";

/// Catalogue with a two-occasion unit (ten criteria) and a one-occasion unit
pub const CATALOGUE_JSON: &str = r#"{
    "units": [
        {
            "code": "NETP3-01",
            "title": "Health and safety in the workplace",
            "learning_outcomes": [
                { "number": 1, "title": "Work safely", "criteria": [
                    { "code": "1.1", "description": "Identify hazards" },
                    { "code": "1.2", "description": "Select PPE" },
                    { "code": "1.3", "description": "Isolate supplies" },
                    { "code": "1.4", "description": "Use access equipment" },
                    { "code": "1.5", "description": "Handle materials" } ] },
                { "number": 2, "title": "Respond to incidents", "criteria": [
                    { "code": "2.1", "description": "Report incidents" },
                    { "code": "2.2", "description": "Follow evacuation procedures" },
                    { "code": "2.3", "description": "Apply first aid" },
                    { "code": "2.4", "description": "Record near misses" },
                    { "code": "2.5", "description": "Review risk assessments" } ] }
            ]
        },
        {
            "code": "NETP3-05",
            "title": "Terminations and connections",
            "learning_outcomes": [
                { "number": 1, "criteria": [
                    { "code": "1.1", "description": "Terminate cables" },
                    { "code": "1.2", "description": "Test terminations" } ] }
            ]
        }
    ],
    "two_occasion_units": ["NETP3-01"],
    "cross_references": [
        { "unit_code": "NETP3-05", "source_criterion": "1.1", "covers": ["1.2"] }
    ]
}"#;

pub fn catalogue() -> Catalogue {
    Catalogue::from_json_str(CATALOGUE_JSON).expect("test catalogue is valid")
}

pub fn engine_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.sites = vec![
        SiteConfig {
            id: SITE.to_string(),
            candidate: "Jo Bloggs".to_string(),
        },
        SiteConfig {
            id: "site-b".to_string(),
            candidate: "Sam Smith".to_string(),
        },
    ];
    config
}

/// Upload time on day `day` of March 2024
pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap()
}

/// Service over a fresh in-memory store
pub fn create_test_service() -> (Arc<InMemoryStore>, AssessmentService) {
    let store = Arc::new(InMemoryStore::new());
    let service = AssessmentService::new(&engine_config(), catalogue(), store.clone());
    (store, service)
}

/// Add a file with assessment fields already set
pub fn add_assessed(
    store: &InMemoryStore,
    folder: &str,
    name: &str,
    day: u32,
    status: &str,
    feedback: Option<&str>,
) -> String {
    let id = store.add_file(SITE, folder, name, at(day));
    let mut fields = FieldMap::new();
    fields.insert(FIELD_STATUS.to_string(), status.to_string());
    fields.insert(FIELD_ASSESSOR.to_string(), "Pat Assessor".to_string());
    if let Some(feedback) = feedback {
        fields.insert(FIELD_FEEDBACK.to_string(), feedback.to_string());
    }
    store.set_fields(SITE, &id, fields);
    id
}
