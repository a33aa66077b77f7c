use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::criteria::FilterCriteria;

/// A named, reusable audience definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "filter_criteria")]
    pub criteria: FilterCriteria,
    /// Cached size from the last estimate; stale until refreshed.
    #[serde(default)]
    pub estimated_size: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(name: impl Into<String>, criteria: FilterCriteria) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            criteria,
            estimated_size: None,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_legacy_filter_criteria_key() {
        let segment: Segment = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "name": "VIPs",
            "filter_criteria": [{"field": "custom_fields.vip", "operator": "equals", "value": "Yes"}],
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(segment.criteria.groups.len(), 1);
        assert!(segment.estimated_size.is_none());
    }

    #[test]
    fn test_seed_entry_without_id_or_timestamps() {
        let segments: Vec<Segment> = serde_json::from_value(json!([
            {"name": "Active", "criteria": {"groups": [{"conditions": [
                {"field": "status", "operator": "equals", "value": "active"}
            ]}]}},
            {"name": "Opted in", "criteria": [
                {"field": "custom_fields.opt_in", "operator": "equals", "value": "yes"}
            ]}
        ]))
        .unwrap();
        assert_eq!(segments.len(), 2);
        assert_ne!(segments[0].id, segments[1].id);
        assert_eq!(segments[1].criteria.groups[0].conditions.len(), 1);
    }
}
