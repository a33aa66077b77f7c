//! Segment resolution: applies a criteria tree to a profile collection with
//! the soft-delete policy layered on top of the filter engine.

use broadcast_core::types::DELETED_STATUS;
use broadcast_core::{BroadcastResult, Profile};
use tracing::{debug, warn};

use crate::criteria::{CriteriaInput, FilterCriteria, FilterOperator, OperatorKind};
use crate::engine::FilterEngine;
use crate::store::{ProfileQuery, ProfileStore};

pub struct SegmentResolver;

impl SegmentResolver {
    /// Profiles matching `criteria`. Soft-deleted profiles are dropped unless
    /// the criteria contains an explicit `status equals deleted` condition.
    pub fn resolve(profiles: &[Profile], criteria: &FilterCriteria) -> Vec<Profile> {
        Self::resolve_refs(profiles, criteria)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Borrowing variant of [`resolve`](Self::resolve).
    pub fn resolve_refs<'a>(profiles: &'a [Profile], criteria: &FilterCriteria) -> Vec<&'a Profile> {
        warn_unsupported(criteria);
        let include_deleted = targets_deleted(criteria);
        let matched: Vec<&Profile> = profiles
            .iter()
            .filter(|p| include_deleted || !p.is_deleted())
            .filter(|p| FilterEngine::evaluate_criteria(p, criteria))
            .collect();

        debug!(
            scanned = profiles.len(),
            matched = matched.len(),
            include_deleted,
            "Segment resolved"
        );
        matched
    }

    /// Accepts either criteria shape; the legacy flat list is normalized first.
    pub fn resolve_input(profiles: &[Profile], input: CriteriaInput) -> Vec<Profile> {
        Self::resolve(profiles, &FilterCriteria::from(input))
    }

    /// Paginated fetch-and-merge against a profile store. The soft-delete
    /// exclusion is pushed down to the store when it applies.
    pub async fn resolve_from_store(
        store: &dyn ProfileStore,
        criteria: &FilterCriteria,
        page_size: usize,
    ) -> BroadcastResult<Vec<Profile>> {
        warn_unsupported(criteria);
        let include_deleted = targets_deleted(criteria);
        let mut query = ProfileQuery {
            exclude_deleted: !include_deleted,
            offset: 0,
            limit: page_size.max(1),
        };

        let mut matched = Vec::new();
        let mut pages = 0usize;
        loop {
            let page = store.query(&query).await?;
            pages += 1;
            matched.extend(
                page.profiles
                    .into_iter()
                    .filter(|p| include_deleted || !p.is_deleted())
                    .filter(|p| FilterEngine::evaluate_criteria(p, criteria)),
            );
            match page.next_offset {
                Some(next) if next > query.offset => query.offset = next,
                _ => break,
            }
        }

        debug!(pages, matched = matched.len(), "Segment resolved from store");
        Ok(matched)
    }
}

/// Conditions whose operator is not recognised; each always evaluates false.
pub fn unsupported_conditions(criteria: &FilterCriteria) -> Vec<(&str, &str)> {
    criteria
        .conditions()
        .filter(|c| c.operator.kind() == OperatorKind::Unsupported)
        .map(|c| (c.field.as_str(), c.operator.as_str()))
        .collect()
}

fn warn_unsupported(criteria: &FilterCriteria) {
    for (field, operator) in unsupported_conditions(criteria) {
        warn!(
            field = %field,
            operator = %operator,
            "Unsupported filter operator, condition evaluates to false"
        );
    }
}

/// Whether the criteria explicitly asks for soft-deleted profiles.
pub fn targets_deleted(criteria: &FilterCriteria) -> bool {
    criteria.conditions().any(|c| {
        c.field == "status" && c.operator == FilterOperator::Equals && c.needle == DELETED_STATUS
    })
}
