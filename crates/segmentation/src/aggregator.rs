//! Audience aggregation: unions reachable profiles across selected segments.

use broadcast_core::Profile;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::resolver::SegmentResolver;
use crate::segment::Segment;

/// Deduplicated set of reachable profiles, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct Audience {
    recipients: Vec<Profile>,
}

impl Audience {
    pub fn count(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.recipients
    }

    pub fn contains(&self, profile_id: Uuid) -> bool {
        self.recipients.iter().any(|p| p.id == profile_id)
    }

    /// One contact address per profile; profiles sharing an address collapse.
    pub fn addresses(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.recipients
            .iter()
            .filter_map(|p| p.contact_address())
            .filter(|addr| seen.insert(addr.to_string()))
            .map(str::to_string)
            .collect()
    }
}

pub struct AudienceAggregator;

impl AudienceAggregator {
    /// Resolve every selected segment, keep profiles with a mobile or phone
    /// number, and union the results by profile id.
    pub fn count_reachable(
        all_profiles: &[Profile],
        segments: &[Segment],
        selected_segment_ids: &[Uuid],
    ) -> Audience {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut selected: HashSet<Uuid> = HashSet::new();
        let mut recipients = Vec::new();

        for segment_id in selected_segment_ids {
            if !selected.insert(*segment_id) {
                continue;
            }
            let Some(segment) = segments.iter().find(|s| s.id == *segment_id) else {
                warn!(segment_id = %segment_id, "Selected segment not found, skipping");
                continue;
            };

            let matched = SegmentResolver::resolve_refs(all_profiles, &segment.criteria);
            for profile in matched.into_iter().filter(|p| p.is_reachable()) {
                if seen.insert(profile.id) {
                    recipients.push(profile.clone());
                }
            }
        }

        info!(
            segments = selected.len(),
            reachable = recipients.len(),
            "Audience aggregated"
        );

        Audience { recipients }
    }

    /// Recompute each segment's cached `estimated_size`.
    pub fn refresh_estimates(all_profiles: &[Profile], segments: &mut [Segment]) {
        for segment in segments.iter_mut() {
            let size = SegmentResolver::resolve_refs(all_profiles, &segment.criteria).len() as u64;
            segment.estimated_size = Some(size);
            segment.updated_at = chrono::Utc::now();
        }
    }
}
