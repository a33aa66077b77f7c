//! Audience segmentation: filter evaluation, segment resolution with the
//! soft-delete policy, and multi-segment audience aggregation.

pub mod aggregator;
pub mod builder;
pub mod criteria;
pub mod engine;
pub mod resolver;
pub mod segment;
pub mod store;

pub use aggregator::{Audience, AudienceAggregator};
pub use builder::SegmentBuilder;
pub use criteria::{CriteriaInput, FilterCondition, FilterCriteria, FilterGroup, FilterOperator};
pub use engine::FilterEngine;
pub use resolver::SegmentResolver;
pub use segment::Segment;
pub use store::{
    load_all, InMemoryProfileStore, InMemorySegmentStore, ProfilePage, ProfileQuery, ProfileStore,
    SegmentStore,
};
