//! Segment builder: fluent API for constructing segment criteria.

use crate::criteria::{FilterCondition, FilterCriteria, FilterGroup};
use crate::segment::Segment;

pub struct SegmentBuilder {
    name: String,
    description: Option<String>,
    groups: Vec<FilterGroup>,
    current: Vec<FilterCondition>,
    tags: Vec<String>,
}

impl SegmentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            groups: Vec::new(),
            current: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Add a condition to the current AND group.
    pub fn condition(mut self, field: impl Into<String>, operator: &str, value: &str) -> Self {
        self.current.push(FilterCondition::new(field, operator, value));
        self
    }

    pub fn equals(self, field: impl Into<String>, value: &str) -> Self {
        self.condition(field, "equals", value)
    }

    pub fn exists(self, field: impl Into<String>) -> Self {
        self.condition(field, "exists", "")
    }

    /// Close the current group and start a new one, OR-ed with the previous.
    pub fn or(mut self) -> Self {
        self.flush_group();
        self
    }

    /// Target soft-deleted profiles explicitly.
    pub fn include_deleted(self) -> Self {
        self.equals("status", "deleted")
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    fn flush_group(&mut self) {
        if !self.current.is_empty() {
            let conditions = std::mem::take(&mut self.current);
            self.groups.push(FilterGroup::new(conditions));
        }
    }

    pub fn criteria(mut self) -> FilterCriteria {
        self.flush_group();
        FilterCriteria::any_of(self.groups)
    }

    pub fn build(mut self) -> Segment {
        self.flush_group();
        let mut segment = Segment::new(self.name, FilterCriteria::any_of(self.groups));
        segment.description = self.description;
        segment.tags = self.tags;
        segment
    }
}
