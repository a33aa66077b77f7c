//! Store interfaces for profiles and segments, with in-memory implementations.
//!
//! Persistence is owned by the dashboard; these traits are the seam the
//! resolver and the API talk through.

use async_trait::async_trait;
use broadcast_core::{BroadcastResult, Profile};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::segment::Segment;

/// Predicates pushed down to the profile store, plus the page window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileQuery {
    pub exclude_deleted: bool,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct ProfilePage {
    pub profiles: Vec<Profile>,
    /// Offset of the next page, `None` on the last page.
    pub next_offset: Option<usize>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn query(&self, query: &ProfileQuery) -> BroadcastResult<ProfilePage>;
}

#[async_trait]
pub trait SegmentStore: Send + Sync {
    async fn get(&self, id: Uuid) -> BroadcastResult<Option<Segment>>;
    async fn list(&self) -> BroadcastResult<Vec<Segment>>;
    async fn upsert(&self, segment: Segment) -> BroadcastResult<()>;
    async fn delete(&self, id: Uuid) -> BroadcastResult<bool>;
}

/// Drain every page of the store into one snapshot.
pub async fn load_all(
    store: &dyn ProfileStore,
    exclude_deleted: bool,
    page_size: usize,
) -> BroadcastResult<Vec<Profile>> {
    let mut query = ProfileQuery {
        exclude_deleted,
        offset: 0,
        limit: page_size.max(1),
    };
    let mut profiles = Vec::new();
    loop {
        let page = store.query(&query).await?;
        profiles.extend(page.profiles);
        match page.next_offset {
            Some(next) if next > query.offset => query.offset = next,
            _ => break,
        }
    }
    Ok(profiles)
}

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<Vec<Profile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profiles(profiles: Vec<Profile>) -> Self {
        Self {
            profiles: RwLock::new(profiles),
        }
    }

    pub fn insert(&self, profile: Profile) {
        self.profiles.write().push(profile);
    }

    pub fn snapshot(&self) -> Vec<Profile> {
        self.profiles.read().clone()
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn query(&self, query: &ProfileQuery) -> BroadcastResult<ProfilePage> {
        let profiles = self.profiles.read();
        let mut matched = profiles
            .iter()
            .filter(|p| !(query.exclude_deleted && p.is_deleted()))
            .skip(query.offset);

        let page: Vec<Profile> = matched.by_ref().take(query.limit).cloned().collect();
        let next_offset = if matched.next().is_some() {
            Some(query.offset + page.len())
        } else {
            None
        };

        Ok(ProfilePage {
            profiles: page,
            next_offset,
        })
    }
}

/// Segment registry keyed by id.
#[derive(Default)]
pub struct InMemorySegmentStore {
    segments: DashMap<Uuid, Segment>,
}

impl InMemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segments(segments: Vec<Segment>) -> Self {
        Self {
            segments: segments.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[async_trait]
impl SegmentStore for InMemorySegmentStore {
    async fn get(&self, id: Uuid) -> BroadcastResult<Option<Segment>> {
        Ok(self.segments.get(&id).map(|s| s.clone()))
    }

    async fn list(&self) -> BroadcastResult<Vec<Segment>> {
        let mut segments: Vec<Segment> = self.segments.iter().map(|s| s.value().clone()).collect();
        segments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(segments)
    }

    async fn upsert(&self, segment: Segment) -> BroadcastResult<()> {
        self.segments.insert(segment.id, segment);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> BroadcastResult<bool> {
        Ok(self.segments.remove(&id).is_some())
    }
}
