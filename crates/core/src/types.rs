use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Status value that marks a soft-deleted profile.
pub const DELETED_STATUS: &str = "deleted";

/// A contact record as held by the dashboard's profile store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub custom_fields: HashMap<String, Value>,
    #[serde(default)]
    pub notification_preferences: HashMap<String, bool>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_status() -> String {
    "active".to_string()
}

impl Profile {
    /// New active profile with no contact data.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            first_name: None,
            last_name: None,
            email: None,
            mobile: None,
            phone: None,
            status: default_status(),
            custom_fields: HashMap::new(),
            notification_preferences: HashMap::new(),
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_mobile(mut self, mobile: impl Into<String>) -> Self {
        self.mobile = Some(mobile.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom_fields.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.status.eq_ignore_ascii_case(DELETED_STATUS)
    }

    /// First non-blank of `mobile`, then `phone`.
    pub fn contact_address(&self) -> Option<&str> {
        [self.mobile.as_deref(), self.phone.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    pub fn is_reachable(&self) -> bool {
        self.contact_address().is_some()
    }

    /// Resolve a dot-separated field path against this profile.
    ///
    /// Top-level names map onto the struct fields; `custom_fields.*` walks
    /// nested JSON objects. A bare name that is not a profile field is looked
    /// up in `custom_fields`. Returns `None` when any path segment is missing.
    pub fn field(&self, path: &str) -> Option<Cow<'_, Value>> {
        let mut segments = path.split('.');
        let head = segments.next()?;

        let root: Cow<'_, Value> = match head {
            "id" => Cow::Owned(Value::String(self.id.to_string())),
            "first_name" => Cow::Owned(opt_string(&self.first_name)),
            "last_name" => Cow::Owned(opt_string(&self.last_name)),
            "email" => Cow::Owned(opt_string(&self.email)),
            "mobile" => Cow::Owned(opt_string(&self.mobile)),
            "phone" => Cow::Owned(opt_string(&self.phone)),
            "status" => Cow::Owned(Value::String(self.status.clone())),
            "created_at" => Cow::Owned(Value::String(self.created_at.to_rfc3339())),
            "updated_at" => Cow::Owned(Value::String(self.updated_at.to_rfc3339())),
            "tags" => Cow::Owned(Value::Array(
                self.tags.iter().cloned().map(Value::String).collect(),
            )),
            "custom_fields" => {
                let key = segments.next()?;
                let value = self.custom_fields.get(key)?;
                return walk(value, segments).map(Cow::Borrowed);
            }
            "notification_preferences" => {
                let key = segments.next()?;
                if segments.next().is_some() {
                    return None;
                }
                return self
                    .notification_preferences
                    .get(key)
                    .map(|b| Cow::Owned(Value::Bool(*b)));
            }
            other => {
                let value = self.custom_fields.get(other)?;
                return walk(value, segments).map(Cow::Borrowed);
            }
        };

        // Scalar profile fields have no children.
        match segments.next() {
            None => Some(root),
            Some(_) => None,
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}

fn opt_string(value: &Option<String>) -> Value {
    value
        .as_ref()
        .map(|s| Value::String(s.clone()))
        .unwrap_or(Value::Null)
}

fn walk<'a, 'p>(mut value: &'a Value, segments: impl Iterator<Item = &'p str>) -> Option<&'a Value> {
    for segment in segments {
        value = value.as_object()?.get(segment)?;
    }
    Some(value)
}
