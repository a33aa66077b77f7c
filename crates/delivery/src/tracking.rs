//! Tracking-link rewriting. Every `http(s)://` URL in a message body is
//! replaced with a short link on the tracking domain.
//!
//! This is a pure text transform: codes are neither persisted nor checked for
//! collisions here. Link resolution belongs to an external service, which
//! can plug in its own [`ShortCodeGenerator`].

use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use utoipa::ToSchema;

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"']+"#).expect("URL pattern is a valid regex")
    })
}

pub trait ShortCodeGenerator: Send + Sync {
    fn next_code(&self, original_url: &str) -> String;
}

/// Fixed-length random alphanumeric codes.
pub struct RandomShortCodes {
    length: usize,
}

impl RandomShortCodes {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl ShortCodeGenerator for RandomShortCodes {
    fn next_code(&self, _original_url: &str) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.length)
            .map(char::from)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TrackedLink {
    pub code: String,
    pub short_url: String,
    pub original_url: String,
}

pub struct LinkShortener {
    domain: String,
    codes: Arc<dyn ShortCodeGenerator>,
}

impl LinkShortener {
    pub fn new(domain: impl Into<String>, code_length: usize) -> Self {
        Self::with_generator(domain, Arc::new(RandomShortCodes::new(code_length)))
    }

    pub fn with_generator(domain: impl Into<String>, codes: Arc<dyn ShortCodeGenerator>) -> Self {
        let domain = domain.into();
        let domain = domain.trim_end_matches('/').to_string();
        Self { domain, codes }
    }

    /// Rewrite all URLs in `text`, appending the generated links to `links`.
    pub fn rewrite(&self, text: &str, links: &mut Vec<TrackedLink>) -> String {
        url_pattern()
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let original = caps[0].trim_end_matches(['.', ',', ';', ':', '!', '?', ')']);
                let trailing = &caps[0][original.len()..];
                let code = self.codes.next_code(original);
                let short_url = format!("https://{}/{}", self.domain, code);
                links.push(TrackedLink {
                    code,
                    short_url: short_url.clone(),
                    original_url: original.to_string(),
                });
                format!("{short_url}{trailing}")
            })
            .into_owned()
    }
}
