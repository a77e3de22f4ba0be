//! Broadcast topic naming
//!
//! Every connection joins the topic of the page it attached with. The page
//! topic is `page:` followed by the canonical route: query and fragment
//! dropped, repeated slashes collapsed, trailing slash removed (except for the
//! root) and ASCII-lowercased. `/Todo/?tab=2#top` and `/todo` share a topic.

use serde::{Deserialize, Serialize};

/// Prefix for page topics
const PAGE_PREFIX: &str = "page:";

/// Named broadcast group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Arbitrary topic chosen by server code
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Default topic for connections viewing `route`
    pub fn for_page(route: &str) -> Self {
        Self(format!("{}{}", PAGE_PREFIX, canonical_route(route)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a page topic
    pub fn is_page(&self) -> bool {
        self.0.starts_with(PAGE_PREFIX)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical form of a page route
pub fn canonical_route(route: &str) -> String {
    let path = route
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim();

    let segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.to_ascii_lowercase())
        .collect();

    format!("/{}", segments.join("/"))
}
