//! Connector operation types
//!
//! Filters, page requests, search results, sync tokens and attribute deltas.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::object::{AttributeSource, ConnObject, Password};

/// Opaque, resource-defined cursor marking how far an incremental pull has
/// progressed.
///
/// The engine never compares tokens; it passes the stored one to the next
/// search and persists whatever the connector hands back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncToken(String);

impl SyncToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Filter for search operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Match objects where attribute equals value.
    Equals { attribute: String, value: String },

    /// Match objects where attribute equals value, ignoring case.
    EqualsIgnoreCase { attribute: String, value: String },

    /// Match objects where attribute contains value (substring).
    Contains { attribute: String, value: String },

    /// Match objects where attribute starts with value.
    StartsWith { attribute: String, value: String },

    /// Match objects where attribute exists (has any value).
    Present { attribute: String },

    /// Logical AND of multiple filters.
    And { filters: Vec<Filter> },

    /// Logical OR of multiple filters.
    Or { filters: Vec<Filter> },

    /// Logical NOT of a filter.
    Not { filter: Box<Filter> },
}

impl Filter {
    /// Create an equals filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a case-insensitive equals filter.
    pub fn eq_ignore_case(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::EqualsIgnoreCase {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a contains filter.
    pub fn contains(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Contains {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a starts-with filter.
    pub fn starts_with(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::StartsWith {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a present (attribute exists) filter.
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Create an AND filter.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And { filters }
    }

    /// Create an OR filter.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or { filters }
    }

    /// Create a NOT filter (negation).
    pub fn negate(filter: Filter) -> Self {
        Filter::Not {
            filter: Box::new(filter),
        }
    }

    /// Combine this filter with another using AND.
    #[must_use]
    pub fn and_with(self, other: Filter) -> Self {
        match self {
            Filter::And { mut filters } => {
                filters.push(other);
                Filter::And { filters }
            }
            _ => Filter::And {
                filters: vec![self, other],
            },
        }
    }

    /// Evaluate the filter against any attribute source.
    ///
    /// A multi-valued attribute matches a leaf predicate when any one of its
    /// values does.
    pub fn matches<S: AttributeSource + ?Sized>(&self, source: &S) -> bool {
        match self {
            Filter::Equals { attribute, value } => {
                source.attribute_values(attribute).iter().any(|v| v == value)
            }
            Filter::EqualsIgnoreCase { attribute, value } => source
                .attribute_values(attribute)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
            Filter::Contains { attribute, value } => source
                .attribute_values(attribute)
                .iter()
                .any(|v| v.contains(value.as_str())),
            Filter::StartsWith { attribute, value } => source
                .attribute_values(attribute)
                .iter()
                .any(|v| v.starts_with(value.as_str())),
            Filter::Present { attribute } => !source.attribute_values(attribute).is_empty(),
            Filter::And { filters } => filters.iter().all(|f| f.matches(source)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(source)),
            Filter::Not { filter } => !filter.matches(source),
        }
    }
}

/// Pagination request for search operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    /// Maximum number of results to return.
    pub page_size: u32,

    /// Opaque cursor returned by the previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,

    /// Lower bound for incremental searches: only changes after this token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<SyncToken>,
}

impl PageRequest {
    /// Create a new page request with the given page size.
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            cursor: None,
            sync_token: None,
        }
    }

    /// Set the cursor for cursor-based pagination.
    #[must_use]
    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Restrict the search to changes after the given token.
    #[must_use]
    pub fn since(mut self, token: Option<SyncToken>) -> Self {
        self.sync_token = token;
        self
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(100)
    }
}

/// One page of a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matching objects.
    pub objects: Vec<ConnObject>,

    /// Cursor for the next page (if more results available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,

    /// Token to persist once this page has been fully processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<SyncToken>,

    /// Whether there are more results available.
    pub has_more: bool,
}

impl SearchResult {
    /// Create a new, final search result.
    pub fn new(objects: Vec<ConnObject>) -> Self {
        Self {
            objects,
            next_cursor: None,
            sync_token: None,
            has_more: false,
        }
    }

    /// Create an empty search result.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Set the next cursor.
    #[must_use]
    pub fn with_next_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.next_cursor = Some(cursor.into());
        self.has_more = true;
        self
    }

    /// Set the sync token reached by this page.
    #[must_use]
    pub fn with_sync_token(mut self, token: SyncToken) -> Self {
        self.sync_token = Some(token);
        self
    }

    /// Get the number of objects in this page.
    pub fn count(&self) -> usize {
        self.objects.len()
    }
}

/// Changes to apply to an existing remote object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDelta {
    /// Attributes whose values are replaced wholesale.
    #[serde(default)]
    pub replace: BTreeMap<String, Vec<String>>,

    /// Attributes to remove entirely.
    #[serde(default)]
    pub clear: BTreeSet<String>,

    /// New password, if it should change.
    #[serde(skip)]
    pub password: Option<Password>,
}

impl AttributeDelta {
    /// Create an empty delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the delta that turns `current` into `desired`.
    ///
    /// Only attributes present on `desired` are considered; attributes the
    /// mapping does not manage are left untouched on the remote side.
    pub fn between(current: &ConnObject, desired: &ConnObject) -> Self {
        let mut delta = Self::new();
        for (name, values) in desired.attributes() {
            if current.attribute_values(name) != values.as_slice() {
                delta.replace.insert(name.clone(), values.clone());
            }
        }
        delta
    }

    /// Replace all values of an attribute.
    pub fn replace(&mut self, name: impl Into<String>, values: Vec<String>) -> &mut Self {
        self.replace.insert(name.into(), values);
        self
    }

    /// Remove an attribute entirely.
    pub fn clear_attribute(&mut self, name: impl Into<String>) -> &mut Self {
        self.clear.insert(name.into());
        self
    }

    /// Whether the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.replace.is_empty() && self.clear.is_empty() && self.password.is_none()
    }

    /// Names of all attributes touched by this delta.
    pub fn affected_attributes(&self) -> Vec<&str> {
        self.replace
            .keys()
            .chain(self.clear.iter())
            .map(String::as_str)
            .collect()
    }
}
