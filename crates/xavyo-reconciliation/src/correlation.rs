//! Correlation engine.
//!
//! Finds the counterpart(s) of a record on the other side of a sync by
//! querying with the conjunction of the rule's attribute predicates: the
//! identity store for pull, the connector for push.
//!
//! Candidates are always sorted by key before a [`MatchResult`] is built, so
//! for fixed inputs and fixed stored state the result, including which
//! reference comes first in an ambiguous match, never varies.

use serde::{Deserialize, Serialize};
use tracing::debug;

use xavyo_connector::object::{AttributeSource, ConnObject};
use xavyo_connector::operation::{Filter, PageRequest};
use xavyo_connector::traits::Connector;

use crate::error::{ReconciliationError, ReconciliationResult};
use crate::ids::TenantId;
use crate::model::{Any, AnyDraft, AnyType, Provision, TaskDirection};
use crate::store::IdentityStore;

/// Page size used when searching a connector for counterparts.
const CORRELATION_PAGE_SIZE: u32 = 50;

/// Upper bound on pages read while correlating one record on a connector.
const MAX_CORRELATION_PAGES: usize = 16;

/// How a correlation attribute is compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[default]
    Equals,
    EqualsIgnoreCase,
}

/// One predicate of a correlation rule, named by internal attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationItem {
    pub attribute: String,
    #[serde(default)]
    pub comparison: Comparison,
}

impl CorrelationItem {
    pub fn equals(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            comparison: Comparison::Equals,
        }
    }

    pub fn equals_ignore_case(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            comparison: Comparison::EqualsIgnoreCase,
        }
    }
}

/// Ordered attribute predicates identifying a counterpart record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub items: Vec<CorrelationItem>,
}

impl CorrelationRule {
    pub fn new(items: Vec<CorrelationItem>) -> Self {
        Self { items }
    }
}

/// A single equality term of an identity store query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criterion {
    pub attribute: String,
    pub comparison: Comparison,
    pub value: String,
}

impl Criterion {
    /// Express this criterion as a filter.
    pub fn to_filter(&self) -> Filter {
        match self.comparison {
            Comparison::Equals => Filter::eq(&self.attribute, &self.value),
            Comparison::EqualsIgnoreCase => Filter::eq_ignore_case(&self.attribute, &self.value),
        }
    }
}

/// Outcome of correlating one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult<T> {
    Unmatched,
    Matched(T),
    /// More than one counterpart, sorted by key.
    Ambiguous(Vec<T>),
}

/// Variant of a [`MatchResult`], without the references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Unmatched,
    Matched,
    Ambiguous,
}

impl<T> MatchResult<T> {
    /// Build a result from unordered candidates, sorting and de-duplicating
    /// them by `key`.
    pub fn from_candidates<K, F>(mut candidates: Vec<T>, key: F) -> Self
    where
        K: Ord,
        F: Fn(&T) -> K,
    {
        candidates.sort_by(|a, b| key(a).cmp(&key(b)));
        candidates.dedup_by(|a, b| key(a) == key(b));
        match candidates.len() {
            0 => MatchResult::Unmatched,
            1 => candidates
                .pop()
                .map_or(MatchResult::Unmatched, MatchResult::Matched),
            _ => MatchResult::Ambiguous(candidates),
        }
    }

    pub fn kind(&self) -> MatchKind {
        match self {
            MatchResult::Unmatched => MatchKind::Unmatched,
            MatchResult::Matched(_) => MatchKind::Matched,
            MatchResult::Ambiguous(_) => MatchKind::Ambiguous,
        }
    }
}

/// Build the store query for a pulled record.
///
/// A rule attribute without a value after mapping is an item failure: such a
/// record cannot be told apart from an unrelated one, and treating it as
/// unmatched would create a duplicate on every run.
pub fn inbound_criteria(
    rule: &CorrelationRule,
    draft: &AnyDraft,
) -> ReconciliationResult<Vec<Criterion>> {
    rule.items
        .iter()
        .map(|item| {
            let value = draft
                .attribute_values(&item.attribute)
                .first()
                .ok_or_else(|| {
                    ReconciliationError::correlation(format!(
                        "record has no value for correlation attribute '{}'",
                        item.attribute
                    ))
                })?;
            Ok(Criterion {
                attribute: item.attribute.clone(),
                comparison: item.comparison,
                value: value.clone(),
            })
        })
        .collect()
}

/// Build the connector filter for a pushed record.
///
/// Each rule attribute is translated to its external name through the
/// provision's outbound items, with the value taken from the mapped object.
pub fn outbound_filter(
    rule: &CorrelationRule,
    provision: &Provision,
    mapped: &ConnObject,
) -> ReconciliationResult<Filter> {
    let mut terms = rule
        .items
        .iter()
        .map(|item| {
            let mapping = provision
                .items_for(TaskDirection::Push)
                .find(|i| i.int_attr_name == item.attribute && !i.password)
                .ok_or_else(|| {
                    ReconciliationError::correlation(format!(
                        "correlation attribute '{}' is not mapped outbound",
                        item.attribute
                    ))
                })?;
            let value = mapped.first(&mapping.ext_attr_name).ok_or_else(|| {
                ReconciliationError::correlation(format!(
                    "outbound object has no value for '{}'",
                    mapping.ext_attr_name
                ))
            })?;
            Ok(Criterion {
                attribute: mapping.ext_attr_name.clone(),
                comparison: item.comparison,
                value: value.to_string(),
            }
            .to_filter())
        })
        .collect::<ReconciliationResult<Vec<Filter>>>()?;

    match terms.len() {
        0 => Err(ReconciliationError::correlation("correlation rule has no attributes")),
        1 => terms
            .pop()
            .ok_or_else(|| ReconciliationError::correlation("correlation rule has no attributes")),
        _ => Ok(Filter::and(terms)),
    }
}

/// Correlate a pulled record against the identity store.
pub async fn correlate_inbound(
    store: &dyn IdentityStore,
    tenant: TenantId,
    any_type: &AnyType,
    rule: &CorrelationRule,
    draft: &AnyDraft,
) -> ReconciliationResult<MatchResult<Any>> {
    let criteria = inbound_criteria(rule, draft)?;
    find_identities(store, tenant, any_type, &criteria).await
}

/// Identities matching every criterion, as a key-sorted match result.
pub async fn find_identities(
    store: &dyn IdentityStore,
    tenant: TenantId,
    any_type: &AnyType,
    criteria: &[Criterion],
) -> ReconciliationResult<MatchResult<Any>> {
    let candidates = store.find(tenant, any_type, criteria).await?;
    debug!(tenant_id = %tenant, any_type = %any_type, candidates = candidates.len(), "Store correlation done");
    Ok(MatchResult::from_candidates(candidates, |any| any.key))
}

/// Correlate a pushed record against a connector.
///
/// Every page of candidates is read; a candidate set larger than the page
/// budget is an item failure rather than a silently truncated match.
pub async fn correlate_outbound(
    connector: &dyn Connector,
    resource: &str,
    object_class: &str,
    filter: &Filter,
) -> ReconciliationResult<MatchResult<ConnObject>> {
    let mut candidates = Vec::new();
    let mut page = PageRequest::new(CORRELATION_PAGE_SIZE);
    for _ in 0..MAX_CORRELATION_PAGES {
        let result = connector
            .search(object_class, Some(filter), &page)
            .await
            .map_err(|e| ReconciliationError::from_connector(resource, e))?;
        candidates.extend(result.objects);
        match result.next_cursor {
            Some(next) if result.has_more => page = page.with_cursor(Some(next)),
            _ => {
                return Ok(MatchResult::from_candidates(candidates, |obj| {
                    obj.key().to_string()
                }))
            }
        }
    }

    Err(ReconciliationError::correlation(format!(
        "more than {} candidates on resource '{resource}'",
        MAX_CORRELATION_PAGES * CORRELATION_PAGE_SIZE as usize
    )))
}
