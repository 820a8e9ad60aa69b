//! Shared fixtures for reconciliation integration tests.
//!
//! Hand-written in-memory doubles for the connector and the identity store,
//! plus the schema, provision and engine configuration used across tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use xavyo_connector::error::{ConnectorError, ConnectorResult};
use xavyo_connector::object::ConnObject;
use xavyo_connector::operation::{AttributeDelta, Filter, PageRequest, SearchResult, SyncToken};
use xavyo_connector::schema::ObjectSchema;
use xavyo_connector::traits::Connector;
use xavyo_reconciliation::prelude::*;

pub const OBJECT_CLASS: &str = "inetOrgPerson";

// =============================================================================
// Mock Connector
// =============================================================================

#[derive(Debug, Default)]
struct RemoteState {
    objects: BTreeMap<String, ConnObject>,
    /// Change log: (sequence, object as of that change).
    changes: Vec<(u64, ConnObject)>,
    seq: u64,
    unreachable: bool,
    /// Unfiltered searches at or past this offset fail as unreachable.
    fail_search_from: Option<usize>,
    conflict_on_create: bool,
    reject_update: HashSet<String>,
}

/// In-memory connector with a sequenced change log.
///
/// Unfiltered searches with a sync token return the change log after that
/// token; without one they return the current content. Filtered searches
/// (correlation) always run against the current content. Cursors are
/// offsets.
pub struct MockConnector {
    name: String,
    state: Mutex<RemoteState>,
    since_tokens: Mutex<Vec<Option<String>>>,
    pub search_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl MockConnector {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(RemoteState::default()),
            since_tokens: Mutex::new(Vec::new()),
            search_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Record a remote change (create or modify).
    pub fn change(&self, object: ConnObject) {
        let mut state = self.state.lock().unwrap();
        state.seq += 1;
        let seq = state.seq;
        state.objects.insert(object.key().to_string(), object.clone());
        state.changes.push((seq, object));
    }

    /// Record a remote deletion; the change log carries a tombstone.
    pub fn remove(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.seq += 1;
        let seq = state.seq;
        state.objects.remove(key);
        state.changes.push((seq, ConnObject::tombstone(key)));
    }

    /// Place an object without logging a change.
    pub fn seed(&self, object: ConnObject) {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(object.key().to_string(), object);
    }

    pub fn object(&self, key: &str) -> Option<ConnObject> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn fail_search_from(&self, offset: Option<usize>) {
        self.state.lock().unwrap().fail_search_from = offset;
    }

    pub fn conflict_on_create(&self, conflict: bool) {
        self.state.lock().unwrap().conflict_on_create = conflict;
    }

    pub fn reject_update(&self, key: &str) {
        self.state.lock().unwrap().reject_update.insert(key.to_string());
    }

    /// Sync tokens passed to unfiltered searches, in call order.
    pub fn since_tokens(&self) -> Vec<Option<String>> {
        self.since_tokens.lock().unwrap().clone()
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn mutations(&self) -> usize {
        self.creates() + self.updates() + self.deletes()
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn display_name(&self) -> &str {
        &self.name
    }

    async fn search(
        &self,
        _object_class: &str,
        filter: Option<&Filter>,
        page: &PageRequest,
    ) -> ConnectorResult<SearchResult> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(ConnectorError::unreachable(format!("{} is down", self.name)));
        }

        let offset = match page.cursor.as_deref() {
            Some(cursor) => cursor.parse::<usize>().map_err(|_| ConnectorError::InvalidData {
                message: format!("bad cursor '{cursor}'"),
            })?,
            None => 0,
        };

        if filter.is_none() {
            self.since_tokens
                .lock()
                .unwrap()
                .push(page.sync_token.as_ref().map(|t| t.as_str().to_string()));
            if matches!(state.fail_search_from, Some(from) if offset >= from) {
                return Err(ConnectorError::unreachable(format!(
                    "{} dropped the connection",
                    self.name
                )));
            }
        }

        let (entries, incremental): (Vec<(u64, ConnObject)>, bool) = match (filter, &page.sync_token) {
            (Some(filter), _) => (
                state
                    .objects
                    .values()
                    .filter(|o| filter.matches(*o))
                    .map(|o| (state.seq, o.clone()))
                    .collect(),
                false,
            ),
            (None, Some(token)) => {
                let since: u64 = token.as_str().parse().unwrap_or(0);
                (
                    state
                        .changes
                        .iter()
                        .filter(|(seq, _)| *seq > since)
                        .cloned()
                        .collect(),
                    true,
                )
            }
            (None, None) => (
                state
                    .objects
                    .values()
                    .map(|o| (state.seq, o.clone()))
                    .collect(),
                false,
            ),
        };

        let size = page.page_size as usize;
        let end = (offset + size).min(entries.len());
        let slice = entries.get(offset..end).unwrap_or_default();
        let mut result = SearchResult::new(slice.iter().map(|(_, o)| o.clone()).collect());
        if end < entries.len() {
            result = result.with_next_cursor(end.to_string());
        }
        if filter.is_none() {
            let token = if incremental {
                slice.last().map(|(seq, _)| *seq)
            } else if end >= entries.len() && state.seq > 0 {
                Some(state.seq)
            } else {
                None
            };
            if let Some(token) = token {
                result = result.with_sync_token(SyncToken::new(token.to_string()));
            }
        }
        Ok(result)
    }

    async fn create(&self, _object_class: &str, object: &ConnObject) -> ConnectorResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(ConnectorError::unreachable(format!("{} is down", self.name)));
        }
        if state.conflict_on_create {
            return Err(ConnectorError::conflict(object.key(), "entry already exists"));
        }
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        state
            .objects
            .insert(object.key().to_string(), object.without_password());
        Ok(object.key().to_string())
    }

    async fn update(
        &self,
        _object_class: &str,
        key: &str,
        delta: &AttributeDelta,
    ) -> ConnectorResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(ConnectorError::unreachable(format!("{} is down", self.name)));
        }
        if state.reject_update.contains(key) {
            return Err(ConnectorError::InvalidData {
                message: format!("update of '{key}' rejected"),
            });
        }
        let current = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ConnectorError::not_found(key))?;
        self.update_calls.fetch_add(1, Ordering::SeqCst);

        let mut updated = ConnObject::new(key);
        for (name, values) in current.attributes() {
            if !delta.clear.contains(name) && !delta.replace.contains_key(name) {
                updated = updated.with_values(name.clone(), values.clone());
            }
        }
        for (name, values) in &delta.replace {
            updated = updated.with_values(name.clone(), values.clone());
        }
        state.objects.insert(key.to_string(), updated);
        Ok(())
    }

    async fn delete(&self, _object_class: &str, key: &str) -> ConnectorResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            return Err(ConnectorError::unreachable(format!("{} is down", self.name)));
        }
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        state
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ConnectorError::not_found(key))
    }

    async fn describe_schema(&self, object_class: &str) -> ConnectorResult<ObjectSchema> {
        Err(ConnectorError::unsupported(format!("describe_schema({object_class})")))
    }
}

// =============================================================================
// In-Memory Identity Store
// =============================================================================

/// Identity store keyed by (tenant, key) that notifies the commit listener
/// after every mutation.
#[derive(Default)]
pub struct MemoryStore {
    identities: Mutex<BTreeMap<(TenantId, AnyKey), Any>>,
    reject_create: Mutex<HashSet<String>>,
    pub mutations: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant: TenantId, any: Any) -> AnyKey {
        let key = any.key;
        self.identities.lock().unwrap().insert((tenant, key), any);
        key
    }

    pub fn all(&self, tenant: TenantId) -> Vec<Any> {
        self.identities
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), _)| *t == tenant)
            .map(|(_, any)| any.clone())
            .collect()
    }

    pub fn by_name(&self, tenant: TenantId, name: &str) -> Option<Any> {
        self.all(tenant).into_iter().find(|any| any.name() == name)
    }

    /// Make creation of an identity with this name fail with a constraint
    /// violation.
    pub fn reject_create(&self, name: &str) {
        self.reject_create.lock().unwrap().insert(name.to_string());
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}

fn apply_draft(any: &mut Any, draft: &AnyDraft) {
    if let Some(name) = &draft.name {
        match &mut any.kind {
            AnyKind::User { username, .. } => *username = name.clone(),
            AnyKind::Group { name: current } | AnyKind::AnyObject { name: current, .. } => {
                *current = name.clone();
            }
        }
    }
    for (schema, values) in draft.plain.iter() {
        any.plain.set(schema.clone(), values.clone());
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find(
        &self,
        tenant: TenantId,
        any_type: &AnyType,
        criteria: &[Criterion],
    ) -> Result<Vec<Any>, StoreError> {
        let filter = Filter::and(criteria.iter().map(Criterion::to_filter).collect());
        Ok(self
            .all(tenant)
            .into_iter()
            .filter(|any| any.any_type() == *any_type && filter.matches(any))
            .collect())
    }

    async fn select(
        &self,
        tenant: TenantId,
        any_type: &AnyType,
        filter: Option<&Filter>,
    ) -> Result<Vec<Any>, StoreError> {
        Ok(self
            .all(tenant)
            .into_iter()
            .filter(|any| any.any_type() == *any_type)
            .filter(|any| filter.map_or(true, |f| f.matches(any)))
            .collect())
    }

    async fn get(&self, tenant: TenantId, key: AnyKey) -> Result<Option<Any>, StoreError> {
        Ok(self.identities.lock().unwrap().get(&(tenant, key)).cloned())
    }

    async fn create(
        &self,
        tenant: TenantId,
        draft: &AnyDraft,
        listener: &dyn CommitListener,
    ) -> Result<AnyKey, StoreError> {
        let name = draft.name.clone().unwrap_or_default();
        if self.reject_create.lock().unwrap().contains(&name) {
            return Err(StoreError::constraint(format!("'{name}' violates a uniqueness constraint")));
        }
        let key = AnyKey::new();
        let kind = match &draft.any_type {
            AnyType::User => AnyKind::User {
                username: name,
                password: None,
            },
            AnyType::Group => AnyKind::Group { name },
            AnyType::AnyObject(type_name) => AnyKind::AnyObject {
                type_name: type_name.clone(),
                name,
            },
        };
        let mut any = Any::new(key, kind);
        apply_draft(&mut any, draft);
        self.identities.lock().unwrap().insert((tenant, key), any);
        self.mutations.fetch_add(1, Ordering::SeqCst);

        listener.committed(
            tenant,
            &CommitEvent {
                key,
                any_type: draft.any_type.clone(),
                kind: CommitKind::Created,
            },
        );
        Ok(key)
    }

    async fn update(
        &self,
        tenant: TenantId,
        key: AnyKey,
        draft: &AnyDraft,
        listener: &dyn CommitListener,
    ) -> Result<(), StoreError> {
        {
            let mut identities = self.identities.lock().unwrap();
            let any = identities
                .get_mut(&(tenant, key))
                .ok_or_else(|| StoreError::NotFound {
                    key: key.to_string(),
                })?;
            apply_draft(any, draft);
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);

        listener.committed(
            tenant,
            &CommitEvent {
                key,
                any_type: draft.any_type.clone(),
                kind: CommitKind::Updated,
            },
        );
        Ok(())
    }

    async fn delete(
        &self,
        tenant: TenantId,
        key: AnyKey,
        listener: &dyn CommitListener,
    ) -> Result<(), StoreError> {
        let removed = self
            .identities
            .lock()
            .unwrap()
            .remove(&(tenant, key))
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })?;
        self.mutations.fetch_add(1, Ordering::SeqCst);

        listener.committed(
            tenant,
            &CommitEvent {
                key,
                any_type: removed.any_type(),
                kind: CommitKind::Deleted,
            },
        );
        Ok(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

/// User schemas: plain `email` and `fullname`, virtual `ext_groups`.
pub fn schemas() -> SchemaRegistry {
    SchemaRegistry::builder()
        .plain(AnyType::User, "email")
        .plain(AnyType::User, "fullname")
        .declare(AnyType::User, "ext_groups", SchemaType::Virtual)
        .build()
}

/// `username <-> uid` (key), `email <-> mail` lowercased, `fullname <-> cn`,
/// virtual `ext_groups <- memberOf`.
pub fn user_provision() -> Provision {
    Provision::new(AnyType::User, OBJECT_CLASS)
        .with_item(Item::key("username", "uid"))
        .with_item(Item::new("email", "mail").with_transformer(Transformer::Lowercase))
        .with_item(Item::new("fullname", "cn"))
        .with_item(
            Item::new("ext_groups", "memberOf")
                .with_purpose(ItemPurpose::Pull)
                .multivalued(),
        )
}

pub fn resource(key: &str) -> ExternalResource {
    ExternalResource::new(key).with_provision(user_provision())
}

/// Small pages, fast retries.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        page_size: 2,
        worker_pool_size: 4,
        connector_timeout_ms: 1_000,
        retry_max_attempts: 1,
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 2,
        ..EngineConfig::default()
    }
}

pub fn remote_user(uid: &str, mail: &str) -> ConnObject {
    ConnObject::new(uid)
        .with("uid", uid)
        .with("mail", mail)
        .with("cn", uid.to_uppercase())
}

pub fn local_user(username: &str, email: &str) -> Any {
    Any::user(AnyKey::new(), username)
        .with_plain("email", strings(&[email]))
        .with_plain("fullname", vec![username.to_uppercase()])
}

/// Engine plus handles on every in-memory collaborator.
pub struct Harness {
    pub engine: ReconciliationEngine,
    pub store: Arc<MemoryStore>,
    pub tokens: Arc<MemorySyncTokenStore>,
    pub remediation: Arc<MemoryRemediationSink>,
    pub tenant: TenantId,
}

pub fn harness(connectors: Vec<(&str, Arc<MockConnector>)>) -> Harness {
    xavyo_reconciliation::logging::init_test_logging();

    let store = Arc::new(MemoryStore::new());
    let tokens = Arc::new(MemorySyncTokenStore::new());
    let remediation = Arc::new(MemoryRemediationSink::new());

    let mut builder = ReconciliationEngine::builder(store.clone())
        .with_config(test_config())
        .with_schemas(schemas())
        .with_token_store(tokens.clone())
        .with_remediation_sink(remediation.clone());
    for (key, connector) in connectors {
        builder = builder.with_resource(resource(key), connector);
    }

    Harness {
        engine: builder.build().expect("valid test config"),
        store,
        tokens,
        remediation,
        tenant: TenantId::new(),
    }
}
