//! In-memory remote-object backend.
//!
//! Behaves like a real versioned store (tokens, idempotent create, name
//! uniqueness) and adds fault injection, scripted provisioning states, and
//! call counters for tests and local runs.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use itertools::Itertools;
use rekon_core::RemoteError;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    CreateRequest, CreatedObject, ObjectSummary, RemoteObjects, RemoteOp, RemoteResult,
    RemoteStatus, VersionToken, VersionedObject,
};

const ID_SUFFIX_CHARS: usize = 12;

#[derive(Debug, Clone)]
struct StoredObject {
    name: String,
    payload: Value,
    version: u64,
    client_token: Option<String>,
}

impl StoredObject {
    fn token(&self) -> VersionToken {
        VersionToken::new(format!("v{}", self.version))
    }
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    faults: HashMap<RemoteOp, VecDeque<RemoteError>>,
    calls: HashMap<RemoteOp, u32>,
    scripts: HashMap<String, VecDeque<RemoteStatus>>,
}

impl State {
    fn enter(&mut self, op: RemoteOp) -> RemoteResult<()> {
        let count = self.calls.entry(op).or_default();
        *count = count.saturating_add(1);
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(fault) => {
                debug!(?op, error = %fault, "Injected fault");
                Err(fault)
            }
            None => Ok(()),
        }
    }

    fn object(&self, id: &str) -> RemoteResult<&StoredObject> {
        self.objects
            .get(id)
            .ok_or_else(|| RemoteError::not_found(id))
    }

    fn next_scripted(&mut self, id: &str, name: &str) -> Option<RemoteStatus> {
        let key = if self.scripts.contains_key(id) { id } else { name };
        let script = self.scripts.get_mut(key)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

/// In-memory [`RemoteObjects`] implementation.
#[derive(Debug)]
pub struct InMemoryObjects {
    service: String,
    ready_state: String,
    state: Mutex<State>,
}

impl InMemoryObjects {
    /// Create an empty backend whose objects report `AVAILABLE`.
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_ready_status(service, "AVAILABLE")
    }

    /// Create an empty backend whose objects report `ready_state` unless scripted.
    pub fn with_ready_status(service: impl Into<String>, ready_state: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ready_state: ready_state.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Insert an object directly, returning its id.
    pub async fn seed(&self, name: &str, payload: Value) -> String {
        let id = format!("{}-{name}", self.service);
        self.seed_with_id(&id, name, payload).await;
        id
    }

    /// Insert an object under a caller-chosen id.
    pub async fn seed_with_id(&self, id: &str, name: &str, payload: Value) {
        self.state.lock().await.objects.insert(
            id.to_string(),
            StoredObject {
                name: name.to_string(),
                payload,
                version: 1,
                client_token: None,
            },
        );
    }

    /// Fail the next call of `op` with `error`. Queued faults fire in order.
    pub async fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.state
            .lock()
            .await
            .faults
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fail the next `times` calls of `op` with `error`.
    pub async fn fail_times(&self, op: RemoteOp, times: u32, error: RemoteError) {
        let mut state = self.state.lock().await;
        let queue = state.faults.entry(op).or_default();
        (0..times).for_each(|_| queue.push_back(error.clone()));
    }

    /// Script the statuses reported for an object, keyed by id or name.
    ///
    /// Each status call consumes one entry; the last entry repeats.
    pub async fn script_status(&self, key: &str, statuses: Vec<RemoteStatus>) {
        self.state
            .lock()
            .await
            .scripts
            .insert(key.to_string(), statuses.into_iter().collect());
    }

    /// Number of calls made for `op`, including faulted ones.
    pub async fn calls(&self, op: RemoteOp) -> u32 {
        self.state
            .lock()
            .await
            .calls
            .get(&op)
            .copied()
            .unwrap_or_default()
    }

    /// Current payload of an object, without counting a read.
    pub async fn snapshot(&self, id: &str) -> Option<Value> {
        self.state
            .lock()
            .await
            .objects
            .get(id)
            .map(|object| object.payload.clone())
    }

    /// Id of the object with `name`, if any.
    pub async fn find_by_name(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .objects
            .iter()
            .find(|(_, object)| object.name == name)
            .map(|(id, _)| id.clone())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Simulate another writer: invalidate the current token without changing the payload.
    pub async fn bump_version(&self, id: &str) -> bool {
        self.modify(id, |_| {}).await
    }

    /// Simulate another writer changing the payload.
    pub async fn modify(&self, id: &str, change: impl FnOnce(&mut Value)) -> bool {
        match self.state.lock().await.objects.get_mut(id) {
            Some(object) => {
                change(&mut object.payload);
                object.version = object.version.saturating_add(1);
                true
            }
            None => false,
        }
    }

    fn derive_id(&self, client_token: &str) -> String {
        let suffix: String = client_token
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(ID_SUFFIX_CHARS)
            .collect();
        format!("{}-{suffix}", self.service)
    }
}

#[async_trait]
impl RemoteObjects for InMemoryObjects {
    fn service(&self) -> &str {
        &self.service
    }

    async fn create(&self, request: CreateRequest) -> RemoteResult<CreatedObject> {
        let mut state = self.state.lock().await;
        state.enter(RemoteOp::Create)?;

        let token = Some(request.client_token.as_str());
        if let Some((id, object)) = state
            .objects
            .iter()
            .find(|(_, object)| object.client_token.as_deref() == token)
        {
            debug!(service = %self.service, id, "Create replayed for existing client token");
            return Ok(CreatedObject {
                id: id.clone(),
                token: object.token(),
                created: false,
            });
        }

        if let Some((id, _)) = state
            .objects
            .iter()
            .find(|(_, object)| object.name == request.name)
        {
            return Err(RemoteError::already_exists(request.name, Some(id.clone())));
        }

        let id = self.derive_id(&request.client_token);
        if state.objects.contains_key(&id) {
            return Err(RemoteError::already_exists(request.name, Some(id)));
        }

        let object = StoredObject {
            name: request.name,
            payload: request.payload,
            version: 1,
            client_token: Some(request.client_token),
        };
        let token = object.token();
        state.objects.insert(id.clone(), object);
        debug!(service = %self.service, id, "Object created");

        Ok(CreatedObject {
            id,
            token,
            created: true,
        })
    }

    async fn read(&self, id: &str) -> RemoteResult<VersionedObject> {
        let mut state = self.state.lock().await;
        state.enter(RemoteOp::Read)?;
        let object = state.object(id)?;
        Ok(VersionedObject {
            id: id.to_string(),
            name: object.name.clone(),
            payload: object.payload.clone(),
            token: object.token(),
        })
    }

    async fn write(
        &self,
        id: &str,
        payload: Value,
        token: &VersionToken,
    ) -> RemoteResult<VersionToken> {
        let mut state = self.state.lock().await;
        state.enter(RemoteOp::Write)?;
        let object = state
            .objects
            .get_mut(id)
            .ok_or_else(|| RemoteError::not_found(id))?;
        if object.token() != *token {
            return Err(RemoteError::conflict(format!(
                "token {token} is stale for '{id}' (current {})",
                object.token()
            )));
        }
        object.payload = payload;
        object.version = object.version.saturating_add(1);
        Ok(object.token())
    }

    async fn delete(&self, id: &str, token: &VersionToken) -> RemoteResult<()> {
        let mut state = self.state.lock().await;
        state.enter(RemoteOp::Delete)?;
        let current = state.object(id)?.token();
        if current != *token {
            return Err(RemoteError::conflict(format!(
                "token {token} is stale for '{id}' (current {current})"
            )));
        }
        state.objects.remove(id);
        state.scripts.remove(id);
        Ok(())
    }

    async fn status(&self, id: &str) -> RemoteResult<RemoteStatus> {
        let mut state = self.state.lock().await;
        state.enter(RemoteOp::Status)?;
        let name = state.object(id)?.name.clone();
        Ok(state
            .next_scripted(id, &name)
            .unwrap_or_else(|| RemoteStatus::new(self.ready_state.clone())))
    }

    async fn list(&self) -> RemoteResult<Vec<ObjectSummary>> {
        let mut state = self.state.lock().await;
        state.enter(RemoteOp::List)?;
        Ok(state
            .objects
            .iter()
            .map(|(id, object)| ObjectSummary {
                id: id.clone(),
                name: object.name.clone(),
            })
            .sorted_by(|a, b| a.name.cmp(&b.name))
            .collect_vec())
    }
}
