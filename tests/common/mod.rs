//! In-memory stand-ins for the external collaborators
//!
//! Shared by the integration tests. Each fake keeps just enough state to
//! assert on what the services asked of it.
#![allow(dead_code)]

use chrono::{DateTime, Utc};
use notary_orders::access::{Directory, DirectoryError};
use notary_orders::checkout::{
    HostedSession, PaymentProcessor, ProcessorError, ProcessorLineItem, ProcessorSession,
    SessionRequest,
};
use notary_orders::storage::{BlobError, BlobStore, Permission, StoredObject};
use notary_orders::store::SledStore;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tempfile::{TempDir, tempdir};

/// Sled uses file-based locking, so every test gets its own database in a
/// temp dir that is cleaned up on drop.
pub fn temp_store(name: &str) -> anyhow::Result<(TempDir, SledStore)> {
    let temp_dir = tempdir()?;
    let store = SledStore::open(temp_dir.path().join(format!("{name}.db")))?;
    Ok((temp_dir, store))
}

// ---- payment processor ----

#[derive(Default)]
struct ProcessorState {
    by_key: HashMap<String, String>,
    sessions: HashMap<String, ProcessorSession>,
    requests: Vec<SessionRequest>,
    unavailable: bool,
}

#[derive(Default)]
pub struct FakeProcessor {
    state: Mutex<ProcessorState>,
}

impl FakeProcessor {
    /// Distinct sessions created upstream.
    pub fn sessions_created(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn requests(&self) -> Vec<SessionRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    pub fn mark_paid(&self, session_id: &str, customer_name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.payment_status = "paid".into();
            session.customer_name = Some(customer_name.into());
        }
    }

    pub fn mark_declined(&self, session_id: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.payment_status = "unpaid".into();
            session.failure_reason = Some(reason.into());
        }
    }
}

impl PaymentProcessor for FakeProcessor {
    fn create_session(&self, request: &SessionRequest) -> Result<HostedSession, ProcessorError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        if state.unavailable {
            return Err(ProcessorError::Unavailable("connection refused".into()));
        }

        let id = match state.by_key.get(&request.idempotency_key) {
            Some(id) => id.clone(),
            None => {
                let id = format!("cs_test_{}", state.sessions.len() + 1);
                let amount_total = request
                    .line_items
                    .iter()
                    .map(|li| li.unit_amount * u64::from(li.quantity))
                    .sum();
                let session = ProcessorSession {
                    id: id.clone(),
                    payment_status: "unpaid".into(),
                    amount_total: Some(amount_total),
                    currency: Some(request.currency.clone()),
                    customer_email: request.customer_email.clone(),
                    customer_name: None,
                    line_items: request
                        .line_items
                        .iter()
                        .enumerate()
                        .map(|(i, li)| ProcessorLineItem {
                            description: li.label.clone(),
                            quantity: li.quantity,
                            price_id: Some(format!("price_{i}")),
                        })
                        .collect(),
                    metadata: request.metadata.clone(),
                    failure_reason: None,
                };
                state.by_key.insert(request.idempotency_key.clone(), id.clone());
                state.sessions.insert(id.clone(), session);
                id
            }
        };

        Ok(HostedSession {
            url: format!("https://pay.example/checkout/{id}"),
            id,
        })
    }

    fn retrieve_session(&self, session_id: &str) -> Result<ProcessorSession, ProcessorError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(ProcessorError::Unavailable("connection refused".into()));
        }
        state
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| ProcessorError::NotFound(session_id.into()))
    }
}

// ---- blob store ----

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing: Mutex<HashSet<String>>,
    list_calls: Mutex<usize>,
}

impl MemoryBlobStore {
    pub fn put(&self, id: &str, name: &str, created_at: DateTime<Utc>, permissions: Vec<Permission>) {
        self.objects.lock().unwrap().insert(
            id.to_string(),
            StoredObject {
                id: id.to_string(),
                name: name.to_string(),
                size: 1024,
                created_at,
                permissions,
            },
        );
    }

    /// Every storage call touching `id` fails from now on.
    pub fn fail_on(&self, id: &str) {
        self.failing.lock().unwrap().insert(id.to_string());
    }

    pub fn get(&self, id: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    fn check(&self, id: &str) -> Result<(), BlobError> {
        if self.failing.lock().unwrap().contains(id) {
            return Err(BlobError::Request(format!("injected failure for {id}")));
        }
        Ok(())
    }
}

impl BlobStore for MemoryBlobStore {
    fn list_objects(
        &self,
        _bucket_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredObject>, BlobError> {
        *self.list_calls.lock().unwrap() += 1;
        let objects = self.objects.lock().unwrap();

        Ok(objects
            .values()
            .filter(|o| cursor.is_none_or(|c| o.id.as_str() > c))
            .take(limit)
            .cloned()
            .collect())
    }

    fn delete_object(&self, _bucket_id: &str, object_id: &str) -> Result<(), BlobError> {
        self.check(object_id)?;
        self.objects
            .lock()
            .unwrap()
            .remove(object_id)
            .map(|_| ())
            .ok_or_else(|| BlobError::NotFound(object_id.into()))
    }

    fn set_permissions(
        &self,
        _bucket_id: &str,
        object_id: &str,
        permissions: &[Permission],
    ) -> Result<(), BlobError> {
        self.check(object_id)?;
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(object_id)
            .ok_or_else(|| BlobError::NotFound(object_id.into()))?;
        object.permissions = permissions.to_vec();
        Ok(())
    }
}

/// Always returns a full page with the same last id.
pub struct StuckCursorStore {
    pub page: Vec<StoredObject>,
}

impl BlobStore for StuckCursorStore {
    fn list_objects(&self, _: &str, _: Option<&str>, _: usize) -> Result<Vec<StoredObject>, BlobError> {
        Ok(self.page.clone())
    }

    fn delete_object(&self, _: &str, _: &str) -> Result<(), BlobError> {
        Ok(())
    }

    fn set_permissions(&self, _: &str, _: &str, _: &[Permission]) -> Result<(), BlobError> {
        Ok(())
    }
}

// ---- identity provider ----

#[derive(Default)]
pub struct FakeDirectory {
    accounts: HashMap<String, String>,
    down: bool,
}

impl FakeDirectory {
    /// Every lookup fails as if the identity provider timed out.
    pub fn unavailable() -> Self {
        Self {
            down: true,
            ..Default::default()
        }
    }

    pub fn with_account(mut self, email: &str, account_id: &str) -> Self {
        self.accounts.insert(email.to_string(), account_id.to_string());
        self
    }
}

impl Directory for FakeDirectory {
    fn find_account_by_email(&self, email: &str) -> Result<Option<String>, DirectoryError> {
        if self.down {
            return Err(DirectoryError("identity provider timeout".into()));
        }
        Ok(self.accounts.get(email).cloned())
    }
}
