//! Durable record stores backed by sled
//!
//! Three trees, each value a CBOR record:
//!
//! - `submissions`: submission id -> [`Submission`]
//! - `orders`: processor session id -> [`OrderRecord`]
//! - `file_index`: `email \0 batch \0 object id` -> object name
//!
//! All writes go through `compare_and_swap` so that a stale submission
//! update and a repeated order insert are detected rather than clobbering.
use crate::checkout::OrderRecord;
use crate::submission::{Submission, SubmissionPatch};
use crate::utils::normalise_email;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("stale update for {id}: expected version {expected}, found {found}")]
    VersionConflict { id: String, expected: u64, found: u64 },
    #[error("record encoding failed: {0}")]
    Codec(String),
    #[error("sled backend error: {0}")]
    Backend(#[from] sled::Error),
}

/// Document-database collaborator for submissions.
pub trait SubmissionStore {
    fn create(&self, submission: &Submission) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Submission, StoreError>;

    /// Applies `patch`. With `expected_version` set, the update is rejected
    /// when the stored record has moved on; without it last writer wins.
    fn update(
        &self,
        id: &str,
        expected_version: Option<u64>,
        patch: SubmissionPatch,
        now: DateTime<Utc>,
    ) -> Result<Submission, StoreError>;

    fn find_by_email(&self, client_email: &str) -> Result<Vec<Submission>, StoreError>;
}

/// Append-only paid orders keyed by processor session id.
pub trait OrderStore {
    /// Returns `false` when a record for the session already exists.
    fn insert_if_absent(&self, record: &OrderRecord) -> Result<bool, StoreError>;

    fn get_order(&self, session_id: &str) -> Result<Option<OrderRecord>, StoreError>;

    fn list_orders_for(&self, customer_email: &str) -> Result<Vec<OrderRecord>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFile {
    pub client_email: String,
    pub batch_id: String,
    pub object_id: String,
    pub object_name: String,
}

/// Explicit (client, batch) -> object mapping, the path convention is
/// only a display value on top of it.
pub trait FileIndex {
    fn record_file(
        &self,
        client_email: &str,
        batch_id: &str,
        object_id: &str,
        object_name: &str,
    ) -> Result<(), StoreError>;

    fn files_for(
        &self,
        client_email: &str,
        batch_id: Option<&str>,
    ) -> Result<Vec<IndexedFile>, StoreError>;

    /// Drops every entry pointing at `object_id`, returns how many.
    fn forget_object(&self, object_id: &str) -> Result<usize, StoreError>;
}

impl<T: SubmissionStore + ?Sized> SubmissionStore for &T {
    fn create(&self, submission: &Submission) -> Result<(), StoreError> {
        (**self).create(submission)
    }
    fn get(&self, id: &str) -> Result<Submission, StoreError> {
        (**self).get(id)
    }
    fn update(
        &self,
        id: &str,
        expected_version: Option<u64>,
        patch: SubmissionPatch,
        now: DateTime<Utc>,
    ) -> Result<Submission, StoreError> {
        (**self).update(id, expected_version, patch, now)
    }
    fn find_by_email(&self, client_email: &str) -> Result<Vec<Submission>, StoreError> {
        (**self).find_by_email(client_email)
    }
}

impl<T: OrderStore + ?Sized> OrderStore for &T {
    fn insert_if_absent(&self, record: &OrderRecord) -> Result<bool, StoreError> {
        (**self).insert_if_absent(record)
    }
    fn get_order(&self, session_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        (**self).get_order(session_id)
    }
    fn list_orders_for(&self, customer_email: &str) -> Result<Vec<OrderRecord>, StoreError> {
        (**self).list_orders_for(customer_email)
    }
}

pub struct SledStore {
    submissions: sled::Tree,
    orders: sled::Tree,
    file_index: sled::Tree,
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T>(bytes: &[u8]) -> Result<T, StoreError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

fn index_key(parts: &[&str]) -> Vec<u8> {
    parts.join("\0").into_bytes()
}

impl SledStore {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, StoreError> {
        Ok(Self {
            submissions: instance.open_tree("submissions")?,
            orders: instance.open_tree("orders")?,
            file_index: instance.open_tree("file_index")?,
        })
    }

    /// Opens (or creates) a database at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::new(Arc::new(db))
    }
}

impl SubmissionStore for SledStore {
    fn create(&self, submission: &Submission) -> Result<(), StoreError> {
        let bytes = encode(submission)?;

        self.submissions
            .compare_and_swap(submission.id.as_bytes(), None::<&[u8]>, Some(bytes))?
            .map_err(|_| StoreError::AlreadyExists(submission.id.clone()))
    }

    fn get(&self, id: &str) -> Result<Submission, StoreError> {
        let bytes = self
            .submissions
            .get(id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        decode(&bytes)
    }

    fn update(
        &self,
        id: &str,
        expected_version: Option<u64>,
        patch: SubmissionPatch,
        now: DateTime<Utc>,
    ) -> Result<Submission, StoreError> {
        loop {
            let current = self
                .submissions
                .get(id.as_bytes())?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let mut submission: Submission = decode(&current)?;

            if let Some(expected) = expected_version {
                if submission.version != expected {
                    return Err(StoreError::VersionConflict {
                        id: id.to_string(),
                        expected,
                        found: submission.version,
                    });
                }
            }

            submission
                .apply(patch.clone(), now)
                .map_err(|e| StoreError::Codec(e.to_string()))?;
            let bytes = encode(&submission)?;

            // a lost race re-reads; with an expected version that turns into a conflict
            if self
                .submissions
                .compare_and_swap(id.as_bytes(), Some(current), Some(bytes))?
                .is_ok()
            {
                return Ok(submission);
            }
        }
    }

    fn find_by_email(&self, client_email: &str) -> Result<Vec<Submission>, StoreError> {
        let email = normalise_email(client_email);
        let mut found = vec![];

        for entry in self.submissions.iter() {
            let (_, bytes) = entry?;
            let submission: Submission = decode(&bytes)?;
            if submission.client_email == email {
                found.push(submission);
            }
        }
        found.sort_by_key(|s| s.created_at.to_datetime_utc());

        Ok(found)
    }
}

impl OrderStore for SledStore {
    fn insert_if_absent(&self, record: &OrderRecord) -> Result<bool, StoreError> {
        let bytes = encode(record)?;
        let swapped =
            self.orders
                .compare_and_swap(record.session_id.as_bytes(), None::<&[u8]>, Some(bytes))?;

        Ok(swapped.is_ok())
    }

    fn get_order(&self, session_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        match self.orders.get(session_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_orders_for(&self, customer_email: &str) -> Result<Vec<OrderRecord>, StoreError> {
        let email = normalise_email(customer_email);
        let mut found = vec![];

        for entry in self.orders.iter() {
            let (_, bytes) = entry?;
            let record: OrderRecord = decode(&bytes)?;
            if normalise_email(&record.customer_email) == email {
                found.push(record);
            }
        }

        Ok(found)
    }
}

impl FileIndex for SledStore {
    fn record_file(
        &self,
        client_email: &str,
        batch_id: &str,
        object_id: &str,
        object_name: &str,
    ) -> Result<(), StoreError> {
        let email = normalise_email(client_email);
        let key = index_key(&[email.as_str(), batch_id, object_id]);
        self.file_index.insert(key, object_name.as_bytes())?;
        Ok(())
    }

    fn files_for(
        &self,
        client_email: &str,
        batch_id: Option<&str>,
    ) -> Result<Vec<IndexedFile>, StoreError> {
        let email = normalise_email(client_email);
        let prefix = match batch_id {
            Some(batch) => index_key(&[email.as_str(), batch, ""]),
            None => index_key(&[email.as_str(), ""]),
        };

        let mut files = vec![];
        for entry in self.file_index.scan_prefix(prefix) {
            let (key, value) = entry?;
            let key = String::from_utf8_lossy(&key).into_owned();
            let mut parts = key.splitn(3, '\0');
            let (Some(client_email), Some(batch_id), Some(object_id)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return Err(StoreError::Codec(format!("malformed file index key: {key:?}")));
            };

            files.push(IndexedFile {
                client_email: client_email.to_string(),
                batch_id: batch_id.to_string(),
                object_id: object_id.to_string(),
                object_name: String::from_utf8_lossy(&value).into_owned(),
            });
        }

        Ok(files)
    }

    fn forget_object(&self, object_id: &str) -> Result<usize, StoreError> {
        let suffix = format!("\0{object_id}");
        let mut stale = vec![];

        for entry in self.file_index.iter() {
            let (key, _) = entry?;
            if key.ends_with(suffix.as_bytes()) {
                stale.push(key);
            }
        }

        let mut batch = sled::Batch::default();
        for key in &stale {
            batch.remove(key.clone());
        }
        self.file_index.apply_batch(batch)?;

        Ok(stale.len())
    }
}
