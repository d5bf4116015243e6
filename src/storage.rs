//! Blob storage collaborator and the object path convention
use crate::utils::normalise_email;
use chrono::{DateTime, Utc};
use std::fmt;

/// Default scope for files the client uploads during intake.
pub const CLIENT_UPLOADS_PREFIX: &str = "client-uploads/";
/// Default scope for files the notary returns.
pub const NOTARIZED_DOCS_PREFIX: &str = "notarized-docs/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub id: String,
    pub name: String, // carries the path convention
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Access {
    Read,
    Write,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Grantee {
    User(String),
    Team(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permission {
    pub access: Access,
    pub grantee: Grantee,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage request failed: {0}")]
    Request(String),
}

/// The subset of the blob store this crate drives.
pub trait BlobStore {
    /// One page of objects ordered by a stable cursor, starting after `cursor`.
    fn list_objects(
        &self,
        bucket_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredObject>, BlobError>;

    fn delete_object(&self, bucket_id: &str, object_id: &str) -> Result<(), BlobError>;

    /// Replaces the object's permission list wholesale.
    fn set_permissions(
        &self,
        bucket_id: &str,
        object_id: &str,
        permissions: &[Permission],
    ) -> Result<(), BlobError>;
}

impl<T: BlobStore + ?Sized> BlobStore for &T {
    fn list_objects(
        &self,
        bucket_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredObject>, BlobError> {
        (**self).list_objects(bucket_id, cursor, limit)
    }
    fn delete_object(&self, bucket_id: &str, object_id: &str) -> Result<(), BlobError> {
        (**self).delete_object(bucket_id, object_id)
    }
    fn set_permissions(
        &self,
        bucket_id: &str,
        object_id: &str,
        permissions: &[Permission],
    ) -> Result<(), BlobError> {
        (**self).set_permissions(bucket_id, object_id, permissions)
    }
}

/// `{scope}/{email lowercased}/{batch}/{filename}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    pub scope: String,
    pub client_email: String,
    pub batch_id: String,
    pub file_name: String,
}

impl Permission {
    pub fn new(access: Access, grantee: Grantee) -> Self {
        Self { access, grantee }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = match self.access {
            Access::Read => "read",
            Access::Write => "write",
            Access::Update => "update",
            Access::Delete => "delete",
        };
        match &self.grantee {
            Grantee::User(id) => write!(f, "{access}(\"user:{id}\")"),
            Grantee::Team(id) => write!(f, "{access}(\"team:{id}\")"),
        }
    }
}

fn scope_root(scope: &str) -> &str {
    scope.trim_end_matches('/')
}

impl ObjectPath {
    pub fn new(scope: &str, client_email: &str, batch_id: &str, file_name: &str) -> Self {
        Self {
            scope: scope_root(scope).to_string(),
            client_email: normalise_email(client_email),
            batch_id: batch_id.to_string(),
            file_name: file_name.to_string(),
        }
    }

    pub fn folder(scope: &str, client_email: &str, batch_id: &str) -> String {
        format!(
            "{}/{}/{}",
            scope_root(scope),
            normalise_email(client_email),
            batch_id
        )
    }

    /// Parses a stored object name. Filenames may themselves contain `/`.
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.splitn(4, '/');
        let scope = parts.next()?;
        let client_email = parts.next()?;
        let batch_id = parts.next()?;
        let file_name = parts.next()?;

        if [scope, client_email, batch_id, file_name]
            .iter()
            .any(|p| p.is_empty())
        {
            return None;
        }

        Some(Self {
            scope: scope.to_string(),
            client_email: client_email.to_string(),
            batch_id: batch_id.to_string(),
            file_name: file_name.to_string(),
        })
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.scope, self.client_email, self.batch_id, self.file_name
        )
    }
}
