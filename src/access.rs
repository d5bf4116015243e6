//! Access grant service
//!
//! Runs right after a notary uploads files for a client: resolves the
//! client's account and replaces each file's permission list with
//! client-read plus full staff access.
use crate::config::AccessConfig;
use crate::error::NotaryError;
use crate::storage::{Access, BlobStore, Grantee, Permission};
use crate::store::FileIndex;
use crate::utils::{looks_like_email, normalise_email};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub file_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    #[serde(default)]
    pub client_email: String,
    #[serde(default)]
    pub files: Vec<FileRef>,
    /// When present, granted files are recorded in the file index.
    #[serde(default)]
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileGrant {
    pub file_id: String,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantResponse {
    pub ok: bool,
    pub results: Vec<FileGrant>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("directory lookup failed: {0}")]
pub struct DirectoryError(pub String);

/// Identity-provider directory.
pub trait Directory {
    /// Account id of the user registered under `email`, if any.
    fn find_account_by_email(&self, email: &str) -> Result<Option<String>, DirectoryError>;
}

impl<T: Directory + ?Sized> Directory for &T {
    fn find_account_by_email(&self, email: &str) -> Result<Option<String>, DirectoryError> {
        (**self).find_account_by_email(email)
    }
}

/// The exact permission list a delivered file ends up with.
pub fn delivered_file_permissions(client_account: &str, staff_team: &str) -> Vec<Permission> {
    let client = Grantee::User(client_account.to_string());
    let staff = Grantee::Team(staff_team.to_string());

    vec![
        Permission::new(Access::Read, client),
        Permission::new(Access::Read, staff.clone()),
        Permission::new(Access::Write, staff.clone()),
        Permission::new(Access::Update, staff.clone()),
        Permission::new(Access::Delete, staff),
    ]
}

pub struct AccessGrantService<D, B> {
    config: AccessConfig,
    directory: D,
    blobs: B,
}

impl<D: Directory, B: BlobStore> AccessGrantService<D, B> {
    pub fn new(config: AccessConfig, directory: D, blobs: B) -> Self {
        Self {
            config,
            directory,
            blobs,
        }
    }

    pub fn grant(&self, request: &GrantRequest) -> Result<GrantResponse, NotaryError> {
        self.grant_indexed(request, None::<&NoIndex>)
    }

    /// Like [`grant`](Self::grant), additionally recording granted files in
    /// `index` when the request names a batch.
    pub fn grant_indexed<I: FileIndex>(
        &self,
        request: &GrantRequest,
        index: Option<&I>,
    ) -> Result<GrantResponse, NotaryError> {
        if request.client_email.trim().is_empty() || request.files.is_empty() {
            return Err(NotaryError::validation("clientEmail and files are required"));
        }
        if !looks_like_email(&request.client_email) {
            return Err(NotaryError::validation("clientEmail is not an email address"));
        }
        let (Some(staff_team), Some(bucket)) = (
            self.config.staff_team_id.as_deref(),
            self.config.bucket_id.as_deref(),
        ) else {
            return Err(NotaryError::misconfigured("staff team or bucket id missing"));
        };

        let email = normalise_email(&request.client_email);
        let account = self
            .directory
            .find_account_by_email(&email)
            .map_err(|e| {
                tracing::error!(error = %e, "client lookup failed");
                NotaryError::Upstream("could not look up client".into())
            })?
            .ok_or_else(|| NotaryError::NotFound("Client user not found".into()))?;

        let permissions = delivered_file_permissions(&account, staff_team);

        let results: Vec<FileGrant> = request
            .files
            .iter()
            .map(|file| {
                let ok = match self.blobs.set_permissions(bucket, &file.file_id, &permissions) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(file_id = %file.file_id, error = %e, "permission update failed");
                        false
                    }
                };

                if let (true, Some(index), Some(batch)) = (ok, index, request.batch_id.as_deref()) {
                    if let Err(e) = index.record_file(&email, batch, &file.file_id, &file.name) {
                        tracing::warn!(file_id = %file.file_id, error = %e, "file index write failed");
                    }
                }

                FileGrant {
                    file_id: file.file_id.clone(),
                    ok,
                }
            })
            .collect();

        let granted = results.iter().filter(|r| r.ok).count();
        tracing::info!(
            client = %email,
            granted,
            failed = results.len() - granted,
            "file access granted"
        );

        // per-file outcomes live in `results`
        Ok(GrantResponse { ok: true, results })
    }
}

/// Placeholder index type for grants without indexing.
pub enum NoIndex {}

impl FileIndex for NoIndex {
    fn record_file(&self, _: &str, _: &str, _: &str, _: &str) -> Result<(), crate::store::StoreError> {
        match *self {}
    }

    fn files_for(
        &self,
        _: &str,
        _: Option<&str>,
    ) -> Result<Vec<crate::store::IndexedFile>, crate::store::StoreError> {
        match *self {}
    }

    fn forget_object(&self, _: &str) -> Result<usize, crate::store::StoreError> {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_list_is_exactly_five() {
        let perms = delivered_file_permissions("u1", "staff");

        assert_eq!(perms.len(), 5);
        assert_eq!(
            perms.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec![
                "read(\"user:u1\")",
                "read(\"team:staff\")",
                "write(\"team:staff\")",
                "update(\"team:staff\")",
                "delete(\"team:staff\")",
            ]
        );
    }

    #[test]
    fn request_parses_without_batch() {
        let req: GrantRequest = serde_json::from_str(
            r#"{"clientEmail": "a@b.co", "files": [{"fileId": "f1", "name": "x.pdf"}]}"#,
        )
        .unwrap();

        assert_eq!(req.files.len(), 1);
        assert_eq!(req.batch_id, None);
    }
}
