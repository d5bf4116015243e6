//! Retention purge job
//!
//! One pass over the whole bucket. An object is purged when its name starts
//! with a configured scope prefix and it is strictly older than the
//! retention window. A failed delete is logged and counted; the pass always
//! runs to the end.
use crate::config::PurgeConfig;
use crate::error::NotaryError;
use crate::storage::{BlobStore, StoredObject};
use crate::store::FileIndex;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeSummary {
    pub ok: bool,
    pub examined: u64,
    /// Objects removed, or in dry-run the objects that would have been.
    pub deleted: u64,
    pub failed: u64,
    pub retention_days: u32,
    pub dry_run: bool,
}

pub struct PurgeJob<'a, B, I = crate::access::NoIndex> {
    config: &'a PurgeConfig,
    blobs: &'a B,
    index: Option<&'a I>,
}

pub fn in_scope(name: &str, prefixes: &[String]) -> bool {
    prefixes
        .iter()
        .any(|prefix| !prefix.is_empty() && name.starts_with(prefix.as_str()))
}

/// Strictly older than the window, an object exactly at the boundary stays.
pub fn is_expired(created_at: DateTime<Utc>, now: DateTime<Utc>, retention_days: u32) -> bool {
    now - created_at > Duration::days(i64::from(retention_days))
}

impl<'a, B: BlobStore> PurgeJob<'a, B> {
    pub fn new(config: &'a PurgeConfig, blobs: &'a B) -> Self {
        Self {
            config,
            blobs,
            index: None,
        }
    }
}

impl<'a, B: BlobStore, I: FileIndex> PurgeJob<'a, B, I> {
    /// Also drops file index entries of deleted objects.
    pub fn with_index(config: &'a PurgeConfig, blobs: &'a B, index: &'a I) -> Self {
        Self {
            config,
            blobs,
            index: Some(index),
        }
    }

    pub fn run(&self) -> Result<PurgeSummary, NotaryError> {
        self.run_at(Utc::now())
    }

    pub fn run_at(&self, now: DateTime<Utc>) -> Result<PurgeSummary, NotaryError> {
        let bucket = self.config.bucket()?;
        let mut summary = PurgeSummary {
            ok: true,
            examined: 0,
            deleted: 0,
            failed: 0,
            retention_days: self.config.retention_days,
            dry_run: self.config.dry_run,
        };

        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .blobs
                .list_objects(bucket, cursor.as_deref(), PAGE_SIZE)
                .map_err(|e| {
                    tracing::error!(error = %e, "listing objects failed");
                    NotaryError::Upstream("could not list storage objects".into())
                })?;

            for object in &page {
                summary.examined += 1;
                self.consider(bucket, object, now, &mut summary);
            }

            if page.len() < PAGE_SIZE {
                break;
            }
            let next = page.last().map(|o| o.id.clone());
            // a cursor that does not move would loop forever
            if next.is_none() || next == cursor {
                tracing::warn!(cursor = ?cursor, "pagination cursor did not advance, stopping");
                break;
            }
            cursor = next;
        }

        tracing::info!(
            examined = summary.examined,
            deleted = summary.deleted,
            failed = summary.failed,
            retention_days = summary.retention_days,
            dry_run = summary.dry_run,
            "retention purge finished"
        );

        Ok(summary)
    }

    fn consider(&self, bucket: &str, object: &StoredObject, now: DateTime<Utc>, summary: &mut PurgeSummary) {
        if !in_scope(&object.name, &self.config.scope_prefixes)
            || !is_expired(object.created_at, now, self.config.retention_days)
        {
            return;
        }

        if self.config.dry_run {
            tracing::info!(id = %object.id, name = %object.name, "would delete");
            summary.deleted += 1;
            return;
        }

        match self.blobs.delete_object(bucket, &object.id) {
            Ok(()) => {
                tracing::info!(id = %object.id, name = %object.name, "deleted");
                summary.deleted += 1;
                if let Some(index) = self.index {
                    if let Err(e) = index.forget_object(&object.id) {
                        tracing::warn!(id = %object.id, error = %e, "file index cleanup failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(id = %object.id, error = %e, "delete failed");
                summary.failed += 1;
            }
        }
    }
}
