//! Batch coordinator: runs one submission batch against one tab.
//!
//! Sequence: ensure tab, ensure header, upload attachments concurrently,
//! build rows in submission order, resolve the write start, write once.
//! The whole sequence holds the tab's lock, so two batches for the same
//! tab never resolve overlapping ranges.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::headers::{HeaderRegistry, HeaderStrategy};
use crate::insertion::{InsertionPolicy, WriteMode, resolve_write_start};
use crate::mapper::build_row;
use crate::provision::{SheetTarget, ensure_sheet};
use crate::record::{OrderRecord, RecordLayout};
use crate::schema::CanonicalSchema;
use crate::state::TabLocks;
use crate::store::{Attachment, AttachmentRef, AttachmentStore, TabularStore};
use crate::timestamp::TimestampFormat;

/// Deployment choices the coordinator runs with.
#[derive(Debug, Clone, Default)]
pub struct IntakeSettings {
    pub canonical: CanonicalSchema,
    pub header_strategy: HeaderStrategy,
    pub insertion_policy: InsertionPolicy,
    /// Shape every submitted record must have.
    pub record_layout: RecordLayout,
    pub timestamps: TimestampFormat,
    /// Destination folder for uploaded attachments.
    pub attachment_folder: Option<String>,
}

/// Result of a successful batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteSummary {
    pub tab: String,
    pub rows: usize,
    pub start_row: u32,
    pub columns: usize,
}

pub struct BatchCoordinator {
    tables: Arc<dyn TabularStore>,
    files: Arc<dyn AttachmentStore>,
    registry: HeaderRegistry,
    policy: InsertionPolicy,
    layout: RecordLayout,
    timestamps: TimestampFormat,
    folder: Option<String>,
    locks: TabLocks,
    clock: fn() -> DateTime<Utc>,
}

impl BatchCoordinator {
    pub fn new(
        tables: Arc<dyn TabularStore>,
        files: Arc<dyn AttachmentStore>,
        settings: IntakeSettings,
    ) -> Self {
        Self {
            tables,
            files,
            registry: HeaderRegistry::new(settings.header_strategy, settings.canonical),
            policy: settings.insertion_policy,
            layout: settings.record_layout,
            timestamps: settings.timestamps,
            folder: settings.attachment_folder,
            locks: TabLocks::new(),
            clock: Utc::now,
        }
    }

    /// Replaces the clock used for submission timestamps.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn canonical(&self) -> &CanonicalSchema {
        self.registry.canonical()
    }

    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// Writes `records` to `target`, pairing `attachments[i]` with
    /// `records[i]`.
    ///
    /// Every record must match the configured layout, and `attachments` is
    /// either empty or exactly as long as `records`. Any
    /// upload failure aborts the batch before a row is written.
    pub async fn submit_batch(
        &self,
        target: &SheetTarget,
        records: Vec<OrderRecord>,
        attachments: Vec<Option<Attachment>>,
    ) -> Result<WriteSummary> {
        if records.is_empty() {
            return Err(Error::InvalidInput("no orders submitted".into()));
        }
        if let Some(index) = records.iter().position(|r| r.layout() != self.layout) {
            return Err(Error::InvalidInput(format!(
                "order {index} is not a {:?} record",
                self.layout
            )));
        }
        if !attachments.is_empty() && attachments.len() != records.len() {
            return Err(Error::InvalidInput(format!(
                "{} attachment slot(s) for {} order(s)",
                attachments.len(),
                records.len()
            )));
        }

        let lock = self.locks.for_tab(&target.collection_id, &target.tab);
        let _guard = lock.lock().await;

        let tables = self.tables.as_ref();
        ensure_sheet(tables, target).await;

        let keys = batch_keys(&records);
        let schema = self.registry.ensure_headers(tables, target, &keys).await?;

        let uploaded = self.upload_all(attachments, records.len()).await?;

        let submitted_at = self.timestamps.render((self.clock)());
        let canonical = self.registry.canonical();
        let rows: Vec<Vec<String>> = records
            .iter()
            .zip(&uploaded)
            .map(|(record, attachment)| {
                build_row(
                    &schema,
                    canonical.reserved(),
                    canonical.fixed(),
                    record,
                    attachment.as_ref(),
                    &submitted_at,
                )
            })
            .collect();

        let plan = resolve_write_start(tables, target, self.policy, rows.len(), schema.len())
            .await
            .map_err(|e| Error::RowWrite(e.to_string()))?;
        let written = match plan.mode {
            WriteMode::Append => {
                tables
                    .append_rows(&target.collection_id, &target.tab, &rows)
                    .await
            }
            WriteMode::Overwrite => {
                tables
                    .write_range(&target.collection_id, &target.tab, &plan.start_cell(), &rows)
                    .await
            }
        };
        written.map_err(|e| Error::RowWrite(e.to_string()))?;

        info!(
            "wrote {} order row(s) to '{}' at row {}",
            rows.len(),
            target.tab,
            plan.start_row
        );
        Ok(WriteSummary {
            tab: target.tab.clone(),
            rows: rows.len(),
            start_row: plan.start_row,
            columns: schema.len(),
        })
    }

    /// Uploads every present attachment concurrently and returns the
    /// results in input order.
    async fn upload_all(
        &self,
        attachments: Vec<Option<Attachment>>,
        count: usize,
    ) -> Result<Vec<Option<AttachmentRef>>> {
        let mut uploaded: Vec<Option<AttachmentRef>> = vec![None; count];
        let mut tasks = JoinSet::new();

        for (index, attachment) in attachments.into_iter().enumerate() {
            let Some(attachment) = attachment else {
                continue;
            };
            let files = Arc::clone(&self.files);
            let folder = self.folder.clone();
            tasks.spawn(async move {
                let result: Result<AttachmentRef> = async {
                    let file = files.upload(attachment, folder.as_deref()).await?;
                    files.set_public_readable(&file.id).await?;
                    Ok(file)
                }
                .await;
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, result) =
                joined.map_err(|e| Error::store_with_source("upload task failed", e))?;
            let file = result.map_err(|e| Error::AttachmentUpload {
                index,
                message: e.to_string(),
            })?;
            debug!("attachment {index} uploaded as {}", file.id);
            uploaded[index] = Some(file);
        }
        Ok(uploaded)
    }
}

/// Distinct field names across a batch's keyed records, first-seen order.
fn batch_keys(records: &[OrderRecord]) -> Vec<&str> {
    let mut keys: Vec<&str> = Vec::new();
    for key in records.iter().flat_map(OrderRecord::keys) {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}
