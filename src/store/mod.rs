//! External stores the intake pipeline writes to.
//!
//! | Trait | Operations | Adapters |
//! |-------|------------|----------|
//! | [`TabularStore`] | list/create tabs, read/write/append ranges | [`MemoryWorkbook`], [`SnapshotWorkbook`], [`GoogleSheets`] |
//! | [`AttachmentStore`] | upload, make public | [`MemoryAttachments`], [`GoogleDrive`] |
//!
//! Grids are row-major `Vec<Vec<String>>`. Reads follow the Sheets API
//! convention: trailing blank cells of a row and trailing blank rows are
//! omitted, interior blank rows come back as empty vectors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod google;
pub mod memory;
pub mod snapshot;

pub use google::{GoogleDrive, GoogleSheets};
pub use memory::{MemoryAttachments, MemoryWorkbook};
pub use snapshot::SnapshotWorkbook;

/// Row-major cell grid.
pub type Grid = Vec<Vec<String>>;

/// Locator for an uploaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    pub public_url: String,
}

/// One file submitted alongside an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

/// Spreadsheet-like storage made of named tabs.
#[async_trait]
pub trait TabularStore: Send + Sync + 'static {
    async fn list_tabs(&self, collection_id: &str) -> Result<Vec<String>>;

    async fn create_tab(&self, collection_id: &str, tab: &str) -> Result<()>;

    /// Reads an A1 range such as `A1:L` or `1:1`.
    async fn read_range(&self, collection_id: &str, tab: &str, range: &str) -> Result<Grid>;

    /// Overwrites cells starting at `start_cell` (e.g. `A5`).
    async fn write_range(
        &self,
        collection_id: &str,
        tab: &str,
        start_cell: &str,
        grid: &[Vec<String>],
    ) -> Result<()>;

    /// Writes `grid` after the last non-blank row of the tab.
    async fn append_rows(&self, collection_id: &str, tab: &str, grid: &[Vec<String>])
    -> Result<()>;
}

/// Cloud file storage for receipt images.
#[async_trait]
pub trait AttachmentStore: Send + Sync + 'static {
    async fn upload(&self, attachment: Attachment, folder: Option<&str>) -> Result<AttachmentRef>;

    async fn set_public_readable(&self, id: &str) -> Result<()>;
}

/// True when every cell is empty or whitespace.
pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}
