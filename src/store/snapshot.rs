//! Workbook persisted to a gzip-compressed bincode file.
//!
//! Every mutation rewrites the snapshot, so the file always reflects the
//! last successful write.

use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;

use super::memory::{MemoryWorkbook, Workbook};
use super::{Grid, TabularStore};
use crate::error::Result;

pub fn save_workbook(workbook: &Workbook, path: &Path) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut writer = std::io::BufWriter::new(encoder);

        serialize_into(&mut writer, workbook)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?.flush()?;
    }
    std::fs::rename(tmp, path)
}

pub fn load_workbook(path: &Path) -> std::io::Result<Workbook> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = std::io::BufReader::new(decoder);

    let workbook: Workbook = deserialize_from(&mut reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(workbook)
}

/// [`TabularStore`] backed by a snapshot file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotWorkbook {
    inner: MemoryWorkbook,
    path: PathBuf,
}

impl SnapshotWorkbook {
    /// Opens the snapshot at `path`, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let book = if path.exists() {
            load_workbook(&path)?
        } else {
            Workbook::default()
        };
        Ok(Self {
            inner: MemoryWorkbook::from_workbook(book),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        save_workbook(&self.inner.snapshot()?, &self.path)?;
        debug!("saved workbook snapshot to {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl TabularStore for SnapshotWorkbook {
    async fn list_tabs(&self, collection_id: &str) -> Result<Vec<String>> {
        self.inner.list_tabs(collection_id).await
    }

    async fn create_tab(&self, collection_id: &str, tab: &str) -> Result<()> {
        self.inner.create_tab(collection_id, tab).await?;
        self.persist()
    }

    async fn read_range(&self, collection_id: &str, tab: &str, range: &str) -> Result<Grid> {
        self.inner.read_range(collection_id, tab, range).await
    }

    async fn write_range(
        &self,
        collection_id: &str,
        tab: &str,
        start_cell: &str,
        grid: &[Vec<String>],
    ) -> Result<()> {
        self.inner
            .write_range(collection_id, tab, start_cell, grid)
            .await?;
        self.persist()
    }

    async fn append_rows(
        &self,
        collection_id: &str,
        tab: &str,
        grid: &[Vec<String>],
    ) -> Result<()> {
        self.inner.append_rows(collection_id, tab, grid).await?;
        self.persist()
    }
}
