//! In-process store adapters.
//!
//! Used by the tests and by the `memory` backend. Both adapters support
//! failure injection so the pipeline's error boundaries can be exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Attachment, AttachmentRef, AttachmentStore, Grid, TabularStore};
use crate::cell_ref::{CellRange, parse_cell_name};
use crate::error::{Error, Result};

/// A named tab and its cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub name: String,
    pub cells: Grid,
}

/// Plain workbook data: collections of tabs, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workbook {
    pub collections: BTreeMap<String, Vec<Tab>>,
}

impl Workbook {
    pub fn tab_names(&self, collection_id: &str) -> Vec<String> {
        self.collections
            .get(collection_id)
            .map(|tabs| tabs.iter().map(|t| t.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn create_tab(&mut self, collection_id: &str, tab: &str) -> Result<()> {
        let tabs = self.collections.entry(collection_id.to_string()).or_default();
        if tabs.iter().any(|t| t.name == tab) {
            return Err(Error::store(format!("tab '{tab}' already exists")));
        }
        tabs.push(Tab {
            name: tab.to_string(),
            cells: Vec::new(),
        });
        Ok(())
    }

    pub fn tab(&self, collection_id: &str, tab: &str) -> Result<&Tab> {
        self.collections
            .get(collection_id)
            .and_then(|tabs| tabs.iter().find(|t| t.name == tab))
            .ok_or_else(|| Error::store(format!("tab not found: {collection_id}/{tab}")))
    }

    fn tab_mut(&mut self, collection_id: &str, tab: &str) -> Result<&mut Tab> {
        self.collections
            .get_mut(collection_id)
            .and_then(|tabs| tabs.iter_mut().find(|t| t.name == tab))
            .ok_or_else(|| Error::store(format!("tab not found: {collection_id}/{tab}")))
    }

    pub fn read(&self, collection_id: &str, tab: &str, range: &str) -> Result<Grid> {
        let range = CellRange::parse(range)?;
        let cells = &self.tab(collection_id, tab)?.cells;

        let first = range.start_row as usize;
        let last = range
            .end_row
            .map_or(cells.len(), |r| (r as usize).min(cells.len()));

        let mut grid: Grid = Vec::new();
        for r in first..=last {
            let Some(row) = cells.get(r - 1) else { break };
            let start = (range.start_col as usize - 1).min(row.len());
            let end = range
                .end_col
                .map_or(row.len(), |c| (c as usize).min(row.len()));
            let mut out: Vec<String> = row[start..end.max(start)].to_vec();
            while out.last().is_some_and(|c| c.is_empty()) {
                out.pop();
            }
            grid.push(out);
        }
        while grid.last().is_some_and(|r| r.is_empty()) {
            grid.pop();
        }
        Ok(grid)
    }

    pub fn write(
        &mut self,
        collection_id: &str,
        tab: &str,
        start_cell: &str,
        grid: &[Vec<String>],
    ) -> Result<()> {
        let (row, col) = parse_cell_name(start_cell)
            .ok_or_else(|| Error::InvalidInput(format!("invalid start cell '{start_cell}'")))?;
        let cells = &mut self.tab_mut(collection_id, tab)?.cells;

        for (i, values) in grid.iter().enumerate() {
            let r = row as usize - 1 + i;
            if cells.len() <= r {
                cells.resize(r + 1, Vec::new());
            }
            let target = &mut cells[r];
            let c0 = col as usize - 1;
            if target.len() < c0 + values.len() {
                target.resize(c0 + values.len(), String::new());
            }
            for (j, value) in values.iter().enumerate() {
                target[c0 + j] = value.clone();
            }
        }
        Ok(())
    }

    pub fn append(&mut self, collection_id: &str, tab: &str, grid: &[Vec<String>]) -> Result<u32> {
        let cells = &self.tab(collection_id, tab)?.cells;
        let last_used = cells
            .iter()
            .rposition(|row| row.iter().any(|c| !c.is_empty()))
            .map_or(0, |i| i + 1);
        let start = last_used as u32 + 1;
        self.write(collection_id, tab, &format!("A{start}"), grid)?;
        Ok(start)
    }
}

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ListTabs,
    CreateTab,
    Read,
    Write,
    Append,
}

/// Per-operation call counters and pending injected failures.
#[derive(Debug, Default)]
pub(crate) struct OpLedger {
    calls: HashMap<StoreOp, usize>,
    failures: HashMap<StoreOp, usize>,
}

impl OpLedger {
    /// Records a call; returns an error if a failure was queued for `op`.
    pub(crate) fn record(&mut self, op: StoreOp) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op) {
            Some(n) if *n > 0 => {
                *n -= 1;
                Err(Error::store(format!("injected {op:?} failure")))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn fail(&mut self, op: StoreOp, times: usize) {
        *self.failures.entry(op).or_default() += times;
    }

    pub(crate) fn calls(&self, op: StoreOp) -> usize {
        self.calls.get(&op).copied().unwrap_or(0)
    }
}

/// In-memory [`TabularStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryWorkbook {
    book: Arc<RwLock<Workbook>>,
    ledger: Arc<RwLock<OpLedger>>,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_workbook(book: Workbook) -> Self {
        Self {
            book: Arc::new(RwLock::new(book)),
            ledger: Arc::default(),
        }
    }

    /// Creates `tab` in `collection_id` holding `rows`.
    pub fn with_tab(self, collection_id: &str, tab: &str, rows: Grid) -> Self {
        if let Ok(mut book) = self.book.write() {
            let tabs = book.collections.entry(collection_id.to_string()).or_default();
            tabs.retain(|t| t.name != tab);
            tabs.push(Tab {
                name: tab.to_string(),
                cells: rows,
            });
        }
        self
    }

    /// Makes the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: StoreOp, times: usize) {
        if let Ok(mut ledger) = self.ledger.write() {
            ledger.fail(op, times);
        }
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        self.ledger.read().map_or(0, |l| l.calls(op))
    }

    /// Copy of the raw cells of a tab, untrimmed.
    pub fn rows(&self, collection_id: &str, tab: &str) -> Option<Grid> {
        let book = self.book.read().ok()?;
        book.tab(collection_id, tab).ok().map(|t| t.cells.clone())
    }

    pub fn snapshot(&self) -> Result<Workbook> {
        Ok(self.read_book()?.clone())
    }

    fn read_book(&self) -> Result<std::sync::RwLockReadGuard<'_, Workbook>> {
        self.book.read().map_err(|_| Error::store("lock poisoned"))
    }

    fn write_book(&self) -> Result<std::sync::RwLockWriteGuard<'_, Workbook>> {
        self.book.write().map_err(|_| Error::store("lock poisoned"))
    }

    fn record(&self, op: StoreOp) -> Result<()> {
        self.ledger
            .write()
            .map_err(|_| Error::store("lock poisoned"))?
            .record(op)
    }
}

#[async_trait]
impl TabularStore for MemoryWorkbook {
    async fn list_tabs(&self, collection_id: &str) -> Result<Vec<String>> {
        self.record(StoreOp::ListTabs)?;
        Ok(self.read_book()?.tab_names(collection_id))
    }

    async fn create_tab(&self, collection_id: &str, tab: &str) -> Result<()> {
        self.record(StoreOp::CreateTab)?;
        self.write_book()?.create_tab(collection_id, tab)
    }

    async fn read_range(&self, collection_id: &str, tab: &str, range: &str) -> Result<Grid> {
        self.record(StoreOp::Read)?;
        self.read_book()?.read(collection_id, tab, range)
    }

    async fn write_range(
        &self,
        collection_id: &str,
        tab: &str,
        start_cell: &str,
        grid: &[Vec<String>],
    ) -> Result<()> {
        self.record(StoreOp::Write)?;
        self.write_book()?.write(collection_id, tab, start_cell, grid)
    }

    async fn append_rows(
        &self,
        collection_id: &str,
        tab: &str,
        grid: &[Vec<String>],
    ) -> Result<()> {
        self.record(StoreOp::Append)?;
        self.write_book()?.append(collection_id, tab, grid).map(|_| ())
    }
}

#[derive(Debug, Clone)]
struct StoredFile {
    attachment: Attachment,
    folder: Option<String>,
    public: bool,
}

/// In-memory [`AttachmentStore`].
///
/// Uploads can be delayed or failed per file name, which lets tests control
/// the order in which a batch's concurrent uploads complete.
#[derive(Debug, Default, Clone)]
pub struct MemoryAttachments {
    files: Arc<RwLock<HashMap<String, StoredFile>>>,
    delays: Arc<RwLock<HashMap<String, Duration>>>,
    failing: Arc<RwLock<Vec<String>>>,
    completed: Arc<RwLock<Vec<String>>>,
}

impl MemoryAttachments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays the upload of files named `file_name`.
    pub fn delay(&self, file_name: &str, delay: Duration) {
        if let Ok(mut delays) = self.delays.write() {
            delays.insert(file_name.to_string(), delay);
        }
    }

    /// Makes uploads of files named `file_name` fail.
    pub fn fail(&self, file_name: &str) {
        if let Ok(mut failing) = self.failing.write() {
            failing.push(file_name.to_string());
        }
    }

    /// File names in upload-completion order.
    pub fn completion_order(&self) -> Vec<String> {
        self.completed.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn is_public(&self, id: &str) -> bool {
        self.files
            .read()
            .ok()
            .and_then(|files| files.get(id).map(|f| f.public))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.files.read().map_or(0, |f| f.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn folder_of(&self, id: &str) -> Option<String> {
        self.files.read().ok()?.get(id)?.folder.clone()
    }

    pub fn file_name_of(&self, id: &str) -> Option<String> {
        Some(self.files.read().ok()?.get(id)?.attachment.file_name.clone())
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachments {
    async fn upload(&self, attachment: Attachment, folder: Option<&str>) -> Result<AttachmentRef> {
        let delay = self
            .delays
            .read()
            .map_err(|_| Error::store("lock poisoned"))?
            .get(&attachment.file_name)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failing
            .read()
            .map_err(|_| Error::store("lock poisoned"))?
            .contains(&attachment.file_name);
        if failing {
            return Err(Error::store(format!(
                "upload of '{}' rejected",
                attachment.file_name
            )));
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let file_name = attachment.file_name.clone();
        self.files
            .write()
            .map_err(|_| Error::store("lock poisoned"))?
            .insert(
                id.clone(),
                StoredFile {
                    attachment,
                    folder: folder.map(str::to_string),
                    public: false,
                },
            );
        self.completed
            .write()
            .map_err(|_| Error::store("lock poisoned"))?
            .push(file_name);

        Ok(AttachmentRef {
            public_url: format!("memory://attachments/{id}"),
            id,
        })
    }

    async fn set_public_readable(&self, id: &str) -> Result<()> {
        let mut files = self.files.write().map_err(|_| Error::store("lock poisoned"))?;
        let file = files
            .get_mut(id)
            .ok_or_else(|| Error::store(format!("attachment not found: {id}")))?;
        file.public = true;
        Ok(())
    }
}
