//! Header registry: decides and persists the column order of a tab.
//!
//! Two strategies share one entry point:
//!
//! | Strategy | Row 1 empty | Row 1 present |
//! |----------|-------------|---------------|
//! | `static-fixed` | write canonical | keep if first cell matches, else overwrite with canonical |
//! | `adaptive-extend` | write canonical + unseen keys | insert missing columns before the reserved pair |
//!
//! Any store failure falls back to forcibly writing the canonical header.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::cell_ref::col_to_letter;
use crate::error::{Error, Result};
use crate::provision::SheetTarget;
use crate::schema::{CanonicalSchema, ReservedColumn, ResolvedSchema};
use crate::store::{Grid, TabularStore, is_blank_row};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeaderStrategy {
    /// Always enforce one exact canonical order.
    #[default]
    StaticFixed,
    /// Grow left to right, reserved columns pinned last.
    AdaptiveExtend,
}

#[derive(Debug, Clone)]
pub struct HeaderRegistry {
    strategy: HeaderStrategy,
    canonical: CanonicalSchema,
}

impl HeaderRegistry {
    pub fn new(strategy: HeaderStrategy, canonical: CanonicalSchema) -> Self {
        Self {
            strategy,
            canonical,
        }
    }

    pub fn strategy(&self) -> HeaderStrategy {
        self.strategy
    }

    pub fn canonical(&self) -> &CanonicalSchema {
        &self.canonical
    }

    /// Makes row 1 of `target` match the registry's schema and returns the
    /// header in force.
    ///
    /// `batch_keys` are the field names of the incoming keyed records; only
    /// the adaptive strategy looks at them.
    pub async fn ensure_headers(
        &self,
        store: &dyn TabularStore,
        target: &SheetTarget,
        batch_keys: &[&str],
    ) -> Result<ResolvedSchema> {
        let outcome = match self.strategy {
            HeaderStrategy::StaticFixed => self.ensure_static(store, target).await,
            HeaderStrategy::AdaptiveExtend => self.ensure_adaptive(store, target, batch_keys).await,
        };

        match outcome {
            Ok(schema) => Ok(schema),
            Err(e) => {
                warn!(
                    "header check for '{}' failed ({e}); forcing canonical header",
                    target.tab
                );
                let columns = self.canonical.columns();
                // Blank any labels the previous header had past the canonical width.
                let width = match read_header(store, target).await {
                    Ok(existing) => existing.len(),
                    Err(e) => {
                        warn!("cannot measure header of '{}' ({e})", target.tab);
                        0
                    }
                };
                write_header(store, target, &padded(&columns, width))
                    .await
                    .map_err(|e| Error::HeaderWrite(e.to_string()))?;
                Ok(ResolvedSchema::new(columns))
            }
        }
    }

    async fn ensure_static(
        &self,
        store: &dyn TabularStore,
        target: &SheetTarget,
    ) -> Result<ResolvedSchema> {
        let existing = read_header(store, target).await?;
        if existing.is_empty() {
            let columns = self.canonical.columns();
            write_header(store, target, &columns).await?;
            info!("wrote header row to empty tab '{}'", target.tab);
            return Ok(ResolvedSchema::new(columns));
        }

        if existing[0].trim() == self.canonical.first_column() {
            debug!("header of '{}' trusted as-is", target.tab);
            return Ok(ResolvedSchema::new(existing));
        }

        let columns = self.canonical.columns();
        write_header(store, target, &padded(&columns, existing.len())).await?;
        warn!(
            "header of '{}' started with '{}'; overwrote with canonical header",
            target.tab, existing[0]
        );
        Ok(ResolvedSchema::new(columns))
    }

    async fn ensure_adaptive(
        &self,
        store: &dyn TabularStore,
        target: &SheetTarget,
        batch_keys: &[&str],
    ) -> Result<ResolvedSchema> {
        let existing = read_header(store, target).await?;
        let columns = extend_columns(&existing, &self.canonical, batch_keys);
        if columns == existing {
            return Ok(ResolvedSchema::new(existing));
        }

        let remap = column_remap(&existing, &columns, &self.canonical);
        if !existing.is_empty() && remap.iter().enumerate().any(|(old, new)| old != *new) {
            // Header and moved rows go out in one write so they cannot disagree.
            let mut grid = realigned_rows(store, target, existing.len(), columns.len(), &remap).await?;
            grid.insert(0, columns.clone());
            store
                .write_range(&target.collection_id, &target.tab, "A1", &grid)
                .await?;
            info!(
                "realigned {} data row(s) of '{}' to the extended header",
                grid.len() - 1,
                target.tab
            );
        } else {
            write_header(store, target, &columns).await?;
        }
        info!(
            "header of '{}' extended from {} to {} column(s)",
            target.tab,
            existing.len(),
            columns.len()
        );
        Ok(ResolvedSchema::new(columns))
    }
}

async fn read_header(store: &dyn TabularStore, target: &SheetTarget) -> Result<Vec<String>> {
    let grid = store
        .read_range(&target.collection_id, &target.tab, "1:1")
        .await?;
    let mut row = grid.into_iter().next().unwrap_or_default();
    if is_blank_row(&row) {
        row.clear();
    }
    Ok(row)
}

async fn write_header(
    store: &dyn TabularStore,
    target: &SheetTarget,
    columns: &[String],
) -> Result<()> {
    store
        .write_range(&target.collection_id, &target.tab, "A1", &[columns.to_vec()])
        .await
}

/// Adaptive header: existing non-reserved columns in place, then missing
/// canonical columns, then unseen batch keys, then the reserved pair.
pub fn extend_columns(
    existing: &[String],
    canonical: &CanonicalSchema,
    batch_keys: &[&str],
) -> Vec<String> {
    let reserved = canonical.reserved();
    let mut body: Vec<String> = existing
        .iter()
        .filter(|c| !reserved.is_reserved(c))
        .cloned()
        .collect();

    let additions = canonical
        .fixed()
        .iter()
        .map(String::as_str)
        .chain(batch_keys.iter().copied());
    for name in additions {
        let name = name.trim();
        if name.is_empty() || reserved.is_reserved(name) || body.iter().any(|c| c == name) {
            continue;
        }
        body.push(name.to_string());
    }

    body.push(reserved.attachment.clone());
    body.push(reserved.timestamp.clone());
    body
}

/// New index of each existing column once the header is extended.
fn column_remap(existing: &[String], columns: &[String], canonical: &CanonicalSchema) -> Vec<usize> {
    let width = columns.len();
    let mut next_body = 0;
    existing
        .iter()
        .map(|name| match canonical.reserved().classify(name) {
            Some(ReservedColumn::Attachment) => width - 2,
            Some(ReservedColumn::Timestamp) => width - 1,
            None => {
                let idx = next_body;
                next_body += 1;
                idx
            }
        })
        .collect()
}

/// Every data row with its cells moved to their columns' new positions.
async fn realigned_rows(
    store: &dyn TabularStore,
    target: &SheetTarget,
    old_width: usize,
    new_width: usize,
    remap: &[usize],
) -> Result<Grid> {
    let range = format!("A2:{}", col_to_letter(old_width as u32));
    let rows = store
        .read_range(&target.collection_id, &target.tab, &range)
        .await?;
    Ok(rows
        .iter()
        .map(|row| {
            let mut out = vec![String::new(); new_width];
            for (old, value) in row.iter().enumerate() {
                if let Some(&new) = remap.get(old) {
                    out[new] = value.clone();
                }
            }
            out
        })
        .collect())
}

/// `columns` padded with blanks out to `width`.
fn padded(columns: &[String], width: usize) -> Vec<String> {
    let mut row = columns.to_vec();
    if row.len() < width {
        row.resize(width, String::new());
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ATTACHMENT_COLUMN, ReservedNames, TIMESTAMP_COLUMN};
    use crate::store::memory::{MemoryWorkbook, StoreOp};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn canonical() -> CanonicalSchema {
        CanonicalSchema::new(strings(&["제품명", "수취인명"]), ReservedNames::default())
    }

    fn target() -> SheetTarget {
        SheetTarget::new("book", "Kim").unwrap()
    }

    #[tokio::test]
    async fn static_writes_canonical_on_empty_tab() {
        let store = MemoryWorkbook::new().with_tab("book", "Kim", Vec::new());
        let registry = HeaderRegistry::new(HeaderStrategy::StaticFixed, canonical());
        let schema = registry.ensure_headers(&store, &target(), &[]).await.unwrap();
        assert_eq!(schema.columns(), canonical().columns());
        assert_eq!(store.rows("book", "Kim").unwrap()[0], canonical().columns());
    }

    #[tokio::test]
    async fn static_is_idempotent() {
        let store = MemoryWorkbook::new().with_tab("book", "Kim", Vec::new());
        let registry = HeaderRegistry::new(HeaderStrategy::StaticFixed, canonical());
        let first = registry.ensure_headers(&store, &target(), &[]).await.unwrap();
        let second = registry.ensure_headers(&store, &target(), &[]).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.rows("book", "Kim").unwrap().len(), 1);
        assert_eq!(store.calls(StoreOp::Write), 1);
    }

    #[tokio::test]
    async fn static_trusts_matching_first_cell() {
        let existing = strings(&["제품명", "legacy", ATTACHMENT_COLUMN]);
        let store =
            MemoryWorkbook::new().with_tab("book", "Kim", vec![existing.clone()]);
        let registry = HeaderRegistry::new(HeaderStrategy::StaticFixed, canonical());
        let schema = registry.ensure_headers(&store, &target(), &[]).await.unwrap();
        assert_eq!(schema.columns(), existing.as_slice());
        assert_eq!(store.calls(StoreOp::Write), 0);
    }

    #[tokio::test]
    async fn static_overwrites_drifted_header() {
        let store = MemoryWorkbook::new().with_tab(
            "book",
            "Kim",
            vec![strings(&["other", "x", "y", "z", "w"])],
        );
        let registry = HeaderRegistry::new(HeaderStrategy::StaticFixed, canonical());
        let schema = registry.ensure_headers(&store, &target(), &[]).await.unwrap();
        assert_eq!(schema.columns(), canonical().columns());
        let header = store.rows("book", "Kim").unwrap().remove(0);
        assert_eq!(header[..4], canonical().columns()[..]);
        assert_eq!(header[4], "");
    }

    #[tokio::test]
    async fn read_failure_forces_canonical() {
        let store = MemoryWorkbook::new().with_tab(
            "book",
            "Kim",
            vec![strings(&["제품명", "custom"])],
        );
        store.fail_next(StoreOp::Read, 1);
        let registry = HeaderRegistry::new(HeaderStrategy::StaticFixed, canonical());
        let schema = registry.ensure_headers(&store, &target(), &[]).await.unwrap();
        assert_eq!(schema.columns(), canonical().columns());
    }

    #[tokio::test]
    async fn failed_forced_write_aborts() {
        let store = MemoryWorkbook::new().with_tab("book", "Kim", Vec::new());
        store.fail_next(StoreOp::Write, 2);
        let registry = HeaderRegistry::new(HeaderStrategy::StaticFixed, canonical());
        let err = registry
            .ensure_headers(&store, &target(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HeaderWrite(_)));
    }

    #[test]
    fn extension_inserts_before_reserved_pair() {
        let existing = strings(&["제품명", "수취인명", ATTACHMENT_COLUMN, TIMESTAMP_COLUMN]);
        let columns = extend_columns(&existing, &canonical(), &["수취인명", "색상", "사이즈"]);
        assert_eq!(
            columns,
            strings(&[
                "제품명",
                "수취인명",
                "색상",
                "사이즈",
                ATTACHMENT_COLUMN,
                TIMESTAMP_COLUMN
            ])
        );
    }

    #[test]
    fn extension_ignores_reserved_keys() {
        let columns = extend_columns(&[], &canonical(), &[ATTACHMENT_COLUMN, "색상"]);
        assert_eq!(
            columns,
            strings(&["제품명", "수취인명", "색상", ATTACHMENT_COLUMN, TIMESTAMP_COLUMN])
        );
    }

    #[tokio::test]
    async fn adaptive_moves_reserved_cells_with_their_labels() {
        let header = strings(&["제품명", "수취인명", ATTACHMENT_COLUMN, TIMESTAMP_COLUMN]);
        let row = strings(&["Widget", "Lee", "https://file", "2024. 5. 3."]);
        let store =
            MemoryWorkbook::new().with_tab("book", "Kim", vec![header, Vec::new(), row]);
        let registry = HeaderRegistry::new(HeaderStrategy::AdaptiveExtend, canonical());

        let schema = registry
            .ensure_headers(&store, &target(), &["색상"])
            .await
            .unwrap();
        assert_eq!(schema.len(), 5);
        assert_eq!(schema.position("색상"), Some(2));

        let rows = store.rows("book", "Kim").unwrap();
        assert_eq!(rows[0], schema.columns());
        assert!(is_blank_row(&rows[1]));
        assert_eq!(
            rows[2],
            strings(&["Widget", "Lee", "", "https://file", "2024. 5. 3."])
        );
        assert_eq!(store.calls(StoreOp::Write), 1);
    }

    /// Fails the `n`th `write_range` call, delegating everything else.
    struct FailingNthWrite {
        inner: MemoryWorkbook,
        n: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl TabularStore for FailingNthWrite {
        async fn list_tabs(&self, collection_id: &str) -> Result<Vec<String>> {
            self.inner.list_tabs(collection_id).await
        }

        async fn create_tab(&self, collection_id: &str, tab: &str) -> Result<()> {
            self.inner.create_tab(collection_id, tab).await
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
            if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.n {
                return Err(Error::store("write rejected"));
            }
            self.inner
                .write_range(collection_id, tab, start_cell, grid)
                .await
        }

        async fn append_rows(
            &self,
            collection_id: &str,
            tab: &str,
            grid: &[Vec<String>],
        ) -> Result<()> {
            self.inner.append_rows(collection_id, tab, grid).await
        }
    }

    fn history_tab() -> MemoryWorkbook {
        MemoryWorkbook::new().with_tab(
            "book",
            "Kim",
            vec![
                strings(&["제품명", "수취인명", ATTACHMENT_COLUMN, TIMESTAMP_COLUMN]),
                strings(&["Widget", "Lee", "link0", "ts0"]),
            ],
        )
    }

    #[tokio::test]
    async fn history_stays_under_its_labels_when_a_later_write_fails() {
        let tab = history_tab();
        let store = FailingNthWrite {
            inner: tab.clone(),
            n: 2,
            writes: AtomicUsize::new(0),
        };
        let registry = HeaderRegistry::new(HeaderStrategy::AdaptiveExtend, canonical());

        let schema = registry
            .ensure_headers(&store, &target(), &["색상"])
            .await
            .unwrap();
        let rows = tab.rows("book", "Kim").unwrap();
        assert_eq!(rows[0], schema.columns());
        let link = schema.position(ATTACHMENT_COLUMN).unwrap();
        let stamp = schema.position(TIMESTAMP_COLUMN).unwrap();
        assert_eq!(rows[1][link], "link0");
        assert_eq!(rows[1][stamp], "ts0");
    }

    #[tokio::test]
    async fn failed_realignment_leaves_history_in_place() {
        let tab = history_tab();
        let store = FailingNthWrite {
            inner: tab.clone(),
            n: 1,
            writes: AtomicUsize::new(0),
        };
        let registry = HeaderRegistry::new(HeaderStrategy::AdaptiveExtend, canonical());

        let schema = registry
            .ensure_headers(&store, &target(), &["색상"])
            .await
            .unwrap();
        assert_eq!(schema.columns(), canonical().columns());
        let rows = tab.rows("book", "Kim").unwrap();
        assert_eq!(rows[0], canonical().columns());
        assert_eq!(rows[1], strings(&["Widget", "Lee", "link0", "ts0"]));
    }

    #[tokio::test]
    async fn forced_header_blanks_stale_labels() {
        let store = MemoryWorkbook::new().with_tab(
            "book",
            "Kim",
            vec![strings(&["제품명", "X", "Y", ATTACHMENT_COLUMN, TIMESTAMP_COLUMN])],
        );
        store.fail_next(StoreOp::Read, 1);
        let registry = HeaderRegistry::new(HeaderStrategy::StaticFixed, canonical());

        let schema = registry.ensure_headers(&store, &target(), &[]).await.unwrap();
        assert_eq!(schema.columns(), canonical().columns());
        let header = store.rows("book", "Kim").unwrap().remove(0);
        assert_eq!(header.len(), 5);
        assert_eq!(header[..4], canonical().columns()[..]);
        assert_eq!(header[4], "");
        let labels: Vec<&String> = header.iter().filter(|c| !c.is_empty()).collect();
        let mut unique = labels.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(labels.len(), unique.len());
    }

    #[tokio::test]
    async fn adaptive_without_new_keys_is_untouched() {
        let header = canonical().columns();
        let store = MemoryWorkbook::new().with_tab("book", "Kim", vec![header.clone()]);
        let registry = HeaderRegistry::new(HeaderStrategy::AdaptiveExtend, canonical());
        let schema = registry
            .ensure_headers(&store, &target(), &["제품명"])
            .await
            .unwrap();
        assert_eq!(schema.columns(), header.as_slice());
        assert_eq!(store.calls(StoreOp::Write), 0);
    }
}
