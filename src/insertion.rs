//! Insertion-point resolver: where a batch of rows goes.
//!
//! Row 1 is always the header. Row numbers are 1-based.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cell_ref::col_to_letter;
use crate::error::Result;
use crate::provision::SheetTarget;
use crate::store::{Grid, TabularStore, is_blank_row};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InsertionPolicy {
    /// Count column A and append after it. Never reuses gaps.
    AppendOnly,
    /// Reuse the first run of blank rows that fits the whole batch.
    #[default]
    GapReuse,
}

/// How the batch is handed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// The store's append-after-last-row operation.
    Append,
    /// Explicit overwrite starting at `A<start_row>`.
    Overwrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePlan {
    pub start_row: u32,
    pub mode: WriteMode,
}

impl WritePlan {
    pub fn start_cell(&self) -> String {
        format!("A{}", self.start_row)
    }
}

/// First row a batch of `row_count` rows can start at without overwriting
/// data, given the tab's rows (header included).
///
/// A blank run is only reused when it holds the whole batch; the run at the
/// end of the data always does.
pub fn first_fitting_gap(rows: &Grid, row_count: usize) -> u32 {
    let total = rows.len();
    let mut idx = 1;
    while idx < total {
        if !is_blank_row(&rows[idx]) {
            idx += 1;
            continue;
        }
        let run_start = idx;
        while idx < total && is_blank_row(&rows[idx]) {
            idx += 1;
        }
        if idx == total || idx - run_start >= row_count {
            return run_start as u32 + 1;
        }
    }
    total.max(1) as u32 + 1
}

/// Picks the write start for a batch of `row_count` rows on a tab whose
/// header is `width` columns wide.
pub async fn resolve_write_start(
    store: &dyn TabularStore,
    target: &SheetTarget,
    policy: InsertionPolicy,
    row_count: usize,
    width: usize,
) -> Result<WritePlan> {
    let plan = match policy {
        InsertionPolicy::AppendOnly => {
            let occupied = store
                .read_range(&target.collection_id, &target.tab, "A:A")
                .await?
                .len();
            WritePlan {
                start_row: occupied.max(1) as u32 + 1,
                mode: WriteMode::Append,
            }
        }
        InsertionPolicy::GapReuse => {
            let range = format!("A1:{}", col_to_letter(width.max(1) as u32));
            let rows = store
                .read_range(&target.collection_id, &target.tab, &range)
                .await?;
            WritePlan {
                start_row: first_fitting_gap(&rows, row_count),
                mode: WriteMode::Overwrite,
            }
        }
    };
    debug!(
        "{} row(s) for '{}' start at row {} ({:?})",
        row_count, target.tab, plan.start_row, plan.mode
    );
    Ok(plan)
}
