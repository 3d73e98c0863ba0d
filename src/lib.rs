/*!
# Order Intake

Backend for a small order-intake service: managers submit batches of orders,
each optionally carrying a receipt image, and every batch lands as rows in the
manager's own tab of a shared spreadsheet.

## Overview

The core of the crate is sheet-row reconciliation. A batch is written so that
columns never silently shift, rows of one batch stay contiguous and in order,
and the receipt uploaded for order *i* always lands on order *i*'s row no
matter in which order the uploads finish.

## Architecture

### Pipeline
- **provision**: finds or creates the manager's tab
- **headers**: decides the header row (`static-fixed` or `adaptive-extend`)
- **mapper**: turns one order record into one positional row
- **insertion**: picks the first row a batch may start at
- **coordinator**: runs the pipeline for one batch under a per-tab lock

### Stores
- **store**: `TabularStore` / `AttachmentStore` traits with in-memory,
  snapshot-file and Google Sheets / Drive adapters
- Snapshots are gzip-compressed bincode files

### Surfaces
- **app** (`web` feature): axum router exposing `POST /api/orders`,
  `POST /auth/token`, `GET /auth/status` and `GET /health`
- **extract**: optional free-text order extraction through a
  chat-completions API
- **config**: JSON file plus `ORDER_INTAKE_*` environment overrides

## Modules

- **cell_ref**: A1 cell and range addressing
- **schema**: canonical and resolved column layouts
- **record**: keyed and positional order records
- **timestamp**: submission time rendering (ko-KR style by default)
- **state**: credential state and per-tab locks
- **error**: the crate's error type
*/

#[cfg(feature = "web")]
pub mod app;
pub mod cell_ref;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod headers;
pub mod insertion;
pub mod mapper;
pub mod provision;
pub mod record;
pub mod schema;
pub mod state;
pub mod store;
pub mod timestamp;

pub use config::Config;
pub use coordinator::{BatchCoordinator, IntakeSettings, WriteSummary};
pub use error::{Error, ErrorStatus, Result};
pub use headers::{HeaderRegistry, HeaderStrategy};
pub use insertion::{InsertionPolicy, WritePlan};
pub use provision::SheetTarget;
pub use record::{KeyedRecord, OrderRecord, RecordLayout};
pub use schema::{CanonicalSchema, ResolvedSchema};
