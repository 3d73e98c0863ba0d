//! Column schema for an order tab.
//!
//! A schema is an ordered list of unique column names. The last two columns
//! of the canonical schema are reserved: they are never read from an order
//! record but computed while building the row.

use serde::{Deserialize, Serialize};

/// Header of the reserved attachment-link column.
pub const ATTACHMENT_COLUMN: &str = "영수증 링크";
/// Header of the reserved submission-timestamp column.
pub const TIMESTAMP_COLUMN: &str = "제출 시각";

/// Standard fixed columns used when no override is configured.
pub const DEFAULT_FIXED_COLUMNS: [&str; 10] = [
    "주문자명",
    "제품명",
    "옵션",
    "수량",
    "결제금액",
    "수취인명",
    "연락처",
    "우편번호",
    "주소",
    "배송메모",
];

/// Which computed value a reserved column carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedColumn {
    Attachment,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedNames {
    pub attachment: String,
    pub timestamp: String,
}

impl Default for ReservedNames {
    fn default() -> Self {
        Self {
            attachment: ATTACHMENT_COLUMN.to_string(),
            timestamp: TIMESTAMP_COLUMN.to_string(),
        }
    }
}

impl ReservedNames {
    pub fn classify(&self, column: &str) -> Option<ReservedColumn> {
        if column == self.attachment {
            Some(ReservedColumn::Attachment)
        } else if column == self.timestamp {
            Some(ReservedColumn::Timestamp)
        } else {
            None
        }
    }

    pub fn is_reserved(&self, column: &str) -> bool {
        self.classify(column).is_some()
    }
}

/// The canonical column layout a deployment enforces.
///
/// `fixed` is the ordered list of data columns; the reserved pair is always
/// appended after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalSchema {
    fixed: Vec<String>,
    reserved: ReservedNames,
}

impl Default for CanonicalSchema {
    fn default() -> Self {
        Self::new(
            DEFAULT_FIXED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            ReservedNames::default(),
        )
    }
}

impl CanonicalSchema {
    /// Builds a canonical schema, dropping duplicate and reserved names from
    /// `fixed` so the resulting column list stays unique.
    pub fn new(fixed: Vec<String>, reserved: ReservedNames) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(fixed.len());
        for name in fixed {
            let name = name.trim().to_string();
            if name.is_empty() || reserved.is_reserved(&name) || unique.contains(&name) {
                continue;
            }
            unique.push(name);
        }
        Self {
            fixed: unique,
            reserved,
        }
    }

    /// The non-reserved columns, in order.
    pub fn fixed(&self) -> &[String] {
        &self.fixed
    }

    pub fn reserved(&self) -> &ReservedNames {
        &self.reserved
    }

    /// Full header row: fixed columns followed by the reserved pair.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = self.fixed.clone();
        columns.push(self.reserved.attachment.clone());
        columns.push(self.reserved.timestamp.clone());
        columns
    }

    pub fn first_column(&self) -> &str {
        self.fixed
            .first()
            .map_or(self.reserved.attachment.as_str(), String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fixed.len() + 2
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// The header row actually in force for one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchema {
    columns: Vec<String>,
}

impl ResolvedSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

impl From<&CanonicalSchema> for ResolvedSchema {
    fn from(canonical: &CanonicalSchema) -> Self {
        Self::new(canonical.columns())
    }
}
