//! A1-notation helpers shared by the store adapters.
//!
//! Rows and columns are 1-based throughout, matching the notation itself.
//! A range endpoint may omit its row (`A:A`) or its column (`1:1`); an
//! omitted end means "unbounded" in that direction.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Error, Result};

lazy_static! {
    static ref ENDPOINT_REGEX: Regex = Regex::new(r"^([A-Za-z]*)([0-9]*)$").unwrap();
}

/// Converts a 1-based column number to its letters (`1 -> A`, `28 -> AB`).
pub fn col_to_letter(col: u32) -> String {
    let mut col = col;
    let mut result = String::new();
    while col > 0 {
        col -= 1;
        result.push(((col % 26) as u8 + b'A') as char);
        col /= 26;
    }
    result.chars().rev().collect()
}

/// Converts column letters to a 1-based column number.
pub fn letter_to_col(letters: &str) -> Option<u32> {
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        let digit = (c.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        acc.checked_mul(26)?.checked_add(digit)
    })
}

pub fn cell_name(row: u32, col: u32) -> String {
    format!("{}{}", col_to_letter(col), row)
}

/// Parses a single cell name such as `B12` into `(row, col)`.
pub fn parse_cell_name(cell_name: &str) -> Option<(u32, u32)> {
    let (col, row) = parse_endpoint(cell_name)?;
    match (row, col) {
        (Some(row), Some(col)) if row > 0 => Some((row, col)),
        _ => None,
    }
}

fn parse_endpoint(text: &str) -> Option<(Option<u32>, Option<u32>)> {
    let caps = ENDPOINT_REGEX.captures(text.trim())?;
    let letters = caps.get(1).map_or("", |m| m.as_str());
    let digits = caps.get(2).map_or("", |m| m.as_str());
    if letters.is_empty() && digits.is_empty() {
        return None;
    }
    let col = if letters.is_empty() {
        None
    } else {
        Some(letter_to_col(letters)?)
    };
    let row = if digits.is_empty() {
        None
    } else {
        Some(digits.parse::<u32>().ok()?)
    };
    Some((col, row))
}

/// A rectangular A1 range. Ends are inclusive; `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: Option<u32>,
    pub end_col: Option<u32>,
}

impl CellRange {
    /// The whole of row `row`.
    pub fn row(row: u32) -> Self {
        Self {
            start_row: row,
            start_col: 1,
            end_row: Some(row),
            end_col: None,
        }
    }

    /// The whole of column `col`.
    pub fn column(col: u32) -> Self {
        Self {
            start_row: 1,
            start_col: col,
            end_row: None,
            end_col: Some(col),
        }
    }

    /// Columns `1..=width` from row 1 down, unbounded in rows.
    pub fn columns_through(width: u32) -> Self {
        Self {
            start_row: 1,
            start_col: 1,
            end_row: None,
            end_col: Some(width.max(1)),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidInput(format!("invalid A1 range '{text}'"));
        let (start, end) = match text.split_once(':') {
            Some((start, end)) => (start, Some(end)),
            None => (text, None),
        };

        let (start_col, start_row) = parse_endpoint(start).ok_or_else(invalid)?;
        let range = match end {
            None => {
                // A lone endpoint is a single cell, or a whole row/column.
                Self {
                    start_row: start_row.unwrap_or(1),
                    start_col: start_col.unwrap_or(1),
                    end_row: start_row,
                    end_col: start_col,
                }
            }
            Some(end) => {
                let (end_col, end_row) = parse_endpoint(end).ok_or_else(invalid)?;
                Self {
                    start_row: start_row.unwrap_or(1),
                    start_col: start_col.unwrap_or(1),
                    end_row,
                    end_col,
                }
            }
        };

        if range.start_row == 0 || range.start_col == 0 {
            return Err(invalid());
        }
        if range.end_row.is_some_and(|r| r < range.start_row)
            || range.end_col.is_some_and(|c| c < range.start_col)
        {
            return Err(invalid());
        }
        Ok(range)
    }

    /// Renders the range back to A1 notation.
    pub fn to_a1(&self) -> String {
        let start_col = col_to_letter(self.start_col);
        let end_col = self.end_col.map(col_to_letter).unwrap_or_default();
        let end_row = self.end_row.map(|r| r.to_string()).unwrap_or_default();
        match (self.end_col, self.end_row) {
            (None, Some(end_row)) => format!("{}:{}", self.start_row, end_row),
            (Some(_), None) if self.start_row == 1 => format!("{start_col}:{end_col}"),
            _ => format!("{start_col}{}:{end_col}{end_row}", self.start_row),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(col_to_letter(1), "A");
        assert_eq!(col_to_letter(26), "Z");
        assert_eq!(col_to_letter(28), "AB");
        assert_eq!(col_to_letter(703), "AAA");
        assert_eq!(letter_to_col("A"), Some(1));
        assert_eq!(letter_to_col("ab"), Some(28));
        assert_eq!(letter_to_col(""), None);
        assert_eq!(letter_to_col("A1"), None);
    }

    #[test]
    fn cell_names() {
        assert_eq!(cell_name(3, 1), "A3");
        assert_eq!(parse_cell_name("L12"), Some((12, 12)));
        assert_eq!(parse_cell_name("A0"), None);
        assert_eq!(parse_cell_name("12"), None);
        assert_eq!(parse_cell_name("B"), None);
    }

    #[test]
    fn ranges() {
        let r = CellRange::parse("A1:L").unwrap();
        assert_eq!(r, CellRange::columns_through(12));

        let r = CellRange::parse("A:A").unwrap();
        assert_eq!(r, CellRange::column(1));

        let r = CellRange::parse("1:1").unwrap();
        assert_eq!(r, CellRange::row(1));

        let r = CellRange::parse("C4").unwrap();
        assert_eq!((r.start_row, r.start_col), (4, 3));
        assert_eq!((r.end_row, r.end_col), (Some(4), Some(3)));

        assert!(CellRange::parse("B2:A1").is_err());
        assert!(CellRange::parse("A1:!").is_err());
    }

    #[test]
    fn ranges_render_back() {
        assert_eq!(CellRange::row(1).to_a1(), "1:1");
        assert_eq!(CellRange::column(1).to_a1(), "A:A");
        assert_eq!(CellRange::columns_through(12).to_a1(), "A:L");
        assert_eq!(CellRange::parse("B2:D9").unwrap().to_a1(), "B2:D9");
    }
}
