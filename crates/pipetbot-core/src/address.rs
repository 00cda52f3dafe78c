//! Row-letter + column-number addressing of items in a labware grid
//!
//! Rows are lettered from `A` (then `AA`, `AB`, ... past `Z`), columns are
//! numbered from 1. Items are stored column-major: A1, B1, ..., H1, A2, ...

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid item identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("Identifier {identifier} is outside a {rows}x{columns} grid")]
    OutOfRange {
        identifier: String,
        rows: usize,
        columns: usize,
    },
}

/// Parse `"B3"` into zero-based `(row, column)` = `(1, 2)`
pub fn parse_identifier(identifier: &str) -> Result<(usize, usize), AddressError> {
    let invalid = || AddressError::InvalidIdentifier(identifier.to_string());

    let split = identifier
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (letters, digits) = identifier.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid());
    }

    let mut row = 0usize;
    for c in letters.chars() {
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        row = row
            .checked_mul(26)
            .and_then(|r| r.checked_add(digit))
            .ok_or_else(invalid)?;
    }

    let column: usize = digits.parse().map_err(|_| invalid())?;
    if column == 0 {
        return Err(invalid());
    }

    Ok((row - 1, column - 1))
}

/// Format zero-based `(row, column)` as an identifier
pub fn format_identifier(row: usize, column: usize) -> String {
    let mut letters = Vec::new();
    let mut n = row + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    let letters: String = letters.into_iter().rev().collect();
    format!("{}{}", letters, column + 1)
}

/// Column-major index of an identifier in a grid of `rows` x `columns`
pub fn index_of(identifier: &str, rows: usize, columns: usize) -> Result<usize, AddressError> {
    let (row, column) = parse_identifier(identifier)?;
    if row >= rows || column >= columns {
        return Err(AddressError::OutOfRange {
            identifier: identifier.to_string(),
            rows,
            columns,
        });
    }
    Ok(column * rows + row)
}

/// Identifiers of every item of a grid, column-major
pub fn grid_identifiers(rows: usize, columns: usize) -> Vec<String> {
    (0..columns)
        .flat_map(|column| (0..rows).map(move |row| format_identifier(row, column)))
        .collect()
}

/// Expand `"A1:B2"` to `["A1", "B1", "A2", "B2"]`; a single identifier
/// expands to itself
pub fn parse_range(range: &str) -> Result<Vec<String>, AddressError> {
    let Some((start, end)) = range.split_once(':') else {
        parse_identifier(range)?;
        return Ok(vec![range.to_ascii_uppercase()]);
    };

    let (r0, c0) = parse_identifier(start.trim())?;
    let (r1, c1) = parse_identifier(end.trim())?;
    let (row_lo, row_hi) = (r0.min(r1), r0.max(r1));
    let (col_lo, col_hi) = (c0.min(c1), c0.max(c1));

    Ok((col_lo..=col_hi)
        .flat_map(|column| (row_lo..=row_hi).map(move |row| format_identifier(row, column)))
        .collect())
}
