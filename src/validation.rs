//! Helpers for common checks for the validity of data.
use crate::error::{Error, Result};

/// Validates a collection contains exactly one item when expected to.
pub trait ExactlyOne<T> {
    fn exactly_one(self) -> Result<T, usize>;
}

impl<T> ExactlyOne<T> for Vec<T> {
    /// Returns the one item contained in the vector if there is exactly one
    /// item; returns an error if there is more than one item in the vector.
    fn exactly_one(mut self) -> Result<T, usize> {
        let v = self.pop().ok_or(0_usize)?;
        if self.is_empty() {
            Ok(v)
        } else {
            Err(self.len() + 1)
        }
    }
}

/// Checks an offset range `[start, end)` requested by a caller.
pub fn validate_offset_range(start: i64, end: i64) -> Result<()> {
    if start < 0 || end < 0 {
        return Err(Error::invalid_argument(format!(
            "offsets must not be negative, got [{start}, {end})"
        )));
    }
    if start > end {
        return Err(Error::invalid_argument(format!(
            "start offset {start} is past end offset {end}"
        )));
    }
    Ok(())
}

pub fn validate_partition(partition: i32) -> Result<()> {
    if partition < 0 {
        return Err(Error::invalid_argument(format!(
            "partition index must not be negative, got {partition}"
        )));
    }
    Ok(())
}

/// Resolves a caller supplied record limit against the default and upper bound.
pub fn resolve_limit(limit: Option<usize>, default_limit: usize, max_limit: usize) -> Result<usize> {
    match limit {
        None => Ok(default_limit.min(max_limit)),
        Some(0) => Err(Error::invalid_argument("limit must be at least 1")),
        Some(n) => Ok(n.min(max_limit)),
    }
}
