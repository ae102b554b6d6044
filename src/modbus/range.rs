//! Address range validation and the edit policy applied to user input

use tracing::debug;

use super::{AddressRange, Domain};
use crate::error::RangeError;

/// Validate `(start, count)` against the limits of `domain`.
///
/// `count` is checked first; `start` is only meaningful once `count` is known.
pub fn validate(domain: Domain, start: i64, count: i64) -> Result<AddressRange, RangeError> {
    let limit = domain.count_limit();
    if count < 1 || count > i64::from(limit) {
        return Err(RangeError::InvalidCount { count, limit });
    }

    let max = max_start(domain, count);
    if start < 0 || start > max {
        return Err(RangeError::InvalidStart { start, max });
    }

    Ok(AddressRange {
        start: start as u16,
        count: count as u16,
    })
}

/// Highest legal start address for a given count
fn max_start(domain: Domain, count: i64) -> i64 {
    i64::from(domain.max_address()) - count
}

/// Holds the user's range for one channel and applies edits to it.
///
/// Count edits outside the domain limit are rejected and the previous range is
/// kept. Start edits past the end of the address space are clamped, as is the
/// start when a count edit would push the range past the end. The held range is
/// therefore always valid; the last rejection is kept until the next accepted edit.
#[derive(Debug, Clone)]
pub struct RangeEditor {
    domain: Domain,
    range: AddressRange,
    rejected: Option<RangeError>,
}

impl RangeEditor {
    pub fn new(domain: Domain, range: AddressRange) -> Result<Self, RangeError> {
        let range = validate(domain, i64::from(range.start), i64::from(range.count))?;
        Ok(Self {
            domain,
            range,
            rejected: None,
        })
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn range(&self) -> AddressRange {
        self.range
    }

    /// The last rejected edit, if no edit has been accepted since
    pub fn rejected(&self) -> Option<&RangeError> {
        self.rejected.as_ref()
    }

    pub fn set_count(&mut self, count: i64) -> Result<AddressRange, RangeError> {
        let limit = self.domain.count_limit();
        if count < 1 || count > i64::from(limit) {
            let err = RangeError::InvalidCount { count, limit };
            self.rejected = Some(err.clone());
            return Err(err);
        }

        let max = max_start(self.domain, count);
        let start = i64::from(self.range.start);
        let start = if start > max {
            debug!(
                "{}: clamping start {} to {} for count {}",
                self.domain, start, max, count
            );
            max
        } else {
            start
        };

        self.accept(start, count)
    }

    pub fn set_start(&mut self, start: i64) -> Result<AddressRange, RangeError> {
        let count = i64::from(self.range.count);
        let max = max_start(self.domain, count);
        if start < 0 {
            let err = RangeError::InvalidStart { start, max };
            self.rejected = Some(err.clone());
            return Err(err);
        }

        self.accept(start.min(max), count)
    }

    fn accept(&mut self, start: i64, count: i64) -> Result<AddressRange, RangeError> {
        let range = validate(self.domain, start, count)?;
        self.range = range;
        self.rejected = None;
        Ok(range)
    }
}
