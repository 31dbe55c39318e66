use std::sync::atomic::{AtomicUsize, Ordering};

use partflow_protocol::{Part, PartEntry, PartRange, UploadInfo};

use crate::TransferError;

/// The parts of one upload, as issued by the server.
///
/// Ranges are sorted by part number and never overlap. Lookups remember
/// the range of the last hit, so walking parts in order is O(1) per part.
#[derive(Debug)]
pub struct PartitionModel {
    ranges: Vec<PartRange>,
    total_bytes: u64,
    end_part_number: u32,
    last_hit: AtomicUsize,
}

impl PartitionModel {
    /// Normalizes and validates the server's part entries.
    pub fn new(entries: impl IntoIterator<Item = PartEntry>) -> Result<Self, TransferError> {
        let mut ranges = Vec::new();
        for entry in entries {
            if let PartEntry::Single(part) = entry
                && part.is_empty()
            {
                return Err(TransferError::MalformedParts(format!(
                    "part {} ends at byte {} before it starts at {}",
                    part.number, part.end_byte, part.start_byte
                )));
            }
            ranges.push(entry.into_range());
        }
        ranges.sort_by_key(|r| r.number);

        let mut total_bytes = 0u64;
        for range in &ranges {
            if range.number == 0 {
                return Err(TransferError::MalformedParts(
                    "part numbers start at 1".into(),
                ));
            }
            if range.number_of_parts == 0 || range.part_size == 0 {
                return Err(TransferError::MalformedParts(format!(
                    "range at part {} is empty",
                    range.number
                )));
            }
            let bytes = checked_bounds(range).ok_or_else(|| {
                TransferError::MalformedParts(format!(
                    "range at part {} runs past the addressable parts or bytes",
                    range.number
                ))
            })?;
            total_bytes = total_bytes.checked_add(bytes).ok_or_else(|| {
                TransferError::MalformedParts("total upload size overflows".into())
            })?;
        }
        for pair in ranges.windows(2) {
            if pair[0].end_number() > pair[1].number {
                return Err(TransferError::MalformedParts(format!(
                    "part {} overlaps an earlier range",
                    pair[1].number
                )));
            }
        }

        let end_part_number = ranges.last().map_or(0, |r| r.end_number() - 1);

        Ok(Self {
            ranges,
            total_bytes,
            end_part_number,
            last_hit: AtomicUsize::new(0),
        })
    }

    /// Builds the model from an upload authorization.
    pub fn from_info(info: &UploadInfo) -> Result<Self, TransferError> {
        Self::new(info.parts.iter().copied())
    }

    /// Sum of the sizes of every part.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Highest part number, or 0 when there are no parts.
    pub fn end_part_number(&self) -> u32 {
        self.end_part_number
    }

    /// Number of parts across all ranges.
    pub fn part_count(&self) -> u64 {
        self.ranges
            .iter()
            .map(|r| u64::from(r.number_of_parts))
            .sum()
    }

    pub fn ranges(&self) -> &[PartRange] {
        &self.ranges
    }

    /// Iterates every part in ascending order.
    pub fn parts(&self) -> impl Iterator<Item = Part> + '_ {
        self.ranges.iter().flat_map(|r| r.parts())
    }

    /// Returns the part with the given number.
    pub fn get_part(&self, number: u32) -> Result<Part, TransferError> {
        let hint = self.last_hit.load(Ordering::Relaxed);
        let candidates = [Some(hint), hint.checked_add(1), hint.checked_sub(1)];
        for index in candidates.into_iter().flatten() {
            match self.ranges.get(index) {
                Some(range) if range.contains(number) => {
                    self.last_hit.store(index, Ordering::Relaxed);
                    return Ok(range.part(number));
                }
                _ => {}
            }
        }

        match self.ranges.iter().position(|r| r.contains(number)) {
            Some(index) => {
                self.last_hit.store(index, Ordering::Relaxed);
                Ok(self.ranges[index].part(number))
            }
            None => Err(TransferError::PartNotFound(number)),
        }
    }
}

/// Byte size of `range`, or `None` when its last part number or its end
/// byte does not fit the wire integer types.
fn checked_bounds(range: &PartRange) -> Option<u64> {
    range.number.checked_add(range.number_of_parts)?;
    let bytes = u64::from(range.number_of_parts).checked_mul(range.part_size)?;
    range.start_byte.checked_add(bytes)?;
    Some(bytes)
}
