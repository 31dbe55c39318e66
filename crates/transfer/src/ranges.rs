use partflow_protocol::{Part, PartRange};

/// Sorted, non-overlapping list of part ranges.
///
/// Inserting a range merges it with its neighbours when they are
/// compatible (contiguous numbering and bytes, equal part size), so a run
/// of parts finished in order collapses into a single entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeList {
    ranges: Vec<PartRange>,
}

impl RangeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from ranges in any order.
    pub fn from_ranges(ranges: impl IntoIterator<Item = PartRange>) -> Self {
        let mut list = Self::new();
        for range in ranges {
            list.insert(range);
        }
        list
    }

    /// Inserts a range, merging with adjacent compatible ranges.
    pub fn insert(&mut self, range: PartRange) {
        // Fast path: parts usually arrive in ascending order.
        let index = match self.ranges.last() {
            Some(last) if last.number < range.number => self.ranges.len(),
            _ => self.ranges.partition_point(|r| r.number < range.number),
        };
        self.ranges.insert(index, range);
        self.merge_right(index);
        self.merge_left(index);
    }

    /// Inserts a single part.
    pub fn insert_part(&mut self, part: Part) {
        self.insert(PartRange::single(part));
    }

    /// Removes and returns the lowest-numbered part.
    pub fn shift_part(&mut self) -> Option<Part> {
        let first = self.ranges.first_mut()?;
        let part = first.part(first.number);
        if first.number_of_parts == 1 {
            self.ranges.remove(0);
        } else {
            first.number += 1;
            first.start_byte += first.part_size;
            first.number_of_parts -= 1;
        }
        Some(part)
    }

    /// Removes and returns the lowest-numbered range.
    pub fn pop_range(&mut self) -> Option<PartRange> {
        if self.ranges.is_empty() {
            None
        } else {
            Some(self.ranges.remove(0))
        }
    }

    /// Whether the list holds no parts.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of parts across all ranges.
    pub fn part_count(&self) -> u64 {
        self.ranges
            .iter()
            .map(|r| u64::from(r.number_of_parts))
            .sum()
    }

    /// Number of bytes across all ranges.
    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(PartRange::total_bytes).sum()
    }

    pub fn as_slice(&self) -> &[PartRange] {
        &self.ranges
    }

    fn mergeable(left: &PartRange, right: &PartRange) -> bool {
        left.end_number() == right.number
            && left.part_size == right.part_size
            && left.end_byte() == right.start_byte
    }

    fn merge_right(&mut self, index: usize) {
        while index + 1 < self.ranges.len() {
            let next = self.ranges[index + 1];
            if !Self::mergeable(&self.ranges[index], &next) {
                break;
            }
            self.ranges[index].number_of_parts += next.number_of_parts;
            self.ranges.remove(index + 1);
        }
    }

    fn merge_left(&mut self, mut index: usize) {
        while index > 0 {
            let current = self.ranges[index];
            if !Self::mergeable(&self.ranges[index - 1], &current) {
                break;
            }
            self.ranges[index - 1].number_of_parts += current.number_of_parts;
            self.ranges.remove(index);
            index -= 1;
        }
    }
}
