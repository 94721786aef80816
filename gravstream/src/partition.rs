use std::ops::Range;

use crate::error::PartitionError;

/// Contiguous range of body indices owned by one worker for writing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    /// Index of the first body of the partition.
    pub offset: usize,
    /// Number of bodies in the partition.
    pub count: usize,
}

impl Partition {
    /// Returns the partition as a range of body indices.
    #[inline]
    pub const fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.count
    }

    /// Returns the partition as a range of bytes for items of `item_size` bytes.
    #[inline]
    pub const fn byte_range(&self, item_size: usize) -> Range<usize> {
        self.offset * item_size..(self.offset + self.count) * item_size
    }
}

/// Split of `N` bodies between `W` workers.
///
/// Every worker owns a contiguous range of bodies. The ranges cover `[0, N)` exactly once and
/// their sizes differ by at most one, the remainder going to the lowest ranked workers first.
///
/// ```
/// # use gravstream::partition::{Partition, PartitionTable};
/// let table = PartitionTable::new(10, 4).unwrap();
///
/// assert_eq!(table.get(0), Some(Partition { offset: 0, count: 3 }));
/// assert_eq!(table.get(1), Some(Partition { offset: 3, count: 3 }));
/// assert_eq!(table.get(2), Some(Partition { offset: 6, count: 2 }));
/// assert_eq!(table.get(3), Some(Partition { offset: 8, count: 2 }));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionTable {
    body_count: usize,
    partitions: Vec<Partition>,
}

impl PartitionTable {
    /// Creates a new [`PartitionTable`] for `body_count` bodies and `workers` workers.
    pub fn new(body_count: usize, workers: usize) -> Result<Self, PartitionError> {
        if workers == 0 {
            return Err(PartitionError::NoWorkers);
        }

        let base = body_count / workers;
        let remainder = body_count % workers;

        let mut offset = 0;
        let partitions = (0..workers)
            .map(|rank| {
                let count = base + usize::from(rank < remainder);
                let partition = Partition { offset, count };
                offset += count;
                partition
            })
            .collect();

        Ok(Self {
            body_count,
            partitions,
        })
    }

    /// Returns the number of workers.
    #[inline]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Returns `true` if the table has no workers. Never the case for a successfully built table.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Returns the total number of bodies.
    #[inline]
    pub const fn body_count(&self) -> usize {
        self.body_count
    }

    /// Returns the partition of the given rank.
    #[inline]
    pub fn get(&self, rank: usize) -> Option<Partition> {
        self.partitions.get(rank).copied()
    }

    /// Returns the range of body indices owned by the given rank, empty for unknown ranks.
    #[inline]
    pub fn range(&self, rank: usize) -> Range<usize> {
        self.get(rank).map_or(0..0, |partition| partition.range())
    }

    /// Iterates over the partitions in rank order.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Partition> + '_ {
        self.partitions.iter()
    }

    /// Returns the byte range of every partition for items of `item_size` bytes.
    #[inline]
    pub fn byte_ranges(&self, item_size: usize) -> Vec<Range<usize>> {
        self.iter()
            .map(|partition| partition.byte_range(item_size))
            .collect()
    }
}
