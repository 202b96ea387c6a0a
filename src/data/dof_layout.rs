//! Rank-partitioned ownership ranges of the global trace-DOF index space.
//!
//! Rank `r` owns the contiguous block `[ranges[r], ranges[r + 1])`. The table is
//! agreed on with one `allgather` of the owned counts, so every rank holds the
//! identical layout and offsets are the exclusive prefix sum in rank order.

use std::ops::Range;

use crate::algs::communicator::Communicator;
use crate::algs::wire::{WireIndex, cast_slice, decode_records};
use crate::debug_invariants::DebugInvariants;
use crate::driver_error::DriverError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DofLayout {
    rank: usize,
    ranges: Vec<usize>,
}

impl DofLayout {
    /// Collectively build the layout from this rank's owned DOF count.
    pub fn from_owned_count<C>(comm: &C, owned: usize) -> Result<Self, DriverError>
    where
        C: Communicator,
    {
        let n_ranks = comm.size().max(1);
        let mine = [WireIndex::new(owned)];
        let mut recvbuf = vec![0u8; n_ranks * std::mem::size_of::<WireIndex>()];
        comm.allgather(cast_slice(&mine), &mut recvbuf);
        let counts: Vec<WireIndex> = decode_records(&recvbuf);

        let mut ranges = Vec::with_capacity(n_ranks + 1);
        ranges.push(0usize);
        for count in &counts {
            let last = *ranges.last().unwrap_or(&0);
            ranges.push(last + count.get());
        }
        Self::from_ranges(comm.rank(), ranges)
    }

    /// Build from an explicit ownership table `[0, r1, r2, ..., total]`.
    pub fn from_ranges(rank: usize, ranges: Vec<usize>) -> Result<Self, DriverError> {
        let layout = Self { rank, ranges };
        layout.validate_invariants()?;
        Ok(layout)
    }

    /// Layout of a single rank owning everything.
    pub fn serial(total: usize) -> Self {
        Self {
            rank: 0,
            ranges: vec![0, total],
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_ranks(&self) -> usize {
        self.ranges.len() - 1
    }

    /// First owned global index.
    pub fn rows_owned_lo(&self) -> usize {
        self.ranges[self.rank]
    }

    /// One past the last owned global index.
    pub fn rows_owned_hi(&self) -> usize {
        self.ranges[self.rank + 1]
    }

    pub fn owned_range(&self) -> Range<usize> {
        self.rows_owned_lo()..self.rows_owned_hi()
    }

    pub fn owned_count(&self) -> usize {
        self.rows_owned_hi() - self.rows_owned_lo()
    }

    pub fn total(&self) -> usize {
        *self.ranges.last().unwrap_or(&0)
    }

    pub fn range_of(&self, rank: usize) -> Option<Range<usize>> {
        (rank < self.n_ranks()).then(|| self.ranges[rank]..self.ranges[rank + 1])
    }

    pub fn is_owned(&self, global: usize) -> bool {
        self.owned_range().contains(&global)
    }

    /// Local position of an owned global index.
    pub fn to_local(&self, global: usize) -> Option<usize> {
        self.is_owned(global).then(|| global - self.rows_owned_lo())
    }

    /// Rank owning `global`.
    pub fn owner_of(&self, global: usize) -> Result<usize, DriverError> {
        if global >= self.total() {
            return Err(DriverError::IndexOutOfRange {
                index: global,
                len: self.total(),
            });
        }
        // Last rank whose range starts at or before `global` and is non-empty.
        let upper = self.ranges.partition_point(|&start| start <= global);
        Ok(upper - 1)
    }

    /// The full ownership table.
    pub fn ranges(&self) -> &[usize] {
        &self.ranges
    }
}

impl DebugInvariants for DofLayout {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DofLayout");
    }

    fn validate_invariants(&self) -> Result<(), DriverError> {
        if self.ranges.len() < 2 {
            return Err(DriverError::InvalidLayout(
                "ownership table needs at least one rank".into(),
            ));
        }
        if self.ranges[0] != 0 {
            return Err(DriverError::InvalidLayout(format!(
                "ownership table starts at {}, expected 0",
                self.ranges[0]
            )));
        }
        if let Some(w) = self.ranges.windows(2).find(|w| w[1] < w[0]) {
            return Err(DriverError::InvalidLayout(format!(
                "ownership table decreases from {} to {}",
                w[0], w[1]
            )));
        }
        if self.rank >= self.ranges.len() - 1 {
            return Err(DriverError::InvalidLayout(format!(
                "rank {} outside a table for {} ranks",
                self.rank,
                self.ranges.len() - 1
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};

    #[test]
    fn serial_layout_owns_everything() {
        let layout = DofLayout::from_owned_count(&NoComm, 7).unwrap();
        assert_eq!(layout.owned_range(), 0..7);
        assert_eq!(layout.total(), 7);
        assert_eq!(layout.owner_of(6).unwrap(), 0);
        assert!(layout.owner_of(7).is_err());
    }

    #[test]
    fn owner_lookup_skips_empty_ranks() {
        let layout = DofLayout::from_ranges(0, vec![0, 3, 3, 5]).unwrap();
        assert_eq!(layout.owner_of(2).unwrap(), 0);
        assert_eq!(layout.owner_of(3).unwrap(), 2);
        assert_eq!(layout.owner_of(4).unwrap(), 2);
        assert_eq!(layout.range_of(1), Some(3..3));
    }

    #[test]
    fn rejects_decreasing_table() {
        assert!(matches!(
            DofLayout::from_ranges(0, vec![0, 4, 2]),
            Err(DriverError::InvalidLayout(_))
        ));
    }

    #[test]
    fn two_ranks_agree_on_offsets() {
        let handles: Vec<_> = RayonComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let owned = if comm.rank() == 0 { 4 } else { 3 };
                    DofLayout::from_owned_count(&comm, owned).unwrap()
                })
            })
            .collect();
        let layouts: Vec<DofLayout> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(layouts[0].ranges(), &[0, 4, 7]);
        assert_eq!(layouts[1].ranges(), layouts[0].ranges());
        assert_eq!(layouts[1].owned_range(), 4..7);
    }
}
