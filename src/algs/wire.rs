//! Fixed, little-endian wire types for DOF offset, assembly-stash and scatter traffic.

use bytemuck::{Pod, Zeroable};
use static_assertions::assert_eq_size;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Decode a received byte buffer into records. The buffer coming back from a
/// receive has no alignment guarantee, so this copies.
pub fn decode_records<T: Pod>(raw: &[u8]) -> Vec<T> {
    bytemuck::pod_collect_to_vec(raw)
}

// All multi-byte integers in these structs are **little-endian** on the wire.
// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

/// A global face id with the global offset of its first trace DOF.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireFaceOffset {
    pub face_le: u64,
    pub offset_le: u64,
}

impl WireFaceOffset {
    pub fn new(face: u64, offset: usize) -> Self {
        Self {
            face_le: face.to_le(),
            offset_le: (offset as u64).to_le(),
        }
    }
    pub fn face(&self) -> u64 {
        u64::from_le(self.face_le)
    }
    pub fn offset(&self) -> usize {
        u64::from_le(self.offset_le) as usize
    }
}

/// A matrix entry travelling from the inserting rank to the row owner.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireEntry {
    pub row_le: u64,
    pub col_le: u64,
    pub value_bits_le: u64,
}

impl WireEntry {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Self {
            row_le: (row as u64).to_le(),
            col_le: (col as u64).to_le(),
            value_bits_le: value.to_bits().to_le(),
        }
    }
    pub fn row(&self) -> usize {
        u64::from_le(self.row_le) as usize
    }
    pub fn col(&self) -> usize {
        u64::from_le(self.col_le) as usize
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(u64::from_le(self.value_bits_le))
    }
}

/// A vector entry travelling from the inserting rank to the owner.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireValue {
    pub index_le: u64,
    pub value_bits_le: u64,
}

impl WireValue {
    pub fn new(index: usize, value: f64) -> Self {
        Self {
            index_le: (index as u64).to_le(),
            value_bits_le: value.to_bits().to_le(),
        }
    }
    pub fn index(&self) -> usize {
        u64::from_le(self.index_le) as usize
    }
    pub fn value(&self) -> f64 {
        f64::from_bits(u64::from_le(self.value_bits_le))
    }
}

/// A bare global index (scatter requests, count tables).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireIndex {
    pub index_le: u64,
}

impl WireIndex {
    pub fn new(index: usize) -> Self {
        Self {
            index_le: (index as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.index_le) as usize
    }
}

/// A bare scalar payload (scatter data).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireScalar {
    pub bits_le: u64,
}

impl WireScalar {
    pub fn new(value: f64) -> Self {
        Self {
            bits_le: value.to_bits().to_le(),
        }
    }
    pub fn get(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

assert_eq_size!(WireFaceOffset, [u8; 16]);
assert_eq_size!(WireEntry, [u8; 24]);
assert_eq_size!(WireValue, [u8; 16]);
assert_eq_size!(WireIndex, [u8; 8]);
assert_eq_size!(WireScalar, [u8; 8]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_survives_byte_transport() {
        let sent = [WireEntry::new(7, 12, -0.25), WireEntry::new(0, 3, 1e-300)];
        let bytes = cast_slice(&sent).to_vec();
        let got: Vec<WireEntry> = decode_records(&bytes);
        assert_eq!(got[0].row(), 7);
        assert_eq!(got[0].col(), 12);
        assert_eq!(got[0].value(), -0.25);
        assert_eq!(got[1].value().to_bits(), 1e-300f64.to_bits());
    }

    #[test]
    fn decode_handles_unaligned_input() {
        let mut raw = vec![0u8; 1];
        raw.extend_from_slice(cast_slice(&[WireIndex::new(42)]));
        let got: Vec<WireIndex> = decode_records(&raw[1..]);
        assert_eq!(got[0].get(), 42);
    }
}
