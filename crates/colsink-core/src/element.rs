//! Column Element Types
//!
//! Every physical column stores elements of a single fixed-size type. The element descriptor
//! tells the sealing codec how large an element is in memory (inside a `Page`) and how it is
//! packed on storage.
//!
//! ## Packing Rules
//! - **Bit**: one byte per boolean in memory (0 or 1; anything else is rejected), one bit per
//!   boolean on storage (LSB first)
//! - **Everything else**: the in-memory width, stored little-endian
//!
//! Pages are filled with native-endian values. On big-endian targets packing swaps the bytes of
//! each element so that sealed pages are byte-identical across platforms.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The on-storage type of a column's elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Bit,
    Byte,
    Char,
    Int8,
    Int16,
    Int32,
    Int64,
    Real32,
    Real64,
    Index32,
    Index64,
}

/// Element descriptor attached to every column handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnElement {
    kind: ElementKind,
}

impl ColumnElement {
    pub fn new(kind: ElementKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Bytes per element inside an in-memory page
    pub fn memory_size(&self) -> usize {
        match self.kind {
            ElementKind::Bit | ElementKind::Byte | ElementKind::Char | ElementKind::Int8 => 1,
            ElementKind::Int16 => 2,
            ElementKind::Int32 | ElementKind::Real32 | ElementKind::Index32 => 4,
            ElementKind::Int64 | ElementKind::Real64 | ElementKind::Index64 => 8,
        }
    }

    /// Bits per element on storage
    pub fn packed_bits(&self) -> usize {
        match self.kind {
            ElementKind::Bit => 1,
            _ => self.memory_size() * 8,
        }
    }

    /// Whether packing changes the representation (beyond byte order)
    pub fn is_mapped(&self) -> bool {
        self.kind == ElementKind::Bit
    }

    /// Number of bytes `n_elements` occupy once packed
    pub fn packed_len(&self, n_elements: usize) -> usize {
        (n_elements * self.packed_bits()).div_ceil(8)
    }

    /// Pack `n_elements` from the in-memory representation in `src` into `dst`.
    ///
    /// `dst` must be exactly `packed_len(n_elements)` bytes long.
    pub fn pack(&self, src: &[u8], n_elements: usize, dst: &mut [u8]) -> Result<()> {
        self.check_lengths(src.len(), n_elements * self.memory_size(), "pack source")?;
        self.check_lengths(dst.len(), self.packed_len(n_elements), "pack destination")?;

        match self.kind {
            ElementKind::Bit => {
                dst.fill(0);
                for (i, &value) in src.iter().enumerate() {
                    match value {
                        0 => {}
                        1 => dst[i / 8] |= 1 << (i % 8),
                        other => {
                            return Err(Error::InvalidPage(format!(
                                "bit element {} holds {:#04x}, expected 0 or 1",
                                i, other
                            )))
                        }
                    }
                }
            }
            _ => {
                dst.copy_from_slice(src);
                to_little_endian(dst, self.memory_size());
            }
        }
        Ok(())
    }

    /// Unpack `n_elements` from the storage representation in `src` into `dst`.
    ///
    /// `dst` must be exactly `n_elements * memory_size()` bytes long.
    pub fn unpack(&self, src: &[u8], n_elements: usize, dst: &mut [u8]) -> Result<()> {
        self.check_lengths(src.len(), self.packed_len(n_elements), "unpack source")?;
        self.check_lengths(dst.len(), n_elements * self.memory_size(), "unpack destination")?;

        match self.kind {
            ElementKind::Bit => {
                for (i, value) in dst.iter_mut().enumerate() {
                    *value = (src[i / 8] >> (i % 8)) & 1;
                }
            }
            _ => {
                dst.copy_from_slice(src);
                to_little_endian(dst, self.memory_size());
            }
        }
        Ok(())
    }

    fn check_lengths(&self, actual: usize, expected: usize, what: &str) -> Result<()> {
        if actual != expected {
            return Err(Error::InvalidPage(format!(
                "{} for {:?} column has {} bytes, expected {}",
                what, self.kind, actual, expected
            )));
        }
        Ok(())
    }
}

impl From<ElementKind> for ColumnElement {
    fn from(kind: ElementKind) -> Self {
        Self::new(kind)
    }
}

/// Byte-swap every element on big-endian targets; a no-op on little-endian ones.
///
/// The swap is its own inverse, so it serves both packing and unpacking.
fn to_little_endian(buf: &mut [u8], width: usize) {
    if cfg!(target_endian = "big") && width > 1 {
        for chunk in buf.chunks_exact_mut(width) {
            chunk.reverse();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_and_packed_sizes() {
        let bit = ColumnElement::new(ElementKind::Bit);
        assert_eq!(bit.memory_size(), 1);
        assert_eq!(bit.packed_bits(), 1);
        assert_eq!(bit.packed_len(9), 2);
        assert!(bit.is_mapped());

        let real = ColumnElement::new(ElementKind::Real64);
        assert_eq!(real.memory_size(), 8);
        assert_eq!(real.packed_len(3), 24);
        assert!(!real.is_mapped());
    }

    #[test]
    fn test_bit_packing_roundtrip() {
        let bit = ColumnElement::new(ElementKind::Bit);
        let bools = [1u8, 0, 1, 1, 0, 0, 0, 1, 1, 0];

        let mut packed = vec![0u8; bit.packed_len(bools.len())];
        bit.pack(&bools, bools.len(), &mut packed).unwrap();
        assert_eq!(packed, vec![0b1000_1101, 0b0000_0001]);

        let mut unpacked = vec![0u8; bools.len()];
        bit.unpack(&packed, bools.len(), &mut unpacked).unwrap();
        assert_eq!(unpacked, bools);
    }

    #[test]
    fn test_bit_packing_rejects_non_boolean_bytes() {
        let bit = ColumnElement::new(ElementKind::Bit);
        let mut packed = [0u8; 1];
        for value in [2u8, 0xFF] {
            let err = bit.pack(&[1, value], 2, &mut packed).unwrap_err();
            assert!(matches!(err, Error::InvalidPage(_)));
        }
    }

    #[test]
    fn test_fixed_width_packing_is_little_endian() {
        let int = ColumnElement::new(ElementKind::Int32);
        let values: Vec<u8> = [1i32, -2, 300]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();

        let mut packed = vec![0u8; int.packed_len(3)];
        int.pack(&values, 3, &mut packed).unwrap();
        assert_eq!(&packed[0..4], &1i32.to_le_bytes());
        assert_eq!(&packed[8..12], &300i32.to_le_bytes());

        let mut unpacked = vec![0u8; values.len()];
        int.unpack(&packed, 3, &mut unpacked).unwrap();
        assert_eq!(unpacked, values);
    }

    #[test]
    fn test_pack_rejects_wrong_lengths() {
        let int = ColumnElement::new(ElementKind::Int64);
        let mut dst = vec![0u8; 8];
        let err = int.pack(&[0u8; 7], 1, &mut dst).unwrap_err();
        assert!(matches!(err, Error::InvalidPage(_)));

        let mut short = vec![0u8; 4];
        assert!(int.pack(&[0u8; 8], 1, &mut short).is_err());
    }
}
