//! Block-based unique id allocation.
//!
//! Every replica performs the same logical operations independently, so ids must
//! be issued deterministically: the authority hands each allocating scope (the
//! world, each region) a disjoint [`IdBlock`], and exactly one block is bound to
//! the [`IdAllocator`] while an operation runs.

use crate::bytes::{ByteReader, ByteWriter, DecodeError};
use crate::scope::Scope;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encoded size of an [`IdBlock`]: three little-endian `i32`.
pub const ID_BLOCK_BYTES: usize = 12;

/// Failures drawing ids. Both indicate a sizing or pairing bug, never a
/// condition to recover from silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// `next()` was called with no block bound.
    #[error("no id block is bound to the allocator")]
    NoActiveBlock,
    /// The bound block has issued every id in its range.
    #[error("id block starting at {start} exhausted after {length} ids")]
    Exhausted {
        /// First id of the block.
        start: i32,
        /// Number of ids in the block.
        length: i32,
    },
    /// A document held a malformed block.
    #[error("malformed id block: {0}")]
    Malformed(String),
}

/// Contiguous range of ids reserved for one allocating party.
///
/// Every id in `start..start + length` fits in an `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawIdBlock")]
pub struct IdBlock {
    start: i32,
    length: i32,
    cursor: i32,
}

#[derive(Deserialize)]
struct RawIdBlock {
    start: i32,
    length: i32,
    cursor: i32,
}

impl TryFrom<RawIdBlock> for IdBlock {
    type Error = DecodeError;

    fn try_from(raw: RawIdBlock) -> Result<Self, Self::Error> {
        IdBlock::checked(raw.start, raw.length, raw.cursor)
    }
}

impl IdBlock {
    /// Fresh block covering `start..start + length`, clamped so the last id
    /// still fits in an `i32`.
    pub fn new(start: i32, length: i32) -> Self {
        Self {
            start,
            length: length.clamp(0, i32::MAX - start.max(0)),
            cursor: 0,
        }
    }

    fn checked(start: i32, length: i32, cursor: i32) -> Result<Self, DecodeError> {
        if length < 0 || start.checked_add(length).is_none() {
            return Err(DecodeError::InvalidValue {
                field: "id_block.length",
                value: length.into(),
            });
        }
        if !(0..=length).contains(&cursor) {
            return Err(DecodeError::InvalidValue {
                field: "id_block.cursor",
                value: cursor.into(),
            });
        }
        Ok(Self {
            start,
            length,
            cursor,
        })
    }

    /// First id of the range.
    pub fn start(&self) -> i32 {
        self.start
    }

    /// Size of the range.
    pub fn length(&self) -> i32 {
        self.length
    }

    /// Number of ids already issued.
    pub fn cursor(&self) -> i32 {
        self.cursor
    }

    /// Ids still available.
    pub fn remaining(&self) -> i32 {
        self.length - self.cursor
    }

    /// Issue the next id, advancing the cursor.
    pub fn next_id(&mut self) -> Result<i32, IdError> {
        let exhausted = IdError::Exhausted {
            start: self.start,
            length: self.length,
        };
        if self.cursor >= self.length {
            return Err(exhausted);
        }
        let id = self.start.checked_add(self.cursor).ok_or(exhausted)?;
        self.cursor += 1;
        Ok(id)
    }

    /// Encode as `(start, length, cursor)`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        writer
            .write_i32(self.start)
            .write_i32(self.length)
            .write_i32(self.cursor);
        writer.into_bytes()
    }

    /// Decode from a reader positioned at an encoded block.
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let start = reader.read_i32()?;
        let length = reader.read_i32()?;
        let cursor = reader.read_i32()?;
        Self::checked(start, length, cursor)
    }

    /// Base64 of the encoded block, as stored in documents.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Inverse of [`IdBlock::to_base64`].
    pub fn from_base64(text: &str) -> Result<Self, IdError> {
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|err| IdError::Malformed(err.to_string()))?;
        if bytes.len() != ID_BLOCK_BYTES {
            return Err(IdError::Malformed(format!(
                "expected {ID_BLOCK_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        Self::read_from(&mut ByteReader::new(&bytes)).map_err(|err| IdError::Malformed(err.to_string()))
    }
}

/// Holds the single block ids are currently drawn from.
///
/// The block is moved in for the duration of a scope and moved back out when the
/// scope closes, so the owner always gets the advanced cursor back.
#[derive(Debug, Default)]
pub struct IdAllocator {
    current: Option<(Scope, IdBlock)>,
}

impl IdAllocator {
    /// Allocator with nothing bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `block` for `scope`. Returns a previously bound block, which the
    /// caller must hand back to its owner.
    pub fn set_current(&mut self, scope: Scope, block: IdBlock) -> Option<(Scope, IdBlock)> {
        self.current.replace((scope, block))
    }

    /// Unbind and return the current block with its cursor as advanced.
    pub fn clear_current(&mut self) -> Option<(Scope, IdBlock)> {
        self.current.take()
    }

    /// Scope the bound block belongs to.
    pub fn bound_scope(&self) -> Option<Scope> {
        self.current.as_ref().map(|(scope, _)| *scope)
    }

    /// Replace the bound block if it belongs to `scope`.
    ///
    /// Returns the block back when nothing for `scope` is bound so the caller can
    /// store it with its owner instead.
    pub fn replace_if_bound(&mut self, scope: Scope, block: IdBlock) -> Option<IdBlock> {
        match &mut self.current {
            Some((bound, current)) if *bound == scope => {
                *current = block;
                None
            }
            _ => Some(block),
        }
    }

    /// Draw the next id from the bound block.
    pub fn next(&mut self) -> Result<i32, IdError> {
        match &mut self.current {
            Some((_, block)) => block.next_id(),
            None => Err(IdError::NoActiveBlock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::RegionId;

    #[test]
    fn block_issues_contiguous_ids_until_exhausted() {
        let mut block = IdBlock::new(1000, 3);
        assert_eq!(block.next_id(), Ok(1000));
        assert_eq!(block.next_id(), Ok(1001));
        assert_eq!(block.next_id(), Ok(1002));
        assert_eq!(
            block.next_id(),
            Err(IdError::Exhausted {
                start: 1000,
                length: 3
            })
        );
    }

    #[test]
    fn allocator_without_block_fails() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.next(), Err(IdError::NoActiveBlock));
    }

    #[test]
    fn clear_returns_advanced_block() {
        let mut ids = IdAllocator::new();
        ids.set_current(Scope::Global, IdBlock::new(10, 5));
        ids.next().unwrap();
        ids.next().unwrap();
        let (scope, block) = ids.clear_current().unwrap();
        assert_eq!(scope, Scope::Global);
        assert_eq!(block.cursor(), 2);
        assert_eq!(ids.next(), Err(IdError::NoActiveBlock));
    }

    #[test]
    fn replace_only_touches_matching_scope() {
        let mut ids = IdAllocator::new();
        let region = Scope::Region(RegionId(1));
        ids.set_current(region, IdBlock::new(0, 2));

        let fresh = IdBlock::new(500, 10);
        assert_eq!(ids.replace_if_bound(Scope::Global, fresh), Some(fresh));
        assert_eq!(ids.replace_if_bound(region, fresh), None);
        assert_eq!(ids.next(), Ok(500));
    }

    #[test]
    fn base64_roundtrip_preserves_cursor() {
        let mut block = IdBlock::new(2_000_000, 100_000);
        for _ in 0..17 {
            block.next_id().unwrap();
        }
        let restored = IdBlock::from_base64(&block.to_base64()).unwrap();
        assert_eq!(restored, block);
        assert_eq!(restored.cursor(), 17);
    }

    #[test]
    fn blocks_past_the_id_range_are_rejected() {
        let mut writer = ByteWriter::new();
        writer.write_i32(i32::MAX).write_i32(4).write_i32(0);
        let bytes = writer.into_bytes();
        assert!(matches!(
            IdBlock::read_from(&mut ByteReader::new(&bytes)),
            Err(DecodeError::InvalidValue {
                field: "id_block.length",
                ..
            })
        ));
        assert!(IdBlock::from_base64(&STANDARD.encode(&bytes)).is_err());
        assert!(serde_json::from_str::<IdBlock>(
            r#"{"start":2147483647,"length":4,"cursor":0}"#
        )
        .is_err());
    }

    #[test]
    fn new_clamps_to_the_last_representable_id() {
        let mut block = IdBlock::new(i32::MAX - 1, 10);
        assert_eq!(block.length(), 1);
        assert_eq!(block.next_id(), Ok(i32::MAX - 1));
        assert_eq!(
            block.next_id(),
            Err(IdError::Exhausted {
                start: i32::MAX - 1,
                length: 1
            })
        );

        let mut top = IdBlock::new(i32::MAX, 4);
        assert_eq!(top.length(), 0);
        assert!(top.next_id().is_err());
        assert_eq!(IdBlock::new(-5, 3).length(), 3);
    }

    #[test]
    fn malformed_base64_is_rejected() {
        assert!(IdBlock::from_base64("not base64!").is_err());
        assert!(IdBlock::from_base64(&STANDARD.encode([0u8; 4])).is_err());
    }
}
