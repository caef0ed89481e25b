//! Little-endian byte reader/writer used by command records and payloads.
//!
//! Layout conventions: integers are little-endian, byte strings and UTF-8
//! strings are prefixed with an `i32` length, integer arrays are prefixed with
//! an `i32` element count.

use thiserror::Error;

/// Errors produced while decoding a byte record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The record ended before the requested field.
    #[error("unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the record.
        remaining: usize,
    },
    /// A length prefix was negative.
    #[error("negative length prefix {0}")]
    NegativeLength(i32),
    /// A string field held invalid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    /// The command kind is not known to this build.
    #[error("unknown command kind {0}")]
    UnknownCommandKind(u32),
    /// The target tick is not a valid tick.
    #[error("invalid target tick {0}")]
    InvalidTick(i32),
    /// The region id is neither a region nor the global marker.
    #[error("invalid region id {0}")]
    InvalidRegion(i32),
    /// A field held a value outside its domain.
    #[error("invalid value for {field}: {value}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Offending raw value.
        value: i64,
    },
}

/// Cursor over a borrowed byte record.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Start reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < needed {
            return Err(DecodeError::UnexpectedEof {
                needed,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a boolean stored as one byte (non-zero is `true`).
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    fn read_len(&mut self) -> Result<usize, DecodeError> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| DecodeError::NegativeLength(len))
    }

    /// Read an `i32`-length-prefixed byte string.
    pub fn read_prefixed_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_len()?;
        self.take(len)
    }

    /// Read an `i32`-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_prefixed_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Read an `i32`-count-prefixed array of `i32`.
    pub fn read_prefixed_i32s(&mut self) -> Result<Vec<i32>, DecodeError> {
        let count = self.read_len()?;
        // Each element needs four bytes; reject absurd counts before allocating.
        if count.saturating_mul(4) > self.remaining() {
            return Err(DecodeError::UnexpectedEof {
                needed: count.saturating_mul(4),
                remaining: self.remaining(),
            });
        }
        (0..count).map(|_| self.read_i32()).collect()
    }

    /// Read an `i32`-count-prefixed array of strings.
    pub fn read_prefixed_strings(&mut self) -> Result<Vec<String>, DecodeError> {
        let count = self.read_len()?;
        if count.saturating_mul(4) > self.remaining() {
            return Err(DecodeError::UnexpectedEof {
                needed: count.saturating_mul(4),
                remaining: self.remaining(),
            });
        }
        (0..count).map(|_| self.read_string()).collect()
    }
}

/// Growable little-endian record writer.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one byte.
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Write a boolean as one byte.
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    /// Write a little-endian `i32`.
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a little-endian `u32`.
    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn write_len(&mut self, len: usize) -> &mut Self {
        // Records larger than 2 GiB are never produced by this workspace.
        let len = i32::try_from(len).unwrap_or(i32::MAX);
        self.write_i32(len)
    }

    /// Write an `i32`-length-prefixed byte string.
    pub fn write_prefixed_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.write_len(bytes.len());
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Write an `i32`-length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.write_prefixed_bytes(value.as_bytes())
    }

    /// Write an `i32`-count-prefixed array of `i32`.
    pub fn write_prefixed_i32s(&mut self, values: &[i32]) -> &mut Self {
        self.write_len(values.len());
        for value in values {
            self.write_i32(*value);
        }
        self
    }

    /// Write an `i32`-count-prefixed array of strings.
    pub fn write_prefixed_strings<S: AsRef<str>>(&mut self, values: &[S]) -> &mut Self {
        self.write_len(values.len());
        for value in values {
            self.write_string(value.as_ref());
        }
        self
    }

    /// Finish and return the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
