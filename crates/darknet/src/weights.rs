//! Darknet weights file reading
//!
//! A weights file is a little-endian header followed by the raw `f32`
//! parameters of every layer, in the order the layers appear in the config.

use crate::DarknetError;

/// Version information stored at the start of a weights file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightsHeader {
    pub major: i32,
    pub minor: i32,
    pub revision: i32,
    /// Number of training images seen
    pub seen: u64,
}

impl WeightsHeader {
    /// Files from version 0.2 on store `seen` as a 64-bit value
    fn has_wide_seen(major: i32, minor: i32) -> bool {
        major.saturating_mul(10).saturating_add(minor) >= 2 && major < 1000 && minor < 1000
    }

    /// Whether connected layer weights are stored as `inputs x outputs`
    pub fn transposed(&self) -> bool {
        self.major > 1000 || self.minor > 1000
    }

    /// Size of the encoded header in bytes
    pub fn encoded_len(&self) -> usize {
        if Self::has_wide_seen(self.major, self.minor) { 20 } else { 16 }
    }
}

/// Sequential reader over the parameters of a weights file
#[derive(Debug)]
pub struct WeightsReader<'a> {
    header: WeightsHeader,
    data: &'a [u8],
    position: usize,
}

impl<'a> WeightsReader<'a> {
    /// Parses the header and positions the reader at the first parameter
    pub fn new(data: &'a [u8]) -> Result<Self, DarknetError> {
        let mut reader = Self {
            header: WeightsHeader {
                major: 0,
                minor: 0,
                revision: 0,
                seen: 0,
            },
            data,
            position: 0,
        };

        let major = reader.read_i32("header")?;
        let minor = reader.read_i32("header")?;
        let revision = reader.read_i32("header")?;
        let seen = if WeightsHeader::has_wide_seen(major, minor) {
            let bytes = reader.take(8, "header")?;
            u64::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]])
        } else {
            reader.read_i32("header")? as u32 as u64
        };

        reader.header = WeightsHeader { major, minor, revision, seen };
        tracing::debug!(major, minor, revision, seen, "read darknet weights header");
        Ok(reader)
    }

    pub fn header(&self) -> &WeightsHeader {
        &self.header
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Reads the next `count` parameters
    ///
    /// `what` names the parameters in the error raised when the file is too
    /// short or holds a NaN or infinite value.
    pub fn read_floats(&mut self, count: usize, what: &str) -> Result<Vec<f32>, DarknetError> {
        let available = self.remaining() / 4;
        if count > available {
            return Err(DarknetError::WeightsTruncated {
                what: what.to_string(),
                expected: count,
                available,
            });
        }
        let bytes = self.take(count * 4, what)?;
        let floats: Vec<f32> = bytes.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])).collect();
        if let Some(index) = floats.iter().position(|value| !value.is_finite()) {
            return Err(DarknetError::NonFiniteWeight {
                what: what.to_string(),
                index,
            });
        }
        Ok(floats)
    }

    fn read_i32(&mut self, what: &str) -> Result<i32, DarknetError> {
        let bytes = self.take(4, what)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], DarknetError> {
        if len > self.remaining() {
            return Err(DarknetError::WeightsTruncated {
                what: what.to_string(),
                expected: len,
                available: self.remaining(),
            });
        }
        let data: &'a [u8] = self.data;
        let bytes = &data[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }
}
