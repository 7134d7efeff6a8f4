use crate::append_only::AppendOnlyBuffer;
use crate::error::{BufferError, Result};
use crate::segment::max_slots;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Construction parameters for an [`AppendOnlyBuffer`].
///
/// Relays typically embed this in their own configuration and build one
/// buffer per recording surface (and a fresh one on reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Values per segment. Zero is accepted but links a segment per append.
    pub segment_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            segment_capacity: Self::DEFAULT_SEGMENT_CAPACITY,
        }
    }
}

impl BufferConfig {
    pub const DEFAULT_SEGMENT_CAPACITY: usize = 16;

    pub fn with_segment_capacity(mut self, segment_capacity: usize) -> Self {
        self.segment_capacity = segment_capacity;
        self
    }

    /// Checks that a segment of `segment_capacity` values of `T` can be
    /// allocated.
    pub fn validate<T>(&self) -> Result<()> {
        let max = max_slots::<T>();
        if self.segment_capacity > max {
            return Err(BufferError::CapacityOverflow {
                capacity: self.segment_capacity,
                max,
            });
        }
        Ok(())
    }

    pub fn build<T>(&self) -> Result<AppendOnlyBuffer<T>> {
        self.validate::<T>()?;
        debug!(
            segment_capacity = self.segment_capacity,
            element = std::any::type_name::<T>(),
            "building append-only buffer"
        );
        AppendOnlyBuffer::try_new(self.segment_capacity)
    }
}
