use thiserror::Error;

/// Errors raised while constructing an append-only buffer.
///
/// Appending and traversing never fail; the only fallible step is sizing the
/// segment allocation up front.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// A single segment of the requested capacity cannot be allocated.
    #[error("segment capacity {capacity} exceeds the maximum of {max} slots for this element type")]
    CapacityOverflow { capacity: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, BufferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_overflow_message_names_both_bounds() {
        let err = BufferError::CapacityOverflow {
            capacity: 10,
            max: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("10"), "message should name the capacity: {msg}");
        assert!(msg.contains('4'), "message should name the maximum: {msg}");
    }
}
