//! Snapshot hooks.
//!
//! The address spaces do not define a file format. They emit an ordered
//! stream of scalars and block objects to a [`SnapshotWriter`] and consume the
//! same stream, in the same order, from a [`SnapshotReader`]. The collaborator
//! is responsible for block identity: a block written twice must read back as
//! the same [`BlockRef`].
//!
//! Sparse tables go through [`write_guarded`] / [`read_guarded`]:
//!
//! ```text
//! u32 length | u32 × ⌈length / 32⌉ presence bitmap | present entries, in order
//! ```

use crate::block::BlockRef;

/// Failure while saving or restoring state.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot stream ended early")]
    Truncated,
    #[error("snapshot {what} mismatch: expected {expected}, found {found}")]
    Mismatch {
        what: &'static str,
        expected: u64,
        found: u64,
    },
    #[error("corrupt snapshot: {0}")]
    Corrupt(&'static str),
    /// Reported by the writer or reader implementation itself.
    #[error("snapshot backend failed: {0}")]
    Backend(String),
}

/// Ordered sink for saved state.
pub trait SnapshotWriter {
    /// # Errors
    /// Backend failure.
    fn write_bool(&mut self, value: bool) -> Result<(), SnapshotError>;

    /// # Errors
    /// Backend failure.
    fn write_u32(&mut self, value: u32) -> Result<(), SnapshotError>;

    /// Serialise a block object.
    ///
    /// # Errors
    /// Backend failure, or a block type the backend cannot persist.
    fn write_block(&mut self, block: &BlockRef) -> Result<(), SnapshotError>;
}

/// Ordered source of saved state; mirrors [`SnapshotWriter`].
pub trait SnapshotReader {
    /// # Errors
    /// [`SnapshotError::Truncated`] at the end of the stream.
    fn read_bool(&mut self) -> Result<bool, SnapshotError>;

    /// # Errors
    /// [`SnapshotError::Truncated`] at the end of the stream.
    fn read_u32(&mut self) -> Result<u32, SnapshotError>;

    /// # Errors
    /// [`SnapshotError::Truncated`] at the end of the stream.
    fn read_block(&mut self) -> Result<BlockRef, SnapshotError>;
}

/// Write a length.
///
/// # Errors
/// Backend failure, or a length beyond `u32`.
pub fn write_len(out: &mut dyn SnapshotWriter, len: usize) -> Result<(), SnapshotError> {
    let len = u32::try_from(len).map_err(|_| SnapshotError::Corrupt("length exceeds 32 bits"))?;
    out.write_u32(len)
}

/// Read a length and check it against `expected`.
///
/// # Errors
/// [`SnapshotError::Mismatch`] if the stored length differs.
pub fn read_len(input: &mut dyn SnapshotReader, what: &'static str, expected: usize) -> Result<(), SnapshotError> {
    let found = input.read_u32()?;
    if found as usize == expected {
        Ok(())
    } else {
        Err(SnapshotError::Mismatch {
            what,
            expected: expected as u64,
            found: u64::from(found),
        })
    }
}

/// Write a presence-guarded array: length, presence bitmap, then each
/// present entry through `write`.
///
/// # Errors
/// Whatever `write` or the backend reports.
pub fn write_guarded<T, I, F>(out: &mut dyn SnapshotWriter, slots: I, mut write: F) -> Result<(), SnapshotError>
where
    I: ExactSizeIterator<Item = Option<T>> + Clone,
    F: FnMut(&mut dyn SnapshotWriter, T) -> Result<(), SnapshotError>,
{
    write_len(out, slots.len())?;

    let mut word = 0u32;
    for (i, slot) in slots.clone().enumerate() {
        if slot.is_some() {
            word |= 1 << (i % 32);
        }
        if i % 32 == 31 {
            out.write_u32(word)?;
            word = 0;
        }
    }
    if slots.len() % 32 != 0 {
        out.write_u32(word)?;
    }

    for value in slots.flatten() {
        write(out, value)?;
    }
    Ok(())
}

/// Read an array written by [`write_guarded`] whose length must be `expected`.
///
/// # Errors
/// Length mismatch, truncation, or whatever `read` reports.
pub fn read_guarded<T, F>(
    input: &mut dyn SnapshotReader,
    what: &'static str,
    expected: usize,
    mut read: F,
) -> Result<Vec<Option<T>>, SnapshotError>
where
    F: FnMut(&mut dyn SnapshotReader) -> Result<T, SnapshotError>,
{
    read_len(input, what, expected)?;

    let mut bitmap = Vec::with_capacity(expected.div_ceil(32));
    for _ in 0..expected.div_ceil(32) {
        bitmap.push(input.read_u32()?);
    }
    if expected % 32 != 0 {
        let tail = bitmap.last().copied().unwrap_or_default();
        if tail >> (expected % 32) != 0 {
            return Err(SnapshotError::Corrupt("presence bits set past the array end"));
        }
    }

    let mut slots = Vec::with_capacity(expected);
    for i in 0..expected {
        if bitmap[i / 32] & (1 << (i % 32)) == 0 {
            slots.push(None);
        } else {
            slots.push(Some(read(input)?));
        }
    }
    Ok(slots)
}
