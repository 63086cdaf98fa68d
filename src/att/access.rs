//! Access-function dispatch for reading and writing attribute values.
//!
//! Every attribute in a [`super::AttributeTable`] is a `(AttUuid, fn_ptr)` pair. The function
//! pointer is monomorphized once per attribute (usually via a `const` generic index into the
//! owning handler's value storage), so dispatch never goes through a vtable: the table is just
//! data, and `access` is an ordinary indirect call.

use crate::att::AttHandle;
use crate::bytes::ByteWriter;
use crate::security::SecurityAttrs;

/// Discriminates the operation an access function is asked to perform.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessType {
    /// Read the attribute's value (honouring `offset`, eg. for *Read Blob*).
    Read,
    /// Overwrite the attribute's value.
    Write,
    /// Validate (but do not apply) a write that has been queued via *Prepare Write*.
    PrepareWrite,
    /// Compare the attribute's value against `input` (used by *Find By Type Value*).
    CompareValue,
}

/// Arguments passed to an attribute's access function.
///
/// `output` has `ByteWriter::space_left()` bytes of room; a `Read` access should write as much of
/// the value as fits starting at `offset` and leave the rest for a subsequent *Read Blob*.
pub struct AccessArgs<'a, 'b> {
    pub ty: AccessType,
    pub handle: AttHandle,
    pub input: &'a [u8],
    pub offset: u16,
    pub output: ByteWriter<'b>,
    pub security: SecurityAttrs,
}

/// Outcome of an attribute access, one-to-one with the ATT error codes it maps to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessResult {
    Success,
    InvalidOffset,
    WriteNotPermitted,
    ReadNotPermitted,
    InvalidAttributeValueLength,
    AttributeNotLong,
    RequestNotSupported,
    InsufficientEncryption,
    InsufficientAuthentication,
    /// Used only with [`AccessType::CompareValue`]: the attribute's value equals `input`.
    ValueEqual,
    /// Used only with [`AccessType::CompareValue`]: the attribute's value differs from `input`.
    ValueNotEqual,
}

impl AccessResult {
    /// Maps a non-`Success`/non-comparison result to the ATT error code it stands for.
    ///
    /// Returns `None` for `Success`, `ValueEqual` and `ValueNotEqual`, which are not error
    /// conditions.
    pub fn error_code(&self) -> Option<super::ErrorCode> {
        use super::ErrorCode;
        Some(match self {
            AccessResult::Success | AccessResult::ValueEqual | AccessResult::ValueNotEqual => {
                return None
            }
            AccessResult::InvalidOffset => ErrorCode::InvalidOffset,
            AccessResult::WriteNotPermitted => ErrorCode::WriteNotPermitted,
            AccessResult::ReadNotPermitted => ErrorCode::ReadNotPermitted,
            AccessResult::InvalidAttributeValueLength => ErrorCode::InvalidAttributeValueLength,
            AccessResult::AttributeNotLong => ErrorCode::AttributeNotLong,
            AccessResult::RequestNotSupported => ErrorCode::RequestNotSupported,
            AccessResult::InsufficientEncryption => ErrorCode::InsufficientEncryption,
            AccessResult::InsufficientAuthentication => ErrorCode::InsufficientAuthentication,
        })
    }
}

/// Helper used by access functions backing a plain read/write byte buffer.
///
/// Honours `offset` the way `4.1` requires: `offset > value.len()` is an error, otherwise the
/// value is copied (truncated to whatever room `output` has) starting at `offset`.
pub fn read_value(value: &[u8], offset: u16, output: &mut ByteWriter<'_>) -> AccessResult {
    let offset = usize::from(offset);
    if offset > value.len() {
        return AccessResult::InvalidOffset;
    }
    output.write_slice_truncate(&value[offset..]);
    AccessResult::Success
}

/// Helper used by access functions backing a fixed-capacity read/write byte buffer.
///
/// `storage` is the backing array; `len` is updated to the new value length. Writes starting at a
/// non-zero offset (as queued by *Prepare Write*) extend the existing contents in place.
pub fn write_value(storage: &mut [u8], len: &mut usize, offset: u16, input: &[u8]) -> AccessResult {
    let offset = usize::from(offset);
    if offset > *len {
        return AccessResult::InvalidOffset;
    }
    let end = offset + input.len();
    if end > storage.len() {
        return AccessResult::InvalidAttributeValueLength;
    }
    storage[offset..end].copy_from_slice(input);
    *len = end;
    AccessResult::Success
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_honours_offset() {
        let mut buf = [0u8; 8];
        let mut w = ByteWriter::new(&mut buf);
        assert_eq!(read_value(b"hello", 2, &mut w), AccessResult::Success);
        assert_eq!(w.into_rest().as_ptr() as usize, buf.as_ptr() as usize + 3);
    }

    #[test]
    fn read_rejects_offset_past_end() {
        let mut buf = [0u8; 8];
        let mut w = ByteWriter::new(&mut buf);
        assert_eq!(
            read_value(b"hi", 10, &mut w),
            AccessResult::InvalidOffset
        );
    }

    #[test]
    fn write_extends_value_at_offset() {
        let mut storage = [0u8; 8];
        let mut len = 0;
        assert_eq!(
            write_value(&mut storage, &mut len, 0, b"abcd"),
            AccessResult::Success
        );
        assert_eq!(len, 4);
        assert_eq!(
            write_value(&mut storage, &mut len, 4, b"ef"),
            AccessResult::Success
        );
        assert_eq!(&storage[..6], b"abcdef");
    }

    #[test]
    fn write_rejects_overflow() {
        let mut storage = [0u8; 4];
        let mut len = 0;
        assert_eq!(
            write_value(&mut storage, &mut len, 0, b"toolong!"),
            AccessResult::InvalidAttributeValueLength
        );
    }
}
