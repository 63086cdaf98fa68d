//! Implementation of the Attribute Protocol (ATT).
//!
//! ATT always runs over L2CAP channel `0x0004`, which is connected by default as soon as the
//! Link-Layer connection is established.
//!
//! ATT is used by GATT, the *Generic Attribute Profile*, which introduces the concept of *Services*
//! and *Characteristics* which can all be accessed and discovered over the Attribute Protocol.
//!
//! # Attributes
//!
//! The ATT server hosts a list of *Attributes*, which consist of the following:
//!
//! * A 16-bit *Attribute Handle* ([`AttHandle`]) uniquely identifying the attribute.
//! * A 16- or 128-bit UUID identifying the attribute type. This provides information about how to
//!   interpret the attribute's value (eg. as a little-endian 32-bit integer).
//! * The attribute's *value*, read and written through an *access function* ([`access::AccessFn`])
//!   rather than stored inline: the attribute record itself is just a UUID and a function pointer,
//!   with all mutable state living in the handler the function is called with.
//!
//! ## Attribute Grouping
//!
//! *Primary Service* and *Secondary Service* declarations act as group starts; every attribute up
//! to (but not including) the next group-start attribute belongs to that group. `Read By Group
//! Type` relies on [`AttributeProvider::group_end`] to find the last handle in a group.
//!
//! [`AttHandle`]: struct.AttHandle.html

pub mod access;
pub mod cccd;
mod handle;
pub mod notify_queue;
mod pdus;
mod server;
mod uuid;
pub mod write_queue;

use {
    self::{access::*, handle::*, pdus::*},
    crate::{bytes::*, security::SecurityAttrs, utils::HexSlice, Error},
};

pub use self::handle::{AttHandle, HandleRange, RawHandleRange};
pub use self::pdus::ErrorCode;
pub use self::server::{AttributeServer, AttributeServerTx};
pub use self::uuid::AttUuid;

/// Maximum size, in bytes, of an attribute value produced by a single access call.
///
/// Attribute values larger than this must be read in pieces via *Read Blob Request* (the access
/// function is simply called again with a non-zero `offset`).
pub const MAX_ATTR_LEN: usize = 128;

/// An attribute as seen by the ATT server: a handle, a type, and its current value.
///
/// This is a *view*, produced on demand by calling an attribute's access function with
/// [`AccessType::Read`] into scratch storage owned by the [`AttributeProvider`] — it is not how
/// attributes are stored (see [`Attribute`](struct@self::Attribute) vs. the table's
/// `StaticAttribute` records for that distinction).
pub struct Attribute<'a> {
    /// The type of the attribute, eg. "Primary Service" or "Battery Level".
    pub att_type: AttUuid,
    /// Unique server-side identifier for the attribute.
    pub handle: AttHandle,
    /// The attribute's current value, truncated to whatever fit in the scratch buffer.
    pub value: HexSlice<&'a [u8]>,
}

/// Trait for attribute sets that can be hosted by an `AttributeServer`.
///
/// Implementors own the actual attribute storage (a static table plus whatever handler state the
/// access functions mutate) and are responsible for turning access-function calls into the
/// `Attribute` view the ATT engine works with.
pub trait AttributeProvider {
    /// Calls `f(self, attr)` for every attribute whose handle lies in `range`, in ascending handle
    /// order.
    ///
    /// If `f` returns an error, iteration stops and the error is propagated.
    fn for_attrs_in_range(
        &mut self,
        range: HandleRange,
        f: impl FnMut(&mut Self, &Attribute<'_>) -> Result<(), Error>,
    ) -> Result<(), Error>
    where
        Self: Sized;

    /// Returns whether `filter` matches any attribute in `self`.
    fn any(&mut self, range: HandleRange, mut filter: impl FnMut(&Attribute<'_>) -> bool) -> bool
    where
        Self: Sized,
    {
        match self.for_attrs_in_range(range, |_provider, att| {
            if filter(att) {
                Err(Error::Eof)
            } else {
                Ok(())
            }
        }) {
            Err(Error::Eof) => true,
            _ => false,
        }
    }

    /// Returns whether `uuid` is a valid grouping attribute that can be used in *Read By Group
    /// Type* requests.
    fn is_grouping_attr(&self, uuid: AttUuid) -> bool;

    /// Queries the handle of the last attribute that is part of the attribute group started by the
    /// grouping attribute at `handle`.
    ///
    /// If `handle` does not refer to a grouping attribute, returns `None`.
    fn group_end(&self, handle: AttHandle) -> Option<AttHandle>;

    /// Calls the access function of the attribute identified by `handle` directly, with an
    /// arbitrary `offset` and `input`, writing any produced value to `output`.
    ///
    /// This is the single entry point used for *Read*, *Read Blob*, *Write*, *Prepare Write* and
    /// *Find By Type Value*'s value comparison: unlike [`for_attrs_in_range`](Self::for_attrs_in_range),
    /// which always reads at offset 0 into bounded scratch space, this forwards the caller's
    /// `offset`/`input` straight to the attribute.
    ///
    /// Returns `AccessResult::InvalidHandle`-equivalent behaviour by way of `RequestNotSupported`
    /// when `handle` does not name an attribute (callers are expected to check for the
    /// `ErrorCode::InvalidHandle` case themselves beforehand when required by the spec).
    fn access(
        &mut self,
        ty: AccessType,
        handle: AttHandle,
        offset: u16,
        input: &[u8],
        security: SecurityAttrs,
        output: &mut ByteWriter<'_>,
    ) -> AccessResult;

    /// Returns whether `handle` names an attribute in this provider.
    fn contains_handle(&self, handle: AttHandle) -> bool;
}

/// An empty attribute set, hosting no attributes at all.
pub struct NoAttributes;

impl AttributeProvider for NoAttributes {
    fn for_attrs_in_range(
        &mut self,
        _range: HandleRange,
        _f: impl FnMut(&mut Self, &Attribute<'_>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn is_grouping_attr(&self, _uuid: AttUuid) -> bool {
        false
    }

    fn group_end(&self, _handle: AttHandle) -> Option<AttHandle> {
        None
    }

    fn access(
        &mut self,
        _ty: AccessType,
        _handle: AttHandle,
        _offset: u16,
        _input: &[u8],
        _security: SecurityAttrs,
        _output: &mut ByteWriter<'_>,
    ) -> AccessResult {
        AccessResult::RequestNotSupported
    }

    fn contains_handle(&self, _handle: AttHandle) -> bool {
        false
    }
}

/// A single statically-declared attribute: a UUID, a handle, and an access function.
///
/// This is the POD record the table actually stores — one UUID, one handle, one code pointer, no
/// heap state. `H` is the handler type owning whatever value/CCCD/notification-queue storage the
/// access function reads and writes; it is fixed for an entire table (see [`AttributeTable`]).
#[derive(Clone, Copy)]
pub struct StaticAttribute<H> {
    pub att_type: AttUuid,
    pub handle: AttHandle,
    pub access: fn(&mut H, &mut AccessArgs<'_, '_>) -> AccessResult,
}

/// A compile-time-composed, position-indexed table of [`StaticAttribute`]s.
///
/// `attrs` is expected to be `'static` in practice (built by a `const fn`/macro at the call site),
/// but the table borrows it for a lifetime so it can also be used in tests with a local array.
pub struct AttributeTable<'t, H> {
    attrs: &'t [StaticAttribute<H>],
    handler: H,
}

impl<'t, H> AttributeTable<'t, H> {
    /// Wraps a statically-declared attribute list and the handler state its access functions use.
    pub fn new(attrs: &'t [StaticAttribute<H>], handler: H) -> Self {
        Self { attrs, handler }
    }

    /// Provides access to the handler, eg. so application code can call `notify()`.
    pub fn handler(&mut self) -> &mut H {
        &mut self.handler
    }

    fn read_into<'b>(
        &mut self,
        attr: &StaticAttribute<H>,
        offset: u16,
        buf: &'b mut [u8],
    ) -> Result<&'b [u8], AccessResult> {
        let mut args = AccessArgs {
            ty: AccessType::Read,
            handle: attr.handle,
            input: &[],
            offset,
            output: ByteWriter::new(buf),
            security: SecurityAttrs::none(),
        };
        let space = args.output.space_left();
        match (attr.access)(&mut self.handler, &mut args) {
            AccessResult::Success => {
                let written = space - args.output.space_left();
                Ok(&buf[..written])
            }
            other => Err(other),
        }
    }
}

impl<'t, H> AttributeProvider for AttributeTable<'t, H> {
    fn for_attrs_in_range(
        &mut self,
        range: HandleRange,
        mut f: impl FnMut(&mut Self, &Attribute<'_>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut scratch = [0u8; MAX_ATTR_LEN];
        // `attrs` is borrowed for `'t`, independent of `self`'s lifetime, so indexing by position
        // rather than iterating `self.attrs` directly sidesteps the borrow conflict with
        // `self.read_into(..)` below (which needs `&mut self`).
        for i in 0..self.attrs.len() {
            let attr = self.attrs[i];
            if !range.contains(attr.handle) {
                continue;
            }
            let value = match self.read_into(&attr, 0, &mut scratch) {
                Ok(v) => v,
                Err(_) => continue, // unreadable attributes are simply skipped during range scans
            };
            let view = Attribute {
                att_type: attr.att_type,
                handle: attr.handle,
                value: HexSlice(value),
            };
            f(self, &view)?;
        }
        Ok(())
    }

    fn is_grouping_attr(&self, uuid: AttUuid) -> bool {
        uuid == crate::uuid::Uuid16(0x2800) || uuid == crate::uuid::Uuid16(0x2801)
    }

    fn group_end(&self, handle: AttHandle) -> Option<AttHandle> {
        let start = self.attrs.iter().position(|a| a.handle == handle)?;
        if !self.is_grouping_attr(self.attrs[start].att_type) {
            return None;
        }
        let mut end = self.attrs[start].handle;
        for attr in &self.attrs[start + 1..] {
            if self.is_grouping_attr(attr.att_type) {
                break;
            }
            end = attr.handle;
        }
        Some(end)
    }

    fn access(
        &mut self,
        ty: AccessType,
        handle: AttHandle,
        offset: u16,
        input: &[u8],
        security: SecurityAttrs,
        output: &mut ByteWriter<'_>,
    ) -> AccessResult {
        let attr = match self.attrs.iter().find(|a| a.handle == handle) {
            Some(attr) => *attr,
            None => return AccessResult::RequestNotSupported,
        };
        // Temporarily take `output` out so it can be moved into `AccessArgs` by value, then put
        // the (possibly advanced) writer back. `&mut []` is promoted to `'static`, same trick
        // `ByteWriter::skip` uses internally.
        let taken = core::mem::replace(output, ByteWriter::new(&mut []));
        let mut args = AccessArgs {
            ty,
            handle,
            input,
            offset,
            output: taken,
            security,
        };
        let result = (attr.access)(&mut self.handler, &mut args);
        *output = args.output;
        result
    }

    fn contains_handle(&self, handle: AttHandle) -> bool {
        self.attrs.iter().any(|a| a.handle == handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uuid::Uuid16;

    struct Counter {
        value: u8,
    }

    fn counter_access(h: &mut Counter, args: &mut AccessArgs<'_, '_>) -> AccessResult {
        match args.ty {
            AccessType::Read => read_value(&[h.value], args.offset, &mut args.output),
            AccessType::Write | AccessType::PrepareWrite => {
                if args.input.len() != 1 {
                    return AccessResult::InvalidAttributeValueLength;
                }
                if args.ty == AccessType::Write {
                    h.value = args.input[0];
                }
                AccessResult::Success
            }
            AccessType::CompareValue => {
                if args.input == [h.value] {
                    AccessResult::ValueEqual
                } else {
                    AccessResult::ValueNotEqual
                }
            }
        }
    }

    const ATTRS: &[StaticAttribute<Counter>] = &[
        StaticAttribute {
            att_type: AttUuid::Uuid16(Uuid16(0x2800)),
            handle: AttHandle::from_raw(1),
            access: counter_access,
        },
        StaticAttribute {
            att_type: AttUuid::Uuid16(Uuid16(0x1234)),
            handle: AttHandle::from_raw(2),
            access: counter_access,
        },
    ];

    #[test]
    fn reads_current_value_through_access_fn() {
        let mut table = AttributeTable::new(ATTRS, Counter { value: 42 });
        let mut seen = 0u8;
        table
            .for_attrs_in_range(HandleRange::new(AttHandle::from_raw(2), AttHandle::from_raw(2)), |_, attr| {
                seen = attr.value.as_ref()[0];
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, 42);
    }

    #[test]
    fn write_attr_round_trips() {
        let mut table = AttributeTable::new(ATTRS, Counter { value: 0 });
        let mut sink = [0u8; 0];
        let mut out = ByteWriter::new(&mut sink);
        assert_eq!(
            table.access(
                AccessType::Write,
                AttHandle::from_raw(2),
                0,
                &[7],
                SecurityAttrs::none(),
                &mut out
            ),
            AccessResult::Success
        );
        assert_eq!(table.handler().value, 7);
    }

    #[test]
    fn validate_only_does_not_mutate() {
        let mut table = AttributeTable::new(ATTRS, Counter { value: 5 });
        let mut sink = [0u8; 0];
        let mut out = ByteWriter::new(&mut sink);
        assert_eq!(
            table.access(
                AccessType::PrepareWrite,
                AttHandle::from_raw(2),
                0,
                &[9],
                SecurityAttrs::none(),
                &mut out
            ),
            AccessResult::Success
        );
        assert_eq!(table.handler().value, 5);
    }

    #[test]
    fn group_end_stops_at_next_group() {
        let mut table = AttributeTable::new(ATTRS, Counter { value: 0 });
        assert_eq!(
            table.group_end(AttHandle::from_raw(1)),
            Some(AttHandle::from_raw(2))
        );
    }
}
