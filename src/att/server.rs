//! ATT server implementation.

use super::{
    access::{AccessResult, AccessType},
    pdus::{AttPdu, ByGroupAttData, ByTypeAttData, ErrorCode, Opcode},
    write_queue::WriteQueue,
    AttError, AttHandle, AttUuid, AttributeProvider, HandleRange,
};
use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};
use crate::l2cap::{Protocol, ProtocolObj, Sender};
use crate::security::SecurityAttrs;
use crate::{utils::HexSlice, Error};

/// Total number of bytes the *Prepare Write* arena can hold across all queued chunks.
const PREPARE_QUEUE_BYTES: usize = 256;
/// Maximum number of distinct *Prepare Write* chunks queued at once.
const PREPARE_QUEUE_RECORDS: usize = 8;

fn access_result_to_att_error(result: AccessResult, handle: AttHandle) -> AttError {
    let code = result.error_code().unwrap_or(ErrorCode::UnlikelyError);
    AttError::new(code, handle)
}

/// The default (and minimum) `ATT_MTU`, used before any `ExchangeMtuReq` is processed.
const ATT_DEFAULT_MTU: u16 = 23;

/// An Attribute Protocol server providing read and write access to stored attributes.
pub struct AttributeServer<A: AttributeProvider> {
    attrs: A,
    security: SecurityAttrs,
    prepared: WriteQueue<(), PREPARE_QUEUE_BYTES, PREPARE_QUEUE_RECORDS>,
    /// `ATT_MTU` this server advertises to the peer in `ExchangeMtuRsp`.
    server_mtu: u16,
    /// Negotiated `ATT_MTU`, `min(server_mtu, client_rx_mtu)`, never below the default.
    mtu: u16,
    /// Set when a `HandleValueConfirmation` arrives, cleared by `take_confirmed_indication`.
    pending_confirmation: bool,
}

impl<A: AttributeProvider> AttributeServer<A> {
    /// Creates an `AttributeServer` hosting attributes from an `AttributeProvider`, advertising the
    /// default `ATT_MTU` of 23 during MTU exchange.
    pub fn new(attrs: A) -> Self {
        Self::with_server_mtu(attrs, ATT_DEFAULT_MTU)
    }

    /// Creates an `AttributeServer` that advertises `server_mtu` as its own `ATT_MTU` during MTU
    /// exchange, instead of the default of 23.
    ///
    /// `server_mtu` is raised to [`ATT_DEFAULT_MTU`] if a smaller value is passed; the Attribute
    /// Protocol never negotiates below it.
    ///
    /// Note that PDUs this implementation actually sends are still truncated to `RSP_PDU_SIZE`
    /// bytes (see [`Protocol::RSP_PDU_SIZE`]), since outgoing L2CAP fragmentation isn't implemented.
    /// A larger `server_mtu` only changes what's advertised to the peer and what `ReadBlobReq` may
    /// be used to fetch in chunks; it doesn't by itself allow larger single PDUs to be sent.
    pub fn with_server_mtu(attrs: A, server_mtu: u16) -> Self {
        Self {
            attrs,
            security: SecurityAttrs::none(),
            prepared: WriteQueue::new(),
            server_mtu: server_mtu.max(ATT_DEFAULT_MTU),
            mtu: ATT_DEFAULT_MTU,
            pending_confirmation: false,
        }
    }

    /// Prepares for performing a server-initiated action (eg. sending a notification/indication).
    ///
    /// The caller must ensure that `sender` has at least `RSP_PDU_SIZE` bytes of free space
    /// available.
    ///
    /// It is usually not necessary to use this function. Instead, call `L2CAPStateTx::att`.
    pub fn with_sender<'a>(&'a mut self, sender: Sender<'a>) -> AttributeServerTx<'a, A> {
        AttributeServerTx {
            server: self,
            sender,
        }
    }

    /// Provides mutable access to the underlying `AttributeProvider`.
    pub fn provider(&mut self) -> &mut A {
        &mut self.attrs
    }

    /// Returns whether the peer has confirmed the in-flight indication since the last call, and
    /// clears the flag.
    ///
    /// An indication occupies the single in-flight slot `NotificationQueue` reserves for it until
    /// the peer's `HandleValueConfirmation` arrives; callers should forward a `true` result to
    /// `NotificationQueue::confirm_indication` (eg. via `GattHandler::confirm_indication`) so the
    /// next queued indication, if any, becomes eligible to send.
    pub fn take_confirmed_indication(&mut self) -> bool {
        core::mem::take(&mut self.pending_confirmation)
    }

    /// Updates the security properties that attribute access functions will see for subsequent
    /// requests.
    ///
    /// The link layer (or whatever drives pairing) calls this whenever the connection's
    /// encryption/authentication state changes.
    pub fn set_security(&mut self, security: SecurityAttrs) {
        self.security = security;
    }

    /// Returns the `ATT_MTU` value, the maximum size of an ATT PDU that can be processed and sent
    /// out by the server.
    ///
    /// This is the value negotiated via `ExchangeMtuReq`/`ExchangeMtuRsp`, clamped to what this
    /// implementation can actually transmit in a single LL Data PDU (`RSP_PDU_SIZE`). Larger
    /// values would need outgoing L2CAP fragmentation, which isn't implemented.
    fn att_mtu(&self) -> u8 {
        self.mtu.min(u16::from(Self::RSP_PDU_SIZE)) as u8
    }

    /// Returns the negotiated `ATT_MTU`, `min(server_mtu, client_mtu)`.
    ///
    /// Before a client sends `ExchangeMtuReq`, this is [`ATT_DEFAULT_MTU`] (23).
    pub fn negotiated_mtu(&self) -> u16 {
        self.mtu
    }

    /// Process an incoming request (or command) PDU and return a response.
    ///
    /// This may return an `AttError`, which the caller will then send as a response. In the success
    /// case, this method will send the response (if any).
    fn process_request(
        &mut self,
        msg: &AttPdu<'_>,
        responder: &mut Sender<'_>,
    ) -> Result<(), AttError> {
        /// Error returned when an ATT error should be sent back.
        ///
        /// Returning this from inside `responder.send_with` will not send the response and
        /// instead bail out of the closure.
        struct RspError(AttError);

        impl From<Error> for RspError {
            fn from(e: Error) -> Self {
                panic!("unexpected error: {}", e);
            }
        }

        impl From<AttError> for RspError {
            fn from(att: AttError) -> Self {
                RspError(att)
            }
        }

        match msg {
            AttPdu::ExchangeMtuReq { mtu: client_mtu } => {
                self.mtu = (*client_mtu).clamp(ATT_DEFAULT_MTU, self.server_mtu);
                responder
                    .send(AttPdu::ExchangeMtuRsp {
                        mtu: self.server_mtu,
                    })
                    .unwrap();
                Ok(())
            }

            AttPdu::FindInformationReq { handle_range } => {
                let range = handle_range.check()?;

                let result = responder.send_with(|writer| {
                    writer.write_u8(Opcode::FindInformationRsp.into())?;
                    let format = writer.split_next_mut().ok_or(Error::Eof)?;

                    let mut chose_128 = None;
                    let mut found = false;
                    self.attrs
                        .for_attrs_in_range(range, |_provider, attr| {
                            let is_128 = matches!(attr.att_type, AttUuid::Uuid128(_));
                            if let Some(prev) = chose_128 {
                                if prev != is_128 {
                                    // format would change; stop the list here
                                    return Err(Error::Eof);
                                }
                            } else {
                                chose_128 = Some(is_128);
                            }

                            let before = writer.space_left();
                            writer.write_u16_le(attr.handle.as_u16())?;
                            attr.att_type.to_bytes(writer)?;
                            if writer.space_left() == before {
                                // nothing fit at all; unreachable in practice
                            }
                            found = true;
                            Ok(())
                        })
                        .ok();

                    if found {
                        *format = if chose_128 == Some(true) { 0x02 } else { 0x01 };
                        Ok(())
                    } else {
                        Err(AttError::attribute_not_found().into())
                    }
                });

                match result {
                    Ok(()) => Ok(()),
                    Err(RspError(e)) => Err(e),
                }
            }

            AttPdu::FindByTypeValueReq {
                handle_range,
                attribute_type,
                attribute_value,
            } => {
                let range = handle_range.check()?;
                let target_type = AttUuid::Uuid16(crate::uuid::Uuid16(*attribute_type));

                let result = responder.send_with(|writer| {
                    writer.write_u8(Opcode::FindByTypeValueRsp.into())?;

                    let mut found = false;
                    let security = self.security;
                    let value = attribute_value.as_ref();
                    self.attrs
                        .for_attrs_in_range(range, |provider, attr| {
                            if attr.att_type != target_type {
                                return Ok(());
                            }

                            let mut scratch = [0u8; 0];
                            let mut cmp = ByteWriter::new(&mut scratch);
                            let result = provider.access(
                                AccessType::CompareValue,
                                attr.handle,
                                0,
                                value,
                                security,
                                &mut cmp,
                            );
                            if result != AccessResult::ValueEqual {
                                return Ok(());
                            }

                            let group_end = provider.group_end(attr.handle).unwrap_or(attr.handle);
                            writer.write_u16_le(attr.handle.as_u16())?;
                            writer.write_u16_le(group_end.as_u16())?;
                            found = true;
                            Ok(())
                        })
                        .ok();

                    if found {
                        Ok(())
                    } else {
                        Err(AttError::attribute_not_found().into())
                    }
                });

                match result {
                    Ok(()) => Ok(()),
                    Err(RspError(e)) => Err(e),
                }
            }

            AttPdu::ReadByTypeReq {
                handle_range,
                attribute_type,
            } => {
                let range = handle_range.check()?;

                let result = responder.send_with(|writer| {
                    // If no attributes match request, return `AttributeNotFound` error, else send
                    // `ReadByTypeResponse` with at least one entry

                    writer.write_u8(Opcode::ReadByTypeRsp.into())?;
                    let length = writer.split_next_mut().ok_or(Error::Eof)?;

                    let mut size = None;
                    let att_mtu = self.att_mtu();
                    self.attrs
                        .for_attrs_in_range(range, |_provider, attr| {
                            if attr.att_type == *attribute_type {
                                let data =
                                    ByTypeAttData::new(att_mtu, attr.handle, attr.value.as_slice());
                                if size == Some(data.encoded_size()) || size.is_none() {
                                    // Can try to encode `data`. If we run out of space, end the list.
                                    data.to_bytes(writer)?;
                                    size = Some(data.encoded_size());
                                }
                            }

                            Ok(())
                        })
                        .ok();

                    if let Some(size) = size {
                        // At least one attr
                        *length = size;
                        Ok(())
                    } else {
                        Err(AttError::attribute_not_found().into())
                    }
                });

                match result {
                    Ok(()) => Ok(()),
                    Err(RspError(e)) => Err(e),
                }
            }

            AttPdu::ReadByGroupReq {
                handle_range,
                group_type,
            } => {
                let range = handle_range.check()?;

                // Reject if `group_type` is not a grouping attribute
                if !self.attrs.is_grouping_attr(*group_type) {
                    return Err(AttError::new(
                        ErrorCode::UnsupportedGroupType,
                        range.start(),
                    ));
                }

                let result = responder.send_with(|writer| {
                    // If no attributes match request, return `AttributeNotFound` error, else send
                    // response with at least one entry.

                    writer.write_u8(Opcode::ReadByGroupRsp.into())?;
                    let length = writer.split_next_mut().ok_or(Error::Eof)?;

                    let mut size = None;
                    let att_mtu = self.att_mtu();
                    self.attrs
                        .for_attrs_in_range(range, |provider, attr| {
                            if attr.att_type == *group_type {
                                let group_end = provider.group_end(attr.handle).unwrap_or(attr.handle);
                                let data = ByGroupAttData::new(
                                    att_mtu,
                                    attr.handle,
                                    group_end,
                                    attr.value.as_slice(),
                                );
                                if size == Some(data.encoded_size()) || size.is_none() {
                                    // Can try to encode `data`. If we run out of space, end the list.
                                    data.to_bytes(writer)?;
                                    size = Some(data.encoded_size());
                                }
                            }

                            Ok(())
                        })
                        .ok();

                    if let Some(size) = size {
                        // At least one attr
                        *length = size;
                        debug!(
                            "ATT->ReadByGroupRsp (size={}, left={})",
                            size,
                            writer.space_left()
                        );
                        Ok(())
                    } else {
                        Err(AttError::attribute_not_found().into())
                    }
                });

                match result {
                    Ok(()) => Ok(()),
                    Err(RspError(e)) => Err(e),
                }
            }

            AttPdu::ReadReq { handle } => {
                if !self.attrs.contains_handle(*handle) {
                    return Err(AttError::new(ErrorCode::InvalidHandle, *handle));
                }

                let security = self.security;
                let mut access_result = AccessResult::Success;
                responder
                    .send_with(|writer| -> Result<(), Error> {
                        writer.write_u8(Opcode::ReadRsp.into())?;
                        access_result =
                            self.attrs
                                .access(AccessType::Read, *handle, 0, &[], security, writer);
                        Ok(())
                    })
                    .unwrap();

                if access_result == AccessResult::Success {
                    Ok(())
                } else {
                    Err(access_result_to_att_error(access_result, *handle))
                }
            }

            AttPdu::ReadBlobReq { handle, offset } => {
                if !self.attrs.contains_handle(*handle) {
                    return Err(AttError::new(ErrorCode::InvalidHandle, *handle));
                }

                let security = self.security;
                let mut access_result = AccessResult::Success;
                responder
                    .send_with(|writer| -> Result<(), Error> {
                        writer.write_u8(Opcode::ReadBlobRsp.into())?;
                        access_result = self.attrs.access(
                            AccessType::Read,
                            *handle,
                            *offset,
                            &[],
                            security,
                            writer,
                        );
                        Ok(())
                    })
                    .unwrap();

                if access_result == AccessResult::Success {
                    Ok(())
                } else {
                    Err(access_result_to_att_error(access_result, *handle))
                }
            }

            AttPdu::ReadMultipleReq { handles } => {
                let mut reader = ByteReader::new(handles.as_ref());
                let security = self.security;
                let mut error = None;

                responder
                    .send_with(|writer| -> Result<(), Error> {
                        writer.write_u8(Opcode::ReadMultipleRsp.into())?;

                        while !reader.is_empty() && error.is_none() {
                            let raw = reader.read_u16_le()?;
                            let handle = AttHandle::from_raw(raw);
                            if !self.attrs.contains_handle(handle) {
                                error = Some(AttError::new(ErrorCode::InvalidHandle, handle));
                                break;
                            }
                            let result = self.attrs.access(
                                AccessType::Read,
                                handle,
                                0,
                                &[],
                                security,
                                writer,
                            );
                            if result != AccessResult::Success {
                                error = Some(access_result_to_att_error(result, handle));
                                break;
                            }
                        }

                        Ok(())
                    })
                    .unwrap();

                match error {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }

            AttPdu::WriteReq { handle, value } => {
                if !self.attrs.contains_handle(*handle) {
                    return Err(AttError::new(ErrorCode::InvalidHandle, *handle));
                }

                let security = self.security;
                let mut sink = [0u8; 0];
                let mut out = ByteWriter::new(&mut sink);
                let result = self.attrs.access(
                    AccessType::Write,
                    *handle,
                    0,
                    value.as_ref(),
                    security,
                    &mut out,
                );

                if result != AccessResult::Success {
                    return Err(access_result_to_att_error(result, *handle));
                }

                responder
                    .send_with(|writer| -> Result<(), Error> {
                        writer.write_u8(Opcode::WriteRsp.into())?;
                        Ok(())
                    })
                    .unwrap();
                Ok(())
            }

            AttPdu::WriteCommand { handle, value } => {
                let security = self.security;
                let mut sink = [0u8; 0];
                let mut out = ByteWriter::new(&mut sink);
                // Commands are never acknowledged, successful or not.
                let _ =
                    self.attrs
                        .access(AccessType::Write, *handle, 0, value.as_ref(), security, &mut out);
                Ok(())
            }

            AttPdu::SignedWriteCommand { handle, value, .. } => {
                // Signature verification is not implemented; the write is applied unsigned.
                warn!("NYI: Signed Write Command signature verification");
                let security = self.security;
                let mut sink = [0u8; 0];
                let mut out = ByteWriter::new(&mut sink);
                let _ =
                    self.attrs
                        .access(AccessType::Write, *handle, 0, value.as_ref(), security, &mut out);
                Ok(())
            }

            AttPdu::PrepareWriteReq {
                handle,
                offset,
                value,
            } => {
                if !self.attrs.contains_handle(*handle) {
                    return Err(AttError::new(ErrorCode::InvalidHandle, *handle));
                }

                let security = self.security;
                let mut sink = [0u8; 0];
                let mut out = ByteWriter::new(&mut sink);
                let result = self.attrs.access(
                    AccessType::PrepareWrite,
                    *handle,
                    *offset,
                    value.as_ref(),
                    security,
                    &mut out,
                );
                if result != AccessResult::Success {
                    return Err(access_result_to_att_error(result, *handle));
                }

                if self
                    .prepared
                    .allocate(*handle, *offset, value.as_ref(), ())
                    .is_err()
                {
                    return Err(AttError::new(ErrorCode::PrepareQueueFull, *handle));
                }

                responder
                    .send(AttPdu::PrepareWriteRsp {
                        handle: *handle,
                        offset: *offset,
                        value: *value,
                    })
                    .unwrap();
                Ok(())
            }

            AttPdu::ExecuteWriteReq { flags } => {
                if *flags == 0x00 {
                    self.prepared.free(());
                    responder.send(AttPdu::ExecuteWriteRsp).unwrap();
                    return Ok(());
                }

                let security = self.security;

                // Phase 1: validate every queued chunk against the attribute's current state
                // without applying anything.
                let mut failure = None;
                for (handle, offset, data) in self.prepared.iter(()) {
                    let mut sink = [0u8; 0];
                    let mut out = ByteWriter::new(&mut sink);
                    let result =
                        self.attrs
                            .access(AccessType::PrepareWrite, handle, offset, data, security, &mut out);
                    if result != AccessResult::Success {
                        failure = Some(access_result_to_att_error(result, handle));
                        break;
                    }
                }

                if let Some(err) = failure {
                    self.prepared.free(());
                    return Err(err);
                }

                // Phase 2: all chunks validated, commit them in FIFO order.
                let chunks: heapless::Vec<(AttHandle, u16, heapless::Vec<u8, { super::MAX_ATTR_LEN }>), PREPARE_QUEUE_RECORDS> =
                    self.prepared
                        .iter(())
                        .map(|(handle, offset, data)| {
                            let mut buf = heapless::Vec::new();
                            let _ = buf.extend_from_slice(data);
                            (handle, offset, buf)
                        })
                        .collect();

                for (handle, offset, data) in &chunks {
                    let mut sink = [0u8; 0];
                    let mut out = ByteWriter::new(&mut sink);
                    self.attrs
                        .access(AccessType::Write, *handle, *offset, data, security, &mut out);
                }

                self.prepared.free(());
                responder.send(AttPdu::ExecuteWriteRsp).unwrap();
                Ok(())
            }

            AttPdu::HandleValueConfirmation => {
                debug!("ATT<- HandleValueConfirmation");
                self.pending_confirmation = true;
                Ok(())
            }

            // Responses are always invalid here
            AttPdu::ErrorRsp { .. }
            | AttPdu::ExchangeMtuRsp { .. }
            | AttPdu::FindInformationRsp { .. }
            | AttPdu::FindByTypeValueRsp { .. }
            | AttPdu::ReadByTypeRsp { .. }
            | AttPdu::ReadRsp { .. }
            | AttPdu::ReadBlobRsp { .. }
            | AttPdu::ReadMultipleRsp { .. }
            | AttPdu::ReadByGroupRsp { .. }
            | AttPdu::WriteRsp { .. }
            | AttPdu::PrepareWriteRsp { .. }
            | AttPdu::ExecuteWriteRsp { .. }
            | AttPdu::HandleValueNotification { .. }
            | AttPdu::HandleValueIndication { .. } => {
                Err(AttError::new(ErrorCode::InvalidPdu, AttHandle::NULL))
            }

            // Unknown (undecoded) requests and commands
            AttPdu::Unknown { .. } => {
                if msg.opcode().is_command() {
                    // According to the spec, unknown Command PDUs should be ignored
                    Ok(())
                } else {
                    // Unknown requests are rejected with a `RequestNotSupported` error
                    Err(AttError::new(ErrorCode::RequestNotSupported, AttHandle::NULL))
                }
            }
        }
    }
}

impl<A: AttributeProvider> ProtocolObj for AttributeServer<A> {
    fn process_message(&mut self, message: &[u8], mut responder: Sender<'_>) -> Result<(), Error> {
        let pdu = &AttPdu::from_bytes(&mut ByteReader::new(message))?;
        let opcode = pdu.opcode();
        debug!("ATT<- {:?}", pdu);

        match self.process_request(pdu, &mut responder) {
            Ok(()) => Ok(()),
            Err(att_error) => {
                debug!("ATT-> {:?}", att_error);

                responder.send(AttPdu::ErrorRsp {
                    opcode,
                    handle: att_error.handle(),
                    error_code: att_error.error_code(),
                })
            }
        }
    }
}

impl<A: AttributeProvider> Protocol for AttributeServer<A> {
    // Fixed outgoing buffer size the L2CAP layer guarantees for every ATT PDU this server sends.
    // `server_mtu`/`with_server_mtu` controls what's *negotiated and advertised*; this constant is
    // the physical cap PDUs are truncated to, since outgoing fragmentation isn't implemented.
    const RSP_PDU_SIZE: u8 = 23;
}

/// An ATT server handle that can send packets and initiate actions.
///
/// This type is needed for any server-initiated procedure, where the server sends out a packet on
/// its own instead of reacting to a client packet.
pub struct AttributeServerTx<'a, A: AttributeProvider> {
    server: &'a mut AttributeServer<A>,

    sender: Sender<'a>,
}

impl<'a, A: AttributeProvider> AttributeServerTx<'a, A> {
    /// Provides mutable access to the underlying `AttributeProvider`.
    ///
    /// Useful for server-initiated procedures that need to inspect or poll application state (eg. a
    /// pending notification) before deciding whether to send anything.
    pub fn provider(&mut self) -> &mut A {
        self.server.provider()
    }

    /// Sends an attribute value notification to the connected client.
    ///
    /// Notifications are not acknowledged by the client.
    ///
    /// If `value` is too large to be transmitted in a single `ATT_MTU`, it will be truncated to
    /// fit. A client may fetch the rest of the truncated value by using a *Read Blob Request*.
    /// If this is unwanted, only notify with a `value` of 19 Bytes or less.
    pub fn notify_raw(mut self, handle: AttHandle, value: &[u8]) {
        // This cannot fail. The `self` guarantees that there's `RSP_PDU_SIZE` bytes free in
        // `sender`, and is consumed by this method. `AttPdu`s encoder will truncate `value` to fit
        // and doesn't error.
        self.sender
            .send(AttPdu::HandleValueNotification {
                handle,
                value: HexSlice(value),
            })
            .unwrap()
    }

    /// Sends an attribute value change indication to the connected client.
    ///
    /// Unlike a notification, the client must acknowledge the indication with a *Handle Value
    /// Confirmation* before another indication can be sent.
    pub fn indicate_raw(mut self, handle: AttHandle, value: &[u8]) {
        self.sender
            .send(AttPdu::HandleValueIndication {
                handle,
                value: HexSlice(value),
            })
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use crate::att::notify_queue::NotificationKind;
    use crate::att::NoAttributes;
    use crate::l2cap::{BleChannelMap, Channel, ChannelMapper, L2CAPState};
    use crate::link::data::Pdu;
    use crate::link::queue::{Consume, Consumer, PacketQueue, SimpleQueue};
    use crate::security::NoSecurity;

    /// Wraps an ATT payload in an (unfragmented) L2CAP header addressed to `channel`.
    fn framed(channel: Channel, payload: &[u8]) -> heapless::Vec<u8, 32> {
        let mut msg = heapless::Vec::<u8, 32>::new();
        msg.extend_from_slice(&(payload.len() as u16).to_le_bytes()).unwrap();
        msg.extend_from_slice(&channel.as_raw().to_le_bytes()).unwrap();
        msg.extend_from_slice(payload).unwrap();
        msg
    }

    fn drain_response(rx: &mut <&mut SimpleQueue as PacketQueue>::Consumer) -> heapless::Vec<u8, 32> {
        rx.consume_pdu_with(|_, pdu| -> Consume<heapless::Vec<u8, 32>> {
            match pdu {
                Pdu::DataStart { message } => {
                    Consume::always(Ok(heapless::Vec::from_slice(message).unwrap()))
                }
                _ => Consume::always(Ok(heapless::Vec::new())),
            }
        })
        .unwrap()
    }

    #[test]
    fn find_information_rejects_null_handle() {
        let map = BleChannelMap::<NoAttributes, NoSecurity>::empty();
        let mut state = L2CAPState::new(map);
        let mut queue = SimpleQueue::new();
        let (mut tx, mut rx) = (&mut queue).split();

        let msg = framed(Channel::ATT, &[0x04, 0x00, 0x00, 0xFF, 0xFF]);
        state.tx(&mut tx).process_start(&msg).into_result().unwrap();

        let response = drain_response(&mut rx);
        assert_eq!(
            &response[..],
            &[
                0x01, // Error Response
                0x04, // request opcode: Find Information Request
                0x00, 0x00, // handle 0x0000
                0x01, // InvalidHandle
            ]
        );
    }

    #[test]
    fn find_information_rejects_start_greater_than_end() {
        let map = BleChannelMap::<NoAttributes, NoSecurity>::empty();
        let mut state = L2CAPState::new(map);
        let mut queue = SimpleQueue::new();
        let (mut tx, mut rx) = (&mut queue).split();

        let msg = framed(Channel::ATT, &[0x04, 0x06, 0x00, 0x05, 0x00]);
        state.tx(&mut tx).process_start(&msg).into_result().unwrap();

        let response = drain_response(&mut rx);
        assert_eq!(
            &response[..],
            &[
                0x01, // Error Response
                0x04, // request opcode: Find Information Request
                0x06, 0x00, // handle 0x0006
                0x01, // InvalidHandle
            ]
        );
    }

    #[test]
    fn mtu_exchange_advertises_configured_server_mtu() {
        let map =
            BleChannelMap::<NoAttributes, NoSecurity>::with_attributes_and_mtu(NoAttributes, 65);
        let mut state = L2CAPState::new(map);
        let mut queue = SimpleQueue::new();
        let (mut tx, mut rx) = (&mut queue).split();

        // Exchange MTU Request, client MTU 64.
        let msg = framed(Channel::ATT, &[0x02, 0x40, 0x00]);
        state.tx(&mut tx).process_start(&msg).into_result().unwrap();

        let response = drain_response(&mut rx);
        assert_eq!(
            &response[..],
            &[
                0x03, // Exchange MTU Response
                0x41, 0x00, // server MTU 65
            ]
        );

        assert_eq!(state.mapper().att().into_protocol().negotiated_mtu(), 64);
    }

    #[test]
    fn notification_pipeline_sends_and_confirms() {
        use crate::gatt::{self, BATTERY_LEVEL_HANDLE};

        let map = BleChannelMap::with_attributes(gatt::attribute_table("test"));
        let mut state = L2CAPState::new(map);
        let mut queue = SimpleQueue::new();
        let (mut tx, mut rx) = (&mut queue).split();

        // Write Request enabling notifications on the Battery Level CCCD (handle 0x0010).
        let msg = framed(Channel::ATT, &[0x12, 0x10, 0x00, 0x01, 0x00]);
        state.tx(&mut tx).process_start(&msg).into_result().unwrap();
        let response = drain_response(&mut rx);
        assert_eq!(&response[..], &[0x13]); // Write Response

        state
            .mapper()
            .att()
            .into_protocol()
            .provider()
            .handler()
            .set_battery_level(42);

        // Nothing queued yet is visible on the wire until something polls and sends it, mirroring
        // what `Responder::poll_notifications` does once per foreground iteration.
        let mut l2cap = state.tx(&mut tx);
        let mut att = l2cap.att().unwrap();
        let (handle, kind, value) = att.provider().handler().poll_notification().unwrap();
        assert_eq!(handle, BATTERY_LEVEL_HANDLE);
        assert_eq!(kind, NotificationKind::Notify);
        assert_eq!(value, 42);
        att.notify_raw(handle, &[value]);

        let response = drain_response(&mut rx);
        assert_eq!(
            &response[..],
            &[
                0x1B, // Handle Value Notification
                0x0F, 0x00, // handle 0x000F, Battery Level value
                42,   // value
            ]
        );

        // No further notification is queued; `HandleValueConfirmation` only matters for
        // indications, but `take_confirmed_indication` must stay false until one actually arrives.
        assert!(!state.mapper().att().into_protocol().take_confirmed_indication());

        let msg = framed(Channel::ATT, &[0x1E]);
        state.tx(&mut tx).process_start(&msg).into_result().unwrap();
        assert!(state.mapper().att().into_protocol().take_confirmed_indication());
        // Calling it again without a new confirmation reports false.
        assert!(!state.mapper().att().into_protocol().take_confirmed_indication());
    }
}
