//! Defines PDUs, procedures and functionality used by the LE L2CAP signaling channel (`0x0005`).
//!
//! This stack only ever plays the LE peripheral role, so the signaling channel only needs to
//! originate *Connection Parameter Update Request* commands and consume the peer's *Response*.
//! Any other incoming command (including a *Request*, which would only make sense if the peer
//! thought we were the central) is answered with a *Command Reject*.

use super::*;
use crate::bytes::{ByteReader, ByteWriter, FromBytes, ToBytes};

enum_with_unknown! {
    /// Opcodes allowed on the LE Signaling Channel (CID `0x0005`).
    #[derive(Debug, Copy, Clone, defmt::Format)]
    enum Code(u8) {
        CommandReject = 0x01,
        DisconnectionRequest = 0x06,
        DisconnectionResponse = 0x07,
        ConnectionParameterUpdateRequest = 0x12,
        ConnectionParameterUpdateResponse = 0x13,
        CreditBasedConnectionRequest = 0x14,
        CreditBasedConnectionResponse = 0x15,
        FlowControlCredit = 0x16,
    }
}

/// Reason code carried by a *Command Reject* (only one is produced by this stack).
const COMMAND_NOT_UNDERSTOOD: u16 = 0x0000;

struct Header {
    code: Code,
    identifier: u8,
    length: u16,
}

impl<'a> FromBytes<'a> for Header {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        Ok(Self {
            code: Code::from(bytes.read_u8()?),
            identifier: bytes.read_u8()?,
            length: bytes.read_u16_le()?,
        })
    }
}

impl ToBytes for Header {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u8(self.code.into())?;
        writer.write_u8(self.identifier)?;
        writer.write_u16_le(self.length)
    }
}

/// Signaling channel state.
///
/// Tracks the identifier to use for the next self-initiated command and whether a *Connection
/// Parameter Update Request* we sent is still awaiting the peer's response.
pub struct SignalingState {
    next_identifier: u8,
    outstanding_update_identifier: Option<u8>,
}

impl SignalingState {
    /// Creates a fresh signaling channel with no outstanding requests.
    pub fn new() -> Self {
        Self {
            // Identifier 0x00 is reserved and must never be used by a sent command.
            next_identifier: 1,
            outstanding_update_identifier: None,
        }
    }

    fn alloc_identifier(&mut self) -> u8 {
        let id = self.next_identifier;
        self.next_identifier = if self.next_identifier == 0xFF {
            1
        } else {
            self.next_identifier + 1
        };
        id
    }

    fn reject(identifier: u8, responder: &mut Sender<'_>) -> Result<(), Error> {
        responder.send_with(|writer| -> Result<(), Error> {
            Header {
                code: Code::CommandReject,
                identifier,
                length: 2,
            }
            .to_bytes(writer)?;
            writer.write_u16_le(COMMAND_NOT_UNDERSTOOD)
        })
    }
}

impl Default for SignalingState {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for SignalingState {
    const RSP_PDU_SIZE: u8 = 12;
}

impl ProtocolObj for SignalingState {
    fn process_message(&mut self, message: &[u8], mut responder: Sender<'_>) -> Result<(), Error> {
        let mut reader = ByteReader::new(message);
        let header = Header::from_bytes(&mut reader)?;

        // Identifier 0 is invalid on the wire and must be ignored silently, even for a command we
        // would otherwise reject.
        if header.identifier == 0 {
            debug!("ignoring signaling command with reserved identifier 0");
            return Ok(());
        }

        match header.code {
            Code::ConnectionParameterUpdateResponse => {
                if usize::from(header.length) < 2 {
                    return Err(Error::InvalidLength);
                }
                let _result = reader.read_u16_le()?;
                if self.outstanding_update_identifier == Some(header.identifier) {
                    self.outstanding_update_identifier = None;
                }
                Ok(())
            }

            // We never act as a central, so a Connection Parameter Update Request (or any other
            // command) sent to us is something we don't understand.
            _ => Self::reject(header.identifier, &mut responder),
        }
    }
}

/// A `SignalingState` handle that can send packets and initiate actions.
pub struct SignalingStateTx<'a> {
    state: &'a mut SignalingState,
    sender: Sender<'a>,
}

impl<'a> SignalingStateTx<'a> {
    pub(crate) fn new(state: &'a mut SignalingState, sender: Sender<'a>) -> Self {
        Self { state, sender }
    }

    /// Requests that the connected central change the connection parameters.
    ///
    /// `interval_min`/`interval_max` are in units of 1.25 ms, `latency` is a slave-latency event
    /// count, and `timeout` is in units of 10 ms. Fails if a previous request is still awaiting
    /// the peer's response; at most one request may be outstanding at a time.
    pub fn connection_parameter_update_request(
        mut self,
        interval_min: u16,
        interval_max: u16,
        latency: u16,
        timeout: u16,
    ) -> Result<(), Error> {
        if self.state.outstanding_update_identifier.is_some() {
            return Err(Error::QueueFull);
        }

        let identifier = self.state.alloc_identifier();
        self.sender.send_with(|writer| -> Result<(), Error> {
            Header {
                code: Code::ConnectionParameterUpdateRequest,
                identifier,
                length: 8,
            }
            .to_bytes(writer)?;
            writer.write_u16_le(interval_min)?;
            writer.write_u16_le(interval_max)?;
            writer.write_u16_le(latency)?;
            writer.write_u16_le(timeout)
        })?;

        self.state.outstanding_update_identifier = Some(identifier);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::queue::{PacketQueue, SimpleQueue};

    fn send<'a>(
        state: &'a mut SignalingState,
        tx: &'a mut <&'a mut SimpleQueue as PacketQueue>::Producer,
        f: impl FnOnce(SignalingStateTx<'_>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let chdata = ChannelData::new(Channel::LE_SIGNALING, state);
        let sender = Sender::new(&chdata, tx).expect("no space in tx queue");
        f(SignalingStateTx::new(chdata.into_protocol(), sender))
    }

    fn drain(rx: &mut <&mut SimpleQueue as PacketQueue>::Consumer) -> heapless::Vec<u8, 32> {
        use crate::link::data::Pdu;
        use crate::link::queue::{Consume, Consumer};

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
    fn connection_parameter_update_request_roundtrip() {
        let mut queue = SimpleQueue::new();
        let (mut tx, mut rx) = (&mut queue).split();
        let mut state = SignalingState::new();

        send(&mut state, &mut tx, |tx| {
            tx.connection_parameter_update_request(0x0020, 0x0100, 0x0055, 0x0C80)
        })
        .unwrap();

        let bytes = drain(&mut rx);
        // L2CAP header (length=8, cid=0x0005) + signaling header + payload
        assert_eq!(
            &bytes[..],
            &[
                0x08, 0x00, 0x05, 0x00, // L2CAP header
                0x12, 0x01, 0x08, 0x00, // code, identifier, length
                0x20, 0x00, 0x00, 0x01, 0x55, 0x00, 0x80, 0x0C,
            ]
        );

        // A second request is rejected until the response arrives.
        let err = send(&mut state, &mut tx, |tx| {
            tx.connection_parameter_update_request(0, 0, 0, 0)
        })
        .unwrap_err();
        assert_eq!(err, Error::QueueFull);

        // Peer responds, accepting.
        let response = [0x13, 0x01, 0x02, 0x00, 0x00, 0x00];
        let chdata = ChannelData::new(Channel::LE_SIGNALING, &mut state);
        let sender = Sender::new(&chdata, &mut tx).unwrap();
        chdata.into_protocol().process_message(&response, sender).unwrap();

        // Now a new request can be queued.
        send(&mut state, &mut tx, |tx| {
            tx.connection_parameter_update_request(1, 2, 3, 4)
        })
        .unwrap();
    }

    #[test]
    fn reject_unknown_command() {
        let mut queue = SimpleQueue::new();
        let (mut tx, mut rx) = (&mut queue).split();
        let mut state = SignalingState::new();

        // Identifier 0 -> silently ignored, no output.
        let chdata = ChannelData::new(Channel::LE_SIGNALING, &mut state);
        let sender = Sender::new(&chdata, &mut tx).unwrap();
        chdata
            .into_protocol()
            .process_message(&[0x14, 0x00, 0x0A, 0x00], sender)
            .unwrap();
        assert!(!rx.has_data());

        // A Connection Parameter Update Request sent to us (we're not a central) -> reject.
        let input = [
            0x12, 0x03, 0x08, 0x00, 0x10, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x01,
        ];
        let chdata = ChannelData::new(Channel::LE_SIGNALING, &mut state);
        let sender = Sender::new(&chdata, &mut tx).unwrap();
        chdata.into_protocol().process_message(&input, sender).unwrap();

        let bytes = drain(&mut rx);
        assert_eq!(
            &bytes[..],
            &[
                0x06, 0x00, 0x05, 0x00, // L2CAP header
                0x01, 0x03, 0x02, 0x00, 0x00, 0x00, // Command Reject
            ]
        );
    }
}
