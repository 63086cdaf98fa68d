//! Advertising Channel PDUs.
//!
//! Every packet sent or received while not yet connected (or while establishing a connection) uses
//! the Advertising Channel PDU format described here. This includes the actual advertisements, scan
//! requests/responses, and the `CONNECT_REQ` PDU that moves a peripheral into the `Connection`
//! state.

use crate::{
    bytes::*,
    link::{channel_map::ChannelMap, device_address::DeviceAddress, MIN_PAYLOAD_BUF},
    time::Duration,
    utils::HexSlice,
    Error,
};
use core::fmt;
use heapless::Vec as HVec;

enum_with_unknown! {
    /// 4-bit PDU type field carried in the Advertising Channel PDU header.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum PduType(u8) {
        AdvInd = 0b0000,
        AdvDirectInd = 0b0001,
        AdvNonconnInd = 0b0010,
        ScanReq = 0b0011,
        ScanRsp = 0b0100,
        ConnectReq = 0b0101,
        AdvScanInd = 0b0110,
    }
}

/// Header preceding every Advertising Channel PDU.
#[derive(Copy, Clone)]
pub struct Header(u16);

impl Header {
    /// Creates a header for a PDU of the given type, with `tx_add`/`rx_add` both cleared and the
    /// payload length set to 0.
    pub fn new(ty: PduType) -> Self {
        Header(u16::from(u8::from(ty)))
    }

    /// Parses a header from its raw 2-byte representation.
    pub fn parse(raw: &[u8]) -> Self {
        Header(u16::from(raw[0]) | (u16::from(raw[1]) << 8))
    }

    /// Returns the raw 16-bit representation of this header.
    pub fn to_u16(&self) -> u16 {
        self.0
    }

    /// Returns the PDU type.
    pub fn pdu_type(&self) -> PduType {
        PduType::from((self.0 & 0b1111) as u8)
    }

    /// Whether the advertiser's address (`AdvA` or similar) is a random address.
    pub fn tx_add(&self) -> bool {
        self.0 & (1 << 6) != 0
    }

    /// Sets whether the advertiser's address is a random address.
    pub fn set_tx_add(&mut self, random: bool) {
        if random {
            self.0 |= 1 << 6;
        } else {
            self.0 &= !(1 << 6);
        }
    }

    /// Whether the target/scanner address is a random address.
    pub fn rx_add(&self) -> bool {
        self.0 & (1 << 7) != 0
    }

    /// Sets whether the target/scanner address is a random address.
    pub fn set_rx_add(&mut self, random: bool) {
        if random {
            self.0 |= 1 << 7;
        } else {
            self.0 &= !(1 << 7);
        }
    }

    /// Returns the payload length in octets (6-bit field, so 0..=63, though the spec restricts it
    /// to 6..=37).
    pub fn payload_length(&self) -> u8 {
        ((self.0 >> 8) & 0b0011_1111) as u8
    }

    /// Sets the payload length field.
    pub fn set_payload_length(&mut self, len: u8) {
        self.0 = (self.0 & !(0b0011_1111 << 8)) | (u16::from(len & 0b0011_1111) << 8);
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("PduType", &self.pdu_type())
            .field("TxAdd", &self.tx_add())
            .field("RxAdd", &self.rx_add())
            .field("Length", &self.payload_length())
            .finish()
    }
}

impl<'a> FromBytes<'a> for Header {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let raw = bytes.read_u16_le()?;
        Ok(Header(raw))
    }
}

impl ToBytes for Header {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u16_le(self.to_u16())
    }
}

/// `LLData` field of a `CONNECT_REQ` PDU: initial Link-Layer connection parameters proposed by the
/// initiator (the device that will become the Central).
#[derive(Debug, Copy, Clone)]
pub struct ConnectRequestData {
    access_address: u32,
    crc_init: u32,
    win_size: u8,
    win_offset: u16,
    interval: u16,
    latency: u16,
    timeout: u16,
    channel_map: ChannelMap,
    hop: u8,
    sca: u8,
}

impl ConnectRequestData {
    /// The Access Address to use for the data channel connection.
    pub fn access_address(&self) -> u32 {
        self.access_address
    }

    /// The CRC initialization value (`CRCInit`) to use on the data channel.
    pub fn crc_init(&self) -> u32 {
        self.crc_init
    }

    /// The size of the first data channel transmit window.
    pub fn win_size(&self) -> Duration {
        Duration::from_micros(u32::from(self.win_size) * 1_250)
    }

    /// The offset of the first data channel transmit window from `end_of_tx_window`'s anchor.
    pub fn win_offset(&self) -> Duration {
        Duration::from_micros(u32::from(self.win_offset) * 1_250)
    }

    /// The point in time (relative to the end of the `CONNECT_REQ` PDU) at which the first data
    /// channel transmit window opens.
    pub fn end_of_tx_window(&self) -> Duration {
        self.win_offset() + self.win_size()
    }

    /// The connection event interval.
    pub fn interval(&self) -> Duration {
        Duration::from_micros(u32::from(self.interval) * 1_250)
    }

    /// The slave latency, in connection events.
    pub fn latency(&self) -> u16 {
        self.latency
    }

    /// The connection supervision timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout * 10)
    }

    /// The data channel map to use initially.
    pub fn channel_map(&self) -> &ChannelMap {
        &self.channel_map
    }

    /// The hop increment used for data channel selection (5 bits, 5..=16).
    pub fn hop(&self) -> u8 {
        self.hop
    }

    /// The initiator's *Sleep Clock Accuracy* (3-bit field).
    pub fn sca(&self) -> u8 {
        self.sca
    }
}

impl<'a> FromBytes<'a> for ConnectRequestData {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let access_address = bytes.read_u32_le()?;

        let crc_init_bytes = bytes.read_array::<[u8; 3]>()?;
        let crc_init = u32::from(crc_init_bytes[0])
            | (u32::from(crc_init_bytes[1]) << 8)
            | (u32::from(crc_init_bytes[2]) << 16);

        let win_size = bytes.read_u8()?;
        let win_offset = bytes.read_u16_le()?;
        let interval = bytes.read_u16_le()?;
        let latency = bytes.read_u16_le()?;
        let timeout = bytes.read_u16_le()?;
        let channel_map = ChannelMap::from_raw(bytes.read_array::<[u8; 5]>()?);
        let hop_and_sca = bytes.read_u8()?;

        Ok(Self {
            access_address,
            crc_init,
            win_size,
            win_offset,
            interval,
            latency,
            timeout,
            channel_map,
            hop: hop_and_sca & 0b0001_1111,
            sca: hop_and_sca >> 5,
        })
    }
}

impl ToBytes for ConnectRequestData {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error> {
        writer.write_u32_le(self.access_address)?;
        writer.write_u8(self.crc_init as u8)?;
        writer.write_u8((self.crc_init >> 8) as u8)?;
        writer.write_u8((self.crc_init >> 16) as u8)?;
        writer.write_u8(self.win_size)?;
        writer.write_u16_le(self.win_offset)?;
        writer.write_u16_le(self.interval)?;
        writer.write_u16_le(self.latency)?;
        writer.write_u16_le(self.timeout)?;
        writer.write_slice(&self.channel_map.to_raw())?;
        writer.write_u8((self.hop & 0b0001_1111) | (self.sca << 5))?;
        Ok(())
    }
}

/// Structured representation of an Advertising Channel PDU.
#[derive(Debug)]
pub enum Pdu<'a> {
    /// `ADV_IND`: Connectable and scannable undirected advertisement.
    ConnectableUndirectedAdv {
        adv_addr: DeviceAddress,
        adv_data: HexSlice<&'a [u8]>,
    },

    /// `ADV_NONCONN_IND`: Non-connectable, non-scannable undirected advertisement.
    NonconnectableUndirectedAdv {
        adv_addr: DeviceAddress,
        adv_data: HexSlice<&'a [u8]>,
    },

    /// `ADV_SCAN_IND`: Scannable, but not connectable, undirected advertisement.
    ScannableUndirectedAdv {
        adv_addr: DeviceAddress,
        adv_data: HexSlice<&'a [u8]>,
    },

    /// `ADV_DIRECT_IND`: Connectable directed advertisement targeted at a known peer.
    ConnectableDirectedAdv {
        adv_addr: DeviceAddress,
        target_addr: DeviceAddress,
    },

    /// `SCAN_REQ`: Sent by a scanner requesting a `SCAN_RSP`.
    ScanRequest {
        scanner_addr: DeviceAddress,
        adv_addr: DeviceAddress,
    },

    /// `SCAN_RSP`: Answer to a `SCAN_REQ`, carries additional advertising data.
    ScanResponse {
        adv_addr: DeviceAddress,
        scan_rsp_data: HexSlice<&'a [u8]>,
    },

    /// `CONNECT_REQ`: Request to establish a data channel connection.
    ConnectRequest {
        initiator_addr: DeviceAddress,
        receiver_addr: DeviceAddress,
        lldata: ConnectRequestData,
    },
}

impl<'a> Pdu<'a> {
    /// Parses a PDU from a received header and payload.
    pub fn from_header_and_payload(
        header: Header,
        bytes: &mut ByteReader<'a>,
    ) -> Result<Self, Error> {
        fn addr(bytes: &mut ByteReader<'_>, random: bool) -> Result<DeviceAddress, Error> {
            let raw = bytes.read_array::<[u8; 6]>()?;
            Ok(DeviceAddress::new(
                raw,
                if random {
                    crate::link::device_address::AddressKind::Random
                } else {
                    crate::link::device_address::AddressKind::Public
                },
            ))
        }

        Ok(match header.pdu_type() {
            PduType::AdvInd => Pdu::ConnectableUndirectedAdv {
                adv_addr: addr(bytes, header.tx_add())?,
                adv_data: HexSlice(bytes.read_rest()),
            },
            PduType::AdvNonconnInd => Pdu::NonconnectableUndirectedAdv {
                adv_addr: addr(bytes, header.tx_add())?,
                adv_data: HexSlice(bytes.read_rest()),
            },
            PduType::AdvScanInd => Pdu::ScannableUndirectedAdv {
                adv_addr: addr(bytes, header.tx_add())?,
                adv_data: HexSlice(bytes.read_rest()),
            },
            PduType::AdvDirectInd => Pdu::ConnectableDirectedAdv {
                adv_addr: addr(bytes, header.tx_add())?,
                target_addr: addr(bytes, header.rx_add())?,
            },
            PduType::ScanReq => Pdu::ScanRequest {
                scanner_addr: addr(bytes, header.tx_add())?,
                adv_addr: addr(bytes, header.rx_add())?,
            },
            PduType::ScanRsp => Pdu::ScanResponse {
                adv_addr: addr(bytes, header.tx_add())?,
                scan_rsp_data: HexSlice(bytes.read_rest()),
            },
            PduType::ConnectReq => Pdu::ConnectRequest {
                initiator_addr: addr(bytes, header.tx_add())?,
                receiver_addr: addr(bytes, header.rx_add())?,
                lldata: ConnectRequestData::from_bytes(bytes)?,
            },
            PduType::Unknown(_) => return Err(Error::InvalidValue),
        })
    }

    /// Returns the address of the device this PDU is addressed to, if any.
    ///
    /// Undirected advertisements and most non-addressed PDUs return `None`.
    pub fn receiver(&self) -> Option<&DeviceAddress> {
        match self {
            Pdu::ConnectableDirectedAdv { target_addr, .. } => Some(target_addr),
            Pdu::ScanRequest { adv_addr, .. } => Some(adv_addr),
            Pdu::ConnectRequest { receiver_addr, .. } => Some(receiver_addr),
            _ => None,
        }
    }
}

/// A self-contained, owned Advertising Channel PDU ready to be copied into a transmit buffer.
#[derive(Debug, Clone)]
pub struct PduBuf {
    header: Header,
    buf: HVec<u8, MIN_PAYLOAD_BUF>,
}

impl PduBuf {
    fn build(
        ty: PduType,
        dev_addr: DeviceAddress,
        ad: &[crate::link::ad_structure::AdStructure<'_>],
    ) -> Result<Self, Error> {
        let mut buf = HVec::new();
        buf.resize(MIN_PAYLOAD_BUF, 0).ok();

        let mut header = Header::new(ty);
        header.set_tx_add(dev_addr.is_random());

        let written = {
            let mut writer = ByteWriter::new(&mut buf[..]);
            writer.write_slice(dev_addr.raw())?;
            for structure in ad {
                structure.to_bytes(&mut writer)?;
            }
            MIN_PAYLOAD_BUF - writer.space_left()
        };
        buf.truncate(written);
        header.set_payload_length(written as u8);

        Ok(Self { header, buf })
    }

    /// Builds an `ADV_IND` PDU for a discoverable, connectable device.
    pub fn discoverable(
        dev_addr: DeviceAddress,
        ad: &[crate::link::ad_structure::AdStructure<'_>],
    ) -> Result<Self, Error> {
        Self::build(PduType::AdvInd, dev_addr, ad)
    }

    /// Builds a `SCAN_RSP` PDU carrying additional advertising data.
    pub fn scan_response(
        dev_addr: DeviceAddress,
        ad: &[crate::link::ad_structure::AdStructure<'_>],
    ) -> Result<Self, Error> {
        Self::build(PduType::ScanRsp, dev_addr, ad)
    }

    /// Returns the PDU header to transmit.
    pub fn header(&self) -> Header {
        self.header
    }

    /// Returns the PDU payload to transmit (following the header).
    pub fn payload(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::device_address::AddressKind;

    #[test]
    fn header_roundtrip() {
        let mut header = Header::new(PduType::ConnectReq);
        header.set_tx_add(true);
        header.set_rx_add(false);
        header.set_payload_length(34);

        let raw = header.to_u16();
        let parsed = Header::parse(&raw.to_le_bytes());
        assert_eq!(parsed.pdu_type(), PduType::ConnectReq);
        assert!(parsed.tx_add());
        assert!(!parsed.rx_add());
        assert_eq!(parsed.payload_length(), 34);
    }

    #[test]
    fn discoverable_pdu_starts_with_device_address() {
        let addr = DeviceAddress::new([1, 2, 3, 4, 5, 6], AddressKind::Public);
        let pdu = PduBuf::discoverable(addr, &[]).unwrap();
        assert_eq!(&pdu.payload()[..6], addr.raw());
        assert_eq!(pdu.header().pdu_type(), PduType::AdvInd);
    }
}
