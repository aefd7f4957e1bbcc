use byteorder::{BigEndian, ByteOrder};
use enum_primitive::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::core::checksum;
use crate::core::{
    fc_requires_length, high_byte, low_byte, Error, ExceptionCode, FrameBuffer, FrameKind,
    FunctionCode, Transport,
};

/// MBAP prefix on TCP frames: transaction id, protocol id and length. The
/// unit identifier that follows is handled as the frame's address byte.
pub const MBAP_HEADER_SIZE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
}

/// Parser/builder position within a frame.
///
/// Shared between both directions: builders call the `write_*` functions in
/// order, the streaming parser feeds [`ModbusFrame::process`] one byte at a
/// time and lands in `Final` when the frame is whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    AwaitAddrOrMbap,
    WriteAddr,
    WriteFc,
    WriteLength,
    WriteDataOrEc,
    WriteData,
    WriteCrc0,
    WriteCrc1,
    Final,
}

/// A single Modbus frame plus the encode/decode state machine around it.
///
/// Sub-field positions (`addr`, `fc`, …) are offsets into the buffer; they
/// are only valid for the current frame lifecycle and reset on [`clear`].
///
/// [`clear`]: ModbusFrame::clear
#[derive(Debug, Clone, Default)]
pub struct ModbusFrame<const MAX_SIZE: usize = 256> {
    state: State,
    transport: Transport,
    kind: FrameKind,
    buffer: FrameBuffer<MAX_SIZE>,
    tcp_header: Option<usize>,
    addr: Option<usize>,
    fc: Option<usize>,
    byte_count: Option<usize>,
    ec: Option<usize>,
    data: Option<usize>,
}

impl<const MAX_SIZE: usize> ModbusFrame<MAX_SIZE> {
    pub fn new() -> Self {
        ModbusFrame {
            state: State::AwaitAddrOrMbap,
            transport: Transport::None,
            kind: FrameKind::REQUEST,
            buffer: FrameBuffer::new(),
            tcp_header: None,
            addr: None,
            fc: None,
            byte_count: None,
            ec: None,
            data: None,
        }
    }

    pub fn clear(&mut self) {
        self.state = State::AwaitAddrOrMbap;
        self.transport = Transport::None;
        self.kind = FrameKind::REQUEST;
        self.buffer.clear();
        self.tcp_header = None;
        self.addr = None;
        self.fc = None;
        self.byte_count = None;
        self.ec = None;
        self.data = None;
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: FrameKind) {
        self.kind = kind;
    }

    pub(crate) fn mark_exception(&mut self) {
        self.kind.exception = true;
    }

    pub fn is_empty(&self) -> bool {
        self.state == State::AwaitAddrOrMbap || self.buffer.is_empty() || self.fc.is_none()
    }

    pub fn bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn addr_byte(&self) -> Option<u8> {
        self.addr.map(|at| self.buffer.as_slice()[at])
    }

    /// Function code octet as stored, exception bit included.
    pub fn fc_byte(&self) -> Option<u8> {
        self.fc.map(|at| self.buffer.as_slice()[at])
    }

    pub fn fc_offset(&self) -> Option<usize> {
        self.fc
    }

    pub fn byte_count_offset(&self) -> Option<usize> {
        self.byte_count
    }

    pub fn byte_count_value(&self) -> Option<u8> {
        self.byte_count.map(|at| self.buffer.as_slice()[at])
    }

    /// Offset of the first payload byte after the function code.
    pub fn data_offset(&self) -> Option<usize> {
        self.data
    }

    pub fn mbap(&self) -> Option<MbapHeader> {
        let at = self.tcp_header?;
        let bytes = self.buffer.as_slice();
        if bytes.len() < at + MBAP_HEADER_SIZE {
            return None;
        }
        Some(MbapHeader {
            transaction_id: BigEndian::read_u16(&bytes[at..]),
            protocol_id: BigEndian::read_u16(&bytes[at + 2..]),
            length: BigEndian::read_u16(&bytes[at + 4..]),
        })
    }

    pub fn has_mbap(&self) -> bool {
        self.tcp_header.is_some()
    }

    // ---------------------------------------------------------------------
    // Builders
    // ---------------------------------------------------------------------

    pub fn write_ascii_start(&mut self) -> Result<(), Error> {
        if self.state != State::AwaitAddrOrMbap {
            return Err(Error::StateNotWriteStart);
        }
        if !self.buffer.push(b':') {
            return Err(Error::WriteAsciiStartFailed);
        }
        self.transport = Transport::Ascii;
        self.state = State::WriteAddr;
        Ok(())
    }

    pub fn write_mbap(&mut self, header: MbapHeader) -> Result<(), Error> {
        if self.state != State::AwaitAddrOrMbap {
            return Err(Error::StateNotWriteMbap);
        }
        self.tcp_header = Some(self.buffer.len());
        for byte in [
            high_byte(header.transaction_id),
            low_byte(header.transaction_id),
            high_byte(header.protocol_id),
            low_byte(header.protocol_id),
            // Length is fixed up once the frame is complete.
            0,
            0,
        ] {
            if !self.buffer.push(byte) {
                return Err(Error::WriteMbapFailed);
            }
        }
        self.transport = Transport::Tcp;
        self.state = State::WriteAddr;
        Ok(())
    }

    pub fn write_addr(&mut self, addr: u8) -> Result<(), Error> {
        if self.state != State::AwaitAddrOrMbap && self.state != State::WriteAddr {
            return Err(Error::StateNotWriteAddr);
        }
        self.addr = Some(self.buffer.len());
        if !self.buffer.push(addr) {
            return Err(Error::WriteAddrFailed);
        }
        if self.transport == Transport::None {
            self.transport = Transport::Rtu;
        }
        self.state = State::WriteFc;
        Ok(())
    }

    pub fn write_fc(&mut self, fc: FunctionCode) -> Result<(), Error> {
        if self.state != State::WriteFc {
            return Err(Error::StateNotWriteFc);
        }
        let mut raw = fc as u8;
        if self.kind.exception {
            raw |= 0x80;
        }
        self.fc = Some(self.buffer.len());
        if !self.buffer.push(raw) {
            return Err(Error::WriteFcFailed);
        }
        // The byte-count octet directly follows the function code only in
        // read responses; FC 15/16 requests reach WriteLength from the data
        // path once their register header is in.
        self.state = if self.kind.response && fc_requires_length(fc, self.kind) {
            State::WriteLength
        } else {
            State::WriteDataOrEc
        };
        Ok(())
    }

    pub fn write_length(&mut self, byte_count: u8) -> Result<(), Error> {
        if self.state != State::WriteLength {
            return Err(Error::StateNotWriteLength);
        }
        self.byte_count = Some(self.buffer.len());
        if !self.buffer.push(byte_count) {
            return Err(Error::WriteLengthFailed);
        }
        self.state = State::WriteData;
        Ok(())
    }

    pub fn write_data(&mut self, byte: u8) -> Result<(), Error> {
        if self.state != State::WriteDataOrEc && self.state != State::WriteData {
            return Err(Error::StateNotWriteData);
        }
        if self.data.is_none() {
            self.data = Some(self.buffer.len());
        }
        if !self.buffer.push(byte) {
            return Err(Error::WriteDataFailed);
        }
        self.state = self.next_data_state();
        Ok(())
    }

    pub fn write_data_span(&mut self, data: &[u8]) -> Result<(), Error> {
        for &byte in data {
            self.write_data(byte)?;
        }
        Ok(())
    }

    pub fn write_ec(&mut self, ec: ExceptionCode) -> Result<(), Error> {
        if self.state != State::WriteDataOrEc {
            return Err(Error::StateNotWriteEc);
        }
        self.ec = Some(self.buffer.len());
        if !self.buffer.push(ec as u8) {
            return Err(Error::WriteEcFailed);
        }
        self.state = if self.tcp_header.is_some() {
            State::Final
        } else {
            State::WriteCrc0
        };
        Ok(())
    }

    /// Appends a finished CRC, low byte first, and verifies the frame sums
    /// to zero.
    pub fn write_checksum(&mut self, crc: u16) -> Result<(), Error> {
        if self.state != State::WriteCrc0 {
            return Err(Error::StateNotWriteCrc);
        }
        if !self.buffer.push(low_byte(crc)) || !self.buffer.push(high_byte(crc)) {
            return Err(Error::WriteCrcFailed);
        }
        self.state = State::Final;
        if checksum::crc16(self.buffer.as_slice()) != 0 {
            return Err(Error::InvalidCrc);
        }
        Ok(())
    }

    /// Streaming variant of [`write_checksum`]: one received CRC octet at a
    /// time, integrity checked on the second.
    ///
    /// [`write_checksum`]: ModbusFrame::write_checksum
    pub fn write_checksum_byte(&mut self, byte: u8) -> Result<(), Error> {
        if self.state != State::WriteCrc0 && self.state != State::WriteCrc1 {
            return Err(Error::StateNotWriteCrc);
        }
        if !self.buffer.push(byte) {
            return Err(Error::WriteCrcFailed);
        }
        if self.state == State::WriteCrc0 {
            self.state = State::WriteCrc1;
            return Ok(());
        }
        self.state = State::Final;
        if checksum::crc16(self.buffer.as_slice()) != 0 {
            return Err(Error::InvalidCrc);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Streaming ingestion
    // ---------------------------------------------------------------------

    /// Routes one inbound byte to the builder the current state expects.
    ///
    /// A set high bit on the function code flags the frame as an exception
    /// before dispatch; the stored octet keeps the bit so checksums stay
    /// wire-exact.
    pub fn process(&mut self, byte: u8) -> Result<(), Error> {
        match self.state {
            State::AwaitAddrOrMbap | State::WriteAddr => self.write_addr(byte),
            State::WriteFc => {
                if byte & 0x80 != 0 {
                    self.kind.exception = true;
                }
                let fc = FunctionCode::from_u8(byte & 0x7f).ok_or(Error::InvalidFunctionCode)?;
                self.write_fc(fc)
            }
            State::WriteLength => self.write_length(byte),
            State::WriteDataOrEc | State::WriteData => self.write_data(byte),
            State::WriteCrc0 | State::WriteCrc1 => self.write_checksum_byte(byte),
            State::Final => Err(Error::NoWriteInFinalState),
        }
    }

    // ---------------------------------------------------------------------
    // Internal accounting
    // ---------------------------------------------------------------------

    /// Payload bytes still missing, or `None` while that is unknowable
    /// (no function code yet, or a byte-count octet still pending).
    fn missing_data_bytes(&self) -> Option<i32> {
        let fc_at = self.fc?;
        let after_fc = (self.buffer.len() - fc_at) as i32 - 1;
        if self.kind.exception {
            return Some(1 - after_fc);
        }
        let fc = FunctionCode::from_u8(self.buffer.as_slice()[fc_at] & 0x7f)?;
        if fc_requires_length(fc, self.kind) {
            let bc_at = self.byte_count?;
            let count = self.buffer.as_slice()[bc_at] as i32;
            let after_count = (self.buffer.len() - bc_at) as i32 - 1;
            Some(count - after_count)
        } else {
            Some(4 - after_fc)
        }
    }

    /// True once an FC 15/16 request has its 4-byte register header in and
    /// the byte-count octet is due next.
    fn length_pending(&self) -> bool {
        if self.byte_count.is_some() || self.kind.exception {
            return false;
        }
        let Some(fc_at) = self.fc else {
            return false;
        };
        let Some(fc) = FunctionCode::from_u8(self.buffer.as_slice()[fc_at] & 0x7f) else {
            return false;
        };
        fc_requires_length(fc, self.kind) && self.buffer.len() - fc_at > 4
    }

    fn next_data_state(&self) -> State {
        if self.length_pending() {
            return State::WriteLength;
        }
        match self.missing_data_bytes() {
            Some(0) if self.tcp_header.is_some() => State::Final,
            Some(0) => State::WriteCrc0,
            _ => State::WriteData,
        }
    }

    // ---------------------------------------------------------------------
    // Framing helpers for the engine
    // ---------------------------------------------------------------------

    /// Raw append used while the TCP header is accumulating, before the
    /// state machine takes over.
    pub(crate) fn push_raw(&mut self, byte: u8) -> bool {
        self.buffer.push(byte)
    }

    /// Adopts the first [`MBAP_HEADER_SIZE`] buffered bytes as the TCP
    /// header and arms the state machine for the unit address.
    pub(crate) fn adopt_mbap(&mut self) {
        self.tcp_header = Some(0);
        self.transport = Transport::Tcp;
        self.state = State::WriteAddr;
    }

    fn set_mbap_length(&mut self, length: u16) {
        if let Some(at) = self.tcp_header {
            BigEndian::write_u16(&mut self.buffer.as_mut_slice()[at + 4..at + 6], length);
        }
    }

    /// Transport footer: RTU appends the CRC, TCP patches the MBAP length,
    /// ASCII remains reserved.
    pub(crate) fn finalize(&mut self) -> Result<(), Error> {
        match self.transport {
            Transport::Rtu => {
                let crc = checksum::crc16(self.buffer.as_slice());
                self.write_checksum(crc)
            }
            Transport::Tcp => {
                let length = (self.buffer.len() - MBAP_HEADER_SIZE) as u16;
                self.set_mbap_length(length);
                Ok(())
            }
            Transport::Ascii => Err(Error::NotImplemented),
            Transport::None => Ok(()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builds_an_rtu_read_request() {
        let mut frame: ModbusFrame = ModbusFrame::new();
        frame.write_addr(0x01).expect("addr");
        frame.write_fc(FunctionCode::ReadHoldingRegisters).expect("fc");
        frame.write_data_span(&[0x00, 0x00, 0x00, 0x02]).expect("header");
        assert_eq!(frame.state(), State::WriteCrc0);
        frame.finalize().expect("crc");
        assert_eq!(frame.bytes(), &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xc4, 0x0b]);
        assert_eq!(frame.state(), State::Final);
    }

    #[test]
    fn rejects_builders_out_of_order() {
        let mut frame: ModbusFrame = ModbusFrame::new();
        assert_eq!(
            frame.write_fc(FunctionCode::ReadCoils),
            Err(Error::StateNotWriteFc)
        );
        assert_eq!(frame.write_length(2), Err(Error::StateNotWriteLength));
        assert_eq!(frame.write_data(0), Err(Error::StateNotWriteData));
        assert_eq!(frame.write_checksum(0), Err(Error::StateNotWriteCrc));
        frame.write_addr(7).expect("addr");
        assert_eq!(frame.write_addr(7), Err(Error::StateNotWriteAddr));
    }

    #[test]
    fn parses_a_write_multiple_request_with_trailing_byte_count() {
        let mut frame: ModbusFrame = ModbusFrame::new();
        // unit 134, FC 15, offset 10, 26 coils, 4 payload bytes.
        let wire = [134, 15, 0, 10, 0, 26, 4, 61, 1, 0, 2, 47, 182];
        for (index, &byte) in wire.iter().enumerate() {
            frame.process(byte).expect("byte accepted");
            let done = index == wire.len() - 1;
            assert_eq!(frame.state() == State::Final, done, "byte {index}");
        }
        assert_eq!(frame.byte_count_value(), Some(4));
        assert_eq!(frame.data_offset(), Some(2));
    }

    #[test]
    fn flags_and_masks_an_exception_fc() {
        let mut frame: ModbusFrame = ModbusFrame::new();
        frame.set_kind(FrameKind::RESPONSE);
        // addr, FC 0x83, EC 2, CRC.
        for byte in [0x01, 0x83, 0x02, 0xc0, 0xf1] {
            frame.process(byte).expect("byte accepted");
        }
        assert_eq!(frame.state(), State::Final);
        assert!(frame.kind().exception);
        assert_eq!(frame.fc_byte(), Some(0x83));
    }

    #[test]
    fn refuses_bytes_after_final() {
        let mut frame: ModbusFrame = ModbusFrame::new();
        for byte in [0x11, 0x06, 0x00, 0x00, 0x00, 0x03, 0xcb, 0x5b] {
            frame.process(byte).expect("byte accepted");
        }
        assert_eq!(frame.process(0x00), Err(Error::NoWriteInFinalState));
    }

    #[test]
    fn overflow_reports_instead_of_truncating() {
        let mut frame: ModbusFrame<4> = ModbusFrame::new();
        frame.write_addr(1).expect("addr");
        frame.write_fc(FunctionCode::WriteSingleRegister).expect("fc");
        frame.write_data(0).expect("fits");
        frame.write_data(0).expect("fits");
        assert_eq!(frame.write_data(0), Err(Error::WriteDataFailed));
    }
}
