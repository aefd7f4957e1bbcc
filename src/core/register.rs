use byteorder::{BigEndian, ByteOrder, LittleEndian};
use enum_primitive::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::core::bits::{bit_span, packed_bits, unpack_bits};
use crate::core::{
    high_byte, low_byte, BitsAggregate, Error, Field, FrameKind, FunctionCode, Layout, MbapHeader,
    ModbusFrame, RegisterSpace, State, Transport, WireValue, MBAP_HEADER_SIZE,
};

/// Progress of a streaming parse: a frame is either still accumulating or
/// complete, validated and applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    InProgress,
    Done,
}

/// Snapshot of the last completed frame (built or ingested).
///
/// `i1`/`i2` are the two 16-bit words following the function code: the
/// register offset and count of a request (or offset and value for the
/// single writes), or byte-count plus leading payload of a read response.
/// The client validates inbound responses against the snapshot of its
/// outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LastCompleted {
    pub transport: Transport,
    pub tcp_transaction_id: u16,
    pub addr: u8,
    pub fc: FunctionCode,
    pub i1: u16,
    pub i2: u16,
    pub crc: u16,
}

/// Modbus codec engine: one register layout, one frame buffer, one
/// last-completed snapshot and a unit address.
///
/// Address `0` gives client semantics (responses are validated against the
/// outstanding request, then applied into the layout); any other address is
/// a server with that unit id (requests addressed elsewhere are refused
/// with `WRONG_ADDR`).
///
/// All memory is inline; nothing allocates after construction. One engine
/// is one sequential state machine with no internal locking and no
/// suspension.
#[derive(Debug, Clone, Default)]
pub struct ModbusRegister<L: Layout, const MAX_SIZE: usize = 256> {
    addr: u8,
    storage: L,
    buffer: ModbusFrame<MAX_SIZE>,
    lc: LastCompleted,
}

impl<L: Layout, const MAX_SIZE: usize> ModbusRegister<L, MAX_SIZE> {
    pub fn new(addr: u8) -> Self {
        ModbusRegister {
            addr,
            storage: L::default(),
            buffer: ModbusFrame::new(),
            lc: LastCompleted::default(),
        }
    }

    pub fn addr(&self) -> u8 {
        self.addr
    }

    pub fn storage(&self) -> &L {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut L {
        &mut self.storage
    }

    pub fn last_completed(&self) -> &LastCompleted {
        &self.lc
    }

    pub fn frame(&self) -> &ModbusFrame<MAX_SIZE> {
        &self.buffer
    }

    pub fn current_frame(&self) -> &[u8] {
        self.buffer.bytes()
    }

    pub fn switch_to_request(&mut self) {
        self.buffer.clear();
    }

    pub fn switch_to_response(&mut self) {
        self.buffer.clear();
        self.buffer.set_kind(FrameKind::RESPONSE);
    }

    // ---------------------------------------------------------------------
    // Typed storage access
    // ---------------------------------------------------------------------

    /// Reads a field out of the layout, swapping back to host order.
    pub fn read<T: WireValue>(&self, field: Field<T, L>) -> T {
        let bytes = self.storage.bytes(field.space()).unwrap_or(&[]);
        let (start, end) = field.byte_range();
        T::get(&bytes[start..end])
    }

    /// Writes a field into the layout in wire order.
    pub fn write<T: WireValue>(&mut self, value: T, field: Field<T, L>) {
        if let Some(bytes) = self.storage.bytes_mut(field.space()) {
            let (start, _) = field.byte_range();
            value.put(&mut bytes[start..]);
        }
    }

    /// True when any coil selected by `mask` is set.
    pub fn get_bit<M: BitsAggregate<L>>(&self, mask: M) -> bool {
        let Some(bytes) = self.storage.bytes(M::SPACE) else {
            return false;
        };
        bytes
            .iter()
            .zip(mask.mask_bytes().iter())
            .any(|(byte, mask)| byte & mask != 0)
    }

    /// Sets or clears every coil selected by `mask`.
    pub fn set_bit<M: BitsAggregate<L>>(&mut self, mask: M, on: bool) {
        let Some(bytes) = self.storage.bytes_mut(M::SPACE) else {
            return;
        };
        for (byte, mask) in bytes.iter_mut().zip(mask.mask_bytes().iter()) {
            if on {
                *byte |= *mask;
            } else {
                *byte &= !*mask;
            }
        }
    }

    // ---------------------------------------------------------------------
    // Frame starts
    // ---------------------------------------------------------------------

    pub fn start_rtu_frame(&mut self, addr: u8) -> Result<(), Error> {
        self.buffer.clear();
        self.buffer.write_addr(addr)
    }

    pub fn start_ascii_frame(&mut self, addr: u8) -> Result<(), Error> {
        self.buffer.clear();
        self.buffer.write_ascii_start()?;
        self.buffer.write_addr(addr)
    }

    pub fn start_tcp_frame(&mut self, transaction_id: u16, addr: u8) -> Result<(), Error> {
        self.buffer.clear();
        self.buffer.write_mbap(MbapHeader {
            transaction_id,
            ..MbapHeader::default()
        })?;
        self.buffer.write_addr(addr)
    }

    // ---------------------------------------------------------------------
    // Client request builders
    // ---------------------------------------------------------------------

    /// Read request for one field; FC picked by its register space.
    pub fn get_frame_read<T: WireValue>(&mut self, field: Field<T, L>) -> Result<&[u8], Error> {
        self.get_frame_read_range(field, field)
    }

    /// Read request covering `first` through `last` (inclusive) of one
    /// sub-aggregate.
    pub fn get_frame_read_range<A: WireValue, B: WireValue>(
        &mut self,
        first: Field<A, L>,
        last: Field<B, L>,
    ) -> Result<&[u8], Error> {
        let (reg_offset, reg_count) = self.field_range(first, last)?;
        self.build_read_request(first.space(), reg_offset, reg_count)?;
        Ok(self.buffer.bytes())
    }

    /// Read request for the coil span marked in `mask` (one or two set bits).
    pub fn get_frame_read_bits<M: BitsAggregate<L>>(&mut self, mask: M) -> Result<&[u8], Error> {
        let (start, end) = match bit_span(mask.mask_bytes()) {
            Ok(span) => span,
            Err(error) => return self.bail(error),
        };
        let reg_offset = M::OFFSET + start;
        let reg_count = end - start + 1;
        self.build_read_request(M::SPACE, reg_offset, reg_count)?;
        Ok(self.buffer.bytes())
    }

    /// Write request for one field: FC 06 for a single register, FC 16
    /// beyond that. Only the halfs-write space accepts writes.
    pub fn get_frame_write<T: WireValue>(&mut self, field: Field<T, L>) -> Result<&[u8], Error> {
        self.get_frame_write_range(field, field)
    }

    pub fn get_frame_write_range<A: WireValue, B: WireValue>(
        &mut self,
        first: Field<A, L>,
        last: Field<B, L>,
    ) -> Result<&[u8], Error> {
        let (reg_offset, reg_count) = self.field_range(first, last)?;
        match first.space() {
            RegisterSpace::HalfsWrite => {}
            RegisterSpace::Halfs => return self.bail(Error::HalfsNotAllowed),
            _ => return self.bail(Error::InvalidRegisterType),
        }
        let (byte_start, _) = first.byte_range();
        self.build_halfs_write_request(reg_offset, byte_start, reg_count)?;
        Ok(self.buffer.bytes())
    }

    /// Write request for the coil span marked in `mask`: FC 05 for a single
    /// coil, FC 15 beyond that. Values come from the layout storage.
    pub fn get_frame_write_bits<M: BitsAggregate<L>>(&mut self, mask: M) -> Result<&[u8], Error> {
        match M::SPACE {
            RegisterSpace::BitsWrite => {}
            RegisterSpace::Bits => return self.bail(Error::BitsNotAllowed),
            _ => return self.bail(Error::InvalidRegisterType),
        }
        let (start, end) = match bit_span(mask.mask_bytes()) {
            Ok(span) => span,
            Err(error) => return self.bail(error),
        };
        let reg_offset = M::OFFSET + start;
        let bit_count = end - start + 1;

        if bit_count == 1 {
            self.forward(|frame| frame.write_fc(FunctionCode::WriteSingleCoil))?;
        } else {
            self.forward(|frame| frame.write_fc(FunctionCode::WriteMultipleCoils))?;
        }
        self.push_data(high_byte(reg_offset), Error::WriteRegOffsetFailed)?;
        self.push_data(low_byte(reg_offset), Error::WriteRegOffsetFailed)?;

        if bit_count == 1 {
            let on = self
                .storage
                .bytes(M::SPACE)
                .map(|bytes| bytes[start as usize / 8] & (1 << (start % 8)) != 0)
                .unwrap_or(false);
            self.push_data(if on { 0xff } else { 0x00 }, Error::WriteDataFailed)?;
            self.push_data(0x00, Error::WriteDataFailed)?;
        } else {
            self.push_data(high_byte(bit_count), Error::WriteRegCountFailed)?;
            self.push_data(low_byte(bit_count), Error::WriteRegCountFailed)?;
            let byte_count = match u8::try_from((bit_count + 7) / 8) {
                Ok(count) => count,
                Err(_) => return self.bail(Error::WriteByteCountFailed),
            };
            self.forward(|frame| frame.write_length(byte_count))?;

            let ModbusRegister {
                buffer, storage, ..
            } = self;
            let Some(src) = storage.bytes(M::SPACE) else {
                buffer.clear();
                return Err(Error::LayoutHasNoWriteBits);
            };
            for byte in packed_bits(src, start as usize, bit_count as usize) {
                if let Err(error) = buffer.write_data(byte) {
                    buffer.clear();
                    return Err(error);
                }
            }
        }

        self.forward(ModbusFrame::finalize)?;
        self.lc = self.snapshot();
        Ok(self.buffer.bytes())
    }

    // ---------------------------------------------------------------------
    // Streaming ingestion
    // ---------------------------------------------------------------------

    /// Feeds one RTU byte. `Done` means the frame passed CRC plus
    /// role-specific validation and, on a client, was applied to storage.
    pub fn process_rtu(&mut self, byte: u8) -> Result<Status, Error> {
        self.advance(byte)
    }

    pub fn process_ascii(&mut self, _byte: u8) -> Result<Status, Error> {
        Err(Error::NotImplemented)
    }

    /// Feeds one TCP byte: accumulates the 6-byte MBAP header first, then
    /// hands off to the state machine while policing the advertised length.
    pub fn process_tcp(&mut self, byte: u8) -> Result<Status, Error> {
        if self.buffer.state() == State::AwaitAddrOrMbap {
            if self.buffer.len() > MBAP_HEADER_SIZE {
                return self.bail(Error::FatalTooLargeSizeForTcpHeader);
            }
            if !self.buffer.push_raw(byte) {
                return self.bail(Error::WriteTcpHeaderFailed);
            }
            if self.buffer.len() == MBAP_HEADER_SIZE {
                self.buffer.adopt_mbap();
            }
            return Ok(Status::InProgress);
        }

        let Some(header) = self.buffer.mbap() else {
            return self.bail(Error::FatalMissingTcpHeaderInFrame);
        };
        if self.buffer.len() > MBAP_HEADER_SIZE + header.length as usize {
            return self.bail(Error::FatalTcpFrameLengthFull);
        }
        self.advance(byte)
    }

    fn advance(&mut self, byte: u8) -> Result<Status, Error> {
        if let Err(error) = self.buffer.process(byte) {
            self.buffer.clear();
            return Err(error);
        }
        if self.buffer.state() != State::Final {
            return Ok(Status::InProgress);
        }

        let reg_offset = self.lc.i1;
        let reg_count = self.lc.i2;
        let response = self.snapshot();

        if self.addr == 0 {
            self.validate_response(&response, reg_count)?;
            self.apply_response(reg_offset, reg_count)?;
        } else if response.addr != self.addr {
            return self.bail(Error::WrongAddr);
        }

        self.lc = response;
        Ok(Status::Done)
    }

    /// Client-side cross-check of a completed response against the
    /// outstanding request snapshot.
    fn validate_response(&mut self, response: &LastCompleted, reg_count: u16) -> Result<(), Error> {
        if self.buffer.kind().exception {
            return self.bail(Error::ResponseFromServerInvalid);
        }
        let header_ok = self.lc.addr == response.addr && self.lc.fc == response.fc;
        let byte_count = (response.i1 >> 8) as u32;
        let valid = match self.lc.fc {
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                *response == self.lc
            }
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
                header_ok && (reg_count as u32 + 7) / 8 == byte_count
            }
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                header_ok && reg_count as u32 * 2 == byte_count
            }
            _ => true,
        };
        if !valid {
            return self.bail(Error::ResponseFromServerInvalid);
        }
        Ok(())
    }

    /// Mirrors a validated read response into the layout at the offsets the
    /// request named.
    fn apply_response(&mut self, reg_offset: u16, reg_count: u16) -> Result<(), Error> {
        match self.lc.fc {
            FunctionCode::ReadCoils => {
                self.unpack_response_bits(RegisterSpace::Bits, Error::LayoutHasNoBits, reg_offset, reg_count)
            }
            FunctionCode::ReadDiscreteInputs => self.unpack_response_bits(
                RegisterSpace::BitsWrite,
                Error::LayoutHasNoWriteBits,
                reg_offset,
                reg_count,
            ),
            FunctionCode::ReadHoldingRegisters => self.copy_response_registers(
                RegisterSpace::Halfs,
                Error::LayoutHasNoHalfs,
                reg_offset,
                reg_count,
            ),
            FunctionCode::ReadInputRegisters => self.copy_response_registers(
                RegisterSpace::HalfsWrite,
                Error::LayoutHasNoWriteHalfs,
                reg_offset,
                reg_count,
            ),
            _ => Ok(()),
        }
    }

    fn unpack_response_bits(
        &mut self,
        space: RegisterSpace,
        missing: Error,
        reg_offset: u16,
        reg_count: u16,
    ) -> Result<(), Error> {
        let Some(sub_offset) = L::offset(space) else {
            return self.bail(missing);
        };
        self.check_bit_coverage(space, reg_offset, reg_count)?;
        let (Some(data_at), Some(byte_count)) =
            (self.buffer.data_offset(), self.buffer.byte_count_value())
        else {
            return self.bail(Error::IncompleteResponse);
        };
        if data_at + byte_count as usize > self.buffer.len() {
            return self.bail(Error::IncompleteResponse);
        }

        let ModbusRegister {
            buffer, storage, ..
        } = self;
        let payload = &buffer.bytes()[data_at..data_at + byte_count as usize];
        let Some(dst) = storage.bytes_mut(space) else {
            buffer.clear();
            return Err(missing);
        };
        unpack_bits(
            dst,
            (reg_offset - sub_offset) as usize,
            reg_count as usize,
            payload.iter().copied(),
        );
        Ok(())
    }

    fn copy_response_registers(
        &mut self,
        space: RegisterSpace,
        missing: Error,
        reg_offset: u16,
        reg_count: u16,
    ) -> Result<(), Error> {
        let Some(sub_offset) = L::offset(space) else {
            return self.bail(missing);
        };
        self.check_register_coverage(space, reg_offset, reg_count)?;
        let (Some(data_at), Some(byte_count)) =
            (self.buffer.data_offset(), self.buffer.byte_count_value())
        else {
            return self.bail(Error::IncompleteResponse);
        };
        if data_at + byte_count as usize > self.buffer.len() {
            return self.bail(Error::IncompleteResponse);
        }

        let ModbusRegister {
            buffer, storage, ..
        } = self;
        let payload = &buffer.bytes()[data_at..data_at + byte_count as usize];
        let Some(dst) = storage.bytes_mut(space) else {
            buffer.clear();
            return Err(missing);
        };
        let start = (reg_offset - sub_offset) as usize * 2;
        dst[start..start + payload.len()].copy_from_slice(payload);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Server response builders
    // ---------------------------------------------------------------------

    /// Builds the reply to the request completed by `process_*`, applying
    /// write requests into the layout first.
    ///
    /// On error the buffer is cleared and the caller can turn the tag into
    /// an exception frame with [`get_frame_error_response`].
    ///
    /// [`get_frame_error_response`]: ModbusRegister::get_frame_error_response
    pub fn get_frame_response(&mut self) -> Result<&[u8], Error> {
        if self.buffer.state() != State::Final {
            return Err(Error::FrameNotDone);
        }

        let reg_offset = self.lc.i1;
        let reg_count = self.lc.i2;
        let fc = self.lc.fc;

        // Writes land in storage while the request payload is still in the
        // buffer; the echo is rebuilt from the snapshot afterwards.
        match fc {
            FunctionCode::WriteSingleCoil => self.apply_single_coil(reg_offset)?,
            FunctionCode::WriteSingleRegister => self.apply_single_register(reg_offset)?,
            FunctionCode::WriteMultipleCoils => self.apply_multiple_coils(reg_offset, reg_count)?,
            FunctionCode::WriteMultipleRegisters => {
                self.apply_multiple_registers(reg_offset, reg_count)?
            }
            _ => {}
        }

        self.switch_to_response();
        self.write_response_header()?;

        match fc {
            FunctionCode::ReadCoils => {
                self.emit_bits_response(RegisterSpace::Bits, Error::LayoutHasNoBits, reg_offset, reg_count)?
            }
            FunctionCode::ReadDiscreteInputs => self.emit_bits_response(
                RegisterSpace::BitsWrite,
                Error::LayoutHasNoWriteBits,
                reg_offset,
                reg_count,
            )?,
            FunctionCode::ReadHoldingRegisters => self.emit_halfs_response(
                RegisterSpace::Halfs,
                Error::LayoutHasNoHalfs,
                reg_offset,
                reg_count,
            )?,
            FunctionCode::ReadInputRegisters => self.emit_halfs_response(
                RegisterSpace::HalfsWrite,
                Error::LayoutHasNoWriteHalfs,
                reg_offset,
                reg_count,
            )?,
            FunctionCode::WriteSingleCoil
            | FunctionCode::WriteSingleRegister
            | FunctionCode::WriteMultipleCoils
            | FunctionCode::WriteMultipleRegisters => {
                // FC 5/6 echo offset + value, FC 15/16 offset + count; both
                // words sit in the snapshot.
                self.emit_echo(reg_offset, reg_count)?
            }
            _ => {}
        }

        self.forward(ModbusFrame::finalize)?;
        Ok(self.buffer.bytes())
    }

    /// Exception reply for a failed request: same header, FC with the high
    /// bit set, one exception-code octet.
    pub fn get_frame_error_response(&mut self, error: Error) -> Result<&[u8], Error> {
        use crate::core::ExceptionCode;

        self.switch_to_response();
        self.buffer.mark_exception();
        self.write_response_header()?;

        let code = match error {
            Error::RegisterNotFullyCovered | Error::BitsNotFullyCovered => {
                ExceptionCode::IllegalDataAddress
            }
            _ => ExceptionCode::SlaveDeviceFailure,
        };
        self.forward(|frame| frame.write_ec(code))?;
        self.forward(ModbusFrame::finalize)?;
        Ok(self.buffer.bytes())
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn bail<T>(&mut self, error: Error) -> Result<T, Error> {
        self.buffer.clear();
        Err(error)
    }

    /// Runs a frame builder step, clearing the buffer when it refuses.
    fn forward<F>(&mut self, step: F) -> Result<(), Error>
    where
        F: FnOnce(&mut ModbusFrame<MAX_SIZE>) -> Result<(), Error>,
    {
        if let Err(error) = step(&mut self.buffer) {
            self.buffer.clear();
            return Err(error);
        }
        Ok(())
    }

    fn push_data(&mut self, byte: u8, on_full: Error) -> Result<(), Error> {
        if self.buffer.write_data(byte).is_err() {
            return self.bail(on_full);
        }
        Ok(())
    }

    /// Register span covered by two descriptors of the same sub-aggregate,
    /// `first` through `last` inclusive.
    fn field_range<A: WireValue, B: WireValue>(
        &mut self,
        first: Field<A, L>,
        last: Field<B, L>,
    ) -> Result<(u16, u16), Error> {
        if first.space() != last.space() {
            return self.bail(Error::RegistersNotInSameSpace);
        }
        let (start, _) = first.byte_range();
        let (_, end) = last.byte_range();
        if end <= start {
            return self.bail(Error::InvalidRegisterType);
        }
        Ok((first.register(), ((end - start) / 2) as u16))
    }

    fn build_read_request(
        &mut self,
        space: RegisterSpace,
        reg_offset: u16,
        reg_count: u16,
    ) -> Result<(), Error> {
        let fc = match space {
            RegisterSpace::Bits => FunctionCode::ReadCoils,
            RegisterSpace::BitsWrite => FunctionCode::ReadDiscreteInputs,
            RegisterSpace::Halfs => FunctionCode::ReadHoldingRegisters,
            RegisterSpace::HalfsWrite => FunctionCode::ReadInputRegisters,
        };
        self.forward(|frame| frame.write_fc(fc))?;
        self.push_data(high_byte(reg_offset), Error::WriteRegOffsetFailed)?;
        self.push_data(low_byte(reg_offset), Error::WriteRegOffsetFailed)?;
        self.push_data(high_byte(reg_count), Error::WriteRegCountFailed)?;
        self.push_data(low_byte(reg_count), Error::WriteRegCountFailed)?;
        self.forward(ModbusFrame::finalize)?;
        self.lc = self.snapshot();
        Ok(())
    }

    fn build_halfs_write_request(
        &mut self,
        reg_offset: u16,
        byte_start: usize,
        reg_count: u16,
    ) -> Result<(), Error> {
        let byte_len = reg_count as usize * 2;
        let fc = if byte_len == 2 {
            FunctionCode::WriteSingleRegister
        } else {
            FunctionCode::WriteMultipleRegisters
        };
        self.forward(|frame| frame.write_fc(fc))?;
        self.push_data(high_byte(reg_offset), Error::WriteRegOffsetFailed)?;
        self.push_data(low_byte(reg_offset), Error::WriteRegOffsetFailed)?;

        if fc == FunctionCode::WriteMultipleRegisters {
            self.push_data(high_byte(reg_count), Error::WriteRegCountFailed)?;
            self.push_data(low_byte(reg_count), Error::WriteRegCountFailed)?;
            let byte_count = match u8::try_from(byte_len) {
                Ok(count) => count,
                Err(_) => return self.bail(Error::WriteByteCountFailed),
            };
            self.forward(|frame| frame.write_length(byte_count))?;
        }

        let ModbusRegister {
            buffer, storage, ..
        } = self;
        let Some(src) = storage.bytes(RegisterSpace::HalfsWrite) else {
            buffer.clear();
            return Err(Error::LayoutHasNoWriteHalfs);
        };
        for &byte in &src[byte_start..byte_start + byte_len] {
            if let Err(error) = buffer.write_data(byte) {
                buffer.clear();
                return Err(error);
            }
        }

        self.forward(ModbusFrame::finalize)?;
        self.lc = self.snapshot();
        Ok(())
    }

    fn write_response_header(&mut self) -> Result<(), Error> {
        let lc = self.lc;
        match lc.transport {
            Transport::Ascii => self.forward(|frame| frame.write_ascii_start())?,
            Transport::Tcp => self.forward(|frame| {
                frame.write_mbap(MbapHeader {
                    transaction_id: lc.tcp_transaction_id,
                    ..MbapHeader::default()
                })
            })?,
            _ => {}
        }
        self.forward(|frame| frame.write_addr(lc.addr))?;
        self.forward(|frame| frame.write_fc(lc.fc))?;
        Ok(())
    }

    fn emit_bits_response(
        &mut self,
        space: RegisterSpace,
        missing: Error,
        reg_offset: u16,
        reg_count: u16,
    ) -> Result<(), Error> {
        let Some(sub_offset) = L::offset(space) else {
            return self.bail(missing);
        };
        self.check_bit_coverage(space, reg_offset, reg_count)?;
        let byte_count = match u8::try_from((reg_count as u32 + 7) / 8) {
            Ok(count) => count,
            Err(_) => return self.bail(Error::WriteByteCountFailed),
        };
        self.forward(|frame| frame.write_length(byte_count))?;

        let ModbusRegister {
            buffer, storage, ..
        } = self;
        let Some(src) = storage.bytes(space) else {
            buffer.clear();
            return Err(missing);
        };
        let start_bit = (reg_offset - sub_offset) as usize;
        for byte in packed_bits(src, start_bit, reg_count as usize) {
            if let Err(error) = buffer.write_data(byte) {
                buffer.clear();
                return Err(error);
            }
        }
        Ok(())
    }

    fn emit_halfs_response(
        &mut self,
        space: RegisterSpace,
        missing: Error,
        reg_offset: u16,
        reg_count: u16,
    ) -> Result<(), Error> {
        let Some(sub_offset) = L::offset(space) else {
            return self.bail(missing);
        };
        self.check_register_coverage(space, reg_offset, reg_count)?;
        let byte_count = match u8::try_from(reg_count as u32 * 2) {
            Ok(count) => count,
            Err(_) => return self.bail(Error::WriteByteCountFailed),
        };
        self.forward(|frame| frame.write_length(byte_count))?;

        let ModbusRegister {
            buffer, storage, ..
        } = self;
        let Some(src) = storage.bytes(space) else {
            buffer.clear();
            return Err(missing);
        };
        let start = (reg_offset - sub_offset) as usize * 2;
        for &byte in &src[start..start + byte_count as usize] {
            if let Err(error) = buffer.write_data(byte) {
                buffer.clear();
                return Err(error);
            }
        }
        Ok(())
    }

    fn emit_echo(&mut self, i1: u16, i2: u16) -> Result<(), Error> {
        self.push_data(high_byte(i1), Error::WriteDataFailed)?;
        self.push_data(low_byte(i1), Error::WriteDataFailed)?;
        self.push_data(high_byte(i2), Error::WriteDataFailed)?;
        self.push_data(low_byte(i2), Error::WriteDataFailed)?;
        Ok(())
    }

    fn apply_single_coil(&mut self, reg_offset: u16) -> Result<(), Error> {
        let space = RegisterSpace::BitsWrite;
        let Some(sub_offset) = L::offset(space) else {
            return self.bail(Error::LayoutHasNoWriteBits);
        };
        self.check_bit_coverage(space, reg_offset, 1)?;
        if self.buffer.data_offset().is_none() {
            return self.bail(Error::MissingDataInFrame);
        }
        let on = match self.lc.i2 {
            0xff00 => true,
            0x0000 => false,
            _ => return self.bail(Error::InvalidCoilWriteData),
        };
        let bit = (reg_offset - sub_offset) as usize;
        let Some(dst) = self.storage.bytes_mut(space) else {
            return self.bail(Error::LayoutHasNoWriteBits);
        };
        if on {
            dst[bit / 8] |= 1 << (bit % 8);
        } else {
            dst[bit / 8] &= !(1 << (bit % 8));
        }
        Ok(())
    }

    fn apply_single_register(&mut self, reg_offset: u16) -> Result<(), Error> {
        let space = RegisterSpace::HalfsWrite;
        let Some(sub_offset) = L::offset(space) else {
            return self.bail(Error::LayoutHasNoWriteHalfs);
        };
        self.check_register_coverage(space, reg_offset, 1)?;
        if self.buffer.data_offset().is_none() {
            return self.bail(Error::MissingDataInFrame);
        }
        let value = self.lc.i2;
        let Some(dst) = self.storage.bytes_mut(space) else {
            return self.bail(Error::LayoutHasNoWriteHalfs);
        };
        let start = (reg_offset - sub_offset) as usize * 2;
        BigEndian::write_u16(&mut dst[start..start + 2], value);
        Ok(())
    }

    fn apply_multiple_coils(&mut self, reg_offset: u16, reg_count: u16) -> Result<(), Error> {
        let space = RegisterSpace::Bits;
        let Some(sub_offset) = L::offset(space) else {
            return self.bail(Error::LayoutHasNoBits);
        };
        self.check_bit_coverage(space, reg_offset, reg_count)?;
        let (Some(count_at), Some(byte_count)) = (
            self.buffer.byte_count_offset(),
            self.buffer.byte_count_value(),
        ) else {
            return self.bail(Error::MissingDataInFrame);
        };
        let payload_at = count_at + 1;
        if payload_at + byte_count as usize > self.buffer.len() {
            return self.bail(Error::MissingDataInFrame);
        }

        let ModbusRegister {
            buffer, storage, ..
        } = self;
        let payload = &buffer.bytes()[payload_at..payload_at + byte_count as usize];
        let Some(dst) = storage.bytes_mut(space) else {
            buffer.clear();
            return Err(Error::LayoutHasNoBits);
        };
        unpack_bits(
            dst,
            (reg_offset - sub_offset) as usize,
            reg_count as usize,
            payload.iter().copied(),
        );
        Ok(())
    }

    fn apply_multiple_registers(&mut self, reg_offset: u16, reg_count: u16) -> Result<(), Error> {
        let space = RegisterSpace::HalfsWrite;
        let Some(sub_offset) = L::offset(space) else {
            return self.bail(Error::LayoutHasNoWriteHalfs);
        };
        self.check_register_coverage(space, reg_offset, reg_count)?;
        let (Some(count_at), Some(byte_count)) = (
            self.buffer.byte_count_offset(),
            self.buffer.byte_count_value(),
        ) else {
            return self.bail(Error::MissingDataInFrame);
        };
        let payload_at = count_at + 1;
        let byte_len = reg_count as usize * 2;
        if byte_count as usize != byte_len || payload_at + byte_len > self.buffer.len() {
            return self.bail(Error::MissingDataInFrame);
        }

        let ModbusRegister {
            buffer, storage, ..
        } = self;
        let payload = &buffer.bytes()[payload_at..payload_at + byte_len];
        let Some(dst) = storage.bytes_mut(space) else {
            buffer.clear();
            return Err(Error::LayoutHasNoWriteHalfs);
        };
        let start = (reg_offset - sub_offset) as usize * 2;
        dst[start..start + byte_len].copy_from_slice(payload);
        Ok(())
    }

    fn check_register_coverage(
        &mut self,
        space: RegisterSpace,
        reg_offset: u16,
        reg_count: u16,
    ) -> Result<(), Error> {
        let covered = match (L::offset(space), self.storage.bytes(space)) {
            (Some(start), Some(bytes)) => {
                let end = start as u32 + (bytes.len() / 2) as u32;
                start as u32 <= reg_offset as u32
                    && reg_offset as u32 + reg_count as u32 <= end
            }
            _ => false,
        };
        if !covered {
            return self.bail(Error::RegisterNotFullyCovered);
        }
        Ok(())
    }

    fn check_bit_coverage(
        &mut self,
        space: RegisterSpace,
        reg_offset: u16,
        reg_count: u16,
    ) -> Result<(), Error> {
        let covered = match (L::offset(space), self.storage.bytes(space)) {
            (Some(start), Some(bytes)) => {
                let end = start as u32 + bytes.len() as u32 * 8;
                start as u32 <= reg_offset as u32
                    && reg_offset as u32 + reg_count as u32 <= end
            }
            _ => false,
        };
        if !covered {
            return self.bail(Error::BitsNotFullyCovered);
        }
        Ok(())
    }

    /// Fingerprint of the frame currently in the buffer.
    fn snapshot(&self) -> LastCompleted {
        let bytes = self.buffer.bytes();
        let word_at = |at: usize| -> u16 {
            if at + 2 <= bytes.len() {
                BigEndian::read_u16(&bytes[at..])
            } else if at < bytes.len() {
                (bytes[at] as u16) << 8
            } else {
                0
            }
        };
        let fc_at = self.buffer.fc_offset();
        LastCompleted {
            transport: self.buffer.transport(),
            tcp_transaction_id: self
                .buffer
                .mbap()
                .map(|header| header.transaction_id)
                .unwrap_or(0),
            addr: self.buffer.addr_byte().unwrap_or(0),
            fc: self
                .buffer
                .fc_byte()
                .and_then(|raw| FunctionCode::from_u8(raw & 0x7f))
                .unwrap_or(FunctionCode::None),
            i1: fc_at.map(|at| word_at(at + 1)).unwrap_or(0),
            i2: fc_at.map(|at| word_at(at + 3)).unwrap_or(0),
            crc: if bytes.len() >= 2 {
                LittleEndian::read_u16(&bytes[bytes.len() - 2..])
            } else {
                0
            },
        }
    }
}

/// Declares an opt-in, once-initialised engine slot.
///
/// ```
/// use modbus_static::{default_register, modbus_layout};
///
/// modbus_layout! {
///     pub struct PanelLayout {
///         halfs_registers: PanelData @ 0 {
///             rpm: u16,
///         },
///     }
/// }
///
/// default_register!(pub fn panel_server -> PanelLayout, addr = 20);
///
/// assert_eq!(panel_server().lock().unwrap().addr(), 20);
/// ```
///
/// Each generated function is its own slot; nothing else in the crate
/// reaches for it, and engines remain directly constructible with
/// [`ModbusRegister::new`].
#[macro_export]
macro_rules! default_register {
    ($vis:vis fn $name:ident -> $layout:ty, addr = $addr:expr) => {
        $vis fn $name() -> &'static ::std::sync::Mutex<$crate::prelude::ModbusRegister<$layout>> {
            static SLOT: ::std::sync::OnceLock<
                ::std::sync::Mutex<$crate::prelude::ModbusRegister<$layout>>,
            > = ::std::sync::OnceLock::new();
            SLOT.get_or_init(|| {
                ::std::sync::Mutex::new($crate::prelude::ModbusRegister::new($addr))
            })
        }
    };
}
