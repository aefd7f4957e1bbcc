use serde::{Deserialize, Serialize};

enum_from_primitive! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    /// Modbus function codes supported by this library.
    pub enum FunctionCode {
        None                   = 0,
        ReadCoils              = 1,
        ReadDiscreteInputs     = 2,
        ReadHoldingRegisters   = 3,
        ReadInputRegisters     = 4,
        WriteSingleCoil        = 5,
        WriteSingleRegister    = 6,
        ReadExceptionStatus    = 7,
        Diagnostics            = 8,
        WriteMultipleCoils     = 15,
        WriteMultipleRegisters = 16
    }
}

impl Default for FunctionCode {
    fn default() -> Self {
        FunctionCode::None
    }
}

enum_from_primitive! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    /// Modbus exception codes carried in error responses.
    pub enum ExceptionCode {
        IllegalFunction              = 0x01,
        IllegalDataAddress           = 0x02,
        IllegalDataValue             = 0x03,
        SlaveDeviceFailure           = 0x04,
        Acknowledge                  = 0x05,
        SlaveDeviceBusy              = 0x06,
        NegativeAcknowledgment       = 0x07,
        MemoryParityError            = 0x08,
        GatewayPathUnavailable       = 0x0a,
        GatewayTargetFailedToRespond = 0x0b
    }
}

/// Framing a PDU travels under. `None` until the first byte decides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Transport {
    #[default]
    None,
    Rtu,
    Tcp,
    Ascii,
}

/// Request/response/exception flags of the frame under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameKind {
    pub request: bool,
    pub response: bool,
    pub exception: bool,
}

impl Default for FrameKind {
    fn default() -> Self {
        FrameKind::REQUEST
    }
}

impl FrameKind {
    pub const REQUEST: FrameKind = FrameKind {
        request: true,
        response: false,
        exception: false,
    };

    pub const RESPONSE: FrameKind = FrameKind {
        request: false,
        response: true,
        exception: false,
    };
}

/// Whether a frame of this function code and kind carries a byte-count octet.
///
/// Requests do for FC 15/16 (after the register header), responses for
/// FC 1-4 (directly after the function code). Exception frames never do.
pub fn fc_requires_length(fc: FunctionCode, kind: FrameKind) -> bool {
    if kind.exception {
        return false;
    }
    (kind.request
        && matches!(
            fc,
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters
        ))
        || (kind.response
            && matches!(
                fc,
                FunctionCode::ReadCoils
                    | FunctionCode::ReadDiscreteInputs
                    | FunctionCode::ReadHoldingRegisters
                    | FunctionCode::ReadInputRegisters
            ))
}

pub const fn high_byte(value: u16) -> u8 {
    (value >> 8) as u8
}

pub const fn low_byte(value: u16) -> u8 {
    (value & 0xff) as u8
}
