use std::fmt;

/// Codec failures as short, stable tags.
///
/// Tests and callers compare the enum values; `Display` prints the tag
/// identifier so logs stay grep-able. Prose belongs in the log line around
/// the tag, never in the tag itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    // Builder called while the state machine is elsewhere.
    StateNotWriteStart,
    StateNotWriteMbap,
    StateNotWriteAddr,
    StateNotWriteFc,
    StateNotWriteLength,
    StateNotWriteData,
    StateNotWriteEc,
    StateNotWriteCrc,
    NoWriteInFinalState,
    InvalidFunctionCode,

    // The fixed-capacity frame buffer refused a byte.
    WriteAsciiStartFailed,
    WriteMbapFailed,
    WriteAddrFailed,
    WriteFcFailed,
    WriteLengthFailed,
    WriteDataFailed,
    WriteEcFailed,
    WriteCrcFailed,
    WriteRegOffsetFailed,
    WriteRegCountFailed,
    WriteByteCountFailed,

    InvalidCrc,

    // TCP framing invariants.
    WriteTcpHeaderFailed,
    FatalTooLargeSizeForTcpHeader,
    FatalMissingTcpHeaderInFrame,
    FatalTcpFrameLengthFull,

    // Engine-level validation.
    ResponseFromServerInvalid,
    WrongAddr,
    RegisterNotFullyCovered,
    BitsNotFullyCovered,
    HalfsNotAllowed,
    BitsNotAllowed,
    RegistersNotInSameSpace,
    InvalidRegisterType,
    ExactlyOneOrTwoBitsInStartBit,
    InvalidCoilWriteData,
    MissingDataInFrame,
    IncompleteResponse,
    FrameNotDone,
    LayoutHasNoBits,
    LayoutHasNoWriteBits,
    LayoutHasNoHalfs,
    LayoutHasNoWriteHalfs,

    NotImplemented,

    // Actor layer.
    Timeout,
    ClientCantQuery,
    ServerCantRespond,
}

impl Error {
    pub const fn tag(&self) -> &'static str {
        match self {
            Error::StateNotWriteStart => "STATE_NOT_WRITE_START",
            Error::StateNotWriteMbap => "STATE_NOT_WRITE_MBAP",
            Error::StateNotWriteAddr => "STATE_NOT_WRITE_ADDR",
            Error::StateNotWriteFc => "STATE_NOT_WRITE_FC",
            Error::StateNotWriteLength => "STATE_NOT_WRITE_LENGTH",
            Error::StateNotWriteData => "STATE_NOT_WRITE_DATA",
            Error::StateNotWriteEc => "STATE_NOT_WRITE_EC",
            Error::StateNotWriteCrc => "STATE_NOT_WRITE_CRC",
            Error::NoWriteInFinalState => "NO_WRITE_IN_FINAL_STATE",
            Error::InvalidFunctionCode => "INVALID_FUNCTION_CODE",
            Error::WriteAsciiStartFailed => "WRITE_ASCII_START_FAILED",
            Error::WriteMbapFailed => "WRITE_MBAP_FAILED",
            Error::WriteAddrFailed => "WRITE_ADDR_FAILED",
            Error::WriteFcFailed => "WRITE_FC_FAILED",
            Error::WriteLengthFailed => "WRITE_LENGTH_FAILED",
            Error::WriteDataFailed => "WRITE_DATA_FAILED",
            Error::WriteEcFailed => "WRITE_EC_FAILED",
            Error::WriteCrcFailed => "WRITE_CRC_FAILED",
            Error::WriteRegOffsetFailed => "WRITE_REG_OFF_FAILED",
            Error::WriteRegCountFailed => "WRITE_REG_COUNT_FAILED",
            Error::WriteByteCountFailed => "WRITE_BYTE_COUNT_FAILED",
            Error::InvalidCrc => "INVALID_CRC",
            Error::WriteTcpHeaderFailed => "WRITE_TCP_HEADER_FAILED",
            Error::FatalTooLargeSizeForTcpHeader => "FATAL_TOO_LARGE_SIZE_FOR_TCP_HEADER",
            Error::FatalMissingTcpHeaderInFrame => "FATAL_MISSING_TCP_HEADER_IN_FRAME",
            Error::FatalTcpFrameLengthFull => "FATAL_TCP_FRAME_LENGTH_FULL",
            Error::ResponseFromServerInvalid => "RESPONSE_FROM_SERVER_INVALID",
            Error::WrongAddr => "WRONG_ADDR",
            Error::RegisterNotFullyCovered => "REGISTER_NOT_FULLY_COVERED",
            Error::BitsNotFullyCovered => "BITS_NOT_FULLY_COVERED",
            Error::HalfsNotAllowed => "HALFS_NOT_ALLOWED",
            Error::BitsNotAllowed => "BITS_NOT_ALLOWED",
            Error::RegistersNotInSameSpace => "REGISTERS_NOT_IN_SAME_SPACE",
            Error::InvalidRegisterType => "INVALID_REGISTER_TYPE",
            Error::ExactlyOneOrTwoBitsInStartBit => "EXACTLY_1_OR_2_BIT_HAS_TO_BE_SET_IN_START_BIT",
            Error::InvalidCoilWriteData => "INVALID_COIL_WRITE_DATA",
            Error::MissingDataInFrame => "MISSING_DATA_IN_FRAME",
            Error::IncompleteResponse => "INCOMPLETE_RESPONSE",
            Error::FrameNotDone => "FRAME_NOT_DONE",
            Error::LayoutHasNoBits => "LAYOUT_HAS_NO_BITS",
            Error::LayoutHasNoWriteBits => "LAYOUT_HAS_NO_WRITE_BITS",
            Error::LayoutHasNoHalfs => "LAYOUT_HAS_NO_HALFS",
            Error::LayoutHasNoWriteHalfs => "LAYOUT_HAS_NO_WRITE_HALFS",
            Error::NotImplemented => "NOT_IMPLEMENTED",
            Error::Timeout => "TIMEOUT",
            Error::ClientCantQuery => "CLIENT_CANT_QUERY",
            Error::ServerCantRespond => "SERVER_CANT_RESPOND",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::error::Error for Error {}
