//! Cross-module frame scenarios driving a client engine against a server
//! engine, byte for byte.

mod frames;

use crate::prelude::*;

crate::modbus_layout! {
    /// Register map shared by the scenario tests: both bit spaces plus both
    /// halfs spaces, small enough to reason about byte-exact frames.
    pub struct TestLayout {
        bits_registers: TestCoils @ 20 {
            a, b, c, d, e, f, g, h, i, j, k, l, m,
            n, o, p, q, r, s, t, u, v, w, x, y, z,
        },
        bits_write_registers: TestWriteCoils @ 10 {
            a, b, c, d, e, f, g, h, i, j, k, l, m,
            n, o, p, q, r, s, t, u, v, w, x, y, z,
        },
        halfs_registers: TestHalfs @ 0 {
            r1: u16,
            r2: u16,
            r3: u16,
            r4: u16,
        },
        halfs_write_registers: TestWriteHalfs @ 0 {
            r1: u16,
            r2: u16,
            r3: u16,
            r4: u16,
        },
    }
}

pub(crate) type TestRegister = ModbusRegister<TestLayout>;

/// Streams a frame into an engine, expecting completion on the last byte
/// and no earlier.
pub(crate) fn feed_rtu(engine: &mut TestRegister, frame: &[u8]) {
    let (last, head) = frame.split_last().expect("frame must not be empty");
    for &byte in head {
        assert_eq!(engine.process_rtu(byte), Ok(Status::InProgress));
    }
    assert_eq!(engine.process_rtu(*last), Ok(Status::Done));
}

pub(crate) fn feed_tcp(engine: &mut TestRegister, frame: &[u8]) {
    let (last, head) = frame.split_last().expect("frame must not be empty");
    for &byte in head {
        assert_eq!(engine.process_tcp(byte), Ok(Status::InProgress));
    }
    assert_eq!(engine.process_tcp(*last), Ok(Status::Done));
}
