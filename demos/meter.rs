//! Register map shared by the demo client and server: a cut-down
//! SunSpec-style meter with an identity block, live measurements and a
//! writable setpoint block.
#![allow(dead_code)]

use modbus_static::modbus_layout;

modbus_layout! {
    pub struct MeterLayout {
        bits_registers: MeterFlags @ 0 {
            online, exporting, importing, alarm,
        },
        halfs_registers: MeterData @ 40001 {
            sid: [u8; 4],
            id: u16,
            length: u16,
            manufacturer: [u8; 16],
            serial: [u8; 8],
            amps: f32,
            amps_phase_a: f32,
            amps_phase_b: f32,
            amps_phase_c: f32,
            voltage: f32,
            hz: f32,
            watts: f32,
            power_factor: f32,
            total_wh_exported: f32,
            total_wh_imported: f32,
            events: u32,
        },
        halfs_write_registers: MeterSetpoints @ 60000 {
            power_limit: f32,
            power_factor_target: f32,
            mode: u16,
        },
    }
}
