//! Modbus TCP server exposing the demo meter map.
//!
//! ```text
//! cargo run --example tcp-server -- [port]
//! ```

mod meter;

use std::env;
use std::io;
use std::time::Duration;

use either::Either;
use log::{error, info};
use modbus_static::prelude::*;
use tokio::net::TcpListener;

use meter::{MeterData, MeterFlags, MeterLayout};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let port: u16 = env::args()
        .nth(1)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(1502);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("meter server listening on port {port}");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("connection from {peer}");

        let mut actor: ModbusActor<MeterLayout, TcpDataIo> =
            ModbusActor::new(1, TcpDataIo::new(stream));
        preset_meter(actor.register_mut());

        loop {
            match actor.poll_update_state(Duration::from_secs(60)).await {
                Ok(()) => {}
                Err(Either::Right(cause)) if cause.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("peer {peer} disconnected");
                    break;
                }
                Err(Either::Right(cause)) => {
                    error!("i/o failure on {peer}: {cause}");
                    break;
                }
                Err(Either::Left(tag)) => {
                    error!("cannot serve {peer}: {tag}");
                    break;
                }
            }
        }
    }
}

fn preset_meter(register: &mut ModbusRegister<MeterLayout>) {
    register.write(*b"SunS", MeterData::sid());
    register.write(1u16, MeterData::id());
    register.write(65u16, MeterData::length());
    register.write(*b"modbus-static\0\0\0", MeterData::manufacturer());
    register.write(*b"00001234", MeterData::serial());
    register.write(230.0f32, MeterData::voltage());
    register.write(50.0f32, MeterData::hz());
    register.write(1.0f32, MeterData::power_factor());
    register.set_bit(MeterFlags::online(), true);
}
