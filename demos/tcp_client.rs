//! Modbus TCP client polling the demo meter server.
//!
//! ```text
//! cargo run --example tcp-client -- [host:port]
//! ```

mod meter;

use std::env;
use std::error::Error;
use std::time::Duration;

use log::info;
use modbus_static::prelude::*;

use meter::{MeterData, MeterLayout, MeterSetpoints};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let target = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:1502".to_string());
    let io = TcpDataIo::connect(target.as_str()).await?;
    let mut client: ModbusActor<MeterLayout, TcpDataIo> = ModbusActor::new(0, io);
    let deadline = Duration::from_secs(5);

    client
        .read_remote_range(1, MeterData::sid(), MeterData::serial(), deadline)
        .await?;
    let manufacturer = client.register().read(MeterData::manufacturer());
    info!(
        "manufacturer: {}",
        String::from_utf8_lossy(&manufacturer).trim_end_matches('\0')
    );

    let voltage = client.read_remote(1, MeterData::voltage(), deadline).await?;
    let hz = client.read_remote(1, MeterData::hz(), deadline).await?;
    info!("grid: {voltage:.1} V at {hz:.2} Hz");

    client
        .write_remote(1, 0.95f32, MeterSetpoints::power_factor_target(), deadline)
        .await?;
    let confirmed = client
        .read_remote(1, MeterSetpoints::power_factor_target(), deadline)
        .await?;
    info!("power factor target now {confirmed}");

    Ok(())
}
