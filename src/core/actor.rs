use std::io;
use std::time::Duration;

use either::Either;
use log::{debug, trace};

use crate::core::{
    BitsAggregate, Error, Field, Layout, ModbusRegister, Status, Transport, WireValue,
};

/// Byte transport driven by [`ModbusActor`].
///
/// Implementations own the socket/serial handle and hand bytes back and
/// forth; deadlines, reconnects and retries live here, never in the codec.
#[allow(async_fn_in_trait)]
pub trait DataIo {
    const TRANSPORT: Transport;

    /// Next inbound chunk; an empty buffer means the deadline lapsed.
    async fn read_bytes(&mut self, max_wait: Duration) -> io::Result<Vec<u8>>;

    async fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Full Modbus endpoint: a codec engine looping over a [`DataIo`].
///
/// With unit address 0 the actor is a client (`read_remote*`/
/// `write_remote*` drive whole transactions); with a non-zero address it is
/// a server stepped by [`poll_update_state`]. Codec failures surface as
/// `Either::Left`, transport failures as `Either::Right`.
///
/// [`poll_update_state`]: ModbusActor::poll_update_state
#[derive(Debug)]
pub struct ModbusActor<L: Layout, Io: DataIo, const MAX_SIZE: usize = 256> {
    register: ModbusRegister<L, MAX_SIZE>,
    io: Io,
    tcp_transaction: u16,
}

impl<L: Layout, Io: DataIo, const MAX_SIZE: usize> ModbusActor<L, Io, MAX_SIZE> {
    pub fn new(addr: u8, io: Io) -> Self {
        ModbusActor {
            register: ModbusRegister::new(addr),
            io,
            tcp_transaction: 0,
        }
    }

    pub fn register(&self) -> &ModbusRegister<L, MAX_SIZE> {
        &self.register
    }

    pub fn register_mut(&mut self) -> &mut ModbusRegister<L, MAX_SIZE> {
        &mut self.register
    }

    pub fn io_mut(&mut self) -> &mut Io {
        &mut self.io
    }

    /// Server step: drain one inbound chunk, answer every completed
    /// request, drop what does not parse or is addressed elsewhere.
    pub async fn poll_update_state(
        &mut self,
        max_wait: Duration,
    ) -> Result<(), Either<Error, io::Error>> {
        if self.register.addr() == 0 {
            return Err(Either::Left(Error::ServerCantRespond));
        }
        let data = self.io.read_bytes(max_wait).await.map_err(Either::Right)?;
        for byte in data {
            match self.feed(byte) {
                Ok(Status::InProgress) => {}
                Ok(Status::Done) => {
                    let response = match self.register.get_frame_response() {
                        Ok(frame) => frame.to_vec(),
                        Err(error) => {
                            debug!("request failed with {error}, replying with an exception");
                            match self.register.get_frame_error_response(error) {
                                Ok(frame) => frame.to_vec(),
                                Err(fatal) => {
                                    self.register.switch_to_request();
                                    return Err(Either::Left(fatal));
                                }
                            }
                        }
                    };
                    self.io
                        .write_bytes(&response)
                        .await
                        .map_err(Either::Right)?;
                    self.register.switch_to_request();
                }
                Err(error) => {
                    // The engine has already reset itself for the next frame.
                    trace!("dropped inbound frame: {error}");
                }
            }
        }
        Ok(())
    }

    /// Reads one remote field and returns its value out of the refreshed
    /// layout.
    pub async fn read_remote<T: WireValue>(
        &mut self,
        addr: u8,
        field: Field<T, L>,
        deadline: Duration,
    ) -> Result<T, Either<Error, io::Error>> {
        self.ensure_client()?;
        self.start_frame(addr).map_err(Either::Left)?;
        let frame = self
            .register
            .get_frame_read(field)
            .map_err(Either::Left)?
            .to_vec();
        self.transact(frame, deadline).await?;
        Ok(self.register.read(field))
    }

    /// Reads `first` through `last` (inclusive) into the layout.
    pub async fn read_remote_range<A: WireValue, B: WireValue>(
        &mut self,
        addr: u8,
        first: Field<A, L>,
        last: Field<B, L>,
        deadline: Duration,
    ) -> Result<(), Either<Error, io::Error>> {
        self.ensure_client()?;
        self.start_frame(addr).map_err(Either::Left)?;
        let frame = self
            .register
            .get_frame_read_range(first, last)
            .map_err(Either::Left)?
            .to_vec();
        self.transact(frame, deadline).await
    }

    /// Reads the coil span marked in `mask` into the layout.
    pub async fn read_remote_bits<M: BitsAggregate<L>>(
        &mut self,
        addr: u8,
        mask: M,
        deadline: Duration,
    ) -> Result<(), Either<Error, io::Error>> {
        self.ensure_client()?;
        self.start_frame(addr).map_err(Either::Left)?;
        let frame = self
            .register
            .get_frame_read_bits(mask)
            .map_err(Either::Left)?
            .to_vec();
        self.transact(frame, deadline).await
    }

    /// Stores `value` locally and writes it to the remote register.
    pub async fn write_remote<T: WireValue>(
        &mut self,
        addr: u8,
        value: T,
        field: Field<T, L>,
        deadline: Duration,
    ) -> Result<(), Either<Error, io::Error>> {
        self.ensure_client()?;
        self.register.write(value, field);
        self.start_frame(addr).map_err(Either::Left)?;
        let frame = self
            .register
            .get_frame_write(field)
            .map_err(Either::Left)?
            .to_vec();
        self.transact(frame, deadline).await
    }

    /// Writes the layout's current values of `first` through `last`.
    pub async fn write_remote_range<A: WireValue, B: WireValue>(
        &mut self,
        addr: u8,
        first: Field<A, L>,
        last: Field<B, L>,
        deadline: Duration,
    ) -> Result<(), Either<Error, io::Error>> {
        self.ensure_client()?;
        self.start_frame(addr).map_err(Either::Left)?;
        let frame = self
            .register
            .get_frame_write_range(first, last)
            .map_err(Either::Left)?
            .to_vec();
        self.transact(frame, deadline).await
    }

    /// Writes the layout's current coil values for the span in `mask`.
    pub async fn write_remote_bits<M: BitsAggregate<L>>(
        &mut self,
        addr: u8,
        mask: M,
        deadline: Duration,
    ) -> Result<(), Either<Error, io::Error>> {
        self.ensure_client()?;
        self.start_frame(addr).map_err(Either::Left)?;
        let frame = self
            .register
            .get_frame_write_bits(mask)
            .map_err(Either::Left)?
            .to_vec();
        self.transact(frame, deadline).await
    }

    fn ensure_client(&self) -> Result<(), Either<Error, io::Error>> {
        if self.register.addr() != 0 {
            return Err(Either::Left(Error::ClientCantQuery));
        }
        Ok(())
    }

    fn start_frame(&mut self, addr: u8) -> Result<(), Error> {
        match Io::TRANSPORT {
            Transport::Rtu => self.register.start_rtu_frame(addr),
            Transport::Tcp => {
                self.tcp_transaction = self.tcp_transaction.wrapping_add(1);
                self.register.start_tcp_frame(self.tcp_transaction, addr)
            }
            Transport::Ascii => self.register.start_ascii_frame(addr),
            Transport::None => Err(Error::NotImplemented),
        }
    }

    fn feed(&mut self, byte: u8) -> Result<Status, Error> {
        match Io::TRANSPORT {
            Transport::Rtu => self.register.process_rtu(byte),
            Transport::Tcp => self.register.process_tcp(byte),
            _ => Err(Error::NotImplemented),
        }
    }

    /// Sends a built request and pumps inbound bytes until the engine
    /// accepts the response or the deadline lapses.
    async fn transact(
        &mut self,
        frame: Vec<u8>,
        deadline: Duration,
    ) -> Result<(), Either<Error, io::Error>> {
        self.io.write_bytes(&frame).await.map_err(Either::Right)?;
        self.register.switch_to_response();

        let started = tokio::time::Instant::now();
        loop {
            let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                return Err(Either::Left(Error::Timeout));
            };
            let data = self
                .io
                .read_bytes(remaining)
                .await
                .map_err(Either::Right)?;
            if data.is_empty() {
                return Err(Either::Left(Error::Timeout));
            }
            for byte in data {
                match self.feed(byte) {
                    Ok(Status::InProgress) => {}
                    Ok(Status::Done) => return Ok(()),
                    Err(error) => return Err(Either::Left(error)),
                }
            }
        }
    }
}
