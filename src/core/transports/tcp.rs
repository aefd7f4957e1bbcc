use std::io;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use futures_util::sink::SinkExt;
use log::{debug, error, trace};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use either::Either;

use crate::core::{DataIo, Layout, ModbusActor, Transport, MBAP_HEADER_SIZE};

/// Port a Modbus TCP server conventionally listens on.
pub const MODBUS_TCP_DEFAULT_PORT: u16 = 502;

/// Largest ADU the codec will frame: MBAP header plus a full 253-byte PDU
/// and the unit identifier.
pub const MODBUS_MAX_PACKET_SIZE: usize = 260;

/// Frames a TCP stream on MBAP length prefixes.
///
/// One decoded item is one complete ADU, header included, ready to be fed
/// into the engine byte by byte.
#[derive(Debug, Default)]
pub struct MbapCodec;

impl Decoder for MbapCodec {
    type Item = Vec<u8>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Vec<u8>>> {
        if src.len() < MBAP_HEADER_SIZE {
            // Not enough data to read the length marker.
            return Ok(None);
        }

        let length = BigEndian::read_u16(&src[4..6]) as usize;
        let total = MBAP_HEADER_SIZE + length;

        // Bounded before reserving anything, so a broken peer cannot make
        // us buffer without limit.
        if total > MODBUS_MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("advertised mbap length {length} exceeds the packet limit"),
            ));
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src[..total].to_vec();
        src.advance(total);
        Ok(Some(frame))
    }
}

impl Encoder<Vec<u8>> for MbapCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> io::Result<()> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// [`DataIo`] over a `TcpStream`, framed by [`MbapCodec`].
#[derive(Debug)]
pub struct TcpDataIo {
    read: FramedRead<OwnedReadHalf, MbapCodec>,
    write: FramedWrite<OwnedWriteHalf, MbapCodec>,
}

impl TcpDataIo {
    pub fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        TcpDataIo {
            read: FramedRead::new(read, MbapCodec),
            write: FramedWrite::new(write, MbapCodec),
        }
    }

    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(TcpDataIo::new(stream))
    }
}

impl DataIo for TcpDataIo {
    const TRANSPORT: Transport = Transport::Tcp;

    async fn read_bytes(&mut self, max_wait: Duration) -> io::Result<Vec<u8>> {
        match timeout(max_wait, self.read.next()).await {
            // Deadline lapsed; the caller decides whether that is fatal.
            Err(_) => Ok(Vec::new()),
            Ok(None) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )),
            Ok(Some(frame)) => {
                let frame = frame?;
                trace!("framed {} inbound bytes", frame.len());
                Ok(frame)
            }
        }
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write.send(bytes.to_vec()).await
    }
}

/// Serves `unit`'s register map to one connection after another until the
/// listener fails. The layout starts from `L::default()`; peers mutate it
/// through write requests.
pub async fn serve<L: Layout>(listener: TcpListener, unit: u8) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("accepted modbus tcp connection from {peer}");
        let mut actor: ModbusActor<L, TcpDataIo> = ModbusActor::new(unit, TcpDataIo::new(stream));

        loop {
            match actor.poll_update_state(Duration::from_secs(60)).await {
                Ok(()) => {}
                Err(Either::Right(cause)) if cause.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!("peer {peer} disconnected");
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
