//! Framed JSON over TCP: the reference network transport.

use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

use crate::proto::{
    ClientToServer, ServerToClient, decode_client_message, decode_server_message,
    encode_client_message, encode_server_message,
};

use super::frame::{FrameReader, FrameWriter};
use super::{
    ClientChannel, Incoming, MessageReader, MessageWriter, ServerConnection, TransportError,
};

/// One accepted server-side TCP connection.
pub struct TcpConnection {
    stream: TcpStream,
    max_frame_bytes: usize,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, max_frame_bytes: usize) -> Self {
        Self {
            stream,
            max_frame_bytes,
        }
    }
}

impl ServerConnection for TcpConnection {
    type Reader = TcpReader;
    type Writer = TcpWriter;

    fn split(self) -> Result<(Self::Reader, Self::Writer), TransportError> {
        // The listener may be nonblocking; the session stream must not be.
        self.stream.set_nonblocking(false)?;
        self.stream.set_nodelay(true)?;
        let read_half = self.stream.try_clone()?;
        Ok((
            TcpReader {
                frames: FrameReader::new(read_half, self.max_frame_bytes),
            },
            TcpWriter {
                frames: FrameWriter::new(self.stream, self.max_frame_bytes),
            },
        ))
    }

    fn peer(&self) -> String {
        self.stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

pub struct TcpReader {
    frames: FrameReader<TcpStream>,
}

impl MessageReader for TcpReader {
    fn read_message(&mut self) -> Result<Option<ClientToServer>, TransportError> {
        let Some(bytes) = self.frames.read_next()? else {
            return Ok(None);
        };
        Ok(Some(decode_client_message(&bytes)?))
    }
}

pub struct TcpWriter {
    frames: FrameWriter<TcpStream>,
}

impl MessageWriter for TcpWriter {
    fn write_message(&mut self, msg: &ServerToClient) -> Result<(), TransportError> {
        let bytes = encode_server_message(msg)?;
        self.frames.write_frame(&bytes)?;
        Ok(())
    }
}

/// Client endpoint over TCP. A reader thread decodes inbound frames into a
/// channel; sends write frames directly.
pub struct TcpClientChannel {
    writer: FrameWriter<TcpStream>,
    rx: Receiver<Incoming>,
}

impl TcpClientChannel {
    pub fn connect(addr: impl ToSocketAddrs, max_frame_bytes: usize) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let read_half = stream.try_clone()?;

        let (tx, rx) = unbounded();
        thread::spawn(move || {
            run_reader_loop(FrameReader::new(read_half, max_frame_bytes), tx);
        });

        Ok(Self {
            writer: FrameWriter::new(stream, max_frame_bytes),
            rx,
        })
    }
}

impl ClientChannel for TcpClientChannel {
    fn send(&mut self, msg: &ClientToServer) -> Result<(), TransportError> {
        let bytes = encode_client_message(msg)?;
        self.writer.write_frame(&bytes)?;
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<Incoming>, TransportError> {
        match self.rx.try_recv() {
            Ok(incoming) => Ok(Some(incoming)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Incoming>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(incoming) => Ok(Some(incoming)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

/// Decodes frames until the stream closes. A frame that fails message
/// decoding is surfaced as `Malformed` and the stream keeps going; framing
/// and io errors end the session.
fn run_reader_loop(mut frames: FrameReader<TcpStream>, tx: Sender<Incoming>) {
    loop {
        match frames.read_next() {
            Ok(Some(bytes)) => {
                let incoming = match decode_server_message(&bytes) {
                    Ok(msg) => Incoming::Message(msg),
                    Err(err) => Incoming::Malformed(err.to_string()),
                };
                if tx.send(incoming).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!("client reader stopped: {err}");
                break;
            }
        }
    }
}
