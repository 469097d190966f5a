//! Request/response transport.
//!
//! The dispatcher needs exactly one thing from a transport: deliver an
//! input record, accept an output record. The concrete framing here is
//! a length prefix plus a JSON body, which keeps the records printable
//! when a session has to be debugged by hand.

use crate::errors::{errno_h2rpc, TarpcError, TarpcResult};
use crate::tarpc::{Request, Response};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

pub trait RpcTransport: Send {
    /// Next input record, or None once the peer has hung up.
    fn recv_request(&mut self) -> TarpcResult<Option<Request>>;
    fn send_response(&mut self, resp: &Response) -> TarpcResult<()>;
}

fn io_err(e: std::io::Error) -> TarpcError {
    TarpcError::Os(errno_h2rpc(e.raw_os_error().unwrap_or(libc::EIO)))
}

/// Upper bound on one frame. The largest records carry a traffic
/// buffer, far below this; anything bigger is a corrupt header.
const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Framed serde_json over any byte stream.
pub struct JsonTransport<S> {
    stream: S,
}

impl<S: Read + Write> JsonTransport<S> {
    pub fn new(stream: S) -> JsonTransport<S> {
        JsonTransport { stream }
    }

    fn recv_frame(&mut self) -> TarpcResult<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        let mut got = 0;
        while got < 4 {
            match self.stream.read(&mut len_buf[got..]).map_err(io_err)? {
                0 if got == 0 => return Ok(None),
                0 => {
                    return Err(TarpcError::Corrupted(
                        "connection closed inside a frame header".to_owned(),
                    ))
                }
                n => got += n,
            }
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME {
            return Err(TarpcError::Corrupted(format!(
                "frame header claims {} bytes",
                len
            )));
        }
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).map_err(io_err)?;
        Ok(Some(body))
    }

    fn send_frame(&mut self, body: &[u8]) -> TarpcResult<()> {
        let len = (body.len() as u32).to_be_bytes();
        self.stream.write_all(&len).map_err(io_err)?;
        self.stream.write_all(body).map_err(io_err)?;
        self.stream.flush().map_err(io_err)
    }

    // Peer-side half, used by the config plane and the tests.

    pub fn send_request(&mut self, req: &Request) -> TarpcResult<()> {
        let body = serde_json::to_vec(req)
            .map_err(|e| TarpcError::InvalidArgument(e.to_string()))?;
        self.send_frame(&body)
    }

    pub fn recv_response(&mut self) -> TarpcResult<Response> {
        match self.recv_frame()? {
            None => Err(TarpcError::Corrupted(
                "server hung up before answering".to_owned(),
            )),
            Some(body) => serde_json::from_slice(&body)
                .map_err(|e| TarpcError::Corrupted(e.to_string())),
        }
    }

    /// One full round trip.
    pub fn call(&mut self, req: &Request) -> TarpcResult<Response> {
        self.send_request(req)?;
        self.recv_response()
    }
}

impl<S: Read + Write + Send> RpcTransport for JsonTransport<S> {
    fn recv_request(&mut self) -> TarpcResult<Option<Request>> {
        match self.recv_frame()? {
            None => Ok(None),
            Some(body) => serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| TarpcError::InvalidArgument(e.to_string())),
        }
    }

    fn send_response(&mut self, resp: &Response) -> TarpcResult<()> {
        let body = serde_json::to_vec(resp)
            .map_err(|e| TarpcError::InvalidArgument(e.to_string()))?;
        self.send_frame(&body)
    }
}

/// Connected loopback pair: server side, peer side.
pub fn loopback() -> TarpcResult<(JsonTransport<UnixStream>, JsonTransport<UnixStream>)> {
    let (a, b) = UnixStream::pair().map_err(io_err)?;
    Ok((JsonTransport::new(a), JsonTransport::new(b)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tarpc::{SocketIn, VoidIn};

    #[test]
    fn request_frames_round_trip() {
        let (mut server, mut peer) = loopback().unwrap();
        peer.send_request(&Request::Socket(SocketIn::default()))
            .unwrap();
        match server.recv_request().unwrap() {
            Some(Request::Socket(_)) => {}
            other => panic!("unexpected {:?}", other),
        }

        server
            .send_response(&Request::Getpid(VoidIn::default()).empty_response())
            .unwrap();
        match peer.recv_response().unwrap() {
            Response::Getpid(_) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn hangup_is_end_of_requests() {
        let (mut server, peer) = loopback().unwrap();
        drop(peer);
        assert!(server.recv_request().unwrap().is_none());
    }

    #[test]
    fn oversized_frame_header_is_rejected() {
        let (mut server, peer) = loopback().unwrap();
        let header = (u32::max_value()).to_be_bytes();
        (&peer.stream).write_all(&header).unwrap();
        match server.recv_request() {
            Err(TarpcError::Corrupted(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
