//! IPC endpoint (component N): a 12-byte binary-framed request/response
//! protocol over a Unix domain stream socket, used by `wire-cli` to talk
//! to a running supervisor.
//!
//! Frame layout, all integers little-endian: `magic: u32 = 0x45524957`
//! (`"WIRE"`), `kind: u8`, `reserved: [u8; 3]`, `payload_len: u32`,
//! followed by `payload_len` bytes of payload. Requests with no payload
//! (`status`, `reload`, `stop`, `state`) send `payload_len = 0`; `diff`
//! carries the candidate config path as its UTF-8 payload.

use std::path::PathBuf;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

pub const DEFAULT_SOCKET_PATH: &str = "/run/wire.sock";
const MAGIC: u32 = 0x4552_4957;
const HEADER_LEN: usize = 12;
const MAX_PAYLOAD: u32 = 16 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad magic number 0x{0:08x}")]
    BadMagic(u32),

    #[error("unknown frame kind {0}")]
    UnknownKind(u8),

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(u32),

    #[error("socket {0:?} not reachable: {1}")]
    Unreachable(PathBuf, std::io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Status,
    Diff,
    Reload,
    Stop,
    State,
}

impl RequestKind {
    fn as_u8(self) -> u8 {
        match self {
            RequestKind::Status => 0,
            RequestKind::Diff => 1,
            RequestKind::Reload => 2,
            RequestKind::Stop => 3,
            RequestKind::State => 4,
        }
    }

    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(RequestKind::Status),
            1 => Some(RequestKind::Diff),
            2 => Some(RequestKind::Reload),
            3 => Some(RequestKind::Stop),
            4 => Some(RequestKind::State),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseKind {
    Status,
    Diff,
    Reload,
    Stop,
    State,
    Error,
}

impl ResponseKind {
    fn as_u8(self) -> u8 {
        match self {
            ResponseKind::Status => 0,
            ResponseKind::Diff => 1,
            ResponseKind::Reload => 2,
            ResponseKind::Stop => 3,
            ResponseKind::State => 4,
            ResponseKind::Error => 5,
        }
    }

    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(ResponseKind::Status),
            1 => Some(ResponseKind::Diff),
            2 => Some(ResponseKind::Reload),
            3 => Some(ResponseKind::Stop),
            4 => Some(ResponseKind::State),
            5 => Some(ResponseKind::Error),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Request {
    pub kind: RequestKind,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(kind: RequestKind) -> Self {
        Self { kind, payload: Vec::new() }
    }

    pub fn with_payload(kind: RequestKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    pub kind: ResponseKind,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn new(kind: ResponseKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { kind: ResponseKind::Error, payload: message.into().into_bytes() }
    }
}

fn encode_header(kind: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    LittleEndian::write_u32(&mut header[0..4], MAGIC);
    header[4] = kind;
    LittleEndian::write_u32(&mut header[8..12], payload_len);
    header
}

fn decode_header(header: &[u8; HEADER_LEN]) -> Result<(u8, u32), IpcError> {
    let magic = LittleEndian::read_u32(&header[0..4]);
    if magic != MAGIC {
        return Err(IpcError::BadMagic(magic));
    }
    let kind = header[4];
    let payload_len = LittleEndian::read_u32(&header[8..12]);
    if payload_len > MAX_PAYLOAD {
        return Err(IpcError::PayloadTooLarge(payload_len));
    }
    Ok((kind, payload_len))
}

async fn write_frame(stream: &mut UnixStream, kind: u8, payload: &[u8]) -> Result<(), IpcError> {
    let header = encode_header(kind, payload.len() as u32);
    stream.write_all(&header).await?;
    if !payload.is_empty() {
        stream.write_all(payload).await?;
    }
    stream.flush().await?;
    Ok(())
}

async fn read_frame(stream: &mut UnixStream) -> Result<(u8, Vec<u8>), IpcError> {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let (kind, payload_len) = decode_header(&header)?;
    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        stream.read_exact(&mut payload).await?;
    }
    Ok((kind, payload))
}

/// Client side: connect to `socket_path`, send `request`, and return the
/// decoded response. Used by `wire-cli`.
pub async fn call(socket_path: &std::path::Path, request: Request) -> Result<Response, IpcError> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| IpcError::Unreachable(socket_path.to_path_buf(), e))?;
    write_frame(&mut stream, request.kind.as_u8(), &request.payload).await?;
    let (kind, payload) = read_frame(&mut stream).await?;
    let kind = ResponseKind::from_u8(kind).ok_or(IpcError::UnknownKind(kind))?;
    Ok(Response { kind, payload })
}

/// Server side: bind a fresh listener at `socket_path`, removing any
/// stale socket file left behind by an unclean shutdown.
pub fn bind(socket_path: &std::path::Path) -> Result<UnixListener, IpcError> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    Ok(UnixListener::bind(socket_path)?)
}

/// Accept and decode a single request off an already-accepted stream,
/// leaving the caller to dispatch and reply with [`write_frame`]
/// (exposed here as [`respond`]).
pub async fn accept_request(stream: &mut UnixStream) -> Result<Request, IpcError> {
    let (kind, payload) = read_frame(stream).await?;
    let kind = RequestKind::from_u8(kind).ok_or(IpcError::UnknownKind(kind))?;
    Ok(Request { kind, payload })
}

pub async fn respond(stream: &mut UnixStream, response: Response) -> Result<(), IpcError> {
    write_frame(stream, response.kind.as_u8(), &response.payload).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = encode_header(RequestKind::Diff.as_u8(), 42);
        let (kind, len) = decode_header(&header).unwrap();
        assert_eq!(kind, RequestKind::Diff.as_u8());
        assert_eq!(len, 42);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let header = [0u8; HEADER_LEN];
        assert!(matches!(decode_header(&header), Err(IpcError::BadMagic(0))));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let header = encode_header(0, MAX_PAYLOAD + 1);
        assert!(matches!(decode_header(&header), Err(IpcError::PayloadTooLarge(_))));
    }

    #[test]
    fn request_kind_round_trips_every_variant() {
        for kind in [
            RequestKind::Status,
            RequestKind::Diff,
            RequestKind::Reload,
            RequestKind::Stop,
            RequestKind::State,
        ] {
            assert_eq!(RequestKind::from_u8(kind.as_u8()), Some(kind));
        }
    }

    #[tokio::test]
    async fn client_server_round_trip_over_a_socket_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.sock");
        let listener = bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req = accept_request(&mut stream).await.unwrap();
            assert_eq!(req.kind, RequestKind::Status);
            respond(&mut stream, Response::new(ResponseKind::Status, b"ok".to_vec()))
                .await
                .unwrap();
        });

        let resp = call(&path, Request::new(RequestKind::Status)).await.unwrap();
        assert_eq!(resp.kind, ResponseKind::Status);
        assert_eq!(resp.payload, b"ok");
        server.await.unwrap();
    }
}
