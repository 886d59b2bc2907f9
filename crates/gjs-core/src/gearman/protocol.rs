//! Gearman binary protocol framing: packet types, the 12-byte header, and
//! NUL-separated argument encoding/decoding.
//!
//! Frame layout: 4-byte magic (`\0REQ` from a client, `\0RES` from a
//! server), 4-byte big-endian packet type, 4-byte big-endian payload size,
//! followed by that many bytes of payload. Payload arguments are separated
//! by a single `\0`; the final argument (the job payload itself) may
//! contain embedded NULs and is never split further.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{JobError, JobResult};

const MAGIC_REQ: &[u8; 4] = b"\0REQ";
const MAGIC_RES: &[u8; 4] = b"\0RES";

/// Direction a packet travels, which determines its magic bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Magic {
    Req,
    Res,
}

impl Magic {
    fn bytes(self) -> &'static [u8; 4] {
        match self {
            Magic::Req => MAGIC_REQ,
            Magic::Res => MAGIC_RES,
        }
    }

    fn from_bytes(bytes: &[u8; 4]) -> JobResult<Magic> {
        if bytes == MAGIC_REQ {
            Ok(Magic::Req)
        } else if bytes == MAGIC_RES {
            Ok(Magic::Res)
        } else {
            Err(JobError::Queue(format!("bad packet magic: {bytes:?}")))
        }
    }
}

/// The subset of Gearman packet types this crate sends or receives. Numeric
/// values match the wire protocol exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    CanDo = 1,
    CantDo = 2,
    ResetAbilities = 3,
    PreSleep = 4,
    Noop = 6,
    SubmitJob = 7,
    JobCreated = 8,
    GrabJob = 9,
    NoJob = 10,
    JobAssign = 11,
    WorkStatus = 12,
    WorkComplete = 13,
    WorkFail = 14,
    GetStatus = 15,
    EchoReq = 16,
    EchoRes = 17,
    SubmitJobBg = 18,
    Error = 19,
    StatusRes = 20,
    SubmitJobHigh = 21,
    CanDoTimeout = 23,
    WorkException = 25,
    WorkData = 28,
    WorkWarning = 29,
    SubmitJobHighBg = 32,
    SubmitJobLow = 33,
    SubmitJobLowBg = 34,
}

impl PacketType {
    fn from_u32(v: u32) -> JobResult<PacketType> {
        use PacketType::*;
        Ok(match v {
            1 => CanDo,
            2 => CantDo,
            3 => ResetAbilities,
            4 => PreSleep,
            6 => Noop,
            7 => SubmitJob,
            8 => JobCreated,
            9 => GrabJob,
            10 => NoJob,
            11 => JobAssign,
            12 => WorkStatus,
            13 => WorkComplete,
            14 => WorkFail,
            15 => GetStatus,
            16 => EchoReq,
            17 => EchoRes,
            18 => SubmitJobBg,
            19 => Error,
            20 => StatusRes,
            21 => SubmitJobHigh,
            23 => CanDoTimeout,
            25 => WorkException,
            28 => WorkData,
            29 => WorkWarning,
            32 => SubmitJobHighBg,
            33 => SubmitJobLow,
            34 => SubmitJobLowBg,
            other => return Err(JobError::Queue(format!("unknown packet type {other}"))),
        })
    }
}

/// A single decoded Gearman packet: its type plus its NUL-separated (except
/// for the last one) argument fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub args: Vec<Vec<u8>>,
}

impl Packet {
    pub fn new(kind: PacketType, args: Vec<Vec<u8>>) -> Self {
        Self { kind, args }
    }

    /// Convenience for building a packet from string arguments, with the
    /// final argument passed as raw bytes (job payloads are not UTF-8).
    pub fn with_payload(kind: PacketType, strings: &[&str], payload: &[u8]) -> Self {
        let mut args: Vec<Vec<u8>> = strings.iter().map(|s| s.as_bytes().to_vec()).collect();
        args.push(payload.to_vec());
        Self { kind, args }
    }

    fn encode(&self, magic: Magic) -> Vec<u8> {
        let mut body = BytesMut::new();
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                body.put_u8(0);
            }
            body.put_slice(arg);
        }

        let mut out = BytesMut::with_capacity(12 + body.len());
        out.put_slice(magic.bytes());
        out.put_u32(self.kind as u32);
        out.put_u32(body.len() as u32);
        out.put_slice(&body);
        out.to_vec()
    }
}

/// Writes a packet to an async writer with the given magic (`Req` for
/// client-originated packets, `Res` for worker replies).
pub async fn write_packet<W>(writer: &mut W, magic: Magic, packet: &Packet) -> JobResult<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    writer
        .write_all(&packet.encode(magic))
        .await
        .map_err(|e| JobError::Queue(format!("write failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| JobError::Queue(format!("flush failed: {e}")))
}

/// Reads one complete packet from an async reader, splitting its payload on
/// `\0` into argument fields. The number of arguments a given packet type
/// carries is fixed by the protocol; callers that need the "last argument
/// may contain embedded NULs" rule (job payloads) re-join trailing fields
/// via [`rejoin_tail`].
pub async fn read_packet<R>(reader: &mut R) -> JobResult<(Magic, Packet)>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut header = [0u8; 12];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| JobError::Queue(format!("read header failed: {e}")))?;

    let magic = Magic::from_bytes(header[0..4].try_into().unwrap())?;
    let kind_raw = u32::from_be_bytes(header[4..8].try_into().unwrap());
    let size = u32::from_be_bytes(header[8..12].try_into().unwrap()) as usize;
    let kind = PacketType::from_u32(kind_raw)?;

    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| JobError::Queue(format!("read body failed: {e}")))?;

    let args: Vec<Vec<u8>> = body
        .split(|b| *b == 0)
        .map(|chunk| chunk.to_vec())
        .collect();

    Ok((magic, Packet { kind, args }))
}

/// Joins argument fields `from..` back together with `\0`, used to recover a
/// payload argument that itself happened to contain NUL bytes and was split
/// further than intended by [`read_packet`]'s naive split.
pub fn rejoin_tail(args: &[Vec<u8>], from: usize) -> Vec<u8> {
    args[from..].join(&0u8)
}

pub fn arg_str(args: &[Vec<u8>], idx: usize) -> JobResult<String> {
    args.get(idx)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or_else(|| JobError::Queue(format!("missing packet argument {idx}")))
}
