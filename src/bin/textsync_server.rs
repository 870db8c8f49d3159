//! Text-sync server: the desktop peer of the serial text editor demo.
//!
//! Keeps an authoritative text buffer and syncs it with one connected peer
//! at a time over a tiny length-prefixed delta protocol. Every message is a
//! 4-byte big-endian opcode followed by opcode-specific fields; strings are
//! u16-big-endian byte length plus UTF-8 bytes. The protocol is a closed,
//! two-party toy with no framing recovery and no acknowledgements; a
//! malformed message tears the session down and the server waits for the
//! next one.
//!
//! Run with: cargo run --bin textsync_server -- 4440

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Wire protocol
//
//   opcode 1 INSERT       u32 offset, string
//   opcode 2 REMOVE       u32 offset, u32 count
//   opcode 3 CHANGE       u32 offset, u32 count, string
//   opcode 4 JUST_OPEN    -
//   opcode 5 CONTENTS     string
//   opcode 6 NO_CONTENTS  -
//
// Offsets and counts address characters, not bytes.
// ============================================================================

const OP_INSERT: u32 = 1;
const OP_REMOVE: u32 = 2;
const OP_CHANGE: u32 = 3;
const OP_JUST_OPEN: u32 = 4;
const OP_CONTENTS: u32 = 5;
const OP_NO_CONTENTS: u32 = 6;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOp {
    Insert { offset: u32, text: String },
    Remove { offset: u32, count: u32 },
    Change { offset: u32, count: u32, text: String },
    JustOpen,
    Contents { text: String },
    NoContents,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown opcode {0}")]
    BadOpcode(u32),

    #[error("string field is not valid UTF-8")]
    BadUtf8,

    #[error("message truncated reading {what}: expected {expected} bytes, found {found}")]
    Truncated {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

/// Fills `buf` completely, reporting exactly how far a truncated stream got.
fn read_field(
    stream: &mut impl Read,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), SyncError> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(SyncError::Truncated {
                    what,
                    expected: buf.len(),
                    found: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SyncError::Io(e)),
        }
    }
    Ok(())
}

fn read_u32(stream: &mut impl Read, what: &'static str) -> Result<u32, SyncError> {
    let mut buf = [0u8; 4];
    read_field(stream, &mut buf, what)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_string(stream: &mut impl Read) -> Result<String, SyncError> {
    let mut len_buf = [0u8; 2];
    read_field(stream, &mut len_buf, "string length")?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut bytes = vec![0u8; len];
    read_field(stream, &mut bytes, "string bytes")?;
    String::from_utf8(bytes).map_err(|_| SyncError::BadUtf8)
}

/// Reads one message. `Ok(None)` means the peer closed the stream cleanly
/// between messages; truncation mid-message is an error.
pub fn read_op(stream: &mut impl Read) -> Result<Option<SyncOp>, SyncError> {
    let mut opcode_buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        match stream.read(&mut opcode_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(SyncError::Truncated {
                    what: "opcode",
                    expected: 4,
                    found: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SyncError::Io(e)),
        }
    }
    let op = match u32::from_be_bytes(opcode_buf) {
        OP_INSERT => SyncOp::Insert {
            offset: read_u32(stream, "insert offset")?,
            text: read_string(stream)?,
        },
        OP_REMOVE => SyncOp::Remove {
            offset: read_u32(stream, "remove offset")?,
            count: read_u32(stream, "remove count")?,
        },
        OP_CHANGE => SyncOp::Change {
            offset: read_u32(stream, "change offset")?,
            count: read_u32(stream, "change count")?,
            text: read_string(stream)?,
        },
        OP_JUST_OPEN => SyncOp::JustOpen,
        OP_CONTENTS => SyncOp::Contents {
            text: read_string(stream)?,
        },
        OP_NO_CONTENTS => SyncOp::NoContents,
        other => return Err(SyncError::BadOpcode(other)),
    };
    Ok(Some(op))
}

fn write_string(out: &mut Vec<u8>, text: &str) -> io::Result<()> {
    if text.len() > u16::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "string field exceeds u16 length prefix",
        ));
    }
    out.extend_from_slice(&(text.len() as u16).to_be_bytes());
    out.extend_from_slice(text.as_bytes());
    Ok(())
}

pub fn encode_op(op: &SyncOp) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    match op {
        SyncOp::Insert { offset, text } => {
            out.extend_from_slice(&OP_INSERT.to_be_bytes());
            out.extend_from_slice(&offset.to_be_bytes());
            write_string(&mut out, text)?;
        }
        SyncOp::Remove { offset, count } => {
            out.extend_from_slice(&OP_REMOVE.to_be_bytes());
            out.extend_from_slice(&offset.to_be_bytes());
            out.extend_from_slice(&count.to_be_bytes());
        }
        SyncOp::Change {
            offset,
            count,
            text,
        } => {
            out.extend_from_slice(&OP_CHANGE.to_be_bytes());
            out.extend_from_slice(&offset.to_be_bytes());
            out.extend_from_slice(&count.to_be_bytes());
            write_string(&mut out, text)?;
        }
        SyncOp::JustOpen => out.extend_from_slice(&OP_JUST_OPEN.to_be_bytes()),
        SyncOp::Contents { text } => {
            out.extend_from_slice(&OP_CONTENTS.to_be_bytes());
            write_string(&mut out, text)?;
        }
        SyncOp::NoContents => out.extend_from_slice(&OP_NO_CONTENTS.to_be_bytes()),
    }
    Ok(out)
}

pub fn write_op(stream: &mut impl Write, op: &SyncOp) -> io::Result<()> {
    let bytes = encode_op(op)?;
    stream.write_all(&bytes)?;
    stream.flush()
}

// ============================================================================
// Text buffer with char-offset edits
// ============================================================================

#[derive(Debug, Error, PartialEq)]
#[error("edit at char {offset} (count {count}) exceeds buffer of {len} chars")]
pub struct OutOfRange {
    pub offset: usize,
    pub count: usize,
    pub len: usize,
}

/// Byte index of the `char_offset`-th character, or of the end when
/// `char_offset` equals the char count. None when past the end.
fn byte_index(s: &str, char_offset: usize) -> Option<usize> {
    s.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(s.len()))
        .nth(char_offset)
}

/// Applies a delta to `buffer` in place. JUST_OPEN and NO_CONTENTS carry no
/// edit and are handled by the session loop, not here.
pub fn apply_op(buffer: &mut String, op: &SyncOp) -> Result<(), OutOfRange> {
    let char_len = buffer.chars().count();
    let oob = |offset: u32, count: u32| OutOfRange {
        offset: offset as usize,
        count: count as usize,
        len: char_len,
    };
    match op {
        SyncOp::Insert { offset, text } => {
            let at = byte_index(buffer, *offset as usize).ok_or_else(|| oob(*offset, 0))?;
            buffer.insert_str(at, text);
        }
        SyncOp::Remove { offset, count } => {
            // The wire can claim offset + count past u32; a wrapped sum would
            // slip back into range.
            let end_chars = offset.checked_add(*count).ok_or_else(|| oob(*offset, *count))?;
            let start = byte_index(buffer, *offset as usize).ok_or_else(|| oob(*offset, *count))?;
            let end =
                byte_index(buffer, end_chars as usize).ok_or_else(|| oob(*offset, *count))?;
            buffer.replace_range(start..end, "");
        }
        SyncOp::Change {
            offset,
            count,
            text,
        } => {
            let end_chars = offset.checked_add(*count).ok_or_else(|| oob(*offset, *count))?;
            let start = byte_index(buffer, *offset as usize).ok_or_else(|| oob(*offset, *count))?;
            let end =
                byte_index(buffer, end_chars as usize).ok_or_else(|| oob(*offset, *count))?;
            buffer.replace_range(start..end, text);
        }
        SyncOp::Contents { text } => *buffer = text.clone(),
        SyncOp::JustOpen | SyncOp::NoContents => {}
    }
    Ok(())
}

// ============================================================================
// Session loop
// ============================================================================

fn run_session(stream: &mut TcpStream, buffer: &mut String) -> Result<(), SyncError> {
    let session = Uuid::new_v4();
    let peer = stream.peer_addr()?;
    info!(%session, %peer, "session opened");

    loop {
        let op = match read_op(stream)? {
            Some(op) => op,
            None => {
                info!(%session, "peer closed the session");
                return Ok(());
            }
        };
        match &op {
            SyncOp::JustOpen => {
                // A fresh peer asks what we have.
                let reply = if buffer.is_empty() {
                    SyncOp::NoContents
                } else {
                    SyncOp::Contents {
                        text: buffer.clone(),
                    }
                };
                write_op(stream, &reply)?;
                info!(%session, reply = op_name(&reply), "answered JUST_OPEN");
            }
            SyncOp::NoContents => {
                info!(%session, "peer reports an empty editor");
            }
            edit => match apply_op(buffer, edit) {
                Ok(()) => {
                    info!(%session, op = op_name(edit), chars = buffer.chars().count(), "applied");
                    println!("buffer now: {:?}", buffer);
                }
                Err(e) => {
                    // A bad offset is an application-level mistake; the
                    // session survives, the op is refused.
                    warn!(%session, error = %e, "refused edit");
                }
            },
        }
    }
}

fn op_name(op: &SyncOp) -> &'static str {
    match op {
        SyncOp::Insert { .. } => "INSERT",
        SyncOp::Remove { .. } => "REMOVE",
        SyncOp::Change { .. } => "CHANGE",
        SyncOp::JustOpen => "JUST_OPEN",
        SyncOp::Contents { .. } => "CONTENTS",
        SyncOp::NoContents => "NO_CONTENTS",
    }
}

fn serve(port: u16) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!(port, "text-sync server listening");
    println!("text-sync server on port {}", port);
    println!("connect with: cargo run --bin textsync_client -- 127.0.0.1:{}", port);

    // The buffer outlives sessions: a reconnecting peer gets the text back.
    let mut buffer = String::new();

    // One session at a time; the next connection waits in the backlog.
    for stream in listener.incoming() {
        match stream {
            Ok(mut stream) => {
                if let Err(e) = run_session(&mut stream, &mut buffer) {
                    error!(error = %e, "session aborted");
                }
            }
            Err(e) => error!(error = %e, "accept failed"),
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let port = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(4440u16);

    if let Err(e) = serve(port) {
        eprintln!("server error: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
