//! Text-sync client: the handheld peer of the serial text editor demo.
//!
//! Connects to a textsync_server, announces itself with JUST_OPEN, adopts
//! whatever CONTENTS comes back, then turns console commands into deltas:
//! each edit is applied to the local buffer first and shipped to the peer as
//! the same op, so both ends replay an identical op stream. A reader thread
//! forwards everything the peer sends into a channel; the REPL drains it
//! between commands, so the buffer itself needs no lock.
//!
//! Run with: cargo run --bin textsync_client -- 127.0.0.1:4440

use std::io::{self, BufRead, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use colored::Colorize;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

// ============================================================================
// Wire protocol (shared with textsync_server)
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

/// `Ok(None)` means the peer closed the stream cleanly between messages.
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
// Local buffer (char-offset edits, mirror of the server's rules)
// ============================================================================

#[derive(Debug, Error, PartialEq)]
#[error("edit at char {offset} (count {count}) exceeds buffer of {len} chars")]
pub struct OutOfRange {
    pub offset: usize,
    pub count: usize,
    pub len: usize,
}

fn byte_index(s: &str, char_offset: usize) -> Option<usize> {
    s.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(s.len()))
        .nth(char_offset)
}

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
// Console commands
// ============================================================================

#[derive(Debug, PartialEq)]
pub enum Command {
    Edit(SyncOp),
    Show,
    Quit,
    Help,
}

/// Parses one REPL line. Edit commands mirror the wire ops:
///
///   i <offset> <text>           insert text at char offset
///   r <offset> <count>          remove count chars
///   c <offset> <count> <text>   replace count chars with text
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim_end();
    let mut parts = line.splitn(2, ' ');
    let verb = parts.next().unwrap_or("");
    match verb {
        "show" => Ok(Command::Show),
        "quit" | "q" => Ok(Command::Quit),
        "help" | "?" => Ok(Command::Help),
        "i" => {
            let rest = parts.next().ok_or("usage: i <offset> <text>")?;
            let (offset, text) = rest
                .split_once(' ')
                .ok_or("usage: i <offset> <text>")?;
            let offset: u32 = offset.parse().map_err(|_| format!("bad offset {:?}", offset))?;
            Ok(Command::Edit(SyncOp::Insert {
                offset,
                text: text.to_string(),
            }))
        }
        "r" => {
            let rest = parts.next().ok_or("usage: r <offset> <count>")?;
            let mut fields = rest.split_whitespace();
            let offset: u32 = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or("usage: r <offset> <count>")?;
            let count: u32 = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or("usage: r <offset> <count>")?;
            Ok(Command::Edit(SyncOp::Remove { offset, count }))
        }
        "c" => {
            let rest = parts.next().ok_or("usage: c <offset> <count> <text>")?;
            let mut fields = rest.splitn(3, ' ');
            let offset: u32 = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or("usage: c <offset> <count> <text>")?;
            let count: u32 = fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or("usage: c <offset> <count> <text>")?;
            let text = fields.next().ok_or("usage: c <offset> <count> <text>")?;
            Ok(Command::Edit(SyncOp::Change {
                offset,
                count,
                text: text.to_string(),
            }))
        }
        other => Err(format!("unknown command {:?} (try help)", other)),
    }
}

fn print_help() {
    println!("commands:");
    println!("  i <offset> <text>           insert text at char offset");
    println!("  r <offset> <count>          remove count chars at offset");
    println!("  c <offset> <count> <text>   replace count chars with text");
    println!("  show                        print the local buffer");
    println!("  quit                        disconnect and exit");
}

// ============================================================================
// Reader thread
// ============================================================================

enum PeerEvent {
    Op(SyncOp),
    Closed,
    Failed(String),
}

/// Forwards every incoming message into the channel. Once the main thread
/// clears `running`, read failures are expected and reported as a clean close.
fn reader_loop(mut stream: TcpStream, events: Sender<PeerEvent>, running: Arc<AtomicBool>) {
    loop {
        match read_op(&mut stream) {
            Ok(Some(op)) => {
                if events.send(PeerEvent::Op(op)).is_err() {
                    return;
                }
            }
            Ok(None) => {
                let _ = events.send(PeerEvent::Closed);
                return;
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    let _ = events.send(PeerEvent::Failed(e.to_string()));
                } else {
                    let _ = events.send(PeerEvent::Closed);
                }
                return;
            }
        }
    }
}

/// Applies queued peer messages. Returns false once the link is gone.
fn drain_events(events: &Receiver<PeerEvent>, buffer: &mut String) -> bool {
    while let Ok(event) = events.try_recv() {
        match event {
            PeerEvent::Op(op) => {
                let name = op_name(&op);
                match apply_op(buffer, &op) {
                    Ok(()) => println!("{} {}", "peer:".cyan(), name),
                    Err(e) => println!("{} refused peer {}: {}", "warning:".yellow(), name, e),
                }
            }
            PeerEvent::Closed => {
                println!("{}", "peer disconnected".yellow());
                return false;
            }
            PeerEvent::Failed(reason) => {
                println!("{} {}", "link failed:".red(), reason);
                return false;
            }
        }
    }
    true
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

// ============================================================================
// Main
// ============================================================================

fn run(addr: &str) -> Result<(), SyncError> {
    let mut stream = TcpStream::connect(addr)?;
    println!("{} {}", "connected to".green(), addr);

    let running = Arc::new(AtomicBool::new(true));
    let (tx, events) = unbounded();
    let reader = {
        let stream = stream.try_clone()?;
        let running = Arc::clone(&running);
        thread::spawn(move || reader_loop(stream, tx, running))
    };

    let mut buffer = String::new();

    // Handshake: ask the server what it has.
    write_op(&mut stream, &SyncOp::JustOpen)?;
    match events.recv_timeout(Duration::from_secs(2)) {
        Ok(PeerEvent::Op(SyncOp::Contents { text })) => {
            println!("{} {} chars", "adopted server buffer:".green(), text.chars().count());
            buffer = text;
        }
        Ok(PeerEvent::Op(SyncOp::NoContents)) => {
            println!("{}", "server buffer is empty".green());
        }
        Ok(PeerEvent::Op(other)) => {
            println!("{} {}", "unexpected handshake reply:".yellow(), op_name(&other));
        }
        Ok(PeerEvent::Closed) | Ok(PeerEvent::Failed(_)) => {
            println!("{}", "server went away during handshake".red());
            running.store(false, Ordering::SeqCst);
            let _ = reader.join();
            return Ok(());
        }
        Err(RecvTimeoutError::Timeout) => {
            println!("{}", "no handshake reply within 2s, continuing".yellow());
        }
        Err(RecvTimeoutError::Disconnected) => return Ok(()),
    }

    print_help();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        if !drain_events(&events, &mut buffer) {
            break;
        }
        print!("> ");
        io::stdout().flush()?;
        let line = match lines.next() {
            Some(line) => line?,
            None => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(Command::Show) => println!("[{} chars] {:?}", buffer.chars().count(), buffer),
            Ok(Command::Help) => print_help(),
            Ok(Command::Quit) => break,
            Ok(Command::Edit(op)) => match apply_op(&mut buffer, &op) {
                Ok(()) => {
                    write_op(&mut stream, &op)?;
                    println!("{} {}", "synced".green(), op_name(&op));
                }
                Err(e) => println!("{} {}", "refused:".red(), e),
            },
            Err(usage) => println!("{} {}", "error:".red(), usage),
        }
    }

    running.store(false, Ordering::SeqCst);
    let _ = stream.shutdown(Shutdown::Both);
    let _ = reader.join();
    println!("bye");
    Ok(())
}

fn main() {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4440".to_string());
    if let Err(e) = run(&addr) {
        eprintln!("client error: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn commands_parse_into_ops() {
        assert_eq!(
            parse_command("i 5 hello world").unwrap(),
            Command::Edit(SyncOp::Insert {
                offset: 5,
                text: "hello world".into()
            })
        );
        assert_eq!(
            parse_command("r 0 3").unwrap(),
            Command::Edit(SyncOp::Remove {
                offset: 0,
                count: 3
            })
        );
        assert_eq!(
            parse_command("c 2 4 new text").unwrap(),
            Command::Edit(SyncOp::Change {
                offset: 2,
                count: 4,
                text: "new text".into()
            })
        );
        assert_eq!(parse_command("show").unwrap(), Command::Show);
        assert_eq!(parse_command("quit").unwrap(), Command::Quit);
        assert_eq!(parse_command("q").unwrap(), Command::Quit);
        assert_eq!(parse_command("help").unwrap(), Command::Help);
    }

    #[test]
    fn malformed_commands_explain_usage() {
        assert!(parse_command("i").is_err());
        assert!(parse_command("i five text").is_err());
        assert!(parse_command("r 1").is_err());
        assert!(parse_command("c 1 2").is_err());
        assert!(parse_command("frobnicate").is_err());
    }

    #[test]
    fn insert_text_may_contain_spaces() {
        match parse_command("i 0 a b  c").unwrap() {
            Command::Edit(SyncOp::Insert { text, .. }) => assert_eq!(text, "a b  c"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn handshake_replies_set_the_buffer() {
        let mut buffer = String::new();
        apply_op(&mut buffer, &SyncOp::NoContents).unwrap();
        assert_eq!(buffer, "");

        apply_op(
            &mut buffer,
            &SyncOp::Contents {
                text: "server copy".into(),
            },
        )
        .unwrap();
        assert_eq!(buffer, "server copy");
    }

    #[test]
    fn command_pipeline_matches_local_edit() {
        // What the REPL does locally must equal what the peer decodes.
        let mut local = String::from("hello");
        let mut remote = String::from("hello");

        for line in ["i 5  there", "c 0 5 goodbye", "r 7 6"] {
            let op = match parse_command(line).unwrap() {
                Command::Edit(op) => op,
                other => panic!("unexpected: {:?}", other),
            };
            apply_op(&mut local, &op).unwrap();
            let bytes = encode_op(&op).unwrap();
            let decoded = read_op(&mut Cursor::new(bytes)).unwrap().unwrap();
            apply_op(&mut remote, &decoded).unwrap();
        }
        assert_eq!(local, remote);
        assert_eq!(local, "goodbye");
    }

    #[test]
    fn multibyte_text_round_trips_with_char_offsets() {
        let op = SyncOp::Insert {
            offset: 2,
            text: "日本語".into(),
        };
        let bytes = encode_op(&op).unwrap();
        let decoded = read_op(&mut Cursor::new(bytes)).unwrap().unwrap();
        assert_eq!(decoded, op);

        let mut buffer = String::from("ab");
        apply_op(&mut buffer, &decoded).unwrap();
        assert_eq!(buffer, "ab日本語");
    }

    #[test]
    fn offsets_past_the_end_are_refused_locally() {
        let mut buffer = String::from("ab");
        let err = apply_op(
            &mut buffer,
            &SyncOp::Remove {
                offset: 1,
                count: 9,
            },
        )
        .unwrap_err();
        assert_eq!(err.len, 2);
        assert_eq!(buffer, "ab");
    }

    #[test]
    fn overflowing_counts_are_refused_locally() {
        // A peer can ship counts whose sum with the offset wraps u32.
        let mut buffer = String::from("ab");
        assert!(apply_op(
            &mut buffer,
            &SyncOp::Remove {
                offset: 1,
                count: u32::MAX,
            }
        )
        .is_err());
        assert!(apply_op(
            &mut buffer,
            &SyncOp::Change {
                offset: 1,
                count: u32::MAX,
                text: "x".into(),
            }
        )
        .is_err());
        assert_eq!(buffer, "ab");
    }
}
