//! SMS loopback server and test sender.
//!
//! A desktop stand-in for an SMS center: it listens for toy SMS datagrams
//! over UDP, parses them field by field at fixed byte offsets, and bounces
//! each message back to its sender with the source and destination
//! addresses swapped.
//!
//! Run with: cargo run --bin sms_loopback -- serve 7072
//! Then:     cargo run --bin sms_loopback -- send 127.0.0.1:7072 5550100 5550199 "hello"

use std::net::UdpSocket;
use std::time::Duration;

use colored::Colorize;
use thiserror::Error;
use tracing::{info, warn};

/// Protocol version stamped into byte 0 of every packet.
const SMS_VERSION: u8 = 0x01;
/// Header length before the user data begins.
const HEADER_LEN: usize = 26;
/// Address fields are exactly this many bytes, NUL padded.
const ADDR_LEN: usize = 10;
/// User data is capped the way real short messages are.
const MAX_USER_DATA: usize = 140;

// ============================================================================
// Packet layout
//
// [0]       version (0x01)
// [1]       kind: 0x01 SUBMIT, 0x02 DELIVER
// [2..4]    message id, u16 big-endian
// [4..14]   source address, ASCII digits, NUL padded
// [14..24]  destination address, ASCII digits, NUL padded
// [24]      encoding: 0x00 ASCII, 0x01 UTF-8
// [25]      user data length N (0..=140)
// [26..26+N] user data
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsKind {
    Submit,
    Deliver,
}

impl SmsKind {
    fn to_byte(self) -> u8 {
        match self {
            SmsKind::Submit => 0x01,
            SmsKind::Deliver => 0x02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmsEncoding {
    Ascii,
    Utf8,
}

impl SmsEncoding {
    fn to_byte(self) -> u8 {
        match self {
            SmsEncoding::Ascii => 0x00,
            SmsEncoding::Utf8 => 0x01,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SmsParseError {
    #[error("packet too short: expected at least {expected} bytes, found {found}")]
    TooShort { expected: usize, found: usize },

    #[error("unsupported version 0x{0:02X}")]
    BadVersion(u8),

    #[error("unknown message kind 0x{0:02X}")]
    BadKind(u8),

    #[error("unknown encoding 0x{0:02X}")]
    BadEncoding(u8),

    #[error("user data length {declared} overruns packet ({available} bytes available)")]
    LengthOverrun { declared: usize, available: usize },

    #[error("user data length {declared} exceeds the {cap} byte cap")]
    LengthOverCap { declared: usize, cap: usize },

    #[error("address field is not NUL-padded ASCII digits")]
    BadAddress,

    #[error("user data is not valid in its declared encoding")]
    BadUserData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SmsPacket {
    pub kind: SmsKind,
    pub message_id: u16,
    pub source: String,
    pub dest: String,
    pub encoding: SmsEncoding,
    pub user_data: Vec<u8>,
}

impl SmsPacket {
    /// Builds a SUBMIT packet from text, choosing the tightest encoding.
    pub fn submit(message_id: u16, source: &str, dest: &str, text: &str) -> Result<Self, String> {
        let encoding = if text.is_ascii() {
            SmsEncoding::Ascii
        } else {
            SmsEncoding::Utf8
        };
        let user_data = text.as_bytes().to_vec();
        if user_data.len() > MAX_USER_DATA {
            return Err(format!(
                "message is {} bytes, limit is {}",
                user_data.len(),
                MAX_USER_DATA
            ));
        }
        validate_address(source)?;
        validate_address(dest)?;
        Ok(SmsPacket {
            kind: SmsKind::Submit,
            message_id,
            source: source.to_string(),
            dest: dest.to_string(),
            encoding,
            user_data,
        })
    }

    pub fn parse(data: &[u8]) -> Result<Self, SmsParseError> {
        if data.len() < HEADER_LEN {
            return Err(SmsParseError::TooShort {
                expected: HEADER_LEN,
                found: data.len(),
            });
        }
        if data[0] != SMS_VERSION {
            return Err(SmsParseError::BadVersion(data[0]));
        }
        let kind = match data[1] {
            0x01 => SmsKind::Submit,
            0x02 => SmsKind::Deliver,
            other => return Err(SmsParseError::BadKind(other)),
        };
        let message_id = u16::from_be_bytes([data[2], data[3]]);
        let source = parse_address(&data[4..4 + ADDR_LEN])?;
        let dest = parse_address(&data[14..14 + ADDR_LEN])?;
        let encoding = match data[24] {
            0x00 => SmsEncoding::Ascii,
            0x01 => SmsEncoding::Utf8,
            other => return Err(SmsParseError::BadEncoding(other)),
        };
        let declared = data[25] as usize;
        // The length byte could physically hold up to 255; the protocol
        // stops at the cap.
        if declared > MAX_USER_DATA {
            return Err(SmsParseError::LengthOverCap {
                declared,
                cap: MAX_USER_DATA,
            });
        }
        let available = data.len() - HEADER_LEN;
        if declared > available {
            return Err(SmsParseError::LengthOverrun {
                declared,
                available,
            });
        }
        let user_data = data[HEADER_LEN..HEADER_LEN + declared].to_vec();
        match encoding {
            SmsEncoding::Ascii if !user_data.is_ascii() => {
                return Err(SmsParseError::BadUserData)
            }
            SmsEncoding::Utf8 if std::str::from_utf8(&user_data).is_err() => {
                return Err(SmsParseError::BadUserData)
            }
            _ => {}
        }
        Ok(SmsPacket {
            kind,
            message_id,
            source,
            dest,
            encoding,
            user_data,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.user_data.len());
        out.push(SMS_VERSION);
        out.push(self.kind.to_byte());
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&encode_address(&self.source));
        out.extend_from_slice(&encode_address(&self.dest));
        out.push(self.encoding.to_byte());
        out.push(self.user_data.len() as u8);
        out.extend_from_slice(&self.user_data);
        out
    }

    /// User data as text. Both encodings are byte-validated at parse time,
    /// so this only fails on hand-built packets.
    pub fn text(&self) -> Option<String> {
        std::str::from_utf8(&self.user_data).ok().map(str::to_string)
    }

    /// The loopback transform: swap addresses, restamp as DELIVER.
    pub fn into_loopback(self) -> SmsPacket {
        SmsPacket {
            kind: SmsKind::Deliver,
            message_id: self.message_id,
            source: self.dest,
            dest: self.source,
            encoding: self.encoding,
            user_data: self.user_data,
        }
    }
}

fn validate_address(addr: &str) -> Result<(), String> {
    if addr.is_empty() || addr.len() > ADDR_LEN {
        return Err(format!("address must be 1..={} digits", ADDR_LEN));
    }
    if !addr.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("address {:?} contains non-digits", addr));
    }
    Ok(())
}

fn parse_address(field: &[u8]) -> Result<String, SmsParseError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let digits = &field[..end];
    if digits.is_empty()
        || !digits.iter().all(|b| b.is_ascii_digit())
        || !field[end..].iter().all(|&b| b == 0)
    {
        return Err(SmsParseError::BadAddress);
    }
    // Safe: all ASCII digits.
    Ok(String::from_utf8(digits.to_vec()).unwrap())
}

fn encode_address(addr: &str) -> [u8; ADDR_LEN] {
    let mut field = [0u8; ADDR_LEN];
    field[..addr.len()].copy_from_slice(addr.as_bytes());
    field
}

// ============================================================================
// Server and sender
// ============================================================================

fn serve(port: u16) -> std::io::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port))?;
    info!(port, "SMS loopback listening");
    println!("SMS loopback listening on port {}", port);
    println!("Send a message with: cargo run --bin sms_loopback -- send 127.0.0.1:{} 5550100 5550199 \"hello\"", port);

    let mut buffer = [0u8; 2048];
    let mut received: u64 = 0;
    let mut bounced: u64 = 0;

    loop {
        let (len, peer) = socket.recv_from(&mut buffer)?;
        received += 1;
        match SmsPacket::parse(&buffer[..len]) {
            Ok(packet) if packet.kind == SmsKind::Submit => {
                info!(
                    %peer,
                    id = packet.message_id,
                    from = %packet.source,
                    to = %packet.dest,
                    bytes = packet.user_data.len(),
                    "SUBMIT received"
                );
                let reply = packet.into_loopback();
                socket.send_to(&reply.encode(), peer)?;
                bounced += 1;
                info!(id = reply.message_id, "DELIVER bounced ({}/{})", bounced, received);
            }
            Ok(packet) => {
                // DELIVER packets only travel server -> client.
                warn!(%peer, kind = ?packet.kind, "ignoring non-SUBMIT packet");
            }
            Err(e) => {
                // Malformed datagrams are logged and dropped, never answered.
                warn!(%peer, error = %e, "dropping malformed packet");
            }
        }
    }
}

fn send(server: &str, from: &str, to: &str, text: &str) -> std::io::Result<()> {
    let packet = match SmsPacket::submit(next_message_id(), from, to, text) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{} {}", "invalid message:".red(), e);
            std::process::exit(1);
        }
    };

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(Duration::from_secs(2)))?;
    socket.send_to(&packet.encode(), server)?;
    println!(
        "{} id={} {} -> {} ({} bytes)",
        "sent SUBMIT".green(),
        packet.message_id,
        packet.source,
        packet.dest,
        packet.user_data.len()
    );

    let mut buffer = [0u8; 2048];
    let (len, _) = socket.recv_from(&mut buffer)?;
    match SmsPacket::parse(&buffer[..len]) {
        Ok(reply) => {
            println!(
                "{} id={} {} -> {}",
                "got DELIVER".green(),
                reply.message_id,
                reply.source,
                reply.dest
            );
            println!("  text: {}", reply.text().unwrap_or_else(|| "<binary>".into()));
            if reply.message_id == packet.message_id && reply.user_data == packet.user_data {
                println!("  {}", "✓ loopback matches what was sent".green());
            } else {
                println!("  {}", "✗ loopback does not match".red());
            }
        }
        Err(e) => eprintln!("{} {}", "bad reply:".red(), e),
    }
    Ok(())
}

/// Message ids only need to differ between runs; seconds since the epoch
/// truncated to 16 bits is plenty for a demo sender.
fn next_message_id() -> u16 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u16)
        .unwrap_or(1)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("serve") => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .init();
            let port = args
                .get(2)
                .and_then(|p| p.parse().ok())
                .unwrap_or(7072u16);
            if let Err(e) = serve(port) {
                eprintln!("server error: {}", e);
                std::process::exit(1);
            }
        }
        Some("send") if args.len() >= 6 => {
            let text = args[5..].join(" ");
            if let Err(e) = send(&args[2], &args[3], &args[4], &text) {
                eprintln!("send failed: {}", e);
                std::process::exit(1);
            }
        }
        _ => {
            eprintln!("usage: sms_loopback serve [port]");
            eprintln!("       sms_loopback send <host:port> <from> <to> <text...>");
            std::process::exit(2);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SmsPacket {
        SmsPacket::submit(42, "5550100", "5550199", "lunch at noon?").unwrap()
    }

    #[test]
    fn encode_then_parse_is_identity() {
        let packet = sample();
        let parsed = SmsPacket::parse(&packet.encode()).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn utf8_text_round_trips() {
        let packet = SmsPacket::submit(7, "1", "2", "café ça va").unwrap();
        assert_eq!(packet.encoding, SmsEncoding::Utf8);
        let parsed = SmsPacket::parse(&packet.encode()).unwrap();
        assert_eq!(parsed.text().as_deref(), Some("café ça va"));
    }

    #[test]
    fn loopback_swaps_addresses_and_keeps_payload() {
        let reply = sample().into_loopback();
        assert_eq!(reply.kind, SmsKind::Deliver);
        assert_eq!(reply.source, "5550199");
        assert_eq!(reply.dest, "5550100");
        assert_eq!(reply.message_id, 42);
        assert_eq!(reply.text().as_deref(), Some("lunch at noon?"));
    }

    #[test]
    fn short_packet_reports_sizes() {
        let err = SmsPacket::parse(&[0x01, 0x01, 0x00]).unwrap_err();
        assert_eq!(
            err,
            SmsParseError::TooShort {
                expected: HEADER_LEN,
                found: 3
            }
        );
    }

    #[test]
    fn bad_version_and_kind_are_rejected() {
        let mut bytes = sample().encode();
        bytes[0] = 0x07;
        assert_eq!(SmsPacket::parse(&bytes).unwrap_err(), SmsParseError::BadVersion(0x07));

        let mut bytes = sample().encode();
        bytes[1] = 0x33;
        assert_eq!(SmsPacket::parse(&bytes).unwrap_err(), SmsParseError::BadKind(0x33));
    }

    #[test]
    fn declared_length_cannot_overrun() {
        let mut bytes = sample().encode();
        bytes[25] = 100; // claims more user data than the datagram holds
        match SmsPacket::parse(&bytes).unwrap_err() {
            SmsParseError::LengthOverrun { declared, .. } => assert_eq!(declared, 100),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn lengths_past_the_cap_are_rejected() {
        // A datagram can physically carry more than the cap; the length
        // byte is still bounded by it.
        let mut bytes = sample().encode();
        bytes[25] = 200;
        bytes.resize(HEADER_LEN + 200, b'a');
        match SmsPacket::parse(&bytes).unwrap_err() {
            SmsParseError::LengthOverCap { declared, cap } => {
                assert_eq!(declared, 200);
                assert_eq!(cap, MAX_USER_DATA);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn address_must_be_padded_digits() {
        let mut bytes = sample().encode();
        bytes[4] = b'x'; // corrupt first source digit
        assert_eq!(SmsPacket::parse(&bytes).unwrap_err(), SmsParseError::BadAddress);

        // Padding with garbage after the NUL is also rejected.
        let mut bytes = sample().encode();
        bytes[13] = b'9'; // source is "5550100\0\0\0" -> put a digit after the NUL
        assert_eq!(SmsPacket::parse(&bytes).unwrap_err(), SmsParseError::BadAddress);
    }

    #[test]
    fn ascii_encoding_rejects_high_bytes() {
        let mut bytes = sample().encode();
        // sample() is ASCII; flip a payload byte to 0xFF
        let idx = HEADER_LEN;
        bytes[idx] = 0xFF;
        assert_eq!(SmsPacket::parse(&bytes).unwrap_err(), SmsParseError::BadUserData);
    }

    #[test]
    fn submit_enforces_limits() {
        assert!(SmsPacket::submit(1, "555x", "123", "hi").is_err());
        assert!(SmsPacket::submit(1, "12345678901", "123", "hi").is_err());
        let long = "a".repeat(MAX_USER_DATA + 1);
        assert!(SmsPacket::submit(1, "123", "456", &long).is_err());
        let exactly = "a".repeat(MAX_USER_DATA);
        assert!(SmsPacket::submit(1, "123", "456", &exactly).is_ok());
    }

    #[test]
    fn empty_message_is_fine() {
        let packet = SmsPacket::submit(9, "10", "20", "").unwrap();
        let parsed = SmsPacket::parse(&packet.encode()).unwrap();
        assert_eq!(parsed.user_data.len(), 0);
        assert_eq!(parsed.text().as_deref(), Some(""));
    }
}
