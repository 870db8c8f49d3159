//! Content-type sniffing and handler dispatch.
//!
//! A payload's type is settled in three steps: magic bytes first, then the
//! file extension when sniffing is inconclusive, then a default of
//! application/octet-stream. A TOML file can add or replace extension
//! mappings without recompiling. Once typed, the payload goes to whichever
//! registered handler claims the type; exact claims beat family wildcards
//! like image/*, and a hex-dump handler catches whatever nobody wants.
//!
//! Run with: cargo run --bin mime_registry [-- overrides.toml] [files...]

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use colored::Colorize;
use image::GenericImageView;
use lazy_static::lazy_static;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Sniffing
// ============================================================================

const MAGIC_TABLE: [(&[u8], &str); 7] = [
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"%PDF-", "application/pdf"),
    (b"PK\x03\x04", "application/zip"),
    (b"\x1f\x8b", "application/gzip"),
];

/// What settled the content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Via {
    Magic,
    Extension,
    Default,
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Via::Magic => write!(f, "magic"),
            Via::Extension => write!(f, "extension"),
            Via::Default => write!(f, "default"),
        }
    }
}

pub fn sniff(data: &[u8]) -> Option<&'static str> {
    // RIFF containers need a second probe at offset 8.
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        return Some("audio/wav");
    }
    for (prefix, content_type) in MAGIC_TABLE {
        if data.starts_with(prefix) {
            return Some(content_type);
        }
    }
    // BMP's two-byte magic goes last; it collides with text too easily
    // to check before the longer prefixes.
    if data.starts_with(b"BM") && data.len() >= 14 {
        return Some("image/bmp");
    }
    if data.starts_with(b"\xef\xbb\xbf") {
        return Some("text/plain");
    }
    if data.starts_with(b"<?xml") {
        return Some("application/xml");
    }
    None
}

lazy_static! {
    static ref EXTENSION_MAP: HashMap<&'static str, &'static str> = [
        ("png", "image/png"),
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("gif", "image/gif"),
        ("bmp", "image/bmp"),
        ("wav", "audio/wav"),
        ("pdf", "application/pdf"),
        ("zip", "application/zip"),
        ("gz", "application/gzip"),
        ("txt", "text/plain"),
        ("md", "text/markdown"),
        ("csv", "text/csv"),
        ("html", "text/html"),
        ("htm", "text/html"),
        ("xml", "application/xml"),
        ("json", "application/json"),
        ("toml", "application/toml"),
    ]
    .into_iter()
    .collect();
}

#[derive(Debug, Deserialize)]
struct MimeOverrides {
    #[serde(default)]
    extensions: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: malformed override file: {source}")]
    BadToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

pub struct TypeResolver {
    extensions: HashMap<String, String>,
}

impl TypeResolver {
    pub fn new() -> Self {
        TypeResolver {
            extensions: EXTENSION_MAP
                .iter()
                .map(|(ext, ct)| (ext.to_string(), ct.to_string()))
                .collect(),
        }
    }

    /// Loads a `[extensions]` table and merges it over the built-ins.
    pub fn load_overrides(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let overrides: MimeOverrides =
            toml::from_str(&text).map_err(|source| RegistryError::BadToml {
                path: path.display().to_string(),
                source,
            })?;
        let count = overrides.extensions.len();
        self.extensions.extend(
            overrides
                .extensions
                .into_iter()
                .map(|(ext, ct)| (ext.to_ascii_lowercase(), ct)),
        );
        Ok(count)
    }

    /// Magic bytes win; the extension only speaks when sniffing is silent;
    /// empty input is always octet-stream.
    pub fn resolve(&self, data: &[u8], filename: Option<&str>) -> (String, Via) {
        if data.is_empty() {
            return ("application/octet-stream".to_string(), Via::Default);
        }
        if let Some(content_type) = sniff(data) {
            return (content_type.to_string(), Via::Magic);
        }
        if let Some(ext) = filename
            .and_then(|f| Path::new(f).extension())
            .and_then(|e| e.to_str())
        {
            if let Some(content_type) = self.extensions.get(&ext.to_ascii_lowercase()) {
                return (content_type.clone(), Via::Extension);
            }
        }
        ("application/octet-stream".to_string(), Via::Default)
    }
}

impl Default for TypeResolver {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("payload declared text but is not valid UTF-8")]
    NotUtf8Text,

    #[error("cannot decode image: {0}")]
    BadImage(#[from] image::ImageError),
}

pub trait ContentHandler {
    fn content_types(&self) -> &[&'static str];
    fn handle(&self, content_type: &str, data: &[u8]) -> Result<String, HandlerError>;
}

/// Charset-checked preview of the head of the text.
struct TextHandler;

impl ContentHandler for TextHandler {
    fn content_types(&self) -> &[&'static str] {
        &["text/*", "application/xml", "application/json", "application/toml"]
    }

    fn handle(&self, content_type: &str, data: &[u8]) -> Result<String, HandlerError> {
        let text = std::str::from_utf8(data).map_err(|_| HandlerError::NotUtf8Text)?;
        let head: String = text.chars().take(60).collect();
        let ellipsis = if text.chars().count() > 60 { "…" } else { "" };
        Ok(format!(
            "{}: {} chars, starts {:?}{}",
            content_type,
            text.chars().count(),
            head,
            ellipsis
        ))
    }
}

struct ImageHandler;

impl ContentHandler for ImageHandler {
    fn content_types(&self) -> &[&'static str] {
        &["image/*"]
    }

    fn handle(&self, content_type: &str, data: &[u8]) -> Result<String, HandlerError> {
        let img = image::load_from_memory(data)?;
        let (w, h) = img.dimensions();
        Ok(format!("{}: {}x{} pixels, {} bytes", content_type, w, h, data.len()))
    }
}

/// Last resort: a classic hex dump of the head of the payload.
struct HexDumpHandler;

const DUMP_LIMIT: usize = 64;

impl ContentHandler for HexDumpHandler {
    fn content_types(&self) -> &[&'static str] {
        &["*/*"]
    }

    fn handle(&self, content_type: &str, data: &[u8]) -> Result<String, HandlerError> {
        let mut out = format!("{}: {} bytes\n", content_type, data.len());
        for (i, chunk) in data.chunks(16).take(DUMP_LIMIT / 16).enumerate() {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
            let ascii: String = chunk
                .iter()
                .map(|&b| {
                    if (0x20..0x7f).contains(&b) {
                        b as char
                    } else {
                        '.'
                    }
                })
                .collect();
            out.push_str(&format!("{:08x}  {:<47}  |{}|\n", i * 16, hex.join(" "), ascii));
        }
        if data.len() > DUMP_LIMIT {
            out.push_str(&format!("(... {} more bytes)\n", data.len() - DUMP_LIMIT));
        }
        Ok(out)
    }
}

pub struct HandlerRegistry {
    handlers: Vec<Box<dyn ContentHandler>>,
}

impl HandlerRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = HandlerRegistry {
            handlers: Vec::new(),
        };
        registry.register(Box::new(TextHandler));
        registry.register(Box::new(ImageHandler));
        registry.register(Box::new(HexDumpHandler));
        registry
    }

    pub fn register(&mut self, handler: Box<dyn ContentHandler>) {
        self.handlers.push(handler);
    }

    /// Exact claim first, then the type's family wildcard, then */*.
    fn find(&self, content_type: &str) -> &dyn ContentHandler {
        if let Some(handler) = self
            .handlers
            .iter()
            .find(|h| h.content_types().contains(&content_type))
        {
            return handler.as_ref();
        }
        let family = match content_type.split_once('/') {
            Some((family, _)) => format!("{}/*", family),
            None => "*/*".to_string(),
        };
        if let Some(handler) = self
            .handlers
            .iter()
            .find(|h| h.content_types().contains(&family.as_str()))
        {
            return handler.as_ref();
        }
        // with_builtins always registers the hex dump
        self.handlers
            .iter()
            .find(|h| h.content_types().contains(&"*/*"))
            .expect("registry keeps a */* fallback handler")
            .as_ref()
    }

    pub fn dispatch(&self, content_type: &str, data: &[u8]) -> Result<String, HandlerError> {
        self.find(content_type).handle(content_type, data)
    }
}

// ============================================================================
// Demo
// ============================================================================

const FIXTURES: [(&str, &[u8]); 6] = [
    ("png header", b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR"),
    ("gif header", b"GIF89a\x20\x00\x10\x00"),
    ("pdf head", b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n"),
    ("xml doc", b"<?xml version=\"1.0\"?><root/>"),
    ("bom text", b"\xef\xbb\xbfhello from a text file"),
    ("mystery", b"\x00\x01\x02\x03nothing recognizable here"),
];

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut resolver = TypeResolver::new();
    let registry = HandlerRegistry::with_builtins();

    let mut files: Vec<&str> = Vec::new();
    for arg in &args {
        if arg.ends_with(".toml") {
            match resolver.load_overrides(Path::new(arg)) {
                Ok(n) => println!("{} loaded {} extension override(s) from {}", "✓".green(), n, arg),
                Err(e) => {
                    eprintln!("{} {}", "✗".red(), e);
                    std::process::exit(1);
                }
            }
        } else {
            files.push(arg.as_str());
        }
    }

    if files.is_empty() {
        println!("=== Sniffing the built-in fixtures ===\n");
        for (label, data) in FIXTURES {
            let (content_type, via) = resolver.resolve(data, None);
            println!("{:>10}  {:<26} ({})", label, content_type, via);
        }
        println!("\npass file paths to classify and dispatch real payloads");
        return;
    }

    for path in files {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                println!("{} {}: {}", "✗".red(), path, e);
                continue;
            }
        };
        let (content_type, via) = resolver.resolve(&data, Some(path));
        match registry.dispatch(&content_type, &data) {
            Ok(report) => {
                println!("{} {} ({})", "✓".green(), path, via);
                for line in report.lines() {
                    println!("    {}", line);
                }
            }
            Err(e) => println!("{} {}: {}", "✗".red(), path, e),
        }
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
    fn magic_bytes_identify_the_usual_suspects() {
        assert_eq!(sniff(b"\x89PNG\r\n\x1a\nrest"), Some("image/png"));
        assert_eq!(sniff(b"\xff\xd8\xff\xe0JFIF"), Some("image/jpeg"));
        assert_eq!(sniff(b"GIF89a...."), Some("image/gif"));
        assert_eq!(sniff(b"GIF87a...."), Some("image/gif"));
        assert_eq!(sniff(b"%PDF-1.7"), Some("application/pdf"));
        assert_eq!(sniff(b"PK\x03\x04archive"), Some("application/zip"));
        assert_eq!(sniff(b"\x1f\x8b\x08compressed"), Some("application/gzip"));
        assert_eq!(sniff(b"RIFF\x24\x08\x00\x00WAVEfmt "), Some("audio/wav"));
        assert_eq!(sniff(b"\xef\xbb\xbfsome text"), Some("text/plain"));
        assert_eq!(sniff(b"<?xml version=\"1.0\"?>"), Some("application/xml"));
        assert_eq!(sniff(b"BM\x46\x00\x00\x00\x00\x00\x00\x00\x36\x00\x00\x00"), Some("image/bmp"));
        assert_eq!(sniff(b"plain old words"), None);
        assert_eq!(sniff(b""), None);
    }

    #[test]
    fn sniffing_wins_over_a_lying_extension() {
        let resolver = TypeResolver::new();
        let (ct, via) = resolver.resolve(b"\x89PNG\r\n\x1a\nxxxx", Some("totally.txt"));
        assert_eq!(ct, "image/png");
        assert_eq!(via, Via::Magic);
    }

    #[test]
    fn extension_speaks_when_magic_is_silent() {
        let resolver = TypeResolver::new();
        let (ct, via) = resolver.resolve(b"# notes\n", Some("notes.md"));
        assert_eq!(ct, "text/markdown");
        assert_eq!(via, Via::Extension);

        let (ct, via) = resolver.resolve(b"# notes\n", Some("NOTES.MD"));
        assert_eq!(ct, "text/markdown");
        assert_eq!(via, Via::Extension);
    }

    #[test]
    fn empty_and_unknown_default_to_octet_stream() {
        let resolver = TypeResolver::new();
        assert_eq!(
            resolver.resolve(&[], Some("file.png")),
            ("application/octet-stream".to_string(), Via::Default)
        );
        assert_eq!(
            resolver.resolve(b"????", None),
            ("application/octet-stream".to_string(), Via::Default)
        );
        assert_eq!(
            resolver.resolve(b"data", Some("file.unknownext")),
            ("application/octet-stream".to_string(), Via::Default)
        );
    }

    #[test]
    fn toml_overrides_add_and_replace_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mime.toml");
        std::fs::write(
            &path,
            "[extensions]\nlog = \"text/plain\"\nmd = \"text/x-markdown\"\n",
        )
        .unwrap();

        let mut resolver = TypeResolver::new();
        assert_eq!(resolver.load_overrides(&path).unwrap(), 2);
        assert_eq!(
            resolver.resolve(b"line\n", Some("app.log")).0,
            "text/plain"
        );
        assert_eq!(
            resolver.resolve(b"# doc\n", Some("readme.md")).0,
            "text/x-markdown"
        );
        // Untouched mappings survive.
        assert_eq!(resolver.resolve(b"{}", Some("data.json")).0, "application/json");
    }

    #[test]
    fn malformed_override_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "extensions = not toml").unwrap();
        let mut resolver = TypeResolver::new();
        match resolver.load_overrides(&path) {
            Err(RegistryError::BadToml { path, .. }) => assert!(path.contains("broken.toml")),
            other => panic!("expected BadToml, got {:?}", other),
        }
    }

    struct PdfStamp;

    impl ContentHandler for PdfStamp {
        fn content_types(&self) -> &[&'static str] {
            &["application/pdf"]
        }

        fn handle(&self, _content_type: &str, data: &[u8]) -> Result<String, HandlerError> {
            Ok(format!("pdf stamp: {} bytes", data.len()))
        }
    }

    #[test]
    fn dispatch_prefers_exact_claims_over_families() {
        let mut registry = HandlerRegistry::with_builtins();
        registry.register(Box::new(PdfStamp));

        // Exact claim beats the hex-dump fallback.
        let report = registry.dispatch("application/pdf", b"%PDF-1.4").unwrap();
        assert_eq!(report, "pdf stamp: 8 bytes");

        // text/plain has no exact claim but matches text/*.
        let report = registry.dispatch("text/plain", b"hi there").unwrap();
        assert!(report.starts_with("text/plain:"));
    }

    #[test]
    fn unclaimed_types_fall_to_the_hex_dump() {
        let registry = HandlerRegistry::with_builtins();
        let data: Vec<u8> = (0u8..40).collect();
        let report = registry.dispatch("application/octet-stream", &data).unwrap();
        assert!(report.contains("40 bytes"));
        assert!(report.contains("00000000"));
        assert!(report.contains('|'));
        assert!(report.contains("00 01 02 03"));
    }

    #[test]
    fn hex_dump_truncates_long_payloads() {
        let registry = HandlerRegistry::with_builtins();
        let data = vec![0xAB; 200];
        let report = registry.dispatch("application/octet-stream", &data).unwrap();
        assert!(report.contains("(... 136 more bytes)"));
        // 64 bytes shown, 16 per line.
        assert_eq!(report.lines().filter(|l| l.contains('|')).count(), 4);
    }

    #[test]
    fn text_handler_checks_the_charset() {
        let registry = HandlerRegistry::with_builtins();
        let report = registry.dispatch("text/plain", "héllo wörld".as_bytes()).unwrap();
        assert!(report.contains("11 chars"));
        assert!(report.contains("héllo"));

        let err = registry.dispatch("text/plain", &[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, HandlerError::NotUtf8Text));
    }

    #[test]
    fn image_handler_reports_real_dimensions() {
        let img = image::RgbImage::from_pixel(3, 2, image::Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let resolver = TypeResolver::new();
        let (ct, via) = resolver.resolve(&bytes, None);
        assert_eq!(ct, "image/png");
        assert_eq!(via, Via::Magic);

        let registry = HandlerRegistry::with_builtins();
        let report = registry.dispatch(&ct, &bytes).unwrap();
        assert!(report.contains("3x2"));
    }

    #[test]
    fn truncated_image_reports_a_decode_error() {
        let registry = HandlerRegistry::with_builtins();
        let err = registry
            .dispatch("image/png", b"\x89PNG\r\n\x1a\nnot really")
            .unwrap_err();
        assert!(matches!(err, HandlerError::BadImage(_)));
    }
}
