//! Localization catalogs with locale fallback.
//!
//! UI strings resolve through a chain built from the locale tag: `fr-CA`
//! tries `fr-CA`, then `fr`, then the root catalog. Catalogs are JSON maps
//! from key to either a plain message or a plural group; messages may carry
//! `{name}`-style placeholders. The built-in catalogs mirror the compiled-in
//! resource bundles of the original; a directory argument overlays any
//! `*.json` files found in it, so translations can be dropped in without a
//! rebuild.
//!
//! Run with: cargo run --bin l10n_catalog [-- overlay_dir]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use colored::Colorize;
use serde::Deserialize;
use thiserror::Error;
use walkdir::WalkDir;

const BUILTIN: [(&str, &str); 5] = [
    (
        "root",
        r#"{
            "app.title": "PocketLab",
            "greeting": "Hello, {name}!",
            "farewell": "Goodbye",
            "inbox.messages": {
                "one": "You have {count} message",
                "other": "You have {count} messages"
            }
        }"#,
    ),
    (
        "en",
        r#"{ "farewell": "See you later" }"#,
    ),
    (
        "en-US",
        r#"{
            "inbox.messages": {
                "one": "You've got {count} message",
                "other": "You've got {count} messages"
            }
        }"#,
    ),
    (
        "fr",
        r#"{
            "greeting": "Bonjour, {name} !",
            "farewell": "Au revoir",
            "inbox.messages": {
                "one": "Vous avez {count} message",
                "other": "Vous avez {count} messages"
            }
        }"#,
    ),
    (
        "de",
        r#"{
            "greeting": "Hallo, {name}!",
            "farewell": "Auf Wiedersehen",
            "inbox.messages": {
                "one": "Sie haben {count} Nachricht",
                "other": "Sie haben {count} Nachrichten"
            }
        }"#,
    ),
];

// ============================================================================
// Catalog model
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Message {
    Plain(String),
    Plural {
        #[serde(default)]
        one: Option<String>,
        other: String,
    },
}

pub type Catalog = HashMap<String, Message>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: malformed catalog: {source}")]
    BadJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// `FR-ca` and `fr-CA` are the same tag.
pub fn normalize_tag(tag: &str) -> String {
    tag.split('-')
        .enumerate()
        .map(|(i, part)| {
            if i == 0 {
                part.to_ascii_lowercase()
            } else {
                part.to_ascii_uppercase()
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Most specific first, always ending at root.
pub fn fallback_chain(tag: &str) -> Vec<String> {
    let normalized = normalize_tag(tag);
    let mut chain = Vec::new();
    let mut parts: Vec<&str> = normalized.split('-').collect();
    while !parts.is_empty() {
        chain.push(parts.join("-"));
        parts.pop();
    }
    if chain.last().map(String::as_str) != Some("root") {
        chain.push("root".to_string());
    }
    chain
}

/// CLDR-style cardinal selection for the languages we ship: `one` covers
/// count == 1 everywhere, and count == 0 as well in French.
fn plural_is_one(language: &str, count: u64) -> bool {
    count == 1 || (count == 0 && language == "fr")
}

fn substitute(template: &str, args: &[(&str, String)]) -> String {
    let mut out = template.to_string();
    for (name, value) in args {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

pub struct Catalogs {
    map: BTreeMap<String, Catalog>,
}

impl Catalogs {
    pub fn builtin() -> Self {
        let mut map = BTreeMap::new();
        for (tag, json) in BUILTIN {
            let catalog: Catalog =
                serde_json::from_str(json).expect("built-in catalogs are well formed");
            map.insert(tag.to_string(), catalog);
        }
        Catalogs { map }
    }

    /// Walks `dir` for `*.json` files and merges them in, file stem as the
    /// locale tag. Keys override built-ins per catalog. Returns how many
    /// files were loaded.
    pub fn overlay_dir(&mut self, dir: &Path) -> Result<usize, CatalogError> {
        let mut loaded = 0;
        for entry in WalkDir::new(dir) {
            // A missing or unreadable directory is an error, not an empty
            // overlay.
            let entry = entry.map_err(|e| CatalogError::Io(e.into()))?;
            let path = entry.path();
            if !path.is_file() || path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let tag = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => normalize_tag(stem),
                None => continue,
            };
            let text = std::fs::read_to_string(path)?;
            let catalog: Catalog =
                serde_json::from_str(&text).map_err(|source| CatalogError::BadJson {
                    path: path.display().to_string(),
                    source,
                })?;
            self.map.entry(tag).or_default().extend(catalog);
            loaded += 1;
        }
        Ok(loaded)
    }

    fn find(&self, tag: &str, key: &str) -> Option<&Message> {
        fallback_chain(tag)
            .iter()
            .find_map(|locale| self.map.get(locale).and_then(|catalog| catalog.get(key)))
    }

    pub fn lookup(&self, tag: &str, key: &str, args: &[(&str, String)]) -> String {
        match self.find(tag, key) {
            Some(Message::Plain(template)) => substitute(template, args),
            Some(Message::Plural { other, .. }) => substitute(other, args),
            None => {
                eprintln!("missing message {:?} for locale {}", key, tag);
                key.to_string()
            }
        }
    }

    pub fn lookup_plural(&self, tag: &str, key: &str, count: u64, args: &[(&str, String)]) -> String {
        let mut args = args.to_vec();
        args.push(("count", count.to_string()));
        match self.find(tag, key) {
            Some(Message::Plural { one, other }) => {
                let language = normalize_tag(tag);
                let language = language.split('-').next().unwrap_or("");
                let template = if plural_is_one(language, count) {
                    one.as_deref().unwrap_or(other)
                } else {
                    other.as_str()
                };
                substitute(template, &args)
            }
            Some(Message::Plain(template)) => substitute(template, &args),
            None => {
                eprintln!("missing message {:?} for locale {}", key, tag);
                key.to_string()
            }
        }
    }
}

const DEMO_LOCALES: [&str; 7] = ["root", "en", "en-US", "fr", "fr-CA", "de", "pt-BR"];

// ============================================================================
// Demo
// ============================================================================

fn main() {
    println!("=== Localization Catalogs ===\n");

    let mut catalogs = Catalogs::builtin();
    if let Some(dir) = std::env::args().nth(1) {
        match catalogs.overlay_dir(Path::new(&dir)) {
            Ok(n) => println!("{} overlaid {} catalog file(s) from {}\n", "✓".green(), n, dir),
            Err(e) => {
                eprintln!("{} {}", "✗".red(), e);
                std::process::exit(1);
            }
        }
    }

    let name = [("name", "Ada".to_string())];
    println!("greetings:");
    for locale in DEMO_LOCALES {
        println!("  {:>6}  {}", locale, catalogs.lookup(locale, "greeting", &name));
    }

    println!("\nplurals for inbox.messages:");
    print!("{:>6}", "");
    for count in [0u64, 1, 2, 5] {
        print!("  {:<28}", format!("count={}", count));
    }
    println!();
    for locale in ["en", "en-US", "fr", "de"] {
        print!("{:>6}", locale);
        for count in [0u64, 1, 2, 5] {
            print!("  {:<28}", catalogs.lookup_plural(locale, "inbox.messages", count, &[]));
        }
        println!();
    }

    println!("\nfarewells:");
    for locale in ["en", "fr", "de"] {
        println!("  {:>6}  {}", locale, catalogs.lookup(locale, "farewell", &[]));
    }

    // A key nobody ships: the raw key itself comes back, made obvious.
    let missing = catalogs.lookup("en", "no.such.key", &[]);
    println!("\nmissing key renders as {}", format!("???{}???", missing).yellow());
}

// ============================================================================
// Tests
// ============================================================================
