//! Parse a small XML file and pretty-print it.
//!
//! A recursive-descent parser over the practical subset the sample file
//! needs: declaration, elements, attributes, text, comments, CDATA, and the
//! five standard entities. The printer re-emits the tree with 2-space
//! indentation and re-escaped text. Whitespace-only text is dropped and
//! text runs are trimmed, so printing is canonicalizing: parse, print,
//! parse again and you hold the same tree.
//!
//! Run with: cargo run --bin xml_pretty [-- path/to/file.xml]

use colored::Colorize;
use thiserror::Error;

const SAMPLE_DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- device provisioning record -->
<provisioning version="2">
  <device id="PX-2030" color="charcoal">
    <display width="480" height="360" bpp="16"/>
    <owner>J. &amp; M. Harper</owner>
  </device>
  <services>
    <service name="mail" enabled="true">
      <server host="mail.example.net" port="993"/>
    </service>
    <!-- disabled until the contract renews -->
    <service name="sync" enabled="false"/>
  </services>
  <notes><![CDATA[Markup like <these> stays raw in here.]]></notes>
</provisioning>
"#;

// ============================================================================
// Tree
// ============================================================================

#[derive(Debug, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
    CData(String),
}

#[derive(Debug, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Error, PartialEq)]
pub enum XmlError {
    #[error("unexpected end of input at line {line}, column {col} while {context}")]
    UnexpectedEof {
        line: usize,
        col: usize,
        context: &'static str,
    },

    #[error("line {line}, column {col}: expected {expected}, found {found:?}")]
    Unexpected {
        line: usize,
        col: usize,
        expected: &'static str,
        found: char,
    },

    #[error("line {line}, column {col}: closing tag </{found}> does not match <{expected}>")]
    MismatchedClose {
        line: usize,
        col: usize,
        expected: String,
        found: String,
    },

    #[error("line {line}, column {col}: unknown entity &{entity};")]
    BadEntity {
        line: usize,
        col: usize,
        entity: String,
    },

    #[error("line {line}, column {col}: bare '&' in content (write &amp;)")]
    BareAmpersand { line: usize, col: usize },

    #[error("trailing content after the document element at line {line}, column {col}")]
    TrailingContent { line: usize, col: usize },
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

impl Parser {
    fn new(input: &str) -> Self {
        Parser {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn eof(&self, context: &'static str) -> XmlError {
        XmlError::UnexpectedEof {
            line: self.line,
            col: self.col,
            context,
        }
    }

    fn expect(&mut self, want: char, expected: &'static str) -> Result<(), XmlError> {
        match self.peek() {
            Some(c) if c == want => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(XmlError::Unexpected {
                line: self.line,
                col: self.col,
                expected,
                found: c,
            }),
            None => Err(self.eof(expected)),
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    /// Consumes `s`; caller must have checked `starts_with` first.
    fn eat_str(&mut self, s: &str) {
        for _ in s.chars() {
            self.bump();
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn parse_name(&mut self) -> Result<String, XmlError> {
        match self.peek() {
            None => return Err(self.eof("expecting a name")),
            Some(c) if !is_name_start(c) => {
                return Err(XmlError::Unexpected {
                    line: self.line,
                    col: self.col,
                    expected: "a name",
                    found: c,
                })
            }
            _ => {}
        }
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if is_name_char(c) {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn parse_document(&mut self) -> Result<Element, XmlError> {
        // Prolog: declaration and document-level comments are not part of
        // the tree.
        loop {
            self.skip_whitespace();
            if self.starts_with("<?") {
                self.skip_pi()?;
            } else if self.starts_with("<!--") {
                self.parse_comment()?;
            } else {
                break;
            }
        }

        let root = self.parse_element()?;

        loop {
            self.skip_whitespace();
            if self.starts_with("<!--") {
                self.parse_comment()?;
            } else if self.starts_with("<?") {
                self.skip_pi()?;
            } else {
                break;
            }
        }
        if self.peek().is_some() {
            return Err(XmlError::TrailingContent {
                line: self.line,
                col: self.col,
            });
        }
        Ok(root)
    }

    fn parse_element(&mut self) -> Result<Element, XmlError> {
        self.expect('<', "'<'")?;
        let name = self.parse_name()?;
        let attributes = self.parse_attributes()?;
        self.skip_whitespace();
        match self.peek() {
            Some('/') => {
                self.bump();
                self.expect('>', "'>' after '/'")?;
                Ok(Element {
                    name,
                    attributes,
                    children: Vec::new(),
                })
            }
            Some('>') => {
                self.bump();
                let children = self.parse_children(&name)?;
                Ok(Element {
                    name,
                    attributes,
                    children,
                })
            }
            Some(c) => Err(XmlError::Unexpected {
                line: self.line,
                col: self.col,
                expected: "'>' or '/>'",
                found: c,
            }),
            None => Err(self.eof("inside a start tag")),
        }
    }

    fn parse_attributes(&mut self) -> Result<Vec<(String, String)>, XmlError> {
        let mut attributes = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(c) if is_name_start(c) => {
                    let name = self.parse_name()?;
                    self.skip_whitespace();
                    self.expect('=', "'=' after an attribute name")?;
                    self.skip_whitespace();
                    let value = self.parse_attr_value()?;
                    attributes.push((name, value));
                }
                _ => return Ok(attributes),
            }
        }
    }

    fn parse_attr_value(&mut self) -> Result<String, XmlError> {
        let quote = match self.peek() {
            Some(c @ ('"' | '\'')) => c,
            Some(c) => {
                return Err(XmlError::Unexpected {
                    line: self.line,
                    col: self.col,
                    expected: "a quoted attribute value",
                    found: c,
                })
            }
            None => return Err(self.eof("expecting an attribute value")),
        };
        self.bump();
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.eof("inside an attribute value")),
                Some(c) if c == quote => {
                    self.bump();
                    return Ok(value);
                }
                Some('&') => value.push(self.parse_entity()?),
                Some(c) => {
                    value.push(c);
                    self.bump();
                }
            }
        }
    }

    fn parse_children(&mut self, parent: &str) -> Result<Vec<Node>, XmlError> {
        let mut children = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.eof("looking for a closing tag")),
                Some('<') => {
                    if self.starts_with("</") {
                        let (line, col) = (self.line, self.col);
                        self.eat_str("</");
                        let name = self.parse_name()?;
                        self.skip_whitespace();
                        self.expect('>', "'>' after a closing tag name")?;
                        if name != parent {
                            return Err(XmlError::MismatchedClose {
                                line,
                                col,
                                expected: parent.to_string(),
                                found: name,
                            });
                        }
                        return Ok(children);
                    } else if self.starts_with("<!--") {
                        children.push(Node::Comment(self.parse_comment()?));
                    } else if self.starts_with("<![CDATA[") {
                        children.push(Node::CData(self.parse_cdata()?));
                    } else if self.starts_with("<?") {
                        self.skip_pi()?;
                    } else {
                        children.push(Node::Element(self.parse_element()?));
                    }
                }
                Some(_) => {
                    let text = self.parse_text()?;
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        children.push(Node::Text(trimmed.to_string()));
                    }
                }
            }
        }
    }

    fn parse_text(&mut self) -> Result<String, XmlError> {
        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('<') => return Ok(text),
                Some('&') => text.push(self.parse_entity()?),
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
            }
        }
    }

    fn parse_entity(&mut self) -> Result<char, XmlError> {
        let (line, col) = (self.line, self.col);
        self.bump(); // '&'
        let mut entity = String::new();
        while entity.len() < 8 {
            match self.peek() {
                Some(c) if c.is_alphanumeric() || c == '#' => {
                    entity.push(c);
                    self.bump();
                }
                _ => break,
            }
        }
        if self.peek() != Some(';') || entity.is_empty() {
            return Err(XmlError::BareAmpersand { line, col });
        }
        self.bump(); // ';'
        match entity.as_str() {
            "amp" => Ok('&'),
            "lt" => Ok('<'),
            "gt" => Ok('>'),
            "quot" => Ok('"'),
            "apos" => Ok('\''),
            _ => Err(XmlError::BadEntity { line, col, entity }),
        }
    }

    fn parse_comment(&mut self) -> Result<String, XmlError> {
        self.eat_str("<!--");
        let mut text = String::new();
        loop {
            if self.starts_with("-->") {
                self.eat_str("-->");
                return Ok(text);
            }
            match self.bump() {
                Some(c) => text.push(c),
                None => return Err(self.eof("inside a comment")),
            }
        }
    }

    fn parse_cdata(&mut self) -> Result<String, XmlError> {
        self.eat_str("<![CDATA[");
        let mut text = String::new();
        loop {
            if self.starts_with("]]>") {
                self.eat_str("]]>");
                return Ok(text);
            }
            match self.bump() {
                Some(c) => text.push(c),
                None => return Err(self.eof("inside a CDATA section")),
            }
        }
    }

    fn skip_pi(&mut self) -> Result<(), XmlError> {
        self.eat_str("<?");
        loop {
            if self.starts_with("?>") {
                self.eat_str("?>");
                return Ok(());
            }
            if self.bump().is_none() {
                return Err(self.eof("inside a processing instruction"));
            }
        }
    }
}

pub fn parse(input: &str) -> Result<Element, XmlError> {
    Parser::new(input).parse_document()
}

// ============================================================================
// Printer
// ============================================================================

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn print_tree(root: &Element) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    print_element(root, 0, &mut out);
    out
}

fn print_element(element: &Element, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push('<');
    out.push_str(&element.name);
    for (name, value) in &element.attributes {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }

    if element.children.is_empty() {
        out.push_str("/>\n");
        return;
    }
    // A lone text child stays inline with its tags.
    if let [Node::Text(text)] = element.children.as_slice() {
        out.push('>');
        out.push_str(&escape_text(text));
        out.push_str("</");
        out.push_str(&element.name);
        out.push_str(">\n");
        return;
    }

    out.push_str(">\n");
    for child in &element.children {
        match child {
            Node::Element(inner) => print_element(inner, depth + 1, out),
            Node::Text(text) => {
                out.push_str(&"  ".repeat(depth + 1));
                out.push_str(&escape_text(text));
                out.push('\n');
            }
            Node::Comment(text) => {
                out.push_str(&"  ".repeat(depth + 1));
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->\n");
            }
            Node::CData(text) => {
                out.push_str(&"  ".repeat(depth + 1));
                out.push_str("<![CDATA[");
                out.push_str(text);
                out.push_str("]]>\n");
            }
        }
    }
    out.push_str(&indent);
    out.push_str("</");
    out.push_str(&element.name);
    out.push_str(">\n");
}

fn count_elements(element: &Element) -> usize {
    1 + element
        .children
        .iter()
        .map(|child| match child {
            Node::Element(inner) => count_elements(inner),
            _ => 0,
        })
        .sum::<usize>()
}

fn tree_depth(element: &Element) -> usize {
    1 + element
        .children
        .iter()
        .map(|child| match child {
            Node::Element(inner) => tree_depth(inner),
            _ => 0,
        })
        .max()
        .unwrap_or(0)
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let source = match std::env::args().nth(1) {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("{} cannot read {}: {}", "✗".red(), path, e);
                std::process::exit(1);
            }
        },
        None => SAMPLE_DOCUMENT.to_string(),
    };

    let tree = match parse(&source) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("{} {}", "✗".red(), e);
            std::process::exit(1);
        }
    };

    print!("{}", print_tree(&tree));
    eprintln!(
        "{} parsed {} elements, depth {}",
        "✓".green(),
        count_elements(&tree),
        tree_depth(&tree)
    );
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_sample_document() {
        let tree = parse(SAMPLE_DOCUMENT).unwrap();
        assert_eq!(tree.name, "provisioning");
        assert_eq!(tree.attributes, vec![("version".to_string(), "2".to_string())]);
        assert_eq!(count_elements(&tree), 9);

        // The escaped ampersand comes back decoded.
        let device = match &tree.children[0] {
            Node::Element(e) => e,
            other => panic!("unexpected: {:?}", other),
        };
        let owner = match &device.children[1] {
            Node::Element(e) => e,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(owner.children, vec![Node::Text("J. & M. Harper".to_string())]);
    }

    #[test]
    fn print_then_parse_yields_the_same_tree() {
        let first = parse(SAMPLE_DOCUMENT).unwrap();
        let printed = print_tree(&first);
        let second = parse(&printed).unwrap();
        assert_eq!(first, second);

        // And printing is a fixed point from then on.
        assert_eq!(printed, print_tree(&second));
    }

    #[test]
    fn empty_element_prints_self_closed() {
        let tree = parse("<a></a>").unwrap();
        assert!(tree.children.is_empty());
        assert_eq!(
            print_tree(&tree),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<a/>\n"
        );
    }

    #[test]
    fn entities_decode_in_text_and_attributes() {
        let tree = parse(r#"<a note="&quot;x&quot; &amp; y">&lt;tag&gt; &apos;q&apos;</a>"#).unwrap();
        assert_eq!(tree.attributes[0].1, "\"x\" & y");
        assert_eq!(tree.children, vec![Node::Text("<tag> 'q'".to_string())]);

        let printed = print_tree(&tree);
        assert!(printed.contains("&lt;tag&gt;"));
        assert!(printed.contains("&quot;x&quot; &amp; y"));
    }

    #[test]
    fn mismatched_close_reports_both_names() {
        match parse("<a><b></a></a>").unwrap_err() {
            XmlError::MismatchedClose {
                expected, found, ..
            } => {
                assert_eq!(expected, "b");
                assert_eq!(found, "a");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn eof_inside_a_tag_names_the_context() {
        match parse("<a>").unwrap_err() {
            XmlError::UnexpectedEof { context, .. } => {
                assert_eq!(context, "looking for a closing tag");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(parse("<a"), Err(XmlError::UnexpectedEof { .. })));
        assert!(matches!(
            parse("<a><!-- open"),
            Err(XmlError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn bad_entities_and_bare_ampersands_are_distinct() {
        match parse("<a>&bogus;</a>").unwrap_err() {
            XmlError::BadEntity { entity, .. } => assert_eq!(entity, "bogus"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            parse("<a>fish & chips</a>"),
            Err(XmlError::BareAmpersand { line: 1, col: 9 })
        ));
    }

    #[test]
    fn error_positions_track_lines_and_columns() {
        let source = "<a>\n  <b>\n    &oops;\n  </b>\n</a>";
        match parse(source).unwrap_err() {
            XmlError::BadEntity { line, col, .. } => {
                assert_eq!(line, 3);
                assert_eq!(col, 5);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn attributes_keep_document_order_and_either_quote() {
        let tree = parse("<a b='1' c=\"2\" d='3'/>").unwrap();
        let names: Vec<&str> = tree.attributes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn cdata_is_kept_raw_through_a_round_trip() {
        let tree = parse("<a><![CDATA[<raw & stuff>]]></a>").unwrap();
        assert_eq!(
            tree.children,
            vec![Node::CData("<raw & stuff>".to_string())]
        );
        let reparsed = parse(&print_tree(&tree)).unwrap();
        assert_eq!(tree, reparsed);
    }

    #[test]
    fn surrounding_whitespace_is_canonicalized_away() {
        let tree = parse("<a>\n   hello there \n   <b/>\n</a>").unwrap();
        assert_eq!(tree.children.len(), 2);
        assert_eq!(tree.children[0], Node::Text("hello there".to_string()));
        assert!(matches!(&tree.children[1], Node::Element(e) if e.name == "b"));
    }

    #[test]
    fn content_after_the_root_element_is_refused() {
        assert!(matches!(
            parse("<a/><b/>"),
            Err(XmlError::TrailingContent { .. })
        ));
        // Comments and whitespace after the root are fine.
        assert!(parse("<a/>\n<!-- done -->\n").is_ok());
    }

    #[test]
    fn declaration_and_pis_are_skipped_not_kept() {
        let tree = parse("<?xml version=\"1.0\"?><?custom hint?><a/>").unwrap();
        assert_eq!(tree.name, "a");
        assert!(tree.children.is_empty());
    }
}
