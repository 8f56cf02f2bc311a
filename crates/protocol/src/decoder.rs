//! Incremental, error-tolerant stanza decoder.
//!
//! The negotiation server is not a strict XML emitter: stanzas arrive in
//! arbitrary read-sized pieces, the stream is re-opened in place after
//! authentication, and the occasional malformed fragment must not kill the
//! session. The decoder therefore scans markup byte-wise, resolves
//! namespaces from in-scope `xmlns` declarations, and emits an [`Element`]
//! for every fully-closed child of the stream envelope. Anything it cannot
//! make sense of is skipped and scanning resumes at the next tag.

use std::collections::{HashMap, VecDeque};

use crate::element::Element;

/// Prefix-to-namespace mapping in scope for one element.
type NsScope = HashMap<String, String>;

struct OpenElement {
    element: Element,
    scope: NsScope,
}

/// Streaming stanza decoder.
///
/// Feed raw transport bytes with [`feed`](Self::feed) and drain completed
/// stanzas with [`next_stanza`](Self::next_stanza). Elements split across
/// reads are buffered until their closing tag arrives.
#[derive(Default)]
pub struct StanzaDecoder {
    buf: Vec<u8>,
    stack: Vec<OpenElement>,
    /// Namespace declarations carried by the stream envelope; children
    /// inherit these until the next stream restart.
    root_scope: NsScope,
    ready: VecDeque<Element>,
}

impl StanzaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes and scans for newly completed stanzas.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        self.scan();
    }

    /// Pops the next fully-closed stanza, if any.
    pub fn next_stanza(&mut self) -> Option<Element> {
        self.ready.pop_front()
    }

    fn scan(&mut self) {
        let mut pos = 0;
        while pos < self.buf.len() {
            let Some(rel) = self.buf[pos..].iter().position(|&b| b == b'<') else {
                // Trailing character data belongs to the open element.
                let text = self.buf[pos..].to_vec();
                self.push_text(&text);
                pos = self.buf.len();
                break;
            };
            if rel > 0 {
                let text = self.buf[pos..pos + rel].to_vec();
                self.push_text(&text);
            }
            let lt = pos + rel;

            // Comments may legitimately contain '>'.
            if self.buf[lt + 1..].starts_with(b"!--") {
                match find_subsequence(&self.buf[lt..], b"-->") {
                    Some(end) => {
                        pos = lt + end + 3;
                        continue;
                    }
                    None => {
                        pos = lt;
                        break; // incomplete comment, wait for more bytes
                    }
                }
            }

            let Some(gt) = find_tag_end(&self.buf[lt + 1..]) else {
                pos = lt;
                break; // incomplete tag, wait for more bytes
            };
            let tag = self.buf[lt + 1..lt + 1 + gt].to_vec();
            self.handle_tag(&tag);
            pos = lt + 1 + gt + 1;
        }
        self.buf.drain(..pos);
    }

    fn handle_tag(&mut self, tag: &[u8]) {
        let raw = String::from_utf8_lossy(tag);
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }
        match raw.as_bytes()[0] {
            b'?' | b'!' => {} // prolog, processing instruction, doctype
            b'/' => self.close_element(&raw[1..]),
            _ => self.open_element(raw),
        }
    }

    fn open_element(&mut self, body: &str) {
        let self_closing = body.ends_with('/');
        let body = body.trim_end_matches('/').trim_end();

        let name_end = body
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(body.len());
        let name = &body[..name_end];
        if name.is_empty() {
            return;
        }
        let raw_attrs = parse_attrs(&body[name_end..]);

        // Build this element's namespace scope from the parent's.
        let mut scope = match self.stack.last() {
            Some(open) => open.scope.clone(),
            None => self.root_scope.clone(),
        };
        for (key, value) in &raw_attrs {
            if key == "xmlns" {
                scope.insert(String::new(), value.clone());
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                scope.insert(prefix.to_string(), value.clone());
            }
        }

        let (prefix, local) = split_name(name);
        let ns = match prefix {
            // An undeclared prefix is kept literally rather than rejected.
            Some(p) => scope.get(p).cloned().unwrap_or_else(|| p.to_string()),
            None => scope.get("").cloned().unwrap_or_default(),
        };

        // A repeated stream header on the same socket is a stream restart
        // (the protocol re-opens the stream after authentication): adopt its
        // declarations and reset element depth.
        if local == "stream" {
            self.root_scope = scope;
            self.stack.clear();
            return;
        }

        let attrs = raw_attrs
            .into_iter()
            .filter(|(k, _)| k != "xmlns" && !k.starts_with("xmlns:"))
            .map(|(k, v)| (split_name(&k).1.to_string(), v))
            .collect();

        let element = Element {
            ns,
            local: local.to_string(),
            attrs,
            children: Vec::new(),
            text: String::new(),
        };

        if self_closing {
            self.finish(element);
        } else {
            self.stack.push(OpenElement { element, scope });
        }
    }

    fn close_element(&mut self, name: &str) {
        let name = name.trim();
        let (_, local) = split_name(name);
        // Match the deepest open element with this local name; a stray end
        // tag that matches nothing is dropped.
        let Some(idx) = self.stack.iter().rposition(|o| o.element.local == local) else {
            return;
        };
        // Close anything the server left dangling above the match.
        while self.stack.len() > idx + 1 {
            let open = self.stack.pop().expect("stack length checked");
            self.finish(open.element);
        }
        let open = self.stack.pop().expect("stack length checked");
        self.finish(open.element);
    }

    fn finish(&mut self, element: Element) {
        match self.stack.last_mut() {
            Some(parent) => parent.element.children.push(element),
            None => self.ready.push_back(element),
        }
    }

    fn push_text(&mut self, bytes: &[u8]) {
        // Character data outside any stanza is inter-stanza whitespace (or
        // garbage); either way it is dropped.
        if let Some(open) = self.stack.last_mut() {
            let text = String::from_utf8_lossy(bytes);
            open.element.text.push_str(&unescape(&text));
        }
    }
}

/// Returns the offset of the tag-closing `>`, skipping quoted attribute
/// values, or `None` if the tag is still incomplete.
fn find_tag_end(bytes: &[u8]) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'>' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

/// Parses `key='value'` pairs; tolerates double quotes, bare values and
/// valueless keys.
fn parse_attrs(s: &str) -> Vec<(String, String)> {
    let b = s.as_bytes();
    let mut attrs = Vec::new();
    let mut i = 0;
    while i < b.len() {
        while i < b.len() && b[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= b.len() {
            break;
        }
        let key_start = i;
        while i < b.len() && !b[i].is_ascii_whitespace() && b[i] != b'=' {
            i += 1;
        }
        let key = s[key_start..i].to_string();
        while i < b.len() && b[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if i < b.len() && b[i] == b'=' {
            i += 1;
            while i < b.len() && b[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < b.len() && (b[i] == b'\'' || b[i] == b'"') {
                let q = b[i];
                i += 1;
                let v_start = i;
                while i < b.len() && b[i] != q {
                    i += 1;
                }
                value = s[v_start..i].to_string();
                if i < b.len() {
                    i += 1;
                }
            } else {
                let v_start = i;
                while i < b.len() && !b[i].is_ascii_whitespace() {
                    i += 1;
                }
                value = s[v_start..i].to_string();
            }
        }
        if !key.is_empty() {
            attrs.push((key, unescape(&value)));
        }
    }
    attrs
}

/// Decodes the five predefined XML entities; unknown references pass
/// through untouched.
fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let replaced = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(entity, _)| rest.starts_with(entity));
        match replaced {
            Some((entity, ch)) => {
                out.push(*ch);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
