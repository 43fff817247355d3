//! MIME header block parsing
//!
//! Headers are kept as an ordered multi-map: keys match case-insensitively,
//! repeated fields preserve their order, and the original spelling of each
//! name survives a round-trip back onto the wire.

use std::fmt::Write;

/// Ordered, case-insensitive MIME header multi-map
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header block
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse raw (already unstuffed) header lines, folding continuations.
    ///
    /// Continuation lines start with space or tab and extend the previous
    /// field's value with a single space. Lines without a colon are dropped.
    pub fn parse_lines(lines: &[String]) -> Self {
        let mut entries: Vec<(String, String)> = Vec::with_capacity(lines.len());
        for line in lines {
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some(last) = entries.last_mut() {
                    if !last.1.is_empty() {
                        last.1.push(' ');
                    }
                    last.1.push_str(line.trim());
                }
                continue;
            }
            if let Some(colon) = line.find(':') {
                let name = line[..colon].trim().to_string();
                let value = line[colon + 1..].trim().to_string();
                entries.push((name, value));
            }
        }
        Self { entries }
    }

    /// First value for a header, matched case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First value for a header, or the empty string
    pub fn get_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    /// All values for a header, in original order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the header is present at all
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace the first occurrence of a header, or append it
    pub fn set(&mut self, name: &str, value: &str) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            entry.1 = value.to_string();
        } else {
            self.entries.push((name.to_string(), value.to_string()));
        }
    }

    /// Append a header without touching existing occurrences
    pub fn append(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    /// Remove every occurrence of a header
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Prepend an instance name to the Path header (`instance!old-path`),
    /// creating the header if the article had none
    pub fn prepend_path(&mut self, instance: &str) {
        match self.get("Path") {
            Some(old) => {
                let new = format!("{}!{}", instance, old);
                self.set("Path", &new);
            }
            None => self.set("Path", instance),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the block has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Header lines in wire form, without the blank separator
    pub fn wire_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect()
    }

    /// Full wire form: `name: value` lines, CRLF-terminated, plus the blank
    /// separator line
    pub fn wire_format(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.entries {
            let _ = write!(out, "{}: {}\r\n", k, v);
        }
        out.push_str("\r\n");
        out
    }
}

/// First token of the comma-separated Newsgroups value
pub fn first_newsgroup(headers: &Headers) -> &str {
    headers
        .get_or_empty("Newsgroups")
        .split(',')
        .next()
        .unwrap_or("")
        .trim()
}

/// First message-id token of the References value, if any
pub fn first_reference(headers: &Headers) -> Option<&str> {
    headers
        .get("References")
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .and_then(|r| r.split_whitespace().next())
}
