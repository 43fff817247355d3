//! Peer capability negotiation (RFC 3977 Section 5.2)
//!
//! The CAPABILITIES dot-list is folded straight into the few flags outbound
//! mode selection cares about. Anything else a peer may advertise (COMPRESS,
//! OVER, HDR, ...) plays no role in peering and is dropped on parse. Some
//! deployed daemons advertise the vendor token `POSTIHAVESTREAMING`, which
//! implies streaming support with the reader surface suppressed.

/// What a remote peer offers us, as far as peering is concerned
#[must_use]
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    streaming: bool,
    reader: bool,
    starttls: bool,
    post_ihave_streaming: bool,
}

impl Capabilities {
    /// Fold the CAPABILITIES dot-list lines into peering flags.
    ///
    /// Only the leading token of each line matters here; tokens match
    /// case-insensitively and arguments (as in `VERSION 2`) are ignored.
    pub fn parse(lines: &[String]) -> Self {
        let mut caps = Self::default();
        for line in lines {
            let Some(token) = line.split_whitespace().next() else {
                continue;
            };
            match token.to_ascii_uppercase().as_str() {
                "STREAMING" => caps.streaming = true,
                "READER" | "MODE-READER" => caps.reader = true,
                "STARTTLS" => caps.starttls = true,
                "POSTIHAVESTREAMING" => caps.post_ihave_streaming = true,
                _ => {}
            }
        }
        caps
    }

    /// Whether the peer accepts MODE STREAM
    pub fn supports_streaming(&self) -> bool {
        self.streaming || self.post_ihave_streaming
    }

    /// Whether the peer offers the reader surface.
    ///
    /// `POSTIHAVESTREAMING` suppresses reader mode even when the peer also
    /// lists a reader token.
    pub fn supports_reader(&self) -> bool {
        self.reader && !self.post_ihave_streaming
    }

    /// Whether the peer accepts STARTTLS
    pub fn supports_starttls(&self) -> bool {
        self.starttls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(lines: &[&str]) -> Capabilities {
        let lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        Capabilities::parse(&lines)
    }

    #[test]
    fn test_parse_typical_list() {
        let caps = caps(&["VERSION 2", "READER", "POST", "IHAVE", "STREAMING"]);
        assert!(caps.supports_streaming());
        assert!(caps.supports_reader());
        assert!(!caps.supports_starttls());
    }

    #[test]
    fn test_empty_list_offers_nothing() {
        let caps = caps(&[]);
        assert!(!caps.supports_streaming());
        assert!(!caps.supports_reader());
        assert!(!caps.supports_starttls());
    }

    #[test]
    fn test_case_insensitive_tokens() {
        let caps = caps(&["streaming", "Reader"]);
        assert!(caps.supports_streaming());
        assert!(caps.supports_reader());
    }

    #[test]
    fn test_arguments_and_unknown_tokens_ignored() {
        let caps = caps(&["VERSION 2", "COMPRESS DEFLATE GZIP", "", "OVER MSGID"]);
        assert!(!caps.supports_streaming());
        assert!(!caps.supports_reader());
    }

    #[test]
    fn test_mode_reader_token() {
        let caps = caps(&["MODE-READER"]);
        assert!(caps.supports_reader());
        assert!(!caps.supports_streaming());
    }

    #[test]
    fn test_postihavestreaming_implies_streaming() {
        let caps = caps(&["POSTIHAVESTREAMING"]);
        assert!(caps.supports_streaming());
        assert!(!caps.supports_reader());
    }

    #[test]
    fn test_postihavestreaming_suppresses_reader() {
        let caps = caps(&["POSTIHAVESTREAMING", "READER"]);
        assert!(caps.supports_streaming());
        assert!(!caps.supports_reader());
    }

    #[test]
    fn test_starttls() {
        let caps = caps(&["VERSION 2", "STARTTLS"]);
        assert!(caps.supports_starttls());
    }
}
