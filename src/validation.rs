//! Article identifier validation
//!
//! Syntactic predicates for message-ids and newsgroup names, applied before
//! any article is admitted, offered or fetched.

/// Validates a Message-ID token (RFC 5536 Section 3.1.3)
///
/// Message-IDs must have the format `<local-part@domain>`:
/// - Must start with `<` and end with `>`
/// - Must contain exactly one `@` sign with non-empty parts
/// - Must not contain whitespace or control characters
///
/// # Examples
///
/// ```
/// use nntp_peer::validation::valid_message_id;
///
/// assert!(valid_message_id("<abc123@example.com>"));
/// assert!(!valid_message_id("abc123@example.com")); // Missing brackets
/// assert!(!valid_message_id("<abc123>"));           // Missing @
/// ```
pub fn valid_message_id(message_id: &str) -> bool {
    // Minimum form: <a@b>
    if message_id.len() < 5 {
        return false;
    }
    if !message_id.starts_with('<') || !message_id.ends_with('>') {
        return false;
    }
    let content = &message_id[1..message_id.len() - 1];
    if content.matches('@').count() != 1 {
        return false;
    }
    let (local, domain) = match content.split_once('@') {
        Some(parts) => parts,
        None => return false,
    };
    if local.is_empty() || domain.is_empty() {
        return false;
    }
    content.chars().all(|ch| !ch.is_whitespace() && !ch.is_control())
}

/// Validates a newsgroup name (RFC 5536 Section 3.1.4)
///
/// Components separated by dots, each non-empty, made of lowercase letters,
/// digits, `+`, `-`, `_`.
pub fn valid_newsgroup(newsgroup: &str) -> bool {
    if newsgroup.is_empty() || newsgroup.starts_with('.') || newsgroup.ends_with('.') {
        return false;
    }
    newsgroup.split('.').all(|component| {
        !component.is_empty()
            && component.chars().all(|ch| {
                ch.is_ascii_lowercase()
                    || ch.is_ascii_digit()
                    || ch == '+'
                    || ch == '-'
                    || ch == '_'
            })
    })
}

/// Checks that an Ed25519 pubkey header value is well-formed (64 hex chars)
pub fn well_formed_pubkey(pubkey: &str) -> bool {
    pubkey.len() == 64 && pubkey.chars().all(|ch| ch.is_ascii_hexdigit())
}
