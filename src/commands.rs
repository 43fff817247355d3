//! NNTP command builders
//!
//! Pure `format!` builders returning full wire lines (CRLF included) so the
//! engines and the tests share one source of wire truth.

/// Build CAPABILITIES command (RFC 3977 §5.2)
pub fn capabilities() -> &'static str {
    "CAPABILITIES\r\n"
}

/// Build MODE READER command (RFC 3977 §5.3)
pub fn mode_reader() -> &'static str {
    "MODE READER\r\n"
}

/// Build MODE STREAM command (RFC 4644 §2.3)
pub fn mode_stream() -> &'static str {
    "MODE STREAM\r\n"
}

/// Build STARTTLS command (RFC 4642)
pub fn starttls() -> &'static str {
    "STARTTLS\r\n"
}

/// Build QUIT command
pub fn quit() -> &'static str {
    "QUIT\r\n"
}

/// Build AUTHINFO USER command
pub fn authinfo_user(username: &str) -> String {
    format!("AUTHINFO USER {}\r\n", username)
}

/// Build AUTHINFO PASS command
pub fn authinfo_pass(password: &str) -> String {
    format!("AUTHINFO PASS {}\r\n", password)
}

/// Build CHECK command (RFC 4644 §2.4)
pub fn check(msgid: &str) -> String {
    format!("CHECK {}\r\n", msgid)
}

/// Build TAKETHIS command (RFC 4644 §2.5)
///
/// The article itself follows immediately, dot-stuffed and terminated.
pub fn takethis(msgid: &str) -> String {
    format!("TAKETHIS {}\r\n", msgid)
}

/// Build IHAVE command (RFC 3977 §6.3.2)
pub fn ihave(msgid: &str) -> String {
    format!("IHAVE {}\r\n", msgid)
}

/// Build ARTICLE command for a message-id
pub fn article(msgid: &str) -> String {
    format!("ARTICLE {}\r\n", msgid)
}

/// Build GROUP command (RFC 3977 §6.1.1)
pub fn group(name: &str) -> String {
    format!("GROUP {}\r\n", name)
}

/// Build XOVER command (RFC 2980 §2.8)
pub fn xover(range: &str) -> String {
    format!("XOVER {}\r\n", range)
}

/// Build NEWSGROUPS command (RFC 3977 §7.3)
///
/// `date` is `yyyymmdd`, `time` is `hhmmss`; the timezone is always GMT.
pub fn newsgroups(date: &str, time: &str) -> String {
    format!("NEWSGROUPS {} {} GMT\r\n", date, time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_end_with_crlf() {
        for cmd in [
            capabilities().to_string(),
            mode_reader().to_string(),
            mode_stream().to_string(),
            starttls().to_string(),
            quit().to_string(),
            authinfo_user("alice"),
            authinfo_pass("hunter2"),
            check("<a@b>"),
            takethis("<a@b>"),
            ihave("<a@b>"),
            article("<a@b>"),
            group("overchan.test"),
            xover("0"),
            newsgroups("20260801", "000000"),
        ] {
            assert!(cmd.ends_with("\r\n"), "missing CRLF: {:?}", cmd);
            assert_eq!(cmd.matches("\r\n").count(), 1);
        }
    }

    #[test]
    fn test_check_format() {
        assert_eq!(check("<a@x>"), "CHECK <a@x>\r\n");
    }

    #[test]
    fn test_takethis_format() {
        assert_eq!(takethis("<a@x>"), "TAKETHIS <a@x>\r\n");
    }

    #[test]
    fn test_newsgroups_format() {
        assert_eq!(
            newsgroups("20260801", "000000"),
            "NEWSGROUPS 20260801 000000 GMT\r\n"
        );
    }
}
