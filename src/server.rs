//! Inbound command dispatch
//!
//! One `ServerSession` drives an accepted connection: it greets, enforces
//! the pre-mode command set, answers the reader surface out of the database
//! and the store, and ingests articles pushed at us via TAKETHIS, IHAVE and
//! POST. MODE STREAM spawns this node's own [`StreamEngine`] sender onto
//! the same connection, so articles flow both ways.

use crate::admission::{self, Admission};
use crate::codec::{DotBody, LineCodec, LineReader, SharedWriter};
use crate::config::{DaemonConfig, FeedPolicy};
use crate::conn::{Connection, ConnectionChannels, DUMMY_MSGID, Mode};
use crate::error::{PeerError, Result};
use crate::headers::{Headers, first_newsgroup};
use crate::ingest::{self, IngestOutcome};
use crate::response::codes;
use crate::storage::{ArticleStore, Daemon, Database};
use crate::stream::StreamEngine;
use crate::tls;
use crate::validation::valid_message_id;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Transport of an inbound session: duplex until MODE STREAM splits it so
/// the sender task can share the write half
enum Io {
    Duplex(LineCodec),
    Split {
        reader: LineReader,
        writer: SharedWriter,
    },
    Gone,
}

/// One accepted peer connection
pub struct ServerSession {
    conn: Arc<Connection>,
    store: Arc<dyn ArticleStore>,
    db: Arc<dyn Database>,
    daemon: Arc<dyn Daemon>,
    config: DaemonConfig,
    policy: Option<FeedPolicy>,
    io: Io,
    channels: Option<ConnectionChannels>,
    group: Option<String>,
    selected: Option<(u64, String)>,
    pending_user: Option<String>,
}

fn split_command(line: &str) -> (String, &str) {
    match line.split_once(' ') {
        Some((cmd, arg)) => (cmd.to_uppercase(), arg.trim()),
        None => (line.to_uppercase(), ""),
    }
}

fn empty_body() -> DotBody {
    DotBody {
        data: Vec::new(),
        truncated: false,
    }
}

impl ServerSession {
    /// Build a session over a freshly accepted transport
    pub fn new(
        conn: Arc<Connection>,
        channels: ConnectionChannels,
        codec: LineCodec,
        store: Arc<dyn ArticleStore>,
        db: Arc<dyn Database>,
        daemon: Arc<dyn Daemon>,
        config: DaemonConfig,
        policy: Option<FeedPolicy>,
    ) -> Self {
        Self {
            conn,
            store,
            db,
            daemon,
            config,
            policy,
            io: Io::Duplex(codec),
            channels: Some(channels),
            group: None,
            selected: None,
            pending_user: None,
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        match &mut self.io {
            Io::Duplex(codec) => codec.read_line().await,
            Io::Split { reader, .. } => reader.read_line().await,
            Io::Gone => Err(PeerError::ConnectionClosed),
        }
    }

    async fn read_mime_block(&mut self) -> Result<(Vec<String>, bool)> {
        match &mut self.io {
            Io::Duplex(codec) => codec.read_mime_block().await,
            Io::Split { reader, .. } => reader.read_mime_block().await,
            Io::Gone => Err(PeerError::ConnectionClosed),
        }
    }

    async fn read_dot_body(&mut self, limit: u64) -> Result<DotBody> {
        match &mut self.io {
            Io::Duplex(codec) => codec.read_dot_body(limit).await,
            Io::Split { reader, .. } => reader.read_dot_body(limit).await,
            Io::Gone => Err(PeerError::ConnectionClosed),
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        match &mut self.io {
            Io::Duplex(codec) => codec.send_line(line).await,
            Io::Split { writer, .. } => writer.send_line(line).await,
            Io::Gone => Err(PeerError::ConnectionClosed),
        }
    }

    async fn send_dot_list(&mut self, status: &str, lines: &[String]) -> Result<()> {
        match &mut self.io {
            Io::Duplex(codec) => codec.send_dot_list(status, lines).await,
            Io::Split { writer, .. } => writer.send_dot_list(status, lines).await,
            Io::Gone => Err(PeerError::ConnectionClosed),
        }
    }

    async fn send_block(&mut self, status: &str, body: &[u8]) -> Result<()> {
        match &mut self.io {
            Io::Duplex(codec) => codec.send_block(status, body).await,
            Io::Split { writer, .. } => writer.send_block(status, body).await,
            Io::Gone => Err(PeerError::ConnectionClosed),
        }
    }

    /// Greet and dispatch commands until QUIT or disconnect
    pub async fn run(mut self) -> Result<()> {
        self.send_line("200 Posting Allowed").await?;
        loop {
            let line = match self.read_line().await {
                Ok(line) => line,
                Err(PeerError::ConnectionClosed) => {
                    debug!("{}: peer disconnected", self.conn.display_name);
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if line.is_empty() {
                continue;
            }
            if !self.dispatch(&line).await? {
                return Ok(());
            }
        }
    }

    /// Handle one command line; `Ok(false)` ends the session
    async fn dispatch(&mut self, line: &str) -> Result<bool> {
        trace!("{}: command: {}", self.conn.display_name, line);
        let (cmd, arg) = split_command(line);
        match cmd.as_str() {
            "QUIT" => {
                self.send_line("205 closing connection").await?;
                return Ok(false);
            }
            "CAPABILITIES" => self.handle_capabilities().await?,
            "STARTTLS" => return self.handle_starttls().await,
            "MODE" => self.handle_mode(arg).await?,
            "AUTHINFO" => self.handle_authinfo(arg).await?,
            _ if self.conn.mode() == Mode::Unset => {
                // nothing else is legal before a mode is negotiated
                self.send_line("500 mode not set").await?;
            }
            "CHECK" => self.handle_check(arg).await?,
            "TAKETHIS" => self.handle_takethis(arg).await?,
            "IHAVE" => self.handle_ihave(arg).await?,
            "POST" => self.handle_post().await?,
            "ARTICLE" => self.handle_article(arg).await?,
            "HEAD" => self.handle_head(arg).await?,
            "STAT" => self.handle_stat(arg).await?,
            "GROUP" => self.handle_group(arg).await?,
            "LISTGROUP" => self.handle_listgroup(arg).await?,
            "LIST" => self.handle_list().await?,
            "NEWSGROUPS" => self.handle_newsgroups().await?,
            "XOVER" => self.handle_xover().await?,
            "XHDR" => self.handle_xhdr(arg).await?,
            _ => {
                self.send_line("500 command not recognized").await?;
            }
        }
        Ok(true)
    }

    async fn handle_capabilities(&mut self) -> Result<()> {
        let mut lines = vec![
            "VERSION 2".to_string(),
            "READER".to_string(),
            "STREAMING".to_string(),
            format!("IMPLEMENTATION {}", self.config.instance_name),
            "POST".to_string(),
            "IHAVE".to_string(),
            "AUTHINFO".to_string(),
        ];
        if self.daemon.can_tls()
            && self.daemon.get_our_tls_config().is_some()
            && self.conn.tls_record().is_none()
        {
            lines.push("STARTTLS".to_string());
        }
        self.send_dot_list("101 capability list follows", &lines).await
    }

    async fn handle_starttls(&mut self) -> Result<bool> {
        if self.conn.mode() != Mode::Unset {
            self.send_line("500 mode already set").await?;
            return Ok(true);
        }
        if self.conn.tls_record().is_some() {
            self.send_line("502 already using TLS").await?;
            return Ok(true);
        }
        let Some(tls_config) = self.daemon.get_our_tls_config() else {
            self.send_line("580 can not initiate TLS negotiation").await?;
            return Ok(true);
        };
        let codec = match std::mem::replace(&mut self.io, Io::Gone) {
            Io::Duplex(codec) => codec,
            other => {
                self.io = other;
                return Err(PeerError::InvalidResponse(
                    "STARTTLS on a split connection".to_string(),
                ));
            }
        };
        match tls::accept_starttls(codec, tls_config).await {
            Ok((codec, record)) => {
                debug!(
                    "{}: STARTTLS established: {:?}",
                    self.conn.display_name, record.protocol
                );
                self.io = Io::Duplex(codec);
                self.conn.set_tls_record(record);
                // a completed handshake authenticates the peer
                self.conn.set_authenticated(true);
                Ok(true)
            }
            Err(e) => {
                warn!("{}: STARTTLS failed: {}", self.conn.display_name, e);
                Err(e)
            }
        }
    }

    async fn handle_mode(&mut self, arg: &str) -> Result<()> {
        match arg.to_uppercase().as_str() {
            "READER" => {
                self.conn.set_mode(Mode::Reader);
                if self.conn.is_authenticated() {
                    self.send_line("200 posting allowed").await
                } else {
                    self.send_line("201 no posting").await
                }
            }
            "STREAM" => {
                if !self.conn.is_authenticated() {
                    return self.send_line("483 authentication required").await;
                }
                if let Io::Duplex(_) = self.io {
                    let Io::Duplex(codec) = std::mem::replace(&mut self.io, Io::Gone) else {
                        unreachable!();
                    };
                    let (reader, writer) = codec.split();
                    let shared = SharedWriter::new(writer);
                    self.io = Io::Split {
                        reader,
                        writer: shared.clone(),
                    };
                    if let Some(channels) = self.channels.take() {
                        let engine = StreamEngine::new(
                            self.conn.clone(),
                            self.store.clone(),
                            shared,
                            channels,
                        );
                        let name = self.conn.display_name.clone();
                        tokio::spawn(async move {
                            if let Err(e) = engine.run().await {
                                debug!("{}: stream sender ended: {}", name, e);
                            }
                        });
                    }
                }
                self.conn.set_mode(Mode::Stream);
                self.send_line("203 streaming permitted").await
            }
            _ => self.send_line("501 unknown mode").await,
        }
    }

    async fn handle_authinfo(&mut self, arg: &str) -> Result<()> {
        let (sub, value) = match arg.split_once(' ') {
            Some((sub, value)) => (sub.to_uppercase(), value.trim()),
            None => (arg.to_uppercase(), ""),
        };
        match sub.as_str() {
            "USER" => {
                self.pending_user = Some(value.to_string());
                self.send_line("381 password required").await
            }
            "PASS" => {
                let Some(user) = self.pending_user.clone() else {
                    return self.send_line("482 authinfo out of sequence").await;
                };
                let exists = match self.db.check_nntp_user_exists(&user) {
                    Ok(exists) => exists,
                    Err(e) => {
                        warn!("{}: user lookup failed: {}", self.conn.display_name, e);
                        return self.send_line("501 lookup failure").await;
                    }
                };
                if !exists {
                    return self.send_line("481 authentication rejected").await;
                }
                match self.db.check_nntp_login(&user, value) {
                    Ok(true) => {
                        self.conn.set_authenticated(true);
                        self.conn.set_username(&user);
                        info!("{}: authenticated as {}", self.conn.display_name, user);
                        self.send_line("281 authentication accepted").await
                    }
                    Ok(false) => self.send_line("481 authentication rejected").await,
                    Err(e) => {
                        warn!("{}: login check failed: {}", self.conn.display_name, e);
                        self.send_line("501 lookup failure").await
                    }
                }
            }
            _ => self.send_line("501 invalid syntax").await,
        }
    }

    async fn handle_check(&mut self, arg: &str) -> Result<()> {
        if arg.is_empty() {
            return self.send_line("501 invalid syntax").await;
        }
        if self.conn.mode() != Mode::Stream {
            return self.send_line(&format!("431 {}", arg)).await;
        }
        let wanted = arg != DUMMY_MSGID
            && valid_message_id(arg)
            && !self.store.has_article(arg)
            && !self.db.article_banned(arg);
        if wanted {
            self.send_line(&format!("{} {}", codes::CHECK_SEND, arg)).await
        } else {
            self.send_line(&format!("{} {}", codes::CHECK_NOT_WANTED, arg))
                .await
        }
    }

    /// Read the article block that follows TAKETHIS/IHAVE/POST
    async fn read_article(&mut self) -> Result<(Headers, DotBody)> {
        let (lines, body_follows) = self.read_mime_block().await?;
        let headers = Headers::parse_lines(&lines);
        let body = if body_follows {
            let group = first_newsgroup(&headers).to_string();
            let limit = self.daemon.message_size_limit_for(&group);
            self.read_dot_body(limit).await?
        } else {
            empty_body()
        };
        Ok((headers, body))
    }

    fn gather_facts(&self, headers: &Headers) -> admission::AdmissionFacts {
        ingest::gather_facts(
            headers,
            self.policy.as_ref(),
            self.store.as_ref(),
            self.db.as_ref(),
            self.daemon.as_ref(),
        )
    }

    fn accept_article(&mut self, headers: &mut Headers, body: &DotBody) -> IngestOutcome {
        ingest::request_missing_root(
            headers,
            self.store.as_ref(),
            self.db.as_ref(),
            self.daemon.as_ref(),
        );
        ingest::store_article(
            headers,
            &body.data,
            &self.config.instance_name,
            self.store.as_ref(),
            self.daemon.as_ref(),
        )
    }

    async fn handle_takethis(&mut self, arg: &str) -> Result<()> {
        // the article follows unconditionally; consume it before replying
        let msgid = arg.to_string();
        let (mut headers, body) = self.read_article().await?;

        if self.conn.mode() != Mode::Stream || !valid_message_id(&msgid) {
            return self.send_line(&format!("439 {}", msgid)).await;
        }
        match headers.get("Message-ID") {
            None => headers.set("Message-ID", &msgid),
            Some(hdr_id) if hdr_id != msgid => {
                return self
                    .send_line(&format!("439 {} message-id mismatch", msgid))
                    .await;
            }
            Some(_) => {}
        }

        let facts = self.gather_facts(&headers);
        let verdict =
            admission::check(&headers, self.conn.is_authenticated(), &facts, &self.config);
        match verdict {
            Admission::Accept => {
                if body.truncated {
                    return self
                        .send_line(&format!("439 {} message too large", msgid))
                        .await;
                }
                match self.accept_article(&mut headers, &body) {
                    IngestOutcome::Stored => self.send_line(&format!("239 {}", msgid)).await,
                    IngestOutcome::Duplicate => {
                        self.send_line(&format!("439 {} duplicate", msgid)).await
                    }
                    IngestOutcome::Failed => {
                        self.send_line(&format!("439 {} store failure", msgid)).await
                    }
                }
            }
            Admission::Ban { reason } => {
                info!("{}: banning {}: {}", self.conn.display_name, msgid, reason);
                self.db.ban_article(&msgid, &reason);
                self.send_line(&format!("439 {} {}", msgid, reason)).await
            }
            Admission::Reject { reason } => {
                debug!("{}: rejecting {}: {}", self.conn.display_name, msgid, reason);
                self.send_line(&format!("439 {} {}", msgid, reason)).await
            }
        }
    }

    async fn handle_ihave(&mut self, arg: &str) -> Result<()> {
        if !self.conn.is_authenticated() {
            return self.send_line("483 authentication required").await;
        }
        let msgid = arg.to_string();
        if !valid_message_id(&msgid)
            || self.store.has_article(&msgid)
            || self.db.has_article(&msgid)
            || self.db.article_banned(&msgid)
        {
            return self.send_line(&format!("435 {} article not wanted", msgid)).await;
        }
        self.send_line("335 send article to be transferred").await?;

        let (mut headers, body) = self.read_article().await?;
        if headers.get("Message-ID").is_none() {
            headers.set("Message-ID", &msgid);
        }
        let facts = self.gather_facts(&headers);
        let verdict = admission::check(&headers, true, &facts, &self.config);
        match verdict {
            Admission::Accept => {
                if body.truncated {
                    return self.send_line("437 message too large").await;
                }
                match self.accept_article(&mut headers, &body) {
                    IngestOutcome::Stored => self.send_line("235 article transferred ok").await,
                    IngestOutcome::Duplicate => self.send_line("437 duplicate").await,
                    IngestOutcome::Failed => self.send_line("436 transfer failed").await,
                }
            }
            Admission::Ban { reason } => {
                info!("{}: banning {}: {}", self.conn.display_name, msgid, reason);
                self.db.ban_article(&msgid, &reason);
                self.send_line(&format!("437 {}", reason)).await
            }
            Admission::Reject { reason } => self.send_line(&format!("437 {}", reason)).await,
        }
    }

    async fn handle_post(&mut self) -> Result<()> {
        if !self.conn.is_authenticated() {
            return self.send_line("440 posting not allowed").await;
        }
        self.send_line("340 send article to be posted").await?;
        let (mut headers, body) = self.read_article().await?;

        let msgid = match headers.get("Message-ID") {
            Some(id) if valid_message_id(id) => id.to_string(),
            _ => {
                let id = format!(
                    "<{}@{}>",
                    uuid::Uuid::new_v4().simple(),
                    self.config.instance_name
                );
                headers.set("Message-ID", &id);
                id
            }
        };
        headers.set("Date", &chrono::Utc::now().to_rfc2822());
        if !self.conn.remote_addr.is_empty() {
            match self.db.get_enc_address(&self.conn.remote_addr) {
                Ok(enc) => headers.set("X-Encrypted-Ip", &enc),
                Err(e) => warn!(
                    "{}: no encrypted address for {}: {}",
                    self.conn.display_name, self.conn.remote_addr, e
                ),
            }
        }

        let facts = self.gather_facts(&headers);
        let verdict = admission::check(&headers, true, &facts, &self.config);
        match verdict {
            Admission::Accept => {}
            Admission::Ban { reason } => {
                self.db.ban_article(&msgid, &reason);
                return self.send_line(&format!("441 {}", reason)).await;
            }
            Admission::Reject { reason } => {
                return self.send_line(&format!("441 {}", reason)).await;
            }
        }

        // a reply must reference well-formed message-ids only
        match headers.get("References").map(str::trim) {
            Some("") => headers.remove("References"),
            Some(refs) => {
                if refs.split_whitespace().any(|r| !valid_message_id(r)) {
                    return self.send_line("441 invalid reference").await;
                }
            }
            None => {}
        }
        if body.truncated {
            return self.send_line("441 message too large").await;
        }
        match self.accept_article(&mut headers, &body) {
            IngestOutcome::Stored => self.send_line(&format!("240 {} posted", msgid)).await,
            IngestOutcome::Duplicate => self.send_line("441 duplicate").await,
            IngestOutcome::Failed => self.send_line("441 posting failed").await,
        }
    }

    /// Resolve an ARTICLE/HEAD/STAT argument to (number, message-id), or the
    /// reply code to send instead
    fn resolve_target(&self, arg: &str) -> std::result::Result<(u64, String), u16> {
        if arg.is_empty() {
            return match &self.selected {
                Some((number, msgid)) => Ok((*number, msgid.clone())),
                None => Err(codes::NO_CURRENT_ARTICLE),
            };
        }
        if arg.starts_with('<') {
            if !valid_message_id(arg) {
                return Err(codes::NO_SUCH_ARTICLE_ID);
            }
            return Ok((0, arg.to_string()));
        }
        let Some(group) = &self.group else {
            return Err(codes::NO_GROUP_SELECTED);
        };
        let number: u64 = arg.parse().map_err(|_| codes::COMMAND_SYNTAX_ERROR)?;
        match self.db.get_msgid_for_nntp_id(group, number) {
            Some(msgid) => Ok((number, msgid)),
            None => Err(codes::NO_SUCH_ARTICLE_NUMBER),
        }
    }

    async fn reply_code(&mut self, code: u16) -> Result<()> {
        let text = match code {
            codes::NO_GROUP_SELECTED => "412 no newsgroup selected",
            codes::NO_CURRENT_ARTICLE => "420 no current article selected",
            codes::NO_SUCH_ARTICLE_NUMBER => "423 no article with that number",
            codes::NO_SUCH_ARTICLE_ID => "430 no such article",
            _ => "501 invalid syntax",
        };
        self.send_line(text).await
    }

    async fn handle_article(&mut self, arg: &str) -> Result<()> {
        let (number, msgid) = match self.resolve_target(arg) {
            Ok(target) => target,
            Err(code) => return self.reply_code(code).await,
        };
        match self.store.open_message(&msgid) {
            Ok(raw) => {
                if number > 0 {
                    self.selected = Some((number, msgid.clone()));
                }
                self.send_block(&format!("220 {} {}", number, msgid), &raw)
                    .await
            }
            Err(_) => self.send_line("430 no such article").await,
        }
    }

    async fn handle_head(&mut self, arg: &str) -> Result<()> {
        let (number, msgid) = match self.resolve_target(arg) {
            Ok(target) => target,
            Err(code) => return self.reply_code(code).await,
        };
        match self.store.get_headers(&msgid) {
            Some(headers) => {
                if number > 0 {
                    self.selected = Some((number, msgid.clone()));
                }
                self.send_dot_list(&format!("221 {} {}", number, msgid), &headers.wire_lines())
                    .await
            }
            None => self.send_line("430 no such article").await,
        }
    }

    async fn handle_stat(&mut self, arg: &str) -> Result<()> {
        let (number, msgid) = match self.resolve_target(arg) {
            Ok(target) => target,
            Err(code) => return self.reply_code(code).await,
        };
        if self.store.has_article(&msgid) {
            if number > 0 {
                self.selected = Some((number, msgid.clone()));
            }
            self.send_line(&format!("223 {} {}", number, msgid)).await
        } else {
            self.send_line("430 no such article").await
        }
    }

    async fn handle_group(&mut self, arg: &str) -> Result<()> {
        if arg.is_empty() {
            return self.send_line("501 invalid syntax").await;
        }
        if !self.db.has_newsgroup(arg) {
            return self.send_line(&format!("411 {} no such news group", arg)).await;
        }
        let (last, first) = self.db.get_last_and_first_for_group(arg).unwrap_or((0, 0));
        let count = self.db.count_all_articles_in_group(arg);
        self.group = Some(arg.to_string());
        self.selected = self
            .db
            .get_msgid_for_nntp_id(arg, first)
            .map(|msgid| (first, msgid));
        self.send_line(&format!("211 {} {} {} {}", count, first, last, arg))
            .await
    }

    async fn handle_listgroup(&mut self, arg: &str) -> Result<()> {
        let group = if arg.is_empty() {
            match &self.group {
                Some(group) => group.clone(),
                None => return self.send_line("412 no newsgroup selected").await,
            }
        } else {
            arg.to_string()
        };
        if !self.db.has_newsgroup(&group) {
            return self
                .send_line(&format!("411 {} no such news group", group))
                .await;
        }
        let (last, first) = self.db.get_last_and_first_for_group(&group).unwrap_or((0, 0));
        let count = self.db.count_all_articles_in_group(&group);
        let numbers: Vec<String> = self
            .db
            .get_nntp_posts_in_group(&group)
            .iter()
            .map(|entry| entry.number.to_string())
            .collect();
        self.group = Some(group.clone());
        self.send_dot_list(
            &format!("211 {} {} {} {} list follows", count, first, last, group),
            &numbers,
        )
        .await
    }

    fn group_list_lines(&self) -> Vec<String> {
        self.db
            .get_all_newsgroups()
            .iter()
            .map(|group| {
                let (last, first) = self
                    .db
                    .get_last_and_first_for_group(group)
                    .unwrap_or((0, 0));
                format!("{} {} {} y", group, last, first)
            })
            .collect()
    }

    async fn handle_list(&mut self) -> Result<()> {
        let lines = self.group_list_lines();
        self.send_dot_list("215 list of newsgroups follows", &lines)
            .await
    }

    async fn handle_newsgroups(&mut self) -> Result<()> {
        let lines = self.group_list_lines();
        self.send_dot_list("231 list of new newsgroups follows", &lines)
            .await
    }

    async fn handle_xover(&mut self) -> Result<()> {
        let Some(group) = self.group.clone() else {
            return self.send_line("412 no newsgroup selected").await;
        };
        let lines: Vec<String> = self
            .db
            .get_nntp_posts_in_group(&group)
            .iter()
            .map(|entry| entry.wire_line())
            .collect();
        self.send_dot_list("224 overview information follows", &lines)
            .await
    }

    async fn handle_xhdr(&mut self, arg: &str) -> Result<()> {
        let Some((name, msgid)) = arg.split_once(' ') else {
            return self.send_line("501 invalid syntax").await;
        };
        let (name, msgid) = (name.trim(), msgid.trim());
        match self.store.get_mime_header(msgid) {
            Some(headers) => {
                let values: Vec<String> =
                    headers.get_all(name).map(str::to_string).collect();
                self.send_dot_list(&format!("221 {} matches follow", name), &values)
                    .await
            }
            None => self.send_line("430 no such article").await,
        }
    }
}
