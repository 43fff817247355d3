//! READER-mode client engine
//!
//! Fetches message-ids the daemon queued for this connection via ARTICLE,
//! and optionally walks NEWSGROUPS / GROUP / XOVER to scrape a remote peer
//! for articles and thread roots the local store lacks.

use crate::admission::{self, Admission};
use crate::codec::{DotBody, LineReader, SharedWriter};
use crate::commands;
use crate::config::{DaemonConfig, FeedPolicy};
use crate::conn::{Connection, ConnectionChannels};
use crate::error::{PeerError, Result};
use crate::headers::{Headers, first_newsgroup};
use crate::ingest::{self, IngestOutcome};
use crate::pending::OfferState;
use crate::response::{Reply, codes};
use crate::storage::{ArticleEntry, ArticleStore, Daemon, Database, OverviewEntry};
use crate::validation::{valid_message_id, valid_newsgroup};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The client side of a READER-mode connection
pub struct ReaderEngine {
    conn: Arc<Connection>,
    store: Arc<dyn ArticleStore>,
    db: Arc<dyn Database>,
    daemon: Arc<dyn Daemon>,
    config: DaemonConfig,
    policy: Option<FeedPolicy>,
    reader: LineReader,
    writer: SharedWriter,
    channels: ConnectionChannels,
}

impl ReaderEngine {
    /// Build a reader over the connection's fetch queue
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: Arc<Connection>,
        store: Arc<dyn ArticleStore>,
        db: Arc<dyn Database>,
        daemon: Arc<dyn Daemon>,
        config: DaemonConfig,
        policy: Option<FeedPolicy>,
        reader: LineReader,
        writer: SharedWriter,
        channels: ConnectionChannels,
    ) -> Self {
        Self {
            conn,
            store,
            db,
            daemon,
            config,
            policy,
            reader,
            writer,
            channels,
        }
    }

    /// Fetch queued articles until shutdown or transport failure
    pub async fn run(mut self) -> Result<()> {
        debug!("{}: reader running", self.conn.display_name);
        loop {
            tokio::select! {
                reply = self.channels.die_rx.recv() => {
                    let _ = self.writer.send_command(commands::quit()).await;
                    if let Some(ack) = reply {
                        let _ = ack.send(());
                    }
                    return Ok(());
                }
                entry = self.channels.article_rx.recv() => {
                    let Some(entry) = entry else { return Ok(()); };
                    match self.fetch_article(&entry).await {
                        Ok(()) => {}
                        Err(PeerError::ConnectionClosed) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Issue one ARTICLE fetch and ingest the result
    pub async fn fetch_article(&mut self, entry: &ArticleEntry) -> Result<()> {
        self.conn
            .pending
            .set_state(&entry.msgid, OfferState::Article, 0);
        self.writer
            .send_command(&commands::article(&entry.msgid))
            .await?;
        let reply = Reply::parse(&self.reader.read_line().await?)?;
        match reply.code {
            codes::ARTICLE_FOLLOWS => self.ingest_fetched(&entry.msgid).await?,
            codes::NO_SUCH_ARTICLE_ID => {
                debug!("{}: peer lacks {}", self.conn.display_name, entry.msgid);
            }
            other => {
                warn!(
                    "{}: unexpected reply {} to ARTICLE {}",
                    self.conn.display_name, other, entry.msgid
                );
            }
        }
        self.conn.pending.set_processed(&entry.msgid);
        Ok(())
    }

    async fn ingest_fetched(&mut self, msgid: &str) -> Result<()> {
        let (lines, body_follows) = self.reader.read_mime_block().await?;
        let mut headers = Headers::parse_lines(&lines);
        let group = first_newsgroup(&headers).to_string();
        let limit = self.daemon.message_size_limit_for(&group);
        let body = if body_follows {
            self.reader.read_dot_body(limit).await?
        } else {
            DotBody {
                data: Vec::new(),
                truncated: false,
            }
        };

        if headers.get_or_empty("Message-ID") != msgid {
            warn!(
                "{}: peer answered {} with a different message-id",
                self.conn.display_name, msgid
            );
            return Ok(());
        }

        let facts = ingest::gather_facts(
            &headers,
            self.policy.as_ref(),
            self.store.as_ref(),
            self.db.as_ref(),
            self.daemon.as_ref(),
        );
        // fetched articles skip the authentication rule
        let verdict = admission::check(&headers, true, &facts, &self.config);
        match verdict {
            Admission::Accept => {
                if body.truncated {
                    warn!("{}: {} exceeds size limit for {}", self.conn.display_name, msgid, group);
                    return Ok(());
                }
                let outcome = ingest::store_article(
                    &mut headers,
                    &body.data,
                    &self.config.instance_name,
                    self.store.as_ref(),
                    self.daemon.as_ref(),
                );
                if outcome != IngestOutcome::Stored {
                    debug!("{}: fetch of {} not stored: {:?}", self.conn.display_name, msgid, outcome);
                }
            }
            Admission::Ban { reason } => {
                info!("{}: banning fetched article {}: {}", self.conn.display_name, msgid, reason);
                self.db.ban_article(msgid, &reason);
            }
            Admission::Reject { reason } => {
                debug!("{}: discarding fetched article {}: {}", self.conn.display_name, msgid, reason);
            }
        }
        Ok(())
    }

    /// Walk the remote peer's group list and fetch everything we lack
    pub async fn scrape_server(&mut self) -> Result<()> {
        let today = chrono::Utc::now().format("%Y%m%d").to_string();
        self.writer
            .send_command(&commands::newsgroups(&today, "000000"))
            .await?;
        let reply = Reply::parse(&self.reader.read_line().await?)?;
        if reply.code != codes::NEW_NEWSGROUPS_FOLLOW {
            return Err(PeerError::Protocol {
                code: reply.code,
                message: reply.message,
            });
        }
        let groups: Vec<String> = self
            .reader
            .read_dot_lines()
            .await?
            .iter()
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect();
        for group in groups {
            if !valid_newsgroup(&group) || self.db.newsgroup_banned(&group) {
                continue;
            }
            self.scrape_group(&group).await?;
        }
        Ok(())
    }

    async fn scrape_group(&mut self, group: &str) -> Result<()> {
        self.writer.send_command(&commands::group(group)).await?;
        let reply = Reply::parse(&self.reader.read_line().await?)?;
        if reply.code != codes::GROUP_SELECTED {
            debug!("{}: peer refused group {}: {}", self.conn.display_name, group, reply.code);
            return Ok(());
        }

        self.writer.send_command(&commands::xover("0")).await?;
        let reply = Reply::parse(&self.reader.read_line().await?)?;
        if reply.code != codes::OVERVIEW_INFO_FOLLOWS {
            debug!("{}: no overview for {}: {}", self.conn.display_name, group, reply.code);
            return Ok(());
        }
        let lines = self.reader.read_dot_lines().await?;
        for line in &lines {
            let Some(entry) = OverviewEntry::parse(line) else {
                continue;
            };
            for msgid in [entry.msgid.as_str(), entry.reference.as_str()] {
                if valid_message_id(msgid)
                    && !self.db.has_article(msgid)
                    && !self.db.article_banned(msgid)
                {
                    self.fetch_article(&ArticleEntry::new(msgid, group)).await?;
                }
            }
        }
        Ok(())
    }
}
