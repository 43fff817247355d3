//! STREAMING-mode sender (RFC 4644)
//!
//! Runs as the single writing task of a STREAM-mode connection: consumes
//! offer events, serializes CHECK and TAKETHIS, and emits a keepalive CHECK
//! for the reserved dummy id once a minute. The response reader feeds coded
//! replies back through [`handle_stream_reply`]; responses are matched to
//! offers by the message-id carried in the reply, not by order.

use crate::codec::SharedWriter;
use crate::commands;
use crate::conn::{Connection, ConnectionChannels, DUMMY_MSGID};
use crate::error::Result;
use crate::pending::OfferState;
use crate::response::{Reply, codes};
use crate::storage::ArticleStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, warn};

/// Cadence of the dummy CHECK keepalive
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// The sender half of a STREAM-mode connection
pub struct StreamEngine {
    conn: Arc<Connection>,
    store: Arc<dyn ArticleStore>,
    writer: SharedWriter,
    channels: ConnectionChannels,
}

impl StreamEngine {
    /// Build a sender over the connection's offer channels
    pub fn new(
        conn: Arc<Connection>,
        store: Arc<dyn ArticleStore>,
        writer: SharedWriter,
        channels: ConnectionChannels,
    ) -> Self {
        Self {
            conn,
            store,
            writer,
            channels,
        }
    }

    /// Drive the sender until shutdown or transport failure.
    ///
    /// A `die` message sends QUIT, acknowledges and returns; closed offer
    /// channels end the loop quietly.
    pub async fn run(mut self) -> Result<()> {
        debug!("{}: stream sender running", self.conn.display_name);
        let mut keepalive = interval_at(
            Instant::now() + KEEPALIVE_INTERVAL,
            KEEPALIVE_INTERVAL,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                reply = self.channels.die_rx.recv() => {
                    let _ = self.writer.send_command(commands::quit()).await;
                    if let Some(ack) = reply {
                        let _ = ack.send(());
                    }
                    debug!("{}: stream sender quitting", self.conn.display_name);
                    return Ok(());
                }
                msgid = self.channels.check_rx.recv() => {
                    let Some(msgid) = msgid else { return Ok(()); };
                    self.conn.pending.set_state(&msgid, OfferState::Check, 0);
                    self.writer.send_command(&commands::check(&msgid)).await?;
                }
                msgid = self.channels.takethis_rx.recv() => {
                    let Some(msgid) = msgid else { return Ok(()); };
                    self.send_takethis(&msgid).await?;
                }
                _ = keepalive.tick() => {
                    self.writer.send_command(&commands::check(DUMMY_MSGID)).await?;
                }
            }
        }
    }

    async fn send_takethis(&mut self, msgid: &str) -> Result<()> {
        self.conn.pending.set_state(msgid, OfferState::TakeThis, 0);
        match self.store.open_message(msgid) {
            Ok(article) => {
                self.writer
                    .send_article(&commands::takethis(msgid), &article)
                    .await
            }
            Err(e) => {
                // the article vanished between offer and transfer; resolve it
                warn!(
                    "{}: cannot open {} for TAKETHIS: {}",
                    self.conn.display_name, msgid, e
                );
                self.conn.pending.set_processed(msgid);
                Ok(())
            }
        }
    }
}

/// Apply a streaming reply (238/239/431/438/439) to the connection state.
///
/// Replies naming the keepalive dummy are acknowledged silently; anything
/// else resolves or advances the pending entry for the carried message-id.
pub async fn handle_stream_reply(
    conn: &Arc<Connection>,
    store: &Arc<dyn ArticleStore>,
    reply: &Reply,
) {
    let Some(msgid) = reply.first_arg() else {
        warn!(
            "{}: streaming reply without message-id: {}",
            conn.display_name, reply.code
        );
        return;
    };
    if msgid == DUMMY_MSGID {
        return;
    }
    match reply.code {
        codes::CHECK_SEND => {
            let size = store.get_message_size(msgid).unwrap_or(0);
            conn.pending.set_state(msgid, OfferState::TakeThis, size);
            conn.push_takethis(msgid).await;
        }
        codes::TAKETHIS_RECEIVED
        | codes::CHECK_LATER
        | codes::CHECK_NOT_WANTED
        | codes::TAKETHIS_REJECTED => {
            conn.pending.set_processed(msgid);
        }
        other => {
            warn!(
                "{}: unexpected streaming reply {} for {}",
                conn.display_name, other, msgid
            );
        }
    }
}
