//! READER-mode engine scenarios: the fetch loop and the scraper.

mod common;

use common::{article, collaborators, wait_until};
use nntp_peer::{
    ArticleEntry, ArticleStore, Collaborators, Connection, Database, DaemonConfig, LineCodec,
    ReaderEngine, SharedWriter,
};
use std::sync::Arc;

fn build_engine(collab: &Collaborators) -> (Arc<Connection>, ReaderEngine, LineCodec) {
    let (conn, channels) = Connection::new("scrape", "scrape", "127.0.0.1:1", "peer.example.com");
    let (local, remote) = tokio::io::duplex(256 * 1024);
    let (reader, writer) = LineCodec::new(Box::new(local)).split();
    let engine = ReaderEngine::new(
        conn.clone(),
        collab.store.clone(),
        collab.db.clone(),
        collab.daemon.clone(),
        DaemonConfig::permissive("node.example"),
        None,
        reader,
        SharedWriter::new(writer),
        channels,
    );
    (conn, engine, LineCodec::new(Box::new(remote)))
}

async fn serve_article(peer: &mut LineCodec, msgid: &str, raw: &[u8]) {
    assert_eq!(
        peer.read_line().await.unwrap(),
        format!("ARTICLE {}", msgid)
    );
    peer.send_line(&format!("220 0 {} article follows", msgid))
        .await
        .unwrap();
    peer.write_dot_body(raw).await.unwrap();
}

#[tokio::test]
async fn fetch_loop_ingests_queued_article() {
    let (store, _db, daemon, collab) = collaborators();
    let (conn, engine, mut peer) = build_engine(&collab);
    let task = tokio::spawn(engine.run());

    conn.ask_for_article(ArticleEntry::new("<q@x>", "overchan.test"))
        .await;
    serve_article(&mut peer, "<q@x>", &article("<q@x>", "overchan.test", "fetched")).await;

    wait_until(|| store.has_article("<q@x>")).await;
    assert_eq!(daemon.infeed_snapshot(), vec!["<q@x>".to_string()]);
    assert!(conn.pending.is_empty());

    conn.quit_and_wait().await;
    assert_eq!(peer.read_line().await.unwrap(), "QUIT");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn fetch_loop_handles_missing_article() {
    let (store, _db, _daemon, collab) = collaborators();
    let (conn, engine, mut peer) = build_engine(&collab);
    tokio::spawn(engine.run());

    conn.ask_for_article(ArticleEntry::new("<gone@x>", "overchan.test"))
        .await;
    assert_eq!(peer.read_line().await.unwrap(), "ARTICLE <gone@x>");
    peer.send_line("430 no such article").await.unwrap();

    wait_until(|| conn.pending.is_empty()).await;
    assert!(!store.has_article("<gone@x>"));
}

#[tokio::test]
async fn fetched_article_can_be_banned() {
    let (store, db, _daemon, collab) = collaborators();
    let (conn, engine, mut peer) = build_engine(&collab);
    tokio::spawn(engine.run());

    conn.ask_for_article(ArticleEntry::new("<bad@x>", "overchan.test"))
        .await;
    serve_article(&mut peer, "<bad@x>", &article("<bad@x>", "not a group", "junk")).await;

    wait_until(|| db.article_banned("<bad@x>")).await;
    assert!(!store.has_article("<bad@x>"));
}

#[tokio::test]
async fn scrape_finds_missing_root() {
    let (store, _db, daemon, collab) = collaborators();
    let (conn, engine, mut peer) = build_engine(&collab);
    let task = tokio::spawn(async move {
        let mut engine = engine;
        engine.scrape_server().await
    });

    let cmd = peer.read_line().await.unwrap();
    assert!(cmd.starts_with("NEWSGROUPS "));
    assert!(cmd.ends_with(" GMT"));
    peer.send_dot_list(
        "231 list of new newsgroups follows",
        &["overchan.test 2 1 y".to_string()],
    )
    .await
    .unwrap();

    assert_eq!(peer.read_line().await.unwrap(), "GROUP overchan.test");
    peer.send_line("211 2 1 2 overchan.test").await.unwrap();

    assert_eq!(peer.read_line().await.unwrap(), "XOVER 0");
    peer.send_dot_list(
        "224 overview information follows",
        &[
            "1\tfirst\tanon\tdate\t<m1@x>\t".to_string(),
            "2\treply\tanon\tdate\t<m2@x>\t<r@x>".to_string(),
        ],
    )
    .await
    .unwrap();

    serve_article(&mut peer, "<m1@x>", &article("<m1@x>", "overchan.test", "first")).await;
    serve_article(&mut peer, "<m2@x>", &article("<m2@x>", "overchan.test", "reply")).await;
    // the overview's reference is absent locally: the scraper fetches the root
    serve_article(&mut peer, "<r@x>", &article("<r@x>", "overchan.test", "root")).await;

    task.await.unwrap().unwrap();
    for msgid in ["<m1@x>", "<m2@x>", "<r@x>"] {
        assert!(store.has_article(msgid), "missing {}", msgid);
        assert!(daemon.infeed_snapshot().contains(&msgid.to_string()));
    }
    assert!(conn.pending.is_empty());
}

#[tokio::test]
async fn scrape_skips_banned_groups() {
    let (_store, db, _daemon, collab) = collaborators();
    db.banned_groups
        .lock()
        .unwrap()
        .insert("overchan.spam".to_string());
    let (_conn, engine, mut peer) = build_engine(&collab);
    let task = tokio::spawn(async move {
        let mut engine = engine;
        engine.scrape_server().await
    });

    peer.read_line().await.unwrap();
    peer.send_dot_list(
        "231 list of new newsgroups follows",
        &["overchan.spam 9 1 y".to_string()],
    )
    .await
    .unwrap();

    // the banned group is never selected; the scrape ends at once
    task.await.unwrap().unwrap();
}
