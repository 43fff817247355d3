//! In-memory fakes for the collaborator seams, shared by the protocol
//! end-to-end tests.

#![allow(dead_code)]

use nntp_peer::{ArticleEntry, ArticleStore, Collaborators, Daemon, Database, Headers, OverviewEntry};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct StoreInner {
    articles: Mutex<HashMap<String, Vec<u8>>>,
    writing: Mutex<HashSet<String>>,
}

/// In-memory article store
#[derive(Default)]
pub struct MemStore {
    inner: Arc<StoreInner>,
}

struct MemFile {
    msgid: String,
    buf: Vec<u8>,
    inner: Arc<StoreInner>,
}

impl Write for MemFile {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        let mut articles = self.inner.articles.lock().unwrap();
        articles.insert(self.msgid.clone(), std::mem::take(&mut self.buf));
        self.inner.writing.lock().unwrap().remove(&self.msgid);
    }
}

impl MemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a raw article
    pub fn insert(&self, msgid: &str, raw: &[u8]) {
        self.inner
            .articles
            .lock()
            .unwrap()
            .insert(msgid.to_string(), raw.to_vec());
    }

    /// Simulate another writer already producing this message-id
    pub fn mark_writing(&self, msgid: &str) {
        self.inner.writing.lock().unwrap().insert(msgid.to_string());
    }
}

impl ArticleStore for MemStore {
    fn has_article(&self, msgid: &str) -> bool {
        self.inner.articles.lock().unwrap().contains_key(msgid)
    }

    fn open_message(&self, msgid: &str) -> io::Result<Vec<u8>> {
        self.inner
            .articles
            .lock()
            .unwrap()
            .get(msgid)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such article"))
    }

    fn create_file(&self, msgid: &str) -> Option<Box<dyn Write + Send>> {
        let mut writing = self.inner.writing.lock().unwrap();
        if !writing.insert(msgid.to_string()) {
            return None;
        }
        Some(Box::new(MemFile {
            msgid: msgid.to_string(),
            buf: Vec::new(),
            inner: self.inner.clone(),
        }))
    }

    fn process_message_body(
        &self,
        file: &mut dyn Write,
        _headers: &Headers,
        body: &[u8],
    ) -> io::Result<()> {
        file.write_all(body)
    }

    fn get_message_size(&self, msgid: &str) -> io::Result<u64> {
        self.open_message(msgid).map(|raw| raw.len() as u64)
    }

    fn get_headers(&self, msgid: &str) -> Option<Headers> {
        let raw = self.open_message(msgid).ok()?;
        let text = String::from_utf8_lossy(&raw).into_owned();
        let header_part = text
            .split("\r\n\r\n")
            .next()
            .and_then(|h| h.split("\n\n").next())
            .unwrap_or("");
        let lines: Vec<String> = header_part.lines().map(str::to_string).collect();
        Some(Headers::parse_lines(&lines))
    }

    fn get_mime_header(&self, msgid: &str) -> Option<Headers> {
        self.get_headers(msgid)
    }

    fn get_filename(&self, msgid: &str) -> String {
        format!("articles/{}", msgid.trim_matches(['<', '>']))
    }
}

/// In-memory metadata database
#[derive(Default)]
pub struct MemDb {
    pub known: Mutex<HashSet<String>>,
    pub expired: Mutex<HashSet<String>>,
    pub banned_articles: Mutex<HashSet<String>>,
    pub banned_groups: Mutex<HashSet<String>>,
    pub banned_pubkeys: Mutex<HashSet<String>>,
    pub banned_encips: Mutex<HashSet<String>>,
    pub groups: Mutex<BTreeMap<String, Vec<OverviewEntry>>>,
    pub users: Mutex<HashMap<String, String>>,
    pub fail_lookups: Mutex<bool>,
}

impl MemDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_user(&self, username: &str, password: &str) {
        self.users
            .lock()
            .unwrap()
            .insert(username.to_string(), password.to_string());
    }

    pub fn add_group(&self, group: &str, entries: Vec<OverviewEntry>) {
        for entry in &entries {
            self.known.lock().unwrap().insert(entry.msgid.clone());
        }
        self.groups.lock().unwrap().insert(group.to_string(), entries);
    }

    pub fn ban(&self, msgid: &str) {
        self.banned_articles.lock().unwrap().insert(msgid.to_string());
    }
}

impl Database for MemDb {
    fn has_article(&self, msgid: &str) -> bool {
        self.known.lock().unwrap().contains(msgid)
    }
    fn has_article_local(&self, msgid: &str) -> bool {
        self.has_article(msgid)
    }
    fn article_banned(&self, msgid: &str) -> bool {
        self.banned_articles.lock().unwrap().contains(msgid)
    }
    fn ban_article(&self, msgid: &str, _reason: &str) {
        self.banned_articles.lock().unwrap().insert(msgid.to_string());
    }
    fn newsgroup_banned(&self, group: &str) -> bool {
        self.banned_groups.lock().unwrap().contains(group)
    }
    fn pubkey_banned(&self, pubkey: &str) -> bool {
        self.banned_pubkeys.lock().unwrap().contains(pubkey)
    }
    fn enc_ip_banned(&self, encaddr: &str) -> bool {
        self.banned_encips.lock().unwrap().contains(encaddr)
    }
    fn get_enc_address(&self, addr: &str) -> io::Result<String> {
        Ok(format!("enc-{}", addr))
    }
    fn is_expired(&self, msgid: &str) -> bool {
        self.expired.lock().unwrap().contains(msgid)
    }
    fn has_newsgroup(&self, group: &str) -> bool {
        self.groups.lock().unwrap().contains_key(group)
    }
    fn get_all_newsgroups(&self) -> Vec<String> {
        self.groups.lock().unwrap().keys().cloned().collect()
    }
    fn get_last_and_first_for_group(&self, group: &str) -> Option<(u64, u64)> {
        let groups = self.groups.lock().unwrap();
        let entries = groups.get(group)?;
        let first = entries.first()?.number;
        let last = entries.last()?.number;
        Some((last, first))
    }
    fn count_all_articles_in_group(&self, group: &str) -> u64 {
        self.groups
            .lock()
            .unwrap()
            .get(group)
            .map(|entries| entries.len() as u64)
            .unwrap_or(0)
    }
    fn count_posts_in_group(&self, group: &str) -> u64 {
        self.groups
            .lock()
            .unwrap()
            .get(group)
            .map(|entries| entries.iter().filter(|e| e.reference.is_empty()).count() as u64)
            .unwrap_or(0)
    }
    fn get_msgid_for_nntp_id(&self, group: &str, number: u64) -> Option<String> {
        self.groups
            .lock()
            .unwrap()
            .get(group)?
            .iter()
            .find(|e| e.number == number)
            .map(|e| e.msgid.clone())
    }
    fn get_nntp_id_for_msgid(&self, group: &str, msgid: &str) -> Option<u64> {
        self.groups
            .lock()
            .unwrap()
            .get(group)?
            .iter()
            .find(|e| e.msgid == msgid)
            .map(|e| e.number)
    }
    fn get_nntp_posts_in_group(&self, group: &str) -> Vec<OverviewEntry> {
        self.groups
            .lock()
            .unwrap()
            .get(group)
            .cloned()
            .unwrap_or_default()
    }
    fn check_nntp_user_exists(&self, username: &str) -> io::Result<bool> {
        if *self.fail_lookups.lock().unwrap() {
            return Err(io::Error::other("database offline"));
        }
        Ok(self.users.lock().unwrap().contains_key(username))
    }
    fn check_nntp_login(&self, username: &str, password: &str) -> io::Result<bool> {
        if *self.fail_lookups.lock().unwrap() {
            return Err(io::Error::other("database offline"));
        }
        Ok(self.users.lock().unwrap().get(username).map(String::as_str) == Some(password))
    }
}

/// In-memory daemon surface
pub struct MemDaemon {
    pub infeed: Mutex<Vec<String>>,
    pub asked: Mutex<Vec<ArticleEntry>>,
    pub size_limit: u64,
}

impl Default for MemDaemon {
    fn default() -> Self {
        Self {
            infeed: Mutex::new(Vec::new()),
            asked: Mutex::new(Vec::new()),
            size_limit: u64::MAX,
        }
    }
}

impl MemDaemon {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_size_limit(size_limit: u64) -> Arc<Self> {
        Arc::new(Self {
            size_limit,
            ..Self::default()
        })
    }

    pub fn infeed_snapshot(&self) -> Vec<String> {
        self.infeed.lock().unwrap().clone()
    }

    pub fn asked_snapshot(&self) -> Vec<ArticleEntry> {
        self.asked.lock().unwrap().clone()
    }
}

impl Daemon for MemDaemon {
    fn load_from_infeed(&self, msgid: &str) {
        self.infeed.lock().unwrap().push(msgid.to_string());
    }
    fn ask_for_article(&self, entry: ArticleEntry) {
        self.asked.lock().unwrap().push(entry);
    }
    fn message_size_limit_for(&self, _group: &str) -> u64 {
        self.size_limit
    }
    fn can_tls(&self) -> bool {
        false
    }
    fn get_tls_config(&self, _host: &str) -> Option<Arc<rustls::ClientConfig>> {
        None
    }
    fn get_our_tls_config(&self) -> Option<Arc<rustls::ServerConfig>> {
        None
    }
    fn verify_frontend_signature(&self, _pubkey: &str, _signature: &str, _msgid: &str) -> bool {
        true
    }
}

/// Fresh fakes plus the bundled collaborator handle
pub fn collaborators() -> (Arc<MemStore>, Arc<MemDb>, Arc<MemDaemon>, Collaborators) {
    let store = MemStore::new();
    let db = MemDb::new();
    let daemon = MemDaemon::new();
    let collab = Collaborators {
        store: store.clone(),
        db: db.clone(),
        daemon: daemon.clone(),
    };
    (store, db, daemon, collab)
}

/// Raw article bytes with the given id, group and body
pub fn article(msgid: &str, group: &str, body: &str) -> Vec<u8> {
    format!(
        "Message-ID: {}\r\nNewsgroups: {}\r\nSubject: test\r\nX-Encrypted-Ip: enc-poster\r\n\r\n{}\n",
        msgid, group, body
    )
    .into_bytes()
}

/// One overview entry for seeding MemDb groups
pub fn overview(number: u64, msgid: &str, reference: &str) -> OverviewEntry {
    OverviewEntry {
        number,
        subject: "test".to_string(),
        from: "\"anon\" <anon@web>".to_string(),
        date: "Thu, 02 Jan 2026 01:02:03 GMT".to_string(),
        msgid: msgid.to_string(),
        reference: reference.to_string(),
    }
}

/// Poll until `predicate` holds or a second passes
pub async fn wait_until(predicate: impl Fn() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}
