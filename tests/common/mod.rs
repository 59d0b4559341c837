//! Shared fixtures for integration tests: a temp store and an in-process
//! transport whose directory and send log are plain maps.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use chat_archive::error::{ArchiveError, Result};
use chat_archive::events::MessageEvent;
use chat_archive::jid::Jid;
use chat_archive::models::{MediaDescriptor, MediaKind};
use chat_archive::transport::{ContactInfo, Directory, OutgoingMessage, SendReceipt, Transport, UploadedMedia};
use chat_archive::Store;

pub fn temp_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = Store::open(dir.path().join("messages.db")).expect("Failed to open store");
    (dir, store)
}

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
}

pub fn text_event(id: &str, chat: &str, sender: &str, text: &str, secs: i64) -> MessageEvent {
    MessageEvent {
        id: id.to_string(),
        chat: Jid::parse(chat).expect("valid chat"),
        sender: Jid::parse(sender).expect("valid sender"),
        sender_alt: None,
        push_name: String::new(),
        timestamp: at(secs),
        is_from_me: false,
        text: Some(text.to_string()),
        media: None,
    }
}

pub fn complete_media(kind: &str) -> MediaDescriptor {
    MediaDescriptor {
        media_type: kind.to_string(),
        filename: Some("photo.jpg".to_string()),
        url: Some("https://mmg.example/abc".to_string()),
        media_key: Some(vec![1; 32]),
        file_sha256: Some(vec![2; 32]),
        file_enc_sha256: Some(vec![3; 32]),
        file_length: Some(5),
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub authenticated: AtomicBool,
    pub connected: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub downloads: AtomicUsize,
    pub fail_send: AtomicBool,
    pub contacts: Mutex<HashMap<String, ContactInfo>>,
    pub groups: Mutex<HashMap<String, String>>,
    pub sent: Mutex<Vec<(Jid, OutgoingMessage)>>,
}

impl FakeTransport {
    pub fn authenticated() -> Self {
        let transport = Self::default();
        transport.authenticated.store(true, Ordering::SeqCst);
        transport
    }

    pub fn connected() -> Self {
        let transport = Self::authenticated();
        transport.connected.store(true, Ordering::SeqCst);
        transport
    }

    pub fn add_contact(&self, jid: &str, full_name: &str) {
        self.contacts.lock().unwrap().insert(
            jid.to_string(),
            ContactInfo {
                full_name: full_name.to_string(),
                ..ContactInfo::default()
            },
        );
    }

    pub fn add_group(&self, jid: &str, name: &str) {
        self.groups.lock().unwrap().insert(jid.to_string(), name.to_string());
    }

    pub fn sent(&self) -> Vec<(Jid, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Directory for FakeTransport {
    fn contact(&self, jid: &Jid) -> Option<ContactInfo> {
        self.contacts.lock().unwrap().get(&jid.to_string()).cloned()
    }

    fn group_name(&self, jid: &Jid) -> Option<String> {
        self.groups.lock().unwrap().get(&jid.to_string()).cloned()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send(&self, to: &Jid, message: OutgoingMessage) -> Result<SendReceipt> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ArchiveError::Transport("server rejected message".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.clone(), message));
        Ok(SendReceipt {
            id: format!("SENT{}", sent.len()),
            timestamp: at(1_700_000_000),
        })
    }

    async fn download(&self, _media: &MediaDescriptor) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(b"bytes".to_vec())
    }

    async fn upload(&self, data: Vec<u8>, _kind: MediaKind) -> Result<UploadedMedia> {
        Ok(UploadedMedia {
            url: "https://mmg.example/upload".to_string(),
            direct_path: "/upload".to_string(),
            file_length: data.len() as u64,
            ..UploadedMedia::default()
        })
    }
}
