//! Ingestion of live messages and history-sync rounds.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chat_archive::config::StoreConfig;
use chat_archive::events::{Conversation, HistoryMessage, HistorySyncBatch, Participant, TransportEvent};
use chat_archive::models::{ListMessagesOptions, MediaDescriptor, SearchOptions};
use chat_archive::signal::WaitOutcome;
use chat_archive::transport::{ContactInfo, Directory};
use chat_archive::{Ingestor, Jid, Store, SyncSignal};
use common::{at, complete_media, temp_store, text_event, FakeTransport};

fn ingestor(store: chat_archive::Store) -> (Arc<FakeTransport>, Ingestor<FakeTransport>) {
    let transport = Arc::new(FakeTransport::default());
    let ingestor = Ingestor::new(store, Arc::clone(&transport), SyncSignal::new());
    (transport, ingestor)
}

fn backlog(id: &str, participant: Option<&str>, text: &str, secs: Option<u64>) -> HistoryMessage {
    HistoryMessage {
        id: Some(id.to_string()),
        from_me: Some(false),
        participant: participant.map(str::to_string),
        timestamp: secs,
        text: Some(text.to_string()),
        media: None,
    }
}

#[test]
fn test_redelivery_overwrites_and_advances_chat() {
    let (_dir, store) = temp_store();
    let (_transport, ingestor) = ingestor(store.clone());

    let first = text_event("M1", "C1@g.us", "111@s.whatsapp.net", "hello", 1_000);
    let edited = text_event("M1", "C1@g.us", "111@s.whatsapp.net", "hello edited", 2_000);
    assert!(ingestor.handle_message(&first).unwrap());
    assert!(ingestor.handle_message(&edited).unwrap());

    let stored = store.message("M1", "C1@g.us").unwrap().unwrap();
    assert_eq!(stored.content.as_deref(), Some("hello edited"));
    assert_eq!(stored.timestamp, at(2_000));

    let chats = store.list_chats(&Default::default()).unwrap();
    let group = chats.iter().find(|c| c.jid == "C1@g.us").unwrap();
    assert_eq!(group.last_message_time, Some(at(2_000)));
}

#[test]
fn test_out_of_order_delivery_keeps_newest_time() {
    let (_dir, store) = temp_store();
    let (_transport, ingestor) = ingestor(store.clone());

    for (id, secs) in [("B", 300), ("A", 100), ("C", 200)] {
        ingestor
            .handle_message(&text_event(id, "C1@g.us", "111@s.whatsapp.net", "x", secs))
            .unwrap();
    }
    let chats = store.list_chats(&Default::default()).unwrap();
    let group = chats.iter().find(|c| c.jid == "C1@g.us").unwrap();
    assert_eq!(group.last_message_time, Some(at(300)));
}

#[test]
fn test_message_without_payload_is_dropped() {
    let (_dir, store) = temp_store();
    let (_transport, ingestor) = ingestor(store.clone());

    let mut reaction = text_event("R1", "C1@g.us", "111@s.whatsapp.net", "", 10);
    reaction.text = None;
    assert!(!ingestor.handle_message(&reaction).unwrap());
    assert_eq!(store.count_messages().unwrap(), 0);
    assert_eq!(store.count_chats(None).unwrap(), 0);

    let mut photo = reaction.clone();
    photo.media = Some(complete_media("image"));
    assert!(ingestor.handle_message(&photo).unwrap());
}

#[test]
fn test_empty_media_descriptor_is_not_a_payload() {
    let (_dir, store) = temp_store();
    let (_transport, ingestor) = ingestor(store.clone());

    let mut blank = text_event("E1", "C1@g.us", "111@s.whatsapp.net", "", 10);
    blank.text = None;
    blank.media = Some(MediaDescriptor::default());
    assert!(!ingestor.handle_message(&blank).unwrap());

    let mut backlog_blank = backlog("E2", Some("111@s.whatsapp.net"), "", Some(20));
    backlog_blank.text = None;
    backlog_blank.media = Some(MediaDescriptor::default());
    let synced = ingestor
        .handle_history_sync(&HistorySyncBatch {
            conversations: vec![Conversation {
                id: "C2@g.us".to_string(),
                messages: vec![backlog_blank],
            }],
            progress: Some(10),
        })
        .unwrap();

    assert_eq!(synced, 0);
    assert_eq!(store.count_messages().unwrap(), 0);
    assert_eq!(store.count_chats(None).unwrap(), 0);
}

/// Directory whose lookups need the store's only connection.
struct StoreBackedDirectory {
    store: Store,
    names: HashMap<String, String>,
    lookups: AtomicUsize,
    blocked: AtomicUsize,
}

impl StoreBackedDirectory {
    fn lookup(&self, jid: &Jid) -> Option<String> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.store.get_connection().is_err() {
            self.blocked.fetch_add(1, Ordering::SeqCst);
        }
        self.names.get(&jid.to_string()).cloned()
    }
}

impl Directory for StoreBackedDirectory {
    fn contact(&self, jid: &Jid) -> Option<ContactInfo> {
        self.lookup(jid).map(|full_name| ContactInfo {
            full_name,
            ..ContactInfo::default()
        })
    }

    fn group_name(&self, jid: &Jid) -> Option<String> {
        self.lookup(jid)
    }
}

#[test]
fn test_directory_lookups_never_wait_on_the_store_connection() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open_with(&StoreConfig {
        path: dir.path().join("messages.db").to_string_lossy().into_owned(),
        connection_timeout_secs: 1,
    })
    .unwrap();
    let directory = Arc::new(StoreBackedDirectory {
        store: store.clone(),
        names: HashMap::from([
            ("C1@g.us".to_string(), "Climbing".to_string()),
            ("4477@s.whatsapp.net".to_string(), "Erin".to_string()),
        ]),
        lookups: AtomicUsize::new(0),
        blocked: AtomicUsize::new(0),
    });
    let ingestor = Ingestor::new(store.clone(), Arc::clone(&directory), SyncSignal::new());

    store.upsert_chat("4478@s.whatsapp.net", "4478", None).unwrap();
    assert!(ingestor
        .handle_message(&text_event("M1", "C1@g.us", "4477@s.whatsapp.net", "hi", 10))
        .unwrap());
    ingestor
        .handle_history_sync(&HistorySyncBatch {
            conversations: vec![Conversation {
                id: "C1@g.us".to_string(),
                messages: vec![backlog("H1", Some("4478@s.whatsapp.net"), "older", Some(5))],
            }],
            progress: Some(50),
        })
        .unwrap();
    ingestor.handle(TransportEvent::OfflineSyncCompleted).unwrap();

    assert!(directory.lookups.load(Ordering::SeqCst) > 0);
    assert_eq!(directory.blocked.load(Ordering::SeqCst), 0);
    assert_eq!(store.chat_name("C1@g.us").unwrap().as_deref(), Some("Climbing"));
    assert_eq!(store.message("M1", "C1@g.us").unwrap().unwrap().sender_name, "Erin");
}

#[test]
fn test_shadow_chat_created_then_upgraded_by_backfill() {
    let (_dir, store) = temp_store();
    let (transport, ingestor) = ingestor(store.clone());
    transport.add_group("C1@g.us", "Climbing");

    ingestor
        .handle_message(&text_event("M1", "C1@g.us", "4477@s.whatsapp.net", "hi all", 10))
        .unwrap();

    assert_eq!(store.chat_name("C1@g.us").unwrap().as_deref(), Some("Climbing"));
    assert_eq!(store.chat_name("4477@s.whatsapp.net").unwrap().as_deref(), Some("4477"));

    transport.add_contact("4477@s.whatsapp.net", "Erin");
    ingestor.handle(TransportEvent::OfflineSyncCompleted).unwrap();
    assert_eq!(store.chat_name("4477@s.whatsapp.net").unwrap().as_deref(), Some("Erin"));

    // A later sighting never reverts the upgraded name
    transport.contacts.lock().unwrap().clear();
    ingestor
        .handle_message(&text_event("M2", "C1@g.us", "4477@s.whatsapp.net", "again", 20))
        .unwrap();
    ingestor.handle(TransportEvent::OfflineSyncCompleted).unwrap();
    assert_eq!(store.chat_name("4477@s.whatsapp.net").unwrap().as_deref(), Some("Erin"));
}

#[test]
fn test_own_messages_do_not_create_shadow_chats() {
    let (_dir, store) = temp_store();
    let (_transport, ingestor) = ingestor(store.clone());
    let mut own = text_event("M1", "C1@g.us", "9999@s.whatsapp.net", "mine", 10);
    own.is_from_me = true;
    ingestor.handle_message(&own).unwrap();

    assert_eq!(store.chat_name("9999@s.whatsapp.net").unwrap(), None);
}

#[test]
fn test_hidden_sender_with_alternate_records_mapping() {
    let (_dir, store) = temp_store();
    let (transport, ingestor) = ingestor(store.clone());
    transport.add_contact("4915@s.whatsapp.net", "Frank");

    let mut event = text_event("M1", "C1@g.us", "777@lid", "hallo", 10);
    event.sender_alt = Some(Jid::phone("4915"));
    ingestor.handle_message(&event).unwrap();

    let mapping = store.identity_mapping("777").unwrap().unwrap();
    assert_eq!(mapping.phone, "4915");
    let stored = store.message("M1", "C1@g.us").unwrap().unwrap();
    assert_eq!(stored.sender, "777");
    assert_eq!(stored.sender_name, "Frank");
    assert_eq!(store.chat_name("4915@s.whatsapp.net").unwrap().as_deref(), Some("Frank"));
}

#[test]
fn test_hidden_sender_without_phone_keeps_secondary_chat() {
    let (_dir, store) = temp_store();
    let (_transport, ingestor) = ingestor(store.clone());

    let mut event = text_event("M1", "C1@g.us", "888@lid", "hey", 10);
    event.push_name = "Gina".to_string();
    ingestor.handle_message(&event).unwrap();

    assert_eq!(store.chat_name("888@lid").unwrap().as_deref(), Some("888"));
    assert_eq!(store.message("M1", "C1@g.us").unwrap().unwrap().sender_name, "Gina");
}

#[test]
fn test_history_sync_normalizes_and_drops() {
    let (_dir, store) = temp_store();
    let (_transport, ingestor) = ingestor(store.clone());
    ingestor.set_own_id(Some(Jid::parse("3333:4@s.whatsapp.net").unwrap()));

    let mut own = backlog("H3", None, "sent by me", Some(1_500));
    own.from_me = Some(true);
    let mut empty = backlog("H4", Some("5@s.whatsapp.net"), "", Some(1_600));
    empty.text = None;

    let batch = HistorySyncBatch {
        conversations: vec![Conversation {
            id: "C9@g.us".to_string(),
            messages: vec![
                backlog("H1", Some("4477:3@s.whatsapp.net"), "from participant", Some(1_000)),
                backlog("H2", Some("4477@s.whatsapp.net"), "no time", None),
                own,
                empty,
            ],
        }],
        progress: Some(40),
    };
    assert_eq!(ingestor.handle_history_sync(&batch).unwrap(), 2);

    let h1 = store.message("H1", "C9@g.us").unwrap().unwrap();
    assert_eq!(h1.sender, "4477");
    assert_eq!(h1.timestamp, at(1_000));
    assert_eq!(store.message("H3", "C9@g.us").unwrap().unwrap().sender, "3333");
    assert!(store.message("H2", "C9@g.us").unwrap().is_none());
    assert!(store.chat_name("4477@s.whatsapp.net").unwrap().is_some());
    assert!(store.chat_name("3333@s.whatsapp.net").unwrap().is_none());

    let chats = store.list_chats(&Default::default()).unwrap();
    let group = chats.iter().find(|c| c.jid == "C9@g.us").unwrap();
    assert_eq!(group.last_message_time, Some(at(1_500)));
}

#[test]
fn test_history_and_live_duplicates_last_write_wins() {
    let (_dir, store) = temp_store();
    let (_transport, ingestor) = ingestor(store.clone());

    ingestor
        .handle_message(&text_event("M1", "C1@g.us", "111@s.whatsapp.net", "live copy", 100))
        .unwrap();
    let batch = HistorySyncBatch {
        conversations: vec![Conversation {
            id: "C1@g.us".to_string(),
            messages: vec![backlog("M1", Some("111@s.whatsapp.net"), "history copy", Some(100))],
        }],
        progress: None,
    };
    ingestor.handle_history_sync(&batch).unwrap();

    let found = store
        .search_messages(&SearchOptions {
            query: "live".to_string(),
            ..SearchOptions::default()
        })
        .unwrap();
    assert!(found.is_empty());
    let listed = store.list_messages(&ListMessagesOptions::default()).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].content.as_deref(), Some("history copy"));
}

#[tokio::test]
async fn test_full_progress_notifies_waiter() {
    let (_dir, store) = temp_store();
    let (_transport, ingestor) = ingestor(store);
    let mut waiter = ingestor.signal().subscribe();

    ingestor
        .handle(TransportEvent::HistorySync(HistorySyncBatch {
            conversations: Vec::new(),
            progress: Some(100),
        }))
        .unwrap();

    let outcome = waiter.wait(Duration::from_millis(100), std::future::pending()).await;
    assert_eq!(outcome, WaitOutcome::Completed);
}

#[tokio::test]
async fn test_partial_progress_does_not_notify() {
    let (_dir, store) = temp_store();
    let (_transport, ingestor) = ingestor(store);
    let mut waiter = ingestor.signal().subscribe();

    ingestor
        .handle(TransportEvent::HistorySync(HistorySyncBatch {
            conversations: Vec::new(),
            progress: Some(99),
        }))
        .unwrap();

    let outcome = waiter.wait(Duration::from_millis(30), std::future::pending()).await;
    assert_eq!(outcome, WaitOutcome::TimedOut);
}

#[test]
fn test_participants_and_connected_events() {
    let (_dir, store) = temp_store();
    let (_transport, ingestor) = ingestor(store.clone());

    ingestor
        .handle(TransportEvent::Participants(vec![
            Participant {
                lid: Jid::new("101", "lid"),
                phone: Some(Jid::phone("4401")),
                name: "Hana".to_string(),
            },
            Participant {
                lid: Jid::new("101", "lid"),
                phone: None,
                name: String::new(),
            },
        ]))
        .unwrap();
    let mapping = store.identity_mapping("101").unwrap().unwrap();
    assert_eq!((mapping.phone.as_str(), mapping.name.as_str()), ("4401", "Hana"));

    ingestor
        .handle(TransportEvent::Connected {
            own_id: Some(Jid::phone("3333")),
        })
        .unwrap();
    assert_eq!(ingestor.own_id(), Some(Jid::phone("3333")));
    ingestor.handle(TransportEvent::LoggedOut).unwrap();
}
