#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

use courier_shared::{
    AttachmentRef, ChatMessage, ConnectionStatus, ConversationTarget, MessageId, MessagePage,
    NewMessage, UserId,
};
use courier_sync::{
    ApiError, ChatSync, CurrentUser, LocalFile, LocalPushChannel, MemoryPreviews, MessageQuery,
    ProgressFn, RemoteApi, StaticSession, SyncConfig, SyncEvent,
};

pub const ME: &str = "10";

pub fn at(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

pub fn msg(id: &str, minute: i64) -> ChatMessage {
    ChatMessage {
        id: MessageId::confirmed(id),
        message: format!("text {id}"),
        sender_id: UserId::new("20").unwrap(),
        receiver_id: None,
        is_privileged: false,
        read_at: None,
        created_at: at(minute),
        attachments: Vec::new(),
        sender: None,
    }
}

pub fn page(items: Vec<ChatMessage>, has_next_page: bool) -> MessagePage {
    MessagePage {
        items,
        has_next_page,
    }
}

pub fn user(privileged: bool) -> CurrentUser {
    CurrentUser {
        id: UserId::new(ME).unwrap(),
        name: "Ada".into(),
        avatar: None,
        is_privileged: privileged,
    }
}

pub fn other(id: &str) -> ConversationTarget {
    ConversationTarget::User(UserId::new(id).unwrap())
}

pub fn ids(sync: &ChatSync) -> Vec<String> {
    sync.messages().iter().map(|m| m.id.to_string()).collect()
}

/// Let spawned tasks run. Time is paused in these tests, so the sleep
/// only returns once every runnable task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn drain(events: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

// ---- Scripted API ----

#[derive(Default)]
pub struct MockApi {
    pages: Mutex<HashMap<(ConversationTarget, u32), MessagePage>>,
    polls: Mutex<VecDeque<MessagePage>>,
    fail_lists: Mutex<bool>,
    list_delay: Mutex<Duration>,
    create_results: Mutex<VecDeque<Result<ChatMessage, ApiError>>>,
    fail_creates: Mutex<bool>,
    create_delay: Mutex<Duration>,
    failing_uploads: Mutex<HashSet<String>>,
    upload_delay: Mutex<Duration>,
    pub list_calls: Mutex<Vec<(MessageQuery, Instant)>>,
    pub create_calls: Mutex<Vec<(NewMessage, Instant)>>,
    pub upload_calls: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_page(&self, target: ConversationTarget, number: u32, content: MessagePage) {
        lock(&self.pages).insert((target, number), content);
    }

    /// Response for the next query carrying an `after` watermark.
    pub fn queue_poll(&self, items: Vec<ChatMessage>) {
        lock(&self.polls).push_back(page(items, false));
    }

    pub fn fail_lists(&self, fail: bool) {
        *lock(&self.fail_lists) = fail;
    }

    pub fn delay_lists(&self, delay: Duration) {
        *lock(&self.list_delay) = delay;
    }

    pub fn queue_create(&self, result: Result<ChatMessage, ApiError>) {
        lock(&self.create_results).push_back(result);
    }

    pub fn fail_creates(&self, fail: bool) {
        *lock(&self.fail_creates) = fail;
    }

    pub fn delay_creates(&self, delay: Duration) {
        *lock(&self.create_delay) = delay;
    }

    pub fn fail_upload(&self, name: &str) {
        lock(&self.failing_uploads).insert(name.to_string());
    }

    pub fn delay_uploads(&self, delay: Duration) {
        *lock(&self.upload_delay) = delay;
    }

    pub fn list_count(&self) -> usize {
        lock(&self.list_calls).len()
    }

    pub fn create_count(&self) -> usize {
        lock(&self.create_calls).len()
    }

    pub fn queries(&self) -> Vec<MessageQuery> {
        lock(&self.list_calls).iter().map(|(q, _)| q.clone()).collect()
    }

    pub fn created(&self) -> Vec<NewMessage> {
        lock(&self.create_calls).iter().map(|(m, _)| m.clone()).collect()
    }

    /// Gaps between consecutive create calls.
    pub fn create_gaps(&self) -> Vec<Duration> {
        let calls = lock(&self.create_calls);
        calls.windows(2).map(|w| w[1].1 - w[0].1).collect()
    }

    fn unavailable() -> ApiError {
        ApiError::Status {
            status: 503,
            message: "unavailable".into(),
        }
    }
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn list_messages(&self, query: &MessageQuery) -> Result<MessagePage, ApiError> {
        lock(&self.list_calls).push((query.clone(), Instant::now()));
        let delay = *lock(&self.list_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *lock(&self.fail_lists) {
            return Err(Self::unavailable());
        }
        if query.after.is_some() {
            return Ok(lock(&self.polls)
                .pop_front()
                .unwrap_or_else(|| page(Vec::new(), false)));
        }
        Ok(lock(&self.pages)
            .get(&(query.target.clone(), query.page))
            .cloned()
            .unwrap_or_else(|| page(Vec::new(), false)))
    }

    async fn create_message(&self, message: &NewMessage) -> Result<ChatMessage, ApiError> {
        let number = {
            let mut calls = lock(&self.create_calls);
            calls.push((message.clone(), Instant::now()));
            calls.len()
        };
        let delay = *lock(&self.create_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(result) = lock(&self.create_results).pop_front() {
            return result;
        }
        if *lock(&self.fail_creates) {
            return Err(Self::unavailable());
        }

        let mut echo = msg(&format!("srv-{number}"), 100 + number as i64);
        echo.message = message.message.clone();
        echo.sender_id = UserId::new(ME).unwrap();
        echo.receiver_id = message.receiver_id.clone();
        Ok(echo)
    }

    async fn upload_attachment(
        &self,
        file: &LocalFile,
        progress: ProgressFn,
    ) -> Result<AttachmentRef, ApiError> {
        lock(&self.upload_calls).push(file.name().to_string());
        let total = file.size();
        progress(total / 2, total);
        let delay = *lock(&self.upload_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.failing_uploads).contains(file.name()) {
            return Err(Self::unavailable());
        }
        progress(total, total);
        Ok(AttachmentRef {
            path: format!("uploads/{}", file.name()),
            file_name: file.name().to_string(),
            mime_type: file.mime_type().to_string(),
            file_size: total,
        })
    }
}

// ---- Harness ----

pub struct Harness {
    pub sync: ChatSync,
    pub api: Arc<MockApi>,
    pub push: Arc<LocalPushChannel>,
    pub session: Arc<StaticSession>,
    pub previews: Arc<MemoryPreviews>,
}

/// Route engine logs to the test output; `RUST_LOG` narrows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Harness {
    pub fn new(status: ConnectionStatus, privileged: bool) -> Self {
        init_tracing();
        let api = MockApi::new();
        let push = Arc::new(LocalPushChannel::new(status));
        let session = Arc::new(StaticSession::new(user(privileged)));
        let previews = Arc::new(MemoryPreviews::new());
        let sync = ChatSync::new(
            SyncConfig::default(),
            api.clone(),
            push.clone(),
            session.clone(),
            previews.clone(),
        );
        Self {
            sync,
            api,
            push,
            session,
            previews,
        }
    }

    pub fn own_channel() -> String {
        format!("chat.{ME}")
    }
}
