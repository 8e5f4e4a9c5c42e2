#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use huddle_server::availability::AvailabilityMonitor;
use huddle_server::config::Config;
use huddle_server::context::AppContext;
use huddle_server::error::AppResult;
use huddle_server::frame::ServerFrame;
use huddle_server::notifier::{BaseUrlFileProvider, Notifier};
use huddle_server::registry::{ConnectionEntry, ConnectionRegistry, Outbound};
use huddle_server::storage::memory::MemoryStorage;
use huddle_server::storage::{
    Channel, ChannelKind, ChannelMembership, ChannelRole, Storage, User,
};

/// Notifier double that records every send
#[derive(Default)]
pub struct CaptureNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for CaptureNotifier {
    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> AppResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

impl CaptureNotifier {
    pub fn emails_to(&self, address: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == address)
            .count()
    }
}

pub struct TestHarness {
    pub ctx: AppContext,
    pub storage: Arc<MemoryStorage>,
    pub notifier: Arc<CaptureNotifier>,
}

pub fn harness() -> TestHarness {
    let storage = Arc::new(MemoryStorage::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let notifier = Arc::new(CaptureNotifier::default());
    let config = Arc::new(Config::default());

    let availability = Arc::new(AvailabilityMonitor::new(
        storage.clone() as Arc<dyn Storage>,
        registry.clone(),
        Duration::from_secs(config.availability_debounce_secs),
        config.fallback_cache_capacity,
        Duration::from_secs(config.fallback_cache_ttl_secs as u64),
    ));

    let ctx = AppContext::new(
        storage.clone(),
        registry,
        notifier.clone(),
        Arc::new(BaseUrlFileProvider::new("/files".to_string())),
        availability,
        config,
    );

    TestHarness {
        ctx,
        storage,
        notifier,
    }
}

pub async fn make_user(storage: &MemoryStorage, username: &str, is_admin: bool) -> User {
    let user = User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        display_name: username.to_string(),
        email: format!("{}@example.com", username),
        is_admin,
    };
    storage.add_user(user.clone()).await;
    user
}

pub async fn make_channel(storage: &MemoryStorage, name: &str, kind: ChannelKind, creator: &User) -> Channel {
    let now = Utc::now();
    let channel = Channel {
        id: Uuid::new_v4(),
        name: name.to_string(),
        kind,
        created_by: creator.id,
        created_at: now,
        updated_at: now,
    };
    storage.add_channel(channel.clone()).await;
    join_channel(storage, &channel, creator, ChannelRole::Owner).await;
    channel
}

pub async fn join_channel(storage: &MemoryStorage, channel: &Channel, user: &User, role: ChannelRole) {
    storage
        .insert_membership(&ChannelMembership {
            channel_id: channel.id,
            user_id: user.id,
            role,
            joined_at: Utc::now(),
            last_read_at: None,
        })
        .await
        .expect("membership insert");
}

/// Registers a live socket for the user and returns the receiving end
pub async fn connect(ctx: &AppContext, user: &User) -> mpsc::UnboundedReceiver<Outbound> {
    let (tx, rx) = mpsc::unbounded_channel();
    ctx.registry
        .register(
            user.id,
            ConnectionEntry {
                connection_id: Uuid::new_v4(),
                username: user.username.clone(),
                tx,
                last_seen: Utc::now(),
            },
        )
        .await;
    rx
}

/// Drains whatever frames are currently queued on the connection
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(outbound) = rx.try_recv() {
        if let Outbound::Frame(frame) = outbound {
            frames.push(frame);
        }
    }
    frames
}

/// Lets spawned fire-and-forget pipelines (mentions, notifications) finish
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
