// tests/common/mod.rs
// Fake sources and transports shared by the integration tests.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use listing_watch::notify::{Recipient, SendStatus, Transport};
use listing_watch::{ListingCodec, ListingRecord, Source};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub fn listings(ids: &[&str]) -> Vec<ListingRecord> {
    ids.iter()
        .map(|id| {
            ListingRecord::new(*id)
                .with_field("title", format!("Job {id}"))
                .with_field("link", format!("https://jobs.example/{id}"))
        })
        .collect()
}

/// What a scripted source does on one call.
pub enum Step {
    Yield(Vec<ListingRecord>),
    Fail(&'static str),
    Panic,
    Hang,
}

/// Source replaying a script, one step per `scrape` call. Empty script
/// yields nothing.
pub struct ScriptedSource {
    name: String,
    image: Option<PathBuf>,
    steps: Mutex<VecDeque<Step>>,
}

impl ScriptedSource {
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            image: None,
            steps: Mutex::new(steps.into()),
        }
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image = Some(path.into());
        self
    }
}

impl ListingCodec for ScriptedSource {}

#[async_trait::async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn scrape(&self) -> Result<Vec<ListingRecord>> {
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Yield(v)) => Ok(v),
            Some(Step::Fail(msg)) => Err(anyhow!(msg)),
            Some(Step::Panic) => panic!("scraper blew up"),
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    fn image_path(&self) -> Option<&Path> {
        self.image.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Image { chat_id: String, caption: String },
    Text { chat_id: String, text: String },
}

impl Sent {
    pub fn chat_id(&self) -> &str {
        match self {
            Sent::Image { chat_id, .. } | Sent::Text { chat_id, .. } => chat_id,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Sent::Image { caption, .. } => caption,
            Sent::Text { text, .. } => text,
        }
    }
}

/// Transport recording every call. Per-chat scripted statuses are consumed
/// first; afterwards every call is delivered.
#[derive(Default)]
pub struct RecordingTransport {
    pub calls: Mutex<Vec<Sent>>,
    script: Mutex<HashMap<String, VecDeque<SendStatus>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, chat_id: &str, statuses: Vec<SendStatus>) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), statuses.into());
        self
    }

    fn next_status(&self, chat_id: &str) -> SendStatus {
        self.script
            .lock()
            .unwrap()
            .get_mut(chat_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(SendStatus::Delivered)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send_image(&self, to: &Recipient, _image: &Path, caption: &str) -> SendStatus {
        self.calls.lock().unwrap().push(Sent::Image {
            chat_id: to.chat_id.clone(),
            caption: caption.to_string(),
        });
        self.next_status(&to.chat_id)
    }

    async fn send_text(&self, to: &Recipient, text: &str) -> SendStatus {
        self.calls.lock().unwrap().push(Sent::Text {
            chat_id: to.chat_id.clone(),
            text: text.to_string(),
        });
        self.next_status(&to.chat_id)
    }
}

/// Transport handle that can be boxed into a dispatcher while the test
/// keeps reading the recorded calls.
pub struct Shared(pub std::sync::Arc<RecordingTransport>);

#[async_trait::async_trait]
impl Transport for Shared {
    async fn send_image(&self, to: &Recipient, image: &Path, caption: &str) -> SendStatus {
        self.0.send_image(to, image, caption).await
    }

    async fn send_text(&self, to: &Recipient, text: &str) -> SendStatus {
        self.0.send_text(to, text).await
    }
}
