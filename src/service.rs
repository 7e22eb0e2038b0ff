//! Authenticated access to the metering service: posting entities and
//! events, batch uploads, and feed retrieval.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::atom::{self, Entry, DEFAULT_URI_PREFIX, XMLNS_ATTRIBUTES};
use crate::entity::{Entity, EntityRef};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::rfc3339;
use crate::units::UnitRegistry;

/// Max number of events we'll post at a time.
pub const MAX_BATCH_POST_COUNT: usize = 100;

/// Anything that accepts events for delivery: the live service, or a
/// batching queue in front of it.
#[async_trait]
pub trait EventSink {
    async fn post_event(&self, event: &Event) -> Result<()>;
}

/// Authenticated access to a metering service speaking the Atom feed
/// protocol.
pub struct Service {
    token: String,
    uri_prefix: String,
    client: reqwest::Client,
    registry: UnitRegistry,
}

impl Service {
    /// Client for the standard service location, authenticated with an
    /// AuthSub token.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_uri_prefix(token, DEFAULT_URI_PREFIX)
    }

    /// Client for a service mounted at a non-standard URI prefix.
    pub fn with_uri_prefix(token: impl Into<String>, uri_prefix: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            uri_prefix: uri_prefix.into(),
            client: reqwest::Client::new(),
            registry: UnitRegistry::new(),
        }
    }

    /// The unit registry used when parsing feed responses.
    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    fn auth_header(&self) -> String {
        format!("AuthSub token=\"{}\"", self.token)
    }

    async fn check(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        debug!(%status, body = body.as_str(), "service reply");
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
            });
        }
        Ok(body)
    }

    /// Sends a single POST request with an Atom body.
    async fn post(&self, path: &str, content: String) -> Result<()> {
        let url = format!("{}{}", self.uri_prefix, path);
        debug!(url = url.as_str(), body = content.as_str(), "posting");
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/atom+xml")
            .body(content)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Posts a single XML element to this service.
    async fn post_xml(&self, path: &str, element: &str) -> Result<()> {
        let body = format!("<?xml version=\"1.0\"?>\n{}", element.trim_start());
        self.post(path, body).await
    }

    /// Posts an entity to its feed.
    pub async fn post_entity(&self, entity: &Entity) -> Result<()> {
        self.post_xml(entity.feed_path(), &entity.to_xml()).await?;
        info!(path = entity.path(), "posted entity");
        Ok(())
    }

    /// Posts a single event to its subject's feed.
    pub async fn post_event(&self, event: &Event) -> Result<()> {
        let path = format!("{}/{}", event.subject_path(), event.kind().as_str());
        self.post_xml(&path, &event.to_xml()?).await?;
        info!(%event, "posted event");
        Ok(())
    }

    /// Batch-uploads a list of events, at most [`MAX_BATCH_POST_COUNT`] per
    /// request. Each chunk succeeds or fails as a whole.
    pub async fn batch_post_events(&self, events: &[Event]) -> Result<()> {
        for chunk in events.chunks(MAX_BATCH_POST_COUNT) {
            let mut entries = String::new();
            for event in chunk {
                entries.push_str(&event.to_xml()?);
            }
            let feed = format!("<feed{XMLNS_ATTRIBUTES}>{entries}</feed>");
            self.post_xml("/event", &feed).await?;
            info!(count = chunk.len(), "batch-posted events");
        }
        Ok(())
    }

    /// Sends a single GET request and returns the response body.
    pub async fn get(&self, path: &str) -> Result<String> {
        let url = format!("{}{}", self.uri_prefix, path);
        debug!(url = url.as_str(), "fetching");
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        Self::check(response).await
    }

    /// Retrieves and parses every entry under a path.
    pub async fn get_entries(&self, path: &str) -> Result<Vec<Entry>> {
        let body = self.get(path).await?;
        atom::parse_entries(&self.registry, &body)
    }

    /// Retrieves a single entity; the path's last two components must be the
    /// entity kind and id.
    pub async fn get_entity(&self, path: &str) -> Result<Entity> {
        let mut entities = self.get_entities(path).await?;
        if entities.is_empty() {
            return Err(Error::MalformedEntry(format!("no entity at {path:?}")));
        }
        Ok(entities.remove(0))
    }

    /// Retrieves the list of entities under a parent path.
    pub async fn get_entities(&self, path: &str) -> Result<Vec<Entity>> {
        self.get_entries(path)
            .await?
            .into_iter()
            .map(|entry| match entry {
                Entry::Entity(entity) => Ok(entity),
                Entry::Event(event) => Err(Error::MalformedEntry(format!(
                    "expected an entity at {path:?}, found a {} event",
                    event.kind().as_str()
                ))),
            })
            .collect()
    }

    /// Retrieves a single event by subject, kind, and primary timestamp.
    pub async fn get_event<'a>(
        &self,
        subject: impl Into<EntityRef<'a>>,
        kind: EventKind,
        key_time: f64,
    ) -> Result<Event> {
        let key = rfc3339::to_timestamp(key_time).replace(':', "_");
        let path = format!("{}/{}/{}", subject.into().path(), kind.as_str(), key);
        let mut events = expect_events(self.get_entries(&path).await?, &path)?;
        if events.is_empty() {
            return Err(Error::MalformedEntry(format!("no event at {path:?}")));
        }
        Ok(events.remove(0))
    }

    /// Retrieves the events of one kind within a time range. The range keys
    /// on `startTime` for durational kinds and `occurTime` otherwise; the
    /// server caps results at 1000 regardless of `max_results`.
    pub async fn get_events<'a>(
        &self,
        subject: impl Into<EntityRef<'a>>,
        kind: EventKind,
        min_time: f64,
        max_time: f64,
        max_results: usize,
    ) -> Result<Vec<Event>> {
        let field = kind.time_field();
        let path = format!(
            "{}/{}?{}Min={}&{}Max={}&max-results={}",
            subject.into().path(),
            kind.as_str(),
            field,
            rfc3339::to_timestamp(min_time),
            field,
            rfc3339::to_timestamp(max_time),
            max_results,
        );
        expect_events(self.get_entries(&path).await?, &path)
    }
}

fn expect_events(entries: Vec<Entry>, path: &str) -> Result<Vec<Event>> {
    entries
        .into_iter()
        .map(|entry| match entry {
            Entry::Event(event) => Ok(event),
            Entry::Entity(_) => Err(Error::MalformedEntry(format!(
                "expected events at {path:?}, found an entity"
            ))),
        })
        .collect()
}

#[async_trait]
impl EventSink for Service {
    async fn post_event(&self, event: &Event) -> Result<()> {
        Service::post_event(self, event).await
    }
}

/// A stand-in for a [`Service`] that queues events and posts them in
/// batches on [`BatchAdapter::flush`].
pub struct BatchAdapter<'a> {
    service: &'a Service,
    events: Mutex<Vec<Event>>,
}

impl<'a> BatchAdapter<'a> {
    pub fn new(service: &'a Service) -> Self {
        Self {
            service,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Number of queued events.
    pub fn pending(&self) -> usize {
        self.events.lock().expect("event queue lock").len()
    }

    /// Posts all queued events in batches. The queue is only cleared once
    /// every batch was accepted.
    pub async fn flush(&self) -> Result<()> {
        let queued = self.events.lock().expect("event queue lock").clone();
        self.service.batch_post_events(&queued).await?;
        self.events.lock().expect("event queue lock").clear();
        Ok(())
    }
}

#[async_trait]
impl EventSink for BatchAdapter<'_> {
    async fn post_event(&self, event: &Event) -> Result<()> {
        self.events
            .lock()
            .expect("event queue lock")
            .push(event.clone());
        Ok(())
    }
}
