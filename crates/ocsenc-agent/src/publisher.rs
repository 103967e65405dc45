use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{AgentError, Result};

/// One message on a feed: a block of fields sharing a timestamp (or a
/// timestamp per sample).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<f64>>,
    pub block_name: String,
    pub data: Map<String, Value>,
}

impl FeedMessage {
    /// Message whose fields are scalars taken at `timestamp`.
    pub fn single(block_name: impl Into<String>, timestamp: f64) -> Self {
        Self {
            timestamp: Some(timestamp),
            timestamps: None,
            block_name: block_name.into(),
            data: Map::new(),
        }
    }

    /// Message whose fields are arrays, one entry per timestamp.
    pub fn series(block_name: impl Into<String>, timestamps: Vec<f64>) -> Self {
        Self {
            timestamp: None,
            timestamps: Some(timestamps),
            block_name: block_name.into(),
            data: Map::new(),
        }
    }

    /// Add a field.
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.data.insert(name.to_string(), value.into());
        self
    }

    /// Look up a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

/// Feed registration parameters, as understood by the data aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSpec {
    pub name: String,
    pub record: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_length: Option<u32>,
    #[serde(default)]
    pub exclude_influx: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_time: Option<f64>,
}

impl FeedSpec {
    /// Recorded feed with the given aggregator frame length (seconds).
    pub fn recorded(name: impl Into<String>, frame_length: u32) -> Self {
        Self {
            name: name.into(),
            record: true,
            frame_length: Some(frame_length),
            exclude_influx: false,
            buffer_time: None,
        }
    }

    /// Keep the feed out of the time-series database.
    pub fn exclude_influx(mut self) -> Self {
        self.exclude_influx = true;
        self
    }

    pub fn buffer_time(mut self, seconds: f64) -> Self {
        self.buffer_time = Some(seconds);
        self
    }
}

/// Destination of agent feed messages.
pub trait FeedPublisher {
    /// Declare a feed before publishing to it.
    fn register_feed(&mut self, spec: FeedSpec) -> Result<()>;

    /// Publish a message. Fails for unregistered feeds.
    fn publish(&mut self, feed: &str, message: &FeedMessage) -> Result<()>;

    /// Push out anything buffered for `feed`.
    fn flush(&mut self, feed: &str) -> Result<()>;
}

impl<P: FeedPublisher + ?Sized> FeedPublisher for Box<P> {
    fn register_feed(&mut self, spec: FeedSpec) -> Result<()> {
        (**self).register_feed(spec)
    }

    fn publish(&mut self, feed: &str, message: &FeedMessage) -> Result<()> {
        (**self).publish(feed, message)
    }

    fn flush(&mut self, feed: &str) -> Result<()> {
        (**self).flush(feed)
    }
}

#[derive(Serialize)]
struct FeedRecord<'a> {
    feed: &'a str,
    #[serde(flatten)]
    message: &'a FeedMessage,
}

/// Writes each message as one JSON object per line, tagged with its feed.
pub struct JsonLinesPublisher<W> {
    writer: W,
    feeds: BTreeMap<String, FeedSpec>,
    published: u64,
}

impl<W: Write> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            feeds: BTreeMap::new(),
            published: 0,
        }
    }

    /// Registered feeds by name.
    pub fn feeds(&self) -> &BTreeMap<String, FeedSpec> {
        &self.feeds
    }

    /// Messages written so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> FeedPublisher for JsonLinesPublisher<W> {
    fn register_feed(&mut self, spec: FeedSpec) -> Result<()> {
        info!(feed = %spec.name, record = spec.record, exclude_influx = spec.exclude_influx, "registered feed");
        self.feeds.insert(spec.name.clone(), spec);
        Ok(())
    }

    fn publish(&mut self, feed: &str, message: &FeedMessage) -> Result<()> {
        if !self.feeds.contains_key(feed) {
            return Err(AgentError::UnknownFeed(feed.to_string()));
        }
        serde_json::to_writer(&mut self.writer, &FeedRecord { feed, message })?;
        self.writer.write_all(b"\n")?;
        self.published += 1;
        debug!(feed, block = %message.block_name, "published");
        Ok(())
    }

    fn flush(&mut self, feed: &str) -> Result<()> {
        if !self.feeds.contains_key(feed) {
            return Err(AgentError::UnknownFeed(feed.to_string()));
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    feeds: Vec<FeedSpec>,
    messages: Vec<(String, FeedMessage)>,
    flushes: Vec<String>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feeds(&self) -> &[FeedSpec] {
        &self.feeds
    }

    /// Every `(feed, message)` pair in publish order.
    pub fn messages(&self) -> &[(String, FeedMessage)] {
        &self.messages
    }

    /// Messages with the given block name, in publish order.
    pub fn blocks(&self, block_name: &str) -> Vec<&FeedMessage> {
        self.messages
            .iter()
            .filter(|(_, m)| m.block_name == block_name)
            .map(|(_, m)| m)
            .collect()
    }

    /// Messages published to `feed`.
    pub fn on_feed(&self, feed: &str) -> Vec<&FeedMessage> {
        self.messages
            .iter()
            .filter(|(f, _)| f == feed)
            .map(|(_, m)| m)
            .collect()
    }

    /// Feeds flushed, in order.
    pub fn flushes(&self) -> &[String] {
        &self.flushes
    }
}

impl FeedPublisher for MemoryPublisher {
    fn register_feed(&mut self, spec: FeedSpec) -> Result<()> {
        self.feeds.push(spec);
        Ok(())
    }

    fn publish(&mut self, feed: &str, message: &FeedMessage) -> Result<()> {
        if !self.feeds.iter().any(|f| f.name == feed) {
            return Err(AgentError::UnknownFeed(feed.to_string()));
        }
        self.messages.push((feed.to_string(), message.clone()));
        Ok(())
    }

    fn flush(&mut self, feed: &str) -> Result<()> {
        self.flushes.push(feed.to_string());
        Ok(())
    }
}
