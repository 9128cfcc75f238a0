//! Channel-based line source.
//!
//! Receives lines pushed through a tokio mpsc channel. Useful when log
//! lines arrive from something other than a file, such as a remote
//! syslog listener, and for driving the harvester in tests.

use parking_lot::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{LineSource, LineStream};
use crate::error::SourceError;

const CHANNEL_CAPACITY: usize = 256;

/// A line source fed through a channel.
///
/// Like a reader, the receiving end can only be handed out once.
#[derive(Debug)]
pub struct ChannelSource {
    receiver: Mutex<Option<mpsc::Receiver<String>>>,
    description: String,
}

impl ChannelSource {
    /// Create a new channel source around an existing receiver.
    pub fn new(receiver: mpsc::Receiver<String>, source_description: &str) -> Self {
        Self {
            receiver: Mutex::new(Some(receiver)),
            description: format!("channel: {}", source_description),
        }
    }

    /// Create a channel pair for pushing lines into a ChannelSource.
    pub fn create(source_description: &str) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (tx, Self::new(rx, source_description))
    }
}

#[async_trait]
impl LineSource for ChannelSource {
    async fn attach(&self) -> Result<LineStream, SourceError> {
        self.receiver
            .lock()
            .take()
            .map(LineStream::from_channel)
            .ok_or_else(|| SourceError::Closed(self.description.clone()))
    }

    fn description(&self) -> &str {
        &self.description
    }
}
