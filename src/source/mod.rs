//! Line source abstraction for the live log stream.
//!
//! The harvester does not care where log lines come from. A [`LineSource`]
//! can be attached to produce a [`LineStream`], and may be attached again
//! after the stream ends if the underlying source supports it.

mod channel;
mod follow;
mod stream;

pub use channel::ChannelSource;
pub use follow::FollowSource;
pub use stream::ReaderSource;

use std::fmt::Debug;
use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SourceError;

/// Trait for attaching to a stream of text lines.
///
/// # Example
///
/// ```
/// use eni_watch::{ChannelSource, LineSource};
///
/// # tokio_test::block_on(async {
/// let (tx, source) = ChannelSource::create("test");
/// tx.send("hello".to_string()).await.unwrap();
///
/// let mut stream = source.attach().await.unwrap();
/// assert_eq!(stream.next_line().await.unwrap().as_deref(), Some("hello"));
/// # });
/// ```
#[async_trait]
pub trait LineSource: Send + Sync + Debug {
    /// Attach to the source and start receiving lines.
    ///
    /// Returns [`SourceError::Closed`] if the source cannot produce any
    /// more lines. Other errors are worth retrying.
    async fn attach(&self) -> Result<LineStream, SourceError>;

    /// Returns a human-readable description of the source.
    fn description(&self) -> &str;
}

type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

enum Inner {
    Reader {
        reader: BoxedReader,
        /// Bytes of a line not yet terminated, kept across cancelled reads.
        pending: Vec<u8>,
    },
    Channel(mpsc::Receiver<String>),
}

/// An attached stream of lines.
///
/// If the stream is backed by a child process, the process is killed when
/// the stream is stopped or dropped.
pub struct LineStream {
    inner: Inner,
    child: Option<Child>,
}

impl LineStream {
    /// Read lines from an async reader.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let boxed: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            inner: Inner::Reader {
                reader: BufReader::new(boxed),
                pending: Vec::new(),
            },
            child: None,
        }
    }

    /// Receive lines from a channel.
    pub fn from_channel(receiver: mpsc::Receiver<String>) -> Self {
        Self {
            inner: Inner::Channel(receiver),
            child: None,
        }
    }

    /// Tie the lifetime of a child process to this stream.
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    /// Wait for the next line, without its line terminator.
    ///
    /// Invalid UTF-8 is replaced rather than treated as an error. Returns
    /// `Ok(None)` once the stream has ended. Cancel safe.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        match &mut self.inner {
            Inner::Reader { reader, pending } => {
                let read = reader.read_until(b'\n', pending).await?;
                if read == 0 && pending.is_empty() {
                    return Ok(None);
                }
                let mut bytes = std::mem::take(pending);
                if bytes.last() == Some(&b'\n') {
                    bytes.pop();
                    if bytes.last() == Some(&b'\r') {
                        bytes.pop();
                    }
                }
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            Inner::Channel(receiver) => Ok(receiver.recv().await),
        }
    }

    /// Stop the stream, terminating any child process behind it.
    pub async fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("log follower already gone: {}", e);
            }
            let _ = child.wait().await;
        }
        if let Inner::Channel(receiver) = &mut self.inner {
            receiver.close();
        }
    }
}

impl Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner {
            Inner::Reader { .. } => "reader",
            Inner::Channel(_) => "channel",
        };
        f.debug_struct("LineStream")
            .field("kind", &kind)
            .field("child", &self.child.as_ref().and_then(|c| c.id()))
            .finish()
    }
}
