//! Reader-based line source.
//!
//! Wraps a single async reader, e.g. a socket or a captured log excerpt.
//! A reader can only be consumed once, so the source can be attached once.

use parking_lot::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::{LineSource, LineStream};
use crate::error::SourceError;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// A line source backed by one async reader.
///
/// # Example
///
/// ```
/// use std::io::Cursor;
/// use eni_watch::{LineSource, ReaderSource};
///
/// # tokio_test::block_on(async {
/// let source = ReaderSource::new(Cursor::new("a\nb\n"), "excerpt");
/// let mut stream = source.attach().await.unwrap();
/// assert_eq!(stream.next_line().await.unwrap().as_deref(), Some("a"));
/// # });
/// ```
pub struct ReaderSource {
    reader: Mutex<Option<BoxedReader>>,
    description: String,
}

impl ReaderSource {
    /// Create a source over `reader`.
    pub fn new<R>(reader: R, description: &str) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            description: format!("reader: {}", description),
        }
    }
}

#[async_trait]
impl LineSource for ReaderSource {
    async fn attach(&self) -> Result<LineStream, SourceError> {
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| SourceError::Closed(self.description.clone()))?;
        Ok(LineStream::from_reader(reader))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Debug for ReaderSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderSource")
            .field("description", &self.description)
            .field("consumed", &self.reader.lock().is_none())
            .finish()
    }
}
