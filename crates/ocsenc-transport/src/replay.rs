use std::collections::VecDeque;

use bytes::Bytes;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::traits::ByteSource;

/// Byte source that replays recorded chunks in order.
///
/// Used for offline decoding of captured streams and for driving the
/// acquisition loops without hardware. Once every chunk has been handed out
/// `read` returns `Ok(None)`; if a stop token was attached with
/// [`ReplaySource::cancel_when_exhausted`] it is cancelled at that point.
#[derive(Debug, Default)]
pub struct ReplaySource {
    chunks: VecDeque<Bytes>,
    on_exhausted: Option<CancelToken>,
}

impl ReplaySource {
    /// Replay the given chunks, one per `read`.
    pub fn new<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            on_exhausted: None,
        }
    }

    /// Split a contiguous capture into reads of at most `chunk_size` bytes.
    pub fn from_capture(data: impl Into<Bytes>, chunk_size: usize) -> Self {
        let mut data: Bytes = data.into();
        let chunk_size = chunk_size.max(1);
        let mut chunks = VecDeque::new();
        while !data.is_empty() {
            let take = chunk_size.min(data.len());
            chunks.push_back(data.split_to(take));
        }
        Self {
            chunks,
            on_exhausted: None,
        }
    }

    /// Cancel `token` once the last chunk has been read.
    pub fn cancel_when_exhausted(mut self, token: CancelToken) -> Self {
        self.on_exhausted = Some(token);
        self
    }

    /// Number of chunks not yet read.
    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }

    /// True when every chunk has been read.
    pub fn is_exhausted(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl ByteSource for ReplaySource {
    fn read(&mut self, cancel: &CancelToken) -> Result<Option<Bytes>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                if let Some(token) = self.on_exhausted.take() {
                    debug!("replay exhausted, requesting stop");
                    token.cancel();
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_chunks_in_order() {
        let mut source = ReplaySource::new(vec![b"ab".to_vec(), b"cd".to_vec()]);
        let cancel = CancelToken::new();

        assert_eq!(source.read(&cancel).unwrap().unwrap().as_ref(), b"ab");
        assert_eq!(source.read(&cancel).unwrap().unwrap().as_ref(), b"cd");
        assert!(source.read(&cancel).unwrap().is_none());
        assert!(source.is_exhausted());
    }

    #[test]
    fn capture_is_split_by_chunk_size() {
        let source = ReplaySource::from_capture(vec![0u8; 10], 4);
        assert_eq!(source.remaining(), 3);
    }

    #[test]
    fn exhaustion_cancels_attached_token() {
        let stop = CancelToken::new();
        let mut source = ReplaySource::new(vec![b"x".to_vec()]).cancel_when_exhausted(stop.clone());
        let reader_token = CancelToken::new();

        assert!(source.read(&reader_token).unwrap().is_some());
        assert!(!stop.is_cancelled());
        assert!(source.read(&reader_token).unwrap().is_none());
        assert!(stop.is_cancelled());
    }

    #[test]
    fn cancelled_token_yields_nothing() {
        let mut source = ReplaySource::new(vec![b"x".to_vec()]);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(source.read(&cancel).unwrap().is_none());
        assert_eq!(source.remaining(), 1);
    }
}
