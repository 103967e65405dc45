use bytes::Bytes;

use crate::cancel::CancelToken;
use crate::error::Result;

/// A source of raw bytes from encoder hardware.
///
/// `read` blocks for at most the source's configured timeout. It returns
/// `Ok(None)` when no data arrived in time or when `cancel` fired; neither is
/// an error. Only unrecoverable I/O failures are returned as `Err`.
pub trait ByteSource {
    /// Read the next chunk of bytes.
    fn read(&mut self, cancel: &CancelToken) -> Result<Option<Bytes>>;
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, cancel: &CancelToken) -> Result<Option<Bytes>> {
        (**self).read(cancel)
    }
}
