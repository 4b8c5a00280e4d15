// packages/engine/src/transport/codec.rs
//! Length-prefixed JSON framing
//!
//! Each frame is a 4-byte big-endian length followed by one JSON document.

use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Largest frame either side accepts (16 MiB)
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Reads typed frames from a byte stream
pub struct FrameReader<T, R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
    _message: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned, R: AsyncRead + Unpin> FrameReader<T, R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, codec()),
            _message: PhantomData,
        }
    }

    /// Next message; `Ok(None)` on a clean end of stream. Cancel safe.
    pub async fn recv(&mut self) -> Result<Option<T>> {
        match self.inner.next().await {
            None => Ok(None),
            Some(Ok(frame)) => Ok(Some(serde_json::from_slice(&frame)?)),
            Some(Err(e)) => Err(EngineError::Io(e)),
        }
    }
}

/// Writes typed frames to a byte stream
pub struct FrameWriter<T, W> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
    _message: PhantomData<fn(T)>,
}

impl<T: Serialize, W: AsyncWrite + Unpin> FrameWriter<T, W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, codec()),
            _message: PhantomData,
        }
    }

    pub async fn send(&mut self, message: &T) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        self.inner.send(Bytes::from(payload)).await.map_err(EngineError::Io)
    }

    /// Flush and shut down the write half
    pub async fn close(&mut self) -> Result<()> {
        SinkExt::<Bytes>::close(&mut self.inner).await.map_err(EngineError::Io)
    }
}
