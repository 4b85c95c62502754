//! Reading frames from an async byte stream.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;

use crate::codec::{EXTENDED_HEADER_LEN, FrameCodec, RESERVE_CHUNK};
use crate::error::ProtocolError;
use crate::frame::Frame;

const INITIAL_CAPACITY: usize = 8 * 1024;

/// Buffered frame reader.
///
/// Bytes read past the end of a frame stay buffered for the next call, and
/// a partially received frame survives a dropped `read_frame` future. That
/// makes [`FrameReader::read_frame`] safe to use inside `tokio::select!` or
/// under `tokio::time::timeout`.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    codec: FrameCodec,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap `inner`, decoding with `codec`.
    pub fn new(inner: R, codec: FrameCodec) -> Self {
        Self {
            inner,
            codec,
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the stream ends on a frame boundary and
    /// [`ProtocolError::Truncated`] when it ends inside one.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                return self.codec.decode_eof(&mut self.buf);
            }
        }
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Codec in use.
    pub const fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Unwrap the underlying stream, discarding buffered bytes.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Turn the reader into a lazy stream of frames.
    ///
    /// The stream ends after a clean EOF or after yielding the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Frame, ProtocolError>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.read_frame().await {
                Ok(Some(frame)) => Some((Ok(frame), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// Read exactly one frame from `stream` without reading past it.
///
/// Unlike [`FrameReader`] this keeps no state between calls, so it is not
/// cancel-safe.
pub async fn read_frame<R>(stream: &mut R, codec: &FrameCodec) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let header_len = codec.header_len();
    let mut header_buf = [0u8; EXTENDED_HEADER_LEN];
    let header_buf = &mut header_buf[..header_len];

    let got = read_full(stream, header_buf).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < header_len {
        return Err(ProtocolError::Truncated {
            needed: header_len,
            available: got,
        });
    }

    let header = codec.decode_header(header_buf)?;
    let len = header.length as usize;
    let payload = read_payload(stream, len).await?;
    if payload.len() < len {
        return Err(ProtocolError::Truncated {
            needed: header_len + len,
            available: header_len + payload.len(),
        });
    }

    Ok(Some(Frame {
        frame_type: header.frame_type,
        tag: header.tag,
        payload: Bytes::from(payload),
    }))
}

/// Read up to `len` payload bytes, growing the buffer as bytes arrive.
async fn read_payload<R>(stream: &mut R, len: usize) -> std::io::Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut payload = BytesMut::with_capacity(len.min(RESERVE_CHUNK));
    let mut limited = (&mut *stream).take(len as u64);
    while payload.len() < len {
        payload.reserve((len - payload.len()).min(RESERVE_CHUNK));
        if limited.read_buf(&mut payload).await? == 0 {
            break;
        }
    }
    Ok(payload)
}

/// Fill `buf`, looping over short reads. Returns fewer bytes only at EOF.
async fn read_full<R>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
