use bytes::{Buf, BytesMut};
use futures::StreamExt;
use std::env;
use std::io::Cursor;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, Encoder, FramedRead};
use tracing::warn;

use crate::frame::{self, Frame};

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> FrameCodec {
        let max_frame_size = env::var("MAX_FRAME_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE);

        FrameCodec::with_max_frame_size(max_frame_size)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> FrameCodec {
        FrameCodec { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = frame::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut cursor = Cursor::new(&src[..]);
        let frame = match Frame::parse(&mut cursor) {
            Ok(frame) => frame,
            // Not enough data to parse a frame, unless the buffer can't legally grow any more.
            Err(frame::Error::Incomplete) if src.len() > self.max_frame_size => {
                return Err(frame::Error::FrameTooLarge(self.max_frame_size));
            }
            Err(frame::Error::Incomplete) => return Ok(None),
            Err(err) => {
                warn!("Failed to decode frame: {}", err);
                return Err(err);
            }
        };

        let position = cursor.position() as usize;

        // Remove the parsed frame from the buffer.
        src.advance(position);

        Ok(Some(frame))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(frame::Error::Truncated),
        }
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = frame::Error;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.write_to(dst);
        Ok(())
    }
}

/// Decodes frames one at a time out of any async byte stream.
///
/// `next_frame` waits until a whole frame is buffered. It returns `Ok(None)` once the stream ends
/// on a frame boundary and `Err(Truncated)` if it ends in the middle of one. Errors raised by the
/// stream itself come back as `frame::Error::Io`, untouched.
pub struct FrameReader<R> {
    inner: FramedRead<R, FrameCodec>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> FrameReader<R> {
        FrameReader {
            inner: FramedRead::new(reader, FrameCodec::new()),
        }
    }

    pub async fn next_frame(&mut self) -> Result<Option<Frame>, frame::Error> {
        self.inner.next().await.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncWriteExt, ReadBuf};

    #[test]
    fn decode_leaves_trailing_bytes() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"+OK\r\n:1"[..]);

        let frame = codec.decode(&mut buf).unwrap();

        assert_eq!(frame, Some(Frame::Simple("OK".to_string())));
        assert_eq!(&buf[..], b":1");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_rejects_oversized_frames() {
        let mut codec = FrameCodec::with_max_frame_size(8);
        let mut buf = BytesMut::from(&b"$100\r\n0123456789"[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(frame::Error::FrameTooLarge(8))
        ));
    }

    #[test]
    fn encode_appends_to_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(&Frame::Bulk(Bytes::from("a")), &mut buf)
            .unwrap();
        codec.encode(&Frame::Null, &mut buf).unwrap();

        assert_eq!(&buf[..], b"$1\r\na\r\n$-1\r\n");
    }

    #[tokio::test]
    async fn reader_waits_for_the_rest_of_a_frame() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        let writer = tokio::spawn(async move {
            let mut client = client;
            client.write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nf").await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"oo\r\n").await.unwrap();
        });

        let frame = reader.next_frame().await.unwrap();
        writer.await.unwrap();

        assert_eq!(frame, Some(Frame::command(["GET", "foo"])));
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reader_reports_clean_end_of_stream() {
        let mut reader = FrameReader::new(&b"+PONG\r\n"[..]);

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::Simple("PONG".to_string()))
        );
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reader_reports_truncated_stream() {
        let mut reader = FrameReader::new(&b"*2\r\n$3\r\nSET\r\n"[..]);

        assert!(matches!(
            reader.next_frame().await,
            Err(frame::Error::Truncated)
        ));
    }

    #[tokio::test]
    async fn reader_reports_parse_errors() {
        let mut reader = FrameReader::new(&b"?what\r\n"[..]);

        assert!(matches!(
            reader.next_frame().await,
            Err(frame::Error::InvalidDataType(b'?'))
        ));
    }

    #[tokio::test]
    async fn reader_passes_io_errors_through() {
        let mut reader = FrameReader::new(ResetReader);

        match reader.next_frame().await {
            Err(frame::Error::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected an I/O error, got {:?}", other),
        }
    }

    struct ResetReader;

    impl AsyncRead for ResetReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)))
        }
    }
}
