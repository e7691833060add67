use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::codec::FrameReader;
use crate::frame::{self, Frame};

pub struct Connection {
    pub id: Uuid,
    // Data is read from the socket into the reader's buffer. When a frame is parsed, the
    // corresponding data is removed from the buffer.
    reader: FrameReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Connection {
        let (reader, writer) = stream.into_split();

        Connection {
            id: Uuid::new_v4(),
            reader: FrameReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    /// Waits for the next complete frame. `Ok(None)` means the peer closed the connection cleanly.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, frame::Error> {
        self.reader.next_frame().await
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> io::Result<()> {
        let mut buf = BytesMut::new();
        frame.write_to(&mut buf);

        self.writer.write_all(&buf).await?;
        self.writer.flush().await
    }
}
