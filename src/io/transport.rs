//! Transport layer - Byte pumps between async streams and message channels
//!
//! A transport is a pair of background tasks: a writer draining an unbounded
//! channel of outgoing messages into a sink, and a reader decoding an incoming
//! byte stream into messages forwarded to a channel. The message format is
//! supplied by a `tokio_util` codec, so the same pumps carry front-end frames
//! and backend JSON-RPC objects.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tracing::{error, trace};

/// Receiving half of a transport: decoded messages, or the error that ended the stream
pub type Inbound<T, E> = mpsc::UnboundedReceiver<Result<T, E>>;

/// Spawn the writer task for a sink
///
/// Messages pushed into the returned sender are encoded and written in the
/// order they were queued. The task ends when every sender is dropped or the
/// first write fails.
pub fn spawn_writer<W, C, T>(writer: W, codec: C) -> (mpsc::UnboundedSender<T>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
    C: Encoder<T> + Send + 'static,
    C::Error: std::fmt::Display,
    T: Send + 'static,
{
    let (sender, mut receiver) = mpsc::unbounded_channel::<T>();
    let mut sink = FramedWrite::new(writer, codec);

    let task = tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            if let Err(e) = sink.send(message).await {
                error!("Transport: failed to write message: {}", e);
                break;
            }
        }
        trace!("Transport: writer task finished");
    });

    (sender, task)
}

/// Spawn the reader task for a byte stream
///
/// Every decoded message is forwarded as `Ok`. A decode error is forwarded
/// once as `Err` and ends the task, since a broken stream cannot be
/// resynchronised. End of stream closes the channel.
pub fn spawn_reader<R, C>(reader: R, codec: C) -> (Inbound<C::Item, C::Error>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
    C: Decoder + Send + 'static,
    C::Item: Send + 'static,
    C::Error: Send + std::fmt::Display + 'static,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    let mut stream = FramedRead::new(reader, codec);

    let task = tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            let fatal = item.is_err();
            if let Err(e) = &item {
                error!("Transport: stream decode failed: {}", e);
            }
            if sender.send(item).is_err() {
                trace!("Transport: inbound receiver dropped, stopping reader");
                return;
            }
            if fatal {
                break;
            }
        }
        trace!("Transport: reader task finished");
    });

    (receiver, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{Buf, BufMut, BytesMut};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Newline-delimited test codec
    struct LineCodec;

    impl Decoder for LineCodec {
        type Item = String;
        type Error = std::io::Error;

        fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
            match src.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    let line = src.split_to(pos);
                    src.advance(1);
                    String::from_utf8(line.to_vec())
                        .map(Some)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                }
                None => Ok(None),
            }
        }
    }

    impl Encoder<String> for LineCodec {
        type Error = std::io::Error;

        fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
            dst.put_slice(item.as_bytes());
            dst.put_u8(b'\n');
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_writer_preserves_queue_order() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (sender, task) = spawn_writer(client, LineCodec);

        sender.send("first".to_string()).unwrap();
        sender.send("second".to_string()).unwrap();
        drop(sender);
        task.await.unwrap();

        let mut written = String::new();
        server.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_reader_forwards_messages_until_eof() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (mut inbound, _task) = spawn_reader(server, LineCodec);

        client.write_all(b"one\ntw").await.unwrap();
        client.write_all(b"o\n").await.unwrap();
        drop(client);

        assert_eq!(inbound.recv().await.unwrap().unwrap(), "one");
        assert_eq!(inbound.recv().await.unwrap().unwrap(), "two");
        assert!(inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reader_stops_after_decode_error() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (mut inbound, task) = spawn_reader(server, LineCodec);

        client.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();

        assert!(inbound.recv().await.unwrap().is_err());
        task.await.unwrap();
        assert!(inbound.recv().await.is_none());
    }
}
