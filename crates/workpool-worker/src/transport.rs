//! Message transports between a pool and a worker.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use workpool_protocol::{Message, MessageCodec, ProtocolError, Result};

/// A bidirectional message link.
///
/// `recv` must be cancel-safe: dropping its future before completion must not
/// lose a message.
#[async_trait]
pub trait Transport: Send {
    /// Next message from the peer, `None` once the peer has gone away
    async fn recv(&mut self) -> Option<Result<Message>>;

    async fn send(&mut self, message: Message) -> Result<()>;
}

/// In-process transport over unbounded channels
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl ChannelTransport {
    /// Two connected ends
    pub fn pair() -> (ChannelTransport, ChannelTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            ChannelTransport { tx: a_tx, rx: b_rx },
            ChannelTransport { tx: b_tx, rx: a_rx },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv(&mut self) -> Option<Result<Message>> {
        self.rx.recv().await.map(Ok)
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| ProtocolError::Closed)
    }
}

/// Transport over a byte stream pair, framed with [`MessageCodec`]
pub struct FramedTransport<R, W> {
    reader: FramedRead<R, MessageCodec>,
    writer: FramedWrite<W, MessageCodec>,
}

impl<R, W> FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        FramedTransport {
            reader: FramedRead::new(reader, MessageCodec),
            writer: FramedWrite::new(writer, MessageCodec),
        }
    }
}

impl FramedTransport<Stdin, Stdout> {
    /// The worker side of a child process: frames in on stdin, out on stdout
    pub fn stdio() -> Self {
        FramedTransport::new(tokio::io::stdin(), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> Transport for FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<Message>> {
        self.reader.next().await
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        self.writer.send(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workpool_protocol::{CancelMessage, ReadyMessage};

    #[tokio::test]
    async fn test_channel_pair() {
        let (mut a, mut b) = ChannelTransport::pair();

        a.send(Message::Ready(ReadyMessage { pid: 1 })).await.unwrap();
        b.send(Message::Shutdown).await.unwrap();

        assert_eq!(
            b.recv().await.unwrap().unwrap(),
            Message::Ready(ReadyMessage { pid: 1 })
        );
        assert_eq!(a.recv().await.unwrap().unwrap(), Message::Shutdown);

        drop(a);
        assert!(b.recv().await.is_none());
        assert!(matches!(b.send(Message::Shutdown).await, Err(ProtocolError::Closed)));
    }

    #[tokio::test]
    async fn test_framed_over_duplex() {
        let (left, right) = tokio::io::duplex(1024);
        let (left_r, left_w) = tokio::io::split(left);
        let (right_r, right_w) = tokio::io::split(right);

        let mut a = FramedTransport::new(left_r, left_w);
        let mut b = FramedTransport::new(right_r, right_w);

        let cancel = Message::Cancel(CancelMessage { task_id: 12 });
        a.send(cancel.clone()).await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), cancel);

        drop(a);
        assert!(b.recv().await.is_none());
    }
}
