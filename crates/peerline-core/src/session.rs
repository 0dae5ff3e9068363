//! Session channel: newline-delimited text messages over one stream.

use std::sync::{Mutex, PoisonError};

use peerline_transport::{PeerStream, StreamHandle};
use peerline_types::{Generation, PeerInfo};
use tokio::io::{
    AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::CoreError;
use crate::event::ControllerEvent;
use crate::feed::{Feed, LogLevel};
use crate::task::cancel_task;

const TAG: &str = "SessionChannel";

type Reader = ReadHalf<Box<dyn PeerStream>>;
type Writer = WriteHalf<Box<dyn PeerStream>>;

/// Everything that keeps the stream alive. Taken exactly once by `close()`.
#[derive(Default)]
struct ChannelParts {
    /// Read half, until the receive loop takes it.
    reader: Option<Reader>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    receive_task: Option<JoinHandle<()>>,
    send_task: Option<JoinHandle<()>>,
    closed: bool,
}

/// A line-message transport bound to exactly one connected stream.
///
/// Sends are queued to a writer task, so they are written in call order
/// and never block the caller. Received lines are delivered to the
/// controller's event queue in stream order.
pub struct SessionChannel {
    generation: Generation,
    peer: PeerInfo,
    feed: Feed,
    parts: Mutex<ChannelParts>,
}

impl SessionChannel {
    /// Wrap a connected stream. Must be called within a tokio runtime.
    pub fn open(stream: StreamHandle, generation: Generation, feed: Feed) -> Self {
        let (peer, io) = stream.into_parts();
        let (reader, writer) = tokio::io::split(io);
        let (outgoing, queue) = mpsc::unbounded_channel();
        let send_task = tokio::spawn(send_loop(writer, queue, feed.clone()));
        debug!(peer = %peer.address, %generation, "session opened");

        Self {
            generation,
            peer,
            feed,
            parts: Mutex::new(ChannelParts {
                reader: Some(reader),
                outgoing: Some(outgoing),
                receive_task: None,
                send_task: Some(send_task),
                closed: false,
            }),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Start the receive loop, delivering each complete line to `events`.
    ///
    /// The loop ends on EOF, on a read error, or when the channel is closed;
    /// the first two are reported as [`ControllerEvent::SessionEnded`].
    pub fn start_receiving(&self, events: mpsc::Sender<ControllerEvent>) -> Result<(), CoreError> {
        let mut parts = self.parts();
        if parts.closed {
            return Err(CoreError::NotConnected);
        }
        let Some(reader) = parts.reader.take() else {
            debug!(peer = %self.peer.address, "receive loop already running");
            return Ok(());
        };
        parts.receive_task = Some(tokio::spawn(receive_loop(
            reader,
            events,
            self.generation,
            self.feed.clone(),
        )));
        Ok(())
    }

    /// Queue `text` to be written followed by a line terminator.
    ///
    /// Write failures surface later as log lines, not here.
    pub fn send(&self, text: &str) -> Result<(), CoreError> {
        if text.contains(['\n', '\r']) {
            return Err(CoreError::InvalidMessage);
        }
        let parts = self.parts();
        let outgoing = parts
            .outgoing
            .as_ref()
            .filter(|_| !parts.closed)
            .ok_or(CoreError::NotConnected)?;
        outgoing
            .send(text.to_string())
            .map_err(|_| CoreError::NotConnected)
    }

    pub fn is_closed(&self) -> bool {
        self.parts().closed
    }

    /// Stop both loops and release the stream.
    ///
    /// Returns `true` for the call that actually closed the channel; every
    /// later or concurrent call returns `false` without touching the stream.
    pub async fn close(&self) -> bool {
        let (reader, receive_task, send_task) = {
            let mut parts = self.parts();
            if parts.closed {
                return false;
            }
            parts.closed = true;
            parts.outgoing = None;
            (
                parts.reader.take(),
                parts.receive_task.take(),
                parts.send_task.take(),
            )
        };
        drop(reader);
        if let Some(task) = receive_task {
            cancel_task(task).await;
        }
        if let Some(task) = send_task {
            cancel_task(task).await;
        }
        debug!(peer = %self.peer.address, generation = %self.generation, "session closed");
        true
    }

    fn parts(&self) -> std::sync::MutexGuard<'_, ChannelParts> {
        self.parts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        let parts = self.parts.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in [parts.receive_task.take(), parts.send_task.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SessionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionChannel")
            .field("generation", &self.generation)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn receive_loop(
    reader: Reader,
    events: mpsc::Sender<ControllerEvent>,
    generation: Generation,
    feed: Feed,
) {
    let mut lines = BufReader::new(reader).lines();
    let error = loop {
        match lines.next_line().await {
            Ok(Some(text)) => {
                if events
                    .send(ControllerEvent::MessageReceived { generation, text })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Ok(None) => break None,
            Err(e) => {
                let error = CoreError::StreamIo(e);
                feed.log(TAG, format!("Receive error: {error}"), LogLevel::Warn);
                break Some(error.to_string());
            }
        }
    };
    let _ = events
        .send(ControllerEvent::SessionEnded { generation, error })
        .await;
}

async fn send_loop(writer: Writer, mut queue: mpsc::UnboundedReceiver<String>, feed: Feed) {
    let mut writer = BufWriter::new(writer);
    while let Some(text) = queue.recv().await {
        if let Err(e) = write_line(&mut writer, &text).await {
            let error = CoreError::StreamIo(e);
            feed.log(TAG, format!("Send error: {error}"), LogLevel::Warn);
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
