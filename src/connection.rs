// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The byte-stream endpoint contract consumed by the master.
//!
//! Concrete drivers (serial ports, sockets, …) live outside this crate;
//! anything that can push received bytes into an event channel and accept
//! writes can back a master. [`StreamConnection`] adapts any
//! [`AsyncRead`]/[`AsyncWrite`] pair.

use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, WriteHalf},
    sync::mpsc,
    task::JoinHandle,
};

/// Connection lifecycle and data notifications, in arrival order.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The endpoint became ready for traffic.
    Open,
    /// A chunk of received bytes.
    Data(Bytes),
    /// The endpoint went down and will produce no further events.
    Close,
    /// A driver-level error. Does not imply `Close`.
    Error(io::Error),
}

/// Out-of-band line control, used for RS-485 direction switching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlSignals {
    /// Desired state of the RTS line, if it should change.
    pub rts: Option<bool>,
}

/// A byte-stream endpoint.
///
/// The master consumes the event stream (taken exactly once) and performs
/// all writes; implementations only need to bridge their driver's native
/// notifications onto [`ConnectionEvent`].
#[async_trait]
pub trait Connection: fmt::Debug + Send {
    /// Whether the endpoint is currently usable.
    fn is_open(&self) -> bool;

    /// Hand out the receive side of the event channel.
    ///
    /// Returns `None` if it was taken before.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>>;

    /// Queue bytes for transmission.
    async fn write(&mut self, bytes: Bytes) -> io::Result<()>;

    /// Wait until previously written bytes have left the transmit buffer.
    async fn drain(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Change line control signals. Optional capability; the default does
    /// nothing.
    fn set(&mut self, _signals: ControlSignals) -> io::Result<()> {
        Ok(())
    }

    /// Tear the endpoint down. No further events fire.
    fn destroy(&mut self);
}

/// Adapts an [`AsyncRead`]/[`AsyncWrite`] byte stream to [`Connection`]
/// by moving the read half into a background task that forwards received
/// chunks as events.
pub struct StreamConnection<T> {
    writer: WriteHalf<T>,
    events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    open: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl<T> StreamConnection<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap an already established stream.
    ///
    /// The `Open` event is emitted immediately.
    pub fn new(stream: T) -> Self {
        let (mut reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let _ = tx.send(ConnectionEvent::Open);

        let task_open = Arc::clone(&open);
        let reader_task = tokio::spawn(async move {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx
                            .send(ConnectionEvent::Data(Bytes::copy_from_slice(&buf[..n])))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(ConnectionEvent::Error(err));
                        break;
                    }
                }
            }
            task_open.store(false, Ordering::SeqCst);
            let _ = tx.send(ConnectionEvent::Close);
        });

        Self {
            writer,
            events: Some(rx),
            open,
            reader_task,
        }
    }
}

impl<T> fmt::Debug for StreamConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConnection")
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T> Connection for StreamConnection<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events.take()
    }

    async fn write(&mut self, bytes: Bytes) -> io::Result<()> {
        self.writer.write_all(&bytes).await
    }

    async fn drain(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    fn destroy(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.reader_task.abort();
    }
}

impl<T> Drop for StreamConnection<T> {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
