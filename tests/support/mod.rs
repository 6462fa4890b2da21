// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A scripted connection for byte-level end-to-end tests.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use modbus_master::connection::{Connection, ConnectionEvent, ControlSignals};
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Default)]
struct Shared {
    written: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

/// The connection handed to the master.
#[derive(Debug)]
pub struct MockConnection {
    events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    open: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

/// The test's side of the wire: inject inbound events, observe writes.
#[derive(Debug)]
pub struct MockRemote {
    events: mpsc::UnboundedSender<ConnectionEvent>,
    open: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

/// An already-open connection; the `Open` event is pre-queued.
pub fn mock_connection() -> (MockConnection, MockRemote) {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(ConnectionEvent::Open);
    let open = Arc::new(AtomicBool::new(true));
    let shared = Arc::new(Shared::default());
    (
        MockConnection {
            events: Some(rx),
            open: Arc::clone(&open),
            shared: Arc::clone(&shared),
        },
        MockRemote {
            events: tx,
            open,
            shared,
        },
    )
}

impl MockRemote {
    /// Deliver bytes as if they arrived from the peer.
    pub fn send_data(&self, bytes: &[u8]) {
        let _ = self
            .events
            .send(ConnectionEvent::Data(Bytes::copy_from_slice(bytes)));
    }

    /// Drop the link.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Close);
    }

    /// Wait for the next outbound frame written by the master.
    pub async fn next_write(&self) -> Bytes {
        loop {
            if let Some(bytes) = self.shared.written.lock().unwrap().pop_front() {
                return bytes;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Outbound frames not yet consumed by [`next_write`](Self::next_write).
    pub fn written(&self) -> Vec<Bytes> {
        self.shared.written.lock().unwrap().iter().cloned().collect()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ConnectionEvent>> {
        self.events.take()
    }

    async fn write(&mut self, bytes: Bytes) -> io::Result<()> {
        if !self.is_open() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link is down"));
        }
        self.shared.written.lock().unwrap().push_back(bytes);
        self.shared.notify.notify_one();
        Ok(())
    }

    fn set(&mut self, _signals: ControlSignals) -> io::Result<()> {
        Ok(())
    }

    fn destroy(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
