// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tunnel transport: master requests piggybacked on slave-side polling.
//!
//! Another master owns the bus; we answer its `SLAVE_COMMAND` polls and
//! smuggle our own requests inside the replies. A poll whose sequence
//! number matches carries the response to the previously forwarded
//! request in its payload.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::{
    codec::rtu::MAX_FRAME_LEN,
    codec::tunnel::{classify, encode_reply, parse_poll},
    connection::Connection,
    error::Error,
    frame::tunnel::{Poll, SniffEvent},
    transaction::Transaction,
    unit::UnitId,
};

use super::{SendError, Transport, TransportEvent};

/// Configuration of the tunnel transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelConfig {
    /// The slave id under which we answer the external master's polls.
    pub slave_id: UnitId,
    /// Inter-character idle duration of the underlying RTU framing.
    /// Clamped to at least 1 ms.
    pub eof_timeout: Duration,
}

impl TunnelConfig {
    /// Configuration with the default 10 ms frame gap.
    #[must_use]
    pub fn new(slave_id: UnitId) -> Self {
        Self {
            slave_id,
            eof_timeout: Duration::from_millis(10),
        }
    }

    fn effective_eof_timeout(&self) -> Duration {
        self.eof_timeout.max(Duration::from_millis(1))
    }
}

#[derive(Debug)]
pub(crate) struct TunnelTransport {
    config: TunnelConfig,
    current: Option<Transaction>,
    next: Option<Transaction>,
    /// Whether `current` has been attached to a poll reply already.
    forwarded: bool,
    sequence: u8,
    reader: BytesMut,
    idle_deadline: Option<Instant>,
}

impl TunnelTransport {
    pub(crate) fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            current: None,
            next: None,
            forwarded: false,
            sequence: 0,
            reader: BytesMut::with_capacity(MAX_FRAME_LEN),
            idle_deadline: None,
        }
    }

    async fn handle_poll(
        &mut self,
        poll: Poll,
        conn: &mut dyn Connection,
        out: &mut Vec<TransportEvent>,
    ) {
        if poll.sequence != self.sequence {
            log::debug!(
                "out-of-sequence poll {} (at {}), sending empty reply",
                poll.sequence,
                self.sequence
            );
            self.reply(poll.sequence, None, conn).await;
            return;
        }

        // A payload on a matching poll is the response to the request we
        // forwarded earlier.
        if self.forwarded && !poll.payload.is_empty() {
            if let Some(transaction) = self.current.take() {
                let result = transaction.request().decode_response(poll.payload.clone());
                out.push(TransportEvent::Reconciled {
                    transaction,
                    result,
                });
            }
            self.forwarded = false;
            self.current = self.next.take();
        }

        let piggyback = match &mut self.current {
            Some(transaction) if !self.forwarded => {
                let target = transaction.unit_id();
                let pdu_data = Bytes::copy_from_slice(transaction.adu_or_build(|request, _| {
                    // Only the request PDU is cached; the surrounding
                    // reply frame depends on the poll being answered.
                    let pdu_data: Bytes = request.into();
                    BytesMut::from(&pdu_data[..])
                }));
                Some((target, pdu_data))
            }
            _ => None,
        };

        match piggyback {
            Some((target, pdu_data)) => {
                if self
                    .reply(poll.sequence, Some((target, &pdu_data)), conn)
                    .await
                {
                    if let Some(transaction) = self.current.as_mut() {
                        transaction.mark_in_flight();
                    }
                    self.forwarded = true;
                    self.sequence = self.sequence.wrapping_add(1);
                }
            }
            None => {
                self.reply(poll.sequence, None, conn).await;
            }
        }
    }

    /// Send a poll reply. Returns whether the write succeeded.
    async fn reply(
        &self,
        sequence: u8,
        piggyback: Option<(UnitId, &[u8])>,
        conn: &mut dyn Connection,
    ) -> bool {
        let frame = encode_reply(self.config.slave_id, sequence, piggyback);
        match conn.write(frame.freeze()).await {
            Ok(()) => true,
            Err(err) => {
                // A lost reply surfaces as a transaction timeout later.
                log::warn!("failed to write poll reply: {err}");
                false
            }
        }
    }
}

#[async_trait]
impl Transport for TunnelTransport {
    fn capacity(&self) -> usize {
        2
    }

    fn in_flight(&self) -> usize {
        usize::from(self.current.is_some()) + usize::from(self.next.is_some())
    }

    async fn send_request(
        &mut self,
        transaction: Transaction,
        _conn: &mut dyn Connection,
    ) -> std::result::Result<(), SendError> {
        // Nothing goes on the wire here; the request is attached to the
        // reply of the next matching poll.
        if self.current.is_none() {
            self.current = Some(transaction);
            self.forwarded = false;
        } else if self.next.is_none() {
            self.next = Some(transaction);
        } else {
            return Err(SendError {
                transaction,
                error: Error::TooManyRequests,
            });
        }
        Ok(())
    }

    async fn feed(
        &mut self,
        bytes: &[u8],
        _conn: &mut dyn Connection,
        _out: &mut Vec<TransportEvent>,
    ) {
        self.reader.extend_from_slice(bytes);
        self.idle_deadline = Some(Instant::now() + self.config.effective_eof_timeout());
    }

    fn idle_deadline(&self) -> Option<Instant> {
        self.idle_deadline
    }

    async fn on_idle_gap(&mut self, conn: &mut dyn Connection, out: &mut Vec<TransportEvent>) {
        self.idle_deadline = None;
        let chunk = self.reader.split();

        let event = classify(&chunk);
        out.push(TransportEvent::Sniff(event.clone()));

        let SniffEvent::Pdu { unit, pdu } = event else {
            return;
        };
        if unit != self.config.slave_id {
            return;
        }
        let Some(poll) = parse_poll(&pdu) else {
            // Addressed to us but not part of the polling convention.
            return;
        };
        self.handle_poll(poll, conn, out).await;
    }

    fn take(&mut self, id: usize) -> Option<Transaction> {
        if self.current.as_ref().map(Transaction::id) == Some(id) {
            let transaction = self.current.take();
            self.forwarded = false;
            self.current = self.next.take();
            return transaction;
        }
        if self.next.as_ref().map(Transaction::id) == Some(id) {
            return self.next.take();
        }
        None
    }

    fn drain_in_flight(&mut self) -> Vec<Transaction> {
        self.reader.clear();
        self.idle_deadline = None;
        self.forwarded = false;
        self.current
            .take()
            .into_iter()
            .chain(self.next.take())
            .collect()
    }
}
