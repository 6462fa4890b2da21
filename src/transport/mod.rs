// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport framing state machines.
//!
//! A transport owns the transactions it has put on the wire and turns the
//! connection's byte soup back into reconciliation events. All three
//! implementations are driven by the master's worker task; none of them
//! block or spawn.

pub(crate) mod rtu;

pub(crate) mod tcp;

pub(crate) mod tunnel;

use std::fmt;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    connection::Connection,
    error::Error,
    frame::{tunnel::SniffEvent, ResponsePdu},
    transaction::Transaction,
};

/// What a transport learned from inbound bytes or a frame gap.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// An in-flight transaction has been matched with an outcome. The
    /// master decides between delivery and retry.
    Reconciled {
        transaction: Transaction,
        result: std::result::Result<ResponsePdu, Error>,
    },
    /// A frame observed on a shared bus, for passive monitoring.
    Sniff(SniffEvent),
}

/// A send that failed synchronously, handing the transaction back.
#[derive(Debug)]
pub(crate) struct SendError {
    pub(crate) transaction: Transaction,
    pub(crate) error: Error,
}

#[async_trait]
pub(crate) trait Transport: fmt::Debug + Send {
    /// Hard ceiling on simultaneously in-flight transactions.
    fn capacity(&self) -> usize;

    /// Transactions currently owned by the transport.
    fn in_flight(&self) -> usize;

    /// Encode (or reuse) the transaction's ADU and put it on the wire.
    ///
    /// On success the transport owns the transaction until it is
    /// reconciled, timed out or cancelled. Fails synchronously with
    /// [`Error::TooManyRequests`] at capacity.
    async fn send_request(
        &mut self,
        transaction: Transaction,
        conn: &mut dyn Connection,
    ) -> std::result::Result<(), SendError>;

    /// Accept inbound bytes from the connection.
    async fn feed(
        &mut self,
        bytes: &[u8],
        conn: &mut dyn Connection,
        out: &mut Vec<TransportEvent>,
    );

    /// When the inter-frame idle timer should fire, if it is armed.
    fn idle_deadline(&self) -> Option<Instant>;

    /// The idle timer fired: treat the accumulated bytes as one frame.
    async fn on_idle_gap(&mut self, conn: &mut dyn Connection, out: &mut Vec<TransportEvent>);

    /// Remove an in-flight transaction (timeout or cancellation path).
    fn take(&mut self, id: usize) -> Option<Transaction>;

    /// Remove every in-flight transaction (connection loss or teardown).
    fn drain_in_flight(&mut self) -> Vec<Transaction>;
}
