// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! One in-flight request with its retry budget and completion state.

use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::Result,
    frame::{Request, Response},
    unit::{Unit, UnitId},
};

/// Lifecycle notifications of a single transaction.
///
/// Observed through the optional per-transaction event channel.
/// [`TransactionEvent::Complete`] is always the last event; after
/// [`TransactionEvent::Cancel`] nothing fires at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEvent {
    /// The encoded request was handed to the connection. Fires once per
    /// attempt, `attempt` counting from 1.
    Request {
        /// Attempt number, starting at 1.
        attempt: u8,
    },
    /// An attempt timed out.
    Timeout {
        /// Retries that remain after this timeout.
        retries_left: u8,
    },
    /// A matching response or exception response arrived.
    Response,
    /// The transaction failed terminally.
    Error,
    /// Terminal; the completion value has been delivered.
    Complete,
    /// The transaction was cancelled.
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    InFlight,
    Completed,
    Cancelled,
}

/// A single queued or in-flight request.
///
/// Owned by the master while queued and by the transport while in flight.
/// The completion sender is taken on first use, which makes delivery
/// exactly-once by construction.
#[derive(Debug)]
pub(crate) struct Transaction {
    id: usize,
    request: Request,
    unit: Unit,
    max_retries: u8,
    retries_left: u8,
    timeout: Duration,
    adu: Option<BytesMut>,
    state: State,
    done: Option<oneshot::Sender<Result<Response>>>,
    events: Option<mpsc::UnboundedSender<TransactionEvent>>,
}

impl Transaction {
    pub(crate) fn new(
        id: usize,
        request: Request,
        unit: Unit,
        max_retries: u8,
        timeout: Duration,
        done: oneshot::Sender<Result<Response>>,
        events: Option<mpsc::UnboundedSender<TransactionEvent>>,
    ) -> Self {
        Self {
            id,
            request,
            unit,
            max_retries,
            retries_left: max_retries,
            timeout,
            adu: None,
            state: State::Pending,
            done: Some(done),
            events,
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn unit_id(&self) -> UnitId {
        self.unit.id()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn retries_left(&self) -> u8 {
        self.retries_left
    }

    /// 1-based number of the attempt currently being issued.
    pub(crate) fn attempt(&self) -> u8 {
        self.max_retries - self.retries_left + 1
    }

    /// Spend one retry. Returns whether any budget was left to spend.
    pub(crate) fn consume_retry(&mut self) -> bool {
        if self.retries_left == 0 {
            return false;
        }
        self.retries_left -= 1;
        true
    }

    /// The cached ADU, encoding and storing it on first use. Retries
    /// reuse the stored buffer.
    pub(crate) fn adu_or_build<F>(&mut self, build: F) -> &mut BytesMut
    where
        F: FnOnce(&Request, UnitId) -> BytesMut,
    {
        let Self {
            adu,
            request,
            unit,
            ..
        } = self;
        adu.get_or_insert_with(|| build(request, unit.id()))
    }

    /// Record the wire send of the current attempt.
    pub(crate) fn mark_in_flight(&mut self) {
        self.state = State::InFlight;
        self.emit(TransactionEvent::Request {
            attempt: self.attempt(),
        });
    }

    pub(crate) fn emit(&self, event: TransactionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Deliver the terminal outcome. Consumes the transaction, so it can
    /// happen at most once; the `Complete` event is strictly last.
    pub(crate) fn complete(mut self, result: Result<Response>) {
        debug_assert!(matches!(self.state, State::Pending | State::InFlight));
        self.state = State::Completed;
        self.emit(if result.is_ok() {
            TransactionEvent::Response
        } else {
            TransactionEvent::Error
        });
        if let Some(done) = self.done.take() {
            let _ = done.send(result);
        }
        self.emit(TransactionEvent::Complete);
    }

    /// Drop the transaction without completing it. The completion channel
    /// closes unused, which the handle reports as a cancellation.
    pub(crate) fn cancel(mut self) {
        debug_assert!(matches!(self.state, State::Pending | State::InFlight));
        self.state = State::Cancelled;
        self.emit(TransactionEvent::Cancel);
        self.done.take();
        self.events.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn transaction(
        max_retries: u8,
    ) -> (
        Transaction,
        oneshot::Receiver<Result<Response>>,
        mpsc::UnboundedReceiver<TransactionEvent>,
    ) {
        let (done_tx, done_rx) = oneshot::channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let txn = Transaction::new(
            1,
            Request::ReadCoils(0, 8),
            Unit::device(1).unwrap(),
            max_retries,
            Duration::from_millis(100),
            done_tx,
            Some(ev_tx),
        );
        (txn, done_rx, ev_rx)
    }

    #[test]
    fn retry_budget() {
        let (mut txn, _done, _ev) = transaction(2);
        assert_eq!(txn.attempt(), 1);
        assert!(txn.consume_retry());
        assert_eq!(txn.attempt(), 2);
        assert!(txn.consume_retry());
        assert_eq!(txn.attempt(), 3);
        assert!(!txn.consume_retry());
        assert_eq!(txn.retries_left(), 0);
    }

    #[tokio::test]
    async fn completion_is_delivered_once_and_last() {
        let (mut txn, done, mut ev) = transaction(0);
        txn.mark_in_flight();
        txn.complete(Ok(Response::ReadCoils(vec![true])));

        let result = done.await.unwrap();
        assert!(result.is_ok());

        assert_eq!(ev.recv().await, Some(TransactionEvent::Request { attempt: 1 }));
        assert_eq!(ev.recv().await, Some(TransactionEvent::Response));
        assert_eq!(ev.recv().await, Some(TransactionEvent::Complete));
        assert_eq!(ev.recv().await, None);
    }

    #[tokio::test]
    async fn error_completion() {
        let (txn, done, mut ev) = transaction(0);
        txn.complete(Err(Error::Timeout));
        assert!(matches!(done.await.unwrap(), Err(Error::Timeout)));
        assert_eq!(ev.recv().await, Some(TransactionEvent::Error));
        assert_eq!(ev.recv().await, Some(TransactionEvent::Complete));
    }

    #[tokio::test]
    async fn cancellation_closes_the_channel() {
        let (txn, done, mut ev) = transaction(0);
        txn.cancel();
        assert!(done.await.is_err());
        assert_eq!(ev.recv().await, Some(TransactionEvent::Cancel));
        assert_eq!(ev.recv().await, None);
    }

    #[test]
    fn adu_is_built_once() {
        let (mut txn, _done, _ev) = transaction(0);
        let mut builds = 0;
        let adu = txn.adu_or_build(|_, _| {
            builds += 1;
            BytesMut::from(&[0x01, 0x02][..])
        });
        assert_eq!(&adu[..], &[0x01, 0x02]);
        let adu = txn.adu_or_build(|_, _| {
            builds += 1;
            BytesMut::new()
        });
        assert_eq!(&adu[..], &[0x01, 0x02]);
        assert_eq!(builds, 1);
    }
}
