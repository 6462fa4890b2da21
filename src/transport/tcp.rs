// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! IP transport: MBAP framing with transaction multiplexing.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::{
    codec::tcp::{encode_adu, rewrite_transaction_id, AduDecoder},
    connection::Connection,
    error::Error,
    frame::tcp::{Header, TransactionId},
    transaction::Transaction,
};

use super::{SendError, Transport, TransportEvent};

/// Transaction ids run from 1 to 0xFFFE; 0xFFFF is never issued.
const MAX_TRANSACTION_ID: TransactionId = 0xFFFE;

#[derive(Debug)]
pub(crate) struct TcpTransport {
    transactions: HashMap<TransactionId, Transaction>,
    last_id: TransactionId,
    decoder: AduDecoder,
    reader: BytesMut,
}

impl TcpTransport {
    pub(crate) fn new() -> Self {
        Self {
            transactions: HashMap::new(),
            last_id: 0,
            decoder: AduDecoder,
            reader: BytesMut::new(),
        }
    }

    /// Allocate the next free transaction id, advancing past ids that are
    /// still in flight.
    fn next_transaction_id(&mut self) -> Option<TransactionId> {
        if self.transactions.len() >= usize::from(MAX_TRANSACTION_ID) {
            return None;
        }
        loop {
            self.last_id = if self.last_id >= MAX_TRANSACTION_ID {
                1
            } else {
                self.last_id + 1
            };
            if !self.transactions.contains_key(&self.last_id) {
                return Some(self.last_id);
            }
        }
    }

    fn reconcile(
        &mut self,
        transaction_id: TransactionId,
        outcome: std::result::Result<(Header, Bytes), Error>,
        out: &mut Vec<TransportEvent>,
    ) {
        let Some(transaction) = self.transactions.remove(&transaction_id) else {
            log::warn!("skipping frame for unknown transaction id {transaction_id}");
            return;
        };
        let result = outcome.and_then(|(hdr, pdu_data)| {
            if hdr.unit_id != transaction.unit_id() {
                return Err(Error::InvalidResponseData(format!(
                    "response from unit {}, expected {}",
                    hdr.unit_id,
                    transaction.unit_id()
                )));
            }
            transaction.request().decode_response(pdu_data)
        });
        out.push(TransportEvent::Reconciled {
            transaction,
            result,
        });
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn capacity(&self) -> usize {
        usize::from(MAX_TRANSACTION_ID)
    }

    fn in_flight(&self) -> usize {
        self.transactions.len()
    }

    async fn send_request(
        &mut self,
        mut transaction: Transaction,
        conn: &mut dyn Connection,
    ) -> std::result::Result<(), SendError> {
        let Some(transaction_id) = self.next_transaction_id() else {
            return Err(SendError {
                transaction,
                error: Error::TooManyRequests,
            });
        };

        let adu = {
            let adu = transaction.adu_or_build(|request, unit_id| {
                let pdu_data: Bytes = request.into();
                let hdr = Header {
                    transaction_id,
                    unit_id,
                };
                encode_adu(hdr, &pdu_data)
            });
            // A retry reuses the cached ADU under its fresh id.
            rewrite_transaction_id(adu, transaction_id);
            Bytes::copy_from_slice(adu)
        };

        if let Err(err) = conn.write(adu).await {
            return Err(SendError {
                transaction,
                error: err.into(),
            });
        }

        transaction.mark_in_flight();
        self.transactions.insert(transaction_id, transaction);
        Ok(())
    }

    async fn feed(
        &mut self,
        bytes: &[u8],
        _conn: &mut dyn Connection,
        out: &mut Vec<TransportEvent>,
    ) {
        self.reader.extend_from_slice(bytes);
        loop {
            match self.decoder.decode(&mut self.reader) {
                Ok(Some((hdr, pdu_data))) => {
                    self.reconcile(hdr.transaction_id, Ok((hdr, pdu_data)), out);
                }
                Ok(None) => break,
                Err(frame_error) => {
                    self.reconcile(
                        frame_error.transaction_id,
                        Err(frame_error.error),
                        out,
                    );
                }
            }
        }
    }

    fn idle_deadline(&self) -> Option<Instant> {
        None
    }

    async fn on_idle_gap(&mut self, _conn: &mut dyn Connection, _out: &mut Vec<TransportEvent>) {}

    fn take(&mut self, id: usize) -> Option<Transaction> {
        let key = self
            .transactions
            .iter()
            .find(|(_, txn)| txn.id() == id)
            .map(|(key, _)| *key)?;
        self.transactions.remove(&key)
    }

    fn drain_in_flight(&mut self) -> Vec<Transaction> {
        self.reader.clear();
        self.transactions.drain().map(|(_, txn)| txn).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_allocation_skips_in_flight_and_wraps() {
        let mut transport = TcpTransport::new();
        assert_eq!(transport.next_transaction_id(), Some(1));
        assert_eq!(transport.next_transaction_id(), Some(2));

        transport.last_id = MAX_TRANSACTION_ID - 1;
        assert_eq!(transport.next_transaction_id(), Some(MAX_TRANSACTION_ID));
        // 0xFFFF is skipped, the counter wraps to 1
        assert_eq!(transport.next_transaction_id(), Some(1));
    }
}
