// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU transport: idle-gap framing over a serial byte stream.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use smallvec::SmallVec;
use tokio::time::Instant;

use crate::{
    codec::rtu::{decode_frame, encode_adu, MAX_FRAME_LEN},
    connection::{Connection, ControlSignals},
    error::Error,
    transaction::Transaction,
};

use super::{SendError, Transport, TransportEvent};

/// Configuration of the RTU framing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtuConfig {
    /// Inter-character idle duration after which the accumulated bytes are
    /// treated as one frame. Clamped to at least 1 ms.
    pub eof_timeout: Duration,
    /// Discard the echo of our own transmission before parsing, for buses
    /// behind optical couplers.
    pub enable_echo: bool,
    /// Toggle the RTS line around transmissions for half-duplex RS-485
    /// direction control.
    pub rts_control: bool,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            eof_timeout: Duration::from_millis(10),
            enable_echo: false,
            rts_control: false,
        }
    }
}

impl RtuConfig {
    /// The inter-frame gap of 3.5 character times at the given baud rate,
    /// one character being 11 bits on the wire.
    #[must_use]
    pub fn eof_timeout_for_baud_rate(baud_rate: u32) -> Duration {
        let micros = (3_500_000u64 * 11).div_ceil(u64::from(baud_rate.max(1)));
        Duration::from_micros(micros).max(Duration::from_millis(1))
    }

    fn effective_eof_timeout(&self) -> Duration {
        self.eof_timeout.max(Duration::from_millis(1))
    }
}

#[derive(Debug)]
pub(crate) struct RtuTransport {
    config: RtuConfig,
    current: Option<Transaction>,
    reader: BytesMut,
    idle_deadline: Option<Instant>,
    /// Bytes of our own transmission still expected back as echo.
    echo_remaining: usize,
}

impl RtuTransport {
    pub(crate) fn new(config: RtuConfig) -> Self {
        Self {
            config,
            current: None,
            reader: BytesMut::with_capacity(MAX_FRAME_LEN),
            idle_deadline: None,
            echo_remaining: 0,
        }
    }

    async fn write_adu(
        &mut self,
        adu: Bytes,
        conn: &mut dyn Connection,
    ) -> std::result::Result<(), Error> {
        if self.config.rts_control {
            conn.set(ControlSignals { rts: Some(true) })?;
            let result = async {
                conn.write(adu).await?;
                conn.drain().await
            }
            .await;
            conn.set(ControlSignals { rts: Some(false) })?;
            result?;
        } else {
            conn.write(adu).await?;
        }
        Ok(())
    }

    fn reconcile_current(&mut self, chunk: &[u8], out: &mut Vec<TransportEvent>) {
        let Some(transaction) = self.current.take() else {
            log::debug!("discarding {} unsolicited byte(s)", chunk.len());
            return;
        };
        let result = decode_frame(chunk).and_then(|(unit_id, pdu_data)| {
            if unit_id != transaction.unit_id() {
                return Err(Error::InvalidResponseData(format!(
                    "response from unit {unit_id}, expected {}",
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
impl Transport for RtuTransport {
    fn capacity(&self) -> usize {
        1
    }

    fn in_flight(&self) -> usize {
        usize::from(self.current.is_some())
    }

    async fn send_request(
        &mut self,
        mut transaction: Transaction,
        conn: &mut dyn Connection,
    ) -> std::result::Result<(), SendError> {
        if self.current.is_some() {
            return Err(SendError {
                transaction,
                error: Error::TooManyRequests,
            });
        }

        let adu = Bytes::copy_from_slice(transaction.adu_or_build(|request, unit_id| {
            let pdu_data: Bytes = request.into();
            encode_adu(unit_id, &pdu_data)
        }));

        // Anything still buffered belongs to a previous exchange.
        if !self.reader.is_empty() {
            log::debug!("flushing {} stale byte(s) before send", self.reader.len());
            self.reader.clear();
        }
        self.idle_deadline = None;
        self.echo_remaining = if self.config.enable_echo {
            adu.len()
        } else {
            0
        };

        if let Err(error) = self.write_adu(adu, conn).await {
            return Err(SendError { transaction, error });
        }

        transaction.mark_in_flight();
        self.current = Some(transaction);
        Ok(())
    }

    async fn feed(
        &mut self,
        bytes: &[u8],
        _conn: &mut dyn Connection,
        _out: &mut Vec<TransportEvent>,
    ) {
        let mut bytes = bytes;
        // The bus echoes our own transmission first; swallow it without
        // restarting the frame timer.
        if self.echo_remaining > 0 {
            let eat = self.echo_remaining.min(bytes.len());
            self.echo_remaining -= eat;
            bytes = &bytes[eat..];
            if bytes.is_empty() {
                if self.echo_remaining > 0 {
                    // Keep the gap timer running so a truncated echo is
                    // detected instead of waiting for the full timeout.
                    self.idle_deadline =
                        Some(Instant::now() + self.config.effective_eof_timeout());
                }
                return;
            }
        }
        self.reader.extend_from_slice(bytes);
        self.idle_deadline = Some(Instant::now() + self.config.effective_eof_timeout());
    }

    fn idle_deadline(&self) -> Option<Instant> {
        self.idle_deadline
    }

    async fn on_idle_gap(&mut self, _conn: &mut dyn Connection, out: &mut Vec<TransportEvent>) {
        self.idle_deadline = None;
        let chunk: SmallVec<[u8; MAX_FRAME_LEN]> = SmallVec::from_slice(&self.reader);
        self.reader.clear();

        if self.echo_remaining > 0 {
            // The line went idle before our own echo came back in full.
            log::warn!(
                "missing {} echo byte(s) at the frame gap",
                self.echo_remaining
            );
            self.echo_remaining = 0;
            if let Some(transaction) = self.current.take() {
                out.push(TransportEvent::Reconciled {
                    transaction,
                    result: Err(Error::IncompleteResponseFrame),
                });
            }
            return;
        }

        self.reconcile_current(&chunk, out);
    }

    fn take(&mut self, id: usize) -> Option<Transaction> {
        if self.current.as_ref().map(Transaction::id) != Some(id) {
            return None;
        }
        self.reader.clear();
        self.idle_deadline = None;
        self.echo_remaining = 0;
        self.current.take()
    }

    fn drain_in_flight(&mut self) -> Vec<Transaction> {
        self.reader.clear();
        self.idle_deadline = None;
        self.echo_remaining = 0;
        self.current.take().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baud_rate_gap() {
        // 9600 baud: 3.5 chars of 11 bits each ~ 4.01 ms
        let gap = RtuConfig::eof_timeout_for_baud_rate(9600);
        assert!(gap >= Duration::from_millis(4));
        assert!(gap < Duration::from_millis(5));

        // Fast links clamp to the 1 ms floor
        assert_eq!(
            RtuConfig::eof_timeout_for_baud_rate(1_000_000),
            Duration::from_millis(1)
        );
    }
}
