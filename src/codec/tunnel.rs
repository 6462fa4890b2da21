// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Framing of the tunneled (piggyback polling) dialect.
//!
//! On the wire this is plain RTU. The payload convention is specific: the
//! external bus master polls our slave id with `SLAVE_COMMAND` frames and
//! our replies carry the request we want forwarded.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    error::Error,
    frame::{tunnel::Poll, tunnel::SniffEvent, SLAVE_COMMAND},
    unit::UnitId,
};

use super::rtu::{crc16, decode_frame};

/// Classify one gap-delimited chunk for the sniffer channel.
pub(crate) fn classify(chunk: &[u8]) -> SniffEvent {
    match decode_frame(chunk) {
        Ok((unit, pdu)) => SniffEvent::Pdu { unit, pdu },
        Err(Error::IncompleteResponseFrame) => {
            SniffEvent::Incomplete(Bytes::copy_from_slice(chunk))
        }
        Err(_) => SniffEvent::BadChecksum(Bytes::copy_from_slice(chunk)),
    }
}

/// Parse a verified PDU as a `SLAVE_COMMAND` poll.
///
/// Anything else addressed to us is not part of the polling convention and
/// is ignored by the transport.
pub(crate) fn parse_poll(pdu: &Bytes) -> Option<Poll> {
    if pdu.len() < 2 || pdu[0] != SLAVE_COMMAND {
        return None;
    }
    Some(Poll {
        sequence: pdu[1],
        payload: pdu.slice(2..),
    })
}

/// Frame a reply to a poll.
///
/// With a piggybacked request:
/// `[slave_id] [SLAVE_COMMAND] [seq] [target unit] [request pdu..] [crc]`,
/// otherwise the minimal `[slave_id] [SLAVE_COMMAND] [seq] [crc]`.
pub(crate) fn encode_reply(
    slave_id: UnitId,
    sequence: u8,
    piggyback: Option<(UnitId, &[u8])>,
) -> BytesMut {
    let payload_len = piggyback.map_or(0, |(_, pdu)| 1 + pdu.len());
    let mut buf = BytesMut::with_capacity(3 + payload_len + 2);
    buf.put_u8(slave_id);
    buf.put_u8(SLAVE_COMMAND);
    buf.put_u8(sequence);
    if let Some((target, pdu_data)) = piggyback {
        buf.put_u8(target);
        buf.put_slice(pdu_data);
    }
    let crc = crc16(&buf);
    buf.put_u16_le(crc);
    buf
}
