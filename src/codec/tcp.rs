// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing for the IP transport.

use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    error::Error,
    frame::tcp::{Header, TransactionId},
};

pub(crate) const HEADER_LEN: usize = 7;

const PROTOCOL_ID: u16 = 0x0000; // TCP

/// A framing failure attributable to one transaction.
///
/// The stream itself stays usable: the decoder consumes the offending
/// frame and the caller fails the matched transaction.
#[derive(Debug)]
pub(crate) struct FrameError {
    pub(crate) transaction_id: TransactionId,
    pub(crate) error: Error,
}

/// Incremental MBAP decoder over the connection's receive buffer.
///
/// Returns `Ok(None)` until a whole frame is buffered, then consumes and
/// returns it. Malformed frames are consumed and reported as [`FrameError`].
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct AduDecoder;

impl AduDecoder {
    pub(crate) fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<(Header, Bytes)>, FrameError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let transaction_id = BigEndian::read_u16(&buf[0..2]);
        let protocol_id = BigEndian::read_u16(&buf[2..4]);
        let len = usize::from(BigEndian::read_u16(&buf[4..6]));

        if len == 0 {
            buf.advance(HEADER_LEN);
            return Err(FrameError {
                transaction_id,
                error: Error::InvalidResponseData("MBAP length of zero".into()),
            });
        }
        // len counts the unit id byte
        let pdu_len = len - 1;
        if buf.len() < HEADER_LEN + pdu_len {
            return Ok(None);
        }

        let header_data = buf.split_to(HEADER_LEN);
        let pdu_data = buf.split_to(pdu_len).freeze();

        if protocol_id != PROTOCOL_ID {
            return Err(FrameError {
                transaction_id,
                error: Error::InvalidResponseData(format!(
                    "invalid protocol identifier {protocol_id}"
                )),
            });
        }

        let header = Header {
            transaction_id,
            unit_id: header_data[6],
        };
        Ok(Some((header, pdu_data)))
    }
}

/// Frame a PDU for the wire: `[txid] [protocol=0] [len] [unit] [pdu]`.
pub(crate) fn encode_adu(hdr: Header, pdu_data: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + pdu_data.len());
    buf.put_u16(hdr.transaction_id);
    buf.put_u16(PROTOCOL_ID);
    buf.put_u16((pdu_data.len() + 1) as u16);
    buf.put_u8(hdr.unit_id);
    buf.put_slice(pdu_data);
    buf
}

/// Overwrite the transaction id prefix of an already framed ADU.
pub(crate) fn rewrite_transaction_id(adu: &mut BytesMut, transaction_id: TransactionId) {
    debug_assert!(adu.len() >= 2);
    BigEndian::write_u16(&mut adu[0..2], transaction_id);
}
