// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing: CRC-16 and ADU layout.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    error::{Error, Result},
    unit::UnitId,
};

// [Modbus over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a Modbus RTU frame is 256 bytes."
pub(crate) const MAX_FRAME_LEN: usize = 256;

/// Smallest complete frame: unit + exception PDU + CRC.
pub(crate) const MIN_FRAME_LEN: usize = 5;

const CRC_BYTE_COUNT: usize = 2;

/// The Modbus CRC-16 lookup table (polynomial 0xA001, reflected).
pub(crate) const CRC_TABLE: [u16; 256] = build_crc_table();

const fn build_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            let odd = crc & 0x0001 != 0;
            crc >>= 1;
            if odd {
                crc ^= 0xA001;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Streaming Modbus CRC-16, seeded at 0xFFFF.
///
/// Feeding the unit byte and the PDU separately yields the same value as
/// one pass over the concatenated ADU.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Crc16(u16);

impl Crc16 {
    pub(crate) const fn new() -> Self {
        Self(0xFFFF)
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        for byte in data {
            let idx = usize::from((self.0 as u8) ^ byte);
            self.0 = (self.0 >> 8) ^ CRC_TABLE[idx];
        }
    }

    /// The CRC register; transmit the low byte first.
    pub(crate) fn finish(self) -> u16 {
        self.0
    }
}

pub(crate) fn crc16(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(data);
    crc.finish()
}

/// Frame a PDU for the wire: `[unit] [pdu] [crc lo] [crc hi]`.
pub(crate) fn encode_adu(unit_id: UnitId, pdu_data: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(1 + pdu_data.len() + CRC_BYTE_COUNT);
    buf.put_u8(unit_id);
    buf.put_slice(pdu_data);
    let crc = crc16(&buf);
    buf.put_u16_le(crc);
    buf
}

/// Parse one gap-delimited frame.
///
/// Validation order: minimum length, then CRC. The unit byte is checked by
/// the caller against the in-flight transaction.
pub(crate) fn decode_frame(frame: &[u8]) -> Result<(UnitId, Bytes)> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(Error::IncompleteResponseFrame);
    }
    let adu = &frame[..frame.len() - CRC_BYTE_COUNT];
    let tail = &frame[frame.len() - CRC_BYTE_COUNT..];
    let expected = u16::from_le_bytes([tail[0], tail[1]]);
    let actual = crc16(adu);
    if expected != actual {
        return Err(Error::InvalidChecksum { expected, actual });
    }
    Ok((adu[0], Bytes::copy_from_slice(&adu[1..])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crc16_bitwise(data: &[u8]) -> u16 {
        let mut crc: u16 = 0xFFFF;
        for x in data {
            crc ^= u16::from(*x);
            for _ in 0..8 {
                let crc_odd = (crc & 0x0001) != 0;
                crc >>= 1;
                if crc_odd {
                    crc ^= 0xA001;
                }
            }
        }
        crc
    }

    #[test]
    fn table_matches_bitwise_computation() {
        let vectors: &[&[u8]] = &[
            b"123456789",
            &[0x01, 0x03, 0x00, 0x00, 0x00, 0x03],
            &[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02],
            &[0xFF],
            &[],
        ];
        for v in vectors {
            assert_eq!(crc16(v), crc16_bitwise(v));
        }
    }

    #[test]
    fn known_vectors() {
        // Canonical CRC-16/MODBUS check value
        assert_eq!(crc16(b"123456789"), 0x4B37);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x03]), 0xCB05);
        assert_eq!(crc16(&[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02]), 0x63B6);
        assert_eq!(crc16(&[0x01, 0x83, 0x02]), 0xF1C0);
        assert_eq!(crc16(&[0x01, 0x11]), 0x2CC0);
    }

    #[test]
    fn streaming_equals_one_shot() {
        let unit = 0x01u8;
        let pdu = [0x11u8];
        let mut streaming = Crc16::new();
        streaming.update(&[unit]);
        streaming.update(&pdu);
        assert_eq!(streaming.finish(), crc16(&[0x01, 0x11]));
    }

    #[test]
    fn encode_read_request() {
        let buf = encode_adu(0x01, &[0x03, 0x08, 0x2B, 0x00, 0x02]);
        assert_eq!(
            &buf[..],
            &[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02, 0xB6, 0x63]
        );
    }

    #[test]
    fn decode_valid_frame() {
        let (unit, pdu) =
            decode_frame(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x03, 0x05, 0xCB]).unwrap();
        assert_eq!(unit, 0x01);
        assert_eq!(&pdu[..], &[0x03, 0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn short_frame_is_incomplete() {
        let err = decode_frame(&[0x01, 0x03, 0x05, 0xCB]).unwrap_err();
        assert!(matches!(err, Error::IncompleteResponseFrame));
        assert!(matches!(
            decode_frame(&[]).unwrap_err(),
            Error::IncompleteResponseFrame
        ));
    }

    #[test]
    fn corrupted_crc_is_detected() {
        let err = decode_frame(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x03, 0x05, 0xCC]).unwrap_err();
        let Error::InvalidChecksum { expected, actual } = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(expected, 0xCC05);
        assert_eq!(actual, 0xCB05);
    }

    #[test]
    fn round_trip() {
        let pdu = [0x11, 0x05, 0x0A, 0xFF, 0x01, 0x02, 0x03];
        let adu = encode_adu(0x7F, &pdu);
        let (unit, decoded) = decode_frame(&adu).unwrap();
        assert_eq!(unit, 0x7F);
        assert_eq!(&decoded[..], &pdu[..]);
    }
}
