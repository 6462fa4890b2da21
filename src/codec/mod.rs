// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! PDU serialization

pub(crate) mod rtu;

pub(crate) mod tcp;

pub(crate) mod tunnel;

use std::convert::TryFrom;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    error::{Error, Result},
    frame::*,
};

fn incomplete(expected: usize, actual: usize) -> Error {
    Error::IncompletePdu { expected, actual }
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::InvalidResponseData(msg.into())
}

impl From<&Request> for Bytes {
    fn from(req: &Request) -> Bytes {
        let cnt = request_byte_count(req);
        let mut data = BytesMut::with_capacity(cnt);
        data.put_u8(req.function_code());
        match req {
            Request::ReadCoils(address, quantity)
            | Request::ReadDiscreteInputs(address, quantity)
            | Request::ReadHoldingRegisters(address, quantity)
            | Request::ReadInputRegisters(address, quantity) => {
                data.put_u16(*address);
                data.put_u16(*quantity);
            }
            Request::WriteSingleCoil(address, state) => {
                data.put_u16(*address);
                data.put_u16(bool_to_coil(*state));
            }
            Request::WriteSingleRegister(address, word) => {
                data.put_u16(*address);
                data.put_u16(*word);
            }
            Request::ReadDiagnostics(sub_function, word) => {
                data.put_u16(*sub_function);
                data.put_u16(*word);
            }
            Request::WriteMultipleCoils(address, coils) => {
                data.put_u16(*address);
                data.put_u16(coils.len() as u16);
                let packed = pack_bits(coils);
                data.put_u8(packed.len() as u8);
                data.put_slice(&packed);
            }
            Request::WriteMultipleRegisters(address, words) => {
                data.put_u16(*address);
                data.put_u16(words.len() as u16);
                data.put_u8((words.len() * 2) as u8);
                for w in words {
                    data.put_u16(*w);
                }
            }
            Request::ReportSlaveId => (),
            Request::ReadFileRecord(ranges) => {
                data.put_u8((ranges.len() * 7) as u8);
                for range in ranges {
                    data.put_u8(FILE_RECORD_REF_TYPE);
                    data.put_u16(range.file);
                    data.put_u16(range.record);
                    data.put_u16(range.length);
                }
            }
            Request::WriteFileRecord(records) => {
                let len: usize = records.iter().map(|r| 7 + 2 * r.data.len()).sum();
                data.put_u8(len as u8);
                for record in records {
                    data.put_u8(FILE_RECORD_REF_TYPE);
                    data.put_u16(record.file);
                    data.put_u16(record.record);
                    data.put_u16(record.data.len() as u16);
                    for w in &record.data {
                        data.put_u16(*w);
                    }
                }
            }
            Request::ReadFifo8(id, max_count) => {
                data.put_u8(*id);
                data.put_u8(*max_count);
            }
            Request::WriteFifo8(id, payload) => {
                data.put_u8(*id);
                data.put_u8(payload.len() as u8);
                data.put_slice(payload);
            }
            Request::ReadObject(id) => {
                data.put_u8(*id);
            }
            Request::WriteObject(id, payload) => {
                data.put_u8(*id);
                data.put_u8(payload.len() as u8);
                data.put_slice(payload);
            }
            Request::ReadMemory(address, count) => {
                data.put_u16(*address);
                data.put_u8(*count);
            }
            Request::WriteMemory(address, payload) => {
                data.put_u16(*address);
                data.put_slice(payload);
            }
            Request::Command(id, payload) => {
                data.put_u8(*id);
                data.put_slice(payload);
            }
        }
        data.freeze()
    }
}

impl From<&Response> for Bytes {
    fn from(rsp: &Response) -> Bytes {
        let cnt = response_byte_count(rsp);
        let mut data = BytesMut::with_capacity(cnt);
        data.put_u8(rsp.function_code());
        match rsp {
            Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils) => {
                let packed = pack_bits(coils);
                data.put_u8(packed.len() as u8);
                data.put_slice(&packed);
            }
            Response::ReadHoldingRegisters(words) | Response::ReadInputRegisters(words) => {
                data.put_u8((words.len() * 2) as u8);
                for w in words {
                    data.put_u16(*w);
                }
            }
            Response::WriteSingleCoil(address, state) => {
                data.put_u16(*address);
                data.put_u16(bool_to_coil(*state));
            }
            Response::WriteSingleRegister(address, word) => {
                data.put_u16(*address);
                data.put_u16(*word);
            }
            Response::ReadDiagnostics(sub_function, word) => {
                data.put_u16(*sub_function);
                data.put_u16(*word);
            }
            Response::WriteMultipleCoils(address, quantity)
            | Response::WriteMultipleRegisters(address, quantity) => {
                data.put_u16(*address);
                data.put_u16(*quantity);
            }
            Response::ReportSlaveId(report) => {
                data.put_u8((5 + report.extra.len()) as u8);
                data.put_u8(report.product);
                data.put_u8(report.run_indicator);
                data.put_slice(&report.version);
                data.put_slice(&report.extra);
            }
            Response::ReadFileRecord(groups) => {
                let len: usize = groups.iter().map(|g| 2 + 2 * g.len()).sum();
                data.put_u8(len as u8);
                for group in groups {
                    data.put_u8((1 + 2 * group.len()) as u8);
                    data.put_u8(FILE_RECORD_REF_TYPE);
                    for w in group {
                        data.put_u16(*w);
                    }
                }
            }
            Response::WriteFileRecord(records) => {
                let len: usize = records.iter().map(|r| 7 + 2 * r.data.len()).sum();
                data.put_u8(len as u8);
                for record in records {
                    data.put_u8(FILE_RECORD_REF_TYPE);
                    data.put_u16(record.file);
                    data.put_u16(record.record);
                    data.put_u16(record.data.len() as u16);
                    for w in &record.data {
                        data.put_u16(*w);
                    }
                }
            }
            Response::ReadFifo8(status, payload) => {
                data.put_u8(*status);
                data.put_u8(payload.len() as u8);
                data.put_slice(payload);
            }
            Response::WriteFifo8(count) => {
                data.put_u8(*count);
            }
            Response::ReadObject(payload) => {
                data.put_u8(payload.len() as u8);
                data.put_slice(payload);
            }
            Response::WriteObject(status) => {
                data.put_u8(*status);
            }
            Response::ReadMemory(payload) => {
                data.put_slice(payload);
            }
            Response::WriteMemory(status) => {
                data.put_u8(*status);
            }
            Response::Command(id, payload) => {
                data.put_u8(*id);
                data.put_slice(payload);
            }
        }
        data.freeze()
    }
}

impl From<&ExceptionResponse> for Bytes {
    fn from(ex: &ExceptionResponse) -> Bytes {
        let mut data = BytesMut::with_capacity(2);
        debug_assert!(ex.function < 0x80);
        data.put_u8(ex.function | 0x80);
        data.put_u8(ex.exception.code());
        data.freeze()
    }
}

impl TryFrom<Bytes> for Request {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        if bytes.is_empty() {
            return Err(incomplete(1, 0));
        }
        let fn_code = bytes[0];
        let req = match fn_code {
            0x01 | 0x02 | 0x03 | 0x04 => {
                need(&bytes, 5)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                match fn_code {
                    0x01 => Self::ReadCoils(address, quantity),
                    0x02 => Self::ReadDiscreteInputs(address, quantity),
                    0x03 => Self::ReadHoldingRegisters(address, quantity),
                    _ => Self::ReadInputRegisters(address, quantity),
                }
            }
            0x05 => {
                need(&bytes, 5)?;
                Self::WriteSingleCoil(
                    BigEndian::read_u16(&bytes[1..3]),
                    coil_to_bool(BigEndian::read_u16(&bytes[3..5]))?,
                )
            }
            0x06 => {
                need(&bytes, 5)?;
                Self::WriteSingleRegister(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            0x08 => {
                need(&bytes, 5)?;
                Self::ReadDiagnostics(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            0x0F => {
                need(&bytes, 6)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                let byte_count = usize::from(bytes[5]);
                need(&bytes, 6 + byte_count)?;
                if byte_count != packed_bits_len(usize::from(quantity)) {
                    return Err(malformed(format!(
                        "byte count {byte_count} does not cover {quantity} coils"
                    )));
                }
                Self::WriteMultipleCoils(address, unpack_bits(&bytes[6..], quantity))
            }
            0x10 => {
                need(&bytes, 6)?;
                let address = BigEndian::read_u16(&bytes[1..3]);
                let quantity = BigEndian::read_u16(&bytes[3..5]);
                let byte_count = usize::from(bytes[5]);
                need(&bytes, 6 + byte_count)?;
                if byte_count != 2 * usize::from(quantity) {
                    return Err(malformed(format!(
                        "byte count {byte_count} does not cover {quantity} registers"
                    )));
                }
                Self::WriteMultipleRegisters(address, read_words(&bytes[6..], quantity))
            }
            0x11 => Self::ReportSlaveId,
            0x14 => {
                need(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                need(&bytes, 2 + byte_count)?;
                if byte_count == 0 || byte_count % 7 != 0 {
                    return Err(malformed(format!(
                        "file record byte count {byte_count} is not a multiple of 7"
                    )));
                }
                let mut ranges = Vec::with_capacity(byte_count / 7);
                for chunk in bytes[2..2 + byte_count].chunks(7) {
                    if chunk[0] != FILE_RECORD_REF_TYPE {
                        return Err(malformed(format!(
                            "file record reference type {}",
                            chunk[0]
                        )));
                    }
                    ranges.push(FileRecordRange {
                        file: BigEndian::read_u16(&chunk[1..3]),
                        record: BigEndian::read_u16(&chunk[3..5]),
                        length: BigEndian::read_u16(&chunk[5..7]),
                    });
                }
                Self::ReadFileRecord(ranges)
            }
            0x15 => Self::WriteFileRecord(read_file_records(&bytes)?),
            0x41 => {
                need(&bytes, 3)?;
                Self::ReadFifo8(bytes[1], bytes[2])
            }
            0x42 => {
                need(&bytes, 3)?;
                let byte_count = usize::from(bytes[2]);
                need(&bytes, 3 + byte_count)?;
                Self::WriteFifo8(bytes[1], bytes[3..3 + byte_count].to_vec())
            }
            0x43 => {
                need(&bytes, 2)?;
                Self::ReadObject(bytes[1])
            }
            0x44 => {
                need(&bytes, 3)?;
                let byte_count = usize::from(bytes[2]);
                need(&bytes, 3 + byte_count)?;
                Self::WriteObject(bytes[1], bytes[3..3 + byte_count].to_vec())
            }
            0x45 => {
                need(&bytes, 4)?;
                Self::ReadMemory(BigEndian::read_u16(&bytes[1..3]), bytes[3])
            }
            0x46 => {
                need(&bytes, 4)?;
                Self::WriteMemory(BigEndian::read_u16(&bytes[1..3]), bytes[3..].to_vec())
            }
            0x47 => {
                need(&bytes, 2)?;
                Self::Command(bytes[1], bytes[2..].to_vec())
            }
            _ => return Err(Error::InvalidFunctionCode(fn_code)),
        };
        Ok(req)
    }
}

impl TryFrom<Bytes> for Response {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        if bytes.is_empty() {
            return Err(incomplete(1, 0));
        }
        let fn_code = bytes[0];
        let rsp = match fn_code {
            0x01 | 0x02 => {
                need(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                need_exact(&bytes, 2 + byte_count)?;
                // Without the request at hand every bit of every byte is
                // unpacked; the caller has to ignore the trailing padding.
                let quantity = (byte_count * 8) as Quantity;
                let coils = unpack_bits(&bytes[2..], quantity);
                if fn_code == 0x01 {
                    Self::ReadCoils(coils)
                } else {
                    Self::ReadDiscreteInputs(coils)
                }
            }
            0x03 | 0x04 => {
                need(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                need_exact(&bytes, 2 + byte_count)?;
                if byte_count % 2 != 0 {
                    return Err(malformed(format!("odd register byte count {byte_count}")));
                }
                let words = read_words(&bytes[2..], (byte_count / 2) as Quantity);
                if fn_code == 0x03 {
                    Self::ReadHoldingRegisters(words)
                } else {
                    Self::ReadInputRegisters(words)
                }
            }
            0x05 => {
                need_exact(&bytes, 5)?;
                Self::WriteSingleCoil(
                    BigEndian::read_u16(&bytes[1..3]),
                    coil_to_bool(BigEndian::read_u16(&bytes[3..5]))?,
                )
            }
            0x06 => {
                need_exact(&bytes, 5)?;
                Self::WriteSingleRegister(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            0x08 => {
                need_exact(&bytes, 5)?;
                Self::ReadDiagnostics(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            0x0F => {
                need_exact(&bytes, 5)?;
                Self::WriteMultipleCoils(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            0x10 => {
                need_exact(&bytes, 5)?;
                Self::WriteMultipleRegisters(
                    BigEndian::read_u16(&bytes[1..3]),
                    BigEndian::read_u16(&bytes[3..5]),
                )
            }
            0x11 => {
                need(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                need_exact(&bytes, 2 + byte_count)?;
                if byte_count < 5 {
                    return Err(malformed(format!(
                        "slave id byte count {byte_count} < 5"
                    )));
                }
                if byte_count - 5 > MAX_SLAVE_ID_EXTRA {
                    return Err(malformed(format!(
                        "slave id extra data of {} bytes > 243",
                        byte_count - 5
                    )));
                }
                Self::ReportSlaveId(SlaveIdReport {
                    product: bytes[2],
                    run_indicator: bytes[3],
                    version: [bytes[4], bytes[5], bytes[6]],
                    extra: bytes[7..2 + byte_count].to_vec(),
                })
            }
            0x14 => {
                need(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                need_exact(&bytes, 2 + byte_count)?;
                let mut groups = Vec::new();
                let mut at = 2;
                while at < 2 + byte_count {
                    need(&bytes, at + 2)?;
                    let sub_len = usize::from(bytes[at]);
                    if sub_len < 1 || sub_len % 2 == 0 {
                        return Err(malformed(format!("file record sub-length {sub_len}")));
                    }
                    if bytes[at + 1] != FILE_RECORD_REF_TYPE {
                        return Err(malformed(format!(
                            "file record reference type {}",
                            bytes[at + 1]
                        )));
                    }
                    need(&bytes, at + 1 + sub_len)?;
                    let words = (sub_len - 1) / 2;
                    groups.push(read_words(&bytes[at + 2..], words as Quantity));
                    at += 1 + sub_len;
                }
                Self::ReadFileRecord(groups)
            }
            0x15 => Self::WriteFileRecord(read_file_records(&bytes)?),
            0x41 => {
                need(&bytes, 3)?;
                let byte_count = usize::from(bytes[2]);
                need_exact(&bytes, 3 + byte_count)?;
                Self::ReadFifo8(bytes[1], bytes[3..3 + byte_count].to_vec())
            }
            0x42 => {
                need_exact(&bytes, 2)?;
                Self::WriteFifo8(bytes[1])
            }
            0x43 => {
                need(&bytes, 2)?;
                let byte_count = usize::from(bytes[1]);
                need_exact(&bytes, 2 + byte_count)?;
                Self::ReadObject(bytes[2..2 + byte_count].to_vec())
            }
            0x44 => {
                need_exact(&bytes, 2)?;
                Self::WriteObject(bytes[1])
            }
            0x45 => {
                need(&bytes, 2)?;
                Self::ReadMemory(bytes[1..].to_vec())
            }
            0x46 => {
                need_exact(&bytes, 2)?;
                Self::WriteMemory(bytes[1])
            }
            0x47 => {
                need(&bytes, 2)?;
                Self::Command(bytes[1], bytes[2..].to_vec())
            }
            _ => return Err(Error::InvalidFunctionCode(fn_code)),
        };
        Ok(rsp)
    }
}

impl TryFrom<Bytes> for ExceptionResponse {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(incomplete(2, bytes.len()));
        }
        let fn_err_code = bytes[0];
        if fn_err_code <= 0x80 {
            return Err(Error::InvalidFunctionCode(fn_err_code));
        }
        Ok(ExceptionResponse {
            function: fn_err_code - 0x80,
            exception: Exception::from(bytes[1]),
        })
    }
}

impl Request {
    /// Decode the buffer a slave answered with into the response paired
    /// with this request, or into an exception response.
    ///
    /// Exception demultiplexing happens first: any buffer whose first byte
    /// has the high bit set is decoded as an [`ExceptionResponse`]. A
    /// normal response must carry this request's function code and satisfy
    /// the request-context checks (bit counts, register counts, record
    /// lengths), and bit vectors are trimmed to the requested quantity.
    pub fn decode_response(&self, bytes: Bytes) -> Result<ResponsePdu> {
        if bytes.is_empty() {
            return Err(incomplete(1, 0));
        }
        if bytes[0] > 0x80 {
            return Ok(ExceptionResponse::try_from(bytes)?.into());
        }
        let fn_code = self.function_code();
        if bytes[0] != fn_code {
            return Err(Error::InvalidFunctionCode(bytes[0]));
        }
        let rsp = Response::try_from(bytes)?;
        let rsp = match (self, rsp) {
            (Self::ReadCoils(_, quantity), Response::ReadCoils(coils)) => {
                Response::ReadCoils(trim_bits(coils, *quantity)?)
            }
            (Self::ReadDiscreteInputs(_, quantity), Response::ReadDiscreteInputs(coils)) => {
                Response::ReadDiscreteInputs(trim_bits(coils, *quantity)?)
            }
            (Self::ReadHoldingRegisters(_, quantity), Response::ReadHoldingRegisters(words)) => {
                Response::ReadHoldingRegisters(check_word_count(words, *quantity)?)
            }
            (Self::ReadInputRegisters(_, quantity), Response::ReadInputRegisters(words)) => {
                Response::ReadInputRegisters(check_word_count(words, *quantity)?)
            }
            (Self::ReadMemory(_, count), Response::ReadMemory(payload)) => {
                if payload.len() != usize::from(*count) {
                    return Err(malformed(format!(
                        "memory response of {} bytes, requested {count}",
                        payload.len()
                    )));
                }
                Response::ReadMemory(payload)
            }
            (Self::ReadFifo8(_, max_count), Response::ReadFifo8(status, payload)) => {
                if payload.len() > usize::from(*max_count) {
                    return Err(malformed(format!(
                        "fifo response of {} bytes, requested at most {max_count}",
                        payload.len()
                    )));
                }
                Response::ReadFifo8(status, payload)
            }
            (Self::ReadFileRecord(ranges), Response::ReadFileRecord(groups)) => {
                if groups.len() != ranges.len() {
                    return Err(malformed(format!(
                        "{} file record group(s), requested {}",
                        groups.len(),
                        ranges.len()
                    )));
                }
                for (group, range) in groups.iter().zip(ranges) {
                    if group.len() != usize::from(range.length) {
                        return Err(malformed(format!(
                            "file record group of {} word(s), requested {}",
                            group.len(),
                            range.length
                        )));
                    }
                }
                Response::ReadFileRecord(groups)
            }
            (_, rsp) => rsp,
        };
        Ok(rsp.into())
    }
}

const FILE_RECORD_REF_TYPE: u8 = 6;

fn need(bytes: &Bytes, len: usize) -> Result<()> {
    if bytes.len() < len {
        return Err(incomplete(len, bytes.len()));
    }
    Ok(())
}

fn need_exact(bytes: &Bytes, len: usize) -> Result<()> {
    need(bytes, len)?;
    if bytes.len() > len {
        return Err(malformed(format!(
            "{} trailing byte(s) after a {len} byte PDU",
            bytes.len() - len
        )));
    }
    Ok(())
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn coil_to_bool(coil: u16) -> Result<bool> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(malformed(format!("invalid coil value 0x{coil:04X}"))),
    }
}

fn packed_bits_len(bitcount: usize) -> usize {
    (bitcount + 7) / 8
}

fn pack_bits(bits: &[Coil]) -> Vec<u8> {
    let mut res = vec![0; packed_bits_len(bits.len())];
    for (i, b) in bits.iter().enumerate() {
        let v = u8::from(*b);
        res[i / 8] |= v << (i % 8);
    }
    res
}

fn unpack_bits(bytes: &[u8], count: Quantity) -> Vec<Coil> {
    let mut res = Vec::with_capacity(usize::from(count));
    for i in 0..usize::from(count) {
        res.push((bytes[i / 8] >> (i % 8)) & 0b1 > 0);
    }
    res
}

fn trim_bits(mut bits: Vec<Coil>, quantity: Quantity) -> Result<Vec<Coil>> {
    let quantity = usize::from(quantity);
    if packed_bits_len(bits.len()) != packed_bits_len(quantity) || bits.len() < quantity {
        return Err(malformed(format!(
            "{} bit response byte(s), requested {quantity} bit(s)",
            packed_bits_len(bits.len())
        )));
    }
    bits.truncate(quantity);
    Ok(bits)
}

fn check_word_count(words: Vec<Word>, quantity: Quantity) -> Result<Vec<Word>> {
    if words.len() != usize::from(quantity) {
        return Err(malformed(format!(
            "{} register(s) in response, requested {quantity}",
            words.len()
        )));
    }
    Ok(words)
}

fn read_words(bytes: &[u8], count: Quantity) -> Vec<Word> {
    let mut words = Vec::with_capacity(usize::from(count));
    for i in 0..usize::from(count) {
        words.push(BigEndian::read_u16(&bytes[2 * i..2 * i + 2]));
    }
    words
}

/// Shared 0x15 layout: requests and responses are byte-identical.
fn read_file_records(bytes: &Bytes) -> Result<Vec<FileRecord>> {
    need(bytes, 2)?;
    let byte_count = usize::from(bytes[1]);
    need_exact(bytes, 2 + byte_count)?;
    let mut records = Vec::new();
    let mut at = 2;
    while at < 2 + byte_count {
        need(bytes, at + 7)?;
        if bytes[at] != FILE_RECORD_REF_TYPE {
            return Err(malformed(format!(
                "file record reference type {}",
                bytes[at]
            )));
        }
        let file = BigEndian::read_u16(&bytes[at + 1..at + 3]);
        let record = BigEndian::read_u16(&bytes[at + 3..at + 5]);
        let length = usize::from(BigEndian::read_u16(&bytes[at + 5..at + 7]));
        need(bytes, at + 7 + 2 * length)?;
        records.push(FileRecord {
            file,
            record,
            data: read_words(&bytes[at + 7..], length as Quantity),
        });
        at += 7 + 2 * length;
    }
    Ok(records)
}

fn request_byte_count(req: &Request) -> usize {
    match req {
        Request::ReadCoils(_, _)
        | Request::ReadDiscreteInputs(_, _)
        | Request::ReadHoldingRegisters(_, _)
        | Request::ReadInputRegisters(_, _)
        | Request::WriteSingleCoil(_, _)
        | Request::WriteSingleRegister(_, _)
        | Request::ReadDiagnostics(_, _) => 5,
        Request::WriteMultipleCoils(_, coils) => 6 + packed_bits_len(coils.len()),
        Request::WriteMultipleRegisters(_, words) => 6 + 2 * words.len(),
        Request::ReportSlaveId => 1,
        Request::ReadFileRecord(ranges) => 2 + 7 * ranges.len(),
        Request::WriteFileRecord(records) => {
            2 + records.iter().map(|r| 7 + 2 * r.data.len()).sum::<usize>()
        }
        Request::ReadFifo8(_, _) => 3,
        Request::WriteFifo8(_, payload) => 3 + payload.len(),
        Request::ReadObject(_) => 2,
        Request::WriteObject(_, payload) => 3 + payload.len(),
        Request::ReadMemory(_, _) => 4,
        Request::WriteMemory(_, payload) => 3 + payload.len(),
        Request::Command(_, payload) => 2 + payload.len(),
    }
}

fn response_byte_count(rsp: &Response) -> usize {
    match rsp {
        Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils) => {
            2 + packed_bits_len(coils.len())
        }
        Response::ReadHoldingRegisters(words) | Response::ReadInputRegisters(words) => {
            2 + 2 * words.len()
        }
        Response::WriteSingleCoil(_, _)
        | Response::WriteSingleRegister(_, _)
        | Response::ReadDiagnostics(_, _)
        | Response::WriteMultipleCoils(_, _)
        | Response::WriteMultipleRegisters(_, _) => 5,
        Response::ReportSlaveId(report) => 7 + report.extra.len(),
        Response::ReadFileRecord(groups) => {
            2 + groups.iter().map(|g| 2 + 2 * g.len()).sum::<usize>()
        }
        Response::WriteFileRecord(records) => {
            2 + records.iter().map(|r| 7 + 2 * r.data.len()).sum::<usize>()
        }
        Response::ReadFifo8(_, payload) => 3 + payload.len(),
        Response::WriteFifo8(_) | Response::WriteObject(_) | Response::WriteMemory(_) => 2,
        Response::ReadObject(payload) => 2 + payload.len(),
        Response::ReadMemory(payload) => 1 + payload.len(),
        Response::Command(_, payload) => 2 + payload.len(),
    }
}
