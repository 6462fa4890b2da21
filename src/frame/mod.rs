// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request and response message types

pub(crate) mod tcp;

pub(crate) mod tunnel;

use std::{error, fmt};

use crate::error::{Error, Result};

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub(crate) type FunctionCode = u8;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing, while the *coil address*
/// or *register address* is often specified with 1-based indexing. Consult
/// the documentation of your devices if 1-based addresses need to be
/// converted to 0-based protocol addresses by subtracting 1.
pub type Address = u16;

/// A Coil represents a single bit.
///
/// - `true` is equivalent to `ON`, `1` and `0xFF00`.
/// - `false` is equivalent to `OFF`, `0` and `0x0000`.
pub type Coil = bool;

/// Modbus uses 16 bit for its data items (big-endian representation).
pub type Word = u16;

/// Number of items to process.
pub type Quantity = u16;

/// Vendor function code used by the tunnel transport for bidirectional
/// polling.
pub(crate) const SLAVE_COMMAND: FunctionCode = 0x47;

/// Largest quantity of coils/discrete inputs in a single read.
pub(crate) const MAX_READ_BITS: Quantity = 2000;
/// Largest quantity of registers in a single read.
pub(crate) const MAX_READ_WORDS: Quantity = 125;
/// Largest quantity of coils in a single write.
pub(crate) const MAX_WRITE_BITS: Quantity = 1968;
/// Largest quantity of registers in a single write.
pub(crate) const MAX_WRITE_WORDS: Quantity = 123;
/// Largest payload of the vendor fifo/object/memory/command operations.
pub(crate) const MAX_DATA_BYTES: usize = 250;
/// Largest record length of a file record sub-request, in words.
pub(crate) const MAX_RECORD_WORDS: Quantity = 124;
/// Largest number of additional bytes in a Report Slave ID response.
pub(crate) const MAX_SLAVE_ID_EXTRA: usize = 243;

/// One range of a Read File Record request (reference type 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecordRange {
    /// File number.
    pub file: u16,
    /// Starting record number within the file.
    pub record: u16,
    /// Record length in words.
    pub length: Quantity,
}

/// One record of a Write File Record request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// File number.
    pub file: u16,
    /// Starting record number within the file.
    pub record: u16,
    /// Record data.
    pub data: Vec<Word>,
}

/// The payload of a Report Slave ID (0x11) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveIdReport {
    /// Product identifier.
    pub product: u8,
    /// Run indicator status byte (`0xFF` = running).
    pub run_indicator: u8,
    /// Firmware version triple.
    pub version: [u8; 3],
    /// Additional device-specific bytes (0-243).
    pub extra: Vec<u8>,
}

impl SlaveIdReport {
    /// Whether the run indicator reports the device as running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.run_indicator == 0xFF
    }
}

/// A request message from the master to a slave device.
///
/// Use the checked constructors to build requests from semantic values;
/// they enforce the per-function quantity and payload ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    ReadInputRegisters(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    ReadDiagnostics(Word, Word),
    WriteMultipleCoils(Address, Vec<Coil>),
    WriteMultipleRegisters(Address, Vec<Word>),
    ReportSlaveId,
    ReadFileRecord(Vec<FileRecordRange>),
    WriteFileRecord(Vec<FileRecord>),
    ReadFifo8(u8, u8),
    WriteFifo8(u8, Vec<u8>),
    ReadObject(u8),
    WriteObject(u8, Vec<u8>),
    ReadMemory(Address, u8),
    WriteMemory(Address, Vec<u8>),
    Command(u8, Vec<u8>),
}

/// The data of a successful request.
///
/// ReadCoils/ReadDiscreteInputs: when decoded without request context the
/// length of the result is a multiple of 8; only the first bits that have
/// actually been requested are defined and the remainder should be ignored.
/// [`Request::decode_response`] trims the result to the requested quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    ReadHoldingRegisters(Vec<Word>),
    ReadInputRegisters(Vec<Word>),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    ReadDiagnostics(Word, Word),
    WriteMultipleCoils(Address, Quantity),
    WriteMultipleRegisters(Address, Quantity),
    ReportSlaveId(SlaveIdReport),
    ReadFileRecord(Vec<Vec<Word>>),
    WriteFileRecord(Vec<FileRecord>),
    ReadFifo8(u8, Vec<u8>),
    WriteFifo8(u8),
    ReadObject(Vec<u8>),
    WriteObject(u8),
    ReadMemory(Vec<u8>),
    WriteMemory(u8),
    Command(u8, Vec<u8>),
}

fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(Error::InvalidOptions(msg.into()))
}

impl Request {
    /// Read `quantity` coils starting at `address` (0x01).
    pub fn read_coils(address: Address, quantity: Quantity) -> Result<Self> {
        if !(1..=MAX_READ_BITS).contains(&quantity) {
            return invalid(format!("read coils quantity {quantity} not in 1..=2000"));
        }
        Ok(Self::ReadCoils(address, quantity))
    }

    /// Read `quantity` discrete inputs starting at `address` (0x02).
    pub fn read_discrete_inputs(address: Address, quantity: Quantity) -> Result<Self> {
        if !(1..=MAX_READ_BITS).contains(&quantity) {
            return invalid(format!(
                "read discrete inputs quantity {quantity} not in 1..=2000"
            ));
        }
        Ok(Self::ReadDiscreteInputs(address, quantity))
    }

    /// Read `quantity` holding registers starting at `address` (0x03).
    pub fn read_holding_registers(address: Address, quantity: Quantity) -> Result<Self> {
        if !(1..=MAX_READ_WORDS).contains(&quantity) {
            return invalid(format!(
                "read holding registers quantity {quantity} not in 1..=125"
            ));
        }
        Ok(Self::ReadHoldingRegisters(address, quantity))
    }

    /// Read `quantity` input registers starting at `address` (0x04).
    pub fn read_input_registers(address: Address, quantity: Quantity) -> Result<Self> {
        if !(1..=MAX_READ_WORDS).contains(&quantity) {
            return invalid(format!(
                "read input registers quantity {quantity} not in 1..=125"
            ));
        }
        Ok(Self::ReadInputRegisters(address, quantity))
    }

    /// Set a single coil at `address` (0x05).
    pub fn write_single_coil(address: Address, value: Coil) -> Result<Self> {
        Ok(Self::WriteSingleCoil(address, value))
    }

    /// Write a single holding register at `address` (0x06).
    pub fn write_single_register(address: Address, value: Word) -> Result<Self> {
        Ok(Self::WriteSingleRegister(address, value))
    }

    /// Issue a diagnostics sub-function (0x08).
    pub fn read_diagnostics(sub_function: Word, data: Word) -> Result<Self> {
        Ok(Self::ReadDiagnostics(sub_function, data))
    }

    /// Write a run of coils starting at `address` (0x0F).
    pub fn write_multiple_coils(address: Address, values: Vec<Coil>) -> Result<Self> {
        let quantity = values.len();
        if !(1..=MAX_WRITE_BITS as usize).contains(&quantity) {
            return invalid(format!(
                "write multiple coils quantity {quantity} not in 1..=1968"
            ));
        }
        Ok(Self::WriteMultipleCoils(address, values))
    }

    /// Write a run of holding registers starting at `address` (0x10).
    pub fn write_multiple_registers(address: Address, values: Vec<Word>) -> Result<Self> {
        let quantity = values.len();
        if !(1..=MAX_WRITE_WORDS as usize).contains(&quantity) {
            return invalid(format!(
                "write multiple registers quantity {quantity} not in 1..=123"
            ));
        }
        Ok(Self::WriteMultipleRegisters(address, values))
    }

    /// Query the slave identification (0x11).
    pub fn report_slave_id() -> Self {
        Self::ReportSlaveId
    }

    /// Read one or more file record ranges (0x14).
    pub fn read_file_record(ranges: Vec<FileRecordRange>) -> Result<Self> {
        if ranges.is_empty() {
            return invalid("read file record needs at least one range");
        }
        if ranges.len() > 35 {
            return invalid(format!("read file record: {} ranges > 35", ranges.len()));
        }
        for range in &ranges {
            if !(1..=MAX_RECORD_WORDS).contains(&range.length) {
                return invalid(format!(
                    "file record length {} not in 1..=124",
                    range.length
                ));
            }
        }
        Ok(Self::ReadFileRecord(ranges))
    }

    /// Write one or more file records (0x15).
    pub fn write_file_record(records: Vec<FileRecord>) -> Result<Self> {
        if records.is_empty() {
            return invalid("write file record needs at least one record");
        }
        let mut total = 1usize;
        for record in &records {
            let words = record.data.len();
            if !(1..=MAX_RECORD_WORDS as usize).contains(&words) {
                return invalid(format!("file record data {words} words not in 1..=124"));
            }
            total += 7 + 2 * words;
        }
        if total > 252 {
            return invalid(format!("write file record request of {total} bytes > 252"));
        }
        Ok(Self::WriteFileRecord(records))
    }

    /// Read up to `max_count` bytes from 8-bit fifo `id` (0x41).
    pub fn read_fifo8(id: u8, max_count: u8) -> Result<Self> {
        if !(1..=MAX_DATA_BYTES).contains(&(max_count as usize)) {
            return invalid(format!("read fifo8 count {max_count} not in 1..=250"));
        }
        Ok(Self::ReadFifo8(id, max_count))
    }

    /// Write `data` into 8-bit fifo `id` (0x42).
    pub fn write_fifo8(id: u8, data: Vec<u8>) -> Result<Self> {
        if !(1..=MAX_DATA_BYTES).contains(&data.len()) {
            return invalid(format!("write fifo8 data {} bytes not in 1..=250", data.len()));
        }
        Ok(Self::WriteFifo8(id, data))
    }

    /// Read vendor object `id` (0x43).
    pub fn read_object(id: u8) -> Self {
        Self::ReadObject(id)
    }

    /// Write vendor object `id` (0x44).
    pub fn write_object(id: u8, data: Vec<u8>) -> Result<Self> {
        if !(1..=MAX_DATA_BYTES).contains(&data.len()) {
            return invalid(format!(
                "write object data {} bytes not in 1..=250",
                data.len()
            ));
        }
        Ok(Self::WriteObject(id, data))
    }

    /// Read `count` bytes of raw memory starting at `address` (0x45).
    pub fn read_memory(address: Address, count: u8) -> Result<Self> {
        if !(1..=MAX_DATA_BYTES).contains(&(count as usize)) {
            return invalid(format!("read memory count {count} not in 1..=250"));
        }
        Ok(Self::ReadMemory(address, count))
    }

    /// Write raw memory starting at `address` (0x46).
    pub fn write_memory(address: Address, data: Vec<u8>) -> Result<Self> {
        if !(1..=MAX_DATA_BYTES).contains(&data.len()) {
            return invalid(format!(
                "write memory data {} bytes not in 1..=250",
                data.len()
            ));
        }
        Ok(Self::WriteMemory(address, data))
    }

    /// Issue vendor command `id` (0x47).
    pub fn command(id: u8, data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_DATA_BYTES {
            return invalid(format!("command data {} bytes > 250", data.len()));
        }
        Ok(Self::Command(id, data))
    }

    /// The function code of this request.
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        match *self {
            Self::ReadCoils(_, _) => 0x01,
            Self::ReadDiscreteInputs(_, _) => 0x02,
            Self::ReadHoldingRegisters(_, _) => 0x03,
            Self::ReadInputRegisters(_, _) => 0x04,
            Self::WriteSingleCoil(_, _) => 0x05,
            Self::WriteSingleRegister(_, _) => 0x06,
            Self::ReadDiagnostics(_, _) => 0x08,
            Self::WriteMultipleCoils(_, _) => 0x0F,
            Self::WriteMultipleRegisters(_, _) => 0x10,
            Self::ReportSlaveId => 0x11,
            Self::ReadFileRecord(_) => 0x14,
            Self::WriteFileRecord(_) => 0x15,
            Self::ReadFifo8(_, _) => 0x41,
            Self::WriteFifo8(_, _) => 0x42,
            Self::ReadObject(_) => 0x43,
            Self::WriteObject(_, _) => 0x44,
            Self::ReadMemory(_, _) => 0x45,
            Self::WriteMemory(_, _) => 0x46,
            Self::Command(_, _) => SLAVE_COMMAND,
        }
    }
}

impl Response {
    /// The function code of this response.
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        match *self {
            Self::ReadCoils(_) => 0x01,
            Self::ReadDiscreteInputs(_) => 0x02,
            Self::ReadHoldingRegisters(_) => 0x03,
            Self::ReadInputRegisters(_) => 0x04,
            Self::WriteSingleCoil(_, _) => 0x05,
            Self::WriteSingleRegister(_, _) => 0x06,
            Self::ReadDiagnostics(_, _) => 0x08,
            Self::WriteMultipleCoils(_, _) => 0x0F,
            Self::WriteMultipleRegisters(_, _) => 0x10,
            Self::ReportSlaveId(_) => 0x11,
            Self::ReadFileRecord(_) => 0x14,
            Self::WriteFileRecord(_) => 0x15,
            Self::ReadFifo8(_, _) => 0x41,
            Self::WriteFifo8(_) => 0x42,
            Self::ReadObject(_) => 0x43,
            Self::WriteObject(_) => 0x44,
            Self::ReadMemory(_) => 0x45,
            Self::WriteMemory(_) => 0x46,
            Self::Command(_, _) => SLAVE_COMMAND,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadCoils(address, quantity) => {
                write!(f, "read {quantity} coils from 0x{address:04X}")
            }
            Self::ReadDiscreteInputs(address, quantity) => {
                write!(f, "read {quantity} discrete inputs from 0x{address:04X}")
            }
            Self::ReadHoldingRegisters(address, quantity) => {
                write!(f, "read {quantity} holding registers from 0x{address:04X}")
            }
            Self::ReadInputRegisters(address, quantity) => {
                write!(f, "read {quantity} input registers from 0x{address:04X}")
            }
            Self::WriteSingleCoil(address, value) => {
                write!(f, "write coil 0x{address:04X} = {value}")
            }
            Self::WriteSingleRegister(address, value) => {
                write!(f, "write register 0x{address:04X} = {value}")
            }
            Self::ReadDiagnostics(sub, data) => {
                write!(f, "diagnostics sub-function 0x{sub:04X} data 0x{data:04X}")
            }
            Self::WriteMultipleCoils(address, values) => {
                write!(f, "write {} coils from 0x{address:04X}", values.len())
            }
            Self::WriteMultipleRegisters(address, values) => {
                write!(f, "write {} registers from 0x{address:04X}", values.len())
            }
            Self::ReportSlaveId => write!(f, "report slave id"),
            Self::ReadFileRecord(ranges) => {
                write!(f, "read {} file record range(s)", ranges.len())
            }
            Self::WriteFileRecord(records) => {
                write!(f, "write {} file record(s)", records.len())
            }
            Self::ReadFifo8(id, max) => write!(f, "read up to {max} bytes from fifo {id}"),
            Self::WriteFifo8(id, data) => {
                write!(f, "write {} bytes to fifo {id}", data.len())
            }
            Self::ReadObject(id) => write!(f, "read object {id}"),
            Self::WriteObject(id, data) => {
                write!(f, "write {} bytes to object {id}", data.len())
            }
            Self::ReadMemory(address, count) => {
                write!(f, "read {count} bytes of memory from 0x{address:04X}")
            }
            Self::WriteMemory(address, data) => {
                write!(
                    f,
                    "write {} bytes of memory from 0x{address:04X}",
                    data.len()
                )
            }
            Self::Command(id, data) => {
                write!(f, "command {id} with {} data byte(s)", data.len())
            }
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadCoils(values) | Self::ReadDiscreteInputs(values) => {
                write!(f, "{} bit(s)", values.len())
            }
            Self::ReadHoldingRegisters(values) | Self::ReadInputRegisters(values) => {
                write!(f, "{} register(s)", values.len())
            }
            Self::WriteSingleCoil(address, value) => {
                write!(f, "coil 0x{address:04X} = {value}")
            }
            Self::WriteSingleRegister(address, value) => {
                write!(f, "register 0x{address:04X} = {value}")
            }
            Self::ReadDiagnostics(sub, data) => {
                write!(f, "diagnostics 0x{sub:04X} data 0x{data:04X}")
            }
            Self::WriteMultipleCoils(address, quantity) => {
                write!(f, "wrote {quantity} coils from 0x{address:04X}")
            }
            Self::WriteMultipleRegisters(address, quantity) => {
                write!(f, "wrote {quantity} registers from 0x{address:04X}")
            }
            Self::ReportSlaveId(report) => {
                write!(
                    f,
                    "product {} version {}.{}.{} ({})",
                    report.product,
                    report.version[0],
                    report.version[1],
                    report.version[2],
                    if report.is_running() { "running" } else { "stopped" }
                )
            }
            Self::ReadFileRecord(groups) => write!(f, "{} file record group(s)", groups.len()),
            Self::WriteFileRecord(records) => write!(f, "wrote {} file record(s)", records.len()),
            Self::ReadFifo8(status, data) => {
                write!(f, "fifo status {status}, {} byte(s)", data.len())
            }
            Self::WriteFifo8(count) => write!(f, "fifo accepted {count} byte(s)"),
            Self::ReadObject(data) => write!(f, "object of {} byte(s)", data.len()),
            Self::WriteObject(status) => write!(f, "object write status {status}"),
            Self::ReadMemory(data) => write!(f, "{} memory byte(s)", data.len()),
            Self::WriteMemory(status) => write!(f, "memory write status {status}"),
            Self::Command(id, data) => {
                write!(f, "command {id} returned {} byte(s)", data.len())
            }
        }
    }
}

/// A slave exception code.
///
/// The conversion from the wire byte is total so that any exception
/// response can be decoded; codes without a standard meaning are kept in
/// [`Exception::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    NegativeAcknowledge,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetDevice,
    Other(u8),
}

impl Exception {
    /// The 1-byte code carried on the wire.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Acknowledge => 0x05,
            Self::ServerDeviceBusy => 0x06,
            Self::NegativeAcknowledge => 0x07,
            Self::MemoryParityError => 0x08,
            Self::GatewayPathUnavailable => 0x0A,
            Self::GatewayTargetDevice => 0x0B,
            Self::Other(code) => code,
        }
    }

    pub(crate) fn description(&self) -> String {
        match self {
            Self::IllegalFunction => "Illegal function".into(),
            Self::IllegalDataAddress => "Illegal data address".into(),
            Self::IllegalDataValue => "Illegal data value".into(),
            Self::ServerDeviceFailure => "Server device failure".into(),
            Self::Acknowledge => "Acknowledge".into(),
            Self::ServerDeviceBusy => "Server device busy".into(),
            Self::NegativeAcknowledge => "Negative acknowledge".into(),
            Self::MemoryParityError => "Memory parity error".into(),
            Self::GatewayPathUnavailable => "Gateway path unavailable".into(),
            Self::GatewayTargetDevice => "Gateway target device failed to respond".into(),
            Self::Other(code) => format!("Exception code {code}"),
        }
    }
}

impl From<u8> for Exception {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::ServerDeviceBusy,
            0x07 => Self::NegativeAcknowledge,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetDevice,
            code => Self::Other(code),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for Exception {}

/// A slave exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    /// Function code of the rejected request (high bit cleared).
    pub function: FunctionCode,
    /// The exception reported by the slave.
    pub exception: Exception,
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

/// Represents a message from a slave device to the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePdu(pub std::result::Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        ResponsePdu(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        ResponsePdu(Err(from))
    }
}

impl From<ResponsePdu> for std::result::Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

impl ResponsePdu {
    /// Flatten into the crate error type.
    pub fn into_result(self) -> Result<Response> {
        self.0.map_err(Error::Exception)
    }
}
