// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::unit::UnitId;

pub(crate) type TransactionId = u16;

/// The MBAP header of a Modbus TCP frame.
///
/// The protocol identifier (always zero) and the length field are consumed
/// and produced by the codec and not stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) transaction_id: TransactionId,
    pub(crate) unit_id: UnitId,
}
