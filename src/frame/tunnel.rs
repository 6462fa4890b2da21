// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Frame types of the tunneled (piggyback polling) dialect.

use bytes::Bytes;

use crate::unit::UnitId;

/// A poll frame sent by the external bus master to our slave id.
///
/// Wire layout after RTU deframing: `[SLAVE_COMMAND] [sequence] [payload..]`
/// where a non-empty payload carries the response PDU of the previously
/// forwarded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Poll {
    pub(crate) sequence: u8,
    pub(crate) payload: Bytes,
}

/// Classification of a well- or ill-framed chunk observed on the bus.
///
/// Every frame boundary detected by the tunnel transport is surfaced on the
/// sniffer channel for passive monitoring, including traffic addressed to
/// other units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SniffEvent {
    /// A CRC-valid frame; `unit` is the addressed device, `pdu` the verified
    /// payload.
    Pdu {
        /// Addressed unit.
        unit: UnitId,
        /// Function code and payload.
        pdu: Bytes,
    },
    /// Fewer bytes than the minimal frame between two idle gaps.
    Incomplete(Bytes),
    /// A frame whose CRC-16 trailer did not match.
    BadChecksum(Bytes),
}
