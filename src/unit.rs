// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Addressing of request targets

use std::fmt;

use crate::error::{Error, Result};

/// The raw address byte carried by every framed request.
pub type UnitId = u8;

/// A validated request target.
///
/// Modbus reserves the address byte values above 247, so constructing a
/// `Unit` rejects them; a transaction can only ever carry a target that is
/// legal on a bus. Address 0 is the all-stations broadcast. Broadcast
/// requests are one-way and no reply will arrive for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unit(UnitId);

impl Unit {
    /// The all-stations address.
    pub const BROADCAST: Self = Unit(0);

    /// Highest address a single device may be assigned.
    pub const MAX_DEVICE: UnitId = 247;

    /// A target selecting one specific device (address 1-247).
    pub fn device(id: UnitId) -> Result<Self> {
        if id == 0 {
            return Err(Error::InvalidOptions(
                "unit id 0 is the broadcast address".into(),
            ));
        }
        Self::target(id)
    }

    /// Anything a request may be sent to: a device address or broadcast.
    pub fn target(id: UnitId) -> Result<Self> {
        if id > Self::MAX_DEVICE {
            return Err(Error::InvalidOptions(format!(
                "unit id {id} falls into the reserved range 248-255"
            )));
        }
        Ok(Self(id))
    }

    /// Whether this target addresses every device on the bus at once.
    #[must_use]
    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    /// The address byte that goes on the wire.
    #[must_use]
    pub fn id(self) -> UnitId {
        self.0
    }
}

impl From<Unit> for UnitId {
    fn from(unit: Unit) -> Self {
        unit.0
    }
}

impl TryFrom<UnitId> for Unit {
    type Error = Error;

    fn try_from(id: UnitId) -> Result<Self> {
        Self::target(id)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            f.write_str("broadcast")
        } else {
            write!(f, "unit {}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_and_devices_are_valid_targets() {
        assert!(Unit::target(0).unwrap().is_broadcast());
        assert_eq!(Unit::target(1).unwrap().id(), 1);
        assert_eq!(Unit::target(Unit::MAX_DEVICE).unwrap().id(), 247);
    }

    #[test]
    fn reserved_range_is_rejected() {
        for id in 248..=255 {
            assert!(Unit::target(id).is_err());
            assert!(Unit::device(id).is_err());
            assert!(Unit::try_from(id).is_err());
        }
    }

    #[test]
    fn broadcast_is_not_a_device() {
        assert!(Unit::device(0).is_err());
        assert!(Unit::device(1).is_ok());
    }

    #[test]
    fn display_distinguishes_broadcast() {
        assert_eq!(Unit::BROADCAST.to_string(), "broadcast");
        assert_eq!(Unit::target(32).unwrap().to_string(), "unit 32");
    }
}
