//! Regulatory region enumeration and its wire-code mapping.

use crate::error::{Error, Result};

/// Regulatory region, controlling frequency hop table, power and LBT
/// behavior on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Device hasn't been configured with a region yet.
    Unspec,
    /// North America.
    Na,
    /// Europe (ETSI EN 302 208 v1).
    Eu,
    /// Europe (ETSI EN 302 208 v2).
    Eu2,
    /// Europe (ETSI EN 302 208 v3).
    Eu3,
    /// South Korea.
    Kr,
    /// South Korea (revised).
    Kr2,
    /// India.
    In,
    /// Japan.
    Jp,
    /// People's Republic of China.
    Prc,
    /// People's Republic of China (revised).
    Prc2,
    /// Australia.
    Au,
    /// New Zealand.
    Nz,
    /// Open/unrestricted region, for lab use.
    Open,
    /// Manufacturing/test region.
    Manufacturing,
}

impl Region {
    /// Map to the device's wire code.
    pub fn to_code(self) -> u8 {
        match self {
            Region::Unspec => 0,
            Region::Na => 1,
            Region::Eu => 2,
            Region::Kr => 3,
            Region::In => 4,
            Region::Jp => 5,
            Region::Prc => 6,
            Region::Eu2 => 7,
            Region::Eu3 => 8,
            Region::Kr2 => 9,
            Region::Prc2 => 10,
            Region::Au => 11,
            Region::Nz => 12,
            Region::Open => 255,
            // Not on the documented wire table; reserved locally.
            Region::Manufacturing => 254,
        }
    }

    /// Map from a device wire code.
    pub fn from_code(code: u8) -> Result<Region> {
        Ok(match code {
            0 => Region::Unspec,
            1 => Region::Na,
            2 => Region::Eu,
            3 => Region::Kr,
            4 => Region::In,
            5 => Region::Jp,
            6 => Region::Prc,
            7 => Region::Eu2,
            8 => Region::Eu3,
            9 => Region::Kr2,
            10 => Region::Prc2,
            11 => Region::Au,
            12 => Region::Nz,
            254 => Region::Manufacturing,
            255 => Region::Open,
            other => return Err(Error::ParseFault(format!("unknown region code {other}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_region() {
        let all = [
            Region::Unspec,
            Region::Na,
            Region::Eu,
            Region::Eu2,
            Region::Eu3,
            Region::Kr,
            Region::Kr2,
            Region::In,
            Region::Jp,
            Region::Prc,
            Region::Prc2,
            Region::Au,
            Region::Nz,
            Region::Open,
            Region::Manufacturing,
        ];
        for r in all {
            assert_eq!(Region::from_code(r.to_code()).unwrap(), r);
        }
    }

    #[test]
    fn na_is_one() {
        assert_eq!(Region::Na.to_code(), 1);
    }

    #[test]
    fn unknown_code_errors() {
        assert!(Region::from_code(200).is_err());
    }
}
