// Copyright (C) 2023 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

//! The device self-description fetched after a hard reset: ATR for
//! Dialect-A, CIP for Dialect-B. Both arrive as the INF field of an
//! S-response; the frame codec (§4.3) hands that slice up unparsed, and
//! parsing its fixed, nested layout is this module's job alone.
//!
//! [`Atr::parse`] follows Dialect-A's actual field layout: a protocol
//! version byte, a 5-byte vendor ID, a length-prefixed data-link-layer
//! parameters block (`bwt`, `ifsc`), a platform ID byte, a length-prefixed
//! platform parameters block (`mcf`, `config`, `mpot`, three reserved
//! bytes, `segt`, `wut`), and finally a length-prefixed historical-bytes
//! block - not a generic repeating `tag, len, value` scan. [`Cip::parse`]
//! is Dialect-B's analogous self-description; only its leading
//! version/vendor-id/`bwt`/`ifsc` prefix is shared with the real GP1.0
//! layout with any confidence (see DESIGN.md), so it stops there and
//! leaves everything past it as opaque `vendor_data`.

const DEFAULT_IFSC: u16 = 254;
const DEFAULT_SEGT_US: u16 = 10;

/// Answer-To-Reset, as returned by Dialect-A's `ATR_RSP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Atr<'a> {
    /// Protocol version; only `1` is defined.
    pub protocol_version: u8,
    pub vendor_id: &'a [u8; 5],
    /// Block waiting time, milliseconds.
    pub bwt_ms: u16,
    /// Maximum Information Field Size of the secure element.
    pub ifsc: u16,
    pub platform_id: u8,
    /// Maximum I2C clock frequency, kHz.
    pub mcf: u16,
    pub config: u8,
    /// Minimum polling time, milliseconds.
    pub mpot: u8,
    /// Secure element guard time, microseconds.
    pub segt_us: u16,
    /// Wake-up time, microseconds.
    pub wut_us: u16,
    pub historical_bytes: &'a [u8],
}

impl<'a> Default for Atr<'a> {
    fn default() -> Self {
        Atr {
            protocol_version: 1,
            vendor_id: &[0xFF; 5],
            bwt_ms: 0,
            ifsc: DEFAULT_IFSC,
            platform_id: 0,
            mcf: 0,
            config: 0,
            mpot: 1,
            segt_us: DEFAULT_SEGT_US,
            wut_us: 0,
            historical_bytes: &[],
        }
    }
}

/// Card Information Profile, as returned by Dialect-B's `CIP_RSP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cip<'a> {
    pub protocol_version: u8,
    pub vendor_id: &'a [u8; 5],
    pub bwt_ms: u16,
    pub ifsc: u16,
    pub vendor_data: &'a [u8],
}

impl<'a> Default for Cip<'a> {
    fn default() -> Self {
        Cip {
            protocol_version: 1,
            vendor_id: &[0xFF; 5],
            bwt_ms: 0,
            ifsc: DEFAULT_IFSC,
            vendor_data: &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtrError;

impl<'a> Atr<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Atr<'a>, AtrError> {
        debug!("Parsing ATR: {:02x?}", data);
        if data.len() < 7 {
            error!("ATR too short for header");
            return Err(AtrError);
        }
        let protocol_version = data[0];
        let vendor_id: &[u8; 5] = (&data[1..][..5]).try_into().unwrap();
        let dllp_len = data[6];

        let rem = &data[7..];
        if rem.len() < dllp_len as usize || dllp_len < 4 {
            error!("ATR data-link-layer parameters block malformed");
            return Err(AtrError);
        }
        let (dllp, rem) = rem.split_at(dllp_len as usize);
        let [bwt1, bwt2, ifsc1, ifsc2, ..] = dllp else {
            error!("ATR data-link-layer parameters block too short");
            return Err(AtrError);
        };
        let bwt_ms = u16::from_be_bytes([*bwt1, *bwt2]);
        let ifsc = u16::from_be_bytes([*ifsc1, *ifsc2]);

        if rem.len() < 2 {
            error!("ATR missing platform ID / platform parameters length");
            return Err(AtrError);
        }
        let platform_id = rem[0];
        let plp_len = rem[1];
        let rem = &rem[2..];
        if rem.len() < plp_len as usize {
            error!("ATR platform parameters block malformed");
            return Err(AtrError);
        }
        let (plp, rem) = rem.split_at(plp_len as usize);
        let [mcf1, mcf2, config, mpot, _rfu1, _rfu2, _rfu3, segt1, segt2, wut1, wut2, ..] = plp
        else {
            error!("ATR platform parameters block too short");
            return Err(AtrError);
        };
        let mcf = u16::from_be_bytes([*mcf1, *mcf2]);
        let segt_us = u16::from_be_bytes([*segt1, *segt2]);
        let wut_us = u16::from_be_bytes([*wut1, *wut2]);

        if rem.is_empty() {
            error!("ATR missing historical bytes length");
            return Err(AtrError);
        }
        let hb_len = rem[0];
        let rem = &rem[1..];
        if rem.len() < hb_len as usize {
            error!("ATR historical bytes block truncated");
            return Err(AtrError);
        }
        let historical_bytes = &rem[..hb_len as usize];

        Ok(Atr {
            protocol_version,
            vendor_id,
            bwt_ms,
            ifsc,
            platform_id,
            mcf,
            config: *config,
            mpot: *mpot,
            segt_us,
            wut_us,
            historical_bytes,
        })
    }
}

impl<'a> Cip<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Cip<'a>, AtrError> {
        debug!("Parsing CIP: {:02x?}", data);
        if data.len() < 7 {
            error!("CIP too short for header");
            return Err(AtrError);
        }
        let protocol_version = data[0];
        let vendor_id: &[u8; 5] = (&data[1..][..5]).try_into().unwrap();
        let dllp_len = data[6];

        let rem = &data[7..];
        if rem.len() < dllp_len as usize || dllp_len < 4 {
            error!("CIP data-link-layer parameters block malformed");
            return Err(AtrError);
        }
        let (dllp, rem) = rem.split_at(dllp_len as usize);
        let [bwt1, bwt2, ifsc1, ifsc2, ..] = dllp else {
            error!("CIP data-link-layer parameters block too short");
            return Err(AtrError);
        };
        let bwt_ms = u16::from_be_bytes([*bwt1, *bwt2]);
        let ifsc = u16::from_be_bytes([*ifsc1, *ifsc2]);

        Ok(Cip {
            protocol_version,
            vendor_id,
            bwt_ms,
            ifsc,
            vendor_data: rem,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_atr() -> Vec<u8> {
        let mut data = vec![0x01];
        data.extend_from_slice(&[0xFF; 5]);
        data.push(4); // dllp_len
        data.extend_from_slice(&[0x01, 0x2C, 0x00, 0xFE]); // bwt=300, ifsc=254
        data.push(0); // platform_id
        data.push(7); // plp_len
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]); // mcf,config,mpot,rfu x3
        data.push(2); // hb_len
        data.extend_from_slice(&[0x4A, 0x43]); // historical bytes
        data
    }

    #[test]
    fn parses_data_link_and_platform_parameters() {
        let data = sample_atr();
        let atr = Atr::parse(&data).unwrap();
        assert_eq!(atr.protocol_version, 1);
        assert_eq!(atr.bwt_ms, 300);
        assert_eq!(atr.ifsc, 254);
        assert_eq!(atr.mpot, 1);
        assert_eq!(atr.historical_bytes, &[0x4A, 0x43]);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let data = [0x01, 0x02, 0x03];
        assert_eq!(Atr::parse(&data), Err(AtrError));
    }

    #[test]
    fn truncated_dllp_is_rejected() {
        let mut data = vec![0x01];
        data.extend_from_slice(&[0xFF; 5]);
        data.push(4);
        data.extend_from_slice(&[0x01, 0x2C]); // only 2 of 4 claimed bytes
        assert_eq!(Atr::parse(&data), Err(AtrError));
    }

    #[test]
    fn default_atr_has_sane_fallbacks() {
        let atr = Atr::default();
        assert_eq!(atr.ifsc, 254);
        assert!(atr.historical_bytes.is_empty());
    }

    #[test]
    fn cip_parses_shared_prefix_and_leaves_rest_as_vendor_data() {
        let mut data = vec![0x01];
        data.extend_from_slice(&[0xFF; 5]);
        data.push(4);
        data.extend_from_slice(&[0x01, 0x2C, 0x00, 0xFE]);
        data.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let cip = Cip::parse(&data).unwrap();
        assert_eq!(cip.bwt_ms, 300);
        assert_eq!(cip.ifsc, 254);
        assert_eq!(cip.vendor_data, &[0xAA, 0xBB, 0xCC]);
    }
}
