//! Decoded transponder packet as handed to the forwarder, plus AVR text parsing.

/// Mode A/C reply length in bytes.
pub const MODE_AC_LEN: usize = 2;
/// Mode S short (56-bit) frame length.
pub const MODE_S_SHORT_LEN: usize = 7;
/// Mode S extended (112-bit) frame length.
pub const MODE_S_LONG_LEN: usize = 14;

const CRC_GENERATOR: u32 = 0x1FF_F409;

/// A demodulated transponder reply with receive metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedPacket {
    data: [u8; MODE_S_LONG_LEN],
    len: u8,
    /// 48 MHz receive timestamp counter.
    mlat_48mhz: u64,
    signal_level: u8,
    valid: bool,
}

/// Error building a packet from raw bytes or AVR text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("unsupported frame length {0} bytes")]
    BadLength(usize),
    #[error("missing AVR framing")]
    Framing,
    #[error("invalid hex digit")]
    Hex,
}

impl DecodedPacket {
    pub fn new(
        data: &[u8],
        mlat_48mhz: u64,
        signal_level: u8,
        valid: bool,
    ) -> Result<Self, PacketError> {
        if !matches!(data.len(), MODE_AC_LEN | MODE_S_SHORT_LEN | MODE_S_LONG_LEN) {
            return Err(PacketError::BadLength(data.len()));
        }
        let mut buf = [0u8; MODE_S_LONG_LEN];
        buf[..data.len()].copy_from_slice(data);
        Ok(Self {
            data: buf,
            len: data.len() as u8,
            mlat_48mhz,
            signal_level,
            valid,
        })
    }

    /// Parse one AVR line: `*<hex>;` or `@<12 hex digit 12 MHz timestamp><hex>;`.
    /// Validity is derived from the Mode S parity (Mode A/C replies carry none and are
    /// accepted as-is).
    pub fn from_avr(line: &str) -> Result<Self, PacketError> {
        let line = line.trim();
        let body = line.strip_suffix(';').ok_or(PacketError::Framing)?;
        let (timestamp, hex) = if let Some(rest) = body.strip_prefix('@') {
            if rest.len() < 12 || !rest.is_char_boundary(12) {
                return Err(PacketError::Framing);
            }
            let ts = u64::from_str_radix(&rest[..12], 16).map_err(|_| PacketError::Hex)?;
            (ts * 4, &rest[12..])
        } else if let Some(rest) = body.strip_prefix('*') {
            (0, rest)
        } else {
            return Err(PacketError::Framing);
        };

        if hex.len() % 2 != 0 || !hex.is_ascii() {
            return Err(PacketError::BadLength(hex.len() / 2));
        }
        let n = hex.len() / 2;
        if !matches!(n, MODE_AC_LEN | MODE_S_SHORT_LEN | MODE_S_LONG_LEN) {
            return Err(PacketError::BadLength(n));
        }
        let mut data = [0u8; MODE_S_LONG_LEN];
        for (i, byte) in data[..n].iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| PacketError::Hex)?;
        }
        let valid = n == MODE_AC_LEN || crc_residual(&data[..n]) == 0;
        Self::new(&data[..n], timestamp, 0, valid)
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the packet passed validity checks upstream.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn mlat_48mhz(&self) -> u64 {
        self.mlat_48mhz
    }

    /// Receive time on the 12 MHz, 48-bit clock used by Beast.
    pub fn mlat_12mhz(&self) -> u64 {
        (self.mlat_48mhz / 4) & 0xFFFF_FFFF_FFFF
    }

    pub fn signal_level(&self) -> u8 {
        self.signal_level
    }

    /// Mode S downlink format, or `None` for Mode A/C replies.
    pub fn downlink_format(&self) -> Option<u8> {
        (self.len() != MODE_AC_LEN).then(|| self.data[0] >> 3)
    }
}

/// Mode S parity residual: CRC-24 of the message body XOR the trailing parity field.
/// Zero for an undamaged DF11 (IID 0), DF17 or DF18 frame.
pub fn crc_residual(frame: &[u8]) -> u32 {
    if frame.len() < 4 {
        return 0;
    }
    let (body, parity) = frame.split_at(frame.len() - 3);
    let parity = (parity[0] as u32) << 16 | (parity[1] as u32) << 8 | parity[2] as u32;
    mode_s_crc(body) ^ parity
}

fn mode_s_crc(body: &[u8]) -> u32 {
    let mut crc: u32 = 0;
    for &byte in body {
        crc ^= (byte as u32) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x100_0000 != 0 {
                crc ^= CRC_GENERATOR;
            }
        }
    }
    crc & 0xFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    const DF17: &str = "*8D4840D6202CC371C32CE0576098;";

    #[test]
    fn parses_extended_squitter() {
        let p = DecodedPacket::from_avr(DF17).unwrap();
        assert_eq!(p.len(), MODE_S_LONG_LEN);
        assert_eq!(p.downlink_format(), Some(17));
        assert!(p.is_valid());
        assert_eq!(p.data()[..4], [0x8D, 0x48, 0x40, 0xD6]);
    }

    #[test]
    fn damaged_frame_is_invalid() {
        let p = DecodedPacket::from_avr("*8D4840D6202CC371C32CE0576099;").unwrap();
        assert!(!p.is_valid());
    }

    #[test]
    fn parses_timestamped_line() {
        let p = DecodedPacket::from_avr("@0000000012348D4840D6202CC371C32CE0576098;").unwrap();
        assert_eq!(p.mlat_12mhz(), 0x1234);
        assert_eq!(p.mlat_48mhz(), 0x1234 * 4);
        assert!(p.is_valid());
    }

    #[test]
    fn mode_ac_is_accepted() {
        let p = DecodedPacket::from_avr("*7700;").unwrap();
        assert_eq!(p.len(), MODE_AC_LEN);
        assert_eq!(p.downlink_format(), None);
        assert!(p.is_valid());
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(
            DecodedPacket::from_avr("8D4840D6202CC371C32CE0576098"),
            Err(PacketError::Framing)
        );
        assert_eq!(
            DecodedPacket::from_avr("*8D4840D6202C;"),
            Err(PacketError::BadLength(6))
        );
        assert_eq!(
            DecodedPacket::from_avr("*8D4840D6202CC371C32CE05760ZZ;"),
            Err(PacketError::Hex)
        );
        assert_eq!(DecodedPacket::from_avr("@12;"), Err(PacketError::Framing));
    }

    #[test]
    fn new_checks_length() {
        assert!(DecodedPacket::new(&[0u8; 3], 0, 0, true).is_err());
        assert!(DecodedPacket::new(&[0u8; 7], 0, 0, true).is_ok());
    }
}
