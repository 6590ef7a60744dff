//! Beast binary framing with the receiver-id extension.
//!
//! Frame: `0x1a`, type (`'1'` Mode A/C, `'2'` Mode S short, `'3'` Mode S long), 6-byte
//! big-endian 12 MHz timestamp, signal byte, payload. Every `0x1a` after the type byte is
//! doubled. A receiver id message (`0x1a 0xe3` + 8 escaped id bytes) is prepended so
//! aggregators can attribute the frame.

use crate::feed::{ReceiverId, RECEIVER_ID_LEN};
use crate::packet::{DecodedPacket, MODE_AC_LEN, MODE_S_LONG_LEN, MODE_S_SHORT_LEN};

const ESCAPE: u8 = 0x1a;
const TYPE_RECEIVER_ID: u8 = 0xe3;
const TYPE_MODE_AC: u8 = b'1';
const TYPE_MODE_S_SHORT: u8 = b'2';
const TYPE_MODE_S_LONG: u8 = b'3';
const TIMESTAMP_LEN: usize = 6;

/// Worst-case frame length with every escapable byte doubled. Also counts the two-byte
/// `0x1a 0xe3` receiver-id message header, which is the only unescaped part of the id prefix.
pub const BEAST_FRAME_MAX_LEN: usize = 2 + 2 * (TIMESTAMP_LEN + 1 + MODE_S_LONG_LEN) + 2;

/// Buffer size for one frame with its escaped receiver id.
pub const BEAST_MESSAGE_BUF_LEN: usize = 2 * RECEIVER_ID_LEN + BEAST_FRAME_MAX_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BeastError {
    #[error("output buffer too small ({0} bytes)")]
    BufferTooSmall(usize),
    #[error("no beast frame type for a {0} byte packet")]
    UnsupportedLength(usize),
}

/// Encode `packet` into `buf` prefixed by `receiver_id`. Returns the number of bytes written.
pub fn encode_with_receiver_id(
    packet: &DecodedPacket,
    buf: &mut [u8],
    receiver_id: &ReceiverId,
) -> Result<usize, BeastError> {
    let mut w = Writer::new(buf);
    w.raw(ESCAPE)?;
    w.raw(TYPE_RECEIVER_ID)?;
    for &b in receiver_id.as_bytes() {
        w.escaped(b)?;
    }
    write_frame(&mut w, packet)?;
    Ok(w.pos)
}

/// Encode `packet` into `buf` without a receiver id.
pub fn encode(packet: &DecodedPacket, buf: &mut [u8]) -> Result<usize, BeastError> {
    let mut w = Writer::new(buf);
    write_frame(&mut w, packet)?;
    Ok(w.pos)
}

fn write_frame(w: &mut Writer<'_>, packet: &DecodedPacket) -> Result<(), BeastError> {
    let frame_type = match packet.len() {
        MODE_AC_LEN => TYPE_MODE_AC,
        MODE_S_SHORT_LEN => TYPE_MODE_S_SHORT,
        MODE_S_LONG_LEN => TYPE_MODE_S_LONG,
        n => return Err(BeastError::UnsupportedLength(n)),
    };
    w.raw(ESCAPE)?;
    w.raw(frame_type)?;
    let ts = packet.mlat_12mhz().to_be_bytes();
    for &b in &ts[8 - TIMESTAMP_LEN..] {
        w.escaped(b)?;
    }
    w.escaped(packet.signal_level())?;
    for &b in packet.data() {
        w.escaped(b)?;
    }
    Ok(())
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn raw(&mut self, b: u8) -> Result<(), BeastError> {
        let slot = self
            .buf
            .get_mut(self.pos)
            .ok_or(BeastError::BufferTooSmall(self.pos))?;
        *slot = b;
        self.pos += 1;
        Ok(())
    }

    fn escaped(&mut self, b: u8) -> Result<(), BeastError> {
        if b == ESCAPE {
            self.raw(ESCAPE)?;
        }
        self.raw(b)
    }
}
