//! Bit-exact framing for the chained-axis serial bus. Multi-byte
//! fields are little-endian; 32-bit instruction words are
//! additionally byte-swapped (high 16 bits transmitted before the low
//! 16) to match the PIC firmware's native word order.

use crate::error::{WireError, WireResult};
use crate::fields::SignMagnitude16;

/// One command sent down the shared half-duplex bus.
/// The 16-bit codes are the wire codes themselves (not a 0-based
/// discriminant), so `code()` returns the exact value the table
/// names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    EStop,
    Stop,
    Pause,
    Resume,
    Run,
    Flash,
    QShort,
    QLong,
    SetPc { address: u16 },
    /// `Firmware`/`SetPage` are real wire opcodes, modeled as an inert
    /// escape hatch for firmware-update tooling layered on top rather
    /// than actively driven by the controller itself.
    Firmware,
    SetPage { page: u16 },
    Readback { axis: u8 },
    Erase,
    Insim { mask: u16 },
    EndFlash,
}

impl Command {
    pub fn code(self) -> u16 {
        match self {
            Command::EStop => 0,
            Command::Stop => 1,
            Command::Pause => 2,
            Command::Resume => 3,
            Command::Run => 4,
            Command::Flash => 5,
            Command::Firmware => 6,
            Command::QShort => 7,
            Command::QLong => 8,
            Command::SetPc { .. } => 9,
            Command::SetPage { .. } => 10,
            Command::Readback { .. } => 11,
            Command::Erase => 12,
            Command::Insim { .. } => 13,
            Command::EndFlash => 0xFFFF,
        }
    }

    /// Encode this command into its wire bytes: a little-endian u16
    /// code followed by its payload, if any.
    pub fn encode(self) -> Vec<u8> {
        let mut out = self.code().to_le_bytes().to_vec();
        match self {
            Command::SetPc { address } => out.extend_from_slice(&address.to_le_bytes()),
            Command::SetPage { page } => out.extend_from_slice(&page.to_le_bytes()),
            Command::Insim { mask } => out.extend_from_slice(&mask.to_le_bytes()),
            Command::Readback { axis } => out.push(axis),
            _ => {}
        }
        out
    }
}

/// One fully-formed `RUN` command: the command header plus 1..4
/// byte-swapped 32-bit instruction words for a chained group.
pub fn encode_run(words: &[u32]) -> WireResult<Vec<u8>> {
    if words.is_empty() || words.len() > 4 {
        return Err(WireError::InvalidChainGroup { size: words.len() });
    }
    let mut out = Command::Run.code().to_le_bytes().to_vec();
    for word in words {
        out.extend_from_slice(&encode_swapped_u32(*word));
    }
    Ok(out)
}

/// Pack a 256-byte flash block behind the `FLASH` command header.
pub fn encode_flash_block(block: &[u8; FLASH_BLOCK_LEN]) -> Vec<u8> {
    let mut out = Command::Flash.code().to_le_bytes().to_vec();
    out.extend_from_slice(block);
    out
}

pub const FLASH_BLOCK_LEN: usize = 256;
/// `QSHORT`/`QLONG` responses begin with a 2-byte sync pattern before
/// the per-axis payload.
const SYNC_LEN: usize = 2;
/// Axis 0's short-query slice: u16 flags + u16 pc.
const SHORT_LEAD_LEN: usize = 4;
/// Every other axis's short-query slice: u16 flags only.
const SHORT_TAIL_LEN: usize = 2;
/// Every axis's long-query slice: u16 flags + u16 pc + u32 position + u16 velocity.
const LONG_AXIS_LEN: usize = 10;
const FLASH_ACK_LEN: usize = 2;

bitflags::bitflags! {
    /// Status bits common to both query response shapes:
    /// bits 0..1 the responding axis number, bit 2 busy, bit 3
    /// PIC-error, bit 4 FPGA-error, bits 5..7 inputs 3..1 (inverted:
    /// set means idle), bits 12..14 outputs 1..3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u16 {
        const AXIS_LO   = 0b0000_0000_0000_0001;
        const AXIS_HI   = 0b0000_0000_0000_0010;
        const BUSY      = 0b0000_0000_0000_0100;
        const PIC_ERROR = 0b0000_0000_0000_1000;
        const FPGA_ERROR= 0b0000_0000_0001_0000;
        const IN3_IDLE  = 0b0000_0000_0010_0000;
        const IN2_IDLE  = 0b0000_0000_0100_0000;
        const IN1_IDLE  = 0b0000_0000_1000_0000;
        const OUT1      = 0b0001_0000_0000_0000;
        const OUT2      = 0b0010_0000_0000_0000;
        const OUT3      = 0b0100_0000_0000_0000;
    }
}

impl StatusFlags {
    pub fn axis_number(self) -> u8 {
        (self.bits() & 0b11) as u8
    }

    pub fn is_busy(self) -> bool {
        self.contains(StatusFlags::BUSY)
    }

    pub fn has_pic_error(self) -> bool {
        self.contains(StatusFlags::PIC_ERROR)
    }

    pub fn has_fpga_error(self) -> bool {
        self.contains(StatusFlags::FPGA_ERROR)
    }
}

/// One axis's answer to a short `QSHORT`: PC is only
/// carried for axis 0 (the others report flags alone, so the host
/// already knows their PC from the previous full update).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortQuery {
    pub axis: u8,
    pub flags: StatusFlags,
    pub pc: Option<u16>,
}

/// One axis's answer to a `QLONG`: PC, status flags,
/// decoded position and velocity. Position arrives as a 24-bit
/// magnitude shifted left 8 bits on the wire (`>> 8` undoes it);
/// velocity is sign-magnitude 16-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongQuery {
    pub axis: u8,
    pub pc: u16,
    pub flags: StatusFlags,
    pub position: i32,
    pub velocity: i32,
}

/// Decode a 32-bit byte-swapped word: the wire transmits the high 16
/// bits before the low 16.
fn decode_swapped_u32(bytes: &[u8]) -> u32 {
    let hi = u16::from_le_bytes([bytes[0], bytes[1]]) as u32;
    let lo = u16::from_le_bytes([bytes[2], bytes[3]]) as u32;
    (hi << 16) | lo
}

fn encode_swapped_u32(value: u32) -> [u8; 4] {
    let hi = ((value >> 16) & 0xFFFF) as u16;
    let lo = (value & 0xFFFF) as u16;
    let mut out = [0u8; 4];
    out[0..2].copy_from_slice(&hi.to_le_bytes());
    out[2..4].copy_from_slice(&lo.to_le_bytes());
    out
}

/// Expected total byte length of a `QSHORT` response for `n_devs`
/// responding axes + 4 bytes axis 0 + 2 bytes
/// per extra axis").
pub fn short_query_len(n_devs: usize) -> usize {
    SYNC_LEN + SHORT_LEAD_LEN + SHORT_TAIL_LEN * n_devs.saturating_sub(1)
}

/// Expected total byte length of a `QLONG` response for `n_devs`
/// responding axes + 10 bytes per responding
/// axis; initial QLONG returns up to 42 bytes").
pub fn long_query_len(n_devs: usize) -> usize {
    SYNC_LEN + LONG_AXIS_LEN * n_devs
}

/// Parse a broadcast `QSHORT` response covering every axis that
/// answered, skipping the leading sync bytes.
pub fn parse_short_query(bytes: &[u8], n_devs: usize) -> WireResult<Vec<ShortQuery>> {
    let expected = short_query_len(n_devs);
    if bytes.len() != expected {
        return Err(WireError::MalformedResponse { expected, actual: bytes.len() });
    }
    let mut cursor = SYNC_LEN;
    let mut out = Vec::with_capacity(n_devs);
    for axis in 0..n_devs as u8 {
        if axis == 0 {
            let flags = StatusFlags::from_bits_truncate(u16::from_le_bytes([bytes[cursor], bytes[cursor + 1]]));
            let pc = u16::from_le_bytes([bytes[cursor + 2], bytes[cursor + 3]]);
            out.push(ShortQuery { axis, flags, pc: Some(pc) });
            cursor += SHORT_LEAD_LEN;
        } else {
            let flags = StatusFlags::from_bits_truncate(u16::from_le_bytes([bytes[cursor], bytes[cursor + 1]]));
            out.push(ShortQuery { axis, flags, pc: None });
            cursor += SHORT_TAIL_LEN;
        }
    }
    Ok(out)
}

/// Parse a broadcast `QLONG` response covering every axis that
/// answered.
pub fn parse_long_query(bytes: &[u8], n_devs: usize) -> WireResult<Vec<LongQuery>> {
    let expected = long_query_len(n_devs);
    if bytes.len() != expected {
        return Err(WireError::MalformedResponse { expected, actual: bytes.len() });
    }
    let mut cursor = SYNC_LEN;
    let mut out = Vec::with_capacity(n_devs);
    for axis in 0..n_devs as u8 {
        let flags = StatusFlags::from_bits_truncate(u16::from_le_bytes([bytes[cursor], bytes[cursor + 1]]));
        let pc = u16::from_le_bytes([bytes[cursor + 2], bytes[cursor + 3]]);
        let raw_position = decode_swapped_u32(&bytes[cursor + 4..cursor + 8]);
        let position = (raw_position >> 8) as i32;
        let raw_velocity = u16::from_le_bytes([bytes[cursor + 8], bytes[cursor + 9]]);
        let velocity = SignMagnitude16::decode(raw_velocity);
        out.push(LongQuery { axis, pc, flags, position, velocity });
        cursor += LONG_AXIS_LEN;
    }
    Ok(out)
}

pub fn encode_position_for_test(position: i32) -> [u8; 4] {
    encode_swapped_u32((position as u32) << 8)
}

/// Flash-programming lock-step responses: `'PP'`
/// means ready for the next block; a response starting with `'E'`
/// means the device considers the image complete; anything else is a
/// fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashAck {
    Programmed,
    Complete,
    Fault(u8),
}

pub fn parse_flash_ack(bytes: &[u8]) -> WireResult<FlashAck> {
    if bytes.len() != FLASH_ACK_LEN {
        return Err(WireError::MalformedResponse { expected: FLASH_ACK_LEN, actual: bytes.len() });
    }
    match bytes[0] {
        b'P' if bytes[1] == b'P' => Ok(FlashAck::Programmed),
        b'E' => Ok(FlashAck::Complete),
        _ => Ok(FlashAck::Fault(bytes[1])),
    }
}

/// Pad a flash block shorter than `FLASH_BLOCK_LEN` with `GOTO 0`
/// words rather than zeros, so an
/// underfull final block still decodes to valid, harmless code.
pub fn pad_flash_block(mut block: Vec<u8>) -> [u8; FLASH_BLOCK_LEN] {
    const GOTO_ZERO: [u8; 4] = [0x00, 0x03, 0x00, 0x00]; // byte-swapped GOTO 0x03000000
    while block.len() < FLASH_BLOCK_LEN {
        let remaining = FLASH_BLOCK_LEN - block.len();
        block.extend_from_slice(&GOTO_ZERO[..remaining.min(4)]);
    }
    block.truncate(FLASH_BLOCK_LEN);
    let mut out = [0u8; FLASH_BLOCK_LEN];
    out.copy_from_slice(&block);
    out
}
