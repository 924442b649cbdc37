//! The tagged-variant instruction model and its
//! 32-bit word encoder/decoder.
//!
//! Follows the same design choice `em68k` makes in its own
//! `instructions.rs`: a single sum type over every opcode, carrying
//! exactly the fields each variant needs, with queries implemented as
//! exhaustive matches rather than a class hierarchy (DESIGN NOTES,
//! "Tagged variants beat class hierarchy").

use crate::anchor::SourceAnchor;
use crate::fields::{Axis, AxisMask, CompareState, IfFlag};

/// A label reference that is either still a pending qualified name (if
/// forward/unresolved) or has already been bound to a concrete
/// address by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchTarget {
    Pending(String),
    Resolved(u16),
}

impl BranchTarget {
    pub fn is_resolved(&self) -> bool {
        matches!(self, BranchTarget::Resolved(_))
    }

    pub fn address(&self) -> Option<u16> {
        match self {
            BranchTarget::Resolved(addr) => Some(*addr),
            BranchTarget::Pending(_) => None,
        }
    }

    pub fn qualified_name(&self) -> Option<&str> {
        match self {
            BranchTarget::Pending(name) => Some(name),
            BranchTarget::Resolved(_) => None,
        }
    }
}

/// The 6-bit opcode field.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Move = 0x00,
    MoveRel = 0x01,
    Home = 0x02,
    Goto = 0x03,
    Call = 0x04,
    If = 0x05,
    Out = 0x06,
    Velocity = 0x07,
    Wait = 0x08,
    MovingAverage = 0x09,
    AnalogInputsTo = 0x0A,
    VectorAxes = 0x0B,
    Acceleration = 0x0C,
    SpeedControl = 0x0D,
    Configure = 0x0E,
    ClockwiseLimit = 0x0F,
    PositionAdjust = 0x10,
    Jog = 0x11,
    Return = 0x12,
    ZeroOffset = 0x13,
    Compare = 0x14,
    RespPos = 0x15,
}

/// A single 32-bit motion-control instruction, tagged by variant.
/// Every variant keeps the source anchor it was parsed from so
/// accumulated errors and the debugger can navigate back to it.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `axis +/-n [, ...]` (absolute when not `relative`).
    Move {
        anchor: SourceAnchor,
        axis: Axis,
        relative: bool,
        amount: i32,
        chain: bool,
    },
    /// `home axis,...`
    Home {
        anchor: SourceAnchor,
        axis: Axis,
        chain: bool,
    },
    /// `goto label [, loop n times]`
    Goto {
        anchor: SourceAnchor,
        target: BranchTarget,
        loop_count: u8,
    },
    /// `call label`
    Call {
        anchor: SourceAnchor,
        target: BranchTarget,
    },
    /// `return`
    Return { anchor: SourceAnchor },
    /// `if axis flag is state [compare] goto label`
    If {
        anchor: SourceAnchor,
        axis: Axis,
        flag: IfFlag,
        state: CompareState,
        target: BranchTarget,
    },
    /// `axis out1|out2|out3 state` / `axis out n state`
    Out {
        anchor: SourceAnchor,
        axis: Axis,
        output: u8,
        state: OutState,
    },
    /// `axis velocity n`
    Velocity {
        anchor: SourceAnchor,
        axis: Axis,
        value: u16,
    },
    /// `wait n seconds`
    Wait { anchor: SourceAnchor, millis: u16 },
    /// `moving average mask n samples`
    MovingAverage {
        anchor: SourceAnchor,
        axes: AxisMask,
        samples: u8,
    },
    /// `analog inputs to mask`
    AnalogInputsTo { anchor: SourceAnchor, axes: AxisMask },
    /// `vector axes|axis are|is mask`
    VectorAxes { anchor: SourceAnchor, axes: AxisMask },
    /// `axis acceleration n`
    Acceleration {
        anchor: SourceAnchor,
        axis: Axis,
        value: u16,
    },
    /// `axis speed control n`
    SpeedControl {
        anchor: SourceAnchor,
        axis: Axis,
        value: i32,
    },
    /// `axis configure: i amps, idle at p% after s seconds`
    Configure {
        anchor: SourceAnchor,
        axis: Axis,
        tenths_amps: u8,
        idle_percent: u8,
        idle_tenths_seconds: u8,
    },
    /// `axis limit cw n`
    ClockwiseLimit {
        anchor: SourceAnchor,
        axis: Axis,
        value: u32,
    },
    /// `axis position adj +/- n`
    PositionAdjust {
        anchor: SourceAnchor,
        axis: Axis,
        value: i16,
    },
    /// `jog mask`
    Jog { anchor: SourceAnchor, axes: AxisMask },
    /// `axis zero offset n`
    ZeroOffset {
        anchor: SourceAnchor,
        axis: Axis,
        value: u32,
    },
    /// `axis compare value n`
    Compare {
        anchor: SourceAnchor,
        axis: Axis,
        value: u32,
    },
    /// `respos mask`
    RespPos { anchor: SourceAnchor, axes: AxisMask },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutState {
    Off = 0,
    On = 1,
    Br = 2,
    Rs = 3,
    Err = 4,
}

impl OutState {
    pub fn from_code(code: u8) -> Option<OutState> {
        match code {
            0 => Some(OutState::Off),
            1 => Some(OutState::On),
            2 => Some(OutState::Br),
            3 => Some(OutState::Rs),
            4 => Some(OutState::Err),
            _ => None,
        }
    }
}

impl Instruction {
    pub fn anchor(&self) -> &SourceAnchor {
        match self {
            Instruction::Move { anchor, .. }
            | Instruction::Home { anchor, .. }
            | Instruction::Goto { anchor, .. }
            | Instruction::Call { anchor, .. }
            | Instruction::Return { anchor }
            | Instruction::If { anchor, .. }
            | Instruction::Out { anchor, .. }
            | Instruction::Velocity { anchor, .. }
            | Instruction::Wait { anchor, .. }
            | Instruction::MovingAverage { anchor, .. }
            | Instruction::AnalogInputsTo { anchor, .. }
            | Instruction::VectorAxes { anchor, .. }
            | Instruction::Acceleration { anchor, .. }
            | Instruction::SpeedControl { anchor, .. }
            | Instruction::Configure { anchor, .. }
            | Instruction::ClockwiseLimit { anchor, .. }
            | Instruction::PositionAdjust { anchor, .. }
            | Instruction::Jog { anchor, .. }
            | Instruction::ZeroOffset { anchor, .. }
            | Instruction::Compare { anchor, .. }
            | Instruction::RespPos { anchor, .. } => anchor,
        }
    }

    /// True if this instruction chains to the next 32-bit word as one
    /// atomic multi-axis group. Only MOVE and HOME carry a chain flag;
    /// JOG addresses all its axes through a single mask word instead
    /// and so never needs to chain.
    pub fn is_chained(&self) -> bool {
        match self {
            Instruction::Move { chain, .. } | Instruction::Home { chain, .. } => *chain,
            _ => false,
        }
    }

    /// True for an unconditional `GOTO` (no loop count) or `RETURN`:
    /// the instruction after it is unreachable unless separately
    /// labelled.
    pub fn is_end_of_block(&self) -> bool {
        match self {
            Instruction::Goto { loop_count, .. } => *loop_count == 0,
            Instruction::Return { .. } => true,
            _ => false,
        }
    }

    pub fn is_unresolved_branch(&self) -> bool {
        match self.branch_target() {
            Some(target) => !target.is_resolved(),
            None => false,
        }
    }

    pub fn branch_target(&self) -> Option<&BranchTarget> {
        match self {
            Instruction::Goto { target, .. }
            | Instruction::Call { target, .. }
            | Instruction::If { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn branch_target_mut(&mut self) -> Option<&mut BranchTarget> {
        match self {
            Instruction::Goto { target, .. }
            | Instruction::Call { target, .. }
            | Instruction::If { target, .. } => Some(target),
            _ => None,
        }
    }

    /// "Step next" differs from "step one" for CALL, conditional IF,
    /// and GOTO with a loop count still remaining (GLOSSARY "Nextable").
    pub fn is_nextable(&self) -> bool {
        match self {
            Instruction::Call { .. } | Instruction::If { .. } => true,
            Instruction::Goto { loop_count, .. } => *loop_count != 0,
            _ => false,
        }
    }

    /// Fast instructions need only a short query to update local
    /// status; MOVE, HOME, JOG, SPEED CONTROL and WAIT are not fast.
    pub fn is_fast(&self) -> bool {
        !matches!(
            self,
            Instruction::Move { .. }
                | Instruction::Home { .. }
                | Instruction::Jog { .. }
                | Instruction::SpeedControl { .. }
                | Instruction::Wait { .. }
        )
    }

    /// An instruction is instant if it is fast AND the next PC is
    /// statically known, so the I/O loop can skip the round trip
    ///. Returns `(is_instant, next_addr_hint)`;
    /// `-1` means "just addr + 1", matching the Python original.
    pub fn is_instant(&self) -> (bool, i32) {
        match self {
            Instruction::Goto {
                loop_count: 0,
                target,
                ..
            } => (true, target.address().map(|a| a as i32).unwrap_or(-1)),
            Instruction::Goto { .. } => (false, 0),
            Instruction::Call { target, .. } => {
                (true, target.address().map(|a| a as i32).unwrap_or(-1))
            }
            Instruction::Configure { .. }
            | Instruction::ClockwiseLimit { .. }
            | Instruction::Compare { .. }
            | Instruction::Acceleration { .. }
            | Instruction::Velocity { .. }
            | Instruction::ZeroOffset { .. }
            | Instruction::AnalogInputsTo { .. }
            | Instruction::VectorAxes { .. }
            | Instruction::RespPos { .. } => (true, -1),
            _ => (false, 0),
        }
    }

    /// Reported position is invalid while HOME or SPEED CONTROL runs.
    pub fn is_pos_valid(&self) -> bool {
        !matches!(
            self,
            Instruction::Home { .. } | Instruction::SpeedControl { .. }
        )
    }

    /// Reported velocity validity; always true in this model.
    pub fn is_vel_valid(&self) -> bool {
        true
    }

    /// RESPOS resets the device's reported offset to read as zero.
    pub fn is_reset_offset(&self) -> bool {
        matches!(self, Instruction::RespPos { .. })
    }

    pub fn reset_offset_value(&self) -> Option<u32> {
        if self.is_reset_offset() {
            Some(0x3F_FFFF)
        } else {
            None
        }
    }

    /// Encode this instruction into its 32-bit word, per the field
    /// layout in spec.md §4.1.
    pub fn encode(&self) -> u32 {
        match self {
            Instruction::Move {
                axis,
                relative,
                amount,
                chain,
                ..
            } => {
                let mut word = axis_select(*axis) | opcode5(if *relative { 0x01 } else { 0x00 });
                word |= chain_bit(*chain);
                word |= if *relative {
                    sign_magnitude_24(*amount)
                } else {
                    (*amount as u32) & 0x00FF_FFFF
                };
                word
            }
            Instruction::Home { axis, chain, .. } => {
                axis_select(*axis) | opcode5(0x02) | chain_bit(*chain)
            }
            Instruction::Goto {
                target, loop_count, ..
            } => opcode8(0x03) | command_data(*loop_count) | branch_field(target),
            Instruction::Call { target, .. } => opcode8(0x04) | branch_field(target),
            Instruction::Return { .. } => opcode8(0x12),
            Instruction::If {
                axis,
                flag,
                state,
                target,
                ..
            } => {
                axis_select(*axis)
                    | opcode6(0x05)
                    | command_data((state.code() << 5) | (flag.code() & 0x07))
                    | branch_field(target)
            }
            Instruction::Out {
                axis,
                output,
                state,
                ..
            } => {
                axis_select(*axis)
                    | opcode6(0x06)
                    | command_data(((output & 0x3) << 4) | (*state as u8 & 0x0F))
            }
            Instruction::Velocity { axis, value, .. } => {
                axis_select(*axis) | opcode6(0x07) | swapped_24(*value as u32)
            }
            Instruction::Wait { millis, .. } => opcode6(0x08) | (*millis as u32 & 0xFFFF),
            Instruction::MovingAverage { axes, samples, .. } => {
                opcode8(0x09) | command_data(axes.bits()) | (*samples as u32 & 0x7F)
            }
            Instruction::AnalogInputsTo { axes, .. } => opcode8(0x0A) | command_data(axes.bits()),
            Instruction::VectorAxes { axes, .. } => opcode8(0x0B) | command_data(axes.bits()),
            Instruction::Acceleration { axis, value, .. } => {
                axis_select(*axis) | opcode6(0x0C) | swapped_24(*value as u32)
            }
            Instruction::SpeedControl { axis, value, .. } => {
                axis_select(*axis) | opcode6(0x0D) | swapped_24_sign_mag(*value)
            }
            Instruction::Configure {
                axis,
                tenths_amps,
                idle_percent,
                idle_tenths_seconds,
                ..
            } => {
                axis_select(*axis)
                    | opcode6(0x0E)
                    | command_data(*tenths_amps)
                    | ((*idle_percent as u32) << 8)
                    | (*idle_tenths_seconds as u32)
            }
            Instruction::ClockwiseLimit { axis, value, .. } => {
                axis_select(*axis) | opcode6(0x0F) | (*value & 0x00FF_FFFF)
            }
            Instruction::PositionAdjust { axis, value, .. } => {
                axis_select(*axis) | opcode6(0x10) | (*value as u16 as u32 & 0xFFFF)
            }
            Instruction::Jog { axes, .. } => opcode8(0x11) | command_data(axes.bits()),
            Instruction::ZeroOffset { axis, value, .. } => {
                axis_select(*axis) | opcode6(0x13) | (*value & 0x00FF_FFFF)
            }
            Instruction::Compare { axis, value, .. } => {
                axis_select(*axis) | opcode6(0x14) | (*value & 0x00FF_FFFF)
            }
            Instruction::RespPos { axes, .. } => opcode8(0x15) | command_data(axes.bits()),
        }
    }
}

impl Instruction {
    /// Reverse `encode`: reconstruct the variant a 32-bit word was
    /// produced from, given the anchor to attach to it. Returns `None`
    /// for a word whose opcode/state nibble isn't one any encoder
    /// emits. Grounded on the spec.md §8 "encoding round-trip"
    /// property: `decode(encode(v)) == v` for every in-range `v`.
    pub fn decode(word: u32, anchor: SourceAnchor) -> Option<Instruction> {
        let axis = Axis::from_index(((word >> 30) & 0x3) as u8)?;
        let raw6 = (word >> 24) & 0x3F;
        let chain = raw6 & 0x20 != 0;
        let opcode = raw6 & 0x1F;
        let command_data = ((word >> 16) & 0xFF) as u8;
        let low16 = (word & 0xFFFF) as u16;

        Some(match opcode {
            0x00 => Instruction::Move {
                anchor,
                axis,
                relative: false,
                amount: (word & 0x00FF_FFFF) as i32,
                chain,
            },
            0x01 => Instruction::Move {
                anchor,
                axis,
                relative: true,
                amount: decode_sign_magnitude_24(word),
                chain,
            },
            0x02 => Instruction::Home { anchor, axis, chain },
            0x03 => Instruction::Goto {
                anchor,
                target: BranchTarget::Resolved(low16),
                loop_count: command_data,
            },
            0x04 => Instruction::Call {
                anchor,
                target: BranchTarget::Resolved(low16),
            },
            0x05 => Instruction::If {
                anchor,
                axis,
                flag: IfFlag::from_code(command_data)?,
                state: CompareState::from_code((command_data >> 5) & 0x07)?,
                target: BranchTarget::Resolved(low16),
            },
            0x06 => Instruction::Out {
                anchor,
                axis,
                output: (command_data >> 4) & 0x3,
                state: OutState::from_code(command_data & 0x0F)?,
            },
            0x07 => Instruction::Velocity {
                anchor,
                axis,
                value: decode_swapped_24(word) as u16,
            },
            0x08 => Instruction::Wait { anchor, millis: low16 },
            0x09 => Instruction::MovingAverage {
                anchor,
                axes: AxisMask::from_bits_truncate(command_data),
                samples: (low16 & 0x7F) as u8,
            },
            0x0A => Instruction::AnalogInputsTo {
                anchor,
                axes: AxisMask::from_bits_truncate(command_data),
            },
            0x0B => Instruction::VectorAxes {
                anchor,
                axes: AxisMask::from_bits_truncate(command_data),
            },
            0x0C => Instruction::Acceleration {
                anchor,
                axis,
                value: decode_swapped_24(word) as u16,
            },
            0x0D => Instruction::SpeedControl {
                anchor,
                axis,
                value: decode_swapped_24_sign_mag(word),
            },
            0x0E => Instruction::Configure {
                anchor,
                axis,
                tenths_amps: command_data,
                idle_percent: ((low16 >> 8) & 0xFF) as u8,
                idle_tenths_seconds: (low16 & 0xFF) as u8,
            },
            0x0F => Instruction::ClockwiseLimit {
                anchor,
                axis,
                value: word & 0x00FF_FFFF,
            },
            0x10 => Instruction::PositionAdjust {
                anchor,
                axis,
                value: low16 as i16,
            },
            0x11 => Instruction::Jog {
                anchor,
                axes: AxisMask::from_bits_truncate(command_data),
            },
            0x12 => Instruction::Return { anchor },
            0x13 => Instruction::ZeroOffset {
                anchor,
                axis,
                value: word & 0x00FF_FFFF,
            },
            0x14 => Instruction::Compare {
                anchor,
                axis,
                value: word & 0x00FF_FFFF,
            },
            0x15 => Instruction::RespPos {
                anchor,
                axes: AxisMask::from_bits_truncate(command_data),
            },
            _ => return None,
        })
    }
}

fn decode_sign_magnitude_24(word: u32) -> i32 {
    let magnitude = (word & 0x7F_FFFF) as i32;
    if (word >> 23) & 1 != 0 {
        magnitude
    } else {
        -magnitude
    }
}

/// Inverse of `swapped_24`: the LSB sat in the command-data slot.
fn decode_swapped_24(word: u32) -> u32 {
    let command_byte = (word >> 16) & 0xFF;
    let low16 = word & 0xFFFF;
    (low16 << 8) | command_byte
}

/// Inverse of `swapped_24_sign_mag`.
fn decode_swapped_24_sign_mag(word: u32) -> i32 {
    let command_byte = (word >> 16) & 0xFF;
    let low16 = word & 0xFFFF;
    let sign = (low16 >> 15) & 1;
    let magnitude = (((low16 & 0x7FFF) << 8) | command_byte) as i32;
    if sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn axis_select(axis: Axis) -> u32 {
    (axis.index() as u32) << 30
}

fn opcode5(code: u8) -> u32 {
    (code as u32 & 0x1F) << 24
}

fn opcode6(code: u8) -> u32 {
    (code as u32 & 0x3F) << 24
}

fn opcode8(code: u8) -> u32 {
    (code as u32 & 0xFF) << 24
}

fn chain_bit(chain: bool) -> u32 {
    (chain as u32) << 29
}

fn command_data(byte: u8) -> u32 {
    (byte as u32) << 16
}

fn branch_field(target: &BranchTarget) -> u32 {
    target.address().unwrap_or(0) as u32 & 0xFFFF
}

fn sign_magnitude_24(value: i32) -> u32 {
    let (sign, magnitude) = if value < 0 { (0u32, -value) } else { (1u32, value) };
    (magnitude as u32 & 0x7F_FFFF) | (sign << 23)
}

fn swapped_24(value: u32) -> u32 {
    // LSB moves into the command-data slot.
    ((value & 0xFF) << 16) | ((value >> 8) & 0xFFFF)
}

fn swapped_24_sign_mag(value: i32) -> u32 {
    let (sign, magnitude) = if value < 0 { (1u32, -value) } else { (0u32, value) };
    let magnitude = magnitude as u32;
    ((magnitude & 0xFF) << 16) | ((magnitude >> 8) & 0x7FFF) | (sign << 15)
}
