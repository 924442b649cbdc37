//! Small value types shared by the instruction encoder and the parser,
//! in the spirit of `em68k`'s `fields.rs`: rather than scatter magic
//! numbers across the parser and the encoder, give each opcode field
//! its own rich type and let the parser be the (naturally messy) code
//! that constructs them from source tokens.

use std::fmt;

/// One of the four motor channels on the bus.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
    W = 3,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::W];

    pub fn from_index(index: u8) -> Option<Axis> {
        match index {
            0 => Some(Axis::X),
            1 => Some(Axis::Y),
            2 => Some(Axis::Z),
            3 => Some(Axis::W),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_letter(c: char) -> Option<Axis> {
        match c.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'W' => Some(Axis::W),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::W => 'W',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

bitflags::bitflags! {
    /// A comma-separated axis list (`moving average x,y 4 samples`,
    /// `vector axes are x,y`), packed as a 4-bit mask matching the
    /// `command-data` byte layout.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AxisMask: u8 {
        const X = 0b0001;
        const Y = 0b0010;
        const Z = 0b0100;
        const W = 0b1000;
    }
}

impl AxisMask {
    pub fn from_axes(axes: impl IntoIterator<Item = Axis>) -> AxisMask {
        axes.into_iter().fold(AxisMask::empty(), |mask, axis| {
            mask | AxisMask::from_bits_truncate(1 << axis.index())
        })
    }

    pub fn contains_axis(self, axis: Axis) -> bool {
        self.contains(AxisMask::from_bits_truncate(1 << axis.index()))
    }

    pub fn iter_axes(self) -> impl Iterator<Item = Axis> {
        Axis::ALL.into_iter().filter(move |a| self.contains_axis(*a))
    }
}

/// Status flag tested by `IF <axis> <flag> IS <state> ...`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IfFlag {
    In1,
    In2,
    In3,
    Rdy,
    Err,
    Velocity,
    Position,
    Vin,
}

impl IfFlag {
    pub fn from_keyword(word: &str) -> Option<IfFlag> {
        match word.to_ascii_lowercase().as_str() {
            "in1" => Some(IfFlag::In1),
            "in2" => Some(IfFlag::In2),
            "in3" => Some(IfFlag::In3),
            "rdy" => Some(IfFlag::Rdy),
            "err" => Some(IfFlag::Err),
            "velocity" => Some(IfFlag::Velocity),
            "position" => Some(IfFlag::Position),
            "vin" => Some(IfFlag::Vin),
            _ => None,
        }
    }

    /// Encoding used in the command-data byte for `IF`: bits 0..2
    /// select the flag, bit 3 the comparison state when applicable.
    pub fn code(self) -> u8 {
        match self {
            IfFlag::In1 => 0,
            IfFlag::In2 => 1,
            IfFlag::In3 => 2,
            IfFlag::Rdy => 3,
            IfFlag::Err => 4,
            IfFlag::Velocity => 5,
            IfFlag::Position => 6,
            IfFlag::Vin => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<IfFlag> {
        match code & 0x07 {
            0 => Some(IfFlag::In1),
            1 => Some(IfFlag::In2),
            2 => Some(IfFlag::In3),
            3 => Some(IfFlag::Rdy),
            4 => Some(IfFlag::Err),
            5 => Some(IfFlag::Velocity),
            6 => Some(IfFlag::Position),
            7 => Some(IfFlag::Vin),
            _ => None,
        }
    }
}

/// The state/comparison an `IF` tests for: `off`, `on`, or a
/// relational comparator against a prior `compare value`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompareState {
    Off,
    On,
    LessThan,
    EqualTo,
    GreaterThan,
}

impl CompareState {
    pub fn from_keyword(word: &str) -> Option<CompareState> {
        match word {
            "off" => Some(CompareState::Off),
            "on" => Some(CompareState::On),
            "<" => Some(CompareState::LessThan),
            "=" => Some(CompareState::EqualTo),
            ">" => Some(CompareState::GreaterThan),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            CompareState::Off => 0,
            CompareState::On => 1,
            CompareState::LessThan => 2,
            CompareState::EqualTo => 3,
            CompareState::GreaterThan => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<CompareState> {
        match code {
            0 => Some(CompareState::Off),
            1 => Some(CompareState::On),
            2 => Some(CompareState::LessThan),
            3 => Some(CompareState::EqualTo),
            4 => Some(CompareState::GreaterThan),
            _ => None,
        }
    }
}

/// A value with a known sign-magnitude-or-linear representation, used
/// for both encoding (range checks at construction time) and decoding
/// (wire responses).
pub struct SignMagnitude16;

impl SignMagnitude16 {
    /// Decode a raw 16-bit field: bit 15 set means the low 15 bits are
    /// the (positive) magnitude, clear means the value is the
    /// negation of the raw 16-bit word.
    pub fn decode(raw: u16) -> i32 {
        if raw & 0x8000 != 0 {
            (raw & 0x7FFF) as i32
        } else {
            -(raw as i32)
        }
    }

    /// Encode a signed magnitude back into the wire's sign-magnitude
    /// 16-bit form. Magnitude must fit [0, 0x7FFF].
    pub fn encode(value: i32) -> u16 {
        if value >= 0 {
            0x8000 | (value as u16 & 0x7FFF)
        } else {
            (-value) as u16
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_mask_round_trips_through_bits() {
        let mask = AxisMask::from_axes([Axis::X, Axis::Z]);
        assert!(mask.contains_axis(Axis::X));
        assert!(!mask.contains_axis(Axis::Y));
        assert!(mask.contains_axis(Axis::Z));
        assert_eq!(mask.iter_axes().collect::<Vec<_>>(), vec![Axis::X, Axis::Z]);
    }

    #[test]
    fn sign_magnitude_decode_matches_spec_property() {
        for raw in [0x0000u16, 0x0001, 0x7FFF, 0x8000, 0x8001, 0xFFFF] {
            let decoded = SignMagnitude16::decode(raw);
            let expected = if raw & 0x8000 != 0 {
                (raw & 0x7FFF) as i32
            } else {
                -(raw as i32)
            };
            assert_eq!(decoded, expected);
        }
    }

    #[test]
    fn sign_magnitude_round_trips() {
        for v in [-32767i32, -1, 0, 1, 32767] {
            let raw = SignMagnitude16::encode(v);
            assert_eq!(SignMagnitude16::decode(raw), v);
        }
    }
}
