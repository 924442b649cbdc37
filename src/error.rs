//! Error types for the assembler and the device controller.
//!
//! Split along the same lines `isa-classifier` uses: one `thiserror`
//! enum per concern, each variant carrying structured fields instead
//! of a pre-formatted string, so a GUI shell can still navigate to the
//! offending source anchor.

use thiserror::Error;

use crate::anchor::SourceAnchor;

/// Parse, semantic, macro, and fatal errors raised while assembling a
/// single source tree.
#[derive(Debug, Error, Clone)]
pub enum AssemblyError {
    #[error("{anchor}: unexpected token: {found}")]
    UnexpectedToken { anchor: SourceAnchor, found: String },

    #[error("{anchor}: unknown opcode '{opcode}'")]
    UnknownOpcode { anchor: SourceAnchor, opcode: String },

    #[error("{anchor}: missing operand")]
    MissingOperand { anchor: SourceAnchor },

    #[error("{anchor}: malformed macro expression: {message}")]
    MalformedExpression { anchor: SourceAnchor, message: String },

    #[error("{anchor}: duplicate label '{name}' (previously defined at {previous})")]
    DuplicateLabel {
        anchor: SourceAnchor,
        previous: SourceAnchor,
        name: String,
    },

    #[error("{anchor}: unresolved label '{name}'")]
    UnresolvedLabel { anchor: SourceAnchor, name: String },

    #[error("{anchor}: import not found: '{path}' (searched: {searched:?})")]
    ImportNotFound {
        anchor: SourceAnchor,
        path: String,
        searched: Vec<String>,
    },

    #[error("{anchor}: alias '{name}' already bound to a different file ({existing})")]
    AliasConflict {
        anchor: SourceAnchor,
        existing: String,
        name: String,
    },

    #[error("{anchor}: operand {value} out of range [{min}..{max}] for {field}")]
    OutOfRange {
        anchor: SourceAnchor,
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{anchor}: block exceeds 64k instruction boundary")]
    BlockSizeExceeded { anchor: SourceAnchor },

    #[error("{anchor}: exception during macro evaluation: {message}")]
    MacroException {
        anchor: SourceAnchor,
        message: String,
    },

    #[error("{anchor}: external file modified while unsaved")]
    SourceModified { anchor: SourceAnchor },

    #[error("unreadable import '{path}': {message}")]
    UnreadableImport { path: String, message: String },

    #[error("error threshold ({threshold}) exceeded; aborting assembly")]
    ThresholdExceeded { threshold: usize },
}

impl AssemblyError {
    /// The primary anchor this error should be reported against, when
    /// the variant has one. Fatal, file-level errors (unreadable
    /// import, threshold) have no source anchor.
    pub fn primary_anchor(&self) -> Option<&SourceAnchor> {
        match self {
            AssemblyError::UnexpectedToken { anchor, .. }
            | AssemblyError::UnknownOpcode { anchor, .. }
            | AssemblyError::MissingOperand { anchor }
            | AssemblyError::MalformedExpression { anchor, .. }
            | AssemblyError::DuplicateLabel { anchor, .. }
            | AssemblyError::UnresolvedLabel { anchor, .. }
            | AssemblyError::ImportNotFound { anchor, .. }
            | AssemblyError::AliasConflict { anchor, .. }
            | AssemblyError::OutOfRange { anchor, .. }
            | AssemblyError::BlockSizeExceeded { anchor }
            | AssemblyError::MacroException { anchor, .. }
            | AssemblyError::SourceModified { anchor } => Some(anchor),
            AssemblyError::UnreadableImport { .. } | AssemblyError::ThresholdExceeded { .. } => {
                None
            }
        }
    }

    /// True for the subset of errors that abort assembly immediately
    /// instead of accumulating.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AssemblyError::SourceModified { .. }
                | AssemblyError::UnreadableImport { .. }
                | AssemblyError::ThresholdExceeded { .. }
        )
    }
}

/// Errors surfaced from the serial wire protocol.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to open serial port: {0}")]
    OpenFailed(String),

    #[error("serial read error: {0}")]
    Read(#[source] std::io::Error),

    #[error("serial write error: {0}")]
    Write(#[source] std::io::Error),

    #[error("response from unknown axis {axis}")]
    UnknownAxis { axis: u8 },

    #[error("axis {axis} reported a PIC error")]
    PicError { axis: u8 },

    #[error("axis {axis} reported an FPGA error")]
    FpgaError { axis: u8 },

    #[error("axis {axis} PC {reported} diverged from expected {expected} (+/- {chain_length})")]
    PcDivergence {
        axis: u8,
        reported: u16,
        expected: u16,
        chain_length: u8,
    },

    #[error("axis {axis} exceeded the no-response limit ({limit})")]
    NoResponse { axis: u8, limit: u32 },

    #[error("malformed response: expected {expected} bytes, got {actual}")]
    MalformedResponse { expected: usize, actual: usize },

    #[error("chain group of {size} instructions does not fit the 1..4 word RUN payload")]
    InvalidChainGroup { size: usize },

    #[error("flash programming fault: {0:02x?}")]
    FlashFault(Vec<u8>),

    #[error("read timed out")]
    Timeout,
}

/// Suggested recovery action a notifier (§6) can offer the operator
/// alongside a `WireError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    Estop,
    Continue,
    Disconnect,
}

/// Errors from the public `Controller` API that are not themselves
/// wire errors (invalid state transitions, not connected, etc).
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("controller is not connected")]
    NotConnected,

    #[error("invalid transition: {action} while {state}")]
    InvalidTransition { action: String, state: String },

    #[error("no object code has been assembled")]
    NoObjectCode,
}

pub type AssemblyResult<T> = std::result::Result<T, AssemblyError>;
pub type WireResult<T> = std::result::Result<T, WireError>;
pub type ControllerResult<T> = std::result::Result<T, ControllerError>;
