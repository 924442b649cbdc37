//! Motion-control toolchain core: a two-pass assembler for a
//! stepper-motor motion language, and a device controller that drives
//! the assembled code over a chained serial bus.

mod anchor;
mod error;
mod fields;
mod instructions;
mod codeblock;
mod namespace;
mod config;
pub mod wire;
mod device_table;

pub mod assembler;
pub mod controller;

pub use anchor::{Mark, SourceAnchor, SourceBuffer};
pub use codeblock::{Breakpoint, CodeBlock, Label};
pub use config::{AssemblerConfig, OpenedSource, PathExpander, SearchPathEntry, SourceProvider};
pub use controller::{Controller, ControllerState, StepMode};
pub use device_table::{DeviceRecord, DeviceTable};
pub use error::{
    AssemblyError, AssemblyResult, ControllerError, ControllerResult, RecoveryAction, WireError,
    WireResult,
};
pub use fields::{Axis, AxisMask, CompareState, IfFlag, SignMagnitude16};
pub use instructions::{BranchTarget, Instruction, OpCode, OutState};
pub use namespace::{Namespace, NamespaceRef, ObjectCode};
