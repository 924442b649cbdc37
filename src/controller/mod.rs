//! The device controller: run/step/pause state machine, breakpoints,
//! and the glue between `ObjectCode`, `DeviceTable` and a `Transport`
//!, grounded on `em68k`'s `Cpu` driving loop in
//! spirit — a tagged-state machine stepped by an outer caller rather
//! than a free-running emulator, since here the actual stepping
//! happens on hardware, not locally.

pub mod flash;
pub mod io_loop;
pub mod transport;

use std::collections::HashSet;
use std::time::Duration;

use crate::codeblock::Breakpoint;
use crate::device_table::DeviceTable;
use crate::error::{ControllerError, ControllerResult, WireError};
use crate::fields::Axis;
use crate::instructions::Instruction;
use crate::namespace::ObjectCode;
use crate::wire::Command;

use self::flash::FlashProgrammer;
use self::io_loop::IoLoop;
use self::transport::Transport;

/// Controller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    Ready,
    Running,
    /// Paused before running an instruction.
    Hold,
    /// Paused mid-instruction.
    Paused,
}

/// Governs what happens when the currently executing instruction
/// reports completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Stopped,
    RunUntilBreak,
    StepInsn,
    RunUntilBreakOrAddrMatch { target: u16 },
    StepReturn { target: u16 },
    StepCursor { target: u16 },
}

impl StepMode {
    fn target_address(self) -> Option<u16> {
        match self {
            StepMode::RunUntilBreakOrAddrMatch { target }
            | StepMode::StepReturn { target }
            | StepMode::StepCursor { target } => Some(target),
            _ => None,
        }
    }
}

/// High-level run/step/pause state machine for one axis chain. Owns
/// the `ObjectCode`, breakpoint set, `DeviceTable`, and the
/// `Transport` once connected.
pub struct Controller {
    state: ControllerState,
    step_mode: StepMode,
    /// Set when a pause arrives after the device has already reported
    /// completion; replayed on the next Paused->Running edge instead
    /// of being lost.
    deferred_done: bool,
    /// Consumed, non-recursive continuation flag the I/O loop samples
    /// on its next tick instead of the controller recursing into
    /// itself.
    send_next: bool,
    pc: u16,
    object: Option<ObjectCode>,
    breakpoints: Vec<Breakpoint>,
    devices: DeviceTable,
    transport: Option<Box<dyn Transport>>,
    flash: FlashProgrammer,
    io: IoLoop,
}

impl Controller {
    pub fn new() -> Self {
        Controller {
            state: ControllerState::Disconnected,
            step_mode: StepMode::Stopped,
            deferred_done: false,
            send_next: false,
            pc: 0,
            object: None,
            breakpoints: Vec::new(),
            devices: DeviceTable::new(),
            transport: None,
            flash: FlashProgrammer::new(),
            io: IoLoop::new(Duration::from_millis(50)),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    /// Mutable access to the device table, for a host (or a scripted
    /// test) that wants to fold in a broadcast response directly
    /// rather than drive it through a real transport round trip.
    pub fn devices_mut(&mut self) -> &mut DeviceTable {
        &mut self.devices
    }

    /// The connected transport, if any, as a trait object — lets a
    /// caller reach into a concrete transport (e.g. a `DummyChain`) to
    /// queue a scripted response or inspect written frames.
    pub fn transport_mut(&mut self) -> Option<&mut dyn Transport> {
        self.transport.as_deref_mut()
    }

    /// Swap in a freshly assembled image. The "mod-asm" memory
    /// barrier: called foreground-only, between assemblies, never
    /// while the I/O loop holds the controller.
    pub fn load_object(&mut self, object: ObjectCode) {
        self.object = Some(object);
        self.pc = 0;
        self.reproject_breakpoints();
    }

    pub fn connect(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
        self.state = ControllerState::Ready;
    }

    pub fn disconnect(&mut self) {
        self.transport = None;
        self.state = ControllerState::Disconnected;
        self.step_mode = StepMode::Stopped;
    }

    fn require_connected(&mut self) -> ControllerResult<&mut dyn Transport> {
        self.transport
            .as_deref_mut()
            .ok_or(ControllerError::NotConnected)
    }

    /// Emergency stop: always attempts the wire command regardless of
    /// current state, so a wedged controller still makes forward
    /// progress.
    pub fn estop(&mut self) -> ControllerResult<()> {
        if let Some(transport) = self.transport.as_deref_mut() {
            transport.write_frame(&Command::EStop.encode())?;
        }
        self.pc = 0;
        self.state = ControllerState::Ready;
        self.step_mode = StepMode::Stopped;
        self.send_next = false;
        self.deferred_done = false;
        self.devices.reset_offsets();
        Ok(())
    }

    pub fn pause(&mut self) -> ControllerResult<()> {
        match self.state {
            ControllerState::Running => {
                self.require_connected()?.write_frame(&Command::Pause.encode())?;
                self.state = ControllerState::Paused;
                Ok(())
            }
            ControllerState::Ready => {
                self.require_connected()?.write_frame(&Command::Pause.encode())?;
                self.state = ControllerState::Hold;
                Ok(())
            }
            other => Err(ControllerError::InvalidTransition {
                action: "pause".into(),
                state: format!("{other:?}"),
            }),
        }
    }

    pub fn resume(&mut self) -> ControllerResult<()> {
        match self.state {
            ControllerState::Paused => {
                self.require_connected()?.write_frame(&Command::Resume.encode())?;
                self.state = ControllerState::Running;
                if self.deferred_done {
                    self.deferred_done = false;
                    self.on_instruction_done()?;
                }
                Ok(())
            }
            ControllerState::Hold => {
                self.require_connected()?.write_frame(&Command::Resume.encode())?;
                self.state = ControllerState::Ready;
                Ok(())
            }
            other => Err(ControllerError::InvalidTransition {
                action: "resume".into(),
                state: format!("{other:?}"),
            }),
        }
    }

    /// Begin running with the given stepping policy.
    /// Only valid from Ready.
    pub fn run(&mut self, step_mode: StepMode) -> ControllerResult<()> {
        self.require_connected()?;
        if self.state != ControllerState::Ready {
            return Err(ControllerError::InvalidTransition {
                action: "run".into(),
                state: format!("{:?}", self.state),
            });
        }
        self.step_mode = step_mode;
        self.state = ControllerState::Running;
        self.send_next = true;
        Ok(())
    }

    pub fn step_one(&mut self) -> ControllerResult<()> {
        self.run(StepMode::StepInsn)
    }

    pub fn step_return(&mut self, target: u16) -> ControllerResult<()> {
        self.run(StepMode::StepReturn { target })
    }

    pub fn step_cursor(&mut self, target: u16) -> ControllerResult<()> {
        self.run(StepMode::StepCursor { target })
    }

    /// Called by the I/O loop (or directly, in single-threaded tests)
    /// once the device has reported its current instruction complete.
    /// Applies the stepping policy in `self.step_mode`.
    /// Never calls back into `run`/`send_command` recursively — it
    /// only sets `send_next`, consumed on the caller's next tick.
    pub fn on_instruction_done(&mut self) -> ControllerResult<()> {
        if self.state == ControllerState::Paused {
            self.deferred_done = true;
            return Ok(());
        }
        let at_breakpoint = self.breakpoints.iter().any(|b| b.address == self.pc);
        let stop = match self.step_mode {
            StepMode::Stopped => true,
            StepMode::StepInsn => true,
            StepMode::RunUntilBreak => at_breakpoint,
            StepMode::RunUntilBreakOrAddrMatch { target } => {
                at_breakpoint || self.pc == target
            }
            StepMode::StepReturn { target } | StepMode::StepCursor { target } => {
                at_breakpoint || self.pc == target
            }
        };
        if stop {
            self.state = ControllerState::Ready;
            self.step_mode = StepMode::Stopped;
            self.send_next = false;
        } else {
            self.send_next = true;
        }
        Ok(())
    }

    /// Consume the "send next instruction" flag the I/O loop polls
    /// every tick. Returns `true` exactly once
    /// per flag raise.
    pub fn take_send_next(&mut self) -> bool {
        std::mem::replace(&mut self.send_next, false)
    }

    pub fn current_instruction(&self) -> Option<&Instruction> {
        self.object.as_ref().and_then(|o| o.get(self.pc))
    }

    /// Dispatch the current PC's instruction (and, if it chains, the
    /// rest of its group) to the wire as one `RUN` command, then
    /// either skip, short-query, or long-query per the group's
    /// profile.
    pub fn dispatch_current(&mut self) -> ControllerResult<()> {
        let object = self.object.as_ref().ok_or(ControllerError::NoObjectCode)?;
        let group: Vec<Instruction> = object.chain_group(self.pc).into_iter().cloned().collect();
        let representative = group.last().cloned().ok_or(ControllerError::NoObjectCode)?;
        let words: Vec<u32> = group.iter().map(Instruction::encode).collect();
        let group_len = group.len() as u16;

        let transport = self.require_connected()?;
        transport.write_frame(&crate::wire::encode_run(&words)?)?;

        let (instant, next_hint) = representative.is_instant();
        if instant {
            self.pc = if next_hint >= 0 {
                next_hint as u16
            } else {
                self.pc.wrapping_add(group_len)
            };
            return self.on_instruction_done();
        }
        if representative.is_fast() {
            self.io.short_query(
                self.transport.as_deref_mut().expect("connected"),
                &mut self.devices,
            )?;
        } else {
            self.io.long_query(
                self.transport.as_deref_mut().expect("connected"),
                &mut self.devices,
                &representative,
            )?;
        }
        // The device-reported PC is authoritative (it catches real PC
        // divergence); fall back to the locally-computed next address
        // only if that axis has never answered.
        let axis = axis_of(&representative);
        let record = self.devices.get(axis);
        self.pc = if record.discovered {
            record.pc
        } else {
            self.pc.wrapping_add(group_len)
        };
        self.on_instruction_done()
    }

    /// Toggle a breakpoint at `address`, anchored to `anchor` so it
    /// survives re-assembly.
    pub fn toggle_breakpoint(&mut self, anchor: crate::anchor::SourceAnchor, address: u16) {
        if let Some(pos) = self.breakpoints.iter().position(|b| b.address == address) {
            self.breakpoints.remove(pos);
        } else {
            self.breakpoints.push(Breakpoint::new(anchor, address));
        }
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Reproject every breakpoint's source line onto the freshly
    /// located `ObjectCode`; breakpoints whose line no longer maps to
    /// an instruction are dropped, duplicate resulting addresses are
    /// collapsed.
    fn reproject_breakpoints(&mut self) {
        let Some(object) = self.object.as_ref() else {
            self.breakpoints.clear();
            return;
        };
        let mut seen = HashSet::new();
        self.breakpoints.retain_mut(|bp| {
            match object.find_by_line(bp.anchor.file(), bp.anchor.line()) {
                Some(address) if seen.insert(address) => {
                    bp.address = address;
                    true
                }
                _ => false,
            }
        });
    }

    /// Flash a firmware image to the currently selected axis, driving
    /// `FlashProgrammer` to completion.
    pub fn flash_image(&mut self, image: &[u8], timeout: Duration) -> ControllerResult<()> {
        let transport = self.require_connected()?;
        self.flash.run(transport, image, timeout)?;
        Ok(())
    }

    pub fn request_flash_cancel(&mut self) {
        self.flash.request_cancel();
    }

    pub fn flash_state(&self) -> flash::FlashState {
        self.flash.state()
    }

    /// Low-level escape hatch for firmware-update tooling that needs
    /// FIRMWARE/SETPAGE directly without going through `flash_image`
    ///.
    pub fn send_raw(&mut self, command: Command) -> ControllerResult<()> {
        let transport = self.require_connected()?;
        transport.write_frame(&command.encode())?;
        Ok(())
    }

    pub fn recovery_action(&self, error: &WireError) -> crate::error::RecoveryAction {
        self.devices.recovery_action(error)
    }
}

impl Default for Controller {
    fn default() -> Self {
        Controller::new()
    }
}

/// The axis an instruction targets, for addressing the query that
/// follows its dispatch. Non-axis instructions (GOTO, CALL, RETURN,
/// IF with its own axis field already covered) default to X; the I/O
/// loop's periodic long-poll round-robins every axis regardless.
fn axis_of(insn: &Instruction) -> Axis {
    match insn {
        Instruction::Move { axis, .. }
        | Instruction::Home { axis, .. }
        | Instruction::Out { axis, .. }
        | Instruction::Velocity { axis, .. }
        | Instruction::Acceleration { axis, .. }
        | Instruction::SpeedControl { axis, .. }
        | Instruction::Configure { axis, .. }
        | Instruction::ClockwiseLimit { axis, .. }
        | Instruction::PositionAdjust { axis, .. }
        | Instruction::ZeroOffset { axis, .. }
        | Instruction::Compare { axis, .. }
        | Instruction::If { axis, .. } => *axis,
        _ => Axis::X,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::transport::DummyChain;
    use crate::wire::StatusFlags;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn anchor() -> crate::anchor::SourceAnchor {
        crate::anchor::SourceAnchor::synthetic(Rc::new(PathBuf::from("<test>")))
    }

    fn connected_controller() -> Controller {
        let mut controller = Controller::new();
        controller.connect(Box::new(DummyChain::new()));
        controller
    }

    #[test]
    fn connect_moves_to_ready() {
        let controller = connected_controller();
        assert_eq!(controller.state(), ControllerState::Ready);
    }

    #[test]
    fn run_then_pause_then_resume_round_trips() {
        let mut controller = connected_controller();
        controller.run(StepMode::RunUntilBreak).unwrap();
        assert_eq!(controller.state(), ControllerState::Running);
        controller.pause().unwrap();
        assert_eq!(controller.state(), ControllerState::Paused);
        controller.resume().unwrap();
        assert_eq!(controller.state(), ControllerState::Running);
    }

    #[test]
    fn pause_while_ready_enters_hold_and_resume_returns_to_ready() {
        let mut controller = connected_controller();
        controller.pause().unwrap();
        assert_eq!(controller.state(), ControllerState::Hold);
        controller.resume().unwrap();
        assert_eq!(controller.state(), ControllerState::Ready);
    }

    #[test]
    fn deferred_done_is_replayed_on_resume() {
        let mut controller = connected_controller();
        controller.run(StepMode::StepInsn).unwrap();
        controller.pause().unwrap();
        // device reports completion while paused
        controller.on_instruction_done().unwrap();
        assert_eq!(controller.state(), ControllerState::Paused);
        controller.resume().unwrap();
        // StepInsn always stops after one instruction
        assert_eq!(controller.state(), ControllerState::Ready);
    }

    #[test]
    fn step_insn_drops_to_ready_after_one_instruction() {
        let mut controller = connected_controller();
        controller.run(StepMode::StepInsn).unwrap();
        controller.on_instruction_done().unwrap();
        assert_eq!(controller.state(), ControllerState::Ready);
    }

    #[test]
    fn run_until_break_continues_past_non_breakpoint_pc() {
        let mut controller = connected_controller();
        controller.run(StepMode::RunUntilBreak).unwrap();
        controller.on_instruction_done().unwrap();
        assert_eq!(controller.state(), ControllerState::Running);
        assert!(controller.take_send_next());
    }

    #[test]
    fn run_until_break_stops_at_breakpoint() {
        let mut controller = connected_controller();
        controller.toggle_breakpoint(anchor(), 0);
        controller.run(StepMode::RunUntilBreak).unwrap();
        controller.on_instruction_done().unwrap();
        assert_eq!(controller.state(), ControllerState::Ready);
    }

    #[test]
    fn estop_resets_pc_and_state_even_when_disconnected() {
        let mut controller = Controller::new();
        controller.estop().unwrap();
        assert_eq!(controller.state(), ControllerState::Ready);
        assert_eq!(controller.pc(), 0);
    }

    /// A scripted responder answers QLONG with three axes, DeviceTable
    /// shows X, Y, Z and `n_devs == 3`; an estop then writes
    /// `CMD_ESTOP` (u16 = 0) and clears every device's offset.
    #[test]
    fn wire_round_trip_populates_three_axes_then_estop_clears_offsets() {
        let mut controller = connected_controller();
        let responses = [
            crate::wire::LongQuery { axis: 0, pc: 0, flags: StatusFlags::empty(), position: 0, velocity: 0 },
            crate::wire::LongQuery { axis: 1, pc: 0, flags: StatusFlags::empty(), position: 0, velocity: 0 },
            crate::wire::LongQuery { axis: 2, pc: 0, flags: StatusFlags::empty(), position: 0, velocity: 0 },
        ];
        controller.devices.record_long_broadcast(&responses, true, true);
        assert_eq!(controller.devices().n_devs(), 3);
        assert_eq!(controller.devices().get(Axis::X).axis, Axis::X);
        assert_eq!(controller.devices().get(Axis::Y).axis, Axis::Y);
        assert_eq!(controller.devices().get(Axis::Z).axis, Axis::Z);

        controller.devices.set_position_offset(Axis::X, 42);
        controller.estop().unwrap();
        let frames = if let Some(transport) = controller.transport.as_mut() {
            transport
                .as_any_mut()
                .downcast_mut::<DummyChain>()
                .unwrap()
                .written_frames()
                .to_vec()
        } else {
            Vec::new()
        };
        assert_eq!(frames.last().unwrap(), &Command::EStop.encode());
        assert_eq!(Command::EStop.encode(), vec![0x00, 0x00]);
        assert_eq!(controller.devices().get(Axis::X).position_offset, 0);
    }

    #[test]
    fn toggle_breakpoint_is_idempotent_add_remove() {
        let mut controller = connected_controller();
        controller.toggle_breakpoint(anchor(), 4);
        assert_eq!(controller.breakpoints().len(), 1);
        controller.toggle_breakpoint(anchor(), 4);
        assert!(controller.breakpoints().is_empty());
    }

    #[test]
    fn dispatch_instant_instruction_skips_round_trip() {
        let mut controller = connected_controller();
        let mut object = ObjectCode::new();
        object.push(Instruction::Configure {
            anchor: anchor(),
            axis: Axis::X,
            tenths_amps: 10,
            idle_percent: 50,
            idle_tenths_seconds: 5,
        });
        object.push(Instruction::Return { anchor: anchor() });
        controller.load_object(object);
        controller.run(StepMode::StepInsn).unwrap();
        controller.dispatch_current().unwrap();
        assert_eq!(controller.pc(), 1);
        assert_eq!(controller.state(), ControllerState::Ready);
    }

    #[test]
    fn dispatch_fast_instruction_issues_short_query() {
        let mut controller = connected_controller();
        let mut object = ObjectCode::new();
        object.push(Instruction::Out {
            anchor: anchor(),
            axis: Axis::X,
            output: 1,
            state: crate::instructions::OutState::On,
        });
        controller.load_object(object);
        controller.run(StepMode::StepInsn).unwrap();
        if let Some(transport) = controller.transport.as_mut() {
            let chain = transport
                .as_any_mut()
                .downcast_mut::<DummyChain>()
                .unwrap();
            let mut response = vec![0xAAu8, 0xAA]; // sync
            response.extend_from_slice(&StatusFlags::empty().bits().to_le_bytes());
            response.extend_from_slice(&2u16.to_le_bytes()); // axis 0 pc
            chain.queue_response(response);
        }
        controller.dispatch_current().unwrap();
        assert_eq!(controller.pc(), 2);
    }
}
