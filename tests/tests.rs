//! Integration tests exercising the assembler and controller together,
//! the way a real caller would: source text in, `ObjectCode` out, then
//! driven against a scripted in-memory transport standing in for the
//! serial bus.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use geckoasm::assembler::{Assembler, AssemblerHost};
use geckoasm::controller::transport::DummyChain;
use geckoasm::controller::{Controller, StepMode};
use geckoasm::wire::{Command, LongQuery, StatusFlags};
use geckoasm::{
    AssemblerConfig, AssemblyError, BranchTarget, Instruction, Mark, ObjectCode, OpenedSource,
    PathExpander, SearchPathEntry, SourceBuffer, SourceProvider,
};

struct MemorySource {
    files: HashMap<PathBuf, String>,
}

struct MemoryBuffer {
    path: PathBuf,
    line: Rc<Cell<usize>>,
}

struct MemoryMark(Rc<Cell<usize>>);

impl Mark for MemoryMark {
    fn line(&self) -> usize {
        self.0.get()
    }
    fn iter(&self) -> usize {
        0
    }
}

impl SourceBuffer for MemoryBuffer {
    fn mark_at(&self, line: usize) -> Box<dyn Mark> {
        self.line.set(line);
        Box::new(MemoryMark(Rc::clone(&self.line)))
    }
    fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceProvider for MemorySource {
    fn open_by_path(&self, path: &Path) -> std::io::Result<OpenedSource> {
        let text = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))?;
        Ok(OpenedSource {
            canonical_path: path.to_path_buf(),
            buffer: Rc::new(MemoryBuffer {
                path: path.to_path_buf(),
                line: Rc::new(Cell::new(0)),
            }),
            text,
        })
    }
}

struct NoopExpander;
impl PathExpander for NoopExpander {
    fn expand(&self, entry: &SearchPathEntry) -> Option<PathBuf> {
        match entry {
            SearchPathEntry::Literal(p) => Some(p.clone()),
            _ => None,
        }
    }
}

fn assemble(text: &str) -> (Option<ObjectCode>, Vec<AssemblyError>) {
    let mut files = HashMap::new();
    files.insert(PathBuf::from("/prog.mot"), text.to_string());
    let source = MemorySource { files };
    let expander = NoopExpander;
    let host = AssemblerHost {
        source_provider: &source,
        path_expander: &expander,
        macro_evaluator: None,
    };
    let asm = Assembler::new(AssemblerConfig::default(), host);
    let report = asm.run(Path::new("/prog.mot"));
    (report.object, report.errors)
}

/// spec.md §8 scenario 1: three instructions, MOVEREL with magnitude
/// 1000 and a positive sign.
#[test]
fn minimal_move_assembles_three_instructions() {
    let (object, errors) = assemble(
        "x configure: 4 amps, idle at 50% after 1 seconds\nx velocity 300\nx+1000\n",
    );
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    let object = object.expect("object code produced");
    assert_eq!(object.len(), 3);
    match object.get(2).unwrap() {
        Instruction::Move { amount, relative, .. } => {
            assert_eq!(*amount, 1000);
            assert!(*relative);
        }
        other => panic!("expected a Move instruction, got {other:?}"),
    }
}

/// spec.md §8 scenario 2: HOME, then a GOTO with a 3x loop count whose
/// branch target resolves to the label placed right after it.
#[test]
fn homing_loop_resolves_forward_label() {
    let (object, errors) = assemble("home x\ngoto L, loop 3 times\nL:\n");
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    let object = object.expect("object code produced");
    assert!(matches!(object.get(0).unwrap(), Instruction::Home { .. }));
    match object.get(1).unwrap() {
        Instruction::Goto { target, loop_count, .. } => {
            assert_eq!(*loop_count, 3);
            assert_eq!(*target, BranchTarget::Resolved(2));
        }
        other => panic!("expected a Goto instruction, got {other:?}"),
    }
}

/// spec.md §8 scenario 3: `vector axes are x, y` compiles to a
/// VECTORAXES instruction followed by one chained group of two
/// MOVERELs, three words total.
#[test]
fn vector_move_compiles_to_one_chained_group() {
    let (object, errors) = assemble("vector axes are x, y\nx+1000, y+2000\n");
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    let object = object.expect("object code produced");
    assert_eq!(object.len(), 3);
    assert!(matches!(object.get(0).unwrap(), Instruction::VectorAxes { .. }));
    let group = object.chain_group(1);
    assert_eq!(group.len(), 2);
    assert!(group[0].is_chained());
    assert!(!group[1].is_chained());
}

/// spec.md §8 scenario 4: an out-of-range operand is reported without
/// producing object code.
#[test]
fn out_of_range_wait_is_rejected() {
    let (object, errors) = assemble("wait 70 seconds\n");
    assert!(object.is_none());
    assert_eq!(errors.len(), 1);
}

/// spec.md §8 scenario 5: a duplicate label is reported with both its
/// primary and original anchors.
#[test]
fn duplicate_label_reports_both_anchors() {
    let (object, errors) = assemble("L:\nwait 1 seconds\nL:\n");
    assert!(object.is_none());
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        AssemblyError::DuplicateLabel { anchor, previous, .. } => {
            assert_eq!(anchor.line(), 2);
            assert_eq!(previous.line(), 0);
        }
        other => panic!("expected DuplicateLabel, got {other:?}"),
    }
}

/// spec.md §8 scenario 6: a scripted responder answers QLONG with
/// three axes; DeviceTable shows X, Y, Z with `n_devs == 3`, and an
/// estop writes CMD_ESTOP (u16 = 0) and clears every offset.
#[test]
fn wire_round_trip_discovers_three_axes_then_estop_clears_offsets() {
    use geckoasm::Axis;

    let mut controller = Controller::new();
    controller.connect(Box::new(DummyChain::new()));

    let responses: Vec<LongQuery> = (0..3u8)
        .map(|axis| LongQuery {
            axis,
            pc: 0,
            flags: StatusFlags::empty(),
            position: 0,
            velocity: 0,
        })
        .collect();
    controller.devices_mut().record_long_broadcast(&responses, true, true);

    assert_eq!(controller.devices().n_devs(), 3);
    assert_eq!(controller.devices().get(Axis::X).axis, Axis::X);
    assert_eq!(controller.devices().get(Axis::Y).axis, Axis::Y);
    assert_eq!(controller.devices().get(Axis::Z).axis, Axis::Z);

    controller.estop().unwrap();
    let chain = dummy_chain(&mut controller);
    assert_eq!(chain.written_frames().last().unwrap(), &Command::EStop.encode());
    assert_eq!(Command::EStop.encode(), vec![0x00, 0x00]);
    assert_eq!(controller.devices().get(Axis::X).position_offset, 0);
}

/// Assembles a short program and runs it against a `DummyChain`: the
/// two instant instructions (CONFIGURE, VELOCITY) advance with no wire
/// round trip at all, and the MOVE that follows is answered by a
/// scripted QLONG reporting the device already at address 3, where a
/// breakpoint stops the run.
#[test]
fn assembled_program_runs_to_completion_against_dummy_chain() {
    let (object, errors) = assemble(
        "x configure: 4 amps, idle at 50% after 1 seconds\nx velocity 300\nx+1000\n",
    );
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    let object = object.expect("object code produced");

    let mut controller = Controller::new();
    controller.connect(Box::new(DummyChain::new()));
    controller.load_object(object);
    controller.toggle_breakpoint(geckoasm::SourceAnchor::synthetic(Rc::new(PathBuf::from("<test>"))), 3);
    controller.run(StepMode::RunUntilBreak).unwrap();

    let mut ticks = 0;
    while controller.current_instruction().is_some() && controller.take_send_next() {
        ticks += 1;
        assert!(ticks < 1_000, "program did not settle");
        if matches!(controller.current_instruction(), Some(Instruction::Move { .. })) {
            // the MOVE needs a long query; report every axis at
            // address 3 so the breakpoint there stops the run.
            let mut response = vec![0xAAu8, 0xAA];
            for _ in 0..4 {
                response.extend_from_slice(&StatusFlags::empty().bits().to_le_bytes());
                response.extend_from_slice(&3u16.to_le_bytes());
                response.extend_from_slice(&geckoasm::wire::encode_position_for_test(0));
                response.extend_from_slice(&0x8000u16.to_le_bytes());
            }
            controller_maybe_chain(&mut controller).unwrap().queue_response(response);
        }
        controller.dispatch_current().unwrap();
    }
    assert_eq!(controller.state(), geckoasm::ControllerState::Ready);
    assert_eq!(controller.pc(), 3);
}

fn dummy_chain(controller: &mut Controller) -> &mut DummyChain {
    controller_maybe_chain(controller).expect("controller connected to a DummyChain")
}

fn controller_maybe_chain(controller: &mut Controller) -> Option<&mut DummyChain> {
    controller.transport_mut().and_then(|t| t.as_any_mut().downcast_mut::<DummyChain>())
}
