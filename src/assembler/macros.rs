//! Macro evaluation environment.
//!
//! The host-language evaluator that runs `{{{ name }}}` blocks is
//! treated as a plug-in, external to this crate; this module only
//! defines the seam it plugs into: a sandboxed context exposing
//! `emit`/`label` callbacks, and a translator from its traceback
//! frames back to source anchors.

use std::collections::HashMap;

use crate::anchor::SourceAnchor;
use crate::instructions::Instruction;

/// One frame of a macro evaluator's exception traceback, as reported
/// by the plugged-in evaluator. `internal_name` is whatever the
/// evaluator calls its compilation unit for this macro block (e.g. a
/// synthesized `<macro:3>` name); the `internal_name -> (file,
/// base_line, tag)` table registered via `MacroRegistry::register`
/// translates it back to a real source anchor.
#[derive(Debug, Clone)]
pub struct TracebackFrame {
    pub internal_name: String,
    pub line_in_block: usize,
}

/// Maps an evaluator's internal compilation-unit names back to the
/// source anchor their block started at, so a caught exception's
/// traceback can be re-expressed as a chain of assembly errors
/// anchored in real source.
#[derive(Default)]
pub struct MacroRegistry {
    blocks: HashMap<String, SourceAnchor>,
}

impl MacroRegistry {
    pub fn new() -> Self {
        MacroRegistry::default()
    }

    pub fn register(&mut self, internal_name: impl Into<String>, opening_anchor: SourceAnchor) {
        self.blocks.insert(internal_name.into(), opening_anchor);
    }

    /// Best-effort translation: a frame whose internal name was never
    /// registered (e.g. it originates from the evaluator's own
    /// standard library) has no real source anchor and is dropped.
    pub fn translate(&self, frame: &TracebackFrame) -> Option<SourceAnchor> {
        self.blocks.get(&frame.internal_name).cloned()
    }
}

/// A pluggable macro evaluator: given the verbatim text inside a `{{{ name ... }}}`
/// block and the sink to emit into, run it and report any uncaught
/// exception. The assembler core never implements one of these
/// itself — the `cli` binary wires in whichever host-language
/// evaluator it embeds.
pub trait MacroEvaluator {
    fn evaluate(
        &self,
        dialect: &str,
        body: &str,
        sink: &mut dyn MacroSink,
    ) -> Result<(), MacroException>;

    /// Evaluate one inline `{ ... }` operand expression in the same
    /// shared environment macro blocks run in, and return its value.
    /// The parser's `Primitive` matcher calls this whenever an operand
    /// position holds a brace-delimited region instead of a literal,
    /// then checks the returned value is the declared type.
    fn eval_inline(&self, expr: &str) -> Result<ExprValue, MacroException>;
}

/// The value an inline `{ ... }` expression evaluates to. The parser
/// checks it against the declared operand type (int, float, or
/// string) and reports a `MalformedExpression` on mismatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl ExprValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ExprValue::Int(v) => Some(*v),
            ExprValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ExprValue::Int(v) => Some(*v as f64),
            ExprValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// The callback surface a plugged-in macro evaluator is given.
/// `emit` appends an instruction to the current namespace's current
/// block; `label` defines a label (auto-naming it if `None`) and
/// returns the name so the macro can emit branches to it.
pub trait MacroSink {
    fn emit(&mut self, instruction: Instruction);
    fn label(&mut self, name: Option<&str>, anchor: SourceAnchor) -> String;
}

/// An evaluation failure reported by the plugged-in macro evaluator,
/// with a traceback already translated where possible. The assembler
/// turns this into one `AssemblyError::MacroException` per frame.
#[derive(Debug, Clone)]
pub struct MacroException {
    pub message: String,
    pub frames: Vec<TracebackFrame>,
}

/// Generates a unique auto-label for anonymous `label()` calls inside
/// macro blocks that don't supply a name.
#[derive(Default)]
pub struct AutoLabelGenerator {
    next: u64,
}

impl AutoLabelGenerator {
    pub fn new() -> Self {
        AutoLabelGenerator::default()
    }

    pub fn next_name(&mut self) -> String {
        let name = format!("__macro_label_{}", self.next);
        self.next += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::rc::Rc;

    #[test]
    fn registry_translates_known_frame() {
        let mut reg = MacroRegistry::new();
        let anchor = SourceAnchor::synthetic(Rc::new(PathBuf::from("prog.mot")));
        reg.register("<macro:3>", anchor.clone());
        let frame = TracebackFrame {
            internal_name: "<macro:3>".into(),
            line_in_block: 2,
        };
        assert!(reg.translate(&frame).is_some());
    }

    #[test]
    fn registry_drops_unknown_frame() {
        let reg = MacroRegistry::new();
        let frame = TracebackFrame {
            internal_name: "<stdlib>".into(),
            line_in_block: 0,
        };
        assert!(reg.translate(&frame).is_none());
    }

    #[test]
    fn auto_label_generator_is_unique() {
        let mut gen = AutoLabelGenerator::new();
        let a = gen.next_name();
        let b = gen.next_name();
        assert_ne!(a, b);
    }
}
