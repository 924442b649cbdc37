//! Statement parser.
//!
//! Dispatch is table-driven: two dictionaries keyed by lowercase
//! opcode, one entered when the first identifier is an axis name
//! (X/Y/Z/W), one for everything else. Each entry is a small parsing
//! function rather than a generic matcher-combinator DSL — the
//! matcher kinds (keyword, primitive, label-ref, axis-mask,
//! alternative map, optional group, emit, call) are still all
//! present, just inlined into each opcode's parse function instead
//! of being built from shared combinator objects, the way `em68k`'s
//! own `parser.rs` inlines its bit-field extraction per opcode rather
//! than building a combinator library for it.

use std::path::PathBuf;

use crate::anchor::SourceAnchor;
use crate::error::AssemblyError;
use crate::fields::{Axis, AxisMask, CompareState, IfFlag};
use crate::instructions::{BranchTarget, Instruction, OutState};

use super::macros::MacroEvaluator;
use super::token::{strip_comment, tokenize_line, Token};

/// One parsed statement, or a label definition, or nothing (blank
/// line / end of macro block bookkeeping handled by the caller).
pub enum Statement {
    Label(String),
    Instructions(Vec<Instruction>),
    Import { path: String, alias: Option<String> },
    Empty,
}

/// Parses a single already-comment-stripped source line into a
/// `Statement`, given the anchor to stamp onto any instructions it
/// produces. `evaluator`, if present, is consulted whenever an operand
/// position holds a `{ ... }` inline expression instead of a literal.
pub fn parse_line(
    raw_line: &str,
    anchor: &SourceAnchor,
    evaluator: Option<&dyn MacroEvaluator>,
) -> Result<Statement, AssemblyError> {
    let line = strip_comment(raw_line);
    let tokens = tokenize_line(line);
    let mut cursor = Cursor::new(&tokens, anchor.clone(), evaluator);

    if cursor.is_newline() {
        return Ok(Statement::Empty);
    }

    // `name:` label definition.
    if let Token::Ident(name) = cursor.peek().clone() {
        if cursor.peek_at(1) == Some(&Token::Punct(':')) {
            cursor.advance();
            cursor.advance();
            return Ok(Statement::Label(name));
        }
    }

    if let Token::Ident(word) = cursor.peek().clone() {
        if word.eq_ignore_ascii_case("import") {
            return parse_import(&mut cursor);
        }
        if let Some(axis) = Axis::from_letter(word.chars().next().unwrap_or(' ')).filter(|_| word.len() == 1) {
            cursor.advance();
            return parse_axis_first(axis, &mut cursor).map(Statement::Instructions);
        }
        return parse_base(&word, &mut cursor).map(Statement::Instructions);
    }

    Err(AssemblyError::UnexpectedToken {
        anchor: anchor.clone(),
        found: format!("{:?}", cursor.peek()),
    })
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    anchor: SourceAnchor,
    evaluator: Option<&'a dyn MacroEvaluator>,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token], anchor: SourceAnchor, evaluator: Option<&'a dyn MacroEvaluator>) -> Self {
        Cursor {
            tokens,
            pos: 0,
            anchor,
            evaluator,
        }
    }

    /// Evaluate a `{ ... }` inline expression via the configured macro
    /// evaluator, reporting a `MalformedExpression` if none is wired
    /// in or if the evaluator itself raises.
    fn eval_brace(&self, expr: &str) -> Result<super::macros::ExprValue, AssemblyError> {
        let evaluator = self.evaluator.ok_or_else(|| AssemblyError::MalformedExpression {
            anchor: self.anchor.clone(),
            message: "no macro evaluator configured for inline expression".into(),
        })?;
        evaluator.eval_inline(expr).map_err(|exc| AssemblyError::MalformedExpression {
            anchor: self.anchor.clone(),
            message: exc.message,
        })
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Newline)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Newline);
        self.pos += 1;
        t
    }

    fn is_newline(&self) -> bool {
        matches!(self.peek(), Token::Newline)
    }

    fn expect_ident(&mut self) -> Result<String, AssemblyError> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            other => Err(self.unexpected(other)),
        }
    }

    fn eat_keyword(&mut self, word: &str) -> Result<(), AssemblyError> {
        match self.advance() {
            Token::Ident(s) if s.eq_ignore_ascii_case(word) => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    /// Consume `+`/`-` merged with a following int, or a bare int.
    fn expect_signed_int(&mut self) -> Result<i64, AssemblyError> {
        match self.advance() {
            Token::Punct('+') => self.expect_int(),
            Token::Punct('-') => self.expect_int().map(|v| -v),
            Token::Int(v) => Ok(v),
            Token::Brace(expr) => self
                .eval_brace(&expr)?
                .as_int()
                .ok_or_else(|| AssemblyError::MalformedExpression {
                    anchor: self.anchor.clone(),
                    message: format!("expected an integer, got `{{{}}}`", expr),
                }),
            other => Err(self.unexpected(other)),
        }
    }

    fn expect_int(&mut self) -> Result<i64, AssemblyError> {
        match self.advance() {
            Token::Int(v) => Ok(v),
            Token::Brace(expr) => self
                .eval_brace(&expr)?
                .as_int()
                .ok_or_else(|| AssemblyError::MalformedExpression {
                    anchor: self.anchor.clone(),
                    message: format!("expected an integer, got `{{{}}}`", expr),
                }),
            other => Err(self.unexpected(other)),
        }
    }

    fn expect_float(&mut self) -> Result<f64, AssemblyError> {
        match self.advance() {
            Token::Float(v) => Ok(v),
            Token::Int(v) => Ok(v as f64),
            Token::Brace(expr) => self
                .eval_brace(&expr)?
                .as_float()
                .ok_or_else(|| AssemblyError::MalformedExpression {
                    anchor: self.anchor.clone(),
                    message: format!("expected a number, got `{{{}}}`", expr),
                }),
            other => Err(self.unexpected(other)),
        }
    }

    fn expect_string(&mut self) -> Result<String, AssemblyError> {
        match self.advance() {
            Token::Str(v) => Ok(v),
            other => Err(self.unexpected(other)),
        }
    }

    /// Label-ref matcher: a qualified name `name(.name)*`.
    fn expect_label_ref(&mut self) -> Result<String, AssemblyError> {
        self.expect_ident()
    }

    /// Axis-mask matcher: a comma list of axis names.
    fn expect_axis_mask(&mut self) -> Result<AxisMask, AssemblyError> {
        let mut mask = AxisMask::empty();
        loop {
            let word = self.expect_ident()?;
            let axis = Axis::from_letter(word.chars().next().unwrap_or(' '))
                .filter(|_| word.len() == 1)
                .ok_or_else(|| AssemblyError::UnexpectedToken {
                    anchor: self.anchor.clone(),
                    found: word.clone(),
                })?;
            mask |= AxisMask::from_axes([axis]);
            if matches!(self.peek(), Token::Punct(',')) {
                self.advance();
                continue;
            }
            break;
        }
        Ok(mask)
    }

    fn unexpected(&self, tok: Token) -> AssemblyError {
        AssemblyError::UnexpectedToken {
            anchor: self.anchor.clone(),
            found: format!("{:?}", tok),
        }
    }

    fn range_error(&self, field: &str, value: i64, min: i64, max: i64) -> AssemblyError {
        AssemblyError::OutOfRange {
            anchor: self.anchor.clone(),
            field: field.to_string(),
            value,
            min,
            max,
        }
    }
}

fn parse_import(cursor: &mut Cursor) -> Result<Statement, AssemblyError> {
    cursor.advance(); // 'import'
    let path = cursor.expect_string()?;
    let alias = if let Token::Ident(word) = cursor.peek().clone() {
        if word.eq_ignore_ascii_case("as") {
            cursor.advance();
            Some(cursor.expect_ident()?)
        } else {
            None
        }
    } else {
        None
    };
    Ok(Statement::Import { path, alias })
}

fn parse_axis_first(axis: Axis, cursor: &mut Cursor) -> Result<Vec<Instruction>, AssemblyError> {
    let anchor = cursor.anchor.clone();

    // `axis +N` / `axis -N` / `axis N` move, chainable with `,`.
    if matches!(cursor.peek(), Token::Punct('+') | Token::Punct('-') | Token::Int(_)) {
        let mut out = Vec::new();
        loop {
            let (relative, amount) = match cursor.peek().clone() {
                Token::Punct('+') => {
                    cursor.advance();
                    (true, cursor.expect_int()?)
                }
                Token::Punct('-') => {
                    cursor.advance();
                    (true, -cursor.expect_int()?)
                }
                Token::Int(v) => {
                    cursor.advance();
                    (false, v)
                }
                other => return Err(cursor.unexpected(other)),
            };
            if relative && !(-0x7F_FFFF..=0x7F_FFFF).contains(&amount) {
                return Err(cursor.range_error("relative move amount", amount, -0x7F_FFFF, 0x7F_FFFF));
            }
            if !relative && !(0..=0x00FF_FFFF).contains(&amount) {
                return Err(cursor.range_error("move amount", amount, 0, 0x00FF_FFFF));
            }
            let chain = matches!(cursor.peek(), Token::Punct(','));
            out.push(Instruction::Move {
                anchor: anchor.clone(),
                axis,
                relative,
                amount: amount as i32,
                chain,
            });
            if chain {
                cursor.advance();
                // Expect the next token to start with the same (or
                // another) axis letter for the chained instruction.
                let word = cursor.expect_ident()?;
                let next_axis = Axis::from_letter(word.chars().next().unwrap_or(' '))
                    .filter(|_| word.len() == 1)
                    .ok_or_else(|| AssemblyError::UnexpectedToken {
                        anchor: anchor.clone(),
                        found: word.clone(),
                    })?;
                return chain_moves(next_axis, cursor, out);
            }
            break;
        }
        return Ok(out);
    }

    let word = cursor.expect_ident()?;
    match word.to_ascii_lowercase().as_str() {
        "velocity" => {
            let v = cursor.expect_float_or_int_u16("velocity", 0, 0xFFFF)?;
            Ok(vec![Instruction::Velocity { anchor, axis, value: v }])
        }
        "acceleration" => {
            let v = cursor.expect_float_or_int_u16("acceleration", 0, 0xFFFF)?;
            Ok(vec![Instruction::Acceleration { anchor, axis, value: v }])
        }
        "speed" => {
            cursor.eat_keyword("control")?;
            let v = cursor.expect_int()?;
            if !(-0x80_0000..=0x7F_FFFF).contains(&v) {
                return Err(cursor.range_error("speed control", v, -0x80_0000, 0x7F_FFFF));
            }
            Ok(vec![Instruction::SpeedControl {
                anchor,
                axis,
                value: v as i32,
            }])
        }
        "configure" => {
            if matches!(cursor.peek(), Token::Punct(':')) {
                cursor.advance();
            }
            let amps = cursor.expect_float()?;
            cursor.eat_keyword("amps")?;
            if matches!(cursor.peek(), Token::Punct(',')) {
                cursor.advance();
            }
            cursor.eat_keyword("idle")?;
            cursor.eat_keyword("at")?;
            let percent = cursor.expect_float()?;
            if matches!(cursor.peek(), Token::Punct('%')) {
                cursor.advance();
            }
            cursor.eat_keyword("after")?;
            let secs = cursor.expect_float()?;
            cursor.eat_keyword("seconds")?;
            if !(0.0..=7.0).contains(&amps) {
                return Err(cursor.range_error("configure amps", (amps * 10.0) as i64, 0, 70));
            }
            if !(0.0..=99.0).contains(&percent) {
                return Err(cursor.range_error("configure idle percent", percent as i64, 0, 99));
            }
            if !(0.0..=25.5).contains(&secs) {
                return Err(cursor.range_error("configure idle seconds", (secs * 10.0) as i64, 0, 255));
            }
            Ok(vec![Instruction::Configure {
                anchor,
                axis,
                tenths_amps: (amps * 10.0).round() as u8,
                idle_percent: percent.round() as u8,
                idle_tenths_seconds: (secs * 10.0).round() as u8,
            }])
        }
        "limit" => {
            cursor.eat_keyword("cw")?;
            let v = cursor.expect_int()?;
            if !(0..=0x00FF_FFFF).contains(&v) {
                return Err(cursor.range_error("clockwise limit", v, 0, 0x00FF_FFFF));
            }
            Ok(vec![Instruction::ClockwiseLimit {
                anchor,
                axis,
                value: v as u32,
            }])
        }
        "position" => {
            cursor.eat_keyword("adj")?;
            let v = cursor.expect_signed_int()?;
            if !(-0x8000..=0x7FFF).contains(&v) {
                return Err(cursor.range_error("position adjust", v, -0x8000, 0x7FFF));
            }
            Ok(vec![Instruction::PositionAdjust {
                anchor,
                axis,
                value: v as i16,
            }])
        }
        "zero" => {
            cursor.eat_keyword("offset")?;
            let v = cursor.expect_int()?;
            if !(0..=0x7F_FFFF).contains(&v) {
                return Err(cursor.range_error("zero offset", v, 0, 0x7F_FFFF));
            }
            Ok(vec![Instruction::ZeroOffset {
                anchor,
                axis,
                value: v as u32,
            }])
        }
        "offset" => {
            let v = cursor.expect_int()?;
            if !(0..=0x7F_FFFF).contains(&v) {
                return Err(cursor.range_error("offset", v, 0, 0x7F_FFFF));
            }
            Ok(vec![Instruction::ZeroOffset {
                anchor,
                axis,
                value: v as u32,
            }])
        }
        "compare" => {
            cursor.eat_keyword("value")?;
            let v = cursor.expect_int()?;
            if !(0..=0x00FF_FFFF).contains(&v) {
                return Err(cursor.range_error("compare value", v, 0, 0x00FF_FFFF));
            }
            Ok(vec![Instruction::Compare {
                anchor,
                axis,
                value: v as u32,
            }])
        }
        "out" => {
            let n = cursor.expect_int()?;
            let state = parse_out_state(cursor)?;
            if !(1..=3).contains(&n) {
                return Err(cursor.range_error("output number", n, 1, 3));
            }
            Ok(vec![Instruction::Out {
                anchor,
                axis,
                output: n as u8,
                state,
            }])
        }
        "out1" | "out2" | "out3" => {
            let n = word.as_bytes()[3] - b'0';
            let state = parse_out_state(cursor)?;
            Ok(vec![Instruction::Out {
                anchor,
                axis,
                output: n,
                state,
            }])
        }
        other => Err(AssemblyError::UnknownOpcode {
            anchor,
            opcode: other.to_string(),
        }),
    }
}

/// Continue parsing a chained move group (`x+1000, y+2000`): each
/// subsequent entry is `<axis> <+-N>` separated by commas, the last
/// one clears the chain bit.
fn chain_moves(
    first_axis: Axis,
    cursor: &mut Cursor,
    mut acc: Vec<Instruction>,
) -> Result<Vec<Instruction>, AssemblyError> {
    let anchor = cursor.anchor.clone();
    let mut axis = first_axis;
    loop {
        let (relative, amount) = match cursor.peek().clone() {
            Token::Punct('+') => {
                cursor.advance();
                (true, cursor.expect_int()?)
            }
            Token::Punct('-') => {
                cursor.advance();
                (true, -cursor.expect_int()?)
            }
            Token::Int(v) => {
                cursor.advance();
                (false, v)
            }
            other => return Err(cursor.unexpected(other)),
        };
        let chain = matches!(cursor.peek(), Token::Punct(','));
        acc.push(Instruction::Move {
            anchor: anchor.clone(),
            axis,
            relative,
            amount: amount as i32,
            chain,
        });
        if !chain {
            break;
        }
        cursor.advance();
        let word = cursor.expect_ident()?;
        axis = Axis::from_letter(word.chars().next().unwrap_or(' '))
            .filter(|_| word.len() == 1)
            .ok_or_else(|| AssemblyError::UnexpectedToken {
                anchor: anchor.clone(),
                found: word.clone(),
            })?;
    }
    Ok(acc)
}

fn parse_out_state(cursor: &mut Cursor) -> Result<OutState, AssemblyError> {
    let word = cursor.expect_ident()?;
    match word.to_ascii_lowercase().as_str() {
        "off" => Ok(OutState::Off),
        "on" => Ok(OutState::On),
        "br" => Ok(OutState::Br),
        "rs" => Ok(OutState::Rs),
        "err" => Ok(OutState::Err),
        other => Err(AssemblyError::UnexpectedToken {
            anchor: cursor.anchor.clone(),
            found: other.to_string(),
        }),
    }
}

impl<'a> Cursor<'a> {
    fn expect_float_or_int_u16(&mut self, field: &str, min: i64, max: i64) -> Result<u16, AssemblyError> {
        let v = self.expect_float()?;
        let v = v.round() as i64;
        if !(min..=max).contains(&v) {
            return Err(self.range_error(field, v, min, max));
        }
        Ok(v as u16)
    }
}

fn parse_base(word: &str, cursor: &mut Cursor) -> Result<Vec<Instruction>, AssemblyError> {
    let anchor = cursor.anchor.clone();
    match word.to_ascii_lowercase().as_str() {
        "goto" => {
            let target = BranchTarget::Pending(cursor.expect_label_ref()?);
            let mut loop_count = 0i64;
            if matches!(cursor.peek(), Token::Punct(',')) {
                cursor.advance();
                cursor.eat_keyword("loop")?;
                loop_count = cursor.expect_int()?;
                cursor.eat_keyword("times")?;
            }
            if !(0..=255).contains(&loop_count) {
                return Err(cursor.range_error("loop count", loop_count, 0, 255));
            }
            Ok(vec![Instruction::Goto {
                anchor,
                target,
                loop_count: loop_count as u8,
            }])
        }
        "call" => {
            let target = BranchTarget::Pending(cursor.expect_label_ref()?);
            Ok(vec![Instruction::Call { anchor, target }])
        }
        "return" => Ok(vec![Instruction::Return { anchor }]),
        "if" => {
            let axis_word = cursor.expect_ident()?;
            let axis = Axis::from_letter(axis_word.chars().next().unwrap_or(' '))
                .filter(|_| axis_word.len() == 1)
                .ok_or_else(|| AssemblyError::UnexpectedToken {
                    anchor: anchor.clone(),
                    found: axis_word.clone(),
                })?;
            let flag_word = cursor.expect_ident()?;
            let flag = IfFlag::from_keyword(&flag_word).ok_or_else(|| AssemblyError::UnexpectedToken {
                anchor: anchor.clone(),
                found: flag_word.clone(),
            })?;
            cursor.eat_keyword("is")?;
            let state_word = cursor.expect_ident_or_punct()?;
            let state = CompareState::from_keyword(&state_word.to_ascii_lowercase()).ok_or_else(|| AssemblyError::UnexpectedToken {
                anchor: anchor.clone(),
                found: state_word.clone(),
            })?;
            if matches!(cursor.peek(), Token::Ident(w) if w.eq_ignore_ascii_case("compare")) {
                cursor.advance();
            }
            cursor.eat_keyword("goto")?;
            let target = BranchTarget::Pending(cursor.expect_label_ref()?);
            Ok(vec![Instruction::If {
                anchor,
                axis,
                flag,
                state,
                target,
            }])
        }
        "wait" => {
            let secs = cursor.expect_float()?;
            cursor.eat_keyword("seconds")?;
            if !(0.0..=65.535).contains(&secs) {
                return Err(cursor.range_error("wait seconds", (secs * 1000.0) as i64, 0, 65535));
            }
            Ok(vec![Instruction::Wait {
                anchor,
                millis: (secs * 1000.0).round() as u16,
            }])
        }
        "moving" => {
            cursor.eat_keyword("average")?;
            let axes = cursor.expect_axis_mask()?;
            let n = cursor.expect_int()?;
            cursor.eat_keyword("samples")?;
            if !(0..=127).contains(&n) {
                return Err(cursor.range_error("moving average samples", n, 0, 127));
            }
            Ok(vec![Instruction::MovingAverage {
                anchor,
                axes,
                samples: n as u8,
            }])
        }
        "analog" => {
            cursor.eat_keyword("inputs")?;
            cursor.eat_keyword("to")?;
            let axes = cursor.expect_axis_mask()?;
            Ok(vec![Instruction::AnalogInputsTo { anchor, axes }])
        }
        "vector" => {
            let word = cursor.expect_ident()?; // axes|axis
            if !word.eq_ignore_ascii_case("axes") && !word.eq_ignore_ascii_case("axis") {
                return Err(cursor.unexpected(Token::Ident(word)));
            }
            let word = cursor.expect_ident()?; // are|is
            if !word.eq_ignore_ascii_case("are") && !word.eq_ignore_ascii_case("is") {
                return Err(cursor.unexpected(Token::Ident(word)));
            }
            let axes = cursor.expect_axis_mask()?;
            Ok(vec![Instruction::VectorAxes { anchor, axes }])
        }
        "respos" => {
            let axes = cursor.expect_axis_mask()?;
            Ok(vec![Instruction::RespPos { anchor, axes }])
        }
        "home" => {
            let mut out = Vec::new();
            loop {
                let axis_word = cursor.expect_ident()?;
                let axis = Axis::from_letter(axis_word.chars().next().unwrap_or(' '))
                    .filter(|_| axis_word.len() == 1)
                    .ok_or_else(|| AssemblyError::UnexpectedToken {
                        anchor: anchor.clone(),
                        found: axis_word.clone(),
                    })?;
                let chain = matches!(cursor.peek(), Token::Punct(','));
                out.push(Instruction::Home {
                    anchor: anchor.clone(),
                    axis,
                    chain,
                });
                if chain {
                    cursor.advance();
                    continue;
                }
                break;
            }
            Ok(out)
        }
        "jog" => {
            let axes = cursor.expect_axis_mask()?;
            Ok(vec![Instruction::Jog { anchor, axes }])
        }
        other => Err(AssemblyError::UnknownOpcode {
            anchor,
            opcode: other.to_string(),
        }),
    }
}

impl<'a> Cursor<'a> {
    fn expect_ident_or_punct(&mut self) -> Result<String, AssemblyError> {
        match self.advance() {
            Token::Ident(s) => Ok(s),
            Token::Punct(c) => Ok(c.to_string()),
            other => Err(self.unexpected(other)),
        }
    }
}

/// Resolve the canonical import path string from a parsed `import`
/// statement's raw `path`, relative to `base_dir` when not absolute.
/// Actual search-path expansion lives in `crate::config`; this just
/// shapes the result into a `PathBuf` the assembler can canonicalize.
pub fn import_target(base_dir: &std::path::Path, raw: &str) -> PathBuf {
    let p = std::path::Path::new(raw);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::macros::{ExprValue, MacroException, MacroSink};
    use std::path::PathBuf;
    use std::rc::Rc;

    fn anchor() -> SourceAnchor {
        SourceAnchor::synthetic(Rc::new(PathBuf::from("<test>")))
    }

    /// A stub evaluator returning a fixed value for every inline
    /// expression, standing in for whatever host-language evaluator
    /// the `cli` binary wires in.
    struct ConstEvaluator(ExprValue);

    impl MacroEvaluator for ConstEvaluator {
        fn evaluate(
            &self,
            _dialect: &str,
            _body: &str,
            _sink: &mut dyn MacroSink,
        ) -> Result<(), MacroException> {
            Ok(())
        }

        fn eval_inline(&self, _expr: &str) -> Result<ExprValue, MacroException> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn parses_minimal_move_sequence() {
        let a = anchor();
        let configure = parse_line("x configure: 4 amps, idle at 50% after 1 seconds", &a, None).unwrap();
        let velocity = parse_line("x velocity 300", &a, None).unwrap();
        let mv = parse_line("x+1000", &a, None).unwrap();
        let Statement::Instructions(insns) = configure else { panic!() };
        assert_eq!(insns.len(), 1);
        let Statement::Instructions(insns) = velocity else { panic!() };
        assert!(matches!(insns[0], Instruction::Velocity { value: 300, .. }));
        let Statement::Instructions(insns) = mv else { panic!() };
        assert!(matches!(
            insns[0],
            Instruction::Move {
                relative: true,
                amount: 1000,
                ..
            }
        ));
    }

    #[test]
    fn parses_homing_loop() {
        let a = anchor();
        let Statement::Instructions(home) = parse_line("home x", &a, None).unwrap() else { panic!() };
        assert!(matches!(home[0], Instruction::Home { axis: Axis::X, .. }));
        let Statement::Instructions(goto) = parse_line("goto L, loop 3 times", &a, None).unwrap() else {
            panic!()
        };
        assert!(matches!(
            goto[0],
            Instruction::Goto { loop_count: 3, .. }
        ));
        let Statement::Label(name) = parse_line("L:", &a, None).unwrap() else { panic!() };
        assert_eq!(name, "L");
    }

    #[test]
    fn parses_chained_vector_move() {
        let a = anchor();
        let Statement::Instructions(insns) = parse_line("x+1000, y+2000", &a, None).unwrap() else {
            panic!()
        };
        assert_eq!(insns.len(), 2);
        assert!(insns[0].is_chained());
        assert!(!insns[1].is_chained());
    }

    #[test]
    fn out_of_range_wait_is_rejected() {
        let a = anchor();
        let err = parse_line("wait 70 seconds", &a, None).unwrap_err();
        assert!(matches!(err, AssemblyError::OutOfRange { .. }));
    }

    #[test]
    fn parses_import_with_alias() {
        let a = anchor();
        let Statement::Import { path, alias } = parse_line("import \"helpers.mot\" as helpers", &a, None).unwrap()
        else {
            panic!()
        };
        assert_eq!(path, "helpers.mot");
        assert_eq!(alias, Some("helpers".to_string()));
    }

    #[test]
    fn parses_if_statement() {
        let a = anchor();
        let Statement::Instructions(insns) = parse_line("if x rdy is on goto done", &a, None).unwrap() else {
            panic!()
        };
        assert!(matches!(
            insns[0],
            Instruction::If {
                axis: Axis::X,
                flag: IfFlag::Rdy,
                state: CompareState::On,
                ..
            }
        ));
    }

    #[test]
    fn inline_expression_is_evaluated_via_macro_evaluator() {
        let a = anchor();
        let evaluator = ConstEvaluator(ExprValue::Float(0.25));
        let Statement::Instructions(insns) =
            parse_line("wait { period / 4 } seconds", &a, Some(&evaluator as &dyn MacroEvaluator))
                .unwrap()
        else {
            panic!()
        };
        assert!(matches!(insns[0], Instruction::Wait { millis: 250, .. }));
    }

    #[test]
    fn inline_expression_without_evaluator_is_malformed() {
        let a = anchor();
        let err = parse_line("wait { period / 4 } seconds", &a, None).unwrap_err();
        assert!(matches!(err, AssemblyError::MalformedExpression { .. }));
    }
}
