//! `Label`, `Breakpoint` and `CodeBlock`.

use crate::anchor::SourceAnchor;
use crate::error::{AssemblyError, AssemblyResult};
use crate::instructions::Instruction;

/// An address-mark with an optional resolved address, plus the
/// (block-index, instruction-index-within-block) pair the locator
/// uses to find and recurse into the block that defines it.
#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub anchor: SourceAnchor,
    address: Option<u16>,
    block_index: usize,
    block_insn_index: usize,
}

impl Label {
    pub fn new(name: impl Into<String>, anchor: SourceAnchor, block_index: usize, block_insn_index: usize) -> Self {
        Label {
            name: name.into(),
            anchor,
            address: None,
            block_index,
            block_insn_index,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.address.is_some()
    }

    pub fn address(&self) -> Option<u16> {
        self.address
    }

    pub fn set_address(&mut self, addr: u16) {
        self.address = Some(addr);
    }

    pub fn block_index(&self) -> usize {
        self.block_index
    }

    pub fn block_insn_index(&self) -> usize {
        self.block_insn_index
    }
}

/// An address-mark whose address is always set; bound to a
/// `SourceAnchor` so it survives edits and is reprojected after
/// reassembly.
#[derive(Debug, Clone)]
pub struct Breakpoint {
    pub anchor: SourceAnchor,
    pub address: u16,
}

impl Breakpoint {
    pub fn new(anchor: SourceAnchor, address: u16) -> Self {
        Breakpoint { anchor, address }
    }
}

/// An ordered list of instructions plus the labels defined within it.
/// A block terminates implicitly at the instruction after the last
/// `is_end_of_block()` instruction.
#[derive(Debug, Default)]
pub struct CodeBlock {
    instructions: Vec<Instruction>,
    /// (name, block_insn_index) pairs recorded as labels are appended;
    /// the owning `Namespace` keeps the name -> `Label` map, this just
    /// remembers insertion order for `locate()`.
    label_positions: Vec<usize>,
    org: Option<u16>,
}

impl CodeBlock {
    pub fn new() -> Self {
        CodeBlock::default()
    }

    pub fn push_instruction(&mut self, insn: Instruction) {
        self.instructions.push(insn);
    }

    /// Record that a label was defined at the current end of this
    /// block (i.e. it denotes the next instruction pushed).
    pub fn mark_label_position(&mut self) -> usize {
        let index = self.instructions.len();
        self.label_positions.push(index);
        index
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn instructions_mut(&mut self) -> &mut [Instruction] {
        &mut self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn is_located(&self) -> bool {
        self.org.is_some()
    }

    pub fn org(&self) -> Option<u16> {
        self.org
    }

    /// Assign `org` as this block's base address, stamping every
    /// instruction's implicit address (`org + index`) and returning
    /// the next free address. Labels are stamped by the caller
    /// (`Namespace::locate_block`), since label->name resolution lives
    /// one level up.
    pub fn locate(&mut self, org: u16, anchor_for_overflow: impl FnOnce(&Instruction) -> SourceAnchor) -> AssemblyResult<u16> {
        let end = org as usize + self.instructions.len();
        if end > 0x1_0000 {
            let overflow_index = 0x1_0000 - org as usize;
            let anchor = self
                .instructions
                .get(overflow_index)
                .map(anchor_for_overflow)
                .unwrap_or_else(|| {
                    anchor_for_overflow(self.instructions.last().expect("non-empty block"))
                });
            return Err(AssemblyError::BlockSizeExceeded { anchor });
        }
        self.org = Some(org);
        Ok(end as u16)
    }

    pub fn next_org(&self) -> Option<u16> {
        self.org.and_then(|org| {
            u16::try_from(org as u32 + self.instructions.len() as u32).ok()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn anchor() -> SourceAnchor {
        SourceAnchor::synthetic(Rc::new(PathBuf::from("<test>")))
    }

    #[test]
    fn locate_stamps_org_and_next_org() {
        let mut block = CodeBlock::new();
        block.push_instruction(Instruction::Return { anchor: anchor() });
        block.push_instruction(Instruction::Return { anchor: anchor() });
        let next = block.locate(10, |i| i.anchor().clone()).unwrap();
        assert_eq!(next, 12);
        assert_eq!(block.org(), Some(10));
        assert_eq!(block.next_org(), Some(12));
    }

    #[test]
    fn locate_rejects_64k_overflow() {
        let mut block = CodeBlock::new();
        for _ in 0..4 {
            block.push_instruction(Instruction::Return { anchor: anchor() });
        }
        let err = block.locate(0xFFFE, |i| i.anchor().clone()).unwrap_err();
        assert!(matches!(err, AssemblyError::BlockSizeExceeded { .. }));
    }
}
