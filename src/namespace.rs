//! Per-file symbol scope and the flat, address-indexed `ObjectCode`
//! the locator produces.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::anchor::SourceAnchor;
use crate::codeblock::CodeBlock;
use crate::instructions::Instruction;

/// The injected label present at address 0 in the anonymous root
/// namespace.
pub const BOOT_LABEL: &str = "<boot>";

pub type NamespaceRef = Rc<RefCell<Namespace>>;

/// Per-source-file scope: a name->label map, a name->namespace map for
/// `as`-imported files, and the ordered list of code blocks the
/// parser appended to while scanning this file.
pub struct Namespace {
    /// Canonical path of the file this namespace was scanned from.
    pub filename: PathBuf,
    /// The `import` statement that pulled this namespace in (or the
    /// first line of the top-level file for the anonymous root).
    pub anchor: SourceAnchor,
    labels: HashMap<String, crate::codeblock::Label>,
    namespaces: HashMap<String, NamespaceRef>,
    blocks: Vec<CodeBlock>,
    current_block: usize,
}

impl Namespace {
    pub fn new(filename: PathBuf, anchor: SourceAnchor) -> NamespaceRef {
        Rc::new(RefCell::new(Namespace {
            filename,
            anchor,
            labels: HashMap::new(),
            namespaces: HashMap::new(),
            blocks: vec![CodeBlock::new()],
            current_block: 0,
        }))
    }

    /// Create the anonymous root namespace, with `<boot>` injected at
    /// address 0.
    pub fn new_root(filename: PathBuf, anchor: SourceAnchor) -> NamespaceRef {
        let ns = Namespace::new(filename, anchor.clone());
        {
            let mut root = ns.borrow_mut();
            let boot = crate::codeblock::Label::new(BOOT_LABEL, anchor, 0, 0);
            root.labels.insert(BOOT_LABEL.to_string(), boot);
        }
        ns
    }

    pub fn add_label(
        &mut self,
        name: String,
        anchor: SourceAnchor,
    ) -> Result<&mut crate::codeblock::Label, &crate::codeblock::Label> {
        if self.labels.contains_key(&name) {
            // Safe: just checked contains_key.
            return Err(self.labels.get(&name).unwrap());
        }
        let block_insn_index = self.blocks[self.current_block].mark_label_position();
        let label = crate::codeblock::Label::new(name.clone(), anchor, self.current_block, block_insn_index);
        self.labels.insert(name.clone(), label);
        Ok(self.labels.get_mut(&name).unwrap())
    }

    pub fn label(&self, name: &str) -> Option<&crate::codeblock::Label> {
        self.labels.get(name)
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    pub fn namespace(&self, name: &str) -> Option<NamespaceRef> {
        self.namespaces.get(name).cloned()
    }

    pub fn add_namespace_alias(&mut self, name: String, target: NamespaceRef) {
        self.namespaces.insert(name, target);
    }

    pub fn merge_from(&mut self, other: &Namespace) {
        // Merging (`import "path"` with no `as`) folds the imported
        // file's labels and sub-namespace aliases into this one; its
        // blocks are kept in the imported namespace itself (they are
        // located independently), so only the symbol tables merge.
        for (name, label) in &other.labels {
            if name == BOOT_LABEL {
                continue;
            }
            self.labels.entry(name.clone()).or_insert_with(|| label.clone());
        }
        for (name, ns) in &other.namespaces {
            self.namespaces.entry(name.clone()).or_insert_with(|| Rc::clone(ns));
        }
    }

    pub fn push_instruction(&mut self, insn: Instruction) {
        if insn.is_end_of_block() {
            self.blocks[self.current_block].push_instruction(insn);
            self.blocks.push(CodeBlock::new());
            self.current_block = self.blocks.len() - 1;
        } else {
            self.blocks[self.current_block].push_instruction(insn);
        }
    }

    pub fn current_block_index(&self) -> usize {
        self.current_block
    }

    pub fn blocks(&self) -> &[CodeBlock] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [CodeBlock] {
        &mut self.blocks
    }

    pub fn block(&self, index: usize) -> &CodeBlock {
        &self.blocks[index]
    }

    pub fn block_mut(&mut self, index: usize) -> &mut CodeBlock {
        &mut self.blocks[index]
    }

    /// After locating, stamp every label whose containing block was
    /// reached with its final address (`org + block_insn_index`).
    /// Labels in dead blocks are left unresolved.
    pub fn resolve_label_addresses(&mut self) {
        for label in self.labels.values_mut() {
            if let Some(org) = self.blocks[label.block_index()].org() {
                label.set_address(org + label.block_insn_index() as u16);
            }
        }
    }

    /// All sub-namespaces reachable via `as`-aliases from this one
    /// (not recursive; the resolver walks the whole graph itself).
    pub fn child_namespaces(&self) -> impl Iterator<Item = &NamespaceRef> {
        self.namespaces.values()
    }

    /// Resolve a dot-separated qualified name (e.g. `helper.loop_top`)
    /// by walking into sub-namespaces.
    pub fn resolve_qualified(
        this: &NamespaceRef,
        qualified: &str,
    ) -> Option<(NamespaceRef, crate::codeblock::Label)> {
        let mut parts = qualified.split('.');
        let first = parts.next()?;
        let mut current = Rc::clone(this);
        let mut last = first;
        for part in parts {
            let next = {
                let borrowed = current.borrow();
                borrowed.namespace(last)?
            };
            current = next;
            last = part;
        }
        let label = current.borrow().label(last)?.clone();
        Some((current, label))
    }
}

/// The flat, address-indexed vector of instructions produced by the
/// locator: the authoritative mapping from program
/// counter to instruction. Regenerated on every assembly.
#[derive(Debug, Default)]
pub struct ObjectCode {
    instructions: Vec<Instruction>,
}

impl ObjectCode {
    pub fn new() -> Self {
        ObjectCode::default()
    }

    pub fn push(&mut self, insn: Instruction) {
        self.instructions.push(insn);
    }

    pub fn get(&self, addr: u16) -> Option<&Instruction> {
        self.instructions.get(addr as usize)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Instruction> {
        self.instructions.iter_mut()
    }

    /// The run of consecutive instructions starting at `start` that
    /// form one chained multi-axis group: every instruction with
    /// `is_chained() == true` plus the one instruction after it that
    /// breaks the chain. Does not cap at 4 — an oversized group is a wire
    /// error the caller (`Command::encode_run`) rejects, matching "...
    /// violating groups are rejected at binary-extraction".
    pub fn chain_group(&self, start: u16) -> Vec<&Instruction> {
        let mut group = Vec::new();
        let mut addr = start;
        while let Some(insn) = self.get(addr) {
            let chained = insn.is_chained();
            group.push(insn);
            if !chained {
                break;
            }
            addr = addr.wrapping_add(1);
        }
        group
    }

    /// Linear scan to find the instruction originating from `(file,
    /// line)`, used when toggling a breakpoint at the cursor
    ///. Returns the lowest matching address.
    pub fn find_by_line(&self, file: &std::path::Path, line: usize) -> Option<u16> {
        self.instructions.iter().position(|insn| {
            insn.anchor().file() == file && insn.anchor().line() == line
        }).map(|idx| idx as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn anchor() -> SourceAnchor {
        SourceAnchor::synthetic(Rc::new(PathBuf::from("a.mot")))
    }

    #[test]
    fn chain_group_collects_chained_run_plus_terminator() {
        use crate::fields::Axis;
        let mut object = ObjectCode::new();
        object.push(Instruction::Move {
            anchor: anchor(),
            axis: Axis::X,
            relative: true,
            amount: 1000,
            chain: true,
        });
        object.push(Instruction::Move {
            anchor: anchor(),
            axis: Axis::Y,
            relative: true,
            amount: 2000,
            chain: false,
        });
        object.push(Instruction::Return { anchor: anchor() });
        let group = object.chain_group(0);
        assert_eq!(group.len(), 2);
        assert!(group[0].is_chained());
        assert!(!group[1].is_chained());
    }

    #[test]
    fn root_namespace_has_boot_label_at_origin() {
        let ns = Namespace::new_root(PathBuf::from("a.mot"), anchor());
        let ns = ns.borrow();
        let boot = ns.label(BOOT_LABEL).expect("boot label present");
        assert_eq!(boot.block_index(), 0);
        assert_eq!(boot.block_insn_index(), 0);
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let ns = Namespace::new_root(PathBuf::from("a.mot"), anchor());
        let mut ns = ns.borrow_mut();
        ns.add_label("foo".into(), anchor()).unwrap();
        assert!(ns.add_label("foo".into(), anchor()).is_err());
    }

    #[test]
    fn qualified_lookup_walks_subnamespaces() {
        let root = Namespace::new_root(PathBuf::from("a.mot"), anchor());
        let child = Namespace::new(PathBuf::from("b.mot"), anchor());
        child.borrow_mut().add_label("loop_top".into(), anchor()).unwrap();
        root.borrow_mut().add_namespace_alias("helper".into(), Rc::clone(&child));
        let (ns, label) = Namespace::resolve_qualified(&root, "helper.loop_top").unwrap();
        assert_eq!(label.name, "loop_top");
        assert!(Rc::ptr_eq(&ns, &child));
    }
}
