//! The locator: assigns addresses to code blocks reachable from a
//! namespace's boot point, recursing into callees on demand. Unreached blocks are dead code and never get an address,
//! matching `assemble.py`'s `locate(namespace, bi)`.
//!
//! This pass only assigns block origins; it does not resolve branch
//! targets yet (a target block further down the reachability graph
//! might not have an address until after it too is located). Label
//! and branch-target resolution is `resolve::resolve`, run once
//! locating is complete.

use std::collections::HashSet;

use crate::error::AssemblyResult;
use crate::namespace::NamespaceRef;

/// One code block that was reached and assigned an address, in
/// visitation order.
pub struct LocatedBlock {
    pub namespace: NamespaceRef,
    pub block_index: usize,
}

/// The full result of a locate pass: every reachable block, in the
/// order the locator first reached it.
pub struct LocateResult {
    pub blocks: Vec<LocatedBlock>,
}

pub struct Locator {
    next_address: u16,
    seen: HashSet<(usize, usize)>,
    order: Vec<LocatedBlock>,
}

impl Locator {
    pub fn new() -> Self {
        Locator {
            next_address: 0,
            seen: HashSet::new(),
            order: Vec::new(),
        }
    }

    /// Locate every block reachable from `root`'s `<boot>` label,
    /// recursing into `GOTO`/`CALL`/`IF` targets (including qualified
    /// cross-namespace ones) as they are discovered.
    pub fn run(mut self, root: &NamespaceRef) -> AssemblyResult<LocateResult> {
        let boot_block = {
            let ns = root.borrow();
            ns.label(crate::namespace::BOOT_LABEL)
                .map(|l| l.block_index())
                .unwrap_or(0)
        };
        self.locate_block(root, boot_block)?;
        Ok(LocateResult { blocks: self.order })
    }

    fn locate_block(&mut self, ns: &NamespaceRef, block_index: usize) -> AssemblyResult<()> {
        let key = (namespace_ptr(ns), block_index);
        if self.seen.contains(&key) {
            return Ok(());
        }
        self.seen.insert(key);

        let start_address = self.next_address;
        let (callees, next_org) = {
            let mut ns_mut = ns.borrow_mut();
            let block = ns_mut.block_mut(block_index);
            let next_org = block.locate(start_address, |i| i.anchor().clone())?;
            let callees: Vec<String> = block
                .instructions()
                .iter()
                .filter_map(|insn| insn.branch_target().and_then(|t| t.qualified_name().map(str::to_string)))
                .collect();
            (callees, next_org)
        };
        self.next_address = next_org;
        self.order.push(LocatedBlock {
            namespace: ns.clone(),
            block_index,
        });

        for name in callees {
            let (target_ns, label) = crate::namespace::Namespace::resolve_qualified(ns, &name).ok_or_else(|| {
                crate::error::AssemblyError::UnresolvedLabel {
                    anchor: ns.borrow().anchor.clone(),
                    name: name.clone(),
                }
            })?;
            self.locate_block(&target_ns, label.block_index())?;
        }
        Ok(())
    }
}

impl Default for Locator {
    fn default() -> Self {
        Locator::new()
    }
}

fn namespace_ptr(ns: &NamespaceRef) -> usize {
    ns.as_ptr() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::SourceAnchor;
    use crate::fields::Axis;
    use crate::instructions::Instruction;
    use crate::namespace::Namespace;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn anchor() -> SourceAnchor {
        SourceAnchor::synthetic(Rc::new(PathBuf::from("a.mot")))
    }

    #[test]
    fn locates_single_block_in_order() {
        let root = Namespace::new_root(PathBuf::from("a.mot"), anchor());
        {
            let mut ns = root.borrow_mut();
            ns.push_instruction(Instruction::Move {
                anchor: anchor(),
                axis: Axis::X,
                relative: true,
                amount: 100,
                chain: false,
            });
            ns.push_instruction(Instruction::Return { anchor: anchor() });
        }
        let result = Locator::new().run(&root).unwrap();
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(root.borrow().block(0).org(), Some(0));
    }

    #[test]
    fn dead_block_is_never_located() {
        let root = Namespace::new_root(PathBuf::from("a.mot"), anchor());
        {
            let mut ns = root.borrow_mut();
            ns.push_instruction(Instruction::Return { anchor: anchor() });
            // A second, unreachable block follows the unconditional
            // RETURN; nothing ever branches into it.
            ns.push_instruction(Instruction::Move {
                anchor: anchor(),
                axis: Axis::X,
                relative: true,
                amount: 1,
                chain: false,
            });
        }
        let result = Locator::new().run(&root).unwrap();
        assert_eq!(result.blocks.len(), 1);
        assert!(root.borrow().block(1).org().is_none());
    }
}
