//! Final resolution pass, grounded on `assemble.py`'s
//! `resolve()`: once every reachable block has an address (the
//! locator's job), stamp label addresses and rewrite every pending
//! branch target to its resolved address, then flatten the located
//! blocks into the `ObjectCode` the rest of the system consumes.

use std::collections::HashSet;

use crate::error::{AssemblyError, AssemblyResult};
use crate::instructions::BranchTarget;
use crate::namespace::Namespace;
use crate::namespace::ObjectCode;

use super::locate::LocateResult;

pub fn resolve(located: LocateResult) -> AssemblyResult<ObjectCode> {
    let mut stamped = HashSet::new();
    for block in &located.blocks {
        let ptr = block.namespace.as_ptr() as usize;
        if stamped.insert(ptr) {
            block.namespace.borrow_mut().resolve_label_addresses();
        }
    }

    let mut object = ObjectCode::new();
    for block in &located.blocks {
        let ns = &block.namespace;

        // Gather pending branch targets first, with only an immutable
        // borrow held, since resolving a qualified name borrows the
        // (possibly same) namespace again internally.
        let pending: Vec<(usize, String, crate::anchor::SourceAnchor)> = {
            let ns_ref = ns.borrow();
            ns_ref
                .block(block.block_index)
                .instructions()
                .iter()
                .enumerate()
                .filter_map(|(i, insn)| match insn.branch_target() {
                    Some(BranchTarget::Pending(name)) => Some((i, name.clone(), insn.anchor().clone())),
                    _ => None,
                })
                .collect()
        };

        let mut resolved_addrs = Vec::with_capacity(pending.len());
        for (index, name, anchor) in pending {
            let (_target_ns, label) =
                Namespace::resolve_qualified(ns, &name).ok_or_else(|| AssemblyError::UnresolvedLabel {
                    anchor: anchor.clone(),
                    name: name.clone(),
                })?;
            let address = label
                .address()
                .ok_or(AssemblyError::UnresolvedLabel { anchor, name })?;
            resolved_addrs.push((index, address));
        }

        if !resolved_addrs.is_empty() {
            let mut ns_mut = ns.borrow_mut();
            let instructions = ns_mut.block_mut(block.block_index).instructions_mut();
            for (index, address) in resolved_addrs {
                *instructions[index].branch_target_mut().expect("checked above") = BranchTarget::Resolved(address);
            }
        }

        let resolved_instructions = ns.borrow().block(block.block_index).instructions().to_vec();
        for insn in resolved_instructions {
            object.push(insn);
        }
    }
    Ok(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::SourceAnchor;
    use crate::fields::Axis;
    use crate::instructions::Instruction;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn anchor() -> SourceAnchor {
        SourceAnchor::synthetic(Rc::new(PathBuf::from("a.mot")))
    }

    #[test]
    fn resolves_forward_goto_to_its_address() {
        let root = Namespace::new_root(PathBuf::from("a.mot"), anchor());
        {
            let mut ns = root.borrow_mut();
            ns.push_instruction(Instruction::Goto {
                anchor: anchor(),
                target: BranchTarget::Pending("done".into()),
                loop_count: 0,
            });
            ns.add_label("done".into(), anchor()).unwrap();
            ns.push_instruction(Instruction::Move {
                anchor: anchor(),
                axis: Axis::X,
                relative: true,
                amount: 1,
                chain: false,
            });
            ns.push_instruction(Instruction::Return { anchor: anchor() });
        }
        let located = super::super::locate::Locator::new().run(&root).unwrap();
        let object = resolve(located).unwrap();
        assert_eq!(object.len(), 3);
        assert!(matches!(
            object.get(0).unwrap(),
            Instruction::Goto {
                target: BranchTarget::Resolved(1),
                ..
            }
        ));
    }
}
