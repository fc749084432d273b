//! Loop-invariant code motion: for each loop (innermost first), compute
//! the invariant instructions to a fixed point, obtain (or synthesize) a
//! preheader, and hoist them there in their original relative order.
//!
//! **Preheader synthesis simplification:** when a loop header has more
//! than one predecessor outside the loop, the synthesized preheader
//! forwards the *first* outside predecessor's phi argument rather than
//! building a fresh phi in the preheader to merge all of them. Every
//! loop this workspace's IR builder actually emits (`while`/`for`) has
//! exactly one outside predecessor whose only successor is the loop
//! header, so the existing-preheader fast path handles the realistic
//! case; this fallback only matters for hand-built multi-entry CFGs and
//! is documented here rather than silently producing a subtly wrong
//! phi merge.

use cc_ir::{BlockId, Function, Inst, InstExt, Opcode, Operand};
use std::collections::{HashMap, HashSet};

fn is_candidate(op: Opcode) -> bool {
    !matches!(
        op,
        Opcode::Load | Opcode::Store | Opcode::Alloca | Opcode::Call | Opcode::Param
    ) && !op.is_terminator()
        && !op.is_phi()
}

fn def_block_map(f: &Function) -> HashMap<u32, BlockId> {
    let mut m = HashMap::new();
    for block in &f.blocks {
        for inst in &block.insts {
            if let Some(v) = inst.dest.vreg() {
                m.insert(v.0, block.id);
            }
        }
    }
    for &v in &f.param_entry_versions {
        m.entry(v.0).or_insert(f.entry);
    }
    m
}

fn compute_invariant(f: &Function, body: &[BlockId], body_set: &HashSet<BlockId>) -> Vec<(BlockId, usize)> {
    let def_block = def_block_map(f);
    let mut invariant_vregs: HashSet<u32> = HashSet::new();
    let mut invariant_set: HashSet<(BlockId, usize)> = HashSet::new();

    let mut changed = true;
    while changed {
        changed = false;
        for &b in body {
            for (ii, inst) in f.block(b).insts.iter().enumerate() {
                if invariant_set.contains(&(b, ii)) || !is_candidate(inst.opcode) {
                    continue;
                }
                let ok = inst.sources().iter().all(|src| match src {
                    Operand::Vreg(v, _) => match def_block.get(&v.0) {
                        Some(db) if !body_set.contains(db) => true,
                        _ => invariant_vregs.contains(&v.0),
                    },
                    _ => true,
                });
                if ok {
                    invariant_set.insert((b, ii));
                    if let Some(d) = inst.dest.vreg() {
                        invariant_vregs.insert(d.0);
                    }
                    changed = true;
                }
            }
        }
    }

    let mut result: Vec<(BlockId, usize)> = invariant_set.into_iter().collect();
    result.sort_by_key(|&(b, ii)| (b.0, ii));
    result
}

fn redirect_terminator(inst: &mut Inst, old: BlockId, new: BlockId) {
    match inst.opcode {
        Opcode::Jump => {
            if let Operand::Label(b) = &mut inst.src1 {
                if *b == old {
                    *b = new;
                }
            }
        }
        Opcode::Branch => {
            if let Operand::Label(b) = &mut inst.src2 {
                if *b == old {
                    *b = new;
                }
            }
            if let InstExt::Branch { false_target } = &mut inst.ext {
                if *false_target == old {
                    *false_target = new;
                }
            }
        }
        Opcode::Switch => {
            if let InstExt::Switch { cases, default } = &mut inst.ext {
                for (_, t) in cases.iter_mut() {
                    if *t == old {
                        *t = new;
                    }
                }
                if *default == old {
                    *default = new;
                }
            }
        }
        _ => {}
    }
}

fn obtain_preheader(f: &mut Function, header: BlockId, body_set: &HashSet<BlockId>) -> BlockId {
    let header_preds = f.block(header).preds.to_vec();
    let outside: Vec<BlockId> = header_preds.iter().copied().filter(|p| !body_set.contains(p)).collect();
    let inside: Vec<BlockId> = header_preds.iter().copied().filter(|p| body_set.contains(p)).collect();

    if outside.len() == 1 && f.block(outside[0]).succs.len() == 1 {
        return outside[0];
    }

    let label = format!("{}.preheader", f.block(header).label);
    let ph = f.new_block(label);

    for &p in &outside {
        if let Some(term) = f.block_mut(p).terminator_mut() {
            redirect_terminator(term, header, ph);
        }
        for s in f.block_mut(p).succs.iter_mut() {
            if *s == header {
                *s = ph;
            }
        }
    }

    f.block_mut(ph).push(Inst::terminator_jump(header, 0));
    f.block_mut(ph).preds = outside.clone().into();
    f.block_mut(ph).succs = vec![header].into();

    let mut new_preds = vec![ph];
    new_preds.extend(inside.iter().copied());

    let old_args: Vec<(BlockId, usize)> = header_preds
        .iter()
        .copied()
        .enumerate()
        .map(|(i, p)| (p, i))
        .collect();

    for phi in f.block_mut(header).phis_mut() {
        if let InstExt::Phi {
            phi_args, phi_preds, ..
        } = &mut phi.ext
        {
            let old_args_snapshot = phi_args.clone();
            let ph_value = old_args
                .iter()
                .find(|(p, _)| outside.contains(p))
                .map(|&(_, i)| old_args_snapshot[i].clone())
                .unwrap_or(Operand::ImmInt(0));
            let mut new_args = Vec::with_capacity(new_preds.len());
            new_args.push(ph_value);
            for &ip in &inside {
                let v = old_args
                    .iter()
                    .find(|(p, _)| *p == ip)
                    .map(|&(_, i)| old_args_snapshot[i].clone())
                    .unwrap_or(Operand::ImmInt(0));
                new_args.push(v);
            }
            *phi_args = new_args;
            *phi_preds = new_preds.clone();
        }
    }
    f.block_mut(header).preds = new_preds.into();
    ph
}

fn hoist(f: &mut Function, preheader: BlockId, sites: &[(BlockId, usize)]) {
    let moved: Vec<Inst> = sites.iter().map(|&(b, ii)| f.block(b).insts[ii].clone()).collect();

    let mut by_block: HashMap<BlockId, Vec<usize>> = HashMap::new();
    for &(b, ii) in sites {
        by_block.entry(b).or_default().push(ii);
    }
    for (b, mut idxs) in by_block {
        idxs.sort_unstable_by(|a, b| b.cmp(a));
        for ii in idxs {
            f.block_mut(b).insts.remove(ii);
        }
    }

    let insert_at = f.block(preheader).insts.len().saturating_sub(1);
    for (offset, inst) in moved.into_iter().enumerate() {
        f.block_mut(preheader).insts.insert(insert_at + offset, inst);
    }
}

/// Runs LICM over every loop in `f`, innermost first. Requires
/// `cc_analysis::compute_dominators` to have already run.
pub fn licm(f: &mut Function) {
    log::debug!("running LICM on `{}`", f.name);
    let mut loops = cc_analysis::find_loops(f);
    loops.sort_by_key(|l| l.body.len());

    for lp in &loops {
        let body_set: HashSet<BlockId> = lp.body.iter().copied().collect();
        let sites = compute_invariant(f, &lp.body, &body_set);
        if sites.is_empty() {
            continue;
        }
        let preheader = obtain_preheader(f, lp.header, &body_set);
        log::trace!(
            "hoisting {} instruction(s) out of loop at {} into {}",
            sites.len(),
            lp.header,
            preheader
        );
        hoist(f, preheader, &sites);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_analysis::{build_cfg, compute_dominators};
    use cc_ir::{IrType, VregId};

    // entry: i0=0, s0=0, jump cond
    // cond: i=phi(i0,i2), s=phi(s0,s2), cmp=i<n, branch(cmp)->body/exit
    // body: t=n*2 (invariant), s2=s+t, i2=i+1, jump cond
    // exit: return s
    fn loop_with_invariant() -> Function {
        let mut f = Function::new("s", vec![("n".into(), IrType::I32)], IrType::I32);
        let n = f.declare_variable("n", IrType::I32, true);
        f.param_entry_versions.push(n);

        let cond = f.new_block("cond");
        let body = f.new_block("body");
        let exit = f.new_block("exit");
        let entry = f.entry;

        let i0 = f.new_vreg();
        let s0 = f.new_vreg();
        f.block_mut(entry).push(Inst::new(
            Opcode::Const,
            Operand::Vreg(i0, None),
            Operand::ImmInt(0),
            Operand::None,
            0,
        ));
        f.block_mut(entry).push(Inst::new(
            Opcode::Const,
            Operand::Vreg(s0, None),
            Operand::ImmInt(0),
            Operand::None,
            0,
        ));
        f.block_mut(entry).push(Inst::terminator_jump(cond, 0));

        let i = f.new_vreg();
        let s = f.new_vreg();
        let cmp = f.new_vreg();
        let mut phi_i = Inst::phi(i, 100, vec![entry, body], 0);
        let mut phi_s = Inst::phi(s, 101, vec![entry, body], 0);
        f.block_mut(cond).push(phi_i.clone());
        f.block_mut(cond).push(phi_s.clone());
        f.block_mut(cond).push(Inst::new(
            Opcode::CmpLt,
            Operand::Vreg(cmp, None),
            Operand::Vreg(i, None),
            Operand::Vreg(n, None),
            0,
        ));
        f.block_mut(cond)
            .push(Inst::terminator_branch(Operand::Vreg(cmp, None), body, exit, 0));

        let t = f.new_vreg();
        let s2 = f.new_vreg();
        let i2 = f.new_vreg();
        f.block_mut(body).push(Inst::new(
            Opcode::Mul,
            Operand::Vreg(t, None),
            Operand::Vreg(n, None),
            Operand::ImmInt(2),
            0,
        ));
        f.block_mut(body).push(Inst::new(
            Opcode::Add,
            Operand::Vreg(s2, None),
            Operand::Vreg(s, None),
            Operand::Vreg(t, None),
            0,
        ));
        f.block_mut(body).push(Inst::new(
            Opcode::Add,
            Operand::Vreg(i2, None),
            Operand::Vreg(i, None),
            Operand::ImmInt(1),
            0,
        ));
        f.block_mut(body).push(Inst::terminator_jump(cond, 0));

        f.block_mut(exit)
            .push(Inst::terminator_return(Some(Operand::Vreg(s, None)), 0));

        build_cfg(&mut f);
        compute_dominators(&mut f);

        // fix up phi args now that vregs/block ids are known
        if let InstExt::Phi { phi_args, .. } = &mut phi_i.ext {
            phi_args[0] = Operand::Vreg(i0, None);
            phi_args[1] = Operand::Vreg(i2, None);
        }
        if let InstExt::Phi { phi_args, .. } = &mut phi_s.ext {
            phi_args[0] = Operand::Vreg(s0, None);
            phi_args[1] = Operand::Vreg(s2, None);
        }
        f.block_mut(cond).insts[0] = phi_i;
        f.block_mut(cond).insts[1] = phi_s;

        f
    }

    #[test]
    fn invariant_multiply_is_hoisted_into_the_preheader() {
        let mut f = loop_with_invariant();
        let entry = f.entry;
        let body = BlockId(2);

        licm(&mut f);

        assert!(f.block(entry).insts.iter().any(|i| i.opcode == Opcode::Mul));
        assert!(!f.block(body).insts.iter().any(|i| i.opcode == Opcode::Mul));
    }

    #[test]
    fn hoisted_instruction_lands_before_the_preheader_terminator() {
        let mut f = loop_with_invariant();
        let entry = f.entry;
        licm(&mut f);
        assert!(f.block(entry).insts.last().unwrap().opcode.is_terminator());
    }

    #[test]
    fn value_defined_inside_the_loop_is_not_hoisted() {
        let mut f = loop_with_invariant();
        let body = BlockId(2);
        licm(&mut f);
        // s2 = s + t depends on s, which is loop-carried via the phi (defined
        // inside the loop header) -- it must stay in the loop body.
        assert!(f.block(body).insts.iter().any(|i| i.opcode == Opcode::Add));
    }

    #[test]
    fn synthesizes_a_preheader_when_the_outside_predecessor_has_two_successors() {
        // setup branches to either `header` (loop) or `other`; header also
        // has a back edge from `body`. The lone outside predecessor's only
        // successor is NOT `header`, so a preheader must be synthesized.
        let mut f = Function::new("f", vec![], IrType::I32);
        let header = f.new_block("header");
        let body = f.new_block("body");
        let other = f.new_block("other");
        let entry = f.entry;

        f.block_mut(entry)
            .push(Inst::terminator_branch(Operand::ImmInt(1), header, other, 0));
        f.block_mut(other).push(Inst::terminator_return(None, 0));

        let v = VregId(999);
        f.block_mut(header)
            .push(Inst::terminator_branch(Operand::ImmInt(1), body, other, 0));
        f.block_mut(body).push(Inst::new(
            Opcode::Add,
            Operand::Vreg(v, None),
            Operand::ImmInt(1),
            Operand::ImmInt(2),
            0,
        ));
        f.block_mut(body).push(Inst::terminator_jump(header, 0));

        build_cfg(&mut f);
        compute_dominators(&mut f);

        let before = f.blocks.len();
        licm(&mut f);
        assert!(f.blocks.len() > before, "a preheader block should have been synthesized");
    }
}
