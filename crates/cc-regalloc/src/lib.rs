//! Target-independent linear-scan register allocation over a fixed pool
//! of fourteen general-purpose registers (matching AMD64's allocatable
//! GPRs, excluding the stack and frame pointers). No calling-convention
//! or fixed-register awareness — spec.md's own Open Questions defer
//! ABI-aware pinning (caller/callee-saved splits, `div`/`shl`/call-
//! argument constraints) as a future extension; every vreg is treated
//! uniformly here.

use cc_ir::{Allocation, BlockId, Function, Operand, VregId};
use std::collections::HashMap;

/// Allocatable general-purpose registers, excluding `rsp`/`rbp`.
pub const NUM_GP_REGS: u8 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    vreg: VregId,
    start: u32,
    end: u32,
}

/// Assigns a strictly increasing linear position to every instruction,
/// walking blocks in id order. Position 0 is reserved for the implicit
/// parameter-entry definitions at function start.
fn assign_positions(f: &Function) -> HashMap<(BlockId, usize), u32> {
    let mut positions = HashMap::new();
    let mut counter = 1u32;
    for block in &f.blocks {
        for ii in 0..block.insts.len() {
            positions.insert((block.id, ii), counter);
            counter += 1;
        }
    }
    positions
}

fn build_intervals(f: &Function, positions: &HashMap<(BlockId, usize), u32>) -> Vec<Interval> {
    let mut ranges: HashMap<u32, (u32, u32)> = HashMap::new();

    for &v in &f.param_entry_versions {
        ranges.insert(v.0, (0, 0));
    }

    let mut touch = |vreg: VregId, pos: u32, ranges: &mut HashMap<u32, (u32, u32)>| {
        ranges
            .entry(vreg.0)
            .and_modify(|(s, e)| {
                *s = (*s).min(pos);
                *e = (*e).max(pos);
            })
            .or_insert((pos, pos));
    };

    for block in &f.blocks {
        for (ii, inst) in block.insts.iter().enumerate() {
            let pos = positions[&(block.id, ii)];
            if let Some(d) = inst.dest.vreg() {
                touch(d, pos, &mut ranges);
            }
            for src in inst.sources() {
                if let Operand::Vreg(v, _) = src {
                    touch(*v, pos, &mut ranges);
                }
            }
        }
    }

    let mut intervals: Vec<Interval> = ranges
        .into_iter()
        .map(|(v, (start, end))| Interval {
            vreg: VregId(v),
            start,
            end,
        })
        .collect();
    intervals.sort_by_key(|iv| iv.start);
    intervals
}

/// Runs linear-scan register allocation over `f`, storing the result in
/// `f.reg_alloc`. Requires every vreg use/def to already be final
/// (run after optimization, not before).
pub fn allocate(f: &mut Function) {
    log::debug!("running linear-scan register allocation on `{}`", f.name);
    let positions = assign_positions(f);
    let intervals = build_intervals(f, &positions);

    let mut active: Vec<Interval> = Vec::new();
    let mut free: Vec<u8> = (0..NUM_GP_REGS).rev().collect();
    let mut next_spill_slot = 0u32;
    let mut result: HashMap<VregId, Allocation> = HashMap::new();

    for cur in intervals {
        active.retain(|iv| {
            if iv.end < cur.start {
                if let Some(Allocation::Reg(r)) = result.get(&iv.vreg) {
                    free.push(*r);
                }
                false
            } else {
                true
            }
        });

        if let Some(r) = free.pop() {
            result.insert(cur.vreg, Allocation::Reg(r));
            active.push(cur);
            active.sort_by_key(|iv| iv.end);
            continue;
        }

        match active.last().copied() {
            Some(victim) if victim.end > cur.end => {
                let reg = match result.get(&victim.vreg) {
                    Some(Allocation::Reg(r)) => *r,
                    _ => unreachable!("active interval must already hold a register"),
                };
                result.insert(cur.vreg, Allocation::Reg(reg));
                result.insert(victim.vreg, Allocation::Spill(next_spill_slot));
                next_spill_slot += 1;
                active.retain(|iv| iv.vreg != victim.vreg);
                active.push(cur);
                active.sort_by_key(|iv| iv.end);
            }
            _ => {
                result.insert(cur.vreg, Allocation::Spill(next_spill_slot));
                next_spill_slot += 1;
            }
        }
    }

    f.reg_alloc = result;
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_ir::{Inst, IrType, Opcode};

    #[test]
    fn three_short_lived_vregs_each_get_a_distinct_register() {
        let mut f = Function::new("f", vec![("a".into(), IrType::I32)], IrType::I32);
        let a = f.declare_variable("a", IrType::I32, true);
        f.param_entry_versions.push(a);
        let x = f.new_vreg();
        let entry = f.entry;
        f.block_mut(entry).push(Inst::new(
            Opcode::Add,
            Operand::Vreg(x, None),
            Operand::Vreg(a, None),
            Operand::ImmInt(1),
            0,
        ));
        f.block_mut(entry)
            .push(Inst::terminator_return(Some(Operand::Vreg(x, None)), 0));

        allocate(&mut f);

        assert!(matches!(f.reg_alloc.get(&a), Some(Allocation::Reg(_))));
        assert!(matches!(f.reg_alloc.get(&x), Some(Allocation::Reg(_))));
        assert_ne!(f.reg_alloc.get(&a), f.reg_alloc.get(&x));
    }

    #[test]
    fn more_live_vregs_than_registers_forces_a_spill() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let entry = f.entry;
        let mut vregs = Vec::new();
        for i in 0..(NUM_GP_REGS as i64 + 2) {
            let v = f.new_vreg();
            f.block_mut(entry).push(Inst::new(
                Opcode::Const,
                Operand::Vreg(v, None),
                Operand::ImmInt(i),
                Operand::None,
                0,
            ));
            vregs.push(v);
        }
        // every vreg live simultaneously: sum them all at the end.
        let mut sum = vregs[0];
        for &v in &vregs[1..] {
            let next = f.new_vreg();
            f.block_mut(entry).push(Inst::new(
                Opcode::Add,
                Operand::Vreg(next, None),
                Operand::Vreg(sum, None),
                Operand::Vreg(v, None),
                0,
            ));
            sum = next;
        }
        f.block_mut(entry)
            .push(Inst::terminator_return(Some(Operand::Vreg(sum, None)), 0));

        allocate(&mut f);

        let spills = f
            .reg_alloc
            .values()
            .filter(|a| matches!(a, Allocation::Spill(_)))
            .count();
        assert!(spills > 0, "expected at least one spill with more live vregs than registers");
    }

    #[test]
    fn non_overlapping_intervals_can_share_a_register() {
        let mut f = Function::new("f", vec![], IrType::I32);
        let entry = f.entry;
        let a = f.new_vreg();
        let b = f.new_vreg();
        f.block_mut(entry).push(Inst::new(
            Opcode::Const,
            Operand::Vreg(a, None),
            Operand::ImmInt(1),
            Operand::None,
            0,
        ));
        // `a`'s last use is here; it is dead before `b` is defined.
        let discard = f.new_vreg();
        f.block_mut(entry).push(Inst::new(
            Opcode::Copy,
            Operand::Vreg(discard, None),
            Operand::Vreg(a, None),
            Operand::None,
            0,
        ));
        f.block_mut(entry).push(Inst::new(
            Opcode::Const,
            Operand::Vreg(b, None),
            Operand::ImmInt(2),
            Operand::None,
            0,
        ));
        f.block_mut(entry)
            .push(Inst::terminator_return(Some(Operand::Vreg(b, None)), 0));

        allocate(&mut f);
        assert_eq!(f.reg_alloc.get(&a), f.reg_alloc.get(&b));
    }
}
