//! Per-function builder state: the function under construction, the
//! emission cursor, and the break/continue target stacks.

use cc_ir::{BlockId, Function, Inst, Operand};
use std::collections::HashMap;

pub struct BuilderCtx {
    pub func: Function,
    pub current: BlockId,
    pub break_stack: Vec<BlockId>,
    pub continue_stack: Vec<BlockId>,
    /// Forward-reference-capable label -> block map for `goto`.
    labels: HashMap<String, BlockId>,
}

impl BuilderCtx {
    pub fn new(func: Function) -> Self {
        let current = func.entry;
        Self {
            func,
            current,
            break_stack: Vec::new(),
            continue_stack: Vec::new(),
            labels: HashMap::new(),
        }
    }

    pub fn new_block(&mut self, label: &str) -> BlockId {
        self.func.new_block(label)
    }

    pub fn emit(&mut self, inst: Inst) {
        self.func.block_mut(self.current).push(inst);
    }

    pub fn has_terminator(&self) -> bool {
        self.func.block(self.current).has_terminator()
    }

    /// Emits `jump(target)` in the current block if it isn't already
    /// terminated (e.g. by a `return` nested inside the block just lowered).
    pub fn seal_with_jump(&mut self, target: BlockId, line: u32) {
        if !self.has_terminator() {
            self.emit(Inst::terminator_jump(target, line));
        }
    }

    /// After emitting a terminator mid-statement-list (return/break/continue/
    /// goto), subsequent statements in the same lexical block must land
    /// somewhere: open a fresh, unreachable "dead" block and move there.
    pub fn open_dead_block_if_terminated(&mut self) {
        if self.has_terminator() {
            self.current = self.new_block("dead");
        }
    }

    pub fn named_label(&mut self, name: &str) -> BlockId {
        if let Some(&id) = self.labels.get(name) {
            id
        } else {
            let id = self.new_block(name);
            self.labels.insert(name.to_string(), id);
            id
        }
    }
}
