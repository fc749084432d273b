//! Statement lowering. Each control-flow construct follows the fixed
//! block-creation pattern from the builder design: a known set of blocks
//! is created up front and wired together with jumps/branches, so the
//! shape of the CFG a construct produces never depends on what's inside it.

use crate::ctx::BuilderCtx;
use crate::expr::{ast_type_to_ir, lower_expr};
use cc_ast::Stmt;
use cc_ir::{Inst, Opcode, Operand};

pub fn lower_stmt_list(
    ctx: &mut BuilderCtx,
    stmts: &[Stmt],
    strings: &mut impl FnMut(&str) -> usize,
) {
    for s in stmts {
        lower_stmt(ctx, s, strings);
        ctx.open_dead_block_if_terminated();
    }
}

pub fn lower_stmt(ctx: &mut BuilderCtx, stmt: &Stmt, strings: &mut impl FnMut(&str) -> usize) {
    match stmt {
        Stmt::Expr(e) => {
            lower_expr(ctx, e, strings);
        }
        Stmt::VarDecl {
            name, ty, init, line,
        } => {
            let canonical = ctx.func.declare_variable(name, ast_type_to_ir(ty), false);
            if let Some(init) = init {
                let v = lower_expr(ctx, init, strings);
                ctx.emit(Inst::new(
                    Opcode::Copy,
                    Operand::Vreg(canonical, None),
                    v,
                    Operand::None,
                    *line,
                ));
            }
        }
        Stmt::Return { value, line } => {
            let v = value.as_ref().map(|e| lower_expr(ctx, e, strings));
            ctx.emit(Inst::terminator_return(v, *line));
        }
        Stmt::Block(stmts) => lower_stmt_list(ctx, stmts, strings),
        Stmt::If {
            cond,
            then_branch,
            else_branch,
            line,
        } => lower_if(ctx, cond, then_branch, else_branch.as_deref(), *line, strings),
        Stmt::While { cond, body, line } => lower_while(ctx, cond, body, *line, strings),
        Stmt::DoWhile { body, cond, line } => lower_do_while(ctx, body, cond, *line, strings),
        Stmt::For {
            init,
            cond,
            step,
            body,
            line,
        } => lower_for(
            ctx,
            init.as_deref(),
            cond.as_ref(),
            step.as_ref(),
            body,
            *line,
            strings,
        ),
        Stmt::Switch {
            value,
            cases,
            default,
            line,
        } => lower_switch(ctx, value, cases, default.as_deref(), *line, strings),
        Stmt::Break { line } => {
            let target = *ctx
                .break_stack
                .last()
                .unwrap_or_else(|| panic!("`break` outside of a loop or switch (line {line})"));
            ctx.emit(Inst::terminator_jump(target, *line));
        }
        Stmt::Continue { line } => {
            let target = *ctx
                .continue_stack
                .last()
                .unwrap_or_else(|| panic!("`continue` outside of a loop (line {line})"));
            ctx.emit(Inst::terminator_jump(target, *line));
        }
        Stmt::Goto { label, line } => {
            let target = ctx.named_label(label);
            ctx.emit(Inst::terminator_jump(target, *line));
        }
        Stmt::Label { name, line } => {
            let target = ctx.named_label(name);
            ctx.seal_with_jump(target, *line);
            ctx.current = target;
        }
        Stmt::Assert { cond, line } => lower_assert(ctx, cond, *line, strings),
    }
}

fn lower_if(
    ctx: &mut BuilderCtx,
    cond: &cc_ast::Expr,
    then_branch: &Stmt,
    else_branch: Option<&Stmt>,
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) {
    let cond_v = lower_expr(ctx, cond, strings);
    let then_block = ctx.new_block("if.then");
    let else_block = else_branch.map(|_| ctx.new_block("if.else"));
    let merge_block = ctx.new_block("if.merge");

    ctx.emit(Inst::terminator_branch(
        cond_v,
        then_block,
        else_block.unwrap_or(merge_block),
        line,
    ));

    ctx.current = then_block;
    lower_stmt(ctx, then_branch, strings);
    ctx.seal_with_jump(merge_block, line);

    if let (Some(else_block), Some(else_branch)) = (else_block, else_branch) {
        ctx.current = else_block;
        lower_stmt(ctx, else_branch, strings);
        ctx.seal_with_jump(merge_block, line);
    }

    ctx.current = merge_block;
}

fn lower_while(
    ctx: &mut BuilderCtx,
    cond: &cc_ast::Expr,
    body: &Stmt,
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) {
    let cond_block = ctx.new_block("while.cond");
    let body_block = ctx.new_block("while.body");
    let exit_block = ctx.new_block("while.exit");

    ctx.emit(Inst::terminator_jump(cond_block, line));

    ctx.current = cond_block;
    let cond_v = lower_expr(ctx, cond, strings);
    ctx.emit(Inst::terminator_branch(cond_v, body_block, exit_block, line));

    ctx.continue_stack.push(cond_block);
    ctx.break_stack.push(exit_block);
    ctx.current = body_block;
    lower_stmt(ctx, body, strings);
    ctx.seal_with_jump(cond_block, line);
    ctx.continue_stack.pop();
    ctx.break_stack.pop();

    ctx.current = exit_block;
}

fn lower_do_while(
    ctx: &mut BuilderCtx,
    body: &Stmt,
    cond: &cc_ast::Expr,
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) {
    let body_block = ctx.new_block("do.body");
    let cond_block = ctx.new_block("do.cond");
    let exit_block = ctx.new_block("do.exit");

    ctx.emit(Inst::terminator_jump(body_block, line));

    ctx.continue_stack.push(cond_block);
    ctx.break_stack.push(exit_block);
    ctx.current = body_block;
    lower_stmt(ctx, body, strings);
    ctx.seal_with_jump(cond_block, line);
    ctx.continue_stack.pop();
    ctx.break_stack.pop();

    ctx.current = cond_block;
    let cond_v = lower_expr(ctx, cond, strings);
    ctx.emit(Inst::terminator_branch(cond_v, body_block, exit_block, line));

    ctx.current = exit_block;
}

fn lower_for(
    ctx: &mut BuilderCtx,
    init: Option<&Stmt>,
    cond: Option<&cc_ast::Expr>,
    step: Option<&cc_ast::Expr>,
    body: &Stmt,
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) {
    if let Some(init) = init {
        lower_stmt(ctx, init, strings);
    }

    let cond_block = ctx.new_block("for.cond");
    let body_block = ctx.new_block("for.body");
    let incr_block = ctx.new_block("for.incr");
    let exit_block = ctx.new_block("for.exit");

    ctx.emit(Inst::terminator_jump(cond_block, line));

    ctx.current = cond_block;
    let cond_v = match cond {
        Some(c) => lower_expr(ctx, c, strings),
        None => Operand::ImmInt(1),
    };
    ctx.emit(Inst::terminator_branch(cond_v, body_block, exit_block, line));

    ctx.continue_stack.push(incr_block);
    ctx.break_stack.push(exit_block);
    ctx.current = body_block;
    lower_stmt(ctx, body, strings);
    ctx.seal_with_jump(incr_block, line);
    ctx.continue_stack.pop();
    ctx.break_stack.pop();

    ctx.current = incr_block;
    if let Some(step) = step {
        lower_expr(ctx, step, strings);
    }
    ctx.seal_with_jump(cond_block, line);

    ctx.current = exit_block;
}

fn lower_switch(
    ctx: &mut BuilderCtx,
    value: &cc_ast::Expr,
    cases: &[cc_ast::SwitchCase],
    default: Option<&[Stmt]>,
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) {
    let value_v = lower_expr(ctx, value, strings);
    let exit_block = ctx.new_block("switch.exit");
    let case_blocks: Vec<_> = cases
        .iter()
        .map(|_| ctx.new_block("switch.case"))
        .collect();
    let default_block = default.map(|_| ctx.new_block("switch.default"));
    let fallthrough_after_last = default_block.unwrap_or(exit_block);

    let switch_cases: Vec<(i64, cc_ir::BlockId)> = cases
        .iter()
        .zip(case_blocks.iter())
        .map(|(c, &b)| (c.value, b))
        .collect();
    ctx.emit(Inst::terminator_switch(
        value_v,
        switch_cases,
        fallthrough_after_last,
        line,
    ));

    ctx.break_stack.push(exit_block);
    for (i, case) in cases.iter().enumerate() {
        ctx.current = case_blocks[i];
        lower_stmt_list(ctx, &case.body, strings);
        let next = case_blocks.get(i + 1).copied().unwrap_or(fallthrough_after_last);
        ctx.seal_with_jump(next, line);
    }
    if let (Some(default_block), Some(default_body)) = (default_block, default) {
        ctx.current = default_block;
        lower_stmt_list(ctx, default_body, strings);
        ctx.seal_with_jump(exit_block, line);
    }
    ctx.break_stack.pop();

    ctx.current = exit_block;
}

fn lower_assert(
    ctx: &mut BuilderCtx,
    cond: &cc_ast::Expr,
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) {
    let cond_v = lower_expr(ctx, cond, strings);
    let ok_block = ctx.new_block("assert.ok");
    let fail_block = ctx.new_block("assert.fail");
    ctx.emit(Inst::terminator_branch(cond_v, ok_block, fail_block, line));

    ctx.current = fail_block;
    ctx.emit(Inst::call(
        Operand::None,
        "__assert_fail".to_string(),
        0,
        line,
    ));
    ctx.emit(Inst::terminator_return(None, line));

    ctx.current = ok_block;
}
