//! Expression lowering. Every expression lowers to an [`Operand`] holding
//! its result — usually a freshly allocated vreg so each use gets its own
//! temporary, which keeps later SSA renaming simple.

use crate::ctx::BuilderCtx;
use cc_ast::{BinOpToken, Expr, IncDecOp, UnOpToken};
use cc_ir::{IrType, Opcode, Operand};

pub fn lower_expr(ctx: &mut BuilderCtx, expr: &Expr, strings: &mut impl FnMut(&str) -> usize) -> Operand {
    match expr {
        Expr::IntLiteral { value, line } => emit_const(ctx, Operand::ImmInt(*value), *line),
        Expr::FloatLiteral { value, line } => emit_const(ctx, Operand::ImmFloat(*value), *line),
        Expr::StringLiteral { value, line } => {
            strings(value);
            emit_const(ctx, Operand::StrLit(value.clone()), *line)
        }
        Expr::Ident { name, line, .. } => lower_ident_use(ctx, name, *line),
        Expr::Binary {
            op,
            lhs,
            rhs,
            line,
            ..
        } => lower_binary(ctx, *op, lhs, rhs, *line, strings),
        Expr::Unary {
            op, operand, line, ..
        } => lower_unary(ctx, *op, operand, *line, strings),
        Expr::IncDec {
            op, operand, line, ..
        } => lower_inc_dec(ctx, *op, operand, *line, strings),
        Expr::Cast { operand, to, line } => {
            let src = lower_expr(ctx, operand, strings);
            let dest = ctx.func.new_vreg();
            ctx.emit(cc_ir::Inst::new(
                Opcode::Cast,
                Operand::Vreg(dest, Some(ast_type_to_ir(to))),
                src,
                Operand::None,
                *line,
            ));
            Operand::Vreg(dest, Some(ast_type_to_ir(to)))
        }
        Expr::Assign { lhs, rhs, line } => lower_assign(ctx, lhs, rhs, *line, strings),
        Expr::Index {
            base, index, line, ..
        } => {
            let base_v = lower_expr(ctx, base, strings);
            let index_v = lower_expr(ctx, index, strings);
            let dest = ctx.func.new_vreg();
            ctx.emit(cc_ir::Inst::new(
                Opcode::Index,
                Operand::Vreg(dest, None),
                base_v,
                index_v,
                *line,
            ));
            Operand::Vreg(dest, None)
        }
        Expr::Member {
            base, field, line, ..
        } => {
            let base_v = lower_expr(ctx, base, strings);
            let dest = ctx.func.new_vreg();
            ctx.emit(cc_ir::Inst::new(
                Opcode::Member,
                Operand::Vreg(dest, None),
                base_v,
                Operand::Var(field.clone()),
                *line,
            ));
            Operand::Vreg(dest, None)
        }
        Expr::Call {
            callee, args, line, ..
        } => lower_call(ctx, callee, args, *line, strings),
    }
}

fn emit_const(ctx: &mut BuilderCtx, imm: Operand, line: u32) -> Operand {
    let dest = ctx.func.new_vreg();
    ctx.emit(cc_ir::Inst::new(
        Opcode::Const,
        Operand::Vreg(dest, None),
        imm,
        Operand::None,
        line,
    ));
    Operand::Vreg(dest, None)
}

fn lower_ident_use(ctx: &mut BuilderCtx, name: &str, line: u32) -> Operand {
    let canonical = ctx
        .func
        .variable(name)
        .unwrap_or_else(|| panic!("use of undeclared variable `{name}`"))
        .vreg;
    let dest = ctx.func.new_vreg();
    ctx.emit(cc_ir::Inst::new(
        Opcode::Copy,
        Operand::Vreg(dest, None),
        Operand::Vreg(canonical, None),
        Operand::None,
        line,
    ));
    Operand::Vreg(dest, None)
}

fn binop_opcode(op: BinOpToken) -> Option<Opcode> {
    Some(match op {
        BinOpToken::Add => Opcode::Add,
        BinOpToken::Sub => Opcode::Sub,
        BinOpToken::Mul => Opcode::Mul,
        BinOpToken::Div => Opcode::Div,
        BinOpToken::Mod => Opcode::Mod,
        BinOpToken::BitAnd => Opcode::And,
        BinOpToken::BitOr => Opcode::Or,
        BinOpToken::BitXor => Opcode::Xor,
        BinOpToken::Shl => Opcode::Shl,
        BinOpToken::Shr => Opcode::Shr,
        BinOpToken::Eq => Opcode::CmpEq,
        BinOpToken::Ne => Opcode::CmpNe,
        BinOpToken::Lt => Opcode::CmpLt,
        BinOpToken::Le => Opcode::CmpLe,
        BinOpToken::Gt => Opcode::CmpGt,
        BinOpToken::Ge => Opcode::CmpGe,
        BinOpToken::LogAnd | BinOpToken::LogOr => return None,
    })
}

fn lower_binary(
    ctx: &mut BuilderCtx,
    op: BinOpToken,
    lhs: &Expr,
    rhs: &Expr,
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) -> Operand {
    if matches!(op, BinOpToken::LogAnd | BinOpToken::LogOr) {
        return lower_short_circuit(ctx, op, lhs, rhs, line, strings);
    }
    let opcode = binop_opcode(op).expect("non short-circuit operator");
    let lhs_v = lower_expr(ctx, lhs, strings);
    let rhs_v = lower_expr(ctx, rhs, strings);
    let dest = ctx.func.new_vreg();
    ctx.emit(cc_ir::Inst::new(
        opcode,
        Operand::Vreg(dest, None),
        lhs_v,
        rhs_v,
        line,
    ));
    Operand::Vreg(dest, None)
}

/// `&&`/`||` are lowered to control flow rather than a single instruction:
/// a fresh `rhs` block and `merge` block are created, the LHS branches to
/// one or the other, and a phi at `merge` combines the short-circuit
/// constant with the (boolean-converted) RHS value.
fn lower_short_circuit(
    ctx: &mut BuilderCtx,
    op: BinOpToken,
    lhs: &Expr,
    rhs: &Expr,
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) -> Operand {
    let lhs_v = lower_expr(ctx, lhs, strings);
    let rhs_block = ctx.new_block("land.rhs");
    let merge_block = ctx.new_block("land.merge");

    let short_circuit_value = match op {
        BinOpToken::LogAnd => 0,
        BinOpToken::LogOr => 1,
        _ => unreachable!(),
    };
    let (true_target, false_target) = match op {
        BinOpToken::LogAnd => (rhs_block, merge_block),
        BinOpToken::LogOr => (merge_block, rhs_block),
        _ => unreachable!(),
    };
    let short_circuit_pred = ctx.current;
    ctx.emit(cc_ir::Inst::terminator_branch(
        lhs_v,
        true_target,
        false_target,
        line,
    ));

    ctx.current = rhs_block;
    let rhs_v = lower_expr(ctx, rhs, strings);
    let rhs_bool = ctx.func.new_vreg();
    ctx.emit(cc_ir::Inst::new(
        Opcode::CmpNe,
        Operand::Vreg(rhs_bool, None),
        rhs_v,
        Operand::ImmInt(0),
        line,
    ));
    ctx.seal_with_jump(merge_block, line);

    ctx.current = merge_block;
    let dest = ctx.func.new_vreg();
    let mut phi = cc_ir::Inst::phi(
        dest,
        0,
        vec![short_circuit_pred, rhs_block].into(),
        line,
    );
    if let cc_ir::InstExt::Phi { phi_args, .. } = &mut phi.ext {
        phi_args[0] = Operand::ImmInt(short_circuit_value);
        phi_args[1] = Operand::Vreg(rhs_bool, None);
    }
    ctx.emit(phi);
    Operand::Vreg(dest, None)
}

fn lower_unary(
    ctx: &mut BuilderCtx,
    op: UnOpToken,
    operand: &Expr,
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) -> Operand {
    match op {
        UnOpToken::Deref => {
            let addr = lower_expr(ctx, operand, strings);
            let dest = ctx.func.new_vreg();
            ctx.emit(cc_ir::Inst::new(
                Opcode::Load,
                Operand::Vreg(dest, None),
                addr,
                Operand::None,
                line,
            ));
            Operand::Vreg(dest, None)
        }
        UnOpToken::AddrOf => {
            let v = lower_expr(ctx, operand, strings);
            let dest = ctx.func.new_vreg();
            ctx.emit(cc_ir::Inst::new(
                Opcode::AddrOf,
                Operand::Vreg(dest, None),
                v,
                Operand::None,
                line,
            ));
            Operand::Vreg(dest, None)
        }
        UnOpToken::Neg | UnOpToken::Not | UnOpToken::BitNot => {
            let v = lower_expr(ctx, operand, strings);
            let opcode = match op {
                UnOpToken::Neg => Opcode::Neg,
                UnOpToken::Not => Opcode::Not,
                UnOpToken::BitNot => Opcode::BitNot,
                _ => unreachable!(),
            };
            let dest = ctx.func.new_vreg();
            ctx.emit(cc_ir::Inst::new(
                opcode,
                Operand::Vreg(dest, None),
                v,
                Operand::None,
                line,
            ));
            Operand::Vreg(dest, None)
        }
    }
}

fn lower_inc_dec(
    ctx: &mut BuilderCtx,
    op: IncDecOp,
    operand: &Expr,
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) -> Operand {
    let old = lower_expr(ctx, operand, strings);
    let is_increment = matches!(op, IncDecOp::PreIncrement | IncDecOp::PostIncrement);
    let is_pre = matches!(op, IncDecOp::PreIncrement | IncDecOp::PreDecrement);
    let new_dest = ctx.func.new_vreg();
    ctx.emit(cc_ir::Inst::new(
        if is_increment { Opcode::Add } else { Opcode::Sub },
        Operand::Vreg(new_dest, None),
        old.clone(),
        Operand::ImmInt(1),
        line,
    ));
    let new_val = Operand::Vreg(new_dest, None);
    if let Expr::Ident { name, .. } = operand {
        let canonical = ctx.func.variable(name).unwrap().vreg;
        ctx.emit(cc_ir::Inst::new(
            Opcode::Copy,
            Operand::Vreg(canonical, None),
            new_val.clone(),
            Operand::None,
            line,
        ));
    }
    if is_pre {
        new_val
    } else {
        old
    }
}

fn lower_assign(
    ctx: &mut BuilderCtx,
    lhs: &Expr,
    rhs: &Expr,
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) -> Operand {
    let rhs_v = lower_expr(ctx, rhs, strings);
    match lhs {
        Expr::Ident { name, .. } => {
            let canonical = ctx.func.variable(name).unwrap().vreg;
            ctx.emit(cc_ir::Inst::new(
                Opcode::Copy,
                Operand::Vreg(canonical, None),
                rhs_v.clone(),
                Operand::None,
                line,
            ));
        }
        Expr::Unary {
            op: UnOpToken::Deref,
            operand,
            ..
        } => {
            let addr = lower_expr(ctx, operand, strings);
            ctx.emit(cc_ir::Inst::new(
                Opcode::Store,
                Operand::None,
                addr,
                rhs_v.clone(),
                line,
            ));
        }
        Expr::Index { base, index, .. } => {
            let base_v = lower_expr(ctx, base, strings);
            let index_v = lower_expr(ctx, index, strings);
            let addr = ctx.func.new_vreg();
            ctx.emit(cc_ir::Inst::new(
                Opcode::IndexAddr,
                Operand::Vreg(addr, None),
                base_v,
                index_v,
                line,
            ));
            ctx.emit(cc_ir::Inst::new(
                Opcode::Store,
                Operand::None,
                Operand::Vreg(addr, None),
                rhs_v.clone(),
                line,
            ));
        }
        Expr::Member { base, field, .. } => {
            let base_v = lower_expr(ctx, base, strings);
            let addr = ctx.func.new_vreg();
            ctx.emit(cc_ir::Inst::new(
                Opcode::Member,
                Operand::Vreg(addr, None),
                base_v,
                Operand::Var(field.clone()),
                line,
            ));
            ctx.emit(cc_ir::Inst::new(
                Opcode::Store,
                Operand::None,
                Operand::Vreg(addr, None),
                rhs_v.clone(),
                line,
            ));
        }
        other => panic!("invalid assignment target: {other:?}"),
    }
    rhs_v
}

fn lower_call(
    ctx: &mut BuilderCtx,
    callee: &str,
    args: &[Expr],
    line: u32,
    strings: &mut impl FnMut(&str) -> usize,
) -> Operand {
    // Argument evaluation order and `param` emission order must match.
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(lower_expr(ctx, arg, strings));
    }
    for v in &values {
        ctx.emit(cc_ir::Inst::new(
            Opcode::Param,
            Operand::None,
            v.clone(),
            Operand::None,
            line,
        ));
    }
    let dest = ctx.func.new_vreg();
    ctx.emit(cc_ir::Inst::call(
        Operand::Vreg(dest, None),
        callee.to_string(),
        values.len() as u32,
        line,
    ));
    Operand::Vreg(dest, None)
}

pub fn ast_type_to_ir(ty: &cc_ast::Type) -> IrType {
    match ty {
        cc_ast::Type::Void => IrType::I32,
        cc_ast::Type::Int => IrType::I32,
        cc_ast::Type::Char => IrType::I8,
        cc_ast::Type::Float | cc_ast::Type::Double => IrType::F64,
        cc_ast::Type::Pointer(_) | cc_ast::Type::Array(_, _) | cc_ast::Type::Aggregate(_) => {
            IrType::Ptr
        }
    }
}
