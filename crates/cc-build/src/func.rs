//! Top-level entry point: lowers one [`cc_ast::FunctionDef`] to one
//! [`cc_ir::Function`].

use crate::ctx::BuilderCtx;
use crate::expr::ast_type_to_ir;
use crate::stmt::lower_stmt_list;
use cc_ast::FunctionDef;
use cc_ir::{Function, Inst};

pub fn lower_function(def: &FunctionDef, strings: &mut impl FnMut(&str) -> usize) -> Function {
    let params = def
        .params
        .iter()
        .map(|p| (p.name.clone(), ast_type_to_ir(&p.ty)))
        .collect();
    let func = Function::new(def.name.clone(), params, ast_type_to_ir(&def.return_type));
    let mut ctx = BuilderCtx::new(func);

    // Parameters are implicitly defined at entry: register them as
    // canonical variables without emitting a defining instruction.
    for p in &def.params {
        ctx.func
            .declare_variable(p.name.clone(), ast_type_to_ir(&p.ty), true);
    }

    lower_stmt_list(&mut ctx, &def.body, strings);

    if !ctx.has_terminator() {
        ctx.emit(Inst::terminator_return(None, 0));
    }

    ctx.func
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_ast::{BinOpToken, Expr, Param, Stmt, Type};

    fn noop_strings(_: &str) -> usize {
        0
    }

    #[test]
    fn straight_line_function_has_one_block_and_one_terminator() {
        // int f(int a) { int x = a + 1; return x * 2; }
        let def = FunctionDef {
            name: "f".into(),
            params: vec![Param {
                name: "a".into(),
                ty: Type::Int,
            }],
            return_type: Type::Int,
            body: vec![
                Stmt::VarDecl {
                    name: "x".into(),
                    ty: Type::Int,
                    init: Some(Expr::Binary {
                        op: BinOpToken::Add,
                        lhs: Box::new(Expr::Ident {
                            name: "a".into(),
                            ty: Type::Int,
                            line: 1,
                        }),
                        rhs: Box::new(Expr::IntLiteral { value: 1, line: 1 }),
                        ty: Type::Int,
                        line: 1,
                    }),
                    line: 1,
                },
                Stmt::Return {
                    value: Some(Expr::Binary {
                        op: BinOpToken::Mul,
                        lhs: Box::new(Expr::Ident {
                            name: "x".into(),
                            ty: Type::Int,
                            line: 2,
                        }),
                        rhs: Box::new(Expr::IntLiteral { value: 2, line: 2 }),
                        ty: Type::Int,
                        line: 2,
                    }),
                    line: 2,
                },
            ],
        };
        let mut strings = noop_strings;
        let f = lower_function(&def, &mut strings);
        assert_eq!(f.blocks.len(), 1);
        assert!(f.block(f.entry).has_terminator());
        assert_eq!(
            f.block(f.entry).terminator().unwrap().opcode,
            cc_ir::Opcode::Return
        );
    }

    #[test]
    fn function_without_explicit_return_gets_implicit_one() {
        let def = FunctionDef {
            name: "g".into(),
            params: vec![],
            return_type: Type::Void,
            body: vec![Stmt::Expr(Expr::IntLiteral { value: 0, line: 1 })],
        };
        let mut strings = noop_strings;
        let f = lower_function(&def, &mut strings);
        assert!(f.block(f.entry).has_terminator());
    }

    #[test]
    fn void_only_prototype_has_zero_params() {
        let def = FunctionDef {
            name: "h".into(),
            params: vec![],
            return_type: Type::Void,
            body: vec![],
        };
        let mut strings = noop_strings;
        let f = lower_function(&def, &mut strings);
        assert!(f.params.is_empty());
    }
}
