//! Lowers a typed [`cc_ast`] translation unit into [`cc_ir`]. Control-flow
//! flattening, break/continue stacks, short-circuit evaluation and switch
//! tables live here; dominator/SSA construction and optimization are
//! downstream crates.

mod ctx;
mod expr;
mod func;
mod stmt;

pub use ctx::BuilderCtx;
pub use func::lower_function;

use cc_ast::TranslationUnit;
use cc_ir::Program;

/// Lowers every function in `tu` into one [`Program`], interning string
/// literals as they're encountered.
pub fn lower_translation_unit(tu: &TranslationUnit) -> Program {
    let mut program = Program::new();
    for def in &tu.functions {
        let func = {
            let mut intern = |s: &str| program.intern_string(s);
            func::lower_function(def, &mut intern)
        };
        program.functions.push(func);
    }
    program
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_ast::{FunctionDef, Type};

    #[test]
    fn empty_translation_unit_yields_empty_program() {
        let tu = TranslationUnit::default();
        let p = lower_translation_unit(&tu);
        assert!(p.functions.is_empty());
    }

    #[test]
    fn each_function_def_becomes_one_ir_function() {
        let tu = TranslationUnit {
            functions: vec![FunctionDef {
                name: "main".into(),
                params: vec![],
                return_type: Type::Int,
                body: vec![],
            }],
        };
        let p = lower_translation_unit(&tu);
        assert_eq!(p.functions.len(), 1);
        assert_eq!(p.functions[0].name, "main");
    }
}
