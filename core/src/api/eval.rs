//! One-shot expression evaluation.

use crate::api::context::Context;
use crate::api::script::Script;
use crate::api::variable::Variable;
use crate::ast;
use crate::errors::Error;
use crate::token::Token;
use crate::values::Value;

/// Name the wrapper program binds the expression's result to.
const RESULT_NAME: &str = "__res__";

/// Evaluate a single expression with `params` bound as globals, returning
/// its value.
///
/// The expression is wrapped into a one-assignment program, compiled, and
/// run to completion under `ctx`.
pub fn eval<N, I>(ctx: &Context, expr: ast::Expr, params: I) -> Result<Value, Error>
where
    N: Into<String>,
    I: IntoIterator<Item = (N, Value)>,
{
    let pos = expr.pos();
    let file = ast::File {
        stmts: vec![ast::Stmt::Assign(ast::AssignStmt {
            lhs: vec![ast::Expr::Ident(ast::Ident {
                name: RESULT_NAME.to_string(),
                name_pos: pos,
            })],
            rhs: vec![expr],
            token: Token::Define,
            token_pos: pos,
        })],
    };

    let mut script = Script::new(file);
    for (name, value) in params {
        script.add(&name.into(), value);
    }
    let compiled = script.run_context(ctx)?;
    Ok(compiled
        .get(RESULT_NAME)
        .map(Variable::into_value)
        .unwrap_or(Value::Undefined))
}
