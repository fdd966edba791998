//! Expression value extractor.
//!
//! Enumerates the value-producing sub-expressions that can flow out of an
//! expression without crossing a statement boundary. Cast operators are
//! transparent: their argument's values are yielded re-wrapped with the cast
//! target, so narrowing survives into the edges the builder creates.

use classflow_ir::{Body, ClassId, ExprId, ExprKind, IrProgram};

use crate::errors::{AnalysisError, Result};
use crate::template::FoundElements;

/// Where an extracted value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueOrigin {
    Expr(ExprId),
    /// Synthetic singleton for `Unit`/`Nothing`-typed statements.
    Singleton(ClassId),
}

/// One value an expression can evaluate to, with the chain of cast targets
/// applied to it, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedValue {
    pub origin: ValueOrigin,
    pub casts: Vec<ClassId>,
}

/// Collect the value set of `expr` in deterministic order.
pub fn extract_values(
    program: &IrProgram,
    body: &Body,
    elements: &FoundElements,
    expr: ExprId,
    entity: &str,
) -> Result<Vec<ExtractedValue>> {
    let mut out = Vec::new();
    visit(program, body, elements, expr, entity, &[], &mut out)?;
    Ok(out)
}

fn visit(
    program: &IrProgram,
    body: &Body,
    elements: &FoundElements,
    expr: ExprId,
    entity: &str,
    casts: &[ClassId],
    out: &mut Vec<ExtractedValue>,
) -> Result<()> {
    let recurse = |e: ExprId, casts: &[ClassId], out: &mut Vec<ExtractedValue>| {
        visit(program, body, elements, e, entity, casts, out)
    };
    match body.kind(expr) {
        ExprKind::Block { statements } => match statements.last() {
            Some(&last) => recurse(last, casts, out)?,
            None => fallthrough(program, body, expr, entity, casts, out)?,
        },
        ExprKind::If {
            then_branch,
            else_branch,
            ..
        } => {
            recurse(*then_branch, casts, out)?;
            match else_branch {
                Some(e) => recurse(*e, casts, out)?,
                // The untaken branch contributes unit.
                None => out.push(ExtractedValue {
                    origin: ValueOrigin::Singleton(program.builtins.unit),
                    casts: casts.to_vec(),
                }),
            }
        }
        ExprKind::Try {
            body: try_body,
            catches,
        } => {
            recurse(*try_body, casts, out)?;
            for &c in catches {
                recurse(c, casts, out)?;
            }
        }
        ExprKind::ReturnableBlock { .. } => {
            let returns = elements.block_returns.get(&expr).ok_or_else(|| {
                AnalysisError::malformed(entity, "returnable block was not visited by the finder")
            })?;
            for &value in returns {
                recurse(value, casts, out)?;
            }
        }
        ExprKind::SuspendableExpression { .. } => {
            let points = elements.suspension_points.get(&expr).ok_or_else(|| {
                AnalysisError::malformed(
                    entity,
                    "suspendable expression was not visited by the finder",
                )
            })?;
            for &point in points {
                recurse(point, casts, out)?;
            }
        }
        ExprKind::SuspensionPoint { result } => {
            recurse(*result, casts, out)?;
        }
        ExprKind::TypeOperator {
            operator,
            operand,
            argument,
        } if operator.is_cast() => {
            let mut chained = vec![*operand];
            chained.extend_from_slice(casts);
            recurse(*argument, &chained, out)?;
        }
        // Non-cast type operators produce a value of their declared type.
        ExprKind::TypeOperator { .. }
        | ExprKind::GetValue { .. }
        | ExprKind::Const
        | ExprKind::Vararg { .. }
        | ExprKind::FunctionReference { .. }
        | ExprKind::GetSingleton { .. }
        | ExprKind::GetContinuation
        | ExprKind::Call { .. }
        | ExprKind::ConstructorCall { .. }
        | ExprKind::DelegatingConstructorCall { .. }
        | ExprKind::GetField { .. }
        | ExprKind::SetField { .. } => {
            out.push(ExtractedValue {
                origin: ValueOrigin::Expr(expr),
                casts: casts.to_vec(),
            });
        }
        ExprKind::Return { .. }
        | ExprKind::While { .. }
        | ExprKind::Break
        | ExprKind::Continue
        | ExprKind::SetValue { .. }
        | ExprKind::DeclareLocal { .. } => {
            fallthrough(program, body, expr, entity, casts, out)?;
        }
        ExprKind::DirectPrivateCall { .. } => {
            return Err(AnalysisError::malformed(
                entity,
                "direct private call encountered before the rewrite pass",
            ));
        }
    }
    Ok(())
}

/// Statement-shaped expressions have no rule; a `Unit`/`Nothing` static type
/// yields a synthetic singleton, anything else is a producer bug.
fn fallthrough(
    program: &IrProgram,
    body: &Body,
    expr: ExprId,
    entity: &str,
    casts: &[ClassId],
    out: &mut Vec<ExtractedValue>,
) -> Result<()> {
    let ty = body.ty(expr);
    if ty == program.builtins.unit || ty == program.builtins.nothing {
        out.push(ExtractedValue {
            origin: ValueOrigin::Singleton(ty),
            casts: casts.to_vec(),
        });
        Ok(())
    } else {
        Err(AnalysisError::malformed(
            entity,
            format!(
                "expression {} of type `{}` produces no extractable value",
                expr.0,
                program.class_name(ty)
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classflow_ir::{ModuleKind, TypeOperator};

    fn extract(
        program: &IrProgram,
        body: &Body,
        expr: ExprId,
    ) -> Vec<ExtractedValue> {
        let elements = FoundElements::default();
        extract_values(program, body, &elements, expr, "test").unwrap()
    }

    #[test]
    fn test_leaf_yields_itself() {
        let program = IrProgram::new("m", ModuleKind::Library);
        let mut body = Body::new();
        let c = body.push(ExprKind::Const, program.builtins.string);

        let values = extract(&program, &body, c);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].origin, ValueOrigin::Expr(c));
        assert!(values[0].casts.is_empty());
    }

    #[test]
    fn test_branches_yield_both_results() {
        let program = IrProgram::new("m", ModuleKind::Library);
        let mut body = Body::new();
        let cond = body.push(ExprKind::Const, program.builtins.string);
        let a = body.push(ExprKind::Const, program.builtins.string);
        let b = body.push(ExprKind::Const, program.builtins.string);
        let branch = body.push(
            ExprKind::If {
                condition: cond,
                then_branch: a,
                else_branch: Some(b),
            },
            program.builtins.string,
        );

        let values = extract(&program, &body, branch);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].origin, ValueOrigin::Expr(a));
        assert_eq!(values[1].origin, ValueOrigin::Expr(b));
    }

    #[test]
    fn test_cast_wraps_branch_values() {
        let program = IrProgram::new("m", ModuleKind::Library);
        let target = program.builtins.string;
        let mut body = Body::new();
        let cond = body.push(ExprKind::Const, program.builtins.string);
        let a = body.push(ExprKind::Const, target);
        let b = body.push(ExprKind::Const, target);
        let branch = body.push(
            ExprKind::If {
                condition: cond,
                then_branch: a,
                else_branch: Some(b),
            },
            target,
        );
        let cast = body.push(
            ExprKind::TypeOperator {
                operator: TypeOperator::Cast,
                operand: target,
                argument: branch,
            },
            target,
        );

        let values = extract(&program, &body, cast);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].origin, ValueOrigin::Expr(a));
        assert_eq!(values[0].casts, vec![target]);
        assert_eq!(values[1].casts, vec![target]);
    }

    #[test]
    fn test_unit_statement_yields_synthetic_singleton() {
        let program = IrProgram::new("m", ModuleKind::Library);
        let mut body = Body::new();
        let w = body.push(ExprKind::Break, program.builtins.nothing);

        let values = extract(&program, &body, w);
        assert_eq!(
            values[0].origin,
            ValueOrigin::Singleton(program.builtins.nothing)
        );
    }

    #[test]
    fn test_non_unit_statement_is_malformed() {
        let program = IrProgram::new("m", ModuleKind::Library);
        let mut body = Body::new();
        let w = body.push(ExprKind::Break, program.builtins.string);

        let elements = FoundElements::default();
        let err = extract_values(&program, &body, &elements, w, "test").unwrap_err();
        assert!(matches!(err, AnalysisError::MalformedIr { .. }));
    }
}
