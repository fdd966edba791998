//! Element finder (single body walk) and the variable-value closure.

use classflow_ir::{Body, ExprId, ExprKind, IrProgram, LocalId, ReturnTarget, ValueId};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::{AnalysisError, Result};

/// Everything one walk over a function body collects.
#[derive(Debug, Default)]
pub struct FoundElements {
    /// Value-producing expressions that need a template node even in
    /// statement position, in body order.
    pub interesting: Vec<ExprId>,
    /// Per local variable: every expression assigned to it.
    pub variable_assignments: FxHashMap<LocalId, Vec<ExprId>>,
    /// Values of returns targeting the enclosing function.
    pub function_returns: Vec<ExprId>,
    /// Per returnable block: the values of returns targeting it.
    pub block_returns: FxHashMap<ExprId, Vec<ExprId>>,
    /// Per suspendable expression: its suspension points.
    pub suspension_points: FxHashMap<ExprId, Vec<ExprId>>,
}

struct Finder<'a> {
    program: &'a IrProgram,
    body: &'a Body,
    entity: &'a str,
    /// The enclosing function is a lowered inline-class constructor.
    inline_constructor: bool,
    suspendable_stack: Vec<ExprId>,
    elements: FoundElements,
}

/// Walk `body` once, collecting interesting expressions, variable
/// assignments, return values and suspension points.
pub fn find_elements(
    program: &IrProgram,
    body: &Body,
    entity: &str,
    inline_constructor: bool,
) -> Result<FoundElements> {
    let mut finder = Finder {
        program,
        body,
        entity,
        inline_constructor,
        suspendable_stack: Vec::new(),
        elements: FoundElements::default(),
    };
    finder.walk(body.root)?;
    Ok(finder.elements)
}

impl Finder<'_> {
    fn walk(&mut self, expr: ExprId) -> Result<()> {
        match self.body.kind(expr) {
            ExprKind::Block { statements } => {
                for &s in statements {
                    self.walk(s)?;
                }
            }
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.walk(*condition)?;
                self.walk(*then_branch)?;
                if let Some(e) = else_branch {
                    self.walk(*e)?;
                }
            }
            ExprKind::Try { body, catches } => {
                self.walk(*body)?;
                for &c in catches {
                    self.walk(c)?;
                }
            }
            ExprKind::ReturnableBlock { body } => {
                self.elements.block_returns.entry(expr).or_default();
                self.walk(*body)?;
            }
            ExprKind::SuspendableExpression { body } => {
                self.elements.suspension_points.entry(expr).or_default();
                self.suspendable_stack.push(expr);
                self.walk(*body)?;
                self.suspendable_stack.pop();
            }
            ExprKind::SuspensionPoint { result } => {
                let enclosing = *self.suspendable_stack.last().ok_or_else(|| {
                    AnalysisError::malformed(
                        self.entity,
                        "suspension point outside a suspendable expression",
                    )
                })?;
                self.elements
                    .suspension_points
                    .entry(enclosing)
                    .or_default()
                    .push(expr);
                self.walk(*result)?;
            }
            ExprKind::Return { target, value } => {
                if let Some(v) = value {
                    self.walk(*v)?;
                    match target {
                        ReturnTarget::Function => {
                            // Inline-constructor bodies return their instance
                            // through dedicated plumbing; only unit-typed
                            // returns are ordinary control flow there.
                            let unit = self.program.builtins.unit;
                            if !(self.inline_constructor && self.body.ty(*v) != unit) {
                                self.elements.function_returns.push(*v);
                            }
                        }
                        ReturnTarget::Block(block) => {
                            self.elements
                                .block_returns
                                .entry(*block)
                                .or_default()
                                .push(*v);
                        }
                    }
                }
            }
            ExprKind::While { condition, body } => {
                self.walk(*condition)?;
                self.walk(*body)?;
            }
            ExprKind::Break | ExprKind::Continue | ExprKind::GetValue { .. } => {}
            ExprKind::SetValue { local, value } => {
                self.elements
                    .variable_assignments
                    .entry(*local)
                    .or_default()
                    .push(*value);
                self.walk(*value)?;
            }
            ExprKind::DeclareLocal { local, initializer } => {
                if let Some(init) = initializer {
                    self.elements
                        .variable_assignments
                        .entry(*local)
                        .or_default()
                        .push(*init);
                    self.walk(*init)?;
                }
            }
            ExprKind::Const | ExprKind::FunctionReference { .. } => {
                self.elements.interesting.push(expr);
            }
            ExprKind::Vararg { elements } => {
                self.elements.interesting.push(expr);
                for &e in elements {
                    self.walk(e)?;
                }
            }
            ExprKind::GetSingleton { .. } | ExprKind::GetContinuation => {
                self.elements.interesting.push(expr);
            }
            ExprKind::Call {
                receiver,
                arguments,
                ..
            } => {
                self.elements.interesting.push(expr);
                if let Some(r) = receiver {
                    self.walk(*r)?;
                }
                for &a in arguments {
                    self.walk(a)?;
                }
            }
            ExprKind::ConstructorCall { arguments, .. }
            | ExprKind::DelegatingConstructorCall { arguments, .. } => {
                self.elements.interesting.push(expr);
                for &a in arguments {
                    self.walk(a)?;
                }
            }
            ExprKind::GetField { receiver, .. } => {
                self.elements.interesting.push(expr);
                if let Some(r) = receiver {
                    self.walk(*r)?;
                }
            }
            ExprKind::SetField {
                receiver, value, ..
            } => {
                self.elements.interesting.push(expr);
                if let Some(r) = receiver {
                    self.walk(*r)?;
                }
                self.walk(*value)?;
            }
            ExprKind::TypeOperator { argument, .. } => {
                self.elements.interesting.push(expr);
                self.walk(*argument)?;
            }
            ExprKind::DirectPrivateCall { .. } => {
                return Err(AnalysisError::malformed(
                    self.entity,
                    "direct private call encountered before the rewrite pass",
                ));
            }
        }
        Ok(())
    }
}

/// Transitive closure of variable values: follow variable-to-variable
/// assignment chains, keeping every non-variable value expression reached.
pub fn variable_closure(
    body: &Body,
    elements: &FoundElements,
) -> FxHashMap<LocalId, Vec<ExprId>> {
    let mut closure = FxHashMap::default();
    let mut locals: Vec<LocalId> = elements.variable_assignments.keys().copied().collect();
    locals.sort();

    for &local in &locals {
        let mut values = Vec::new();
        let mut value_set = FxHashSet::default();
        let mut visited = FxHashSet::default();
        let mut stack = vec![local];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(assignments) = elements.variable_assignments.get(&current) else {
                continue;
            };
            for &value in assignments {
                match body.kind(value) {
                    ExprKind::GetValue {
                        value: ValueId::Local(next),
                    } => stack.push(*next),
                    _ => {
                        if value_set.insert(value) {
                            values.push(value);
                        }
                    }
                }
            }
        }
        closure.insert(local, values);
    }
    closure
}

#[cfg(test)]
mod tests {
    use super::*;
    use classflow_ir::{ClassId, ModuleKind};

    fn unit_body(program: &IrProgram) -> (Body, ClassId) {
        (Body::new(), program.builtins.unit)
    }

    #[test]
    fn test_closure_follows_assignment_chains() {
        let program = IrProgram::new("m", ModuleKind::Library);
        let (mut body, unit) = unit_body(&program);

        // v0 = <const>; v1 = v0
        let c = body.push(ExprKind::Const, program.builtins.string);
        let d0 = body.push(
            ExprKind::DeclareLocal {
                local: LocalId(0),
                initializer: Some(c),
            },
            unit,
        );
        let get0 = body.push(
            ExprKind::GetValue {
                value: ValueId::Local(LocalId(0)),
            },
            program.builtins.string,
        );
        let d1 = body.push(
            ExprKind::DeclareLocal {
                local: LocalId(1),
                initializer: Some(get0),
            },
            unit,
        );
        body.root = body.push(
            ExprKind::Block {
                statements: vec![d0, d1],
            },
            unit,
        );

        let elements = find_elements(&program, &body, "f", false).unwrap();
        let closure = variable_closure(&body, &elements);

        assert_eq!(closure[&LocalId(0)], vec![c]);
        assert_eq!(closure[&LocalId(1)], vec![c]);
    }

    #[test]
    fn test_closure_handles_cycles() {
        let program = IrProgram::new("m", ModuleKind::Library);
        let (mut body, unit) = unit_body(&program);

        // v0 = v1; v1 = v0; v0 = <const>
        let get1 = body.push(
            ExprKind::GetValue {
                value: ValueId::Local(LocalId(1)),
            },
            program.builtins.string,
        );
        let s0 = body.push(
            ExprKind::SetValue {
                local: LocalId(0),
                value: get1,
            },
            unit,
        );
        let get0 = body.push(
            ExprKind::GetValue {
                value: ValueId::Local(LocalId(0)),
            },
            program.builtins.string,
        );
        let s1 = body.push(
            ExprKind::SetValue {
                local: LocalId(1),
                value: get0,
            },
            unit,
        );
        let c = body.push(ExprKind::Const, program.builtins.string);
        let s2 = body.push(
            ExprKind::SetValue {
                local: LocalId(0),
                value: c,
            },
            unit,
        );
        body.root = body.push(
            ExprKind::Block {
                statements: vec![s0, s1, s2],
            },
            unit,
        );

        let elements = find_elements(&program, &body, "f", false).unwrap();
        let closure = variable_closure(&body, &elements);

        assert_eq!(closure[&LocalId(0)], vec![c]);
        assert_eq!(closure[&LocalId(1)], vec![c]);
    }

    #[test]
    fn test_returns_are_collected() {
        let program = IrProgram::new("m", ModuleKind::Library);
        let (mut body, unit) = unit_body(&program);

        let c = body.push(ExprKind::Const, program.builtins.string);
        let ret = body.push(
            ExprKind::Return {
                target: ReturnTarget::Function,
                value: Some(c),
            },
            program.builtins.nothing,
        );
        body.root = body.push(
            ExprKind::Block {
                statements: vec![ret],
            },
            unit,
        );

        let elements = find_elements(&program, &body, "f", false).unwrap();
        assert_eq!(elements.function_returns, vec![c]);
    }
}
