//! Tree-walking evaluator.
//!
//! Synchronous and pure over an [`EvaluationContext`]. Null is
//! `Option<Value>::None` and propagates through member access and arithmetic;
//! strict contexts turn missing references into errors instead.
//!
//! Same-entity computed properties that are being recomputed in the current
//! pass (`ctx.pending`) are evaluated on demand the first time they are read
//! and memoized. A property read while it is still in progress is a cycle.

use std::collections::HashMap;

use formulary_core::{BinaryOp, Expression, Literal, Template, TemplatePart, UnaryOp};
use formulary_model::Value;

use crate::context::EvaluationContext;
use crate::error::{EvaluationError, EvaluationErrorKind};
use crate::functions;
use crate::numeric;

/// Evaluate one expression against a context.
pub fn evaluate(
    expr: &Expression,
    ctx: &EvaluationContext,
) -> Result<Option<Value>, EvaluationError> {
    Evaluator::new(ctx).evaluate(expr)
}

/// Render a template. Null interpolations render as the empty string.
pub fn render_template(
    template: &Template,
    ctx: &EvaluationContext,
) -> Result<String, EvaluationError> {
    Evaluator::new(ctx).render(template)
}

/// Null, `false`, `0`, `NaN` and `""` are falsy; every other value is truthy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None => false,
        Some(Value::Boolean { value }) => *value,
        Some(Value::Number { value, .. }) => *value != 0.0 && !value.is_nan(),
        Some(Value::Text { value }) => !value.is_empty(),
        Some(_) => true,
    }
}

type EvalResult = Result<Option<Value>, EvaluationError>;

/// Evaluation state for one pass over one entity.
pub struct Evaluator<'c> {
    ctx: &'c EvaluationContext,
    resolved: HashMap<String, EvalResult>,
    in_progress: Vec<String>,
    depth: usize,
}

impl<'c> Evaluator<'c> {
    pub fn new(ctx: &'c EvaluationContext) -> Self {
        Evaluator {
            ctx,
            resolved: HashMap::new(),
            in_progress: Vec::new(),
            depth: 0,
        }
    }

    pub fn evaluate(&mut self, expr: &Expression) -> EvalResult {
        self.eval(expr)
    }

    pub fn render(&mut self, template: &Template) -> Result<String, EvaluationError> {
        let mut out = String::new();
        for part in &template.parts {
            match part {
                TemplatePart::Text { text } => out.push_str(text),
                TemplatePart::Interpolation { expression, .. } => {
                    if let Some(v) = self.eval(expression)? {
                        out.push_str(&v.display_text());
                    }
                }
            }
        }
        Ok(out)
    }

    /// Value of a property of the current entity, evaluating it first when
    /// it is pending in this pass. Results are memoized.
    pub fn evaluate_property(&mut self, name: &str) -> EvalResult {
        if let Some(done) = self.resolved.get(name) {
            return done.clone();
        }
        if let Some(pos) = self.in_progress.iter().position(|p| p == name) {
            let mut cycle = self.in_progress[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(EvaluationError::circular(cycle));
        }
        let Some(expr) = self.ctx.pending.get(name).cloned() else {
            return self.stored_property(name);
        };

        self.in_progress.push(name.to_string());
        let result = self.eval(&expr);
        self.in_progress.pop();

        self.resolved.insert(name.to_string(), result.clone());
        result
    }

    fn stored_property(&self, name: &str) -> EvalResult {
        match self.ctx.properties.get(name) {
            Some(p) => Ok(p.current_value().cloned()),
            None if self.ctx.strict => Err(EvaluationError::missing(format!(
                "entity {} has no property #{}",
                self.ctx.entity.id, name
            ))),
            None => Ok(None),
        }
    }

    fn knows_own_property(&self, name: &str) -> bool {
        self.ctx.pending.contains_key(name) || self.ctx.properties.contains_key(name)
    }

    fn eval(&mut self, expr: &Expression) -> EvalResult {
        self.depth += 1;
        let result = if self.depth > self.ctx.recursion_limit {
            Err(EvaluationError::new(
                EvaluationErrorKind::DepthExceeded,
                format!(
                    "evaluation exceeded recursion limit of {}",
                    self.ctx.recursion_limit
                ),
            ))
        } else {
            self.eval_inner(expr)
        };
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expression) -> EvalResult {
        match expr {
            Expression::Literal { value } => Ok(match value {
                Literal::Number(n) => Some(Value::number(*n)),
                Literal::Text(s) => Some(Value::text(s.clone())),
                Literal::Boolean(b) => Some(Value::boolean(*b)),
                Literal::Null => None,
            }),

            Expression::SelfProperty { name } => self.evaluate_property(name),

            Expression::SelfEntity => Ok(Some(Value::Reference {
                entity_id: self.ctx.entity.id.clone(),
                entity_type: Some(self.ctx.entity.type_path.clone()),
            })),

            Expression::EntityRef { id } => self.entity_ref(id),

            Expression::Member { object, member } => {
                let target = self.eval(object)?;
                self.member(target, member)
            }

            Expression::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Some(Value::boolean(!is_truthy(v.as_ref())))),
                    UnaryOp::Neg => match v {
                        None => Ok(None),
                        Some(Value::Number {
                            value,
                            dimension,
                            unit,
                        }) => Ok(Some(Value::Number {
                            value: -value,
                            dimension,
                            unit,
                        })),
                        Some(other) => Err(EvaluationError::unsupported(format!(
                            "cannot negate {}",
                            other.type_name()
                        ))),
                    },
                }
            }

            Expression::Binary { op, left, right } => self.binary(*op, left, right),

            Expression::Call { name, args } => self.call(name, args),

            Expression::List { items } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(v) = self.eval(item)? {
                        values.push(v);
                    }
                }
                Ok(Some(Value::list(values)))
            }

            Expression::Record { fields } => {
                let mut values = Vec::with_capacity(fields.len());
                for (key, expr) in fields {
                    if let Some(v) = self.eval(expr)? {
                        values.push((key.clone(), v));
                    }
                }
                Ok(Some(Value::record(values)))
            }
        }
    }

    fn entity_ref(&self, id: &str) -> EvalResult {
        if let Some(entity) = self.ctx.entity_by_id(id) {
            return Ok(Some(Value::Reference {
                entity_id: entity.id.clone(),
                entity_type: Some(entity.type_path.clone()),
            }));
        }
        if self.ctx.relationships.contains_key(id) {
            return Ok(Some(Value::reference(id)));
        }
        if self.ctx.strict {
            return Err(EvaluationError::missing(format!("unknown entity {}", id)));
        }
        Ok(None)
    }

    // ──────────────────────────────────────────────
    // Member access
    // ──────────────────────────────────────────────

    fn member(&mut self, target: Option<Value>, member: &str) -> EvalResult {
        match target {
            None => Ok(None),
            Some(Value::Reference { entity_id, .. }) => self.entity_member(&entity_id, member),
            Some(Value::Record { mut fields }) => match fields.remove(member) {
                Some(v) => Ok(Some(v)),
                None if self.ctx.strict => Err(EvaluationError::missing(format!(
                    "record has no field '{}'",
                    member
                ))),
                None => Ok(None),
            },
            Some(Value::List { items, .. }) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(v) = self.member(Some(item), member)? {
                        out.push(v);
                    }
                }
                Ok(Some(Value::list(out)))
            }
            Some(other) if self.ctx.strict => Err(EvaluationError::new(
                EvaluationErrorKind::InvalidAccess,
                format!("cannot access .{} on {}", member, other.type_name()),
            )),
            Some(_) => Ok(None),
        }
    }

    /// Property first, then relationship of that name.
    fn entity_member(&mut self, entity_id: &str, member: &str) -> EvalResult {
        if entity_id == self.ctx.entity.id {
            if self.knows_own_property(member) {
                return self.evaluate_property(member);
            }
        } else if let Some(value) = self
            .ctx
            .entities
            .get(entity_id)
            .and_then(|e| e.property(member))
            .map(|p| p.current_value().cloned())
        {
            return Ok(value);
        }

        if let Some(targets) = self.ctx.relationship(entity_id, member) {
            return Ok(Some(match targets.as_slice() {
                [single] => Value::reference(single.clone()),
                many => Value::list(many.iter().cloned().map(Value::reference).collect()),
            }));
        }

        if self.ctx.strict {
            return Err(EvaluationError::missing(format!(
                "entity {} has no property or relationship '{}'",
                entity_id, member
            )));
        }
        Ok(None)
    }

    // ──────────────────────────────────────────────
    // Operators and calls
    // ──────────────────────────────────────────────

    fn binary(&mut self, op: BinaryOp, left: &Expression, right: &Expression) -> EvalResult {
        match op {
            BinaryOp::And => {
                let l = self.eval(left)?;
                if !is_truthy(l.as_ref()) {
                    return Ok(l);
                }
                self.eval(right)
            }
            BinaryOp::Or => {
                let l = self.eval(left)?;
                if is_truthy(l.as_ref()) {
                    return Ok(l);
                }
                self.eval(right)
            }
            BinaryOp::Eq | BinaryOp::Neq => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                let eq = numeric::values_equal(l.as_ref(), r.as_ref());
                Ok(Some(Value::boolean(if op == BinaryOp::Eq { eq } else { !eq })))
            }
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                match (l, r) {
                    (Some(l), Some(r)) => Ok(Some(Value::boolean(numeric::compare(op, &l, &r)?))),
                    _ => Ok(None),
                }
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                let (Some(l), Some(r)) = (l, r) else {
                    return Ok(None);
                };
                if op == BinaryOp::Add
                    && (matches!(l, Value::Text { .. }) || matches!(r, Value::Text { .. }))
                {
                    return Ok(Some(Value::text(format!(
                        "{}{}",
                        l.display_text(),
                        r.display_text()
                    ))));
                }
                numeric::arithmetic(op, &l, &r).map(Some)
            }
        }
    }

    fn call(&mut self, name: &str, args: &[Expression]) -> EvalResult {
        let def = functions::lookup(name).ok_or_else(|| {
            EvaluationError::new(
                EvaluationErrorKind::UnknownFunction,
                format!("unknown function {}", name),
            )
        })?;

        if def.name == "IF" {
            def.check_arity(args.len())?;
            let cond = self.eval(&args[0])?;
            let taken = if is_truthy(cond.as_ref()) { 1 } else { 2 };
            let mut values = vec![cond, None, None];
            values[taken] = self.eval(&args[taken])?;
            return def.invoke(&values);
        }

        let mut values = Vec::with_capacity(args.len());
        for a in args {
            values.push(self.eval(a)?);
        }
        def.invoke(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formulary_core::{parse, parse_template};
    use formulary_model::{ComputedProperty, Entity, Property};

    fn order() -> Entity {
        Entity::new("order-1", "acme", "order")
            .with_property(Property::literal("qty", Value::number(10.0)))
            .with_property(Property::literal("price", Value::number(5.0)))
            .with_property(Property::literal("name", Value::text("Bolt")))
            .with_property(Property::literal("zero", Value::number(0.0)))
    }

    fn eval_in(src: &str, ctx: &EvaluationContext) -> EvalResult {
        evaluate(&parse(src).unwrap(), ctx)
    }

    fn eval(src: &str) -> EvalResult {
        eval_in(src, &EvaluationContext::new(order()))
    }

    #[test]
    fn multiplies_self_properties() {
        assert_eq!(eval("#qty * #price").unwrap(), Some(Value::number(50.0)));
    }

    #[test]
    fn division_by_zero_fails() {
        let err = eval("#qty / #zero").unwrap_err();
        assert_eq!(err.kind, EvaluationErrorKind::Division);
        assert!(err.to_string().contains("division"));
    }

    #[test]
    fn null_propagates_through_arithmetic() {
        assert_eq!(eval("#missing * 2").unwrap(), None);
        assert_eq!(eval("null + 1").unwrap(), None);
        assert_eq!(eval("-null").unwrap(), None);
    }

    #[test]
    fn text_concatenation() {
        assert_eq!(eval("#name + '-' + #qty").unwrap(), Some(Value::text("Bolt-10")));
    }

    #[test]
    fn logical_operators_return_deciding_operand() {
        assert_eq!(eval("0 || 'x'").unwrap(), Some(Value::text("x")));
        assert_eq!(eval("'' && 1").unwrap(), Some(Value::text("")));
        assert_eq!(eval("#qty && #price").unwrap(), Some(Value::number(5.0)));
        assert_eq!(eval("!#missing").unwrap(), Some(Value::boolean(true)));
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval("#qty > 5").unwrap(), Some(Value::boolean(true)));
        assert_eq!(eval("#missing > 5").unwrap(), None);
        assert_eq!(eval("null == null").unwrap(), Some(Value::boolean(true)));
        assert_eq!(eval("#qty != 10").unwrap(), Some(Value::boolean(false)));
        let err = eval("#qty < 'a'").unwrap_err();
        assert_eq!(err.kind, EvaluationErrorKind::UnsupportedOperator);
    }

    #[test]
    fn if_is_lazy() {
        // the untaken branch would divide by zero
        assert_eq!(eval("IF(#qty > 100, 1 / 0, #price)").unwrap(), Some(Value::number(5.0)));
        assert_eq!(eval("IF(true, 'a')").unwrap_err().kind, EvaluationErrorKind::InvalidArguments);
    }

    #[test]
    fn unknown_function() {
        let err = eval("FROB(1)").unwrap_err();
        assert_eq!(err.kind, EvaluationErrorKind::UnknownFunction);
        assert_eq!(err.message, "unknown function FROB");
    }

    #[test]
    fn lists_and_records() {
        assert_eq!(eval("SUM([10, 20, 30])").unwrap(), Some(Value::number(60.0)));
        assert_eq!(eval("COUNT([1, null, 3])").unwrap(), Some(Value::number(2.0)));
        assert_eq!(eval("{a: 1, b: #qty}.b").unwrap(), Some(Value::number(10.0)));
        assert_eq!(eval("{a: 1}.zzz").unwrap(), None);
        assert_eq!(eval("[{a: 1}, {b: 2}, {a: 3}].a").unwrap(),
            Some(Value::list(vec![Value::number(1.0), Value::number(3.0)])));
    }

    #[test]
    fn strict_mode_rejects_missing_references() {
        let ctx = EvaluationContext::new(order()).strict(true);
        assert_eq!(
            eval_in("#missing", &ctx).unwrap_err().kind,
            EvaluationErrorKind::MissingReference
        );
        assert_eq!(
            eval_in("@\"ghost\"", &ctx).unwrap_err().kind,
            EvaluationErrorKind::MissingReference
        );
        assert_eq!(
            eval_in("#qty.foo", &ctx).unwrap_err().kind,
            EvaluationErrorKind::InvalidAccess
        );
        assert_eq!(eval("#qty.foo").unwrap(), None);
    }

    #[test]
    fn cross_entity_and_relationship_access() {
        let customer = Entity::new("cust-1", "acme", "customer")
            .with_property(Property::literal("discount", Value::number(0.1)));
        let ctx = EvaluationContext::new(order())
            .with_entity(customer)
            .with_relationship("order-1", "customer", &["cust-1"])
            .with_relationship("order-1", "lines", &["l1", "l2"]);

        assert_eq!(eval_in("self.customer.discount", &ctx).unwrap(), Some(Value::number(0.1)));
        assert_eq!(eval_in("@\"cust-1\".discount", &ctx).unwrap(), Some(Value::number(0.1)));
        assert_eq!(
            eval_in("self.lines", &ctx).unwrap(),
            Some(Value::list(vec![Value::reference("l1"), Value::reference("l2")]))
        );
        assert_eq!(eval_in("self.qty", &ctx).unwrap(), Some(Value::number(10.0)));
    }

    #[test]
    fn pending_properties_evaluate_on_demand() {
        let ctx = EvaluationContext::new(order())
            .with_pending("subtotal", parse("#qty * #price").unwrap())
            .with_pending("total", parse("#subtotal * 2").unwrap());
        let mut ev = Evaluator::new(&ctx);
        assert_eq!(ev.evaluate_property("total").unwrap(), Some(Value::number(100.0)));
        assert_eq!(ev.evaluate_property("subtotal").unwrap(), Some(Value::number(50.0)));
    }

    #[test]
    fn self_reference_is_circular() {
        let ctx = EvaluationContext::new(order()).with_pending("a", parse("#a + 1").unwrap());
        let err = Evaluator::new(&ctx).evaluate_property("a").unwrap_err();
        assert_eq!(err.kind, EvaluationErrorKind::Circular);
        assert_eq!(err.cycle, vec!["a", "a"]);
    }

    #[test]
    fn transitive_cycle_reports_path() {
        let ctx = EvaluationContext::new(order())
            .with_pending("a", parse("#b + 1").unwrap())
            .with_pending("b", parse("#c + 1").unwrap())
            .with_pending("c", parse("#a + 1").unwrap())
            .with_pending("d", parse("#a").unwrap());
        let mut ev = Evaluator::new(&ctx);
        let err = ev.evaluate_property("a").unwrap_err();
        assert_eq!(err.message, "circular reference: a -> b -> c -> a");
        let b = ev.evaluate_property("b").unwrap_err();
        assert!(b.is_cycle_member("b"));
        let d = ev.evaluate_property("d").unwrap_err();
        assert!(!d.is_cycle_member("d"));
    }

    #[test]
    fn cached_value_is_read_when_not_pending() {
        let mut c = ComputedProperty::new("total", "#qty * #price", vec![]);
        c.mark_valid(Some(Value::number(7.0)), "2025-01-01T00:00:00Z").unwrap();
        let ctx = EvaluationContext::new(order().with_property(Property::Computed(c)));
        assert_eq!(eval_in("#total", &ctx).unwrap(), Some(Value::number(7.0)));
    }

    #[test]
    fn recursion_limit_bounds_nesting() {
        let mut ctx = EvaluationContext::new(order());
        ctx.recursion_limit = 8;
        let deep = format!("{}1{}", "(".repeat(2), ")".repeat(2));
        assert!(eval_in(&deep, &ctx).is_ok());
        let err = eval_in("1 + (1 + (1 + (1 + (1 + (1 + (1 + (1 + 1)))))))", &ctx).unwrap_err();
        assert_eq!(err.kind, EvaluationErrorKind::DepthExceeded);
    }

    #[test]
    fn templates_render_null_as_empty() {
        let ctx = EvaluationContext::new(order());
        let t = parse_template("${#name} x${#qty} [${null}]").unwrap();
        assert_eq!(render_template(&t, &ctx).unwrap(), "Bolt x10 []");
        assert_eq!(eval("CONCAT(null)").unwrap(), Some(Value::text("null")));
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&Value::number(f64::NAN))));
        assert!(!is_truthy(Some(&Value::text(""))));
        assert!(is_truthy(Some(&Value::list(vec![]))));
        assert!(is_truthy(Some(&Value::number(-1.0))));
    }
}
