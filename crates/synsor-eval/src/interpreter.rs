//! Tree-walking formula evaluator (the execution half of the pipeline).
//!
//! The interpreter sees a context that was *already resolved*: every name it
//! can reach maps to a plain `Value` extracted from the ReferenceValue
//! layer. Alternate states appear as `Value::Alt` and absorb every operator
//! they touch — arithmetic, comparison and boolean logic on an alternate
//! yield that alternate, so a single unresolved input surfaces as the
//! formula's state instead of a type error.

use synsor_common::{EngineError, EngineErrorKind, Value, duration_to_seconds};
use synsor_parse::{AstNode, AstNodeType};

use crate::function::ArgumentHandle;
use crate::traits::EvaluationEnv;

pub struct Interpreter<'a> {
    pub env: &'a dyn EvaluationEnv,
}

impl<'a> Interpreter<'a> {
    pub fn new(env: &'a dyn EvaluationEnv) -> Self {
        Self { env }
    }

    /* ===================  public  =================== */
    pub fn evaluate_ast(&self, node: &AstNode) -> Result<Value, EngineError> {
        match &node.node_type {
            AstNodeType::Literal(v) => Ok(v.clone()),
            AstNodeType::Name { original, .. } => self.eval_name(original),
            AstNodeType::UnaryOp { op, expr } => self.eval_unary(op, expr),
            AstNodeType::BinaryOp { op, left, right } => self.eval_binary(op, left, right),
            AstNodeType::Function { name, args } => self.eval_function(name, args),
            AstNodeType::Conditional {
                then,
                cond,
                otherwise,
            } => self.eval_conditional(then, cond, otherwise),
        }
    }

    /* ===================  names  =================== */
    fn eval_name(&self, original: &str) -> Result<Value, EngineError> {
        if let Some(v) = self.env.lookup(original) {
            return Ok(v);
        }
        if let Some(b) = self.env.boolean_state(original) {
            return Ok(Value::Boolean(b));
        }
        Err(EngineError::new(EngineErrorKind::MissingDependency)
            .with_message(format!("name '{original}' is not in the evaluation context")))
    }

    /* ===================  unary ops  =================== */
    fn eval_unary(&self, op: &str, expr: &AstNode) -> Result<Value, EngineError> {
        let v = self.evaluate_ast(expr)?;
        if let Value::Alt(alt) = v {
            return Ok(Value::Alt(alt));
        }
        match op {
            "-" => match v {
                Value::Int(i) => match i.checked_neg() {
                    Some(n) => Ok(Value::Int(n)),
                    None => Ok(Value::Number(-(i as f64))),
                },
                Value::Number(n) => Ok(Value::Number(-n)),
                Value::Duration(d) => Ok(Value::Duration(-d)),
                Value::Boolean(b) => Ok(Value::Int(if b { -1 } else { 0 })),
                other => Err(EngineError::new(EngineErrorKind::Value)
                    .with_message(format!("cannot negate '{other}'"))),
            },
            "not" => Ok(Value::Boolean(!v.is_truthy())),
            _ => Err(EngineError::new(EngineErrorKind::Eval)
                .with_message(format!("unary op '{op}'"))),
        }
    }

    /* ===================  binary ops  =================== */
    fn eval_binary(
        &self,
        op: &str,
        left: &AstNode,
        right: &AstNode,
    ) -> Result<Value, EngineError> {
        // Boolean operators short-circuit; the deciding operand's truthiness
        // becomes the result.
        if op == "and" || op == "or" {
            let l = self.evaluate_ast(left)?;
            if let Value::Alt(alt) = l {
                return Ok(Value::Alt(alt));
            }
            let decided = match (op, l.is_truthy()) {
                ("and", false) => Some(false),
                ("or", true) => Some(true),
                _ => None,
            };
            if let Some(result) = decided {
                return Ok(Value::Boolean(result));
            }
            let r = self.evaluate_ast(right)?;
            if let Value::Alt(alt) = r {
                return Ok(Value::Alt(alt));
            }
            return Ok(Value::Boolean(r.is_truthy()));
        }

        let l = self.evaluate_ast(left)?;
        let r = self.evaluate_ast(right)?;

        if let Value::Alt(alt) = l {
            return Ok(Value::Alt(alt));
        }
        if let Value::Alt(alt) = r {
            return Ok(Value::Alt(alt));
        }

        match op {
            "==" => Ok(Value::Boolean(self.values_equal(&l, &r))),
            "!=" => Ok(Value::Boolean(!self.values_equal(&l, &r))),
            "<" | "<=" | ">" | ">=" => self.compare_ordered(op, &l, &r),
            "+" | "-" | "*" | "/" | "%" => self.arithmetic(op, l, r),
            _ => Err(EngineError::new(EngineErrorKind::Eval)
                .with_message(format!("binary op '{op}'"))),
        }
    }

    fn eval_conditional(
        &self,
        then: &AstNode,
        cond: &AstNode,
        otherwise: &AstNode,
    ) -> Result<Value, EngineError> {
        let c = self.evaluate_ast(cond)?;
        if let Value::Alt(alt) = c {
            return Ok(Value::Alt(alt));
        }
        if c.is_truthy() {
            self.evaluate_ast(then)
        } else {
            self.evaluate_ast(otherwise)
        }
    }

    /* ===================  function calls  =================== */
    fn eval_function(&self, name: &str, args: &[AstNode]) -> Result<Value, EngineError> {
        let Some(fun) = self.env.function(name) else {
            return Err(EngineError::new(EngineErrorKind::Name)
                .with_message(format!("unknown function '{name}'")));
        };
        let handles: Vec<ArgumentHandle> =
            args.iter().map(|n| ArgumentHandle::new(n, self)).collect();
        fun.dispatch(&handles, self.env)
    }

    /* ===================  arithmetic  =================== */
    fn arithmetic(&self, op: &str, l: Value, r: Value) -> Result<Value, EngineError> {
        use Value::*;

        // Strings are comparable, never concatenable.
        if matches!((&l, &r), (Text(_), _) | (_, Text(_))) {
            return Err(EngineError::new(EngineErrorKind::Value).with_message(format!(
                "operator '{op}' is not defined for strings ('{l}', '{r}')"
            )));
        }

        // Temporal cases first; everything else is numeric.
        match (op, &l, &r) {
            ("+", Duration(a), Duration(b)) => return Ok(Duration(*a + *b)),
            ("-", Duration(a), Duration(b)) => return Ok(Duration(*a - *b)),
            ("+", DateTime(dt), Duration(d)) | ("+", Duration(d), DateTime(dt)) => {
                return Ok(DateTime(*dt + *d));
            }
            ("-", DateTime(dt), Duration(d)) => return Ok(DateTime(*dt - *d)),
            ("-", DateTime(a), DateTime(b)) => return Ok(Duration(*a - *b)),
            ("+", Date(d), Duration(dur)) | ("+", Duration(dur), Date(d)) => {
                let dt = d.and_hms_opt(0, 0, 0).unwrap();
                return Ok(DateTime(dt + *dur));
            }
            ("-", Date(d), Duration(dur)) => {
                let dt = d.and_hms_opt(0, 0, 0).unwrap();
                return Ok(DateTime(dt - *dur));
            }
            ("-", Date(a), Date(b)) => {
                return Ok(Duration(chrono::Duration::days(
                    (*a - *b).num_days(),
                )));
            }
            ("*", Duration(d), v) | ("*", v, Duration(d)) if !matches!(v, Duration(_)) => {
                if let Some(n) = v.as_number() {
                    let secs = duration_to_seconds(d) * n;
                    return Ok(Duration(chrono::Duration::milliseconds(
                        (secs * 1_000.0) as i64,
                    )));
                }
            }
            _ => {}
        }

        // Integer arithmetic stays integral where it can.
        if let (Int(a), Int(b)) = (&l, &r) {
            let (a, b) = (*a, *b);
            match op {
                "+" => {
                    return Ok(a
                        .checked_add(b)
                        .map(Int)
                        .unwrap_or(Number(a as f64 + b as f64)));
                }
                "-" => {
                    return Ok(a
                        .checked_sub(b)
                        .map(Int)
                        .unwrap_or(Number(a as f64 - b as f64)));
                }
                "*" => {
                    return Ok(a
                        .checked_mul(b)
                        .map(Int)
                        .unwrap_or(Number(a as f64 * b as f64)));
                }
                "%" => {
                    if b == 0 {
                        return Err(EngineError::new(EngineErrorKind::Div)
                            .with_message("modulo by zero"));
                    }
                    // Sign follows the divisor.
                    return Ok(Int(((a % b) + b) % b));
                }
                _ => {}
            }
        }

        let (Some(a), Some(b)) = (l.as_number(), r.as_number()) else {
            return Err(EngineError::new(EngineErrorKind::Value).with_message(format!(
                "operator '{op}' is not defined for '{l}' and '{r}'"
            )));
        };

        match op {
            "+" => Ok(Number(a + b)),
            "-" => Ok(Number(a - b)),
            "*" => Ok(Number(a * b)),
            "/" => {
                if b == 0.0 {
                    Err(EngineError::new(EngineErrorKind::Div).with_message("division by zero"))
                } else {
                    Ok(Number(a / b))
                }
            }
            "%" => {
                if b == 0.0 {
                    Err(EngineError::new(EngineErrorKind::Div).with_message("modulo by zero"))
                } else {
                    // Sign follows the divisor.
                    Ok(Number(a - b * (a / b).floor()))
                }
            }
            _ => unreachable!(),
        }
    }

    /* ===================  comparison  =================== */
    fn values_equal(&self, l: &Value, r: &Value) -> bool {
        use Value::*;

        // Boolean state words compare against booleans through the
        // configured vocabulary: Text("on") == Boolean(true).
        match (l, r) {
            (Text(s), Boolean(b)) | (Boolean(b), Text(s)) => {
                if let Some(mapped) = self.env.boolean_state(s) {
                    return mapped == *b;
                }
            }
            _ => {}
        }

        if let (Some(a), Some(b)) = (l.as_number(), r.as_number()) {
            return a == b;
        }
        l == r
    }

    fn compare_ordered(&self, op: &str, l: &Value, r: &Value) -> Result<Value, EngineError> {
        use std::cmp::Ordering;
        use Value::*;

        let ordering: Option<Ordering> = match (l, r) {
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Date(a), Date(b)) => Some(a.cmp(b)),
            (DateTime(a), DateTime(b)) => Some(a.cmp(b)),
            (Duration(a), Duration(b)) => Some(a.cmp(b)),
            _ => match (l.as_number(), r.as_number()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        };

        let Some(ordering) = ordering else {
            return Err(EngineError::new(EngineErrorKind::Value).with_message(format!(
                "ordered comparison is not defined for '{l}' and '{r}'"
            )));
        };

        let result = match op {
            "<" => ordering == Ordering::Less,
            "<=" => ordering != Ordering::Greater,
            ">" => ordering == Ordering::Greater,
            ">=" => ordering != Ordering::Less,
            _ => unreachable!(),
        };
        Ok(Value::Boolean(result))
    }
}

#[cfg(test)]
mod tests {
    use crate::test_host::FormulaFixture;
    use synsor_common::{EngineErrorKind, Value};

    #[test]
    fn integer_arithmetic_stays_integral() {
        let fx = FormulaFixture::new();
        assert_eq!(fx.eval("7 + 3"), Ok(Value::Int(10)));
        assert_eq!(fx.eval("2 * 3 - 1"), Ok(Value::Int(5)));
        // Division is always float, even between integers.
        assert_eq!(fx.eval("7 / 2"), Ok(Value::Number(3.5)));
        assert_eq!(fx.eval("7 + 0.5"), Ok(Value::Number(7.5)));
    }

    #[test]
    fn modulo_sign_follows_divisor() {
        let fx = FormulaFixture::new();
        assert_eq!(fx.eval("-7 % 3"), Ok(Value::Int(2)));
        assert_eq!(fx.eval("7 % -3"), Ok(Value::Int(-2)));
        assert_eq!(fx.eval("7.5 % 2"), Ok(Value::Number(1.5)));
    }

    #[test]
    fn zero_divisors_are_domain_errors() {
        let fx = FormulaFixture::new();
        assert_eq!(fx.eval("1 / 0").unwrap_err().kind, EngineErrorKind::Div);
        assert_eq!(fx.eval("1 % 0").unwrap_err().kind, EngineErrorKind::Div);
    }

    #[test]
    fn comparison_rules() {
        let fx = FormulaFixture::new();
        // Text orders lexicographically; booleans compare numerically.
        assert_eq!(fx.eval("'alpha' < 'beta'"), Ok(Value::Boolean(true)));
        assert_eq!(fx.eval("True == 1"), Ok(Value::Boolean(true)));
        assert_eq!(fx.eval("2 >= 2.0"), Ok(Value::Boolean(true)));
        // Ordered comparison on mixed types is an error, equality is not.
        assert_eq!(
            fx.eval("1 < 'x'").unwrap_err().kind,
            EngineErrorKind::Value
        );
        assert_eq!(fx.eval("1 == 'x'"), Ok(Value::Boolean(false)));
    }

    #[test]
    fn boolean_operators_short_circuit() {
        let fx = FormulaFixture::new();
        // The untaken operand would divide by zero.
        assert_eq!(fx.eval("0 and 1 / 0"), Ok(Value::Boolean(false)));
        assert_eq!(fx.eval("1 or 1 / 0"), Ok(Value::Boolean(true)));
        assert_eq!(fx.eval("1 and 2"), Ok(Value::Boolean(true)));
        assert_eq!(fx.eval("not 0"), Ok(Value::Boolean(true)));
        assert_eq!(fx.eval("not 'text'"), Ok(Value::Boolean(false)));
    }

    #[test]
    fn unary_minus() {
        let fx = FormulaFixture::new().with_value("x", 4i64);
        assert_eq!(fx.eval("-x"), Ok(Value::Int(-4)));
        assert_eq!(fx.eval("-x * 2"), Ok(Value::Int(-8)));
        assert!(fx.eval("-'text'").is_err());
    }

    #[test]
    fn missing_names_and_functions() {
        let fx = FormulaFixture::new();
        assert_eq!(
            fx.eval("nonexistent + 1").unwrap_err().kind,
            EngineErrorKind::MissingDependency
        );
        assert_eq!(
            fx.eval("frobnicate(1)").unwrap_err().kind,
            EngineErrorKind::Name
        );
    }

    #[test]
    fn arity_is_enforced() {
        let fx = FormulaFixture::new();
        assert_eq!(fx.eval("abs()").unwrap_err().kind, EngineErrorKind::Value);
        assert_eq!(
            fx.eval("abs(1, 2)").unwrap_err().kind,
            EngineErrorKind::Value
        );
    }

    #[test]
    fn string_operators_are_rejected() {
        let fx = FormulaFixture::new();
        assert_eq!(
            fx.eval("'a' + 'b'").unwrap_err().kind,
            EngineErrorKind::Value
        );
        assert_eq!(
            fx.eval("'a' * 2").unwrap_err().kind,
            EngineErrorKind::Value
        );
    }
}
