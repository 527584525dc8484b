//! Canonical rendering of ASTs back to formula text.
//!
//! Canonical form: single spaces around binary operators and after commas,
//! parentheses only where precedence requires them, double-quoted strings.
//! Two formulas with the same canonical form share a fingerprint.

use crate::parser::{AstNode, AstNodeType};
use synsor_common::Value;

/// Binding power of a node for parenthesization, mirroring the token table.
fn precedence(node: &AstNode) -> u8 {
    match &node.node_type {
        AstNodeType::Conditional { .. } => 0,
        AstNodeType::BinaryOp { op, .. } => match op.as_str() {
            "or" => 1,
            "and" => 2,
            "==" | "!=" | "<" | "<=" | ">" | ">=" => 3,
            "+" | "-" => 4,
            _ => 5,
        },
        AstNodeType::UnaryOp { .. } => 6,
        _ => u8::MAX,
    }
}

/// Render an AST to its canonical formula string.
pub fn canonical_formula(ast: &AstNode) -> String {
    let mut out = String::new();
    render(ast, &mut out);
    out
}

fn render(node: &AstNode, out: &mut String) {
    match &node.node_type {
        AstNodeType::Literal(value) => render_literal(value, out),
        AstNodeType::Name { original, .. } => out.push_str(original),
        AstNodeType::UnaryOp { op, expr } => {
            out.push_str(op);
            if op == "not" {
                out.push(' ');
            }
            render_child(expr, precedence(node), out);
        }
        AstNodeType::BinaryOp { op, left, right } => {
            let prec = precedence(node);
            render_child(left, prec, out);
            out.push(' ');
            out.push_str(op);
            out.push(' ');
            // Right child at equal precedence needs parens: `a - (b - c)`.
            render_child_strict(right, prec, out);
        }
        AstNodeType::Function { name, args } => {
            out.push_str(name);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render(arg, out);
            }
            out.push(')');
        }
        AstNodeType::Conditional {
            then,
            cond,
            otherwise,
        } => {
            render_child(then, 1, out);
            out.push_str(" if ");
            render_child(cond, 1, out);
            out.push_str(" else ");
            render(otherwise, out);
        }
    }
}

fn render_child(child: &AstNode, parent_prec: u8, out: &mut String) {
    if precedence(child) < parent_prec {
        out.push('(');
        render(child, out);
        out.push(')');
    } else {
        render(child, out);
    }
}

fn render_child_strict(child: &AstNode, parent_prec: u8, out: &mut String) {
    if precedence(child) <= parent_prec {
        out.push('(');
        render(child, out);
        out.push(')');
    } else {
        render(child, out);
    }
}

fn render_literal(value: &Value, out: &mut String) {
    match value {
        Value::Text(s) => {
            out.push('"');
            for c in s.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
        Value::Boolean(b) => out.push_str(if *b { "True" } else { "False" }),
        Value::Empty => out.push_str("None"),
        // Whole floats keep their point so they reparse as floats.
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => {
            out.push_str(&format!("{n:.1}"));
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn canon(formula: &str) -> String {
        canonical_formula(&parse(formula).unwrap())
    }

    #[test]
    fn normalizes_spacing() {
        assert_eq!(canon("x+y*2"), "x + y * 2");
        assert_eq!(canon("min( a ,b )"), "min(a, b)");
    }

    #[test]
    fn keeps_required_parens_only() {
        assert_eq!(canon("(x + y) * 2"), "(x + y) * 2");
        assert_eq!(canon("(x) + (y)"), "x + y");
        assert_eq!(canon("a - (b - c)"), "a - (b - c)");
        assert_eq!(canon("(a - b) - c"), "a - b - c");
    }

    #[test]
    fn renders_conditionals_and_strings() {
        assert_eq!(canon("'x' if a>0 else 'y'"), "\"x\" if a > 0 else \"y\"");
    }

    #[test]
    fn canonical_form_is_stable() {
        let once = canon("not a==b and c");
        assert_eq!(canon(&once), once);
    }

    #[test]
    fn whole_floats_stay_floats() {
        assert_eq!(canon("x * 2.0"), "x * 2.0");
        let ast = parse("x * 2.0").unwrap();
        let reparsed = parse(&canonical_formula(&ast)).unwrap();
        assert_eq!(ast.fingerprint(), reparsed.fingerprint());
    }
}
