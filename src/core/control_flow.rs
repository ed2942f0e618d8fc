//! Condition evaluation and routing
//!
//! A small boolean DSL over state fields powers conditional edges:
//!
//! ```text
//! expr    := or_expr
//! or_expr := and_expr ('or' and_expr)*
//! and_expr:= unary ('and' unary)*
//! unary   := 'not'? atom
//! atom    := 'state.' IDENT (OP literal)? | '(' expr ')' | IDENT
//! ```
//!
//! Conditions are tokenized and parsed by recursive descent; nothing is
//! ever handed to an evaluator with host-language power. Missing state
//! fields evaluate to false, and the reserved sentinel `default` is true.

use serde_json::Value;

use super::state::{is_truthy, StateInstance};
use crate::config::{LoopConfig, RouteConfig, END};
use crate::error::ControlFlowError;

/// Evaluate a condition expression against the current state.
pub fn evaluate_condition(logic: &str, state: &StateInstance) -> Result<bool, ControlFlowError> {
    let logic = logic.trim();
    if logic.is_empty() || logic == "default" {
        return Ok(true);
    }

    reject_dangerous(logic)?;

    let tokens = tokenize(logic)?;
    let mut parser = Parser::new(&tokens, logic);
    let expr = parser.parse_expr()?;
    parser.expect_end()?;

    if !expr.references_state() {
        return Err(ControlFlowError(format!(
            "Condition must reference state fields: {}",
            logic
        )));
    }

    expr.evaluate(state)
}

/// Constructs known-unsafe even before parsing: dunder access and
/// eval-like keywords.
fn reject_dangerous(logic: &str) -> Result<(), ControlFlowError> {
    let lowered = logic.to_lowercase();
    if logic.contains("__")
        || ["import", "exec", "eval", "lambda"]
            .iter()
            .any(|kw| lowered.contains(kw))
    {
        return Err(ControlFlowError(format!(
            "Unsupported expression in condition: {}",
            logic
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Op(CmpOp),
    And,
    Or,
    Not,
    True,
    False,
    Number(f64),
    Str(String),
    StateField(String),
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

fn tokenize(logic: &str) -> Result<Vec<Token>, ControlFlowError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = logic.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' | '!' | '>' | '<' => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let (op, len) = match two.as_str() {
                    "==" => (CmpOp::Eq, 2),
                    "!=" => (CmpOp::Ne, 2),
                    ">=" => (CmpOp::Ge, 2),
                    "<=" => (CmpOp::Le, 2),
                    _ if c == '>' => (CmpOp::Gt, 1),
                    _ if c == '<' => (CmpOp::Lt, 1),
                    _ => {
                        return Err(ControlFlowError(format!(
                            "Unknown operator at '{}' in: {}",
                            two, logic
                        )))
                    }
                };
                tokens.push(Token::Op(op));
                i += len;
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    value.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ControlFlowError(format!(
                        "Unterminated string literal in: {}",
                        logic
                    )));
                }
                i += 1;
                tokens.push(Token::Str(value));
            }
            _ if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text.parse::<f64>().map_err(|_| {
                    ControlFlowError(format!("Invalid number '{}' in: {}", text, logic))
                })?;
                tokens.push(Token::Number(number));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    "not" => tokens.push(Token::Not),
                    "true" | "True" => tokens.push(Token::True),
                    "false" | "False" => tokens.push(Token::False),
                    "state" if i < chars.len() && chars[i] == '.' => {
                        i += 1;
                        let field_start = i;
                        while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                            i += 1;
                        }
                        if field_start == i {
                            return Err(ControlFlowError(format!(
                                "Expected field name after 'state.' in: {}",
                                logic
                            )));
                        }
                        let field: String = chars[field_start..i].iter().collect();
                        tokens.push(Token::StateField(field));
                    }
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            // Indexing, attribute chains, and call syntax never tokenize
            _ => {
                return Err(ControlFlowError(format!(
                    "Unsupported character '{}' in condition: {}",
                    c, logic
                )))
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    /// Truthiness check on a field; `explicit` marks a `state.` prefix
    Field { name: String, explicit: bool },
    Compare {
        field: String,
        op: CmpOp,
        literal: Literal,
    },
}

#[derive(Debug, Clone)]
enum Literal {
    Number(f64),
    Str(String),
    Bool(bool),
}

impl Expr {
    fn references_state(&self) -> bool {
        match self {
            Expr::Or(parts) | Expr::And(parts) => parts.iter().any(Expr::references_state),
            Expr::Not(inner) => inner.references_state(),
            Expr::Field { explicit, .. } => *explicit,
            Expr::Compare { .. } => true,
        }
    }

    fn evaluate(&self, state: &StateInstance) -> Result<bool, ControlFlowError> {
        match self {
            Expr::Or(parts) => {
                for part in parts {
                    if part.evaluate(state)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expr::And(parts) => {
                for part in parts {
                    if !part.evaluate(state)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expr::Not(inner) => Ok(!inner.evaluate(state)?),
            Expr::Field { name, .. } => Ok(state.get(name).map(is_truthy).unwrap_or(false)),
            Expr::Compare { field, op, literal } => {
                let Some(value) = state.get(field) else {
                    return Ok(false);
                };
                compare(value, *op, literal)
            }
        }
    }
}

fn compare(value: &Value, op: CmpOp, literal: &Literal) -> Result<bool, ControlFlowError> {
    match (value, literal) {
        (Value::Number(n), Literal::Number(lit)) => {
            let lhs = n.as_f64().unwrap_or(f64::NAN);
            Ok(apply_ord(lhs.partial_cmp(lit), op))
        }
        (Value::String(s), Literal::Str(lit)) => Ok(apply_ord(s.as_str().partial_cmp(lit.as_str()), op)),
        (Value::Bool(b), Literal::Bool(lit)) => match op {
            CmpOp::Eq => Ok(b == lit),
            CmpOp::Ne => Ok(b != lit),
            _ => Err(ControlFlowError(
                "Ordering comparison on bool field is not supported".into(),
            )),
        },
        // Mismatched types: equality is false, inequality true, ordering
        // is an evaluation error (callers skip the route).
        _ => match op {
            CmpOp::Eq => Ok(false),
            CmpOp::Ne => Ok(true),
            _ => Err(ControlFlowError(format!(
                "Cannot order-compare {:?} against literal",
                value
            ))),
        },
    }
}

fn apply_ord(ordering: Option<std::cmp::Ordering>, op: CmpOp) -> bool {
    use std::cmp::Ordering::*;
    match (ordering, op) {
        (Some(Equal), CmpOp::Eq | CmpOp::Ge | CmpOp::Le) => true,
        (Some(Less), CmpOp::Lt | CmpOp::Le | CmpOp::Ne) => true,
        (Some(Greater), CmpOp::Gt | CmpOp::Ge | CmpOp::Ne) => true,
        _ => false,
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], source: &'a str) -> Self {
        Self {
            tokens,
            pos: 0,
            source,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn error(&self, message: &str) -> ControlFlowError {
        ControlFlowError(format!("{} in condition: {}", message, self.source))
    }

    fn parse_expr(&mut self) -> Result<Expr, ControlFlowError> {
        let first = self.parse_and()?;
        let mut parts = vec![first];
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.pop().expect("non-empty")
        } else {
            Expr::Or(parts)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, ControlFlowError> {
        let first = self.parse_unary()?;
        let mut parts = vec![first];
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            parts.push(self.parse_unary()?);
        }
        Ok(if parts.len() == 1 {
            parts.pop().expect("non-empty")
        } else {
            Expr::And(parts)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ControlFlowError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, ControlFlowError> {
        match self.advance().cloned() {
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("Expected ')'")),
                }
            }
            Some(Token::StateField(field)) => self.maybe_comparison(field, true),
            Some(Token::Ident(name)) => self.maybe_comparison(name, false),
            Some(other) => Err(self.error(&format!("Unexpected token {:?}", other))),
            None => Err(self.error("Unexpected end of condition")),
        }
    }

    fn maybe_comparison(&mut self, field: String, explicit: bool) -> Result<Expr, ControlFlowError> {
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.advance();
            let literal = match self.advance().cloned() {
                Some(Token::Number(n)) => Literal::Number(n),
                Some(Token::Str(s)) => Literal::Str(s),
                Some(Token::True) => Literal::Bool(true),
                Some(Token::False) => Literal::Bool(false),
                // Unquoted words after an operator are treated as strings,
                // matching lenient configs like `state.phase == draft`
                Some(Token::Ident(word)) => Literal::Str(word),
                _ => return Err(self.error("Expected literal after comparison operator")),
            };
            if !explicit {
                return Err(self.error("Comparisons require a 'state.' field reference"));
            }
            return Ok(Expr::Compare { field, op, literal });
        }
        Ok(Expr::Field {
            name: field,
            explicit,
        })
    }

    fn expect_end(&mut self) -> Result<(), ControlFlowError> {
        if self.pos != self.tokens.len() {
            return Err(self.error("Trailing tokens"));
        }
        Ok(())
    }
}

/// Router for conditional edges: first true route wins; the default route
/// fires only when nothing else matches.
#[derive(Debug, Clone)]
pub struct ConditionalRouter {
    routes: Vec<RouteConfig>,
}

impl ConditionalRouter {
    /// Build a router, requiring exactly one default route.
    pub fn new(routes: Vec<RouteConfig>) -> Result<Self, ControlFlowError> {
        let defaults = routes
            .iter()
            .filter(|r| r.condition.logic.trim() == "default")
            .count();
        if defaults != 1 {
            return Err(ControlFlowError(
                "Routes must include exactly one default route (logic='default')".into(),
            ));
        }
        Ok(Self { routes })
    }

    /// Choose the successor for the current state.
    ///
    /// Routes whose condition fails to evaluate are skipped rather than
    /// aborting the workflow.
    pub fn route(&self, state: &StateInstance) -> String {
        let mut default_target = END.to_string();

        for route in &self.routes {
            if route.condition.logic.trim() == "default" {
                default_target = route.to.clone();
                continue;
            }
            match evaluate_condition(&route.condition.logic, state) {
                Ok(true) => return route.to.clone(),
                Ok(false) => {}
                Err(err) => {
                    tracing::debug!(
                        condition = %route.condition.logic,
                        error = %err,
                        "Skipping route with failing condition"
                    );
                }
            }
        }
        default_target
    }
}

/// Router for loop edges: iterate while the condition field is falsy and
/// the visit count is below the cap.
#[derive(Debug, Clone)]
pub struct LoopRouter {
    from_node: String,
    spec: LoopConfig,
}

impl LoopRouter {
    pub fn new(from_node: impl Into<String>, spec: LoopConfig) -> Self {
        Self {
            from_node: from_node.into(),
            spec,
        }
    }

    /// Choose between iterating (back to the origin) and exiting.
    ///
    /// The cap is strict: once `iteration >= max_iterations` the exit is
    /// taken even if the condition field is still falsy.
    pub fn route(&self, state: &StateInstance) -> String {
        let iteration = state.loop_iteration(&self.from_node);
        let condition_met = state
            .get(&self.spec.condition_field)
            .map(is_truthy)
            .unwrap_or(false);

        if condition_met || iteration >= u64::from(self.spec.max_iterations) {
            self.spec.exit_to.clone()
        } else {
            self.from_node.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConditionConfig, FieldType, StateFieldConfig, StateSchemaConfig};
    use crate::core::state::StateFactory;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn state_with(pairs: &[(&str, Value)]) -> StateInstance {
        let mut fields = BTreeMap::new();
        for (name, _) in pairs {
            fields.insert(
                name.to_string(),
                StateFieldConfig {
                    field_type: FieldType::Any,
                    required: false,
                    default: None,
                    description: None,
                },
            );
        }
        let factory = StateFactory::new(StateSchemaConfig { fields });
        let inputs = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        factory.build(&inputs).unwrap()
    }

    fn eval(logic: &str, pairs: &[(&str, Value)]) -> Result<bool, ControlFlowError> {
        evaluate_condition(logic, &state_with(pairs))
    }

    #[test]
    fn test_default_sentinel_is_true() {
        assert!(eval("default", &[]).unwrap());
        assert!(eval("  default  ", &[]).unwrap());
        assert!(eval("", &[]).unwrap());
    }

    #[test]
    fn test_numeric_comparisons() {
        let s = &[("score", json!(0.9))];
        assert!(eval("state.score > 0.8", s).unwrap());
        assert!(!eval("state.score > 0.95", s).unwrap());
        assert!(eval("state.score >= 0.9", s).unwrap());
        assert!(eval("state.score <= 0.9", s).unwrap());
        assert!(eval("state.score != 1", s).unwrap());
        assert!(eval("state.score == 0.9", s).unwrap());
    }

    #[test]
    fn test_int_field_against_float_literal() {
        assert!(eval("state.count >= 3", &[("count", json!(3))]).unwrap());
        assert!(eval("state.count < 3.5", &[("count", json!(3))]).unwrap());
    }

    #[test]
    fn test_string_comparisons() {
        let s = &[("phase", json!("draft"))];
        assert!(eval("state.phase == \"draft\"", s).unwrap());
        assert!(eval("state.phase == 'draft'", s).unwrap());
        assert!(!eval("state.phase == \"final\"", s).unwrap());
        assert!(eval("state.phase != \"final\"", s).unwrap());
    }

    #[test]
    fn test_missing_field_is_false() {
        assert!(!eval("state.missing", &[]).unwrap());
        assert!(!eval("state.missing > 1", &[]).unwrap());
        assert!(!eval("state.missing == \"x\"", &[]).unwrap());
    }

    #[test]
    fn test_truthiness_check() {
        assert!(eval("state.flag", &[("flag", json!(true))]).unwrap());
        assert!(!eval("state.flag", &[("flag", json!(false))]).unwrap());
        assert!(!eval("state.items", &[("items", json!([]))]).unwrap());
        assert!(eval("state.items", &[("items", json!([1]))]).unwrap());
    }

    #[test]
    fn test_not_and_double_negation() {
        let s = &[("flag", json!(true))];
        assert!(!eval("not state.flag", s).unwrap());
        assert!(eval("not not state.flag", s).unwrap());
    }

    #[test]
    fn test_compound_and_or() {
        let s = &[("score", json!(0.9)), ("approved", json!(true))];
        assert!(eval("state.score > 0.5 and state.approved", s).unwrap());
        assert!(!eval("state.score > 0.95 and state.approved", s).unwrap());
        assert!(eval("state.score > 0.95 or state.approved", s).unwrap());
        assert!(!eval("state.score > 0.95 or not state.approved", s).unwrap());
    }

    #[test]
    fn test_parenthesized_grouping() {
        let s = &[("a", json!(true)), ("b", json!(false)), ("c", json!(true))];
        assert!(eval("state.a and (state.b or state.c)", s).unwrap());
        assert!(!eval("state.a and (state.b or not state.c)", s).unwrap());
        assert!(eval("(state.a)", s).unwrap());
    }

    #[test]
    fn test_dangerous_expressions_rejected() {
        for logic in [
            "state.x.__class__",
            "import os",
            "state.x and exec",
            "eval(state.x)",
            "lambda: state.x",
            "state.items[0]",
        ] {
            assert!(eval(logic, &[("x", json!(1))]).is_err(), "{}", logic);
        }
    }

    #[test]
    fn test_expression_without_state_reference_rejected() {
        assert!(eval("true", &[]).is_err());
        assert!(eval("1 == 1", &[]).is_err());
    }

    #[test]
    fn test_type_mismatch_equality() {
        let s = &[("phase", json!("draft"))];
        assert!(!eval("state.phase == 5", s).unwrap());
        assert!(eval("state.phase != 5", s).unwrap());
        assert!(eval("state.phase > 5", s).is_err());
    }

    #[test]
    fn test_conditional_router_order_and_default() {
        let router = ConditionalRouter::new(vec![
            RouteConfig {
                condition: ConditionConfig {
                    logic: "state.score > 0.8".into(),
                },
                to: "high".into(),
            },
            RouteConfig {
                condition: ConditionConfig {
                    logic: "default".into(),
                },
                to: "low".into(),
            },
        ])
        .unwrap();

        assert_eq!(router.route(&state_with(&[("score", json!(0.9))])), "high");
        assert_eq!(router.route(&state_with(&[("score", json!(0.2))])), "low");
    }

    #[test]
    fn test_conditional_router_first_true_wins() {
        let router = ConditionalRouter::new(vec![
            RouteConfig {
                condition: ConditionConfig {
                    logic: "state.n > 1".into(),
                },
                to: "first".into(),
            },
            RouteConfig {
                condition: ConditionConfig {
                    logic: "state.n > 0".into(),
                },
                to: "second".into(),
            },
            RouteConfig {
                condition: ConditionConfig {
                    logic: "default".into(),
                },
                to: "fallback".into(),
            },
        ])
        .unwrap();

        assert_eq!(router.route(&state_with(&[("n", json!(5))])), "first");
        assert_eq!(router.route(&state_with(&[("n", json!(1))])), "second");
        assert_eq!(router.route(&state_with(&[("n", json!(0))])), "fallback");
    }

    #[test]
    fn test_conditional_router_requires_default() {
        let result = ConditionalRouter::new(vec![RouteConfig {
            condition: ConditionConfig {
                logic: "state.x".into(),
            },
            to: "a".into(),
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn test_conditional_router_skips_broken_condition() {
        let router = ConditionalRouter::new(vec![
            RouteConfig {
                condition: ConditionConfig {
                    logic: "state.x > ".into(),
                },
                to: "broken".into(),
            },
            RouteConfig {
                condition: ConditionConfig {
                    logic: "default".into(),
                },
                to: "safe".into(),
            },
        ])
        .unwrap();

        assert_eq!(router.route(&state_with(&[("x", json!(1))])), "safe");
    }

    #[test]
    fn test_loop_router_iterates_until_condition() {
        let router = LoopRouter::new(
            "step",
            LoopConfig {
                condition_field: "done".into(),
                exit_to: "END".into(),
                max_iterations: 3,
            },
        );

        let state = state_with(&[("done", json!(false))]);
        assert_eq!(router.route(&state), "step");

        let state = state_with(&[("done", json!(true))]);
        assert_eq!(router.route(&state), "END");
    }

    #[test]
    fn test_loop_router_cap_is_strict() {
        let router = LoopRouter::new(
            "step",
            LoopConfig {
                condition_field: "done".into(),
                exit_to: "finish".into(),
                max_iterations: 3,
            },
        );

        let mut state = state_with(&[("done", json!(false))]);
        for _ in 0..3 {
            state.increment_loop_iteration("step");
        }
        // Condition still false, but the cap forces the exit
        assert_eq!(router.route(&state), "finish");
    }
}
