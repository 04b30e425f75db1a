//! The canonical expression tree for stored defaults, generation expressions
//! and check constraints.
//!
//! The parsed tree is the in-memory representation of record; catalog rows
//! store its deterministic text encoding, and the tree is re-derived from
//! text only when reading a row back.

use cinderdb_primitives::{AttrNumber, CollationId, GeneratedKind, RoutineId, TypeId, DEFAULT_COLLATION};
use serde::{Deserialize, Serialize};

use crate::desc::TupleDescriptor;
use crate::error::{ExpressionError, Result};
use crate::types;

/// Maximum tree depth accepted by transformation and checking.
pub const MAX_EXPR_DEPTH: usize = 128;

/// A constant datum inside an expression or partition bound.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, derive_more::From)]
pub enum Value {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float8(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Volatility {
    Immutable,
    Stable,
    Volatile,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const {
        value: Value,
        type_id: TypeId,
    },
    /// Unresolved column reference; only valid in raw trees.
    ColumnRef {
        name: String,
    },
    /// Resolved reference to a column of the target relation.
    Var {
        attno: AttrNumber,
        type_id: TypeId,
        collation: CollationId,
    },
    /// Reference to the whole row of the target relation.
    WholeRow,
    Func {
        routine: RoutineId,
        name: String,
        volatility: Volatility,
        args: Vec<Expr>,
        result: TypeId,
    },
    Op {
        routine: RoutineId,
        name: String,
        args: Vec<Expr>,
        result: TypeId,
    },
    Cast {
        arg: Box<Expr>,
        to: TypeId,
        typmod: i32,
    },
    Collate {
        arg: Box<Expr>,
        collation: CollationId,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    IsNull {
        arg: Box<Expr>,
        negated: bool,
    },
}

impl Expr {
    pub fn null_const(type_id: TypeId) -> Expr {
        Expr::Const {
            value: Value::Null,
            type_id,
        }
    }

    pub fn int4(v: i32) -> Expr {
        Expr::Const {
            value: Value::Int4(v),
            type_id: types::INT4,
        }
    }

    pub fn text(v: impl Into<String>) -> Expr {
        Expr::Const {
            value: Value::Text(v.into()),
            type_id: types::TEXT,
        }
    }

    pub fn column(name: impl Into<String>) -> Expr {
        Expr::ColumnRef { name: name.into() }
    }

    /// Result type of the (transformed) expression.
    pub fn type_of(&self) -> TypeId {
        match self {
            Expr::Const { type_id, .. } => *type_id,
            Expr::ColumnRef { .. } => types::UNKNOWN,
            Expr::Var { type_id, .. } => *type_id,
            Expr::WholeRow => types::RECORD,
            Expr::Func { result, .. } => *result,
            Expr::Op { result, .. } => *result,
            Expr::Cast { to, .. } => *to,
            Expr::Collate { arg, .. } => arg.type_of(),
            Expr::And(_) | Expr::Or(_) | Expr::Not(_) | Expr::IsNull { .. } => types::BOOL,
        }
    }

    /// Pre-order traversal over the whole tree.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Const { .. } | Expr::ColumnRef { .. } | Expr::Var { .. } | Expr::WholeRow => {}
            Expr::Func { args, .. } | Expr::Op { args, .. } | Expr::And(args) | Expr::Or(args) => {
                for arg in args {
                    arg.walk(f);
                }
            }
            Expr::Cast { arg, .. } | Expr::Collate { arg, .. } | Expr::Not(arg) | Expr::IsNull { arg, .. } => {
                arg.walk(f)
            }
        }
    }

    /// Attribute numbers of all `Var`s in the tree, sorted and deduplicated.
    pub fn pull_column_refs(&self) -> Vec<AttrNumber> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let Expr::Var { attno, .. } = node {
                out.push(*attno);
            }
        });
        out.sort();
        out.dedup();
        out
    }

    pub fn contains_whole_row(&self) -> bool {
        let mut found = false;
        self.walk(&mut |node| found |= matches!(node, Expr::WholeRow));
        found
    }

    pub fn contains_volatile(&self) -> bool {
        let mut found = false;
        self.walk(&mut |node| {
            if let Expr::Func { volatility, .. } = node {
                found |= *volatility == Volatility::Volatile;
            }
        });
        found
    }

    /// True when any function in the tree is not immutable.
    pub fn contains_mutable(&self) -> bool {
        let mut found = false;
        self.walk(&mut |node| {
            if let Expr::Func { volatility, .. } = node {
                found |= *volatility != Volatility::Immutable;
            }
        });
        found
    }

    /// A bare null constant, i.e. a default equivalent to no default at all.
    pub fn is_null_const(&self) -> bool {
        matches!(self, Expr::Const { value: Value::Null, .. })
    }

    /// Deterministic text encoding stored in catalog rows.
    pub fn to_stored_text(&self) -> String {
        serde_json::to_string(self).expect("expression trees always serialize")
    }

    pub fn from_stored_text(text: &str) -> Result<Expr> {
        serde_json::from_str(text)
            .map_err(|e| ExpressionError::BadStoredText(e.to_string()).into())
    }
}

/// What the raw tree is being transformed as. Controls which references are
/// legal and how errors read.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExprKind {
    ColumnDefault,
    GeneratedColumn,
    CheckConstraint,
    PartitionBound,
}

/// Name-resolution scope for one transformation: the relation under
/// construction or alteration.
pub struct ParseContext<'a> {
    pub rel_name: &'a str,
    pub descriptor: &'a TupleDescriptor,
}

impl<'a> ParseContext<'a> {
    pub fn new(rel_name: &'a str, descriptor: &'a TupleDescriptor) -> Self {
        Self { rel_name, descriptor }
    }
}

/// Transforms a raw tree: column references resolve to `Var`s against the
/// context relation, reference legality is enforced per `kind`.
///
/// The range table of the resulting expression is the single context
/// relation; cross-relation references are unrepresentable by construction.
pub fn transform_expr(ctx: &ParseContext<'_>, raw: &Expr, kind: ExprKind) -> Result<Expr> {
    transform_at_depth(ctx, raw, kind, 0)
}

fn transform_at_depth(ctx: &ParseContext<'_>, raw: &Expr, kind: ExprKind, depth: usize) -> Result<Expr> {
    if depth > MAX_EXPR_DEPTH {
        return Err(ExpressionError::DepthExceeded.into());
    }
    let recurse =
        |args: &[Expr]| -> Result<Vec<Expr>> { args.iter().map(|a| transform_at_depth(ctx, a, kind, depth + 1)).collect() };
    Ok(match raw {
        Expr::ColumnRef { name } => {
            if kind == ExprKind::ColumnDefault {
                return Err(ExpressionError::VariableInDefault.into());
            }
            let (attno, attr) = ctx
                .descriptor
                .find_by_name(name)
                .ok_or_else(|| ExpressionError::UnknownColumn(name.clone()))?;
            Expr::Var {
                attno,
                type_id: attr.type_id,
                collation: attr.collation,
            }
        }
        Expr::Var { .. } => {
            if kind == ExprKind::ColumnDefault {
                return Err(ExpressionError::VariableInDefault.into());
            }
            raw.clone()
        }
        Expr::WholeRow => {
            if kind == ExprKind::ColumnDefault {
                return Err(ExpressionError::VariableInDefault.into());
            }
            Expr::WholeRow
        }
        Expr::Const { .. } => raw.clone(),
        Expr::Func {
            routine,
            name,
            volatility,
            args,
            result,
        } => Expr::Func {
            routine: *routine,
            name: name.clone(),
            volatility: *volatility,
            args: recurse(args)?,
            result: *result,
        },
        Expr::Op {
            routine,
            name,
            args,
            result,
        } => Expr::Op {
            routine: *routine,
            name: name.clone(),
            args: recurse(args)?,
            result: *result,
        },
        Expr::Cast { arg, to, typmod } => Expr::Cast {
            arg: Box::new(transform_at_depth(ctx, arg, kind, depth + 1)?),
            to: *to,
            typmod: *typmod,
        },
        Expr::Collate { arg, collation } => Expr::Collate {
            arg: Box::new(transform_at_depth(ctx, arg, kind, depth + 1)?),
            collation: *collation,
        },
        Expr::And(args) => Expr::And(recurse(args)?),
        Expr::Or(args) => Expr::Or(recurse(args)?),
        Expr::Not(arg) => Expr::Not(Box::new(transform_at_depth(ctx, arg, kind, depth + 1)?)),
        Expr::IsNull { arg, negated } => Expr::IsNull {
            arg: Box::new(transform_at_depth(ctx, arg, kind, depth + 1)?),
            negated: *negated,
        },
    })
}

fn numeric_family(id: TypeId) -> bool {
    matches!(id, types::INT2 | types::INT4 | types::INT8 | types::FLOAT4 | types::FLOAT8)
}

fn text_family(id: TypeId) -> bool {
    matches!(id, types::TEXT | types::VARCHAR)
}

/// Whether an assignment-level cast from `source` to `target` exists.
fn assignment_cast_ok(source: TypeId, target: TypeId) -> bool {
    if source == target {
        return true;
    }
    (numeric_family(source) && numeric_family(target)) || (text_family(source) && text_family(target))
}

/// Coerces `expr` to `(target, typmod)` with assignment semantics.
/// Returns `None` when no cast pathway exists; the caller owns the error.
pub fn coerce_to_target_type(expr: Expr, target: TypeId, typmod: i32) -> Option<Expr> {
    let source = expr.type_of();
    if source == target {
        if typmod >= 0 {
            return Some(Expr::Cast {
                arg: Box::new(expr),
                to: target,
                typmod,
            });
        }
        return Some(expr);
    }
    // Untyped literals acquire the target type directly.
    if source == types::UNKNOWN || assignment_cast_ok(source, target) {
        return Some(Expr::Cast {
            arg: Box::new(expr),
            to: target,
            typmod,
        });
    }
    None
}

/// Coerces a check-constraint expression to boolean.
pub fn coerce_to_boolean(expr: Expr, context: &str) -> Result<Expr> {
    let ty = expr.type_of();
    if ty == types::BOOL {
        return Ok(expr);
    }
    if ty == types::UNKNOWN {
        return Ok(Expr::Cast {
            arg: Box::new(expr),
            to: types::BOOL,
            typmod: -1,
        });
    }
    Err(ExpressionError::NotBoolean(context.to_string()).into())
}

/// Resolves the collation label of an expression: an explicit COLLATE wins,
/// otherwise the common collation of the inputs, otherwise the default.
pub fn expr_collation(expr: &Expr) -> CollationId {
    match expr {
        Expr::Collate { collation, .. } => *collation,
        Expr::Var { collation, .. } => *collation,
        Expr::Const { type_id, .. } => {
            if text_family(*type_id) {
                DEFAULT_COLLATION
            } else {
                CollationId::INVALID
            }
        }
        Expr::Cast { arg, to, .. } => {
            if text_family(*to) {
                let inner = expr_collation(arg);
                if inner.is_valid() {
                    inner
                } else {
                    DEFAULT_COLLATION
                }
            } else {
                CollationId::INVALID
            }
        }
        Expr::Func { args, result, .. } | Expr::Op { args, result, .. } => {
            if !text_family(*result) {
                return CollationId::INVALID;
            }
            args.iter()
                .map(expr_collation)
                .find(|c| c.is_valid())
                .unwrap_or(DEFAULT_COLLATION)
        }
        _ => CollationId::INVALID,
    }
}

/// Walks the tree and pins down input collations, pushing explicit COLLATE
/// labels onto the `Var`s and `Const`s beneath them.
pub fn assign_expr_collations(expr: &mut Expr) {
    fn push(expr: &mut Expr, coll: Option<CollationId>) {
        match expr {
            Expr::Collate { arg, collation } => push(arg, Some(*collation)),
            Expr::Var { collation, .. } => {
                if let Some(c) = coll {
                    *collation = c;
                }
            }
            Expr::Func { args, .. } | Expr::Op { args, .. } | Expr::And(args) | Expr::Or(args) => {
                for arg in args {
                    push(arg, coll);
                }
            }
            Expr::Cast { arg, .. } | Expr::Not(arg) | Expr::IsNull { arg, .. } => push(arg, coll),
            Expr::Const { .. } | Expr::ColumnRef { .. } | Expr::WholeRow => {}
        }
    }
    push(expr, None);
}

/// Checks that a generation expression does not lean on another generated
/// column or the whole row.
pub fn check_generation_expr(descriptor: &TupleDescriptor, expr: &Expr) -> Result<()> {
    if expr.contains_whole_row() {
        return Err(ExpressionError::GeneratedWholeRow.into());
    }
    for attno in expr.pull_column_refs() {
        if let Some(attr) = descriptor.attr(attno) {
            if attr.generated != GeneratedKind::None {
                return Err(ExpressionError::GeneratedRefGenerated(attr.name.clone()).into());
            }
        }
    }
    if expr.contains_mutable() {
        return Err(ExpressionError::GeneratedNotImmutable.into());
    }
    Ok(())
}

fn cast_value(value: Value, to: TypeId) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }
    Some(match (value, to) {
        (Value::Int2(v), types::INT4) => Value::Int4(v as i32),
        (Value::Int2(v), types::INT8) => Value::Int8(v as i64),
        (Value::Int4(v), types::INT8) => Value::Int8(v as i64),
        (Value::Int4(v), types::INT2) => Value::Int2(i16::try_from(v).ok()?),
        (Value::Int8(v), types::INT4) => Value::Int4(i32::try_from(v).ok()?),
        (Value::Int8(v), types::INT2) => Value::Int2(i16::try_from(v).ok()?),
        (Value::Int2(v), types::FLOAT8) => Value::Float8(v as f64),
        (Value::Int4(v), types::FLOAT8) => Value::Float8(v as f64),
        (Value::Int8(v), types::FLOAT8) => Value::Float8(v as f64),
        (Value::Text(v), types::TEXT | types::VARCHAR) => Value::Text(v),
        (Value::Text(v), types::BOOL) => match v.as_str() {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            _ => return None,
        },
        (v, t) if constant_type_matches(&v, t) => v,
        _ => return None,
    })
}

fn constant_type_matches(value: &Value, ty: TypeId) -> bool {
    matches!(
        (value, ty),
        (Value::Bool(_), types::BOOL)
            | (Value::Int2(_), types::INT2)
            | (Value::Int4(_), types::INT4)
            | (Value::Int8(_), types::INT8)
            | (Value::Float8(_), types::FLOAT8)
            | (Value::Text(_), types::TEXT | types::VARCHAR)
            | (Value::Bytes(_), types::BYTEA)
    )
}

/// Best-effort one-time evaluation of a non-volatile expression to a scalar.
///
/// Used to pre-compute the missing value stored for fast-path ALTER ADD
/// COLUMN defaults. Returns `None` when the expression is not foldable here,
/// in which case the caller skips the missing-value optimization.
pub fn eval_const(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Const { value, .. } => Some(value.clone()),
        Expr::Cast { arg, to, .. } => cast_value(eval_const(arg)?, *to),
        Expr::Collate { arg, .. } => eval_const(arg),
        Expr::Not(arg) => match eval_const(arg)? {
            Value::Bool(b) => Some(Value::Bool(!b)),
            Value::Null => Some(Value::Null),
            _ => None,
        },
        Expr::IsNull { arg, negated } => {
            let v = eval_const(arg)?;
            Some(Value::Bool(v.is_null() != *negated))
        }
        Expr::And(args) => fold_bool(args, true),
        Expr::Or(args) => fold_bool(args, false),
        Expr::Op { name, args, .. } if args.len() == 2 => {
            let lhs = eval_const(&args[0])?;
            let rhs = eval_const(&args[1])?;
            eval_binary_op(name, lhs, rhs)
        }
        Expr::Func {
            name,
            volatility: Volatility::Immutable,
            args,
            ..
        } => match (name.as_str(), args.as_slice()) {
            ("abs", [arg]) => match eval_const(arg)? {
                Value::Int4(v) => Some(Value::Int4(v.checked_abs()?)),
                Value::Int8(v) => Some(Value::Int8(v.checked_abs()?)),
                Value::Float8(v) => Some(Value::Float8(v.abs())),
                _ => None,
            },
            ("upper", [arg]) => match eval_const(arg)? {
                Value::Text(v) => Some(Value::Text(v.to_uppercase())),
                _ => None,
            },
            ("lower", [arg]) => match eval_const(arg)? {
                Value::Text(v) => Some(Value::Text(v.to_lowercase())),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

fn fold_bool(args: &[Expr], and: bool) -> Option<Value> {
    let mut saw_null = false;
    for arg in args {
        match eval_const(arg)? {
            Value::Bool(b) => {
                if b != and {
                    return Some(Value::Bool(!and));
                }
            }
            Value::Null => saw_null = true,
            _ => return None,
        }
    }
    if saw_null {
        Some(Value::Null)
    } else {
        Some(Value::Bool(and))
    }
}

fn eval_binary_op(name: &str, lhs: Value, rhs: Value) -> Option<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Some(Value::Null);
    }
    let as_i64 = |v: &Value| match v {
        Value::Int2(x) => Some(*x as i64),
        Value::Int4(x) => Some(*x as i64),
        Value::Int8(x) => Some(*x),
        _ => None,
    };
    match name {
        "+" | "-" | "*" => {
            let (a, b) = (as_i64(&lhs)?, as_i64(&rhs)?);
            let out = match name {
                "+" => a.checked_add(b)?,
                "-" => a.checked_sub(b)?,
                _ => a.checked_mul(b)?,
            };
            Some(match (lhs, rhs) {
                (Value::Int8(_), _) | (_, Value::Int8(_)) => Value::Int8(out),
                _ => Value::Int4(i32::try_from(out).ok()?),
            })
        }
        "||" => match (lhs, rhs) {
            (Value::Text(a), Value::Text(b)) => Some(Value::Text(a + &b)),
            _ => None,
        },
        "=" | "<>" | "<" | "<=" | ">" | ">=" => {
            let ord = match (&lhs, &rhs) {
                (Value::Text(a), Value::Text(b)) => a.cmp(b),
                _ => as_i64(&lhs)?.cmp(&as_i64(&rhs)?),
            };
            let ok = match name {
                "=" => ord.is_eq(),
                "<>" => ord.is_ne(),
                "<" => ord.is_lt(),
                "<=" => ord.is_le(),
                ">" => ord.is_gt(),
                _ => ord.is_ge(),
            };
            Some(Value::Bool(ok))
        }
        _ => None,
    }
}

/// Convenience constructor for the usual comparison operator shape.
pub fn binary_op(name: &str, lhs: Expr, rhs: Expr, result: TypeId) -> Expr {
    Expr::Op {
        routine: RoutineId(op_routine(name)),
        name: name.to_string(),
        args: vec![lhs, rhs],
        result,
    }
}

fn op_routine(name: &str) -> u32 {
    // Stable ids for the built-in operator routines; anything else hashes
    // into the user range.
    match name {
        "=" => 91,
        "<>" => 92,
        "<" => 93,
        "<=" => 94,
        ">" => 95,
        ">=" => 96,
        "+" => 101,
        "-" => 102,
        "*" => 103,
        "||" => 110,
        _ => 4096 + name.bytes().fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32)) % 4096,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{AttributeDefinition, TupleDescriptor};
    use pretty_assertions::assert_eq;

    fn desc() -> TupleDescriptor {
        let rows = types::builtin_type_rows();
        let int4 = rows.iter().find(|r| r.id == types::INT4).unwrap();
        let text = rows.iter().find(|r| r.id == types::TEXT).unwrap();
        TupleDescriptor::new(vec![
            AttributeDefinition::from_type("x", int4),
            AttributeDefinition::from_type("label", text),
        ])
    }

    #[test]
    fn transform_resolves_columns() {
        let desc = desc();
        let ctx = ParseContext::new("t", &desc);
        let raw = binary_op(">", Expr::column("x"), Expr::int4(0), types::BOOL);
        let cooked = transform_expr(&ctx, &raw, ExprKind::CheckConstraint).unwrap();
        assert_eq!(cooked.pull_column_refs(), vec![AttrNumber(1)]);
        assert_eq!(cooked.type_of(), types::BOOL);
    }

    #[test]
    fn default_rejects_column_refs() {
        let desc = desc();
        let ctx = ParseContext::new("t", &desc);
        let raw = Expr::column("x");
        let err = transform_expr(&ctx, &raw, ExprKind::ColumnDefault).unwrap_err();
        assert!(matches!(
            err.as_expression(),
            Some(ExpressionError::VariableInDefault)
        ));
    }

    #[test]
    fn unknown_column_is_reported() {
        let desc = desc();
        let ctx = ParseContext::new("t", &desc);
        let err = transform_expr(&ctx, &Expr::column("nope"), ExprKind::CheckConstraint).unwrap_err();
        assert!(matches!(err.as_expression(), Some(ExpressionError::UnknownColumn(n)) if n == "nope"));
    }

    #[test]
    fn assignment_coercion() {
        let widened = coerce_to_target_type(Expr::int4(5), types::INT8, -1).unwrap();
        assert_eq!(widened.type_of(), types::INT8);
        assert!(coerce_to_target_type(Expr::text("x"), types::INT4, -1).is_none());
        // Same type, no typmod: expression passes through untouched.
        assert_eq!(coerce_to_target_type(Expr::int4(5), types::INT4, -1).unwrap(), Expr::int4(5));
    }

    #[test]
    fn boolean_coercion() {
        let ok = coerce_to_boolean(
            binary_op("=", Expr::int4(1), Expr::int4(1), types::BOOL),
            "chk",
        )
        .unwrap();
        assert_eq!(ok.type_of(), types::BOOL);
        assert!(coerce_to_boolean(Expr::int4(1), "chk").is_err());
    }

    #[test]
    fn const_folding() {
        let e = binary_op("+", Expr::int4(2), Expr::int4(3), types::INT4);
        assert_eq!(eval_const(&e), Some(Value::Int4(5)));
        let cast = Expr::Cast {
            arg: Box::new(Expr::int4(7)),
            to: types::INT8,
            typmod: -1,
        };
        assert_eq!(eval_const(&cast), Some(Value::Int8(7)));
        // Vars are not foldable.
        let var = Expr::Var {
            attno: AttrNumber(1),
            type_id: types::INT4,
            collation: CollationId::INVALID,
        };
        assert_eq!(eval_const(&var), None);
    }

    #[test]
    fn null_propagates_through_operators() {
        let e = binary_op("+", Expr::null_const(types::INT4), Expr::int4(3), types::INT4);
        assert_eq!(eval_const(&e), Some(Value::Null));
    }

    #[test]
    fn volatility_walks() {
        let now = Expr::Func {
            routine: RoutineId(1299),
            name: "now".into(),
            volatility: Volatility::Volatile,
            args: vec![],
            result: types::INT8,
        };
        assert!(now.contains_volatile());
        assert!(now.contains_mutable());
        assert!(!Expr::int4(1).contains_volatile());
    }

    #[test]
    fn stored_text_round_trip() {
        let desc = desc();
        let ctx = ParseContext::new("t", &desc);
        let raw = binary_op(">", Expr::column("x"), Expr::int4(10), types::BOOL);
        let cooked = transform_expr(&ctx, &raw, ExprKind::CheckConstraint).unwrap();
        let text = cooked.to_stored_text();
        let back = Expr::from_stored_text(&text).unwrap();
        assert_eq!(back, cooked);
        // Deterministic: identical trees encode to identical text.
        assert_eq!(text, back.to_stored_text());
    }

    #[test]
    fn collation_resolution() {
        let explicit = Expr::Collate {
            arg: Box::new(Expr::text("a")),
            collation: types::COLLATION_C,
        };
        assert_eq!(expr_collation(&explicit), types::COLLATION_C);
        assert_eq!(expr_collation(&Expr::text("a")), DEFAULT_COLLATION);
        assert_eq!(expr_collation(&Expr::int4(1)), CollationId::INVALID);
    }
}
