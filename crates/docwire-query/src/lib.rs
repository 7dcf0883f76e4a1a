//! Expression evaluator, query matcher, and update-operator AST (spec
//! §4.3, §4.4, and the parsing half of §4.5).

pub mod expression;
pub mod matcher;
pub mod update;

pub use expression::{eval, parse_expr, Expr, Op, Scope};
pub use matcher::{matches, parse_filter, FieldOp, FieldPredicate, MatchResult, Predicate};
pub use update::{parse_update, BitOp, CurrentDateKind, FieldUpdate, PullSpec, PushSpec, UpdateDocument, UpdateOp};
