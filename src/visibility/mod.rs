//! Cell-level access control: the visibility expression language, its
//! evaluator, and the mapping of `(field, visibility)` pairs onto physical
//! field names.

mod eval;
mod expr;
mod fields;

pub use eval::{evaluate, Authorizations};
pub use expr::{is_term_byte, VisibilityExpr, MAX_NESTING};

/// Physical field naming for per-visibility property storage.
pub use fields::{VisibilityFieldEncoder, HASH_LEN};
