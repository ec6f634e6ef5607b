//! # Query Module
//!
//! Filter expressions over documents and the parser for the client `where`
//! syntax.

mod filter;
mod parser;

pub use filter::{lookup_path, Clause, Constraint, Query};
pub use parser::{parse_include, parse_order, parse_where, FindOptions, OrderBy, QueryOptions};
