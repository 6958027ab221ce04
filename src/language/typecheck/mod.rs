//! The type checking and late identifier resolution pass.
//!
//! A single walk over a package's parsed units that resolves names, infers
//! and checks types, narrows optionals across control flow, interns
//! structural user types, instantiates generic templates and reports
//! diagnostics. Errors never abort the pass; the checker substitutes a safe
//! placeholder type and continues.

mod checker;
mod compat;
mod instantiate;
mod narrow;

#[cfg(test)]
mod tests;

pub use checker::typecheck;
