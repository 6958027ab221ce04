pub mod ast;
pub mod compiler;
pub mod errors;
pub mod package;
pub mod scope;
pub mod span;
pub mod symbols;
pub mod transform;
pub mod typecheck;
