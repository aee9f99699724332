pub mod ast;
pub mod build;
pub mod emit;
pub mod errors;
pub mod ir;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod prelude;
pub mod resolve;
pub mod span;
pub mod token;
pub mod typecheck;
pub mod types;
