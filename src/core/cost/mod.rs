pub mod aggregate;
pub mod block;
pub mod cache;
pub mod fetch;
pub mod pricing;
pub mod resolver;
pub mod scanner;
