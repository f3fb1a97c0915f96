#![allow(dead_code)]

pub mod builders;
pub mod http;
pub mod resolvers;

pub use builders::{CatalogBuilder, TokenBuilder};
pub use resolvers::CountingResolver;
