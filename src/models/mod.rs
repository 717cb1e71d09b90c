pub mod common;
pub mod entitlement;
pub mod product;
