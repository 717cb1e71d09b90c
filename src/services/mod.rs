pub mod backend;
pub mod entitlement;
pub mod storage;
