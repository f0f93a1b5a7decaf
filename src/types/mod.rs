pub mod policy;
pub mod rule;
