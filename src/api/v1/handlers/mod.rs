pub mod authorization;
pub mod discovery;
