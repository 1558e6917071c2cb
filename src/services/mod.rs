pub mod authz;
pub mod provider;
