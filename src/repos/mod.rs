pub mod client_repo;
pub mod error;
pub mod session_repo;
