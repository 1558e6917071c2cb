//! Provider-level services: capability negotiation and metadata.

pub mod capabilities;
