//! Authorization-endpoint core: request admission, authentication
//! brokering, response assembly and encoding.

pub mod authn;
pub mod cookie;
pub mod error;
pub mod flow;
pub mod id_token;
pub mod redirect_uri;
pub mod request;
pub mod response_mode;
pub mod response_type;
pub mod userinfo;
