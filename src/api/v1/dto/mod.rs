pub mod authorize_request;
pub mod resume_request;
pub mod suspend_response;
