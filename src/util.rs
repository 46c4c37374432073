pub mod redact;
pub mod retry;
