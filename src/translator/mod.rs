pub mod generic_api;
pub mod retry;

pub use generic_api::{GenericApiTranslator, RequestBody, extract_from_json_path};
pub use retry::RetryPolicy;
