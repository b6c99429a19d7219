pub mod request;
pub mod response;
pub mod stream;

pub use request::translate_request;
pub use response::translate_response;
pub use stream::GeminiStreamTranslator;
