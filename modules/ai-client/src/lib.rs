pub mod claude;
pub mod error;
pub mod schema;

pub use claude::Claude;
pub use error::AiError;
pub use schema::StructuredOutput;
