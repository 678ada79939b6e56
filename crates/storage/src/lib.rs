pub mod draft;
pub mod error;
pub mod schema;
pub mod sqlite;
pub mod traits;

pub use draft::DraftStash;
pub use error::GatewayError;
pub use sqlite::SqliteGateway;
pub use traits::*;
