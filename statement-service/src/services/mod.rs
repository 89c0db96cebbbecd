pub mod database;
pub mod export;
pub mod jwt;
pub mod metrics;
pub mod storage;

pub use database::Database;
pub use export::ExportFormat;
pub use jwt::{AccessTokenClaims, JwtService};
pub use storage::{LocalStorage, Storage};
