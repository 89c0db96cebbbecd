//! HTTP handlers for statement-service.

pub mod auth;
pub mod export;
pub mod health;
pub mod ocr;
pub mod reference;
pub mod statements;

pub use auth::*;
pub use export::*;
pub use health::*;
pub use ocr::*;
pub use reference::*;
pub use statements::*;
