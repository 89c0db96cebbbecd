pub mod filename;
pub mod password;
pub mod text;
pub mod validation;

pub use filename::{secure_filename, stored_filename, ORIGINAL_FILENAME_MAX_CHARS};
pub use password::{hash_password, verify_password};
pub use text::truncate_chars;
pub use validation::ValidatedJson;
