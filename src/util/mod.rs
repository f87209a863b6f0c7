//! Utility functions for common operations.
//!
//! - **URL validation**: rejects private and loopback hosts before the bot
//!   downloads user-supplied URLs
//! - **Text processing**: character-based truncation and control character
//!   stripping for message fields
//! - **Files**: atomic overwrite for the feeds document

mod fs;
mod text;
mod url_validator;

pub use fs::atomic_write;
pub use text::{strip_control_chars, truncate_chars};
pub use url_validator::{validate_url, UrlValidationError};
