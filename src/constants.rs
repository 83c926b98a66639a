// Defaults loaded from the environment (or a .env file), overridable on the command line.

use std::env;

pub const DEFAULT_PORT: u16 = 9900;
pub const DEFAULT_TYPING_DELAY_MS: u64 = 1000;

lazy_static::lazy_static! {
    pub static ref GEMINI_API_URL: String = env::var("GEMINI_API_URL").unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());
    pub static ref GEMINI_MODEL: String = env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string());
    pub static ref GEMINI_API_KEY: String = env::var("GEMINI_API_KEY").unwrap_or_default();
}
