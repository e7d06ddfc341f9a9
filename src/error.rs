// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 tagdex contributors

//! Error types for tagdex

use thiserror::Error;

/// Result type alias for tagdex operations
pub type Result<T> = std::result::Result<T, TagdexError>;

/// tagdex error types
#[derive(Error, Debug)]
pub enum TagdexError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Directory error: {0}")]
    Directory(String),
}
