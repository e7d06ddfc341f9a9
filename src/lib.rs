// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 tagdex contributors

//! tagdex: Image Tag Catalog & Query Engine
//!
//! The core of an image/tag dataset editor: an in-memory catalog of images
//! and their tags with sidecar-file persistence and undo/redo, a boolean
//! filter evaluator for selecting scoped subsets, and an export dimension
//! optimizer that minimizes crop loss under bucket and resolution
//! constraints.

pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod history;
pub mod image;
pub mod target_dimension;

pub use catalog::{Catalog, ChangeReport, ConfirmationPrompt, Scope};
pub use config::{AppConfig, ExportConfig};
pub use error::{Result, TagdexError};
pub use filter::{FilterNode, Tokenizer};
