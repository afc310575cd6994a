#![allow(unreachable_pub)]
#![allow(clippy::needless_pass_by_value)]

//! # Macros
//!
//! Procedural macros shared by the relay infrastructure crates.
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! relay-derive = { path = "../infra/derive" }
//! thiserror = "2"
//! ```
//!
//! The examples below are `ignore`d to avoid compiling in this crate; see
//! `tests/ui` for a compiled usage.

mod error;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Attribute macro for defining domain-specific error enums.
///
/// # Features
///
/// * **Automatic Derives**: Injects `#[derive(Debug, thiserror::Error)]` when missing.
/// * **Context Support**: Generates a companion `...Ext` trait that adds `.context()`
///   to any `Result` that can be converted into this error type.
/// * **Standard Conversions**: Implements `From<T>` for variants containing a source field,
///   enabling the use of the `?` operator for upstream errors.
/// * **Internal Fallback**: Provides `From<&'static str>` and `From<String>` when an
///   `Internal` variant is present.
/// * **Labels**: Generates `as_label()` returning a stable `snake_case` variant label
///   for log fields and metrics.
///
/// # Requirements
///
/// 1. The macro must be applied to an **enum** with named-field variants.
/// 2. A `context` field, when present, must be `Option<Cow<'static, str>>`.
/// 3. Variants wrapping external errors must carry a `source` field (or a field
///    marked `#[source]`/`#[from]`) **and** a `context` field, and nothing else.
///
/// # Example
///
/// ```rust,ignore
/// use relay_derive::relay_error;
/// use std::borrow::Cow;
///
/// #[relay_error]
/// pub enum QueueError {
///     #[error("IO error{}: {source}", format_context(.context))]
///     Io { source: std::io::Error, context: Option<Cow<'static, str>> },
///
///     #[error("Internal fault{}: {message}", format_context(.context))]
///     Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
/// }
///
/// fn open() -> Result<(), QueueError> {
///     std::fs::read("queue.bin").context("Reading queue snapshot")?;
///     Err("not implemented".into())
/// }
///
/// assert_eq!(QueueError::from("boom").as_label(), "internal");
/// ```
#[proc_macro_attribute]
pub fn relay_error(_args: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as DeriveInput);
    error::expand(input).into()
}
