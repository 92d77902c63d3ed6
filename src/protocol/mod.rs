//! Argument protocol - the tagged, language-neutral value vector
//!
//! Architecture:
//! - `types.rs` - type tags, argument positions, the raw `OifArgs` view and `ArgVector`
//! - `array.rs` - dense array descriptor borrowed from the caller
//! - `callback.rs` - callback values and origin languages
//!
//! The vector never owns the values it points at: the caller keeps them
//! alive for the duration of one call.

mod array;
mod callback;
mod types;

pub use array::{OifArrayF64, ShapeError};
pub use callback::{Lang, OifCallback};
pub use types::{ArgPosition, ArgRef, ArgType, ArgVector, Direction, OifArgs};

#[cfg(test)]
mod tests;
