//! Catalog data access
//!
//! Every function takes a `&mut SqliteConnection` so callers can compose
//! several steps inside one transaction (`&mut *tx`) or run a single step on
//! a pooled connection.

pub mod assignments;
pub mod frames;
pub mod goals;
pub mod master_frames;
pub mod predicates;
pub mod projects;

pub use frames::{insert_frame, Frame, NewFrame};
pub use predicates::{optional_eq, FramePredicate, TempRange};
