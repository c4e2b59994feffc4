//! Feature hooks
//!
//! Typed views over the household document, one per feature area. Each
//! hook owns a clone of the shared [`DocHandle`](crate::doc::DocHandle),
//! so mutations made through any hook replicate like any other local
//! write. Hooks never block on the network; they read and write the local
//! replica only.

pub mod bills;
pub mod calendar;
pub mod chores;
pub mod messages;
pub mod users;
pub mod wellness;

pub use bills::{Bills, Shopping};
pub use calendar::{expand_occurrences, Calendar};
pub use chores::Chores;
pub use messages::Messages;
pub use users::Users;
pub use wellness::{Feedback, Wellness};
