//! Linking module
//!
//! Provides the per-user state machine that walks a user through linking a
//! bank account and the JSON endpoints the linking client script drives it
//! through.

pub(crate) mod controller;
mod endpoints;

pub use controller::{LinkPhase, LinkSessionController};
pub use endpoints::{
    get_user_info, post_link_complete, post_link_event, post_link_exit, post_link_retry,
    post_link_session,
};
