//! Dashboard module
//!
//! The landing page after log in. Walks the user through linking a bank
//! account and, once one is connected, charts the spending it reports.

mod charts;
mod handlers;

pub use handlers::get_dashboard_page;
