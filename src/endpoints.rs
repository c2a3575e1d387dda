//! The API endpoints URIs.

/// The root route which redirects to the dashboard or log in page.
pub const ROOT: &str = "/";
/// The landing page for logged in users.
pub const DASHBOARD_VIEW: &str = "/dashboard";
/// The page for displaying the linked bank account's transactions.
pub const TRANSACTIONS_VIEW: &str = "/transactions";
/// The route for getting the log in page.
pub const LOG_IN_VIEW: &str = "/log_in";
/// The page to display when an internal server error occurs.
pub const INTERNAL_ERROR_VIEW: &str = "/error";
/// The route for static files.
pub const STATIC: &str = "/static";

/// The route to request a cup of coffee (experimental).
pub const COFFEE: &str = "/api/coffee";
/// The route for logging in a user.
pub const LOG_IN_API: &str = "/api/log_in";
/// The route for the client to log out the current user.
pub const LOG_OUT: &str = "/api/log_out";
/// The route for the linking client to request a link session token.
pub const LINK_SESSION: &str = "/api/link/session";
/// The route the linking client posts the success callback payload to.
pub const LINK_COMPLETE: &str = "/api/link/complete";
/// The route the linking client posts the exit callback payload to.
pub const LINK_EXIT: &str = "/api/link/exit";
/// The route the linking client posts informational progress events to.
pub const LINK_EVENT: &str = "/api/link/event";
/// The route to retry saving a connection after a storage failure.
pub const LINK_RETRY: &str = "/api/link/retry";
/// The route for the client to query the logged-in user's connection status.
pub const USER_INFO: &str = "/api/user_info";
