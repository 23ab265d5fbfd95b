pub mod accounts;
pub mod csrf;
pub mod handlers;
pub mod middleware;
pub mod session;
