//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `TokenExchangeClient`: Trades an OAuth artifact for a broker token
//! - `Reconciler`: Refetches credentials and balances after a login
//! - `RedirectHandler`: Interprets landing-page redirects end to end
//! - `TokenHealthMonitor`: Periodic broker token checks with bounded refresh
//! - `SessionRefresher`: Keeps the agent's own session token alive

mod exchange;
mod reconciler;
mod redirect;
mod session;
mod token_monitor;

#[cfg(test)]
mod testing;

pub use exchange::{EXCHANGE_FAILED_MESSAGE, TokenExchangeClient};
pub use reconciler::{DEFAULT_SETTLE_DELAY, Reconciler};
pub use redirect::{RedirectHandler, RedirectOutcome};
pub use session::{LOGIN_PATH, SessionRefreshOutcome, SessionRefresher};
pub use token_monitor::{
    MIN_CHECK_INTERVAL, MonitorConfig, MonitorSnapshot, TokenHealthMonitor,
};
