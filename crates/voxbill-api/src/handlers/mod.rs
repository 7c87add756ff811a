//! HTTP handlers

pub mod booking;
pub mod health;
pub mod purchase;
pub mod session;
pub mod wallet;

pub use booking::configure as configure_bookings;
pub use health::configure as configure_health;
pub use purchase::configure as configure_purchases;
pub use session::configure as configure_sessions;
pub use wallet::configure as configure_wallet;
