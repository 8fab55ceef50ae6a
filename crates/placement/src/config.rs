use std::time::Duration;

use domain::DEFAULT_DELIVERY_DAYS;

/// Default bound on a single placement or compensation transaction.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_TRACKING_BASE_URL: &str = "https://tracking.bookstore.local/track";

/// Tuning of the placement core.
#[derive(Debug, Clone)]
pub struct PlacementConfig {
    /// Upper bound on one transaction, lock waits included. Elapsing it aborts
    /// the transaction with a system error.
    pub transaction_timeout: Duration,
    /// Prefix of the public tracking reference.
    pub tracking_base_url: String,
    /// Offset from creation to the estimated delivery.
    pub delivery_offset: chrono::Duration,
    /// How many tracking number candidates to try before giving up.
    pub max_tracking_attempts: u32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            tracking_base_url: DEFAULT_TRACKING_BASE_URL.to_string(),
            delivery_offset: chrono::Duration::days(DEFAULT_DELIVERY_DAYS),
            max_tracking_attempts: 5,
        }
    }
}
