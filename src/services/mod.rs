pub mod clock;
pub mod delivery;
pub mod prompt;
pub mod summary_provider;

// Re-export for convenience
pub use clock::{Clock, FixedClock, SystemClock, TokioClock};
pub use delivery::{DeliveryError, SummaryDelivery, WebhookDelivery};
pub use summary_provider::{build_provider, ProviderError, SummaryProvider};
