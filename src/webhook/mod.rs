//! Outbound task notifications: signing, retries and delivery.

mod delivery;
mod notifier;
mod retry_policy;
mod signature;

pub use delivery::{DeliveryReport, WebhookDeliveryService, WebhookPayload};
pub use notifier::WebhookNotifier;
pub use retry_policy::RetryPolicy;
pub use signature::{canonical_json, sign, verify, SIGNATURE_HEADER};
