//! Outbound integrations: email, push, billing, deployments and search.

pub mod email;
pub mod http;
pub mod push;
pub mod railway;
pub mod search;
pub mod stripe;

pub use email::{mailer_from_config, EmailMessage, Mailer};
pub use push::{push_from_config, PushMessage, PushProvider};
pub use railway::{Deployment, RailwayClient};
pub use search::{search_from_config, SearchIndexer};
pub use stripe::{BillingChange, PriceCatalog, StripeClient, WebhookEvent};

#[cfg(any(test, feature = "test_utils"))]
pub use email::MemoryMailer;
#[cfg(any(test, feature = "test_utils"))]
pub use push::MemoryPush;
