//! # Tradewire Core
//!
//! Resilient outbound API client core for the tradewire trading dashboard.
//!
//! ## Overview
//!
//! Every call the dashboard makes to the trading backend goes through this
//! crate. It provides:
//!
//! - **Request deduplication** so identical concurrent reads share one round-trip
//! - **Retry with exponential backoff** driven by error classification
//! - **A closed error taxonomy** instead of raw transport failures
//! - **Auth session lifecycle** with a one-shot session-expired signal
//! - **Correlation ids** echoed to and recorded from the server
//! - **Response envelope normalization** across v1, v2, and raw payloads
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cancel`] | Caller-owned cancellation signals |
//! | [`classify`] | Attempt outcome to [`ErrorKind`] mapping |
//! | [`client`] | [`ClientContext`], the call-site handle |
//! | [`config`] | Client configuration and environment overrides |
//! | [`correlation`] | Request/trace ids and rate-limit counters |
//! | [`dedup`] | In-flight request deduplication |
//! | [`envelope`] | Response envelopes and normalized payloads |
//! | [`error`] | Error types |
//! | [`executor`] | Attempt loop and call state machine |
//! | [`http_client`] | Transport abstraction (reqwest, scripted) |
//! | [`request`] | Request descriptors and fingerprints |
//! | [`retry`] | Backoff curve and retry budgets |
//! | [`session`] | Auth session and credential stores |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tradewire_core::{ClientConfig, ClientContext, Credential};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientContext::builder(ClientConfig::from_env()?).build()?;
//!     client.login(Credential::new("token"))?;
//!
//!     let _expired = client.on_session_expired(|_| eprintln!("please sign in again"));
//!
//!     let balance: serde_json::Value = client.get_json("/portfolio/balance").await?;
//!     println!("{balance}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Call site      │
//! └────────┬────────┘
//!          │ RequestDescriptor
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ ClientContext   │────▶│ Dedup Registry   │
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌─────────────────────────────────────────┐     ┌──────────────────┐
//! │ Request Executor                        │────▶│ HttpTransport    │
//! │ session · correlation · classify · retry│     │ (reqwest/script) │
//! └────────┬────────────────────────────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Normalizer      │
//! │ (Envelope)      │
//! └─────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Calls return `Result<_, ClassifiedError>`. Branch on the kind:
//!
//! ```rust
//! use tradewire_core::{ClassifiedError, ErrorKind};
//!
//! fn handle_error(error: ClassifiedError) {
//!     match error.kind() {
//!         ErrorKind::AuthError => {
//!             // Session already invalidated; send the user to login
//!         }
//!         ErrorKind::RateLimited | ErrorKind::ServerError => {
//!             // Retries exhausted; offer a manual retry
//!         }
//!         ErrorKind::ClientError => {
//!             // Report the validation message
//!         }
//!         _ => {}
//!     }
//! }
//! ```
//!
//! ## Security
//!
//! - Bearer tokens are never logged
//! - The credential file is only written on login and removed on expiry

pub mod cancel;
pub mod classify;
pub mod client;
pub mod config;
pub mod correlation;
pub mod dedup;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod http_client;
pub mod request;
pub mod retry;
pub mod session;

// Re-export commonly used types at crate root for convenience

// Cancellation
pub use cancel::{CancelHandle, CancelSignal};

// Classification
pub use classify::{classify, kind_for_status, AttemptOutcome};

// Client handle
pub use client::{ClientBuilder, ClientContext};

// Configuration
pub use config::ClientConfig;

// Correlation
pub use correlation::{CorrelationContext, CorrelationSnapshot, RateLimitSnapshot};

// Deduplication
pub use dedup::DedupRegistry;

// Envelope types
pub use envelope::{normalize, BinaryBody, Envelope, Payload};

// Error types
pub use error::{ClassifiedError, ConfigError, ErrorKind, StoreError};

// Execution
pub use executor::{CallState, RequestExecutor};

// HTTP transport types
pub use http_client::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, ScriptedTransport,
    TransportError, TransportErrorKind,
};

// Requests
pub use request::RequestDescriptor;

// Retry logic
pub use retry::{BackoffConfig, RetryPolicy, RetryState};

// Session
pub use session::{
    AuthSession, Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore,
    SessionExpired, Subscription,
};
