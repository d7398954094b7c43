//! LLM-tiered HTTP security gateway
//!
//! Sits in front of an upstream service and judges every inbound request
//! before replaying it. Judgment is tiered: in-memory allow/deny lists
//! answer instantly, a single-shot policy oracle handles the common
//! case, and a tool-augmented review loop digs into whatever the oracle
//! could not classify. Model failures are classified into a closed
//! taxonomy and retried with doubling backoff; anything still ambiguous
//! after all of that is blocked.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sentinel_gateway::access::AccessControl;
//! use sentinel_gateway::cache::InMemoryExampleStore;
//! use sentinel_gateway::config::GatewayConfig;
//! use sentinel_gateway::gateway::{router, AppState};
//! use sentinel_gateway::oracle::OpenAiOracle;
//! use sentinel_gateway::pipeline::Gatekeeper;
//! use sentinel_gateway::reasoner::OpenAiReasoner;
//! use sentinel_gateway::window::ContextWindow;
//!
//! let config = GatewayConfig::default();
//! let client = async_openai::Client::new();
//! let access = Arc::new(AccessControl::new());
//! let gatekeeper = Arc::new(Gatekeeper::new(
//!     access.clone(),
//!     Arc::new(OpenAiOracle::new(client.clone(), config.oracle_model.clone())),
//!     Arc::new(OpenAiReasoner::new(
//!         client,
//!         config.reasoner_model.clone(),
//!         ContextWindow::new(config.window.clone()),
//!     )),
//!     Arc::new(InMemoryExampleStore::new()),
//!     config.retry,
//!     config.few_shot_k,
//! ));
//! let app = router(AppState {
//!     gatekeeper,
//!     access,
//!     http: reqwest::Client::new(),
//!     config,
//! });
//! ```

pub mod access;
pub mod cache;
pub mod config;
pub mod decision;
pub mod error;
pub mod gateway;
pub mod items;
pub mod oracle;
pub mod pipeline;
pub mod reasoner;
pub mod request;
pub mod resilience;
pub mod window;

pub use config::GatewayConfig;
pub use decision::Decision;
pub use error::{GatewayError, Result};
pub use gateway::{router, AppState};
pub use pipeline::{Gatekeeper, Verdict};
pub use request::RequestContext;
