//! Ports: the traits through which the gateway core talks to the outside world.
pub mod audit_sink;
pub mod config_provider;
pub mod http_client;
pub mod mock_lookup;
pub mod scenario;
pub mod secret_store;
pub mod token_fetcher;

pub use audit_sink::AuditSink;
pub use config_provider::ConfigProvider;
pub use http_client::{HttpClient, TransportError};
pub use mock_lookup::{FixtureResponse, MockLookup};
pub use scenario::ScenarioResolver;
pub use secret_store::SecretStore;
pub use token_fetcher::{FetchedToken, TokenFetcher, TokenRequest};
