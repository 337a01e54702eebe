pub mod audit;
pub mod config_providers;
pub mod fixtures;
pub mod http_client;
pub mod http_handler;
pub mod reload;
pub mod scenario;
pub mod secrets;
pub mod token_fetcher;

/// Re-export commonly used types from adapters
pub use audit::{ChannelAuditSink, TracingAuditSink};
pub use config_providers::{FileConfigProvider, HttpConfigProvider};
pub use fixtures::InMemoryFixtureStore;
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use reload::{ReloadTargets, watch_debounced};
pub use scenario::StaticScenarioResolver;
pub use secrets::{DirectorySecretStore, StaticSecretStore};
pub use token_fetcher::ReqwestTokenFetcher;
