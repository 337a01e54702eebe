use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use mirage::{
    adapters::{
        DirectorySecretStore, FileConfigProvider, HttpClientAdapter, HttpConfigProvider,
        HttpHandler, InMemoryFixtureStore, ReloadTargets, ReqwestTokenFetcher,
        StaticScenarioResolver, StaticSecretStore, TracingAuditSink, watch_debounced,
    },
    config::{ConfigValidator, GatewayConfig, loader::load_config},
    core::{Collaborators, GatewayService, RuntimeSnapshot},
    metrics,
    ports::{SecretStore, config_provider::ConfigProvider},
    tracing_setup,
    utils::GracefulShutdown,
};

const TOKEN_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);
const RELOAD_DEBOUNCE: Duration = Duration::from_secs(2);
const REMOTE_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "mirage.toml")]
    config: String,

    /// Directory holding one file per `secret_ref` credential
    #[clap(long)]
    secrets_dir: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "mirage.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "mirage.toml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file or http(s) URL to use
        #[clap(short, long, default_value = "mirage.toml")]
        config: String,

        /// Directory holding one file per `secret_ref` credential
        #[clap(long)]
        secrets_dir: Option<String>,
    },
}

fn create_config_provider(config_path: &str) -> Result<Arc<dyn ConfigProvider>> {
    if config_path.starts_with("http://") || config_path.starts_with("https://") {
        Ok(Arc::new(HttpConfigProvider::new(
            config_path.to_string(),
            REMOTE_POLL_INTERVAL,
        )?))
    } else {
        Ok(Arc::new(FileConfigProvider::new(config_path)?))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve {
            config,
            secrets_dir,
        }) => serve(&config, secrets_dir).await,
        None => serve(&args.config, args.secrets_dir).await,
    }
}

async fn serve(config_path: &str, secrets_dir: Option<String>) -> Result<()> {
    let config_provider =
        create_config_provider(config_path).context("Failed to create config provider")?;

    let config: GatewayConfig = config_provider
        .load_config()
        .await
        .with_context(|| format!("Failed to load initial config from {config_path}"))?;

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {e:#}"))?;
    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {e}"))?;

    ConfigValidator::validate(&config).wrap_err("Configuration is invalid")?;

    tracing::info!("Loaded initial configuration from {config_path}");

    let fixtures = Arc::new(
        InMemoryFixtureStore::from_config(&config.fixtures).context("Failed to compile fixtures")?,
    );
    let scenarios = Arc::new(StaticScenarioResolver::new(
        config.fixtures.active_scenario.clone(),
    ));
    let secrets: Arc<dyn SecretStore> = match secrets_dir {
        Some(dir) => {
            tracing::info!("Reading secret_ref credentials from {dir}");
            Arc::new(DirectorySecretStore::new(dir))
        }
        None => Arc::new(StaticSecretStore::new()),
    };

    let snapshot = RuntimeSnapshot::build(config.proxy.clone(), &config.plugins)
        .context("Failed to compile routing rules and plugins")?;
    let gateway = Arc::new(GatewayService::new(
        snapshot,
        Collaborators {
            http_client: Arc::new(
                HttpClientAdapter::new().context("Failed to create HTTP client adapter")?,
            ),
            token_fetcher: Arc::new(
                ReqwestTokenFetcher::new(TOKEN_ENDPOINT_TIMEOUT)
                    .context("Failed to create token fetcher")?,
            ),
            secrets,
            mocks: fixtures.clone(),
            scenarios: scenarios.clone(),
            audit_sink: Arc::new(TracingAuditSink),
        },
    ));

    let reload_targets = Arc::new(ReloadTargets {
        gateway: gateway.clone(),
        fixtures,
        scenarios,
        listen_addr: config.listen_addr.clone(),
    });

    // Config watcher task
    let notify_rx = config_provider.watch();
    let provider_for_watcher = config_provider.clone();
    let config_path_for_watcher = config_path.to_string();
    tokio::spawn(async move {
        tracing::info!("Config watcher task started.");
        watch_debounced(notify_rx, RELOAD_DEBOUNCE, || {
            let provider = provider_for_watcher.clone();
            let targets = reload_targets.clone();
            let path = config_path_for_watcher.clone();
            async move {
                tracing::info!("Reloading configuration from {path}");
                let result = match provider.load_config().await {
                    Ok(config) => targets.apply(config).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    tracing::error!("Failed to reload configuration: {e:#}. Keeping old configuration.");
                }
            }
        })
        .await;
        tracing::info!("Config watcher task is shutting down.");
    });

    let graceful_shutdown = GracefulShutdown::new();
    let signal_handler = graceful_shutdown.clone();
    tokio::spawn(async move { signal_handler.run_signal_handler().await });

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;

    let handler = Arc::new(HttpHandler::new(gateway.clone(), config.max_body_bytes));
    let app = handler.router();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    let snapshot = gateway.snapshot();
    tracing::info!(
        mode = %snapshot.mode(),
        rules = snapshot.matcher.len(),
        plugins = snapshot.plugins.len(),
        scenario = %gateway.scenario(),
        "Mirage gateway listening on {addr}"
    );
    println!("Mirage gateway listening on {addr} (mode: {})", snapshot.mode());
    drop(snapshot);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = graceful_shutdown.wait_for_shutdown_signal().await;
            tracing::info!("Shutdown signal received: {reason:?}");
        })
        .await
        .context("Server error")?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ConfigValidator::validate(&config) {
        Ok(()) => {
            let fixtures: usize = config.fixtures.scenarios.values().map(Vec::len).sum();
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Mode: {}", config.proxy.mode);
            println!(
                "   • Upstream: {}",
                config.proxy.target_base_url.as_deref().unwrap_or("(none)")
            );
            println!("   • Route Rules: {}", config.proxy.routes.len());
            println!("   • Auth Scheme: {}", config.proxy.auth.scheme());
            println!("   • Plugins: {}", config.plugins.len());
            println!(
                "   • Fixtures: {fixtures} across {} scenario(s), active '{}'",
                config.fixtures.scenarios.len(),
                config.fixtures.active_scenario
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure upstream URLs start with http:// or https://");
            println!("   • Give every route rule a unique id");
            println!("   • Use durations with units (e.g. '500ms', '30s')");
            println!("   • In 'mock' or 'proxy' mode, rules may only use that same decision");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Mirage gateway configuration

listen_addr = "127.0.0.1:8080"

[logging]
level = "info"
format = "pretty"

[proxy]
# mock | proxy | hybrid
mode = "hybrid"
target_base_url = "http://localhost:3000"
default_timeout = "5s"
fallback_on_error = true
# not_found | proxy (hybrid mode only)
on_mock_miss = "not_found"

[proxy.retry_policy]
max_attempts = 3
backoff_base = "100ms"
backoff_max = "2s"

[proxy.auth]
scheme = "bearer_static"
credential_source = { env = "UPSTREAM_TOKEN" }

# Rules are evaluated in order; the first match wins
[[proxy.routes]]
id = "users-mock"
decision = "mock"
match = { path = "/users/*", methods = ["GET"] }

[[proxy.routes]]
id = "orders-live"
decision = "proxy"
match = { path = "/orders/**" }

[[plugins]]
name = "strip-internal"
stage = "post_response"
kind = "redact_fields"
fields = ["internal_id"]

[fixtures]
active_scenario = "default"

[[fixtures.scenarios.default]]
method = "GET"
path = "/users/{id}"
body = { id = 42, name = "Ada" }
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'mirage serve --config {config_path}' to start the gateway");
    Ok(())
}
