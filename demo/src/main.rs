//! restmcp-demo: reference consumer of restmcp-auth
//!
//! Loads an [`AuthConfig`], wires the shared collaborators and runs one
//! command. Tokens are persisted with the encrypted file store, so a
//! `device-login` is reused by later `call` invocations.

mod cli;
mod logging;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use clap::Parser;
use restmcp_auth::oauth2::DeviceAuthorization;
use restmcp_auth::{
    ApiKeyProvider, AuthConfig, AuthProvider, AuthRequestContext, ChallengeGate,
    ClientCredentialsProvider, DeviceCodeProvider, DevicePrompt, FileTokenStore, GateDecision,
    GateRequest, GrantType, JwtClaimExtractor, OAuthProviderRegistry, PassThroughProvider,
    ProviderDeps, SessionIdentityMap, TokenEndpointClient, TokenStore, TokenValidationResult,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::{Cli, Commands};

/// Prints the user code and verification URI on stderr
struct TerminalPrompt;

#[async_trait]
impl DevicePrompt for TerminalPrompt {
    async fn show(&self, authorization: &DeviceAuthorization) -> restmcp_auth::Result<()> {
        match &authorization.verification_uri_complete {
            Some(uri) => eprintln!("Open {} to approve this device", uri),
            None => eprintln!(
                "Open {} and enter code {}",
                authorization.verification_uri, authorization.user_code
            ),
        }
        Ok(())
    }
}

struct App {
    config: AuthConfig,
    deps: ProviderDeps,
    store: Arc<FileTokenStore>,
}

impl App {
    fn load(cli: &Cli) -> Result<Self> {
        let config = AuthConfig::from_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?;
        config.validate()?;

        let root = config
            .token_store_root()
            .ok_or_else(|| anyhow!("no token directory; set token_dir in the configuration"))?;
        debug!(root = %root.display(), "Using file token store");
        let store = Arc::new(FileTokenStore::new(root));
        let deps = ProviderDeps::new(
            store.clone(),
            Arc::new(SessionIdentityMap::new()),
            TokenEndpointClient::new()?,
        );

        Ok(Self {
            config,
            deps,
            store,
        })
    }

    fn provider_config(&self, name: &str) -> Result<restmcp_auth::OAuthProviderConfig> {
        self.config
            .provider(name)
            .cloned()
            .ok_or_else(|| anyhow!("provider '{}' is not configured", name))
    }

    fn strategy(&self, name: &str) -> Result<Box<dyn AuthProvider>> {
        let config = self.provider_config(name)?;
        Ok(match config.grant {
            GrantType::ClientCredentials => {
                Box::new(ClientCredentialsProvider::new(config, self.deps.clone())?)
            }
            GrantType::DeviceCode => Box::new(DeviceCodeProvider::new(
                config,
                self.deps.clone(),
                Arc::new(TerminalPrompt),
            )?),
            GrantType::PassThrough => Box::new(PassThroughProvider::new(config.name)),
            GrantType::AuthorizationCode => {
                bail!("provider '{}' needs a browser login; use the server login tool", name)
            }
        })
    }
}

fn context(session: &str, cancel: &CancellationToken) -> AuthRequestContext {
    let ctx = AuthRequestContext::new(session).with_cancellation(cancel.clone());
    match std::env::var("RESTMCP_PASS_THROUGH") {
        Ok(token) if !token.is_empty() => ctx.with_pass_through(token),
        _ => ctx,
    }
}

fn gate(config: AuthConfig) -> Result<ChallengeGate> {
    let registry = Arc::new(OAuthProviderRegistry::from_configs(config.providers.clone()));
    Ok(ChallengeGate::new(Arc::new(config), registry)?)
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<()> {
    match &cli.command {
        Commands::DeviceLogin { provider, session } => {
            let app = App::load(&cli)?;
            let device = DeviceCodeProvider::new(
                app.provider_config(provider)?,
                app.deps.clone(),
                Arc::new(TerminalPrompt),
            )?;
            let token = device.perform_device_login(&context(session, &cancel)).await?;
            let expires_at = token.expires_at;
            app.store.save(session, provider, token).await?;
            info!(provider = %provider, "Device login stored");
            println!(
                "{}",
                json!({ "provider": provider, "session": session, "expires_at": expires_at })
            );
        }
        Commands::ClientToken { provider, session } => {
            let app = App::load(&cli)?;
            let strategy =
                ClientCredentialsProvider::new(app.provider_config(provider)?, app.deps.clone())?;
            // decorating a placeholder request populates the token cache
            let mut request =
                reqwest::Request::new(reqwest::Method::GET, "http://localhost/".parse()?);
            strategy.apply(&context(session, &cancel), &mut request).await?;
            let stored = app.store.get(session, provider).await.into_option();
            println!(
                "{}",
                json!({
                    "provider": provider,
                    "session": session,
                    "expires_at": stored.and_then(|t| t.expires_at),
                })
            );
        }
        Commands::Call {
            provider,
            session,
            url,
        } => {
            let app = App::load(&cli)?;
            let strategy = match std::env::var("RESTMCP_API_KEY") {
                Ok(key) => Box::new(ApiKeyProvider::new(
                    provider.clone(),
                    key,
                    restmcp_auth::ApiKeyLocation::Header("X-API-Key".to_string()),
                )) as Box<dyn AuthProvider>,
                Err(_) => app.strategy(provider)?,
            };
            let client = reqwest::Client::new();
            let mut request = client.get(url).build()?;
            strategy.apply(&context(session, &cancel), &mut request).await?;
            let response = client.execute(request).await?;
            println!("{}", json!({ "url": url, "status": response.status().as_u16() }));
        }
        Commands::Logout { provider, session } => {
            let app = App::load(&cli)?;
            app.store.delete(session, provider).await?;
            println!("{}", json!({ "provider": provider, "session": session, "deleted": true }));
        }
        Commands::Inspect { token } => {
            let config = AuthConfig::from_file(&cli.config).unwrap_or_default();
            let output = match JwtClaimExtractor::new(config.validation).validate(token) {
                TokenValidationResult::Valid(claims) => json!({
                    "valid": true,
                    "subject": claims.subject,
                    "issuer": claims.issuer,
                    "audiences": claims.audiences,
                    "scopes": claims.scopes,
                    "expires_at": claims.expires_at,
                }),
                TokenValidationResult::Invalid {
                    error_code,
                    error_description,
                } => json!({
                    "valid": false,
                    "error": error_code,
                    "error_description": error_description,
                }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Check { tool, token } => {
            let config = AuthConfig::from_file(&cli.config)?;
            let gate = gate(config)?;
            let authorization = token.as_ref().map(|t| format!("Bearer {}", t));
            let output = match gate.evaluate(GateRequest {
                path: "/mcp",
                authorization: authorization.as_deref(),
                tool_name: tool.as_deref(),
            }) {
                GateDecision::Bypass => json!({ "decision": "bypass" }),
                GateDecision::Proceed { token, .. } => json!({
                    "decision": "proceed",
                    "subject": token.as_ref().and_then(|t| t.subject.clone()),
                    "scopes": token.map(|t| t.scopes).unwrap_or_default(),
                }),
                GateDecision::Challenge(challenge) => json!({
                    "decision": "challenge",
                    "status": challenge.status,
                    "www_authenticate": challenge.www_authenticate,
                    "missing_scopes": challenge.missing_scopes,
                    "body": challenge.body,
                }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Metadata => {
            let gate = gate(AuthConfig::from_file(&cli.config)?)?;
            println!("{}", serde_json::to_string_pretty(&gate.metadata())?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init(&cli.log_level, cli.json_logs) {
        eprintln!("Error: failed to initialise logging: {}", e);
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    if let Err(e) = run(cli, cancel).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
