//! Token command - mint a downstream token the way the proxy would.

use anyhow::{Result, anyhow};
use authbridge_config::resolve_client_secret;
use authbridge_oauth::{HttpTokenGrant, TokenGrant, TokenRequest, with_retry};
use clap::Args;

use super::Context;

/// Arguments for the token command.
#[derive(Args, Debug)]
pub struct TokenArgs {
    /// Provider name from [providers.<name>]
    #[arg(long)]
    pub provider: String,

    /// Print the access token itself (it is a live credential)
    #[arg(long)]
    pub show_token: bool,
}

/// Run the token command.
pub async fn run(args: TokenArgs, ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let config = &loaded.config;
    let provider = config.provider(&args.provider).ok_or_else(|| {
        let known: Vec<&str> = config.providers.keys().map(String::as_str).collect();
        anyhow!(
            "Unknown provider '{}'. Configured: {}",
            args.provider,
            if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            }
        )
    })?;

    let secret = resolve_client_secret(&args.provider, provider)?;
    tracing::debug!(provider = %args.provider, source = %secret.source, "Resolved client secret");

    let request = TokenRequest::new(&provider.token_url, &provider.client_id, secret.value)
        .with_scopes(provider.scopes.clone())
        .with_audience(provider.audience.clone());

    let cache = config.token_cache();
    let grant = HttpTokenGrant::new(cache.grant_timeout())?;
    let token = with_retry(cache.max_attempts, cache.initial_backoff(), &args.provider, || {
        grant.fetch(&request)
    })
    .await?;

    let now = chrono::Utc::now();
    if ctx.json_output {
        let mut out = serde_json::json!({
            "provider": args.provider,
            "key": request.key().to_string(),
            "fingerprint": token.fingerprint(),
            "token_type": token.token_type,
            "scopes": token.scopes,
            "expires_at": token.expires_at,
            "expires_in_secs": token.remaining(now).num_seconds(),
        });
        if args.show_token {
            out["access_token"] = serde_json::Value::String(token.secret().to_string());
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Provider:    {}", args.provider);
    println!("Key:         {}", request.key());
    println!("Fingerprint: {}", token.fingerprint());
    println!(
        "Expires:     {} (in {}s)",
        token.expires_at,
        token.remaining(now).num_seconds()
    );
    if !token.scopes.is_empty() {
        println!("Scopes:      {}", token.scopes.join(" "));
    }
    if args.show_token {
        println!("\n{}", token.secret());
    }
    Ok(())
}
