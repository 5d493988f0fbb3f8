//! Decode command - inspect a caller token without verifying it.

use anyhow::Result;
use authbridge_oauth::{decode_payload, extract_claims};
use clap::Args;

use super::Context;

/// Arguments for the decode command.
#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// JWT, with or without a `Bearer ` prefix
    pub token: String,
}

/// Run the decode command.
pub async fn run(args: DecodeArgs, ctx: &Context) -> Result<()> {
    let payload = decode_payload(&args.token)?;
    let claims = extract_claims(&args.token)?;
    let identity = claims.identity();
    let expired = claims.is_expired(chrono::Utc::now());

    if ctx.json_output {
        let out = serde_json::json!({
            "verified": false,
            "expired": expired,
            "identity": {
                "user_id": identity.user_id,
                "groups": identity.groups,
                "client_id": identity.client_id,
            },
            "claims": payload,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("UNVERIFIED claims (signature not checked)\n");
    println!("User:    {}", identity.user_id);
    println!("Client:  {}", identity.client_id);
    println!(
        "Groups:  {}",
        if identity.groups.is_empty() {
            "(none)".to_string()
        } else {
            identity.groups.join(", ")
        }
    );
    if let Some(exp) = claims.exp {
        println!("Expires: {}{}", exp, if expired { " (expired)" } else { "" });
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
