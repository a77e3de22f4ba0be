//! Token command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use ampere_core::token;
use ampere_core::{Config, KeyValues, TokenCodec, TokenPurpose};

use crate::output::Output;

/// Sign a JSON object
pub fn sign(purpose: TokenPurpose, payload: &str, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let values: KeyValues =
        serde_json::from_str(payload).context("Payload must be a JSON object")?;
    let codec = configured_codec(config_path)?;
    let token = codec.sign(purpose, &values)?;
    output.print_token(&token);
    Ok(())
}

/// Verify a token and print its payload
pub fn verify(purpose: TokenPurpose, token: &str, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let codec = configured_codec(config_path)?;
    let values: KeyValues = codec
        .verify(purpose, token)
        .with_context(|| format!("Token does not verify as {}", purpose))?;
    output.print_payload(&values, true);
    Ok(())
}

/// Print a token's payload without checking it
pub fn inspect(token: &str, output: &Output) -> Result<()> {
    let values: KeyValues = token::inspect(token).context("Failed to decode token")?;
    output.print_payload(&values, false);
    Ok(())
}

/// Codec for the configured secret
///
/// Signing with a throwaway secret would produce tokens nothing accepts, so
/// a secret is required here.
fn configured_codec(config_path: Option<&PathBuf>) -> Result<TokenCodec> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    match config.secret()? {
        Some(secret) => Ok(TokenCodec::new(&secret)),
        None => bail!(
            "No signing secret configured.\n\
             Set one with `ampere config set secret_key <value>` or AMPERE_SECRET_KEY."
        ),
    }
}
