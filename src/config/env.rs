use crate::error::CrmAuthError;

use super::types::{ClientCredentials, CrmAuthConfig};

/// Expand environment variable references in a string.
///
/// Supported syntaxes:
/// - `${VAR}` - replaced with env var value; error if unset
/// - `${VAR:-fallback}` - replaced with env var value, or fallback if unset or empty
///
/// A `$` not followed by `{` is kept as-is.
pub fn expand_env_vars(input: &str) -> Result<String, CrmAuthError> {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, CrmAuthError> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            env_error(&format!("Unclosed variable reference: ${{{after}"))
        })?;
        let expr = &after[..end];

        match expr.split_once(":-") {
            Some((name, fallback)) => match lookup(name) {
                Some(val) if !val.is_empty() => result.push_str(&val),
                _ => result.push_str(fallback),
            },
            None => {
                let val = lookup(expr).ok_or_else(|| {
                    env_error(&format!("Environment variable '{expr}' is not set"))
                })?;
                result.push_str(&val);
            }
        }
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

fn env_error(detail: &str) -> CrmAuthError {
    CrmAuthError::ConfigError {
        path: std::path::PathBuf::from("<env>"),
        detail: detail.to_string(),
    }
}

fn expand_client(client: &ClientCredentials) -> Result<ClientCredentials, CrmAuthError> {
    Ok(ClientCredentials {
        client_id: expand_env_vars(&client.client_id)?,
        client_secret: client
            .client_secret
            .as_deref()
            .map(expand_env_vars)
            .transpose()?,
        redirect_uri: expand_env_vars(&client.redirect_uri)?,
        scopes: client.scopes.clone(),
    })
}

/// Expand env references in every provider's client registration.
pub fn expand_config(config: &CrmAuthConfig) -> Result<CrmAuthConfig, CrmAuthError> {
    let mut expanded = config.clone();
    for (kind, client) in &config.providers {
        expanded.providers.insert(*kind, expand_client(client)?);
    }
    Ok(expanded)
}
