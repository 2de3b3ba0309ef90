use colored::Colorize;

use crate::credential::Credential;
use crate::error::CrmAuthError;
use crate::sweep::SweepOutcome;

use super::status::{CredentialState, StatusRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Pretty,
    Json,
}

impl OutputMode {
    pub fn from_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Pretty
        }
    }
}

fn paint(state: CredentialState, is_tty: bool) -> String {
    let label = state.label();
    if !is_tty {
        return label.to_string();
    }
    match state {
        CredentialState::Fresh => label.green().to_string(),
        CredentialState::DueForRefresh => label.yellow().to_string(),
        CredentialState::Expired => label.red().to_string(),
        CredentialState::Unrefreshable => label.red().bold().to_string(),
    }
}

pub fn format_status(rows: &[StatusRow], mode: OutputMode, is_tty: bool) -> String {
    match mode {
        OutputMode::Json => serde_json::to_string_pretty(rows).unwrap_or_default(),
        OutputMode::Pretty => {
            if rows.is_empty() {
                return "No stored credentials".to_string();
            }
            rows.iter()
                .map(|r| {
                    format!(
                        "{:<11} {:<24} {:<12} expires {} ({}s)",
                        r.provider,
                        r.user_id,
                        paint(r.state, is_tty),
                        r.expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        r.expires_in_secs
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

pub fn format_sweep(outcomes: &[SweepOutcome], mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => serde_json::to_string_pretty(outcomes).unwrap_or_default(),
        OutputMode::Pretty => {
            if outcomes.is_empty() {
                return "No providers configured".to_string();
            }
            let mut lines = Vec::new();
            for o in outcomes {
                lines.push(format!(
                    "{}: examined {}, refreshed {}, skipped {}, failed {}",
                    o.provider,
                    o.examined,
                    o.refreshed.len(),
                    o.skipped.len(),
                    o.failed.len()
                ));
                if let Some(ref e) = o.load_error {
                    lines.push(format!("  could not list credentials: {e}"));
                }
                for f in &o.failed {
                    lines.push(format!("  {} [{}]: {}", f.user_id, f.code, f.message));
                }
            }
            lines.join("\n")
        }
    }
}

pub fn format_credential(credential: &Credential, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => {
            let json = serde_json::json!({
                "user_id": credential.user_id,
                "provider": credential.provider,
                "expires_at": credential.expires_at,
                "has_refresh_token": credential.refresh_token.is_some(),
                "metadata": credential.metadata,
            });
            serde_json::to_string_pretty(&json).unwrap_or_default()
        }
        OutputMode::Pretty => format!(
            "{} credential for '{}' valid until {}",
            credential.provider,
            credential.user_id,
            credential.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    }
}

pub fn print_error(err: &CrmAuthError, mode: OutputMode) {
    match mode {
        OutputMode::Json => {
            println!("{}", serde_json::to_string_pretty(&err.to_json()).unwrap_or_default())
        }
        OutputMode::Pretty => {
            eprintln!("Error: {err}");
            if err.requires_reauthorization() {
                eprintln!("Run `crmauth connect <provider> --user <id>` to re-authorize.");
            }
        }
    }
}
