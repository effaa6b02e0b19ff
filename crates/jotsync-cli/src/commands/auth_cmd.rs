use jotsync_core::auth::{AuthSession, IdentityProvider, SessionPersistence};

use crate::cli::AuthCommands;
use crate::commands::common::{identity_for, load_profile, resolve_endpoints, session_store_for};
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        AuthCommands::Login {
            profile,
            email,
            password,
        } => {
            let profile = load_profile(profile.as_deref().or(global_profile))?;
            let endpoints = resolve_endpoints(&profile).await?;
            let identity = identity_for(&profile.name, &endpoints)?;
            let session = identity.sign_in(&email, &password).await?;
            println!(
                "Signed in profile '{}' as {}",
                profile.name,
                email_label(&session)
            );
            Ok(())
        }
        AuthCommands::Status { profile } => {
            let profile = load_profile(profile.as_deref().or(global_profile))?;
            let session = match resolve_endpoints(&profile).await {
                Ok(endpoints) => identity_for(&profile.name, &endpoints)?
                    .restore_session()
                    .await?,
                Err(CliError::BackendNotConfigured(_)) => {
                    session_store_for(&profile.name)?.load_session()?
                }
                Err(error) => return Err(error),
            };

            match session {
                Some(session) => println!(
                    "Profile '{}' is signed in as {} (expires_at={})",
                    profile.name,
                    email_label(&session),
                    session.expires_at
                ),
                None => println!("Profile '{}' is not signed in.", profile.name),
            }
            Ok(())
        }
        AuthCommands::Logout { profile } => {
            let profile = load_profile(profile.as_deref().or(global_profile))?;
            match resolve_endpoints(&profile).await {
                Ok(endpoints) => {
                    let identity = identity_for(&profile.name, &endpoints)?;
                    if identity.restore_session().await?.is_some() {
                        if let Err(error) = identity.sign_out().await {
                            tracing::warn!("Remote sign-out failed; local session cleared: {}", error);
                        }
                    } else {
                        session_store_for(&profile.name)?.clear_session()?;
                    }
                }
                Err(CliError::BackendNotConfigured(_)) => {
                    session_store_for(&profile.name)?.clear_session()?;
                }
                Err(error) => return Err(error),
            }

            println!("Signed out profile '{}'", profile.name);
            Ok(())
        }
    }
}

fn email_label(session: &AuthSession) -> &str {
    session.user.email.as_deref().unwrap_or("(no email)")
}
