use jotsync_core::config::{resolve_backend_config, BackendConfig, ClientOptions};
use jotsync_core::util::{is_http_url, normalize_text_option};

use crate::cli::{ConfigCommands, ConfigInitArgs};
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub async fn run_config(
    command: ConfigCommands,
    global_profile: Option<&str>,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init(args) => run_config_init(args, global_profile).await,
        ConfigCommands::Show { profile } => run_config_show(profile.as_deref().or(global_profile)),
    }
}

pub async fn run_config_init(
    args: ConfigInitArgs,
    global_profile: Option<&str>,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(args.profile.as_deref().or(global_profile));
    let existing = config.profile(&profile_name).cloned().unwrap_or_default();

    let explicit = explicit_backend(&args);
    let env = BackendConfig::from_env();
    let manifest_url = explicit
        .manifest_url
        .clone()
        .or_else(|| env.manifest_url.clone())
        .or_else(|| existing.backend.manifest_url.clone());

    let manifest = match manifest_url {
        Some(url) => {
            if !is_http_url(&url) {
                return Err(CliError::Config(
                    "manifest_url must include http:// or https://".to_string(),
                ));
            }
            let fetched = resolve_backend_config(BackendConfig {
                manifest_url: Some(url.clone()),
                ..BackendConfig::default()
            })
            .await
            .map_err(|error| {
                CliError::Config(format!("Failed to load backend manifest from {url}: {error}"))
            })?;
            println!("Loaded backend manifest from {url}");
            Some(fetched)
        }
        None => None,
    };

    let backend = merge_backend(explicit, manifest, env, existing.backend);
    validate_backend_urls(&backend)?;

    let profile = config.profile_mut_or_default(&profile_name);
    profile.backend = backend;
    apply_options(&mut profile.options, &args)?;

    if !args.no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!(
        "Profile '{}' initialized at {}",
        profile_name,
        path.display()
    );

    let profile = config
        .profile(&profile_name)
        .ok_or_else(|| CliError::Config("Failed to persist profile".to_string()))?;
    match profile.backend.resolve() {
        Ok(Some(_)) => println!(
            "Profile '{profile_name}' is ready. Run `jot auth login --email <email> --password <password>`."
        ),
        Ok(None) => println!(
            "Profile '{profile_name}' is missing: auth_url, api_key, graphql_url, storage_url"
        ),
        Err(message) => println!("Profile '{profile_name}': {message}"),
    }

    Ok(())
}

fn run_config_show(profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile);
    let Some(profile) = config.profile(&profile_name) else {
        println!("Profile '{profile_name}' is not configured.");
        return Ok(());
    };

    println!("Profile '{profile_name}'");
    println!("{}", serde_json::to_string_pretty(profile)?);
    Ok(())
}

pub fn explicit_backend(args: &ConfigInitArgs) -> BackendConfig {
    BackendConfig {
        manifest_url: normalize_text_option(args.manifest_url.clone()),
        auth_url: normalize_text_option(args.auth_url.clone()),
        api_key: normalize_text_option(args.api_key.clone()),
        graphql_url: normalize_text_option(args.graphql_url.clone()),
        storage_url: normalize_text_option(args.storage_url.clone()),
    }
}

/// Flags win over the manifest, which wins over `JOTSYNC_*` variables, which
/// win over what the profile already stores.
pub fn merge_backend(
    explicit: BackendConfig,
    manifest: Option<BackendConfig>,
    env: BackendConfig,
    existing: BackendConfig,
) -> BackendConfig {
    explicit
        .or(manifest.unwrap_or_default())
        .or(env)
        .or(existing)
}

pub fn apply_options(options: &mut ClientOptions, args: &ConfigInitArgs) -> Result<(), CliError> {
    if let Some(policy) = args.failure_policy {
        options.failure_policy = policy.into();
    }
    if let Some(workers) = args.image_workers {
        if workers == 0 {
            return Err(CliError::Config(
                "image_workers must be at least 1".to_string(),
            ));
        }
        options.image_workers = workers;
    }
    if let Some(prefix) = &args.storage_prefix {
        options.storage_prefix = prefix.trim().trim_matches('/').to_string();
    }
    Ok(())
}

fn validate_backend_urls(backend: &BackendConfig) -> Result<(), CliError> {
    let urls = [
        ("manifest_url", &backend.manifest_url),
        ("auth_url", &backend.auth_url),
        ("graphql_url", &backend.graphql_url),
        ("storage_url", &backend.storage_url),
    ];
    for (label, value) in urls {
        if let Some(url) = value {
            if !is_http_url(url) {
                return Err(CliError::Config(format!(
                    "{label} must include http:// or https://"
                )));
            }
        }
    }
    Ok(())
}
