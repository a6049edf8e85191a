//! CLI subcommand handlers.

use crate::{Commands, ConfigAction, MonitorAction, RegistryAction, WorkspaceAction};
use anyhow::{Context, bail};
use ntcore_core::api::{ApiClient, HttpApiClient, Payload};
use ntcore_core::config::{ConfigOverrides, Credentials, SdkConfig, config_exists, load_config};
use ntcore_core::{Client, Framework};
use ntcore_monitor::{Monitor, SystemMetricsDaemon, SystemMetricsPublisher};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, dir: &Path, server: Option<&str>) -> anyhow::Result<()> {
    match command {
        Commands::ArchiveModel {
            workspace_id,
            framework,
            model,
        } => archive_model(dir, server, &workspace_id, &framework, model),
        Commands::Login { username, password } => login(dir, server, &username, password),
        Commands::Workspace { action } => handle_workspace(&client(dir, server)?, action),
        Commands::Registry { action } => handle_registry(&client(dir, server)?, action),
        Commands::Deploy { workspace_id } => {
            let deployment = client(dir, server)?.deploy_model(&workspace_id)?;
            print_json(&deployment)
        }
        Commands::Download {
            workspace_id,
            version,
            output,
        } => {
            client(dir, server)?.download_model(&output, &workspace_id, version)?;
            println!("Model saved to {}", output.display());
            Ok(())
        }
        Commands::Monitor { action } => handle_monitor(dir, server, action),
        Commands::Config { action } => handle_config(dir, action),
    }
}

/// Effective configuration. A token saved by `login` is used when the
/// configuration carries none.
fn config(dir: &Path, server: Option<&str>) -> anyhow::Result<SdkConfig> {
    let overrides = ConfigOverrides {
        server: server.map(str::to_string),
        ..ConfigOverrides::default()
    };
    let mut config = load_config(Some(dir), Some(&overrides)).context("Failed to load configuration")?;
    if config.api_token.is_none() {
        config.api_token = Credentials::load()
            .context("Failed to read stored credentials")?
            .token;
    }
    Ok(config)
}

fn client(dir: &Path, server: Option<&str>) -> anyhow::Result<Client> {
    Ok(Client::new(&config(dir, server)?)?)
}

fn archive_model(
    dir: &Path,
    server: Option<&str>,
    workspace_id: &str,
    framework: &str,
    model: PathBuf,
) -> anyhow::Result<()> {
    let framework: Framework = framework.parse()?;
    let config = config(dir, server)?;
    if config.api_token.is_none() {
        bail!("Authentication failed. Please run `ntcore login` first.");
    }

    println!("Archiving {} ...", model.display());
    let client = Client::new(&config)?;
    let mut run = client.start_run(workspace_id);
    run.set_framework(framework);
    println!("Uploading archived model to NTCore ...");
    run.save_model(model)?;
    println!("Experiment saved to workspace {workspace_id}");
    Ok(())
}

fn login(dir: &Path, server: Option<&str>, username: &str, password: Option<String>) -> anyhow::Result<()> {
    let password = match password {
        Some(password) => password,
        None => dialoguer::Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };

    let mut config = config(dir, server)?;
    config.api_token = None;
    let api = HttpApiClient::new(&config)?;
    let payload = Payload::Json(serde_json::json!({ "email": username, "password": password }));
    let response = api.do_post("users/login", &payload)?;
    let token = token_from_login_response(response.as_json())?;

    let credentials = Credentials { token: Some(token) };
    let path = credentials.save().context("Failed to store credentials")?;
    info!(path = %path.display(), "Stored access token");
    println!("Logged in as {username}");
    Ok(())
}

fn token_from_login_response(body: Option<&Value>) -> anyhow::Result<String> {
    let Some(body) = body else {
        bail!("Login response was empty");
    };
    if let Some(error) = body.get("error") {
        bail!("Login failed: {error}");
    }
    body.get("token")
        .and_then(Value::as_str)
        .map(str::to_string)
        .context("Login response has no token")
}

fn handle_workspace(client: &Client, action: WorkspaceAction) -> anyhow::Result<()> {
    match action {
        WorkspaceAction::Create { name } => print_json(&client.create_workspace(&name)?),
        WorkspaceAction::Get { workspace_id } => print_json(&client.get_workspace(&workspace_id)?),
        WorkspaceAction::List => print_json(&client.list_workspaces()?),
        WorkspaceAction::Delete { workspace_id } => {
            client.delete_workspace(&workspace_id)?;
            println!("Deleted workspace {workspace_id}");
            Ok(())
        }
    }
}

fn handle_registry(client: &Client, action: RegistryAction) -> anyhow::Result<()> {
    match action {
        RegistryAction::Register {
            workspace_id,
            version,
        } => {
            client.register_experiment(&workspace_id, version)?;
            println!("Registered version {version} of workspace {workspace_id}");
            Ok(())
        }
        RegistryAction::Show { workspace_id } => {
            print_json(&client.get_registered_experiment(&workspace_id)?)
        }
        RegistryAction::Unregister { workspace_id } => {
            client.unregister_experiment(&workspace_id)?;
            println!("Unregistered the model of workspace {workspace_id}");
            Ok(())
        }
    }
}

fn monitor(dir: &Path, server: Option<&str>, workspace_id: Option<String>) -> anyhow::Result<(Monitor, SdkConfig)> {
    let mut config = config(dir, server)?;
    if workspace_id.is_some() {
        config.monitor.workspace_id = workspace_id;
    }
    let monitor = Monitor::from_config(&config)?;
    Ok((monitor, config))
}

fn handle_monitor(dir: &Path, server: Option<&str>, action: MonitorAction) -> anyhow::Result<()> {
    match action {
        MonitorAction::Metric {
            workspace_id,
            name,
            value,
        } => {
            let (monitor, _) = monitor(dir, server, workspace_id)?;
            monitor.add_metric(&name, value)?;
            println!("Recorded {name}={value}");
            Ok(())
        }
        MonitorAction::System {
            workspace_id,
            interval,
        } => {
            let (monitor, config) = monitor(dir, server, workspace_id)?;
            let interval = interval.unwrap_or(config.monitor.publish_interval_secs).max(1);
            let _daemon = SystemMetricsDaemon::start(
                SystemMetricsPublisher::procfs(monitor)?,
                Duration::from_secs(interval),
            )?;
            println!("Publishing system metrics every {interval}s. Press Ctrl-C to stop.");
            loop {
                std::thread::park();
            }
        }
    }
}

fn handle_config(dir: &Path, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = dir.join(".ntcore");
            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!("Configuration file already exists at: {}", config_path.display());
                return Ok(());
            }
            std::fs::create_dir_all(&config_dir)?;
            std::fs::write(&config_path, toml::to_string_pretty(&SdkConfig::default())?)?;
            println!("Created default configuration at: {}", config_path.display());
            Ok(())
        }
        ConfigAction::Show => {
            if !config_exists(Some(dir)) {
                println!("# No configuration file found, showing defaults");
            }
            let config = load_config(Some(dir), None).context("Failed to load configuration")?;
            println!("{}", toml::to_string_pretty(&redacted(config))?);
            Ok(())
        }
    }
}

fn redacted(mut config: SdkConfig) -> SdkConfig {
    let hide = |secret: &mut Option<String>| {
        if secret.is_some() {
            *secret = Some("********".into());
        }
    };
    hide(&mut config.api_token);
    hide(&mut config.password);
    config
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
