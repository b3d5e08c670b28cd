//! Command-line client for the lottery session server.
//!
//! Logs in, inspects and revokes devices, and logs out. The session is kept
//! in a small JSON file between invocations, so every command after `login`
//! rides on the stored credentials and refreshes them when needed.

use anyhow::{Context, Result, bail};
use lottery_client::api_client::{ApiClient, StoredSession};
use pico_args::Arguments;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const HELP: &str = "\
Talk to a lottery session server

USAGE:
  lottery_client [OPTIONS] <COMMAND>

COMMANDS:
  register              Create an account
  login                 Log in on this device
  whoami                Show the current account
  devices               List this account's devices
  revoke-device ID      Revoke one of this account's devices
  logout                End this device's session

OPTIONS:
  --server URL          Server URL  [default: http://localhost:8080]
  --username NAME       Username for register/login
  --password PASS       Password for register/login (prompted when omitted)
  --device LABEL        Device label for login  [default: this machine's name]
  --session PATH        Session file  [default: $HOME/.lottery-session.json]

FLAGS:
  -h, --help            Print help information
";

struct Args {
    server_url: String,
    username: Option<String>,
    password: Option<String>,
    device: Option<String>,
    session_path: PathBuf,
    command: String,
    free: Vec<String>,
}

fn default_session_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".lottery-session.json")
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut pargs = Arguments::from_env();

    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        server_url: pargs
            .opt_value_from_str("--server")?
            .unwrap_or_else(|| "http://localhost:8080".to_string()),
        username: pargs.opt_value_from_str("--username")?,
        password: pargs.opt_value_from_str("--password")?,
        device: pargs.opt_value_from_str("--device")?,
        session_path: pargs
            .opt_value_from_str("--session")?
            .unwrap_or_else(default_session_path),
        command: pargs.subcommand()?.unwrap_or_default(),
        free: pargs
            .finish()
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect(),
    };

    run(args).await
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn load_session(path: &Path) -> Result<Option<StoredSession>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read session file {}", path.display()))?;
    let session = serde_json::from_str(&raw).context("Session file is corrupt")?;
    Ok(Some(session))
}

/// Write back whatever the client holds now; refreshes rotate the credentials
fn save_session(path: &Path, client: &ApiClient) -> Result<()> {
    match client.session() {
        Some(session) => {
            let raw = serde_json::to_string_pretty(&session)?;
            std::fs::write(path, raw)
                .with_context(|| format!("Failed to write session file {}", path.display()))?;
        }
        None if path.exists() => std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove session file {}", path.display()))?,
        None => {}
    }
    Ok(())
}

fn credentials(args: &Args) -> Result<(String, String)> {
    let username = match &args.username {
        Some(u) => u.clone(),
        None => prompt("Username")?,
    };
    let password = match &args.password {
        Some(p) => p.clone(),
        None => prompt("Password")?,
    };
    Ok((username, password))
}

async fn run(args: Args) -> Result<()> {
    let client = match load_session(&args.session_path)? {
        Some(session) => ApiClient::with_session(args.server_url.clone(), session),
        None => ApiClient::new(args.server_url.clone()),
    };

    let result = dispatch(&args, &client).await;
    save_session(&args.session_path, &client)?;
    result
}

async fn dispatch(args: &Args, client: &ApiClient) -> Result<()> {
    match args.command.as_str() {
        "register" => {
            let (username, password) = credentials(args)?;
            let account = client
                .register(&username, &password)
                .await
                .context("Registration failed")?;
            println!(
                "Registered {} (account {}). Run `login` to start a session.",
                account.username, account.account_id
            );
        }
        "login" => {
            let (username, password) = credentials(args)?;
            let device = args.device.clone().unwrap_or_else(whoami::devicename);
            let session = client
                .login(&username, &password, Some(&device))
                .await
                .context("Login failed")?;
            println!(
                "Logged in as account {} on device '{}'",
                session.account_id, device
            );
        }
        "whoami" => {
            let me = client.whoami().await.context("Failed to fetch account")?;
            println!("Account:  {}", me.account_id);
            println!("Roles:    {}", me.roles.join(", "));
            println!("Issuer:   {} (audience {})", me.issuer, me.audience);
        }
        "devices" => {
            let devices = client.list_devices().await.context("Failed to list devices")?;
            if devices.is_empty() {
                println!("No devices.");
            }
            for device in devices {
                let session = device
                    .session_expires_at
                    .map(|at| format!("session until {}", at.format("%Y-%m-%d %H:%M UTC")))
                    .unwrap_or_else(|| "no live session".to_string());
                println!(
                    "  {:>6}  {:<20} last used {}  {}",
                    device.id,
                    device.label,
                    device.last_used_at.format("%Y-%m-%d %H:%M UTC"),
                    session
                );
            }
        }
        "revoke-device" => {
            let Some(raw_id) = args.free.first() else {
                bail!("revoke-device needs a device ID");
            };
            let device_id: i64 = raw_id.parse().context("Invalid device ID")?;
            client
                .revoke_device(device_id)
                .await
                .context("Failed to revoke device")?;
            println!("Revoked device {device_id}");
        }
        "logout" => {
            client.logout().await.context("Logout failed")?;
            println!("Logged out.");
        }
        "" => {
            print!("{HELP}");
        }
        other => bail!("Unknown command '{other}'; see --help"),
    }
    Ok(())
}
