//! Warden - command line entry point
//!
//! Loads the configuration, assembles the pipeline and answers one question
//! per invocation, or keeps watching the policy tree.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use tracing::info;

use warden::{AppContext, AuthorizeRequest};
use warden_config::{ConfigLoader, DEFAULT_ENV_PREFIX};

/// Subcommand to run.
enum Command {
    Packages,
    Stats,
    Check { request: PathBuf },
    MqttAcl { topic: String, acc: u32 },
    Superuser,
    Watch,
}

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
    /// Bearer token presented with the request.
    token: Option<String>,
    command: Command,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut config = None;
        let mut token = std::env::var("WARDEN_TOKEN").ok();
        let mut positional = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = Some(PathBuf::from(args.next().context("--config needs a path")?));
                }
                "--token" | "-t" => {
                    token = Some(args.next().context("--token needs a value")?);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("warden {}", warden::VERSION);
                    std::process::exit(0);
                }
                other if other.starts_with('-') => {
                    bail!("unknown argument: {other} (use --help for usage information)");
                }
                other => positional.push(other.to_string()),
            }
        }

        let command = match positional.as_slice() {
            [cmd] if cmd == "packages" => Command::Packages,
            [cmd] if cmd == "stats" => Command::Stats,
            [cmd] if cmd == "superuser" => Command::Superuser,
            [cmd] if cmd == "watch" => Command::Watch,
            [cmd, request] if cmd == "check" => Command::Check {
                request: PathBuf::from(request),
            },
            [cmd, topic, acc] if cmd == "mqtt-acl" => Command::MqttAcl {
                topic: topic.clone(),
                acc: acc.parse().with_context(|| format!("invalid access mask: {acc}"))?,
            },
            [] => bail!("missing command (use --help for usage information)"),
            other => bail!("unknown command: {} (use --help for usage information)", other.join(" ")),
        };

        Ok(Self {
            config,
            token,
            command,
        })
    }
}

fn print_help() {
    println!(
        r"Warden - authorization decision service

USAGE:
    warden [OPTIONS] <COMMAND>

COMMANDS:
    packages                 List the loaded policy packages
    stats                    Print cache, store and key statistics as JSON
    check <request.json>     Decide one authorization request
    mqtt-acl <topic> <acc>   Decide MQTT topic access (acc: 1=read, 2=publish, 4=subscribe)
    superuser                Check whether the token holder is an MQTT superuser
    watch                    Reload policies whenever they change, until interrupted

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -t, --token <TOKEN>    Bearer token (default: $WARDEN_TOKEN)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    WARDEN__OIDC__ISSUER          Identity provider issuer (required)
    WARDEN__OIDC__JWKS_URI        Signing key set URI
    WARDEN__POLICIES__DIR         Policy directory (default: policies)
    WARDEN__POLICIES__DATA_DIR    Data directory (default: data)
    WARDEN__LOGGING__LEVEL        Log level (default: info)

EXAMPLES:
    # Decide a request with a token
    warden --config /etc/warden/warden.toml --token $TOKEN check request.json

    # Ask what a broker would ask for a subscribe+read
    warden --token $TOKEN mqtt-acl sensors/room-1/temperature 5
"
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut loader = ConfigLoader::new();
    loader = match &args.config {
        Some(path) => loader.with_file(path)?,
        None => loader.with_optional_file("warden.toml")?,
    };
    let config = loader
        .with_dotenv()
        .with_env_prefix(DEFAULT_ENV_PREFIX)
        .load()
        .context("invalid configuration")?;

    warden_telemetry::init_telemetry(&config.logging, &config.metrics)?;
    info!(version = warden::VERSION, environment = %config.service.environment, "starting warden");

    let context = AppContext::from_config(&config)?;
    let pipeline = context.pipeline();
    let token = args.token.as_deref();

    match args.command {
        Command::Packages => {
            for package in pipeline.stats().packages {
                println!("{package}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&pipeline.stats())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { request } => {
            let body = std::fs::read_to_string(&request)
                .with_context(|| format!("reading {}", request.display()))?;
            let mut request: AuthorizeRequest =
                serde_json::from_str(&body).context("parsing authorization request")?;
            request.token = args.token.clone();

            let response = pipeline.authorize(request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(decision_code(response.decision.allowed))
        }
        Command::MqttAcl { topic, acc } => {
            let decision = pipeline.authorize_mqtt(token, &topic, acc, None).await?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
            Ok(decision_code(decision.allowed))
        }
        Command::Superuser => {
            let granted = pipeline.is_superuser(token).await?;
            println!("{}", if granted { "superuser" } else { "not superuser" });
            Ok(decision_code(granted))
        }
        Command::Watch => {
            if context.spawn_policy_watcher()?.is_none() {
                bail!("policy watching is disabled (set policies.watch = true)");
            }
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Denials exit with 1 so scripts can branch on the outcome.
fn decision_code(allowed: bool) -> ExitCode {
    if allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
