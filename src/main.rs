mod config;
mod errors;
mod firebase;
mod models;
mod serial;
mod sync;
mod utils;

use clap::Parser;
use log::{error, info, warn};
use time::OffsetDateTime;

use config::{read_password, Args, Credentials, Settings, SourceMode};
use errors::AuthError;
use firebase::{Authenticator, RealtimeDb, RetryPolicy, UserSession};
use serial::{
    list_ports, Actuator, DeviceSource, SyntheticSource, SystemPortResolver, TelemetrySource,
};
use sync::SyncLoop;
use utils::format_datetime;

/// Sign in and check the account, logging operator hints on failure
async fn authenticate(
    credentials: &Credentials,
    settings: &Settings,
    password: &str,
) -> Result<UserSession, AuthError> {
    let auth = Authenticator::new(credentials.clone(), settings.request_timeout)?;

    let session = match auth.sign_in(&settings.email, password).await {
        Ok(session) => session,
        Err(e) => {
            error!("Authentication failed: {}", e);
            error!("{}", e.hint());
            return Err(e);
        }
    };

    match auth.account_info(&session.id_token).await {
        Ok(account) if !account.email_verified => {
            warn!(
                "Email {} is not verified. Check your inbox (and spam folder) for the verification link",
                account.email.as_deref().unwrap_or(&session.email)
            );
        }
        Ok(_) => {}
        Err(e) => warn!("Could not fetch account info: {}", e),
    }

    Ok(session)
}

/// Build the source for the configured mode and relay until a fatal error
async fn start_relay(
    mode: SourceMode,
    settings: Settings,
    db: RealtimeDb,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut actuator: Option<Box<dyn Actuator>> = None;

    let source: Box<dyn TelemetrySource> = match &mode {
        SourceMode::Device(serial) => {
            let source = DeviceSource::open(serial).await?;
            if settings.echo_valve {
                actuator = Some(Box::new(source.actuator()?));
            }
            Box::new(source)
        }
        SourceMode::Synthetic { interval } => {
            info!("Synthetic mode: generating a reading every {:?}", interval);
            if settings.echo_valve {
                warn!("--echo-valve has no effect in synthetic mode");
            }
            Box::new(SyntheticSource::new(*interval))
        }
    };

    let mut relay = SyncLoop::new(source, Box::new(db.clone()), Box::new(db));
    if let Some(actuator) = actuator {
        relay = relay.with_actuator(actuator);
    }

    relay.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env first so it can set RUST_LOG and the AGRIBOT_* fallbacks
    dotenv::dotenv().ok();

    // Initialize logging, RUST_LOG still overrides the default level
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let args = Args::parse();

    if args.list_ports {
        list_ports();
        return Ok(());
    }

    // Load configuration
    let settings = match Settings::resolve(&args) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    let credentials = match Credentials::load(&settings.secrets_path) {
        Ok(credentials) => credentials,
        Err(e) => {
            error!("Failed to load Firebase credentials: {}", e);
            return Err(e.into());
        }
    };

    let password = read_password(&settings.email)?;
    let session = authenticate(&credentials, &settings, &password).await?;
    let db = RealtimeDb::new(
        &credentials,
        session,
        settings.request_timeout,
        RetryPolicy::new(settings.sink_retries),
    )?;

    if args.purge {
        db.purge().await?;
        return Ok(());
    }

    let mode = match SourceMode::resolve(&args, &SystemPortResolver) {
        Ok(mode) => mode,
        Err(e) => {
            error!("Failed to select telemetry source: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Session started at {}",
        format_datetime(&OffsetDateTime::now_utc())
    );

    // Run the relay or wait for Ctrl+C
    tokio::select! {
        result = start_relay(mode, settings, db) => {
            if let Err(e) = result {
                error!("Fatal error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
