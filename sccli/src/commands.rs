//! Command dispatch: turns parsed arguments into library calls.
use log::{debug, info, warn};
use secrecy::SecretString;
use securitycenter_api::tabular::parse_selector;
use securitycenter_api::{
    Authenticator, BulkDriver, LoginOutcome, NoThrottle, RecordType, ReportKind,
    SecurityCenterClient, SecurityCenterConfig, Session, SessionOverride, SessionStore, throttle,
};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use crate::cli::{AuthAction, Cli, Commands};
use crate::error::{CliError, Result};

/// Everything a command needs to talk to one SecurityCenter host.
pub struct Context {
    client: SecurityCenterClient,
    store: SessionStore,
    throttle_ms: i64,
}

impl Context {
    /// Build the client and session store from global arguments.
    ///
    /// Fails before any network call when the host is missing or malformed.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let session_override =
            SessionOverride::from_parts(cli.session.as_deref(), cli.token.as_deref());
        if session_override.is_none() && (cli.session.is_some() || cli.token.is_some()) {
            warn!("⚠️  --token and --session must be given together, ignoring the one supplied");
        }

        let mut config =
            SecurityCenterConfig::new(cli.host.trim()).with_request_timeout(cli.timeout);
        if cli.verify_certificates {
            config = config.with_certificate_validation();
        }
        if let Some(session_override) = session_override.clone() {
            config = config.with_session_override(session_override);
        }

        let client = SecurityCenterClient::new(config)?;
        let store = SessionStore::new(&cli.session_db, &client.config().host)
            .with_override(session_override);
        debug!("Using session database {}", store.db_path().display());

        Ok(Self {
            client,
            store,
            throttle_ms: cli.throttle,
        })
    }

    fn authenticator(&self) -> Authenticator<'_, SecurityCenterClient> {
        Authenticator::new(&self.client, &self.store)
    }

    /// The session every bulk command runs with.
    fn require_session(&self) -> Result<Session> {
        self.store.get()?.ok_or_else(|| {
            CliError::NotLoggedIn("no valid session, run `sccli auth` first".to_string())
        })
    }
}

/// Run the parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let context = Context::from_cli(&cli)?;

    match cli.command {
        Commands::Auth {
            action: Some(AuthAction::Delete),
            ..
        } => delete_session(&context),
        Commands::Auth {
            action: None,
            username,
            password,
        } => login(&context, username, password).await,
        Commands::Test => test_session(&context).await,
        Commands::Export {
            target,
            fields,
            filter,
            output,
        } => {
            export(
                &context,
                &target,
                fields.as_deref(),
                filter.as_deref(),
                output.as_deref(),
            )
            .await
        }
        Commands::Import {
            record_type,
            input,
            dryrun,
        } => import(&context, record_type, &input, dryrun).await,
        Commands::Reports { kind, dir } => download_reports(&context, kind.into(), &dir).await,
    }
}

fn delete_session(context: &Context) -> Result<()> {
    context.authenticator().logout()?;
    info!("🗑️  Session removed from {}", context.store.db_path().display());
    Ok(())
}

async fn login(
    context: &Context,
    username: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let authenticator = context.authenticator();

    if context.store.get()?.is_some() {
        if let Some(profile) = authenticator.test().await? {
            info!(
                "✅ Already logged in as {} ({} {})",
                profile.username, profile.firstname, profile.lastname
            );
            return Ok(());
        }
        debug!("Stored session was rejected, logging in again");
    }

    let (username, password) = require_credentials(username, password)?;

    match authenticator.login(&username, &password).await? {
        LoginOutcome::Authenticated(session) => {
            info!("🔐 Session valid until {}", session.expires_at());
            Ok(())
        }
        LoginOutcome::SessionOnly(_) => Err(CliError::NotLoggedIn(
            "the server issued a session but no token; check the username and password".to_string(),
        )),
    }
}

/// Username and password for a fresh login; both must be non-empty.
fn require_credentials(
    username: Option<String>,
    password: Option<String>,
) -> Result<(String, SecretString)> {
    let username = username
        .filter(|username| !username.trim().is_empty())
        .ok_or_else(|| CliError::MissingCredentials("--username or SC_USERNAME".to_string()))?;
    let password = password
        .filter(|password| !password.is_empty())
        .map(|password| SecretString::new(password.into()))
        .ok_or_else(|| CliError::MissingCredentials("--password or SC_PASSWORD".to_string()))?;
    Ok((username, password))
}

async fn test_session(context: &Context) -> Result<()> {
    match context.authenticator().test().await? {
        Some(profile) => {
            info!(
                "✅ Logged in as {} ({} {})",
                profile.username, profile.firstname, profile.lastname
            );
            Ok(())
        }
        None => Err(CliError::NotLoggedIn(
            "the session is missing, expired or rejected".to_string(),
        )),
    }
}

async fn export(
    context: &Context,
    target: &str,
    fields: Option<&str>,
    filter: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let session = context.require_session()?;
    let selector = fields.map(parse_selector);
    let mut driver = BulkDriver::new(&context.client, session, NoThrottle);

    let outcome = match target.parse::<RecordType>() {
        Ok(record_type) => {
            driver
                .export(record_type, selector.as_deref(), filter)
                .await?
        }
        Err(_) => {
            debug!("'{target}' is not a known record type, exporting it as an endpoint");
            driver
                .export_endpoint(target, selector.as_deref(), filter)
                .await?
        }
    };

    match output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            outcome.write_csv(&mut writer)?;
            writer.flush()?;
            info!("💾 Wrote {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            outcome.write_csv(&mut writer)?;
            writer.flush()?;
        }
    }
    Ok(())
}

async fn import(
    context: &Context,
    record_type: RecordType,
    input: &Path,
    dry_run: bool,
) -> Result<()> {
    let session = context.require_session()?;
    let reader = BufReader::new(File::open(input)?);
    let mut driver = BulkDriver::new(
        &context.client,
        session,
        throttle::from_millis(context.throttle_ms),
    )
    .with_dry_run(dry_run);

    let summary = driver.import_csv(record_type, reader).await?;
    match summary.failure {
        None => Ok(()),
        Some(failure) => Err(CliError::ImportFailed {
            row: failure.row,
            payload: failure.payload,
        }),
    }
}

async fn download_reports(context: &Context, kind: ReportKind, directory: &Path) -> Result<()> {
    let session = context.require_session()?;
    let mut driver = BulkDriver::new(&context.client, session, NoThrottle);

    let summary = driver.download_reports(kind, directory).await?;
    if summary.saved.len() < summary.attempted {
        warn!(
            "⚠️  {} of {} {} could not be saved",
            summary.attempted.saturating_sub(summary.saved.len()),
            summary.attempted,
            kind.label()
        );
    }
    Ok(())
}
