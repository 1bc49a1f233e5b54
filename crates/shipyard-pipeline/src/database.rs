//! Managed database provisioning and runtime credential projection.

use shipyard_core::deployment::{Database, Framework};
use shipyard_core::resource::{ResourceKind, ResourceRecord};
use shipyard_core::secret::{DatabaseCredentials, SecretValue};
use shipyard_core::{Error, Result};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::context::RunContext;
use crate::poller::{HealthProbeResult, poll_until_ready};

pub const MASTER_USERNAME: &str = "shipyard_admin";
pub const PASSWORD_LENGTH: usize = 24;

const AVAILABLE: &str = "available";

/// A random alphanumeric password.
pub fn generate_password() -> String {
    let mut password = String::with_capacity(PASSWORD_LENGTH);
    while password.len() < PASSWORD_LENGTH {
        password.push_str(&Uuid::new_v4().simple().to_string());
    }
    password.truncate(PASSWORD_LENGTH);
    password
}

/// Variables exposing `creds` to the application.
///
/// Every framework gets `DATABASE_URL`; Laravel also reads the discrete
/// `DB_*` keys.
pub fn database_env(creds: &DatabaseCredentials, framework: Framework) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("DATABASE_URL".to_string(), creds.connection_url());
    if framework == Framework::Laravel {
        env.insert(
            "DB_CONNECTION".to_string(),
            creds.engine.laravel_driver().to_string(),
        );
        env.insert("DB_HOST".to_string(), creds.host.clone());
        env.insert("DB_PORT".to_string(), creds.port.to_string());
        env.insert("DB_DATABASE".to_string(), creds.database.clone());
        env.insert("DB_USERNAME".to_string(), creds.username.clone());
        env.insert("DB_PASSWORD".to_string(), creds.password.clone());
    }
    env
}

/// Username and password stored by an earlier run, if the secret has both.
fn stored_login(secret: &SecretValue) -> Option<(String, String)> {
    let username = secret.get("username")?;
    let password = secret.get("password")?;
    Some((username.to_string(), password.to_string()))
}

fn credentials_from(
    record: &ResourceRecord,
    engine: Database,
    username: String,
    password: String,
) -> Result<DatabaseCredentials> {
    let host = record
        .attribute("endpoint")
        .ok_or_else(|| Error::provisioning(ResourceKind::Database, "database has no endpoint"))?;
    let port = match record.attribute("port") {
        Some(raw) => raw.parse().map_err(|_| {
            Error::provisioning(ResourceKind::Database, format!("invalid database port {raw:?}"))
        })?,
        None => engine.default_port(),
    };
    Ok(DatabaseCredentials {
        engine,
        host: host.to_string(),
        port,
        username,
        password,
        database: record
            .attribute("database")
            .unwrap_or(engine.default_database_name())
            .to_string(),
    })
}

/// Create the project's database, wait for it, and store its credentials.
pub async fn provision_database(
    ctx: &mut RunContext<'_>,
    engine: Database,
) -> Result<DatabaseCredentials> {
    let db_name = ctx.names.database();
    let secret_name = ctx.names.database_secret();

    let (username, password) = match ctx.provisioner.read_secret(&secret_name).await? {
        Some(secret) => match stored_login(&secret) {
            Some(login) => {
                ctx.reporter.info(format!("Reusing stored credentials from {secret_name}"));
                login
            }
            None => {
                return Err(Error::provisioning(
                    ResourceKind::Secret,
                    format!("{secret_name} exists but holds no database login"),
                ));
            }
        },
        None => (MASTER_USERNAME.to_string(), generate_password()),
    };

    ctx.reporter.info(format!("Provisioning {engine} database {db_name}"));
    ctx.provisioner
        .create_managed_database(&db_name, engine, &username, &password, &ctx.settings.network)
        .await?;

    let provisioner = &*ctx.provisioner;
    let name = db_name.as_str();
    poll_until_ready("database", ctx.settings.database_poll, ctx.reporter, move || async move {
        let record = provisioner.describe(ResourceKind::Database, name).await?;
        let state = record.state.as_deref().unwrap_or("unknown");
        Ok(match record.attribute("endpoint") {
            Some(endpoint) if state == AVAILABLE => {
                HealthProbeResult::healthy(format!("{state} at {endpoint}"))
            }
            Some(_) => HealthProbeResult::pending(state.to_string()),
            None => HealthProbeResult::pending(format!("{state}, endpoint not yet assigned")),
        })
    })
    .await?;

    let record = ctx.provisioner.describe(ResourceKind::Database, &db_name).await?;
    let creds = credentials_from(&record, engine, username, password)?;

    ctx.provisioner
        .create_secret(&secret_name, creds.to_secret())
        .await?;
    ctx.reporter.info(format!(
        "Database ready at {}:{} ({})",
        creds.host, creds.port, creds.database
    ));
    Ok(creds)
}
