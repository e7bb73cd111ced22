//! Helpers for launching disposable Postgres instances for integration
//! tests without Docker.
//!
//! An externally supplied `SHELMAN_TEST_DATABASE_URL` takes precedence;
//! without one, locally installed Postgres binaries (`initdb`, `postgres`,
//! `pg_isready`) are used to spawn a temporary instance. Tests decide
//! whether to skip when neither is available.

use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use postgres::NoTls;
use url::Url;

/// Handle to a disposable Postgres instance used in tests.
pub struct TestDatabase {
    connection_string: String,
    process: Option<Child>,
    data_dir: Option<PathBuf>,
    cleanup: Option<DbCleanup>,
}

impl TestDatabase {
    /// Connection string that can be passed to `sqlx`.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        if let Some(cleanup) = &self.cleanup {
            let _ = run_admin_statement(
                &cleanup.admin_url,
                &format!("DROP DATABASE IF EXISTS \"{}\"", cleanup.database),
            );
        }
        if let Some(process) = &mut self.process {
            let _ = process.kill();
            let _ = process.wait();
        }
        if let Some(dir) = &self.data_dir {
            let _ = fs::remove_dir_all(dir);
        }
    }
}

struct DbCleanup {
    admin_url: String,
    database: String,
}

/// Start a disposable Postgres instance, preferring an external URL from
/// `SHELMAN_TEST_DATABASE_URL`.
///
/// # Errors
///
/// Returns an error if no external URL is provided and Postgres binaries
/// are unavailable or fail to start.
pub fn start_postgres() -> Result<TestDatabase> {
    if let Ok(url) = std::env::var("SHELMAN_TEST_DATABASE_URL") {
        let (connection_string, cleanup) = create_unique_database(&url)?;
        return Ok(TestDatabase {
            connection_string,
            process: None,
            data_dir: None,
            cleanup: Some(cleanup),
        });
    }
    start_local_postgres()
}

fn start_local_postgres() -> Result<TestDatabase> {
    let initdb = resolve_binary("initdb")?;
    let postgres_bin = resolve_binary("postgres")?;
    let pg_isready = resolve_binary("pg_isready")?;

    let port = reserve_port()?;
    let data_dir = create_data_dir()?;
    let data_dir_text = data_dir
        .to_str()
        .context("data dir contains non-utf8 characters")?;

    let initdb_status = Command::new(&initdb)
        .args(["-D", data_dir_text, "--username=postgres", "--auth=trust"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("failed to run initdb")?;
    if !initdb_status.success() {
        bail!("initdb exited with failure status");
    }

    let process = Command::new(&postgres_bin)
        .args(["-D", data_dir_text, "-p", &port.to_string(), "-h", "127.0.0.1"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to start postgres process")?;

    wait_for_ready(&pg_isready, port)?;

    let base_url = format!("postgres://postgres@127.0.0.1:{port}/postgres");
    let (connection_string, cleanup) = create_unique_database(&base_url)?;

    Ok(TestDatabase {
        connection_string,
        process: Some(process),
        data_dir: Some(data_dir),
        cleanup: Some(cleanup),
    })
}

fn resolve_binary(name: &str) -> Result<PathBuf> {
    let mut search_paths: Vec<PathBuf> = Vec::new();
    // Prefer full server installations so initdb has the required assets.
    search_paths.extend([
        PathBuf::from("/opt/homebrew/opt/postgresql@16/bin"),
        PathBuf::from("/usr/local/opt/postgresql@16/bin"),
        PathBuf::from("/usr/lib/postgresql/16/bin"),
    ]);
    search_paths.extend(
        std::env::var_os("PATH")
            .map_or_else(Vec::new, |paths| std::env::split_paths(&paths).collect()),
    );

    for dir in search_paths {
        let candidate = dir.join(name);
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    bail!("{name} binary is required for Postgres tests");
}

fn reserve_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("failed to reserve port")?;
    let port = listener
        .local_addr()
        .context("failed to read listener address")?
        .port();
    drop(listener);
    Ok(port)
}

fn create_data_dir() -> Result<PathBuf> {
    let base = std::env::temp_dir().join("shelman-postgres");
    fs::create_dir_all(&base)
        .with_context(|| format!("failed to create base dir {}", base.display()))?;
    for attempt in 0..5 {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let candidate = base.join(format!("pg-{suffix}-{attempt}"));
        if !candidate.exists() {
            fs::create_dir_all(&candidate)
                .with_context(|| format!("failed to create data dir {}", candidate.display()))?;
            return Ok(candidate);
        }
    }
    bail!("failed to allocate temporary data directory for postgres");
}

fn wait_for_ready(pg_isready: &PathBuf, port: u16) -> Result<()> {
    for _ in 0..30 {
        let status = Command::new(pg_isready)
            .args(["-h", "127.0.0.1", "-p", &port.to_string(), "-U", "postgres"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if matches!(status, Ok(ref s) if s.success()) {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(200));
    }
    bail!("postgres process did not become ready in time")
}

fn create_unique_database(base_url: &str) -> Result<(String, DbCleanup)> {
    let parsed = Url::parse(base_url).context("invalid postgres connection url")?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let database = format!("shelman_test_{}_{nanos}", std::process::id());

    let mut admin = parsed.clone();
    admin.set_path("/postgres");
    let admin_url = admin.to_string();
    run_admin_statement(&admin_url, &format!("CREATE DATABASE \"{database}\""))?;

    let mut database_url = parsed;
    database_url.set_path(&format!("/{database}"));
    Ok((
        database_url.to_string(),
        DbCleanup {
            admin_url,
            database,
        },
    ))
}

/// The synchronous client must not run on an async runtime thread.
fn run_admin_statement(admin_url: &str, statement: &str) -> Result<()> {
    let admin = admin_url.to_string();
    let statement = statement.to_string();
    thread::spawn(move || -> Result<()> {
        let config = postgres::Config::from_str(&admin)?;
        let mut client = config.connect(NoTls)?;
        client
            .simple_query(&statement)
            .map(|_| ())
            .context("admin statement failed")
    })
    .join()
    .unwrap_or_else(|_| Err(anyhow::anyhow!("admin statement thread panicked")))
}
