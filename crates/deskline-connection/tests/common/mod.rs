//! Common test utilities: on-disk SQLite databases and a settings file
//! pointing at them

use std::path::{Path, PathBuf};
use std::sync::Once;

use deskline_connection::DesklineSettings;
use deskline_drivers::sqlite::SqliteConnection;
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness; `RUST_LOG` narrows it
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("deskline_connection=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

const SYSTEM_SCHEMA: &str = r#"
    CREATE TABLE employees (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        active INTEGER NOT NULL DEFAULT 1
    );
    INSERT INTO employees (name, email) VALUES ('Alice', 'alice@example.com');
"#;

const TICKETING_SCHEMA: &str = r#"
    CREATE TABLE tickets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'open',
        opened_at TIMESTAMP
    );
"#;

pub const CATALOG: &str = r#"
[[statement]]
id = 1
alias = "employee.by_email"
query = "SELECT id, name, active FROM employees WHERE email = ?"

[[statement]]
id = 2
alias = "employee.count"
query = "SELECT COUNT(*) FROM employees"

[[statement]]
id = 1000
alias = "ticket.insert"
query = "INSERT INTO tickets (title) VALUES (?)"

[[statement]]
id = 1001
alias = "ticket.count_open"
query = "SELECT COUNT(*) FROM tickets WHERE status = 'open'"

[[statement]]
id = 1002
alias = "ticket.close_all"
query = "UPDATE tickets SET status = 'closed' WHERE status = ?"
affinity = "async_only"
"#;

/// Two seeded databases, a statement catalog and a settings file in one
/// temporary directory
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();

        seed(&dir.path().join("system.db"), SYSTEM_SCHEMA).await;
        seed(&dir.path().join("ticketing.db"), TICKETING_SCHEMA).await;
        std::fs::write(dir.path().join("statements.toml"), CATALOG).unwrap();

        Self { dir }
    }

    pub fn db_path(&self, name: &str) -> String {
        self.dir.path().join(name).to_str().unwrap().to_string()
    }

    /// Settings TOML; `ticketing_active` toggles the ticketing primary
    pub fn settings_toml(&self, ticketing_active: bool) -> String {
        format!(
            r#"
statement_catalogs = ["statements.toml"]

[system]
driver = "sqlite"

[system.primary]
database = "{system}"

[system.pool.sync]
min_size = 2
max_size = 10
max_queue_depth = 8

[system.pool.async]
min_size = 1
max_size = 4

[ticketing]
driver = "sqlite"

[ticketing.primary]
database = "{ticketing}"
active = {ticketing_active}

[ticketing.pool.async]
min_size = 1
max_size = 4
max_queue_depth = 4
"#,
            system = self.db_path("system.db"),
            ticketing = self.db_path("ticketing.db"),
        )
    }

    pub fn write_settings(&self, ticketing_active: bool) -> PathBuf {
        let path = self.dir.path().join("deskline.toml");
        std::fs::write(&path, self.settings_toml(ticketing_active)).unwrap();
        path
    }

    pub fn settings(&self, ticketing_active: bool) -> DesklineSettings {
        DesklineSettings::load(&self.write_settings(ticketing_active)).unwrap()
    }
}

async fn seed(path: &Path, schema: &str) {
    let conn = SqliteConnection::open(path.to_str().unwrap()).unwrap();
    conn.execute_batch(schema).await.unwrap();
}
