//! Registry of parameterized statements
//!
//! Statements are registered once at startup (in code or from a TOML
//! catalog) and looked up concurrently afterwards by numeric id or alias.
//! Identifier ranges are partitioned between the logical databases so an id
//! alone tells which database a statement targets.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

use crate::{DesklineError, Result, RoleAffinity};


/// Dense numeric statement identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementId(pub u32);

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for StatementId {
    fn from(id: u32) -> Self {
        StatementId(id)
    }
}

/// The two independently configured databases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalDatabase {
    System,
    Ticketing,
}

impl LogicalDatabase {
    pub const ALL: [LogicalDatabase; 2] = [LogicalDatabase::System, LogicalDatabase::Ticketing];

    /// Statement ids owned by this database
    pub fn id_range(&self) -> Range<u32> {
        match self {
            LogicalDatabase::System => 0..1000,
            LogicalDatabase::Ticketing => 1000..2000,
        }
    }

    pub fn owns(&self, id: StatementId) -> bool {
        self.id_range().contains(&id.0)
    }

    /// Database an id belongs to, if it falls in any known range
    pub fn for_statement(id: StatementId) -> Option<LogicalDatabase> {
        Self::ALL.into_iter().find(|db| db.owns(id))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalDatabase::System => "system",
            LogicalDatabase::Ticketing => "ticketing",
        }
    }
}

impl fmt::Display for LogicalDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogicalDatabase {
    type Err = DesklineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(LogicalDatabase::System),
            "ticketing" => Ok(LogicalDatabase::Ticketing),
            other => Err(DesklineError::Configuration(format!(
                "Unknown logical database '{}'",
                other
            ))),
        }
    }
}

/// How a caller names a statement
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatementKey {
    Id(StatementId),
    Alias(String),
}

impl fmt::Display for StatementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKey::Id(id) => write!(f, "{}", id),
            StatementKey::Alias(alias) => write!(f, "'{}'", alias),
        }
    }
}

impl From<StatementId> for StatementKey {
    fn from(id: StatementId) -> Self {
        StatementKey::Id(id)
    }
}

impl From<u32> for StatementKey {
    fn from(id: u32) -> Self {
        StatementKey::Id(StatementId(id))
    }
}

impl From<&str> for StatementKey {
    fn from(alias: &str) -> Self {
        StatementKey::Alias(alias.to_string())
    }
}

impl From<String> for StatementKey {
    fn from(alias: String) -> Self {
        StatementKey::Alias(alias)
    }
}

/// Immutable description of a registered statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementMetadata {
    pub id: StatementId,
    pub alias: Option<String>,
    pub query: String,
    pub affinity: RoleAffinity,
    /// Number of positional `?` placeholders in `query`
    pub parameter_count: usize,
}

impl StatementMetadata {
    pub fn new(
        id: StatementId,
        alias: Option<String>,
        query: impl Into<String>,
        affinity: RoleAffinity,
    ) -> Self {
        let query = query.into();
        let parameter_count = count_placeholders(&query);
        Self {
            id,
            alias: alias.filter(|a| !a.is_empty()),
            query,
            affinity,
            parameter_count,
        }
    }

    pub fn database(&self) -> Option<LogicalDatabase> {
        LogicalDatabase::for_statement(self.id)
    }
}

/// Count `?` placeholders that sit outside quoted literals, identifiers and
/// comments. A backslash escapes the next character inside string literals.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' | '`' => {
                while let Some(next) = chars.next() {
                    if next == '\\' && ch != '`' {
                        chars.next();
                    } else if next == ch {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => skip_line(&mut chars),
            '#' => skip_line(&mut chars),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut star = false;
                for next in chars.by_ref() {
                    if star && next == '/' {
                        break;
                    }
                    star = next == '*';
                }
            }
            '?' => count += 1,
            _ => {}
        }
    }
    count
}

fn skip_line(chars: &mut impl Iterator<Item = char>) {
    for next in chars {
        if next == '\n' {
            break;
        }
    }
}

#[derive(Default)]
struct RegistryState {
    by_id: BTreeMap<StatementId, Arc<StatementMetadata>>,
    aliases: HashMap<String, StatementId>,
}

/// Catalog of statements shared by every connection of an application
#[derive(Default)]
pub struct StatementRegistry {
    state: RwLock<RegistryState>,
}

impl StatementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a statement, replacing any previous one with the same id.
    ///
    /// An empty alias registers the statement by id only. When an id is
    /// overwritten the alias of the old entry stops resolving.
    pub fn register_statement(
        &self,
        alias: &str,
        id: impl Into<StatementId>,
        query: impl Into<String>,
        affinity: RoleAffinity,
    ) -> Arc<StatementMetadata> {
        let id = id.into();
        let alias = (!alias.is_empty()).then(|| alias.to_string());
        let metadata = Arc::new(StatementMetadata::new(id, alias, query, affinity));

        if metadata.database().is_none() {
            tracing::warn!(%id, "statement id outside every logical database range");
        }

        let mut state = self.state.write();
        let stale_alias = state
            .by_id
            .insert(id, metadata.clone())
            .and_then(|previous| previous.alias.clone());
        if let Some(old_alias) = stale_alias {
            if state.aliases.get(&old_alias) == Some(&id) {
                state.aliases.remove(&old_alias);
            }
        }
        if let Some(alias) = &metadata.alias {
            match state.aliases.insert(alias.clone(), id) {
                Some(other) if other != id => {
                    tracing::warn!(alias = %alias, previous = %other, %id, "statement alias re-pointed");
                }
                _ => {}
            }
        }
        tracing::trace!(%id, alias = ?metadata.alias, "statement registered");
        metadata
    }

    /// Look a statement up by id or alias
    pub fn get_metadata(&self, key: impl Into<StatementKey>) -> Result<Arc<StatementMetadata>> {
        let key = key.into();
        let state = self.state.read();
        let id = match &key {
            StatementKey::Id(id) => Some(*id),
            StatementKey::Alias(alias) => state.aliases.get(alias).copied(),
        };
        id.and_then(|id| state.by_id.get(&id).cloned())
            .ok_or_else(|| DesklineError::NotFound(format!("Statement {} is not registered", key)))
    }

    /// Snapshot of every registered statement, ordered by id
    pub fn get_all(&self) -> Vec<Arc<StatementMetadata>> {
        self.state.read().by_id.values().cloned().collect()
    }

    /// Number of statements whose id falls in the database's range
    pub fn count_for(&self, database: LogicalDatabase) -> usize {
        let range = database.id_range();
        self.state
            .read()
            .by_id
            .range(StatementId(range.start)..StatementId(range.end))
            .count()
    }

    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().by_id.is_empty()
    }

    /// Register every `[[statement]]` table of a TOML catalog.
    ///
    /// ```toml
    /// [[statement]]
    /// id = 1000
    /// alias = "ticket.by_id"
    /// query = "SELECT id, title FROM tickets WHERE id = ?"
    /// affinity = "both"
    /// ```
    pub fn load_catalog(&self, source: &str) -> Result<usize> {
        let catalog: StatementCatalog = toml::from_str(source).map_err(|e| {
            DesklineError::Configuration(format!("Invalid statement catalog: {}", e))
        })?;

        let count = catalog.statement.len();
        for entry in catalog.statement {
            self.register_statement(
                entry.alias.as_deref().unwrap_or_default(),
                entry.id,
                entry.query,
                entry.affinity,
            );
        }
        tracing::debug!(count, "statement catalog loaded");
        Ok(count)
    }

    pub fn load_catalog_file(&self, path: &std::path::Path) -> Result<usize> {
        let source = std::fs::read_to_string(path)?;
        self.load_catalog(&source)
    }
}

impl fmt::Debug for StatementRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementRegistry")
            .field("statements", &self.len())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct StatementCatalog {
    #[serde(default)]
    statement: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    id: StatementId,
    #[serde(default)]
    alias: Option<String>,
    query: String,
    #[serde(default)]
    affinity: RoleAffinity,
}
