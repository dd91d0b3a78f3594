//! A single pooled database session
//!
//! [`DbConnection`] wraps a driver transport, optionally reached through an
//! [`SshTunnel`], and caches the registered statements prepared on it.
//! Cached statements live in an arena owned by the connection and are
//! addressed through copyable [`StatementHandle`]s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use deskline_core::{
    Connection, ConnectionConfig, ConnectionRole, DatabaseDriver, DesklineError, Result,
    ResultSet, SshTunnelConfig, StatementId, StatementKey, StatementMetadata, StatementRegistry,
    Value,
};

use crate::tunnel::{LOCAL_HOST, SshTunnel};


/// Where and how to open sessions for one side (primary or replica) of a
/// logical database
#[derive(Clone)]
pub struct Endpoint {
    /// Human readable name used in logs, e.g. `ticketing/replica`
    pub label: String,
    pub driver: Arc<dyn DatabaseDriver>,
    pub config: ConnectionConfig,
    pub tunnel: Option<SshTunnelConfig>,
    /// Inactive endpoints are configured but never connected
    pub active: bool,
}

impl Endpoint {
    pub fn new(
        label: impl Into<String>,
        driver: Arc<dyn DatabaseDriver>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            label: label.into(),
            driver,
            config,
            tunnel: None,
            active: true,
        }
    }

    pub fn with_tunnel(mut self, tunnel: SshTunnelConfig) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Port the database listens on, falling back to the driver default
    fn remote_port(&self) -> u16 {
        match self.config.port {
            0 => self.driver.default_port().unwrap_or(0),
            port => port,
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("label", &self.label)
            .field("driver", &self.driver.name())
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("tunnel", &self.tunnel.as_ref().map(|t| &t.host))
            .field("active", &self.active)
            .finish()
    }
}

/// Index of a statement cached on one [`DbConnection`]
///
/// Handles are only meaningful on the connection that issued them and are
/// invalidated when that connection disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementHandle(usize);

struct PreparedStatement {
    metadata: Arc<StatementMetadata>,
    bindings: Vec<Option<Value>>,
}

impl PreparedStatement {
    fn bound_params(&self) -> Result<Vec<Value>> {
        self.bindings
            .iter()
            .enumerate()
            .map(|(index, value)| {
                value.clone().ok_or_else(|| {
                    DesklineError::Statement(format!(
                        "parameter {} of statement {} is not bound",
                        index, self.metadata.id
                    ))
                })
            })
            .collect()
    }
}

/// One logical database session
pub struct DbConnection {
    id: u64,
    role: ConnectionRole,
    replica: bool,
    endpoint: Arc<Endpoint>,
    registry: Arc<StatementRegistry>,
    transport: Option<Arc<dyn Connection>>,
    tunnel: Option<SshTunnel>,
    /// Set when an operation failed because the transport went away
    broken: bool,
    in_transaction: bool,
    last_affected_rows: u64,
    last_insert_id: Option<u64>,
    statements: Vec<PreparedStatement>,
    by_id: HashMap<StatementId, usize>,
    by_alias: HashMap<String, usize>,
}

impl fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("replica", &self.replica)
            .field("endpoint", &self.endpoint.label)
            .field("connected", &self.is_connected())
            .field("in_transaction", &self.in_transaction)
            .field("cached_statements", &self.statements.len())
            .finish()
    }
}

impl DbConnection {
    /// Create a disconnected session; call [`DbConnection::connect`] next
    pub fn new(
        id: u64,
        role: ConnectionRole,
        replica: bool,
        endpoint: Arc<Endpoint>,
        registry: Arc<StatementRegistry>,
    ) -> Self {
        Self {
            id,
            role,
            replica,
            endpoint,
            registry,
            transport: None,
            tunnel: None,
            broken: false,
            in_transaction: false,
            last_affected_rows: 0,
            last_insert_id: None,
            statements: Vec::new(),
            by_id: HashMap::new(),
            by_alias: HashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn is_replica(&self) -> bool {
        self.replica
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Rows affected by the last insert, update or delete
    pub fn last_affected_rows(&self) -> u64 {
        self.last_affected_rows
    }

    pub fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    /// Number of statements prepared on this session
    pub fn cached_statements(&self) -> usize {
        self.statements.len()
    }

    pub fn is_connected(&self) -> bool {
        let transport_open = self
            .transport
            .as_ref()
            .is_some_and(|transport| !transport.is_closed());
        let tunnel_up = self.tunnel.as_ref().is_none_or(SshTunnel::is_active);
        transport_open && tunnel_up && !self.broken
    }

    /// Open the session, starting the endpoint's tunnel first if it has one.
    /// A no-op when already connected.
    #[tracing::instrument(skip(self), fields(conn_id = self.id, endpoint = %self.endpoint.label, role = %self.role))]
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        // Leftovers from a dead session
        self.disconnect().await;

        let config = match self.endpoint.tunnel.clone() {
            Some(tunnel_config) => {
                let tunnel = self.start_tunnel(tunnel_config).await?;
                let port = tunnel.local_port().ok_or_else(|| {
                    DesklineError::Tunnel("tunnel is active without a local port".into())
                })?;
                self.tunnel = Some(tunnel);
                self.endpoint.config.redirected(LOCAL_HOST, port)
            }
            None => self.endpoint.config.clone(),
        };

        match self.endpoint.driver.connect(&config).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.broken = false;
                tracing::debug!("database session opened");
                Ok(())
            }
            Err(e) => {
                if let Some(mut tunnel) = self.tunnel.take() {
                    tunnel.stop();
                }
                Err(e)
            }
        }
    }

    async fn start_tunnel(&self, tunnel_config: SshTunnelConfig) -> Result<SshTunnel> {
        let mut tunnel = SshTunnel::new(
            tunnel_config,
            self.endpoint.config.host.clone(),
            self.endpoint.remote_port(),
        );

        // ssh2 blocks for the whole handshake
        let started = tokio::task::spawn_blocking(move || tunnel.start().map(|_| tunnel))
            .await
            .map_err(|e| DesklineError::Tunnel(format!("tunnel start task failed: {}", e)))?;
        Ok(started?)
    }

    /// Close the transport, stop the tunnel and forget every cached statement.
    /// Safe to call on a disconnected session.
    pub async fn disconnect(&mut self) {
        self.statements.clear();
        self.by_id.clear();
        self.by_alias.clear();
        self.in_transaction = false;

        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::debug!(conn_id = self.id, error = %e, "error closing transport");
            }
        }
        if let Some(mut tunnel) = self.tunnel.take() {
            tunnel.stop();
        }
        self.broken = false;
    }

    /// Liveness probe on the underlying transport
    pub async fn ping(&mut self) -> Result<()> {
        let transport = self.transport()?;
        let outcome = transport.ping().await;
        self.observe(outcome)
    }

    /// Transport for probes that bypass the registry, such as replica lag
    pub(crate) fn raw_transport(&self) -> Option<Arc<dyn Connection>> {
        self.transport.clone()
    }

    /// Prepare a registered statement, reusing the cached one if present.
    ///
    /// Fails when the statement is unknown, when its role affinity excludes
    /// this connection's role, or when the driver rejects the query text.
    /// Re-preparing a cached statement clears its bindings.
    pub async fn prepare(&mut self, key: impl Into<StatementKey>) -> Result<StatementHandle> {
        let key = key.into();

        let cached = match &key {
            StatementKey::Id(id) => self.by_id.get(id).copied(),
            StatementKey::Alias(alias) => self.by_alias.get(alias).copied(),
        };
        if let Some(index) = cached {
            let statement = &mut self.statements[index];
            statement.bindings.iter_mut().for_each(|slot| *slot = None);
            return Ok(StatementHandle(index));
        }

        let metadata = self.registry.get_metadata(key)?;
        if !metadata.affinity.allows(self.role) {
            return Err(DesklineError::Statement(format!(
                "statement {} is {} and cannot run on a {} connection",
                metadata.id, metadata.affinity, self.role
            )));
        }

        let transport = self.transport()?;
        let outcome = transport.prepare(&metadata.query).await;
        self.observe(outcome)?;

        let index = self.statements.len();
        self.by_id.insert(metadata.id, index);
        if let Some(alias) = &metadata.alias {
            self.by_alias.insert(alias.clone(), index);
        }
        tracing::trace!(conn_id = self.id, statement = %metadata.id, "statement prepared");
        self.statements.push(PreparedStatement {
            bindings: vec![None; metadata.parameter_count],
            metadata,
        });

        Ok(StatementHandle(index))
    }

    /// Ask the server to prepare `metadata`'s query without touching the
    /// statement cache, so every call is a real round trip.
    pub async fn check_statement(&mut self, metadata: &StatementMetadata) -> Result<()> {
        let transport = self.transport()?;
        let outcome = transport.prepare(&metadata.query).await;
        self.observe(outcome)
    }

    /// Metadata of a prepared statement
    pub fn statement(&self, handle: StatementHandle) -> Result<&StatementMetadata> {
        self.prepared(handle).map(|statement| statement.metadata.as_ref())
    }

    /// Bind the zero-based positional parameter `index`
    pub fn bind(
        &mut self,
        handle: StatementHandle,
        index: usize,
        value: impl Into<Value>,
    ) -> Result<()> {
        let statement = self.prepared_mut(handle)?;
        let count = statement.bindings.len();
        let slot = statement.bindings.get_mut(index).ok_or_else(|| {
            DesklineError::Statement(format!(
                "parameter index {} out of range, statement {} takes {} parameter(s)",
                index, statement.metadata.id, count
            ))
        })?;
        *slot = Some(value.into());
        Ok(())
    }

    pub fn clear_bindings(&mut self, handle: StatementHandle) -> Result<()> {
        let statement = self.prepared_mut(handle)?;
        statement.bindings.iter_mut().for_each(|slot| *slot = None);
        Ok(())
    }

    /// Run a prepared query and return a forward-only cursor over its rows
    pub async fn execute_select(&mut self, handle: StatementHandle) -> Result<ResultSet> {
        let (query, params) = self.bound(handle)?;
        let transport = self.transport()?;
        let outcome = transport.query(&query, &params).await;
        self.observe(outcome).map(ResultSet::new)
    }

    /// Run a prepared INSERT and return the affected row count
    pub async fn execute_insert(&mut self, handle: StatementHandle) -> Result<u64> {
        self.execute_modify(handle).await
    }

    /// Run a prepared UPDATE and return the affected row count
    pub async fn execute_update(&mut self, handle: StatementHandle) -> Result<u64> {
        self.execute_modify(handle).await
    }

    /// Run a prepared DELETE and return the affected row count
    pub async fn execute_delete(&mut self, handle: StatementHandle) -> Result<u64> {
        self.execute_modify(handle).await
    }

    async fn execute_modify(&mut self, handle: StatementHandle) -> Result<u64> {
        let (query, params) = self.bound(handle)?;
        let transport = self.transport()?;
        let outcome = transport.execute(&query, &params).await;
        let result = self.observe(outcome)?;

        self.last_affected_rows = result.affected_rows;
        self.last_insert_id = result.last_insert_id;
        Ok(result.affected_rows)
    }

    pub async fn begin_transaction(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(DesklineError::Statement("a transaction is already open".into()));
        }
        let transport = self.transport()?;
        let outcome = transport.begin_transaction().await;
        self.observe(outcome)?;
        self.in_transaction = true;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(DesklineError::Statement("no transaction to commit".into()));
        }
        let transport = self.transport()?;
        let outcome = transport.commit().await;
        self.in_transaction = false;
        self.observe(outcome)
    }

    pub async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        let transport = self.transport()?;
        let outcome = transport.rollback().await;
        self.in_transaction = false;
        self.observe(outcome)
    }

    fn transport(&self) -> Result<Arc<dyn Connection>> {
        match &self.transport {
            Some(transport) if !self.broken => Ok(transport.clone()),
            _ => Err(DesklineError::Connection(format!(
                "connection {} to {} is not open",
                self.id, self.endpoint.label
            ))),
        }
    }

    fn prepared(&self, handle: StatementHandle) -> Result<&PreparedStatement> {
        self.statements
            .get(handle.0)
            .ok_or_else(|| DesklineError::Statement(format!("stale statement handle {}", handle.0)))
    }

    fn prepared_mut(&mut self, handle: StatementHandle) -> Result<&mut PreparedStatement> {
        self.statements
            .get_mut(handle.0)
            .ok_or_else(|| DesklineError::Statement(format!("stale statement handle {}", handle.0)))
    }

    fn bound(&self, handle: StatementHandle) -> Result<(String, Vec<Value>)> {
        let statement = self.prepared(handle)?;
        let params = statement.bound_params()?;
        Ok((statement.metadata.query.clone(), params))
    }

    /// Flag the session as broken when the transport failed underneath us
    fn observe<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            if e.is_connection_error() {
                tracing::warn!(conn_id = self.id, endpoint = %self.endpoint.label, error = %e, "connection lost");
                self.broken = true;
            }
        }
        outcome
    }
}
