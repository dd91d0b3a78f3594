//! Tests for the health module

use super::*;
use std::time::Duration;

mod status_tests {
    use super::*;

    #[test]
    fn test_health_status_at_threshold_boundary() {
        assert_eq!(HealthStatus::from_latency(Duration::from_millis(100)), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_latency(Duration::from_millis(101)), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_latency(Duration::from_millis(500)), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_latency(Duration::from_millis(501)), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_health_status_custom_thresholds() {
        let thresholds = HealthThresholds::new(50, 200);
        let classify =
            |ms| HealthStatus::from_latency_with_thresholds(Duration::from_millis(ms), &thresholds);

        assert_eq!(classify(30), HealthStatus::Healthy);
        assert_eq!(classify(100), HealthStatus::Degraded);
        assert_eq!(classify(300), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_worst_status_wins() {
        assert_eq!(HealthStatus::Healthy.worst(HealthStatus::Degraded), HealthStatus::Degraded);
        assert_eq!(HealthStatus::Unhealthy.worst(HealthStatus::Healthy), HealthStatus::Unhealthy);
        assert!(!HealthStatus::Unhealthy.is_usable());
        assert!(HealthStatus::Degraded.is_usable());
    }

    #[test]
    fn test_health_status_serialization() {
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
        let status: HealthStatus = serde_json::from_str("\"unhealthy\"").unwrap();
        assert_eq!(status, HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::Healthy.to_string(), "healthy");
    }
}

mod probe_tests {
    use super::*;
    use async_trait::async_trait;
    use deskline_core::{
        ColumnMeta, Connection, DesklineError, QueryResult, Result, Row, StatementResult, Value,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Connection answering every query with a fixed result
    struct ScriptedConnection {
        result: QueryResult,
        ping_delay: Duration,
        fail: bool,
        closed: AtomicBool,
    }

    impl ScriptedConnection {
        fn new(columns: &[&str], values: Vec<Value>) -> Self {
            let names: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
            let result = QueryResult {
                columns: names
                    .iter()
                    .enumerate()
                    .map(|(ordinal, name)| ColumnMeta {
                        name: name.clone(),
                        data_type: "TEXT".into(),
                        nullable: true,
                        ordinal,
                    })
                    .collect(),
                rows: vec![Row::new(names, values)],
                execution_time_ms: 0,
            };
            Self {
                result,
                ping_delay: Duration::ZERO,
                fail: false,
                closed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        fn driver_name(&self) -> &str {
            "scripted"
        }

        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
            Ok(StatementResult::default())
        }

        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            if self.fail {
                return Err(DesklineError::Query("replication not configured".into()));
            }
            Ok(self.result.clone())
        }

        async fn ping(&self) -> Result<()> {
            tokio::time::sleep(self.ping_delay).await;
            if self.fail {
                return Err(DesklineError::Connection("server has gone away".into()));
            }
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_ping_reports_latency() {
        let conn = ScriptedConnection::new(&["1"], vec![Value::Int64(1)]);
        let latency = ping_database(&conn, Duration::from_secs(1)).await.unwrap();
        assert!(latency < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_ping_closed_connection() {
        let conn = ScriptedConnection::new(&["1"], vec![Value::Int64(1)]);
        conn.close().await.unwrap();
        let err = ping_database(&conn, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, PingError::ConnectionClosed));
        assert!(DesklineError::from(err).is_connection_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_times_out() {
        let mut conn = ScriptedConnection::new(&["1"], vec![Value::Int64(1)]);
        conn.ping_delay = Duration::from_secs(30);
        let err = ping_database(&conn, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, PingError::Timeout(_)));
        assert!(matches!(DesklineError::from(err), DesklineError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_ping_failure_keeps_driver_error() {
        let mut conn = ScriptedConnection::new(&["1"], vec![Value::Int64(1)]);
        conn.fail = true;
        let err = ping_database(&conn, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(DesklineError::from(err), DesklineError::Connection(_)));
    }

    #[tokio::test]
    async fn test_lag_from_replica_status_columns() {
        let conn = ScriptedConnection::new(
            &["Replica_IO_State", "Seconds_Behind_Source"],
            vec![Value::String("Waiting for source".into()), Value::UInt64(42)],
        );
        let lag = measure_replication_lag(&conn, "SHOW REPLICA STATUS").await.unwrap();
        assert_eq!(lag, ReplicaLag::Seconds(42));
        assert!(lag.exceeds(30));
        assert!(!lag.exceeds(42));
    }

    #[tokio::test]
    async fn test_lag_from_legacy_column_name() {
        let conn = ScriptedConnection::new(
            &["Slave_IO_State", "Seconds_Behind_Master"],
            vec![Value::String("".into()), Value::Int64(3)],
        );
        let lag = measure_replication_lag(&conn, "SHOW SLAVE STATUS").await.unwrap();
        assert_eq!(lag, ReplicaLag::Seconds(3));
    }

    #[tokio::test]
    async fn test_lag_null_is_unknown() {
        let conn = ScriptedConnection::new(&["Seconds_Behind_Source"], vec![Value::Null]);
        let lag = measure_replication_lag(&conn, "SHOW REPLICA STATUS").await.unwrap();
        assert_eq!(lag, ReplicaLag::Unknown);
        assert!(!lag.exceeds(0));
    }

    #[tokio::test]
    async fn test_lag_from_custom_query_first_column() {
        let conn = ScriptedConnection::new(&["delay"], vec![Value::String("7".into())]);
        let lag = measure_replication_lag(&conn, "SELECT delay FROM lag_view").await.unwrap();
        assert_eq!(lag, ReplicaLag::Seconds(7));
    }

    #[tokio::test]
    async fn test_lag_query_error_propagates() {
        let mut conn = ScriptedConnection::new(&["x"], vec![]);
        conn.fail = true;
        assert!(measure_replication_lag(&conn, "SHOW REPLICA STATUS").await.is_err());
    }
}
