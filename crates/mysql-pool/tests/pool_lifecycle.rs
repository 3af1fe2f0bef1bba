//! End-to-end pool lifecycle tests against an in-memory MySQL stand-in.
//!
//! `FakeMysqlLink` completes its handshake and each statement on a later
//! tick of the `LocalSet`, reporting through its hooks the way a real
//! socket-driven connection would. All links share one statement log so
//! tests can check the order work reached the backend.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::Once;

use tokio::task::LocalSet;

use mysql_pool::{
    ConnId, ConnectFuture, Connection, ConnectionConfig, ConnectionFactory, ConnectionHooks,
    ConnectionPool, PoolConfig, PoolError, PooledConnection,
};

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── FakeMysqlLink ───────────────────────────────────────────────────

type StatementLog = Rc<RefCell<Vec<(ConnId, String)>>>;

struct FakeMysqlLink {
    hooks: ConnectionHooks<FakeMysqlLink>,
    log: StatementLog,
    refuse: bool,
    open: Cell<bool>,
    idle: Cell<bool>,
}

impl FakeMysqlLink {
    /// Send a statement. The link is busy until the reply arrives.
    fn execute(self: &Rc<Self>, sql: &str) {
        self.idle.set(false);
        self.hooks.busy();
        self.log.borrow_mut().push((self.hooks.id(), sql.to_string()));

        let link = Rc::clone(self);
        tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            if link.open.get() {
                link.idle.set(true);
                link.hooks.ready();
            }
        });
    }
}

impl Connection for FakeMysqlLink {
    fn connect(&self) -> ConnectFuture<'_> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            if self.refuse {
                return Err("Can't connect to MySQL server".to_string());
            }
            self.open.set(true);
            self.idle.set(true);
            self.hooks.ready();
            Ok(())
        })
    }

    fn is_ready(&self) -> bool {
        self.open.get() && self.idle.get()
    }

    fn alive(&self) -> bool {
        self.open.get()
    }

    fn set_charset(&self, charset: &str, collation: &str) {
        let sql = if collation.is_empty() {
            format!("SET NAMES {charset}")
        } else {
            format!("SET NAMES {charset} COLLATE {collation}")
        };
        self.log.borrow_mut().push((self.hooks.id(), sql));
    }

    fn use_exceptions(&self, _enabled: bool) {}

    fn force_close(&self) -> Result<(), String> {
        self.open.set(false);
        self.idle.set(false);
        Ok(())
    }
}

#[derive(Default)]
struct FakeMysqlFactory {
    log: StatementLog,
    refuse: Cell<bool>,
    spawned: RefCell<Vec<ConnectionConfig>>,
}

impl FakeMysqlFactory {
    fn statements(&self) -> Vec<String> {
        self.log.borrow().iter().map(|(_, sql)| sql.clone()).collect()
    }
}

impl ConnectionFactory<FakeMysqlLink> for FakeMysqlFactory {
    fn create(
        &self,
        config: &ConnectionConfig,
        hooks: ConnectionHooks<FakeMysqlLink>,
    ) -> FakeMysqlLink {
        self.spawned.borrow_mut().push(config.clone());
        FakeMysqlLink {
            hooks,
            log: Rc::clone(&self.log),
            refuse: self.refuse.get(),
            open: Cell::new(false),
            idle: Cell::new(false),
        }
    }
}

fn start_pool(config: PoolConfig) -> (ConnectionPool<FakeMysqlLink>, Rc<FakeMysqlFactory>) {
    let factory = Rc::new(FakeMysqlFactory::default());
    let pool = ConnectionPool::new(config, factory.clone()).expect("valid config");
    (pool, factory)
}

async fn run_local<F: Future>(f: F) -> F::Output {
    init_tracing();
    LocalSet::new().run_until(f).await
}

/// Let pending handshakes and statements finish.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

fn run_statement(conn: PooledConnection<FakeMysqlLink>, sql: &str) -> ConnId {
    conn.shared().execute(sql);
    conn.id()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn startup_promise_then_immediate_query() {
    run_local(async {
        let (pool, factory) = start_pool(PoolConfig::default().with_max_connections(4));

        let first = pool.connection_promise().wait().await.unwrap();
        let conn = pool
            .get_ready_connection()
            .try_into_ready()
            .expect("connection idle after startup");
        assert_eq!(conn.id(), first);

        run_statement(conn, "SELECT 1");
        assert_eq!(factory.statements(), vec!["SELECT 1".to_string()]);
    })
    .await;
}

#[tokio::test]
async fn statements_beyond_capacity_run_in_request_order() {
    run_local(async {
        let (pool, factory) = start_pool(PoolConfig::default().with_max_connections(2));
        pool.connection_promise().wait().await.unwrap();

        let results: Vec<_> = (0..6)
            .map(|n| {
                let sql = format!("INSERT INTO jobs VALUES ({n})");
                pool.get_ready_connection()
                    .call(move |conn| run_statement(conn, &sql))
            })
            .collect();
        assert!(pool.stats().pending > 0);

        let mut used = Vec::new();
        for result in results {
            used.push(result.await.unwrap());
            assert!(pool.stats().live <= 2);
        }
        used.sort();
        used.dedup();
        assert!(used.len() <= 2);

        let expected: Vec<_> = (0..6).map(|n| format!("INSERT INTO jobs VALUES ({n})")).collect();
        assert_eq!(factory.statements(), expected);
        assert_eq!(pool.stats().pending, 0);
    })
    .await;
}

#[tokio::test]
async fn extracted_connection_outlives_pool_close() {
    run_local(async {
        let (pool, factory) = start_pool(PoolConfig::default().with_max_connections(3));
        pool.connection_promise().wait().await.unwrap();

        let dedicated = pool.extract_connection().await.unwrap();
        pool.close();
        assert!(pool.is_closed());
        assert!(dedicated.alive());

        dedicated.shared().execute("LOCK TABLES jobs WRITE");
        assert_eq!(factory.statements(), vec!["LOCK TABLES jobs WRITE".to_string()]);
    })
    .await;
}

#[tokio::test]
async fn connection_string_charset_reaches_every_connection() {
    run_local(async {
        let config = PoolConfig::from_connection_string(
            "host=db.internal:3307;user=app;pass=secret;db=shop;collate=latin1_swedish_ci",
        )
        .unwrap()
        .with_max_connections(2);
        let (pool, factory) = start_pool(config);
        pool.connection_promise().wait().await.unwrap();

        // Take the idle link so a second one is needed.
        let first = pool.get_ready_connection().try_into_ready().unwrap();
        run_statement(first, "SELECT 1");
        pool.get_ready_connection();
        settle().await;

        let spawned = factory.spawned.borrow();
        assert_eq!(spawned.len(), 2);
        for config in spawned.iter() {
            assert_eq!(config.host, "db.internal");
            assert_eq!(config.port, 3307);
            assert_eq!(config.database.as_deref(), Some("shop"));
        }
        let set_names = factory
            .statements()
            .into_iter()
            .filter(|sql| sql == "SET NAMES latin1 COLLATE latin1_swedish_ci")
            .count();
        assert_eq!(set_names, 2);
    })
    .await;
}

#[tokio::test]
async fn charset_change_reaches_live_connections() {
    run_local(async {
        let (pool, factory) = start_pool(PoolConfig::default());
        pool.connection_promise().wait().await.unwrap();

        pool.set_charset("utf8_general_ci", "");
        assert_eq!(
            factory.statements(),
            vec!["SET NAMES utf8 COLLATE utf8_general_ci".to_string()]
        );
        assert_eq!(pool.config().connection.charset, "utf8");
        pool.log_stats();
    })
    .await;
}

#[tokio::test]
async fn unreachable_backend_fails_waiting_callers() {
    run_local(async {
        let factory = Rc::new(FakeMysqlFactory::default());
        factory.refuse.set(true);
        let pool = ConnectionPool::new(PoolConfig::default(), factory.clone()).unwrap();

        let result = pool.get_ready_connection().call(|conn| conn.id());
        assert!(matches!(result.await, Err(PoolError::PoolExhausted(_))));
        assert!(matches!(
            pool.connection_promise().wait().await,
            Err(PoolError::ConnectFailure(_))
        ));
        assert_eq!(pool.stats().live, 0);
        assert!(factory.statements().is_empty());
    })
    .await;
}

#[tokio::test]
async fn pool_from_toml_file_stays_closed_without_reopen() {
    run_local(async {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.toml");
        std::fs::write(
            &path,
            r#"
max_connections = 1
reopen_on_request = false

[connection]
host = "10.0.0.5"
user = "reporting"
"#,
        )
        .unwrap();

        let config = PoolConfig::from_file(&path).unwrap();
        assert_eq!(config.connection.host, "10.0.0.5");
        let (pool, factory) = start_pool(config);
        pool.connection_promise().wait().await.unwrap();

        pool.close();
        let rejected = pool.get_ready_connection().call(|conn| conn.id());
        assert_eq!(rejected.await, Err(PoolError::Closed));
        assert!(pool.is_closed());

        pool.reopen();
        let id = pool
            .get_ready_connection()
            .call(|conn| run_statement(conn, "SELECT 2"))
            .await
            .unwrap();
        assert_eq!(factory.spawned.borrow().len(), 2);
        assert_eq!(factory.log.borrow().last(), Some(&(id, "SELECT 2".to_string())));
    })
    .await;
}
