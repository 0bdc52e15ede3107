//! End-to-end exchanges against a scripted server.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sqlwire_core::{Connectable, Error, FromRow, Result, Row, Value};
use sqlwire_mysql::protocol::PacketHeader;
use sqlwire_mysql::scripted::split_packet;
use sqlwire_mysql::scripted::{ScriptedSocket, Session};
use sqlwire_mysql::{ConnectionState, MySqlConfig, MySqlConnection};

const SCRAMBLE: &[u8; 20] = b"01234567890123456789";
const MORE_RESULTS: u16 = 0x0008;

fn handshake() -> Session {
    Session::new()
        .greeting("5.7.44-log", 42, SCRAMBLE)
        .ok(2, 0, 0x0002)
}

fn connection(sessions: Vec<Session>) -> (MySqlConnection<ScriptedSocket>, ScriptedSocket) {
    let socket = ScriptedSocket::with_sessions(sessions);
    let handle = socket.clone();
    let config = MySqlConfig::new()
        .user("app")
        .password("hunter2")
        .database("shop");
    (MySqlConnection::with_socket(config, socket), handle)
}

fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

#[derive(Debug, PartialEq)]
struct Product {
    id: u64,
    name: String,
    price: Option<f64>,
}

impl FromRow for Product {
    fn from_row(row: Row) -> Result<Self> {
        Ok(Self {
            id: row.get_named("id")?,
            name: row.get_named("name")?,
            price: row.get_named("price")?,
        })
    }
}

#[test]
fn typed_rows_from_a_select() {
    let (rows, _) = handshake().result_set(
        1,
        &[
            ("products", "id", 0x08, 0x0023),
            ("products", "name", 0xFD, 0),
            ("products", "price", 0x05, 0),
        ],
        &[
            vec![Some("1"), Some("tea"), Some("3.5")],
            vec![Some("2"), Some("cup"), None],
        ],
        0x0002,
    );
    let (conn, socket) = connection(vec![rows]);

    let table = conn
        .query_table::<Product>("SELECT id, name, price FROM products")
        .unwrap();
    assert_eq!(
        table.columns().names().collect::<Vec<_>>(),
        ["id", "name", "price"]
    );
    assert_eq!(
        table.into_rows(),
        vec![
            Product {
                id: 1,
                name: "tea".to_string(),
                price: Some(3.5),
            },
            Product {
                id: 2,
                name: "cup".to_string(),
                price: None,
            },
        ]
    );
    assert_eq!(socket.unread(), 0);

    let handshake = conn.handshake().unwrap();
    assert_eq!(handshake.server_version, "5.7.44-log");
    assert_eq!(handshake.connection_id, 42);
}

#[test]
fn auth_response_selects_the_database() {
    let (conn, socket) = connection(vec![handshake()]);
    conn.open().unwrap();

    let written = socket.written();
    let (header, payload) = split_packet(&written[0]).unwrap();
    assert_eq!(
        header,
        PacketHeader {
            payload_length: u32::try_from(payload.len()).unwrap(),
            sequence_id: 1,
        }
    );
    let flags = u32::from_le_bytes(payload[..4].try_into().unwrap());
    assert_ne!(flags & 0x0008, 0, "CONNECT_WITH_DB must be set");
    assert!(payload.ends_with(b"shop\0mysql_native_password\0"));
}

#[test]
fn chained_results_deliver_only_the_first() {
    let (session, next) = handshake().result_set(
        1,
        &[("", "n", 0x03, 0)],
        &[vec![Some("7")]],
        MORE_RESULTS | 0x0002,
    );
    let session = session.ok(next, 0, 0x0002);
    let (session, _) = session.result_set(1, &[("", "m", 0x03, 0)], &[vec![Some("8")]], 0x0002);
    let (conn, socket) = connection(vec![session]);

    let first = conn.query_table::<Row>("CALL two_results()").unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first.rows()[0]["n"], Value::BigInt(7));

    let second = conn.query_table::<Row>("SELECT 8 AS m").unwrap();
    assert_eq!(second.rows()[0]["m"], Value::BigInt(8));
    assert_eq!(socket.unread(), 0);
    assert_eq!(socket.connect_count(), 1);
}

#[test]
fn dropped_session_mid_result_set_is_retried() {
    let (full, _) = handshake().result_set(
        1,
        &[("t", "id", 0x03, 0)],
        &[vec![Some("1")], vec![Some("2")]],
        0x0002,
    );
    let truncated = handshake()
        .packet(1, &[0x01])
        .packet(2, &sqlwire_mysql::scripted::column_definition("t", "id", 0x03, 0));
    let (conn, socket) = connection(vec![truncated, full]);

    let mut seen = Vec::new();
    conn.query_rows::<Row, _>("SELECT id FROM t", |row| seen.push(row[0].clone()))
        .unwrap();
    assert_eq!(seen, vec![Value::BigInt(1), Value::BigInt(2)]);
    assert_eq!(socket.connect_count(), 2);
    assert_eq!(conn.state(), ConnectionState::Ready);
}

#[test]
fn unreachable_server_reports_transport_error() {
    let (conn, socket) = connection(vec![
        Session::refused(),
        Session::refused(),
        Session::refused(),
    ]);
    let err = conn.query_no_result("DELETE FROM t").unwrap_err();
    assert!(err.is_transport(), "{err:?}");
    assert_eq!(socket.connect_count(), 3);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[test]
fn malformed_response_closes_the_session() {
    let broken = handshake().packet(1, &[0x00, 0xFC]);
    let (conn, socket) = connection(vec![broken, handshake().ok(1, 0, 0)]);

    let err = conn.query_no_result("UPDATE t SET a = 1").unwrap_err();
    assert!(matches!(err, Error::DataReading(_)), "{err:?}");
    assert!(!conn.is_open());

    assert_eq!(conn.query_no_result("UPDATE t SET a = 1").unwrap(), 0);
    assert_eq!(socket.connect_count(), 2);
}

static GATE: Mutex<()> = Mutex::new(());

struct Gated;

impl FromRow for Gated {
    fn from_row(_row: Row) -> Result<Self> {
        let _open = GATE.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(Self)
    }
}

#[test]
fn in_flight_counts_running_and_waiting_callers() {
    let (a, _) = handshake().result_set(1, &[("", "x", 0x03, 0)], &[vec![Some("1")]], 0);
    let (both, _) = a.result_set(1, &[("", "x", 0x03, 0)], &[vec![Some("2")]], 0);
    let (conn, _socket) = connection(vec![both]);
    let conn = Arc::new(conn);

    let gate = GATE.lock().unwrap();
    let first = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || conn.query_table::<Gated>("SELECT 1 AS x").map(|t| t.len()))
    };
    wait_for("first caller", || conn.in_flight() == 1);

    let second = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || conn.query_table::<Row>("SELECT 2 AS x").map(|t| t.len()))
    };
    wait_for("second caller", || conn.in_flight() == 2);

    drop(gate);
    assert_eq!(first.join().unwrap().unwrap(), 1);
    assert_eq!(second.join().unwrap().unwrap(), 1);
    assert_eq!(conn.in_flight(), 0);
}

#[test]
fn concurrent_queries_are_serialized() {
    let mut session = handshake();
    for _ in 0..8 {
        session = session.ok(1, 1, 0x0002);
    }
    let (conn, socket) = connection(vec![session]);
    let conn = Arc::new(conn);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || conn.query_no_result(&format!("UPDATE t SET n = {i}")))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), 1);
    }

    let queries = socket
        .written()
        .iter()
        .skip(1)
        .filter_map(|w| split_packet(w).map(|(_, payload)| payload[0]))
        .collect::<Vec<_>>();
    assert_eq!(queries, vec![0x03; 8]);
    assert_eq!(socket.unread(), 0);
}

#[test]
fn config_from_json() {
    let config: MySqlConfig = serde_json::from_str(
        r#"{
            "host": "10.0.0.5",
            "port": 3307,
            "user": "reporting",
            "password": "pw",
            "max_attempts": 5,
            "connect_timeout": 250
        }"#,
    )
    .unwrap();
    assert_eq!(config.socket_addr(), "10.0.0.5:3307");
    assert_eq!(config.max_attempts, 5);
    assert_eq!(config.connect_timeout, Duration::from_millis(250));
    assert_eq!(config.read_timeout, Duration::from_secs(5));
    assert!(config.database.is_none());
    config.validate().unwrap();
}
