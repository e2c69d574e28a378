#![allow(dead_code)]

use std::{thread, time::Duration};
use wiretap::{Direction, SocketEndpoint, Wiretap};

pub fn execute(tap: &Wiretap, sql: &str) {
    execute_rows(tap, sql, 0);
}

pub fn execute_rows(tap: &Wiretap, sql: &str, rows: u64) {
    tap.on_statement_executed(sql, &tap.context(), Duration::from_millis(1), rows);
}

/// Runs `count` statements on a fresh thread and waits for it.
pub fn execute_elsewhere(tap: &Wiretap, sql: &str, count: usize) {
    let tap = tap.clone();
    let sql = sql.to_owned();

    thread::spawn(move || {
        for _ in 0..count {
            execute(&tap, &sql);
        }
    })
    .join()
    .unwrap();
}

pub fn transfer(
    tap: &Wiretap,
    endpoint: &SocketEndpoint,
    direction: Direction,
    timestamp: i64,
    bytes: &[u8],
) {
    tap.on_socket_bytes(endpoint, &tap.context(), direction, timestamp, bytes);
}
