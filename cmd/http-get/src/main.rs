//! Minimal HTTP/1.0 GET over the coroutine client
//!
//! Usage: `http-get <ip:port> [path]`
//!
//! The request runs inside one coroutine; every read and write suspends it
//! until the loop reports progress.
//!
//! # Environment Variables
//!
//! - `CST_LOG_LEVEL=debug` - Show connection events
//! - `CST_OP_TIMEOUT_MS` - Timeout for each read/write (default: none)

use costack::{kerror, kinfo, run_client, AsyncConnection, AsyncConnectionError};
use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;

fn fetch(conn: &AsyncConnection, host: &SocketAddr, path: &str) -> Result<Vec<u8>, AsyncConnectionError> {
    let request = format!(
        "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: costack-http-get\r\nConnection: close\r\n\r\n",
        path, host
    );
    conn.write(request.as_bytes())?;
    conn.wait_write_done()?;

    let mut response = Vec::new();
    loop {
        match conn.read(0) {
            Ok(chunk) => response.extend_from_slice(&chunk),
            Err(AsyncConnectionError::ConnectionClosed(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(response)
}

fn main() {
    let mut args = std::env::args().skip(1);
    let addr: SocketAddr = match args.next().map(|a| a.parse()) {
        Some(Ok(addr)) => addr,
        _ => {
            eprintln!("usage: http-get <ip:port> [path]");
            std::process::exit(2);
        }
    };
    let path = args.next().unwrap_or_else(|| "/".to_string());

    let ok = Rc::new(Cell::new(false));
    let result = ok.clone();
    let run = run_client(move |client, co| {
        let Some(conn) = client.connect_to(addr, co) else {
            kerror!("connect to {} failed", addr);
            return;
        };
        kinfo!("connected to {}", addr);

        match fetch(&conn, &addr, &path) {
            Ok(body) => {
                print!("{}", String::from_utf8_lossy(&body));
                result.set(true);
            }
            Err(e) => kerror!("GET {} failed: {}", path, e),
        }
        if let Err(e) = conn.close() {
            kerror!("close failed: {}", e);
        }
    });

    if let Err(e) = run {
        kerror!("{}", e);
        std::process::exit(1);
    }
    if !ok.get() {
        std::process::exit(1);
    }
}
