//! One-shot reset command sent to a freshly started server.
//!
//! Only the request side of the Redis protocol is implemented: a multi-bulk
//! array of bulk strings. No reply is read.

use crate::error::{HarnessError, Result};
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Command that clears every database on the server.
pub const FLUSHALL: &str = "FLUSHALL";

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Encode a command as a RESP multi-bulk request.
///
/// `["FLUSHALL"]` encodes to `*1\r\n$8\r\nFLUSHALL\r\n`.
pub fn encode_command(args: &[&str]) -> Vec<u8> {
    let mut buf = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        buf.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        buf.extend_from_slice(arg.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

/// Connect to `host:port`, send `FLUSHALL` and hang up.
///
/// Refused connections are retried until `timeout` elapses, since the server
/// may still be binding its socket when this is called.
pub fn send_reset(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let mut stream = connect_with_retry(host, port, timeout)?;
    let command = encode_command(&[FLUSHALL]);

    stream
        .write_all(&command)
        .and_then(|()| stream.flush())
        .map_err(|e| connection_failed(host, port, e))?;
    // Let the server see EOF after the command; errors here are irrelevant.
    let _ = stream.shutdown(Shutdown::Write);

    info!("Sent {} to {}:{}", FLUSHALL, host, port);
    Ok(())
}

fn connect_with_retry(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| connection_failed(host, port, e))?
        .collect();
    if addrs.is_empty() {
        return Err(connection_failed(
            host,
            port,
            std::io::Error::new(std::io::ErrorKind::NotFound, "host resolved to no addresses"),
        ));
    }

    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let mut last_error = None;
        for addr in &addrs {
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .max(Duration::from_millis(10));
            match TcpStream::connect_timeout(addr, remaining) {
                Ok(stream) => {
                    debug!("Connected to {} on attempt {}", addr, attempt);
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        let err = last_error.unwrap_or_else(|| std::io::ErrorKind::TimedOut.into());
        if Instant::now() + RETRY_INTERVAL >= deadline {
            return Err(connection_failed(host, port, err));
        }
        debug!("Connect to {}:{} failed ({}), retrying", host, port, err);
        std::thread::sleep(RETRY_INTERVAL);
    }
}

fn connection_failed(host: &str, port: u16, source: std::io::Error) -> HarnessError {
    HarnessError::ConnectionFailed {
        host: host.to_string(),
        port,
        source,
    }
}
