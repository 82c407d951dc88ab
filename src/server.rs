use anyhow::{Context, Result, anyhow};
use chrono::{Local, NaiveDate};
use serde_json::{Value, json};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;
use tracing::{info, warn};

use crate::db::Db;
use crate::error::LedgerError;
use crate::sweep::{authorize_sweep, process_installments};

pub const SWEEP_PATH: &str = "/api/cron/installments";

const MAX_HEADER_LINES: usize = 100;
const MAX_BODY_BYTES: usize = 64 * 1024;
/// Per-read and per-write deadline on an accepted connection.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub bind: String,
    /// Handle a single connection, then return.
    pub once: bool,
    /// Fixed sweep date instead of the local calendar day.
    pub today: Option<NaiveDate>,
}

/// Serves the sweep trigger until the listener fails (or after one request
/// with `once`). Requests are handled one at a time.
pub fn serve(db: &Db, secret: &str, opts: &ServeOptions) -> Result<()> {
    let listener = TcpListener::bind(&opts.bind)
        .with_context(|| format!("Failed to bind HTTP address {}", opts.bind))?;
    let local = listener
        .local_addr()
        .context("Failed to read HTTP local addr")?;

    println!("Listening on http://{local}{SWEEP_PATH}");
    info!(%local, "sweep trigger listening");

    for stream in listener.incoming() {
        let Ok(stream) = stream else {
            continue;
        };
        let peer = stream.peer_addr().ok();
        if let Err(err) = handle_connection(db, secret, opts.today, stream, IO_TIMEOUT) {
            warn!(?peer, error = %format!("{err:#}"), "sweep trigger connection failed");
        }
        if opts.once {
            break;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Request {
    method: String,
    path: String,
    authorization: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct Response {
    status: u16,
    body: Value,
}

impl Response {
    fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::new(status, json!({ "error": message }))
    }
}

fn handle_connection(
    db: &Db,
    secret: &str,
    today: Option<NaiveDate>,
    mut stream: TcpStream,
    timeout: Duration,
) -> Result<()> {
    stream.set_read_timeout(Some(timeout)).ok();
    stream.set_write_timeout(Some(timeout)).ok();

    let mut reader = BufReader::new(stream.try_clone()?);
    let response = match read_request(&mut reader) {
        Ok(request) => {
            let today = today.unwrap_or_else(|| Local::now().date_naive());
            route(db, Some(secret), today, &request)
        }
        Err(err) => Response::error(400, &format!("{err:#}")),
    };
    write_response(&mut stream, &response)
}

fn read_request(reader: &mut impl BufRead) -> Result<Request> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(anyhow!("Malformed request line"));
    };
    let method = method.to_ascii_uppercase();
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut authorization = None;
    let mut content_length = 0usize;
    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        let Some((name, value)) = header.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("authorization") {
            authorization = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .parse()
                .with_context(|| format!("Invalid Content-Length: {value}"))?;
        }
    }

    // The trigger takes no payload; drain it so the client sees a clean close.
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("Request body too large: {content_length} bytes"));
    }
    if content_length > 0 {
        let mut body = reader.by_ref().take(content_length as u64);
        let drained = io::copy(&mut body, &mut io::sink())?;
        if drained < content_length as u64 {
            return Err(anyhow!("Request body ended early"));
        }
    }

    Ok(Request {
        method,
        path,
        authorization,
    })
}

fn route(db: &Db, secret: Option<&str>, today: NaiveDate, request: &Request) -> Response {
    if request.path != SWEEP_PATH {
        return Response::error(404, "not found");
    }
    if request.method != "GET" && request.method != "POST" {
        return Response::error(405, "method not allowed");
    }
    if let Err(err) = authorize_sweep(request.authorization.as_deref(), secret) {
        warn!(path = %request.path, "rejected sweep trigger");
        return Response::error(status_for(&err), "unauthorized");
    }

    match process_installments(db, today) {
        Ok(report) => {
            let mut body = serde_json::to_value(&report).unwrap_or_else(|_| json!({}));
            body["success"] = Value::Bool(true);
            Response::new(200, body)
        }
        Err(err) => Response::error(status_for(&err), &err.to_string()),
    }
}

fn status_for(err: &LedgerError) -> u16 {
    match err {
        LedgerError::Validation(_) => 400,
        LedgerError::NotFound(_) => 404,
        LedgerError::Unauthorized => 401,
        LedgerError::Internal(_) => 500,
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Internal Server Error",
    }
}

fn write_response(w: &mut impl Write, response: &Response) -> Result<()> {
    let body = serde_json::to_string(&response.body)?;
    write!(
        w,
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        reason(response.status),
        body.len(),
        body
    )?;
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::test_support::*;
    use std::io::Cursor;

    fn request(method: &str, path: &str, auth: Option<&str>) -> Request {
        Request {
            method: method.to_string(),
            path: path.to_string(),
            authorization: auth.map(str::to_string),
        }
    }

    #[test]
    fn parses_request_line_and_authorization() {
        let raw = "POST /api/cron/installments?source=timer HTTP/1.1\r\nHost: x\r\nauthorization: Bearer abc\r\nContent-Length: 2\r\n\r\n{}";
        let mut reader = Cursor::new(raw.as_bytes());
        let req = read_request(&mut reader).unwrap();
        assert_eq!(req, request("POST", SWEEP_PATH, Some("Bearer abc")));
    }

    #[test]
    fn malformed_request_line_is_rejected() {
        let mut reader = Cursor::new(&b"\r\n"[..]);
        assert!(read_request(&mut reader).is_err());
    }

    #[test]
    fn body_larger_than_one_buffer_is_fully_drained() {
        let body = "x".repeat(20_000);
        let raw = format!(
            "POST /api/cron/installments HTTP/1.1\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let mut reader = Cursor::new(raw.as_bytes());
        read_request(&mut reader).unwrap();
        assert_eq!(reader.position() as usize, raw.len());
    }

    #[test]
    fn oversized_body_is_rejected() {
        let raw = "POST /api/cron/installments HTTP/1.1\r\nContent-Length: 70000\r\n\r\n";
        let mut reader = Cursor::new(raw.as_bytes());
        let err = read_request(&mut reader).unwrap_err();
        assert!(format!("{err:#}").contains("too large"));
    }

    #[test]
    fn idle_client_gets_a_bad_request_after_the_timeout() {
        let fx = fixture();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();

        // The client never sends a request line.
        handle_connection(&fx.db, "s", None, stream, Duration::from_millis(200)).unwrap();

        let mut out = String::new();
        client.read_to_string(&mut out).unwrap();
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"), "unexpected: {out}");
        assert_eq!(fx.balance(fx.account), dec("5000"));
    }

    #[test]
    fn rejects_before_running_the_sweep() {
        let fx = fixture();
        fx.ledger()
            .create_expense(fx.installment("Laptop", "1200", 12, "2026-01-01"), day("2026-01-01"))
            .unwrap();

        let resp = route(
            &fx.db,
            Some("s3cret"),
            day("2026-02-15"),
            &request("GET", SWEEP_PATH, Some("Bearer wrong")),
        );
        assert_eq!(resp.status, 401);
        assert_eq!(fx.balance(fx.account), dec("4900"));

        let resp = route(&fx.db, None, day("2026-02-15"), &request("GET", SWEEP_PATH, None));
        assert_eq!(resp.status, 401);
    }

    #[test]
    fn authorized_trigger_returns_report() {
        let fx = fixture();
        fx.ledger()
            .create_expense(fx.installment("Laptop", "1200", 12, "2026-01-01"), day("2026-01-01"))
            .unwrap();

        let resp = route(
            &fx.db,
            Some("s3cret"),
            day("2026-02-15"),
            &request("POST", SWEEP_PATH, Some("Bearer s3cret")),
        );
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["success"], true);
        assert_eq!(resp.body["processed_count"], 1);
        assert_eq!(resp.body["results"][0]["status"], "charged");
        assert_eq!(fx.balance(fx.account), dec("4800"));
    }

    #[test]
    fn unknown_paths_and_methods() {
        let fx = fixture();
        let today = day("2026-02-15");
        assert_eq!(
            route(&fx.db, Some("s"), today, &request("GET", "/", Some("Bearer s"))).status,
            404
        );
        assert_eq!(
            route(&fx.db, Some("s"), today, &request("DELETE", SWEEP_PATH, Some("Bearer s"))).status,
            405
        );
    }

    #[test]
    fn selection_failure_is_a_server_error() {
        let fx = fixture();
        fx.db.conn().execute_batch("DROP TABLE expenses;").unwrap();
        let resp = route(
            &fx.db,
            Some("s"),
            day("2026-02-15"),
            &request("GET", SWEEP_PATH, Some("Bearer s")),
        );
        assert_eq!(resp.status, 500);
    }

    #[test]
    fn response_has_length_and_status_line() {
        let mut out = Vec::new();
        write_response(&mut out, &Response::error(401, "unauthorized")).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(text.contains("Content-Length: 24\r\n"));
        assert!(text.ends_with(r#"{"error":"unauthorized"}"#));
    }
}
