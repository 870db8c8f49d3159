//! HTTP echo server plus the client that exercises it.
//!
//! `serve` answers any method on any path with an HTML page reflecting the
//! request back: method, path, query, headers, body. Handy when a device
//! program needs a server that never 404s. `?plain=1` (or `Accept:
//! text/plain`) switches to a raw echo of the body alone, which is what the
//! scripted tests want. Everything user-controlled is escaped before it is
//! put into HTML.
//!
//! `send` is the other half: POST a message at a URL, optionally many times
//! concurrently, and print what came back.
//!
//! Run with: cargo run --bin http_echo -- serve 3000
//!       or: cargo run --bin http_echo -- send http://localhost:3000/test "hello" 3

use std::io;

use bytes::Bytes;
use colored::Colorize;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpListener;
use tracing::{error, info};
use url::Url;

const BODY_PREVIEW_LIMIT: usize = 2048;
const HEX_PREVIEW_LIMIT: usize = 64;

// ============================================================================
// Reflection page
// ============================================================================

/// True when the client asked for the raw-body echo instead of the page.
fn wants_plain(query: Option<&str>, accept: Option<&str>) -> bool {
    if let Some(query) = query {
        if query.split('&').any(|pair| pair == "plain=1") {
            return true;
        }
    }
    matches!(accept, Some(a) if a.trim_start().starts_with("text/plain"))
}

fn body_preview(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => {
            let shown: String = text.chars().take(BODY_PREVIEW_LIMIT).collect();
            let mut preview = html_escape::encode_text(&shown).into_owned();
            if text.chars().count() > BODY_PREVIEW_LIMIT {
                preview.push_str(" …");
            }
            preview
        }
        Err(_) => {
            let head: String = body
                .iter()
                .take(HEX_PREVIEW_LIMIT)
                .map(|b| format!("{:02x} ", b))
                .collect();
            format!("{} bytes of binary data: {}", body.len(), head.trim_end())
        }
    }
}

fn build_html_page(
    method: &str,
    path: &str,
    query: Option<&str>,
    version: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> String {
    let mut page = String::with_capacity(1024);
    page.push_str("<!DOCTYPE html>\n<html>\n<head><title>echo</title></head>\n<body>\n");
    page.push_str(&format!(
        "<h1>{} {}</h1>\n",
        html_escape::encode_text(method),
        html_escape::encode_text(path)
    ));
    page.push_str(&format!("<p>{}</p>\n", html_escape::encode_text(version)));
    if let Some(query) = query {
        page.push_str(&format!(
            "<p>query: <code>{}</code></p>\n",
            html_escape::encode_text(query)
        ));
    }
    page.push_str("<h2>headers</h2>\n<ul>\n");
    for (name, value) in headers {
        page.push_str(&format!(
            "<li><b>{}</b>: {}</li>\n",
            html_escape::encode_text(name),
            html_escape::encode_text(value)
        ));
    }
    page.push_str("</ul>\n<h2>body</h2>\n<pre>");
    page.push_str(&body_preview(body));
    page.push_str("</pre>\n</body>\n</html>\n");
    page
}

// ============================================================================
// Server
// ============================================================================

async fn echo(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let version = format!("{:?}", req.version());
    let accept = req
        .headers()
        .get(hyper::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let body = req.collect().await?.to_bytes();
    info!(%method, %path, body_bytes = body.len(), "request");

    let response = if wants_plain(query.as_deref(), accept.as_deref()) {
        Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(Full::new(body))
            .unwrap()
    } else {
        let page = build_html_page(
            &method,
            &path,
            query.as_deref(),
            &version,
            &headers,
            &body,
        );
        Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(Full::new(Bytes::from(page)))
            .unwrap()
    };
    Ok(response)
}

async fn serve_loop(listener: TcpListener) -> io::Result<()> {
    loop {
        let (tcp, _) = listener.accept().await?;
        let io = TokioIo::new(tcp);
        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(io, service_fn(echo))
                .await
            {
                error!(error = %err, "connection failed");
            }
        });
    }
}

// ============================================================================
// Client
// ============================================================================

async fn send_messages(
    url: &str,
    message: &str,
    count: usize,
) -> Vec<Result<(usize, u16, String), reqwest::Error>> {
    let client = reqwest::Client::new();
    let requests = (0..count).map(|i| {
        let client = client.clone();
        let url = url.to_string();
        let message = message.to_string();
        async move {
            let response = client
                .post(&url)
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(message)
                .send()
                .await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok((i, status, body))
        }
    });
    futures::future::join_all(requests).await
}

async fn run_send(url: &str, message: &str, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = Url::parse(url)?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(format!("unsupported scheme {:?}", parsed.scheme()).into());
    }

    println!(
        "sending {:?} to {} ({} time{})",
        message,
        url,
        count,
        if count == 1 { "" } else { "s" }
    );
    for result in send_messages(url, message, count).await {
        match result {
            Ok((i, status, body)) => {
                let mark = if (200..300).contains(&status) {
                    "✓".green()
                } else {
                    "✗".red()
                };
                let head: String = body.chars().take(120).collect();
                println!("{} [{}] {} -> {}", mark, i, status, head.trim_end());
            }
            Err(e) => println!("{} {}", "✗".red(), e),
        }
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn usage() -> ! {
    eprintln!("usage: http_echo serve [port]");
    eprintln!("       http_echo send <url> [message] [count]");
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("serve") => {
            let port: u16 = args
                .get(1)
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000);
            let listener = match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => listener,
                Err(e) => {
                    eprintln!("cannot bind port {}: {}", port, e);
                    std::process::exit(1);
                }
            };
            info!(port, "http echo server listening");
            println!("http echo server on http://localhost:{}", port);
            println!("try: curl -d 'hello' http://localhost:{}/any/path", port);
            if let Err(e) = serve_loop(listener).await {
                eprintln!("server error: {}", e);
                std::process::exit(1);
            }
        }
        Some("send") => {
            let url = match args.get(1) {
                Some(url) => url.clone(),
                None => usage(),
            };
            let message = args.get(2).cloned().unwrap_or_else(|| "hello".to_string());
            let count: usize = args.get(3).and_then(|c| c.parse().ok()).unwrap_or(1);
            if let Err(e) = run_send(&url, &message, count).await {
                eprintln!("send error: {}", e);
                std::process::exit(1);
            }
        }
        _ => usage(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn page_escapes_user_controlled_text() {
        let page = build_html_page(
            "POST",
            "/x",
            Some("q=<img onerror=1>"),
            "HTTP/1.1",
            &[("x-evil".to_string(), "<script>".to_string())],
            b"<script>alert(1)</script>",
        );
        assert!(!page.contains("<script>alert"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("&lt;img"));
    }

    #[test]
    fn plain_mode_is_opt_in() {
        assert!(wants_plain(Some("plain=1"), None));
        assert!(wants_plain(Some("a=b&plain=1"), None));
        assert!(wants_plain(None, Some("text/plain")));
        assert!(wants_plain(None, Some("text/plain; charset=utf-8")));
        assert!(!wants_plain(Some("plain=0"), Some("text/html")));
        assert!(!wants_plain(Some("explain=1"), None));
        assert!(!wants_plain(None, None));
    }

    #[test]
    fn binary_body_is_summarized_not_inlined() {
        let preview = body_preview(&[0x00, 0x9f, 0xff, 0x42]);
        assert!(preview.contains("4 bytes of binary data"));
        assert!(preview.contains("00 9f ff 42"));
    }

    #[test]
    fn long_text_body_is_truncated() {
        let body = "a".repeat(BODY_PREVIEW_LIMIT + 10);
        let preview = body_preview(body.as_bytes());
        assert!(preview.ends_with('…'));
        assert!(preview.chars().count() < body.chars().count());
    }

    async fn spawn_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_loop(listener));
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn server_reflects_method_path_and_body() {
        let base = spawn_server().await;
        let response = reqwest::Client::new()
            .post(format!("{}/widgets?lang=fr", base))
            .body("payload text")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let page = response.text().await.unwrap();
        assert!(page.contains("POST"));
        assert!(page.contains("/widgets"));
        assert!(page.contains("lang=fr"));
        assert!(page.contains("payload text"));
    }

    #[tokio::test]
    async fn plain_query_echoes_the_raw_body() {
        let base = spawn_server().await;
        let response = reqwest::Client::new()
            .post(format!("{}/anything?plain=1", base))
            .body("just the body")
            .send()
            .await
            .unwrap();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        assert!(content_type.starts_with("text/plain"));
        assert_eq!(response.text().await.unwrap(), "just the body");
    }

    #[tokio::test]
    async fn send_fires_count_concurrent_posts() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/inbox"))
            .and(body_string("hi"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&mock)
            .await;

        let results = send_messages(&format!("{}/inbox", mock.uri()), "hi", 3).await;
        assert_eq!(results.len(), 3);
        for result in results {
            let (_, status, body) = result.unwrap();
            assert_eq!(status, 200);
            assert_eq!(body, "ok");
        }
        assert_eq!(mock.received_requests().await.unwrap().len(), 3);
    }
}
