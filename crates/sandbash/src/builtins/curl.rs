//! Curl builtin - transfer data from URLs
//!
//! Every request goes through the sandbox [`HttpClient`], which checks the
//! URL allowlist before the transport is touched and re-checks each
//! redirect target.

use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;

use super::{Builtin, Context};
use crate::error::{Error, Result};
use crate::interpreter::ExecResult;
use crate::network::{HttpRequest, HttpResponse, MAX_REDIRECTS, Method};

/// The curl builtin - transfer data from URLs.
///
/// Usage: curl [OPTIONS] URL
///
/// Options:
///   -s, --silent          Silent mode
///   -S, --show-error      Show errors even with -s
///   -o FILE               Write the body to FILE
///   -X METHOD             Request method
///   -d, --data DATA       Send DATA (implies POST); `@file` reads the body from a file
///   -H, --header HEADER   Add a request header
///   -A, --user-agent UA   Set the User-Agent header
///   -u, --user USER:PASS  Basic authentication
///   -I, --head            Fetch headers only
///   -i, --include         Include response headers in the output
///   -L, --location        Follow redirects
///   -f, --fail            Exit 22 on HTTP errors without printing the body
///   -m, --max-time SECS   Per-request timeout
///
/// Exit codes follow curl's: 3 bad URL, 7 refused by policy, 22 HTTP error
/// with `-f`, 28 timeout, 47 too many redirects, 63 response too large.
pub struct Curl;

#[derive(Default)]
struct CurlArgs {
    url: Option<String>,
    method: Option<Method>,
    data: Option<String>,
    headers: Vec<(String, String)>,
    output: Option<String>,
    silent: bool,
    show_error: bool,
    head: bool,
    include: bool,
    follow: bool,
    fail: bool,
    max_time: Option<Duration>,
}

impl CurlArgs {
    fn parse(args: &[String]) -> std::result::Result<Self, String> {
        let mut parsed = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let mut value = |name: &str| {
                iter.next()
                    .cloned()
                    .ok_or_else(|| format!("option {name}: requires parameter"))
            };
            match arg.as_str() {
                "-s" | "--silent" => parsed.silent = true,
                "-S" | "--show-error" => parsed.show_error = true,
                "-I" | "--head" => parsed.head = true,
                "-i" | "--include" => parsed.include = true,
                "-L" | "--location" => parsed.follow = true,
                "-f" | "--fail" => parsed.fail = true,
                "-sS" | "-Ss" => {
                    parsed.silent = true;
                    parsed.show_error = true;
                }
                "-o" | "--output" => parsed.output = Some(value(arg)?),
                "-X" | "--request" => {
                    let name = value(arg)?;
                    parsed.method = Some(
                        Method::parse(&name).ok_or_else(|| format!("unsupported method '{name}'"))?,
                    );
                }
                "-d" | "--data" | "--data-raw" => parsed.data = Some(value(arg)?),
                "-H" | "--header" => {
                    let header = value(arg)?;
                    let (name, val) = header
                        .split_once(':')
                        .ok_or_else(|| format!("invalid header '{header}'"))?;
                    parsed
                        .headers
                        .push((name.trim().to_string(), val.trim().to_string()));
                }
                "-A" | "--user-agent" => {
                    parsed.headers.push(("User-Agent".to_string(), value(arg)?));
                }
                "-u" | "--user" => {
                    let credentials = value(arg)?;
                    let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
                    parsed
                        .headers
                        .push(("Authorization".to_string(), format!("Basic {encoded}")));
                }
                "-m" | "--max-time" => {
                    let raw = value(arg)?;
                    let secs: f64 = raw
                        .parse()
                        .ok()
                        .filter(|s: &f64| s.is_finite() && *s > 0.0)
                        .ok_or_else(|| format!("invalid --max-time '{raw}'"))?;
                    parsed.max_time = Some(Duration::from_secs_f64(secs));
                }
                a if a.starts_with('-') && a.len() > 1 => {
                    return Err(format!("option {a}: is unknown"));
                }
                _ => parsed.url = Some(arg.clone()),
            }
        }
        Ok(parsed)
    }
}

/// Map a network failure to curl's exit code.
fn exit_code_for(message: &str) -> i32 {
    if message.starts_with("access denied") {
        7
    } else if message.starts_with("invalid URL") || message.starts_with("invalid redirect") {
        3
    } else if message.contains("timed out") {
        28
    } else if message.starts_with("maximum") {
        47
    } else if message.starts_with("response too large") {
        63
    } else {
        6
    }
}

fn format_headers(response: &HttpResponse) -> String {
    let mut out = format!("HTTP/1.1 {}\r\n", response.status);
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out
}

#[async_trait]
impl Builtin for Curl {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let args = match CurlArgs::parse(ctx.args) {
            Ok(args) => args,
            Err(msg) => return Ok(ExecResult::err(format!("curl: {msg}\n"), 2)),
        };
        let Some(url) = args.url.clone() else {
            return Ok(ExecResult::err("curl: no URL specified\n", 2));
        };
        let Some(client) = ctx.http_client else {
            return Ok(ExecResult::err(
                "curl: network access not configured\n",
                1,
            ));
        };

        let body = match &args.data {
            Some(data) => match data.strip_prefix('@') {
                Some(file) => match ctx.read_to_string(file).await {
                    Ok(text) => Some(text.trim_end_matches('\n').as_bytes().to_vec()),
                    Err(Error::Fs(e)) => {
                        return Ok(ExecResult::err(
                            format!("curl: (26) {}\n", e.describe(file)),
                            26,
                        ));
                    }
                    Err(e) => return Err(e),
                },
                None => Some(data.as_bytes().to_vec()),
            },
            None => None,
        };
        let method = args.method.unwrap_or(if args.head {
            Method::Head
        } else if body.is_some() {
            Method::Post
        } else {
            Method::Get
        });

        let mut request = HttpRequest::new(method, url);
        request.headers = args.headers.clone();
        if body.is_some()
            && !request
                .headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        {
            request.headers.push((
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            ));
        }
        request.body = body;
        // never wait past the script deadline
        request.timeout = match (args.max_time, ctx.counters.remaining()) {
            (Some(t), Some(left)) => Some(t.min(left)),
            (t, left) => t.or(left),
        };

        ctx.check_deadline()?;
        let outcome = if args.follow {
            client.follow(request, MAX_REDIRECTS).await
        } else {
            client.request(request).await.map(|r| vec![r])
        };
        ctx.check_deadline()?;

        let chain = match outcome {
            Ok(chain) => chain,
            Err(Error::Network(message)) => {
                let code = exit_code_for(&message);
                let stderr = if args.silent && !args.show_error {
                    String::new()
                } else {
                    format!("curl: ({code}) {message}\n")
                };
                return Ok(ExecResult::err(stderr, code));
            }
            Err(e) => return Err(e),
        };
        let Some(last) = chain.last() else {
            return Ok(ExecResult::err("curl: (52) empty reply from server\n", 52));
        };

        if args.fail && last.status >= 400 {
            let stderr = if args.silent && !args.show_error {
                String::new()
            } else {
                format!(
                    "curl: (22) The requested URL returned error: {}\n",
                    last.status
                )
            };
            return Ok(ExecResult::err(stderr, 22));
        }

        let mut stdout = String::new();
        if args.include || args.head {
            for response in &chain {
                stdout.push_str(&format_headers(response));
            }
        }
        if !args.head {
            ctx.counters
                .check_string_length(last.body.len(), ctx.limits)?;
            match &args.output {
                Some(file) => {
                    if let Err(e) = ctx.fs.write_file(&ctx.resolve(file), &last.body).await {
                        return Ok(ExecResult::err(
                            format!("curl: (23) {}\n", e.describe(file)),
                            23,
                        ));
                    }
                }
                None => stdout.push_str(&last.body_string()),
            }
        }
        Ok(ExecResult::ok(stdout))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, InMemoryFs};
    use crate::network::{HttpClient, HttpTransport, NetworkAllowlist};
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    /// Echoes the request line back and records what it saw.
    #[derive(Default)]
    struct EchoTransport {
        seen: Mutex<Vec<HttpRequest>>,
    }

    #[async_trait]
    impl HttpTransport for EchoTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen.lock().unwrap().push(request.clone());
            let (status, headers) = match request.url.as_str() {
                "https://api.test/old" => (301, vec![("location".to_string(), "/new".to_string())]),
                "https://api.test/escape" => (
                    302,
                    vec![("location".to_string(), "https://evil.test/".to_string())],
                ),
                "https://api.test/missing" => (404, vec![]),
                _ => (200, vec![("content-type".to_string(), "text/plain".to_string())]),
            };
            let body = format!(
                "{} {}{}",
                request.method.as_str(),
                request.url,
                request
                    .body
                    .as_ref()
                    .map(|b| format!(" {}", String::from_utf8_lossy(b)))
                    .unwrap_or_default()
            );
            Ok(HttpResponse {
                status,
                headers,
                body: body.into_bytes(),
            })
        }
    }

    async fn run_curl(args: &[&str]) -> (ExecResult, Arc<EchoTransport>, Arc<InMemoryFs>) {
        let transport = Arc::new(EchoTransport::default());
        let client = HttpClient::new(
            NetworkAllowlist::new().allow("https://api.test/"),
            transport.clone(),
        );
        let fs = Arc::new(InMemoryFs::new());
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut ctx = Context::new_for_test(&args, fs.clone(), None);
        ctx.http_client = Some(&client);
        let result = Curl.execute(ctx).await.unwrap();
        (result, transport, fs)
    }

    #[tokio::test]
    async fn test_get_and_post() {
        let (result, _, _) = run_curl(&["-s", "https://api.test/data"]).await;
        assert_eq!(result.stdout, "GET https://api.test/data");

        let (result, transport, _) = run_curl(&["-d", "a=1", "https://api.test/form"]).await;
        assert_eq!(result.stdout, "POST https://api.test/form a=1");
        let seen = transport.seen.lock().unwrap();
        assert!(seen[0]
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/x-www-form-urlencoded"));
    }

    #[tokio::test]
    async fn test_blocked_url_exit_7() {
        let (result, transport, _) = run_curl(&["https://evil.test/"]).await;
        assert_eq!(result.exit_code, 7);
        assert!(result.stderr.contains("access denied"));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redirects() {
        let (result, _, _) = run_curl(&["https://api.test/old"]).await;
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.starts_with("GET https://api.test/old"));

        let (result, _, _) = run_curl(&["-L", "https://api.test/old"]).await;
        assert_eq!(result.stdout, "GET https://api.test/new");

        let (result, transport, _) = run_curl(&["-L", "https://api.test/escape"]).await;
        assert_eq!(result.exit_code, 7);
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fail_include_and_output() {
        let (result, _, _) = run_curl(&["-f", "https://api.test/missing"]).await;
        assert_eq!(result.exit_code, 22);
        assert_eq!(result.stdout, "");

        let (result, _, _) = run_curl(&["-i", "https://api.test/x"]).await;
        assert!(result.stdout.starts_with("HTTP/1.1 200\r\ncontent-type: text/plain\r\n\r\nGET"));

        let (result, _, fs) = run_curl(&["-o", "/tmp/out", "https://api.test/x"]).await;
        assert_eq!(result.stdout, "");
        assert_eq!(
            fs.read_file(Path::new("/tmp/out")).await.unwrap(),
            b"GET https://api.test/x"
        );
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let (_, transport, _) = run_curl(&["-u", "user:pw", "https://api.test/"]).await;
        let seen = transport.seen.lock().unwrap();
        assert!(seen[0]
            .headers
            .contains(&("Authorization".to_string(), "Basic dXNlcjpwdw==".to_string())));
    }

    #[tokio::test]
    async fn test_without_client() {
        let args = vec!["https://api.test/".to_string()];
        let ctx = Context::new_for_test(&args, Arc::new(InMemoryFs::new()), None);
        let result = Curl.execute(ctx).await.unwrap();
        assert_eq!(result.stderr, "curl: network access not configured\n");
        assert_eq!(result.exit_code, 1);
    }
}
