//! In-process stand-ins for a daemon's control socket and process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

/// Minimal HTTP/1.1 server on a unix socket. Aborted on drop.
pub struct StubServer {
    task: JoinHandle<()>,
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Serve every request with `respond(path) -> (status line, JSON body)`.
pub fn serve<F>(socket: &Path, respond: F) -> StubServer
where
    F: Fn(&str) -> (String, String) + Send + Sync + 'static,
{
    let listener = UnixListener::bind(socket).unwrap();
    let respond = Arc::new(respond);

    let task = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                let _ = answer(stream, respond.as_ref()).await;
            });
        }
    });
    StubServer { task }
}

/// Answer every request with `status` and an empty JSON object.
pub fn serve_status(socket: &Path, status: &str) -> StubServer {
    let status = status.to_string();
    serve(socket, move |_| (status.clone(), "{}".to_string()))
}

/// Answer `/_ping` and report `root` from `/info`.
pub fn serve_daemon(socket: &Path, root: &Path) -> StubServer {
    let body = serde_json::json!({ "DockerRootDir": root }).to_string();
    serve(socket, move |path| match path {
        "/info" => ("200 OK".to_string(), body.clone()),
        _ => ("200 OK".to_string(), "OK".to_string()),
    })
}

/// Accept connections and never reply.
pub fn serve_stalled(socket: &Path) -> StubServer {
    let listener = UnixListener::bind(socket).unwrap();
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    StubServer { task }
}

async fn answer<F>(mut stream: UnixStream, respond: &F) -> std::io::Result<()>
where
    F: Fn(&str) -> (String, String),
{
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
    }

    let head = String::from_utf8_lossy(&request);
    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
    let (status, body) = respond(&path);

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Shell script standing in for the daemon binary.
///
/// It records its arguments, keeps the `--pidfile` argument in `$pidfile`,
/// then runs `body`. Run it as `sh <script>` to avoid executing a freshly
/// written file.
pub fn fake_daemon(dir: &Path, body: &str) -> PathBuf {
    let script = dir.join("fake-daemon.sh");
    let args = dir.join("args.txt");
    let content = format!(
        r#"printf '%s\n' "$@" > {args}
pidfile=/dev/null
while [ $# -gt 0 ]; do
  if [ "$1" = --pidfile ]; then pidfile="$2"; fi
  shift
done
{body}
"#,
        args = args.display(),
        body = body,
    );
    std::fs::write(&script, content).unwrap();
    script
}

/// Body for a daemon that exits cleanly on SIGINT. The pid file is written
/// once the trap is in place.
pub const RUN_UNTIL_INTERRUPTED: &str =
    "trap 'exit 0' INT\necho $$ > \"$pidfile\"\nwhile true; do sleep 0.1; done";

/// Body for a daemon that ignores SIGINT.
pub const IGNORE_INTERRUPTS: &str =
    "trap '' INT\necho $$ > \"$pidfile\"\nwhile true; do sleep 0.1; done";

/// Wait until the fake daemon has written its pid file.
pub async fn wait_for_pid_file(path: &Path) {
    for _ in 0..250 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("{} never appeared", path.display());
}

/// Arguments the fake daemon was started with, one per line.
pub fn recorded_args(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("args.txt"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
