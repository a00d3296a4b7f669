//! End-to-end probe: spawn two fresh daemons with the same seed, drive the
//! same intent script over WebSocket, and check that the worlds agree.
//!
//! Run after `cargo build`: `target/debug/e2e_ws`.

use std::process::Stdio;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio_tungstenite::tungstenite::protocol::Message;

use delveproto::msg::{ServerMsg, WorldState};

const TOKEN: &str = "00112233445566778899aabbccddeeff";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let a = run_once("127.0.0.1:47101", 1).await?;
    let b = run_once("127.0.0.1:47102", 2).await?;

    // Wall clocks differ between runs, so cooldown timestamps (and with them
    // the hash) are not comparable; the world content is.
    anyhow::ensure!(a.you == b.you, "final pose diverged: {:?} vs {:?}", a.you, b.you);
    anyhow::ensure!(
        a.visible_cells == b.visible_cells,
        "visible cells diverged between runs"
    );
    println!("delved e2e ok ({} visible cells)", a.visible_cells.len());
    Ok(())
}

async fn run_once(bind: &str, n: u32) -> anyhow::Result<WorldState> {
    let data_dir = std::env::temp_dir().join(format!("delved_e2e_{}_{n}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);

    let mut server = Command::new("target/debug/delved")
        .env("BIND", bind)
        .env("WORLD_SEED", "777")
        .env("DEV_USERS", "probe")
        .env("DEV_SESSION_TOKEN", TOKEN)
        .env("DATA_DIR", &data_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    wait_tcp(bind, Duration::from_secs(10)).await?;
    let res = run_client(&format!("ws://{bind}/v1/ws")).await;

    let _ = server.kill().await;
    let _ = std::fs::remove_dir_all(&data_dir);
    res
}

async fn wait_tcp(bind: &str, timeout: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if TcpStream::connect(bind).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    anyhow::bail!("timeout waiting for tcp {bind}");
}

struct Client {
    sink: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
        Message,
    >,
    stream: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
    >,
    seq: i64,
}

impl Client {
    async fn send(&mut self, ty: &str, payload: serde_json::Value) -> anyhow::Result<()> {
        let frame = json!({"seq": self.seq, "type": ty, "payload": payload});
        self.seq += 1;
        self.sink.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> anyhow::Result<ServerMsg> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let m = tokio::time::timeout(remaining, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for server message"))?;
            let Some(m) = m else {
                anyhow::bail!("connection closed");
            };
            if let Message::Text(s) = m? {
                return Ok(serde_json::from_str(&s)?);
            }
        }
    }

    async fn expect_result(&mut self) -> anyhow::Result<(bool, Option<String>)> {
        match self.recv().await? {
            ServerMsg::ActionResult { ok, reason, .. } => Ok((ok, reason)),
            other => anyhow::bail!("expected action_result, got {other:?}"),
        }
    }

    async fn expect_state(&mut self) -> anyhow::Result<WorldState> {
        match self.recv().await? {
            ServerMsg::WorldState(ws) => Ok(ws),
            other => anyhow::bail!("expected world_state, got {other:?}"),
        }
    }
}

async fn run_client(url: &str) -> anyhow::Result<WorldState> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    let (sink, stream) = ws.split();
    let mut c = Client {
        sink,
        stream,
        seq: 0,
    };

    c.send("auth", json!({"session_token": TOKEN})).await?;
    match c.recv().await? {
        ServerMsg::AuthOk { .. } => {}
        other => anyhow::bail!("expected auth_ok, got {other:?}"),
    }
    c.expect_state().await?;

    c.send("turn", json!({"face": "E"})).await?;
    let (ok, reason) = c.expect_result().await?;
    anyhow::ensure!(ok, "turn refused: {reason:?}");
    c.expect_state().await?;

    // East out of the hub interior is always open.
    c.send("move", json!({"dir": "F"})).await?;
    let (ok, reason) = c.expect_result().await?;
    anyhow::ensure!(ok, "move refused: {reason:?}");
    c.expect_state().await?;

    // Immediately again: the server must refuse on cooldown.
    c.send("move", json!({"dir": "F"})).await?;
    let (ok, reason) = c.expect_result().await?;
    anyhow::ensure!(!ok, "second move should hit the cooldown");
    anyhow::ensure!(
        reason.as_deref() == Some("move_cooldown"),
        "expected move_cooldown, got {reason:?}"
    );

    tokio::time::sleep(Duration::from_millis(600)).await;
    c.send("move", json!({"dir": "B"})).await?;
    let (ok, reason) = c.expect_result().await?;
    anyhow::ensure!(ok, "move back refused: {reason:?}");
    let last = c.expect_state().await?;

    anyhow::ensure!(last.world_hash.len() == 8, "hash shape");
    Ok(last)
}
