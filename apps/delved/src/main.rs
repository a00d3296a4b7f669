use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use getrandom::getrandom;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tracing::{info, warn, Level};

use delveproto::codes;
use delveproto::kinds::Dir;
use delveproto::msg::{RawEnvelope, ServerMsg};
use delvecore::chunk;
use delvecore::discovery::DiscoveryStore;
use delvecore::overlay::OverlayStore;
use delvecore::oracle::WorldModel;
use delvecore::session::{ConnState, Engine, EngineConfig};
use delvecore::store::{CharacterRecord, MemDirectory, Pose, WorldRecord};

#[derive(Clone, Debug)]
struct Config {
    bind: SocketAddr,
    ws_path: String,
    allowed_origins: Vec<String>,
    move_cooldown_ms: u64,
    turn_cooldown_ms: u64,
    world_seed: u32,
    generator_version: String,
    data_dir: PathBuf,
    max_payload_bytes: usize,
    dev_users: Vec<String>,
    dev_session_token: Option<String>,
    session_ttl_ms: u64,
}

fn usage_and_exit() -> ! {
    eprintln!(
        "delved\n\n\
USAGE:\n  delved [--bind HOST:PORT] [--ws-path PATH] [--allowed-origins LIST|*]\n         [--world-seed N] [--data-dir PATH] [--dev-users NAME,NAME,...]\n\n\
ENV:\n  BIND               default 127.0.0.1:4700\n  WS_PATH            default /v1/ws\n  ALLOWED_ORIGINS    comma list, or * (default *)\n  MOVE_COOLDOWN_MS   default 500\n  TURN_COOLDOWN_MS   default 150\n  WORLD_SEED         default 1337\n  GENERATOR_VERSION  default maze\n  DATA_DIR           default data\n  MAX_PAYLOAD_BYTES  default 65536\n  DEV_USERS          comma list of users to mint dev sessions for\n  DEV_SESSION_TOKEN  fixed token for the first dev user (else minted)\n  SESSION_TTL_MS     default 86400000\n"
    );
    std::process::exit(2);
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_args() -> Config {
    let mut bind: SocketAddr = env_or("BIND", "127.0.0.1:4700")
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let mut ws_path = env_or("WS_PATH", "/v1/ws");
    let mut allowed_origins: Vec<String> = env_or("ALLOWED_ORIGINS", "*")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let move_cooldown_ms: u64 = env_or("MOVE_COOLDOWN_MS", "500")
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let turn_cooldown_ms: u64 = env_or("TURN_COOLDOWN_MS", "150")
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let mut world_seed: u32 = env_or("WORLD_SEED", "1337")
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let generator_version = env_or("GENERATOR_VERSION", chunk::GENERATOR_VERSION);
    let mut data_dir: PathBuf = env_or("DATA_DIR", "data").into();
    let max_payload_bytes: usize = env_or("MAX_PAYLOAD_BYTES", "65536")
        .parse()
        .unwrap_or_else(|_| usage_and_exit());
    let mut dev_users: Vec<String> = env_or("DEV_USERS", "")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let dev_session_token = std::env::var("DEV_SESSION_TOKEN").ok();
    let session_ttl_ms: u64 = env_or("SESSION_TTL_MS", "86400000")
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--ws-path" => {
                ws_path = it.next().unwrap_or_else(|| usage_and_exit());
            }
            "--allowed-origins" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                allowed_origins = v
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "--world-seed" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                world_seed = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--data-dir" => {
                data_dir = it.next().unwrap_or_else(|| usage_and_exit()).into();
            }
            "--dev-users" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                dev_users = v
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        bind,
        ws_path,
        allowed_origins,
        move_cooldown_ms,
        turn_cooldown_ms,
        world_seed,
        generator_version,
        data_dir,
        max_payload_bytes,
        dev_users,
        dev_session_token,
        session_ttl_ms,
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn mint_token() -> String {
    let mut b = [0u8; 16];
    getrandom(&mut b).expect("getrandom");
    let mut out = String::with_capacity(32);
    for x in b {
        out.push_str(&format!("{x:02x}"));
    }
    out
}

fn build_engine(cfg: &Config) -> anyhow::Result<Engine> {
    let now = now_unix_ms();

    let overlay = OverlayStore::open(cfg.data_dir.join("overlay.jsonl"))
        .context("open overlay journal")?;
    let discovery = DiscoveryStore::open(cfg.data_dir.join("discovery.jsonl"))
        .context("open discovery journal")?;

    let world = WorldRecord {
        world_id: format!("world-{:08x}", cfg.world_seed),
        seed: cfg.world_seed,
        generator_version: cfg.generator_version.clone(),
        created_ms: now,
    };

    let mut sessions = MemDirectory::new();
    let mut characters = MemDirectory::new();
    for (i, user) in cfg.dev_users.iter().enumerate() {
        let token = match (&cfg.dev_session_token, i) {
            (Some(t), 0) => t.clone(),
            _ => mint_token(),
        };
        sessions.insert_session(&token, user, now, cfg.session_ttl_ms);
        characters.insert_character(
            user,
            CharacterRecord {
                character_id: format!("c_{user}"),
                world_id: world.world_id.clone(),
                name: user.clone(),
                hp: 20,
                pose: Pose {
                    level: 1,
                    x: 0,
                    y: 0,
                    face: Dir::N,
                },
            },
        );
        info!(user = %user, token = %token, "dev session ready");
    }

    Ok(Engine::new(
        world,
        EngineConfig {
            move_cooldown_ms: cfg.move_cooldown_ms,
            turn_cooldown_ms: cfg.turn_cooldown_ms,
        },
        WorldModel::new(cfg.world_seed, overlay, discovery),
        Box::new(sessions),
        Box::new(characters),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,delved=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = parse_args();
    let engine = build_engine(&cfg)?;
    let shared = Arc::new(Mutex::new(engine));

    let listener = TcpListener::bind(cfg.bind).await?;
    info!(
        bind = %cfg.bind,
        path = %cfg.ws_path,
        seed = cfg.world_seed,
        generator = %cfg.generator_version,
        "delved listening"
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        let cfg = cfg.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(stream, peer, cfg, shared).await {
                warn!(peer = %peer, err = %e, "connection ended with error");
            }
        });
    }
}

fn origin_allowed(allowed: &[String], req: &Request) -> bool {
    if allowed.iter().any(|o| o == "*") {
        return true;
    }
    let Some(origin) = req.headers().get("origin").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    allowed.iter().any(|o| o == origin)
}

fn reject(status: StatusCode, body: &str) -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some(body.to_string()));
    *resp.status_mut() = status;
    resp
}

async fn handle_conn(
    stream: TcpStream,
    peer: SocketAddr,
    cfg: Config,
    shared: Arc<Mutex<Engine>>,
) -> anyhow::Result<()> {
    let ws_path = cfg.ws_path.clone();
    let origins = cfg.allowed_origins.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        if req.uri().path() != ws_path {
            return Err(reject(StatusCode::NOT_FOUND, "not found"));
        }
        if !origin_allowed(&origins, req) {
            return Err(reject(StatusCode::FORBIDDEN, "origin not allowed"));
        }
        Ok(resp)
    };

    let ws_cfg = WebSocketConfig {
        max_message_size: Some(cfg.max_payload_bytes),
        max_frame_size: Some(cfg.max_payload_bytes),
        ..Default::default()
    };
    let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_cfg))
        .await
        .context("accept ws")?;

    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<String>(128);

    // Writer task: one consumer per connection keeps sends ordered.
    let writer = tokio::spawn(async move {
        while let Some(s) = rx.recv().await {
            if sink.send(Message::Text(s)).await.is_err() {
                break;
            }
        }
    });

    let mut conn = ConnState::new();
    while let Some(m) = stream.next().await {
        let m = match m {
            Ok(m) => m,
            // Oversized payloads and bad frames land here; the connection is
            // done either way.
            Err(_) => break,
        };
        match m {
            Message::Text(s) => {
                let replies = handle_frame(&shared, &mut conn, &s).await;
                for r in replies {
                    match serde_json::to_string(&r) {
                        Ok(js) => {
                            let _ = tx.send(js).await;
                        }
                        Err(e) => warn!(err = %e, "encode reply"),
                    }
                }
            }
            Message::Binary(_) => {
                let err = ServerMsg::Error {
                    code: codes::BAD_JSON.to_string(),
                    message: "binary frames are not part of this protocol".to_string(),
                    seq: None,
                };
                if let Ok(js) = serde_json::to_string(&err) {
                    let _ = tx.send(js).await;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
            _ => {}
        }
    }

    drop(tx);
    let _ = writer.await;
    info!(peer = %peer, authed = conn.authed(), "client disconnected");
    Ok(())
}

async fn handle_frame(shared: &Arc<Mutex<Engine>>, conn: &mut ConnState, text: &str) -> Vec<ServerMsg> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            return vec![ServerMsg::Error {
                code: codes::BAD_JSON.to_string(),
                message: e.to_string(),
                seq: None,
            }]
        }
    };
    let env: RawEnvelope = match serde_json::from_value(value) {
        Ok(v) => v,
        Err(e) => {
            return vec![ServerMsg::Error {
                code: codes::BAD_SCHEMA.to_string(),
                message: e.to_string(),
                seq: None,
            }]
        }
    };

    let now = now_unix_ms();
    shared.lock().await.dispatch(conn, now, &env)
}
