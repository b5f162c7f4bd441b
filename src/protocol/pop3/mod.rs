pub mod command;
pub mod handler;
pub mod response;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::runtime::Runtime;
use handler::Pop3Handler;
use tokio::net::{ TcpListener, TcpStream };
use tracing::{ error, info, warn };
use anyhow::Result;

/// RFC 1939 section 3: the autologout timer must be at least 10 minutes.
const DEFAULT_IDLE_TIMEOUT: i32 = 600;

pub async fn run_pop3(runtime: Arc<Runtime>) -> Result<()> {
    let config = &runtime.config;
    let bind_addr = config.get_value("pop3", "bind").unwrap_or("0.0.0.0").to_string();
    let port = config.get_value("pop3", "port").unwrap_or("110").to_string();
    let max_connections = config.get_int("pop3", "max_connections", 1000).max(1) as usize;
    let idle_timeout = match config.get_int("pop3", "idle_timeout", DEFAULT_IDLE_TIMEOUT) {
        secs if secs > 0 => Some(Duration::from_secs(secs as u64)),
        _ => None,
    };

    let addr = format!("{}:{}", bind_addr, port);
    let listener = TcpListener::bind(&addr).await?;

    info!("POP3 server listening on {} (max_connections={}, idle_timeout={:?})", addr, max_connections, idle_timeout);

    let semaphore = Arc::new(tokio::sync::Semaphore::new(max_connections));

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("POP3 connection limit reached, rejecting {}", addr);
                        reject(stream).await;
                        continue;
                    }
                };

                let runtime = Arc::clone(&runtime);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, runtime, idle_timeout).await {
                        error!("POP3 connection error: {}", e);
                    }
                    drop(permit);
                });
            }
            Err(e) => {
                error!("POP3 accept error: {}", e);
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    runtime: Arc<Runtime>,
    idle_timeout: Option<Duration>
) -> Result<()> {
    info!("New POP3 connection from {}", addr);
    let store = runtime.store()?;
    let mut handler = Pop3Handler::new(store, addr).with_idle_timeout(idle_timeout);
    handler.run(stream).await?;
    info!("POP3 connection from {} closed", addr);
    Ok(())
}

async fn reject(mut stream: TcpStream) {
    use tokio::io::AsyncWriteExt;
    let _ = stream.write_all(b"-ERR Too many connections, try again later\r\n").await;
    let _ = stream.shutdown().await;
}
