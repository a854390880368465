//! Line-oriented command socket.
//!
//! Each accepted connection sends one command line, receives the rendered
//! result terminated by a newline, and is closed.

use ptpip_client::{Client, Command};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Longest command line accepted.
const MAX_LINE_LEN: usize = 4096;

/// Serves the command language over local TCP connections.
pub struct CommandServer {
    bind_addr: SocketAddr,
    client: Arc<Client>,
    shutdown: broadcast::Sender<()>,
}

impl CommandServer {
    pub fn new(bind_addr: SocketAddr, client: Arc<Client>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            bind_addr,
            client,
            shutdown,
        }
    }

    /// Accepts connections until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        tracing::info!("Command socket listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::debug!("Command connection from {}", addr);
                            let client = self.client.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, &client).await {
                                    tracing::debug!("Command connection {} error: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Command socket shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Reads one command line, runs it and writes back the result.
pub async fn handle_connection<S>(stream: S, client: &Client) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let n = (&mut reader)
        .take(MAX_LINE_LEN as u64)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Ok(());
    }

    let reply = execute_line(client, line.trim()).await;

    let mut stream = reader.into_inner();
    stream.write_all(reply.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await
}

async fn execute_line(client: &Client, line: &str) -> String {
    let result = match Command::parse(line) {
        Ok(command) => command.execute(client).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(output) => output.render(),
        Err(e) => {
            tracing::warn!("Command {:?} failed: {}", line, e);
            format!("error: {}", e)
        }
    }
}
