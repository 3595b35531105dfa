//! Echo every received OSC packet back to its sender.
//!
//! ```text
//! cargo run -p osctcp-transport --example echo_server -- --port 9000
//! RUST_LOG=debug cargo run -p osctcp-transport --example echo_server -- --port 9000 --framing plh
//! ```

use std::io;
use std::rc::Rc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;

use osctcp_transport::{
    FramingMode, OscCodec, OscPacket, ReadError, Server, ServerConfig, ServerDelegate,
    TokioProviders,
};

enum Incoming {
    Packet {
        packet: OscPacket,
        host: String,
        port: u16,
    },
    ListenerClosed,
}

struct EchoDelegate {
    incoming: mpsc::UnboundedSender<Incoming>,
}

impl ServerDelegate<OscPacket> for EchoDelegate {
    fn connection_established(&self, host: &str, port: u16) {
        tracing::info!(%host, port, "client connected");
    }

    fn connection_closed(&self, host: &str, port: u16) {
        tracing::info!(%host, port, "client disconnected");
    }

    fn packet_received(&self, packet: &OscPacket, host: &str, port: u16) {
        let _ = self.incoming.send(Incoming::Packet {
            packet: packet.clone(),
            host: host.to_string(),
            port,
        });
    }

    fn packet_sent(&self, packet: &OscPacket, host: &str, port: u16) {
        tracing::debug!(address = ?packet.address(), %host, port, "echoed");
    }

    fn read_failed(&self, raw: &[u8], error: &ReadError) {
        tracing::warn!(len = raw.len(), %error, "dropped inbound frame");
    }

    fn listening_socket_closed(&self, error: Option<&io::Error>) {
        if let Some(error) = error {
            tracing::error!(%error, "listener failed");
        }
        let _ = self.incoming.send(Incoming::ListenerClosed);
    }
}

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "echo_server")]
#[command(about = "Echo OSC packets back to the client that sent them", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Stream framing: slip or plh
    #[arg(short, long, default_value = "slip")]
    framing: FramingMode,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Args { port, framing } = Args::parse();
    LocalSet::new()
        .run_until(async move {
            let (tx, mut incoming) = mpsc::unbounded_channel();
            let delegate = Rc::new(EchoDelegate { incoming: tx });

            let server = Server::new(
                TokioProviders::new(),
                OscCodec,
                ServerConfig::new(port, framing),
            );
            server.set_delegate(&delegate);
            let addr = server.start().await?;
            tracing::info!(%addr, %framing, "echo server ready");

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        server.stop();
                    }
                    event = incoming.recv() => match event {
                        Some(Incoming::Packet { packet, host, port }) => {
                            server.send_packet_to(&packet, &host, port)?;
                        }
                        Some(Incoming::ListenerClosed) | None => break,
                    }
                }
            }
            Ok(())
        })
        .await
}
