// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use clap::Parser;
use dfsish::auth::{Authenticator, SecretAuthenticator};
use dfsish::binlog::BinlogWriter;
use dfsish::config::Config;
use dfsish::handler::NodeHandler;
use dfsish::observability;
use dfsish::server::TcpNodeServer;
use dfsish::storage::ObjectStore;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "dfsish")]
#[command(about = "Content-addressed storage node with a framed TCP protocol", long_about = None)]
struct Args {
    /// Address to listen on (overrides bind_address/port from the config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    observability::init_logging();

    let args = Args::parse();
    let cfg = Config::from_path(&args.config)?;

    let addr: SocketAddr = args
        .listen
        .unwrap_or_else(|| cfg.listen_addr())
        .parse()?;

    let store = Arc::new(ObjectStore::open(&cfg.data_dir, &cfg.tmp_dir).await?);
    let binlog = Arc::new(BinlogWriter::open(Path::new(&cfg.binlog.dir).join("binlog.dat")).await?);
    let auth: Arc<dyn Authenticator> = Arc::new(SecretAuthenticator::new(cfg.secret.clone()));
    let handler = Arc::new(
        NodeHandler::new(&cfg.group, &cfg.instance_id, store, binlog)
            .with_buffer_size(cfg.io.buffer_size),
    );

    if cfg.trackers.is_empty() {
        tracing::info!(group = %cfg.group, instance = %cfg.instance_id, "running standalone");
    } else {
        tracing::info!(
            group = %cfg.group,
            instance = %cfg.instance_id,
            trackers = ?cfg.trackers,
            "running in cluster mode"
        );
    }

    let server = TcpNodeServer::new(auth, handler);
    tracing::info!("storage server started");

    tokio::select! {
        r = server.serve(addr) => {
            if let Err(e) = r {
                tracing::error!("server exited with error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("ctrl-c received, shutting down");
        }
    }

    Ok(())
}
