use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::path::PathBuf;

/// Main-method of the application.
/// Parses command-line arguments, then runs the websocket server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Number of spores placed at startup
        #[clap(short, long, default_value = "1000")]
        spores: usize,
        /// Outbound messages buffered per client before new ones are dropped
        #[clap(long, default_value = "256")]
        mailbox_capacity: usize,
        /// JSON file holding registered accounts (in-memory when omitted)
        #[clap(short, long)]
        credentials: Option<PathBuf>,
        /// Put clients into the game as soon as they log in
        #[clap(long)]
        join_on_login: bool,
        /// bcrypt cost used when hashing new passwords
        #[clap(long, default_value = "12")]
        password_cost: u32,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        spore_count: args.spores,
        mailbox_capacity: args.mailbox_capacity,
        credentials_path: args.credentials,
        join_on_login: args.join_on_login,
        password_cost: args.password_cost,
        ..ServerConfig::default()
    };

    let server = Server::bind(config).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
