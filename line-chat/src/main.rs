use anyhow::Result;
use clap::Parser;
use tracing::error;

use line_chat::{
    cli::{Cli, Command},
    client,
    config::ServerConfig,
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let server = match Server::bind(ServerConfig::from(args)).await {
                Ok(server) => server,
                Err(err) => {
                    error!("failed to start server: {err:?}");
                    return Err(err);
                }
            };
            let addr = server.local_addr()?;
            println!("listening on {addr}");
            if let Err(err) = server.run_until_ctrl_c().await {
                error!("server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
