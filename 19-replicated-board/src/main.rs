use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use replicated_board::{
    cli::{Cli, Command, TargetArgs},
    runtime::Server,
    BoardClient, Error, NewArticle,
};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn client_for(target: &TargetArgs) -> BoardClient {
    BoardClient::new(target.server.clone()).with_timeout(Duration::from_millis(target.timeout_ms))
}

fn request_failed(op: &str, client: &BoardClient, err: Error) -> anyhow::Error {
    let hint = if err.is_retryable() { " (retryable)" } else { "" };
    anyhow::Error::new(err).context(format!("{op} via {} failed{hint}", client.addr()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Node(args) => {
            let config = args.into_config();
            let server = Server::bind(config)
                .await
                .context("failed to start replica")?;
            info!("replica listening on {}", server.local_addr()?);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("replica exited with error: {err:?}");
                return Err(err.into());
            }
        }
        Command::Post(args) => {
            let client = client_for(&args.target);
            let article = NewArticle::new(args.parent, args.title, args.content, args.user);
            let ack = client
                .post(&article)
                .await
                .map_err(|err| request_failed("post", &client, err))?;
            println!("{ack}");
        }
        Command::Read(target) => {
            let client = client_for(&target);
            let articles = client
                .read()
                .await
                .map_err(|err| request_failed("read", &client, err))?;
            if articles.is_empty() {
                println!("(board is empty)");
            }
            for article in articles.values() {
                if article.parent == 0 {
                    println!(
                        "#{} [{}] {}: {}",
                        article.id, article.user, article.title, article.content
                    );
                } else {
                    println!(
                        "  #{} re #{} [{}] {}",
                        article.id, article.parent, article.user, article.content
                    );
                }
            }
        }
        Command::Sync(target) => {
            let client = client_for(&target);
            let ack = client
                .sync()
                .await
                .map_err(|err| request_failed("sync", &client, err))?;
            println!("{ack}");
        }
    }

    Ok(())
}
