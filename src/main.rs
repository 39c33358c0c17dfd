use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use osgrep::config::Config;
use osgrep::server;
use osgrep::worker::runtime;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        // Subordinate inference process: stdout carries the protocol,
        // so logs must go to stderr.
        Some("worker") => {
            init_tracing(true);
            runtime::run()?;
            Ok(())
        }
        Some("serve") | None => {
            init_tracing(false);
            let root = args
                .next()
                .map(PathBuf::from)
                .unwrap_or(std::env::current_dir()?);
            let config = Config::from_env();
            tracing::info!(
                "store '{}' under {}",
                config.store_name,
                config.home_dir.display()
            );

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(server::serve(config, root))
        }
        Some(other) => {
            anyhow::bail!("unknown role '{other}' (expected 'serve' or 'worker')")
        }
    }
}

fn init_tracing(to_stderr: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if to_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
