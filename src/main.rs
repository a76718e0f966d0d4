use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use flatfs::client::Client;
use flatfs::config::{Cli, Command, ServerConfig};
use flatfs::error::{Error, Result};
use flatfs::fs::FlatFs;
use flatfs::{protocol, server};

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            socket,
            shards,
            inode_capacity,
            output,
            log_file,
        } => {
            let config = ServerConfig {
                socket,
                shards,
                inode_capacity,
                output,
                log_file,
            };
            if let Err(e) = serve(config) {
                eprintln!("flatfs: {e}");
                std::process::exit(1);
            }
        }
        Command::Shell { socket, user } => {
            if let Err(e) = shell(&socket, user) {
                eprintln!("flatfs: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn serve(config: ServerConfig) -> Result<()> {
    config.validate()?;
    let _log_guard = init_logging(config.log_file.as_deref());

    let start = Instant::now();
    let fs = Arc::new(FlatFs::new(config.shards, config.inode_capacity));
    info!(
        "flatfs starting: {} shard(s), {} inode slot(s)",
        config.shards, config.inode_capacity
    );

    server::run(&config.socket, Arc::clone(&fs))?;

    write_dump(&fs, config.output.as_deref())?;
    info!(
        "flatfs shut down after {:.3}s",
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Stderr logging always; a non-blocking file appender as well when
/// `--log-file` is given. The returned guard must stay alive for the file
/// writer to flush.
fn init_logging(log_file: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_writer(io::stderr).with_target(false);

    match log_file {
        Some(path) => {
            let log_dir = path.parent().unwrap_or_else(|| Path::new("."));
            let log_name = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("flatfs.log"));
            let file_appender = tracing_appender::rolling::never(log_dir, log_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}

fn write_dump(fs: &FlatFs, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let mut file = File::create(path)?;
            fs.dump(&mut file)?;
            info!("namespace dump written to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            fs.dump(&mut stdout.lock())?;
        }
    }
    Ok(())
}

fn shell(socket: &Path, user: Option<u32>) -> Result<()> {
    let uid = user.unwrap_or_else(|| nix::unistd::getuid().as_raw());
    let mut client = Client::connect(socket, uid)?;
    println!(
        "connected to {} as user {uid}; one request per line, ctrl-D quits",
        socket.display()
    );

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush().map_err(Error::Io)?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            println!();
            return Ok(());
        }
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        print_reply(&client.raw(request)?);
    }
}

fn print_reply(reply: &protocol::Reply) {
    if reply.status < 0 {
        println!("error {}: {}", reply.status, Error::from_wire(reply.status));
    } else if reply.payload.is_empty() {
        println!("ok {}", reply.status);
    } else {
        println!(
            "ok {} bytes: {}",
            reply.status,
            String::from_utf8_lossy(&reply.payload)
        );
    }
}
