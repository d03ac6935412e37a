//! Command-line arguments.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use trafficd_core::{MessageKind, PublishConfig, ServerConfig, ServerDefaults};

#[derive(Parser, Debug)]
#[command(name = "trafficd")]
#[command(about = "Datagram dispatch server for vehicle-count inference")]
#[command(version, args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "compact", global = true, env = "TRAFFICD_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Arguments for `serve` when no subcommand is given
    #[command(flatten)]
    pub serve: ServeArgs,
}

impl Cli {
    /// The subcommand to run. Bare `trafficd` means `serve`.
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve(self.serve))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the dispatch server until SIGINT or SIGTERM
    Serve(ServeArgs),

    /// Send one request frame to a running server
    Send(SendArgs),

    /// Upload a file to the configured bucket
    Upload(UploadArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Path of the Unix datagram socket to bind
    #[arg(long, env = ServerDefaults::SOCKET_PATH_ENV)]
    pub socket_path: Option<PathBuf>,

    /// Number of frames processed concurrently
    #[arg(long, env = "TRAFFICD_WORKERS", default_value_t = ServerDefaults::WORKERS)]
    pub workers: usize,

    /// Decoded frames buffered ahead of the workers
    #[arg(long, env = "TRAFFICD_QUEUE_CAPACITY", default_value_t = ServerDefaults::QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    #[command(flatten)]
    pub publish: PublishArgs,
}

impl ServeArgs {
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let socket_path = self.socket_path.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "No socket path given (use --socket-path or {})",
                ServerDefaults::SOCKET_PATH_ENV
            )
        })?;

        let config = ServerConfig::new(socket_path)
            .with_workers(self.workers)
            .with_queue_capacity(self.queue_capacity);
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    /// Topic results are published to
    #[arg(long, env = "TRAFFICD_TOPIC", default_value = PublishConfig::DEFAULT_TOPIC)]
    pub topic: String,

    /// Base URL of the message bus; results are only logged when unset
    #[arg(long, env = "TRAFFICD_BUS_URL")]
    pub bus_url: Option<String>,

    /// Bucket for artifact uploads
    #[arg(long, env = "TRAFFICD_BUCKET")]
    pub bucket: Option<String>,

    /// Base URL of the blob store
    #[arg(long, env = "TRAFFICD_STORAGE_URL", default_value = PublishConfig::DEFAULT_STORAGE_URL)]
    pub storage_url: String,

    /// Bearer token sent to the bus and the blob store
    #[arg(long, env = "TRAFFICD_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Publish attempts per outcome before giving up
    #[arg(
        long,
        env = "TRAFFICD_PUBLISH_ATTEMPTS",
        default_value_t = PublishConfig::RETRY_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub publish_attempts: u32,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Path of the server socket
    #[arg(long, env = ServerDefaults::SOCKET_PATH_ENV)]
    pub socket_path: PathBuf,

    /// Request id echoed back in the published outcome
    #[arg(long)]
    pub id: u16,

    /// Image path the server should classify
    #[arg(long)]
    pub path: PathBuf,

    /// Image format tag
    #[arg(long, default_value = "jpg")]
    pub format: String,

    /// Raw message kind byte
    #[arg(long, default_value_t = MessageKind::INFER)]
    pub kind: u8,
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    /// File to upload; stored under its base name
    pub file: PathBuf,

    #[command(flatten)]
    pub publish: PublishArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("trafficd").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn test_bare_invocation_serves() {
        let cli = parse(&["--socket-path", "/tmp/t.sock", "--workers", "2"]);
        match cli.into_command() {
            Command::Serve(args) => {
                assert_eq!(args.socket_path, Some(PathBuf::from("/tmp/t.sock")));
                assert_eq!(args.workers, 2);
                assert_eq!(args.queue_capacity, ServerDefaults::QUEUE_CAPACITY);
            }
            other => panic!("expected serve, got {:?}", other),
        }
    }

    #[test]
    fn test_send_defaults() {
        let cli = parse(&["send", "--socket-path", "/tmp/t.sock", "--id", "7", "--path", "/a.png"]);
        match cli.into_command() {
            Command::Send(args) => {
                assert_eq!(args.id, 7);
                assert_eq!(args.format, "jpg");
                assert_eq!(args.kind, MessageKind::INFER);
            }
            other => panic!("expected send, got {:?}", other),
        }
    }

    #[test]
    fn test_upload_takes_file_and_bucket() {
        let cli = parse(&["upload", "model.bin", "--bucket", "artifacts"]);
        match cli.into_command() {
            Command::Upload(args) => {
                assert_eq!(args.file, PathBuf::from("model.bin"));
                assert_eq!(args.publish.bucket.as_deref(), Some("artifacts"));
                assert_eq!(args.publish.publish_attempts, PublishConfig::RETRY_ATTEMPTS);
            }
            other => panic!("expected upload, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_publish_attempts_rejected() {
        let result = Cli::try_parse_from(["trafficd", "--publish-attempts", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["upload", "a.bin", "--log-format", "json", "--debug"]);
        assert!(cli.debug);
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_server_config_requires_socket_path() {
        let args = ServeArgs {
            socket_path: None,
            workers: 1,
            queue_capacity: 1,
            publish: parse(&[]).serve.publish,
        };
        assert!(args.server_config().is_err());
    }

    #[test]
    fn test_server_config_rejects_zero_workers() {
        let mut args = parse(&["--socket-path", "/tmp/t.sock"]).serve;
        args.workers = 0;
        assert!(args.server_config().is_err());
    }
}
