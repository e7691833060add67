use clap::Parser;
use minidis::server::{self, AofConfig, Config};
use minidis::Error;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
struct Args {
    /// The port to listen on
    #[arg(short, long, env = "MINIDIS_PORT", default_value_t = server::DEFAULT_PORT)]
    port: u16,

    /// The address to bind to
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,

    /// Log write commands to an append-only file and replay it on startup
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    appendonly: bool,

    /// Path of the append-only file
    #[arg(long, env = "MINIDIS_AOF", default_value = "appendonly.aof")]
    appendfilename: PathBuf,

    /// How often the append-only file is synced to disk, in milliseconds. 0 disables the
    /// periodic sync.
    #[arg(long, default_value_t = 1000)]
    appendfsync_ms: u64,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let fsync_interval = match args.appendfsync_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        Config {
            bind: args.bind,
            port: args.port,
            aof: args.appendonly.then(|| AofConfig {
                path: args.appendfilename,
                fsync_interval,
            }),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    server::run(args.into()).await
}
