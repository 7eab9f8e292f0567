mod alarms;
mod clock;
mod config;
mod engine;
mod error;
mod intake;
mod modbus;
mod orchestrator;
mod plant;
mod primitives;
mod process;
mod push;
mod rain;
mod registers;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;

use clap::Parser;

use config::Args;
use engine::Engine;
use error::SimError;
use orchestrator::Addresses;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::from(error::EXIT_OK as u8),
        Err(e) => {
            let exit_code = e
                .downcast_ref::<SimError>()
                .map(SimError::exit_code)
                .unwrap_or(error::EXIT_INTERNAL);
            tracing::error!(error = %e, exit_code, "simulator exited with an error");
            ExitCode::from(exit_code as u8)
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    args.validate()?;

    let seed = args.resolve_seed();
    tracing::info!(
        seed,
        speed = args.speed,
        auto_events = !args.no_auto_events,
        "configuration resolved"
    );

    let engine = Engine::new(seed, args.speed, !args.no_auto_events);

    let addrs = Addresses {
        modbus: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.modbus_port),
        push: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.push_port()),
    };

    orchestrator::run(engine, addrs, seed).await
}
