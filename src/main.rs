use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use secrecy::SecretString;
use staweave::{
    CallbackEngine, EngineHandle, Platform, TaskScheduler, WifiContext, callback, config,
    wifi::SimNetwork,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Join a simulated access point and print connectivity callbacks
#[derive(Parser, Debug)]
#[command(
    name = "staweave",
    about = "Join a simulated access point and print the connectivity callbacks it triggers.",
    long_about = None,
    version = env!("CARGO_PKG_VERSION"),
    disable_version_flag = true
)]
struct Args {
    /// Print version information
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: (),

    /// Network name to join
    #[arg(long)]
    ssid: String,

    /// Network passphrase
    #[arg(long)]
    password: String,

    /// Address handed out by the access point
    #[arg(long, default_value_t = Ipv4Addr::from(config::SIM_DEFAULT_ADDRESS))]
    address: Ipv4Addr,

    /// Simulate an access point that is out of range
    #[arg(long)]
    unreachable: bool,

    /// Seconds to wait for an address
    #[arg(long = "timeout-secs", default_value_t = config::CONNECT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "staweave=debug"
    } else {
        "staweave=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    color_eyre::install()?;
    init_tracing(args.verbose);

    let networks = if args.unreachable {
        Vec::new()
    } else {
        vec![SimNetwork::new(&args.ssid, &args.password, args.address)]
    };
    let platform = Platform::init(networks)?;

    let engine = EngineHandle::new(CallbackEngine::new());
    let context = WifiContext::create(
        platform.session(),
        engine.clone(),
        Arc::new(TaskScheduler::new()),
    )?;
    context.on_connected(Some(callback(|args| {
        let address = args.first().map(String::as_str).unwrap_or("?");
        println!("connected: {address}");
        Ok(())
    })));
    context.on_disconnected(Some(callback(|_| {
        println!("disconnected");
        Ok(())
    })));

    let password = SecretString::from(args.password);
    context.connect(&args.ssid, &password)?;

    let outcome = match tokio::time::timeout(
        Duration::from_secs(args.timeout_secs),
        context.flag().wait_set(),
    )
    .await
    {
        Ok(()) => Ok(()),
        Err(_) => Err(eyre!(
            "no address acquired from {} within {}s",
            args.ssid,
            args.timeout_secs
        )),
    };

    context.disconnect()?;
    tokio::time::sleep(Duration::from_millis(config::LINGER_MS)).await;
    let event_loop = Arc::clone(platform.event_loop());
    tokio::task::spawn_blocking(move || event_loop.flush()).await??;

    context.destroy()?;
    let invocations = engine.with(|engine| engine.invocations());
    tracing::debug!(invocations, "session finished");
    outcome
}
