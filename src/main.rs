use std::fs;

use clap::Parser;
use tracing::{debug, info};

use proxy_cache::cache::Cache;
use proxy_cache::config::Args;
use proxy_cache::error::Result;
use proxy_cache::listener::{Listener, ListenerKind};
use proxy_cache::logging;
use proxy_cache::prelude::{AppCtx, CACHING_PATH, Rc, RefCell, Stats};
use proxy_cache::reactor::Reactor;

fn main() -> Result<()> {
    let mut args = Args::parse();
    if let Ok(base) = fs::canonicalize(&args.base) {
        args.base = base;
    }
    logging::init(args.log_level, &args.log_file)?;
    info!(
        "startup {}-{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    debug!("args: {:?}", args);

    let cache_root = std::env::current_dir()?.join(CACHING_PATH);
    let ctx = AppCtx {
        cache: Rc::new(RefCell::new(Cache::new(cache_root)?)),
        stats: Rc::new(RefCell::new(Stats::new())),
        base: args.base.clone(),
    };

    let mut reactor = Reactor::new()?;
    reactor.register(Box::new(Listener::bind(
        &args.bind_address,
        args.proxy_bind_port,
        ListenerKind::Proxy,
        ctx.clone(),
    )?));
    reactor.register(Box::new(Listener::bind(
        &args.bind_address,
        args.server_bind_port,
        ListenerKind::Admin,
        ctx.clone(),
    )?));

    let outcome = reactor.run();
    reactor.close_all();
    info!("all sockets closed, shutting down");
    outcome
}
