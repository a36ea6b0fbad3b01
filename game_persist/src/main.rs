use std::error::Error;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use game_persist::config::{Config, ConfigError};
use game_persist::entity::{ClientId, HubId, NetworkId, Networked};
use game_persist::gateway::Pending;
use game_persist::net::Session;
use game_persist::store::{serve, MemoryStore, RemoteChannel};
use game_persist::world::{Marker, Scene, World};
use game_persist::{load, Persistence};
use tokio::runtime::Builder;
use tokio::time::{interval, MissedTickBehavior};

/// Runs a scripted scene against an in-process store.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "./config.toml")]
    config: PathBuf,
    /// Seconds to keep scrubbing the media before it is unpinned.
    #[arg(long, default_value_t = 4)]
    scrub: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    game_persist::logger::init()?;

    let args = Args::parse();

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(ConfigError::Io(err)) => {
            tracing::warn!(
                "failed to read {}: {}, using defaults",
                args.config.display(),
                err
            );
            Config::default()
        }
        Err(err) => return Err(err.into()),
    };

    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(run(config, Duration::from_secs(args.scrub)))
}

async fn run(config: Config, scrub: Duration) -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let (mut channel, rx) = RemoteChannel::new();
    let backend = tokio::task::spawn(serve(rx, store.clone()));

    let hub = HubId::from("hub1");
    let local = ClientId::from("local");
    let mut session = Session::new();
    session.connect(local.clone());
    session.join(hub.clone());

    let mut world = World::new();
    let scene_root = world.spawn(None);
    world.set_scene_root(scene_root);

    let media = world.spawn_networked(
        Some(scene_root),
        Networked::new(NetworkId::from("media1"), local.clone()),
    );
    world.set_prefab(media, "media");
    let player = world.spawn_networked(
        Some(media),
        Networked::new(NetworkId::from("media1.player"), local.clone()),
    );
    for entity in [media, player] {
        world.insert(entity, Marker::Owned);
        world.insert(entity, Marker::Persistable);
    }

    let mut persistence = Persistence::new(config.clone())?;

    let pin = persistence.save_entity_state_hierarchy(&mut world, &session, &mut channel, media)?;
    report("pin", pin);

    let timestep = Duration::from_secs(1) / config.timestep;
    let mut interval = interval(timestep);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let start = Instant::now();
    let mut position = 0.0;
    loop {
        interval.tick().await;
        let now = Instant::now();
        if now - start >= scrub {
            break;
        }

        // Continuous scrubbing is flushed once per `max_save_delay`.
        position += timestep.as_secs_f64();
        world.set_data(player, "position", serde_json::json!(position));
        Persistence::mark_dirty(&mut world, player);

        persistence.update(&mut world, &session, &mut channel, now);
    }

    for entity in [media, player] {
        world.remove(entity, Marker::Persistable);
    }
    let unpin = persistence.delete_entity_state_hierarchy(&mut world, &session, &mut channel, media)?;
    report("unpin", unpin);

    while persistence.in_flight() != 0 {
        interval.tick().await;
        persistence.update(&mut world, &session, &mut channel, Instant::now());
    }

    let count = load::load_saved_entity_states(&mut channel, &mut session, &hub).await?;
    tracing::info!("{} records left in store", count);

    session.disconnect();
    persistence.reset();

    drop(channel);
    backend.await?;

    Ok(())
}

fn report<T>(name: &'static str, pending: Pending<Vec<T>>)
where
    T: Send + 'static,
{
    tokio::task::spawn(async move {
        match pending.await {
            Ok(replies) => tracing::info!("{}: {} records acknowledged", name, replies.len()),
            Err(err) => tracing::error!("{} failed: {}", name, err),
        }
    });
}
