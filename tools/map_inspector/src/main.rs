use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use worldmap::items::ItemKind;
use worldmap::{WorldMap, WorldMapConfig};
use worldmap_shared::protocol::{self, MapReply, MapRequest, PROTOCOL_VERSION};

struct Args {
    capture: PathBuf,
    config: Option<PathBuf>,
    dump: bool,
}

fn main() {
    let _ = tracing_subscriber::fmt().with_target(false).try_init();

    let Some(args) = parse_args() else {
        eprintln!("Usage: map_inspector <capture.bin> [--config world_map.toml] [--dump]");
        std::process::exit(2);
    };

    if let Err(err) = run(&args) {
        eprintln!("map_inspector error: {err}");
        std::process::exit(1);
    }
}

fn parse_args() -> Option<Args> {
    let mut capture = None;
    let mut config = None;
    let mut dump = false;

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(iter.next()?)),
            "--dump" => dump = true,
            _ if capture.is_none() => capture = Some(PathBuf::from(arg)),
            _ => return None,
        }
    }

    Some(Args {
        capture: capture?,
        config,
        dump,
    })
}

fn run(args: &Args) -> Result<(), String> {
    let config = match &args.config {
        Some(path) => WorldMapConfig::load(path)
            .map_err(|err| format!("failed to load {}: {err}", path.display()))?
            .unwrap_or_default(),
        None => WorldMapConfig::default(),
    };

    let replies = read_capture(&args.capture)?;
    let mut map = WorldMap::new(config);
    let mut followups: Vec<MapRequest> = Vec::new();
    let mut rejected = 0usize;
    for reply in replies.iter().cloned() {
        if let Err(err) = map.handle_reply(reply, &mut followups) {
            warn!("Skipping reply: {err}");
            rejected += 1;
        }
    }

    println!("Capture: {} (protocol v{PROTOCOL_VERSION})", args.capture.display());
    println!("Replies: {} ({rejected} rejected)", replies.len());
    println!("Regions: {}", map.directory().len());
    match (map.directory().bounds().min(), map.directory().bounds().max()) {
        (Some(min), Some(max)) => println!(
            "Bounds: ({}, {}) - ({}, {}) = {}x{} m",
            min.x,
            min.y,
            max.x,
            max.y,
            map.world_width(),
            map.world_height()
        ),
        _ => println!("Bounds: empty"),
    }

    let mut regions: Vec<_> = map.directory().iter().collect();
    regions.sort_by_key(|(handle, _)| **handle);
    for (handle, info) in regions {
        let status = if info.access.is_down() { " (offline)" } else { "" };
        println!(
            "  {} {} - {}{} - {}x{} m",
            handle,
            info.name,
            info.access.label(),
            status,
            info.size.x,
            info.size.y
        );
    }

    for kind in ItemKind::ALL {
        println!("{kind:?}: {}", map.items().items(kind).len());
    }
    println!("Follow-up requests: {}", followups.len());

    if args.dump {
        map.dump();
    }
    Ok(())
}

fn read_capture(path: &Path) -> Result<Vec<MapReply>, String> {
    let data = fs::read(path).map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    protocol::decode(&data).map_err(|err| format!("failed to decode {}: {err}", path.display()))
}
