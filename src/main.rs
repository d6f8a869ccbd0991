mod cache;
mod clients;
mod config;
mod database;
mod entities;
mod error;
mod logging;
mod ports;
mod services;
#[cfg(test)]
mod test_utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::Context, eyre::eyre};

use crate::{
    cache::TtlCache,
    clients::{spotify::SpotifyClient, youtube::YoutubeClient},
    config::Config,
    database::Database,
    logging::setup_logging,
    ports::platform::{Platform, PlatformClient},
    services::playlist::PlaylistService,
    services::safety::{SafetyGuard, SafetyLevel},
    services::sync::{ChangeType, SyncOperation, SyncService},
};

/// How long a platform playlist listing stays fresh within one invocation.
const PLAYLIST_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "PLAYLIST_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Console log level (default: off)
    #[arg(long, default_value = "off", global = true, env = "LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// File log level (default: debug)
    #[arg(long, default_value = "debug", global = true)]
    log_file_level: log::LevelFilter,

    /// Path to log file
    #[arg(long, env = "PLAYLIST_SYNC_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List local playlists and their track counts
    Playlists,
    /// List playlists on a platform
    Remote {
        /// The platform to list
        #[arg(short, long)]
        platform: Platform,
    },
    /// Import a platform playlist into the local library
    Import {
        /// The platform to import from
        #[arg(short, long)]
        platform: Platform,

        /// The platform playlist id to import
        #[arg(short = 'i', long)]
        playlist_id: String,

        /// Name for the local playlist (defaults to the remote name)
        #[arg(short, long)]
        name: Option<String>,

        /// Import into this existing local playlist instead of resolving one
        #[arg(long)]
        into: Option<i64>,
    },
    /// Export a local playlist to a platform
    Export {
        /// The platform to export to
        #[arg(short, long)]
        platform: Platform,

        /// The local playlist id to export
        #[arg(short = 'i', long)]
        playlist_id: i64,

        /// Push into this existing platform playlist instead of creating one
        #[arg(long)]
        to: Option<String>,

        /// Name for a newly created platform playlist
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Show what a sync would change, without applying anything
    Preview {
        /// The platform to diff against
        #[arg(short, long)]
        platform: Platform,

        /// The local playlist id to diff
        #[arg(short = 'i', long)]
        playlist_id: i64,
    },
    /// Diff a linked playlist against its platform copy and apply the changes
    Sync {
        /// The platform to sync with
        #[arg(short, long)]
        platform: Platform,

        /// The local playlist id to sync
        #[arg(short = 'i', long)]
        playlist_id: i64,

        /// Which direction(s) to apply
        #[arg(short, long, default_value = "pull")]
        direction: Direction,

        /// Apply the changes instead of only counting them
        #[arg(long)]
        apply: bool,
    },
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Direction {
    Pull,
    Push,
    TwoWay,
}

impl From<Direction> for SyncOperation {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Pull => SyncOperation::Pull,
            Direction::Push => SyncOperation::Push,
            Direction::TwoWay => SyncOperation::TwoWay,
        }
    }
}

/// A platform-facing command, platform-independent once parsed.
#[derive(Debug)]
enum PlatformAction {
    Remote,
    Import {
        playlist_id: String,
        name: Option<String>,
        into: Option<i64>,
    },
    Export {
        playlist_id: i64,
        to: Option<String>,
        name: Option<String>,
    },
    Preview {
        playlist_id: i64,
    },
    Sync {
        playlist_id: i64,
        direction: Direction,
        apply: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    setup_logging(args.log_level, args.log_file.clone(), args.log_file_level)?;

    log::debug!("Playlist sync starting");
    log::debug!("Loading configuration");

    let config = {
        if let Some(config) = args.config {
            Config::from_file(&config)
        } else {
            Config::load()
        }
    }
    .with_context(|| "Failed to load playlist-sync config")?;

    match args.command {
        Commands::Config(config_commands) => match config_commands {
            ConfigCommands::CreateDefault => {
                log::debug!("Creating default config");
                let path = Config::create_default()?;
                println!("Config at {}", path.display());
            }
            ConfigCommands::Path => match Config::config_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("No default config path found"),
            },
        },
        Commands::Playlists => {
            let database = open_database(&config).await?;
            let playlists = PlaylistService::new(database).list().await?;
            if playlists.is_empty() {
                println!("No playlists yet");
            }
            for (playlist, track_count) in playlists {
                println!("{:>5}  {} ({} tracks)", playlist.id, playlist.name, track_count);
            }
        }
        Commands::Remote { platform } => {
            run_platform_action(&config, platform, PlatformAction::Remote).await?;
        }
        Commands::Import {
            platform,
            playlist_id,
            name,
            into,
        } => {
            run_platform_action(
                &config,
                platform,
                PlatformAction::Import {
                    playlist_id,
                    name,
                    into,
                },
            )
            .await?;
        }
        Commands::Export {
            platform,
            playlist_id,
            to,
            name,
        } => {
            run_platform_action(
                &config,
                platform,
                PlatformAction::Export {
                    playlist_id,
                    to,
                    name,
                },
            )
            .await?;
        }
        Commands::Preview {
            platform,
            playlist_id,
        } => {
            run_platform_action(&config, platform, PlatformAction::Preview { playlist_id })
                .await?;
        }
        Commands::Sync {
            platform,
            playlist_id,
            direction,
            apply,
        } => {
            run_platform_action(
                &config,
                platform,
                PlatformAction::Sync {
                    playlist_id,
                    direction,
                    apply,
                },
            )
            .await?;
        }
    }

    Ok(())
}

async fn open_database(config: &Config) -> Result<Arc<Database>> {
    log::debug!("Opening database at: {}", config.database_path().display());
    Ok(Arc::new(Database::open(&config.database_path()).await?))
}

fn build_guard(config: &Config) -> Option<Arc<SafetyGuard>> {
    let safety = config.safety.as_ref()?;
    let level = safety
        .level
        .as_deref()
        .and_then(SafetyLevel::parse)
        .unwrap_or(SafetyLevel::TestOnly);

    let mut guard =
        SafetyGuard::new(safety.markers.clone(), level).with_dry_run(safety.dry_run);
    if let Some(max) = safety.max_test_playlists {
        guard = guard.with_max_test_playlists(max);
    }
    Some(Arc::new(guard))
}

/// Build the client for the chosen platform and hand off to the generic
/// runner. Platforms without a client implementation fail here.
async fn run_platform_action(
    config: &Config,
    platform: Platform,
    action: PlatformAction,
) -> Result<()> {
    let database = open_database(config).await?;

    match platform {
        Platform::Spotify => {
            let client = SpotifyClient::new(
                &config.spotify_config()?,
                TtlCache::new(PLAYLIST_CACHE_TTL),
            );
            let service = build_service(database, client, config);
            run_action(action, &service).await
        }
        Platform::Youtube => {
            let client = YoutubeClient::new(&config.youtube_config()?);
            let service = build_service(database, client, config);
            run_action(action, &service).await
        }
        other => Err(eyre!("no client implemented for platform: {other}")),
    }
}

fn build_service<C: PlatformClient>(
    database: Arc<Database>,
    client: C,
    config: &Config,
) -> SyncService<C> {
    let service = SyncService::new(database, client);
    match build_guard(config) {
        Some(guard) => service.with_guard(guard),
        None => service,
    }
}

async fn run_action<C: PlatformClient>(
    action: PlatformAction,
    service: &SyncService<C>,
) -> Result<()> {
    match action {
        PlatformAction::Remote => {
            let playlists = service.client().get_all_playlists().await?;
            for playlist in playlists {
                let ownership = if playlist.is_owner { "owned" } else { "shared" };
                println!(
                    "{}  {} ({} tracks, {})",
                    playlist.id, playlist.name, playlist.track_count, ownership
                );
            }
        }
        PlatformAction::Import {
            playlist_id,
            name,
            into,
        } => {
            let report = service
                .import_playlist(&playlist_id, name.as_deref(), into)
                .await?;
            println!(
                "Imported '{}' ({} tracks, {} new here, {} new in Collection)",
                report.playlist.name,
                report.tracks.len(),
                report.added_to_playlist,
                report.added_to_collection
            );
        }
        PlatformAction::Export {
            playlist_id,
            to,
            name,
        } => {
            let remote_id = service
                .export_playlist(playlist_id, to.as_deref(), name.as_deref())
                .await?;
            println!("Exported playlist {playlist_id} -> {remote_id}");
        }
        PlatformAction::Preview { playlist_id } => {
            let changes = service.get_sync_changes(playlist_id).await?;
            if changes.is_empty() {
                println!("In sync, nothing to do");
                return Ok(());
            }
            let kind = if changes.is_personal { "personal" } else { "shared" };
            println!(
                "Playlist {} <-> {} {} ({})",
                changes.playlist_id, changes.platform, changes.platform_playlist_id, kind
            );
            for change in &changes.changes {
                let label = match change.change_type {
                    ChangeType::PlatformAddition => "+ local ",
                    ChangeType::PlatformRemoval => "- local ",
                    ChangeType::LibraryAddition => "+ remote",
                    ChangeType::LibraryRemoval => "- remote",
                };
                println!("  [{:>3}] {label} {}", change.id, change.title);
            }
        }
        PlatformAction::Sync {
            playlist_id,
            direction,
            apply,
        } => {
            let summary = service
                .sync_playlist(playlist_id, direction.into(), apply)
                .await?;
            println!(
                "{} additions, {} removals",
                summary.additions, summary.removals
            );
            match summary.result {
                Some(result) => {
                    println!(
                        "Applied {} ({} skipped, {} failed)",
                        result.applied,
                        result.skipped,
                        result.errors.len()
                    );
                    for error in &result.errors {
                        println!("  failed: {error}");
                    }
                }
                None => println!("Run again with --apply to apply them"),
            }
        }
    }

    Ok(())
}
