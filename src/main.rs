use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use album_shelf_lib::{
    AlbumDraft, AppConfig, CoverLookup, DialogResult, HostShell, ModalOutcome, ModalRequest,
    MusicbrainzCredentials, MusicbrainzLookup, Shelf, SlotPosition, SortMethod, SortOptions,
    SortOrder, ThemeColors,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "album_shelf_lib=info,album_shelf=info";

#[derive(Parser, Debug)]
#[command(name = "album-shelf", about = "Browse an album collection from the terminal")]
struct CliArgs {
    /// Directory holding collection.json, options.json and cached covers.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Config file to use instead of the platform default.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Never query MusicBrainz for covers.
    #[arg(long)]
    offline: bool,
}

fn prompt(label: &str) -> Option<String> {
    print!("{label}");
    io::stdout().flush().ok()?;
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

fn prompt_with_default(label: &str, current: &str) -> Option<String> {
    let answer = prompt(&format!("{label} [{current}]: "))?;
    Some(if answer.is_empty() {
        current.to_string()
    } else {
        answer
    })
}

fn print_theme(theme: &ThemeColors) {
    println!("  (accent {}, text {})", theme.accent, theme.text);
}

/// Dialogs rendered as prompts on stdin/stdout.
struct ConsoleHost;

#[async_trait]
impl HostShell for ConsoleHost {
    async fn open_modal(&self, request: ModalRequest) -> ModalOutcome {
        match request {
            ModalRequest::Add { theme } => {
                println!("Add album");
                print_theme(&theme);
                let Some(title) = prompt("  title: ").filter(|t| !t.is_empty()) else {
                    return ModalOutcome::Cancelled;
                };
                let artist = prompt("  artist: ").unwrap_or_default();
                let year = prompt("  year: ").unwrap_or_default();
                ModalOutcome::Add(AlbumDraft::new(title, artist, year))
            }
            ModalRequest::Focus { album, theme } => {
                println!("{} - {} ({})", album.artist_name, album.album_title, album.year);
                println!("  cover: {}", album.cover_path.display());
                print_theme(&theme);
                match prompt("  [e]dit, [d]elete, enter to close: ").as_deref() {
                    Some("e") => ModalOutcome::Edit,
                    Some("d") => ModalOutcome::Delete,
                    _ => ModalOutcome::Cancelled,
                }
            }
            ModalRequest::Edit { album, theme } => {
                println!("Edit {}", album.album_title);
                print_theme(&theme);
                let (Some(title), Some(artist), Some(year)) = (
                    prompt_with_default("  title", &album.album_title),
                    prompt_with_default("  artist", &album.artist_name),
                    prompt_with_default("  year", &album.year),
                ) else {
                    return ModalOutcome::Cancelled;
                };
                let cover = match prompt("  replacement cover PNG (empty to keep): ") {
                    Some(path) if !path.is_empty() => match std::fs::read(&path) {
                        Ok(bytes) => Some(bytes),
                        Err(error) => {
                            eprintln!("could not read {path}: {error}");
                            return ModalOutcome::Cancelled;
                        }
                    },
                    _ => None,
                };
                match prompt("  [s]ave, [d]elete, enter to cancel: ").as_deref() {
                    Some("s") => ModalOutcome::Save {
                        draft: AlbumDraft::new(title, artist, year),
                        cover,
                    },
                    Some("d") => ModalOutcome::Delete,
                    _ => ModalOutcome::Cancelled,
                }
            }
        }
    }

    async fn alert(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

fn render(shelf: &Shelf) {
    let slots = shelf.visible();
    if slots.is_empty() {
        println!("(empty collection, type `add` to add an album)");
        return;
    }
    for (position, album) in slots {
        let marker = if position == SlotPosition::Center { ">" } else { " " };
        println!(
            "{marker} {} - {} ({})",
            album.artist_name, album.album_title, album.year
        );
    }
    if let Some(query) = shelf.active_search() {
        println!("  search: {query} ({} results)", shelf.len());
    }
}

fn parse_sort(args: &str) -> Option<SortOptions> {
    let mut words = args.split_whitespace();
    let method = match words.next()? {
        "artist" => SortMethod::Artist,
        "year" => SortMethod::Year,
        "date" | "dateAdded" => SortMethod::DateAdded,
        _ => return None,
    };
    let order = match words.next() {
        None | Some("asc") => SortOrder::Ascending,
        Some("desc") => SortOrder::Descending,
        Some(_) => return None,
    };
    Some(SortOptions::new(method, order))
}

fn print_stats(shelf: &Shelf) {
    let stats = shelf.stats();
    println!("albums: {}", stats.size);
    println!("artists: {}", stats.artist_count);
    if let Some(artist) = &stats.top_artist {
        println!("top artist: {artist} ({} albums)", stats.top_artist_count);
    }
    if let (Some(min), Some(max)) = (stats.min_year, stats.max_year) {
        println!("spans {min} to {max}");
    }
    for (decade, count) in &stats.albums_by_decade {
        println!("  {decade}s: {count}");
    }
}

fn report(result: Result<DialogResult, album_shelf_lib::LibraryError>) {
    match result {
        Ok(DialogResult::Added(album)) => println!("added {}", album.album_title),
        Ok(DialogResult::Updated(album)) => println!("saved {}", album.album_title),
        Ok(DialogResult::Deleted { is_empty: true }) => println!("deleted, collection is now empty"),
        Ok(DialogResult::Deleted { .. }) => println!("deleted"),
        Ok(DialogResult::Cancelled) | Err(_) => {}
    }
}

const HELP: &str = "commands: next [n], prev [n], search <query>, clear, \
sort <artist|year|date> [asc|desc], shuffle, add, open, stats, help, quit";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(io::stderr)
        .init();

    let args = CliArgs::parse();
    let config = AppConfig::resolve(args.data_dir.as_deref(), args.config.as_deref())
        .context("failed to resolve configuration")?;

    let lookup: Option<Arc<dyn CoverLookup>> = if args.offline {
        None
    } else {
        match MusicbrainzLookup::new(&MusicbrainzCredentials::from_env(), config.lookup_timeout) {
            Ok(lookup) => Some(Arc::new(lookup)),
            Err(error) => {
                warn!(%error, "cover lookup unavailable");
                None
            }
        }
    };

    let shelf = Shelf::open(&config, lookup).with_context(|| {
        format!("failed to open collection in {}", config.data_dir.display())
    })?;
    let host = ConsoleHost;

    println!("{HELP}");
    render(&shelf);
    while let Some(line) = prompt("> ") {
        let (command, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let rest = rest.trim();
        let steps = rest.parse::<isize>().unwrap_or(1);
        match command {
            "" => continue,
            "next" | "n" => shelf.step_by(steps),
            "prev" | "p" => shelf.step_by(-steps),
            "search" | "/" => {
                shelf.search(rest);
            }
            "clear" => shelf.clear_search(),
            "sort" => match parse_sort(rest) {
                Some(options) => {
                    if let Err(error) = shelf.set_sort(options) {
                        eprintln!("error: {error}");
                    }
                }
                None => println!("usage: sort <artist|year|date> [asc|desc]"),
            },
            "shuffle" => report(shelf.shuffle_via_dialog(&host).await),
            "add" => report(shelf.add_via_dialog(&host).await),
            "open" | "focus" => match shelf.focused() {
                Some(album) => report(shelf.focus_via_dialog(&host, album).await),
                None => println!("nothing to open"),
            },
            "stats" => {
                print_stats(&shelf);
                continue;
            }
            "help" => {
                println!("{HELP}");
                continue;
            }
            "quit" | "q" | "exit" => break,
            other => {
                println!("unknown command `{other}`");
                continue;
            }
        }
        render(&shelf);
    }

    Ok(())
}
