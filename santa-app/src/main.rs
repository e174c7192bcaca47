use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use santa_app::audio::{AudioSession, CommandPlayback};
use santa_app::countdown::{next_christmas, remaining_until, Countdown};
use santa_app::{AppState, DrawReport, FileStore};
use santa_core::{KeyValueStore, BLOCKED_MESSAGE};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Secret Santa draw, kept on this machine.
#[derive(Parser, Debug)]
#[command(name = "santa", version, about, long_about = None)]
struct Args {
    /// JSON file holding participants, results and audio settings
    #[arg(long, env = "SANTA_STORE_PATH", default_value = "santa-state.json")]
    store: PathBuf,

    /// Command used to loop the track, e.g. "mpv --loop --volume={volume}"
    #[arg(long, env = "SANTA_AUDIO_PLAYER")]
    player: Option<String>,

    /// Background track
    #[arg(long, env = "SANTA_AUDIO_TRACK", default_value = "christmas-loop.mp3")]
    track: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add one or more participants
    Add {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Remove the participant at a 1-based position
    Remove { position: usize },
    /// List participants
    List,
    /// Draw a new assignment
    Draw {
        /// Seed for a reproducible draw
        #[arg(long)]
        seed: Option<u64>,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the current results
    Results,
    /// Clear participants and results
    Clear,
    /// Clear results only
    ClearResults,
    /// Background music
    Music {
        #[command(subcommand)]
        action: MusicAction,
    },
    /// Time left until Christmas
    Countdown {
        /// Print once instead of ticking every second
        #[arg(long)]
        once: bool,
    },
    /// Interactive session
    Shell,
}

#[derive(Subcommand, Debug)]
enum MusicAction {
    /// Start the loop and keep playing until interrupted
    On {
        #[arg(long)]
        volume: Option<f32>,
    },
    Off,
    Volume { value: f32 },
    Status,
}

type Session = AudioSession<CommandPlayback, FileStore>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let store = FileStore::open(&args.store);
    debug!(path = %store.path().display(), "using store");
    let mut state = AppState::load(store.clone());
    let mut session = AudioSession::load(
        store,
        CommandPlayback::new(args.player.as_deref(), &args.track),
    );

    match args.command {
        Command::Add { names } => {
            for name in names {
                add(&mut state, &name);
            }
        }
        Command::Remove { position } => remove(&mut state, position)?,
        Command::List => list(&state),
        Command::Draw { seed, json } => {
            let report = draw(&mut state, seed);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Command::Results => print_results(&state),
        Command::Clear => {
            state.clear_participants();
            println!("Liste et résultats effacés.");
        }
        Command::ClearResults => {
            state.clear_results();
            println!("Résultats effacés.");
        }
        Command::Music { action } => music(&mut session, action).await?,
        Command::Countdown { once } => countdown(once).await?,
        Command::Shell => shell(&mut state, &mut session).await?,
    }

    Ok(())
}

fn add<S: KeyValueStore>(state: &mut AppState<S>, name: &str) {
    if state.add_participant(name) {
        println!("+ {}", name.trim());
    }
}

fn remove<S: KeyValueStore>(state: &mut AppState<S>, position: usize) -> Result<()> {
    let Some(index) = position.checked_sub(1) else {
        bail!("positions start at 1");
    };
    let removed = state.remove_participant(index)?;
    println!("- {removed}");
    Ok(())
}

fn list<S: KeyValueStore>(state: &AppState<S>) {
    if state.participants().is_empty() {
        println!("Aucun participant pour le moment");
        return;
    }
    for (i, name) in state.participants().iter().enumerate() {
        println!("{:>3}. {name}", i + 1);
    }
}

fn draw<S: KeyValueStore>(state: &mut AppState<S>, seed: Option<u64>) -> DrawReport {
    let mut rng = seed
        .map(ChaCha8Rng::seed_from_u64)
        .unwrap_or_else(ChaCha8Rng::from_entropy);
    state.draw(&mut rng)
}

fn print_report(report: &DrawReport) {
    match report {
        DrawReport::Drawn { lines } => {
            for line in lines {
                println!("🎁 {line}");
            }
        }
        DrawReport::TooFewParticipants => println!("{}", santa_core::TOO_FEW_MESSAGE),
        DrawReport::Blocked => println!("{BLOCKED_MESSAGE}"),
    }
}

fn print_results<S: KeyValueStore>(state: &AppState<S>) {
    if state.results().is_empty() {
        println!("Pas encore de tirage.");
        return;
    }
    for line in state.results() {
        println!("{line}");
    }
}

async fn music(session: &mut Session, action: MusicAction) -> Result<()> {
    match action {
        MusicAction::On { volume } => {
            if session.enable(volume).await.is_err() {
                println!("Musique indisponible, on continue sans.");
                return Ok(());
            }
            println!(
                "Musique en cours ({}%). Ctrl-C pour arrêter.",
                percent(session.volume())
            );
            tokio::signal::ctrl_c()
                .await
                .context("waiting for interrupt")?;
            session.stop_playback();
        }
        MusicAction::Off => {
            session.disable();
            println!("Musique coupée.");
        }
        MusicAction::Volume { value } => {
            session.set_volume(value);
            println!("Volume : {}%", percent(session.volume()));
        }
        MusicAction::Status => print_music_status(session),
    }
    Ok(())
}

fn print_music_status(session: &Session) {
    let pref = session
        .preference()
        .map(|p| p.as_str())
        .unwrap_or("non choisie");
    println!("Musique : {pref}, volume {}%", percent(session.volume()));
}

fn percent(volume: f32) -> u32 {
    (volume * 100.0).round() as u32
}

async fn countdown(once: bool) -> Result<()> {
    let now = Local::now();
    let target = next_christmas(&now);
    if once {
        println!("Noël dans {}", remaining_until(&target, &now));
        return Ok(());
    }

    let ticker = Countdown::start(target, |remaining| {
        print!("\rNoël dans {remaining}   ");
        let _ = std::io::stdout().flush();
    });
    tokio::select! {
        _ = ticker.finished() => println!("\nJoyeux Noël ! 🎄"),
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for interrupt")?;
            println!();
        }
    }
    Ok(())
}

const SHELL_HELP: &str = "\
commandes :
  add <nom>          ajouter un participant
  rm <n>             retirer le participant n
  list               afficher les participants
  draw               lancer le tirage
  results            afficher les résultats
  clear              effacer la liste et les résultats
  clear-results      effacer les résultats
  music on|off       activer ou couper la musique
  volume <0-100>     régler le volume
  countdown          temps restant avant Noël
  quit               quitter";

async fn shell(state: &mut AppState<FileStore>, session: &mut Session) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    if session.needs_prompt() {
        println!("Ce programme peut jouer une musique en boucle.");
        println!("Poursuivre avec musique ? [o/N]");
        let answer = lines.next_line().await?.unwrap_or_default();
        if matches!(answer.trim(), "o" | "O" | "oui" | "y" | "yes") {
            if session.enable(None).await.is_err() {
                println!("Musique indisponible, on continue sans.");
            }
        } else {
            session.disable();
        }
    }

    println!("{SHELL_HELP}");
    let mut first_gesture = true;
    loop {
        print!("🎄 > ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if first_gesture {
            session.resume_if_enabled().await;
            first_gesture = false;
        }

        let line = line.trim();
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match cmd {
            "" => {}
            "add" => add(state, rest),
            "rm" | "remove" => match rest.parse::<usize>() {
                Ok(position) => {
                    if let Err(err) = remove(state, position) {
                        println!("{err}");
                    }
                }
                Err(_) => println!("usage : rm <n>"),
            },
            "list" | "ls" => list(state),
            "draw" => {
                let report = draw(state, None);
                print_report(&report);
            }
            "results" => print_results(state),
            "clear" => state.clear_participants(),
            "clear-results" => state.clear_results(),
            "music" => match rest {
                "on" => {
                    if session.enable(None).await.is_err() {
                        println!("Musique indisponible.");
                    }
                }
                "off" => session.disable(),
                _ => print_music_status(session),
            },
            "volume" => match rest.parse::<f32>() {
                Ok(v) => {
                    session.set_volume(v / 100.0);
                    println!("Volume : {}%", percent(session.volume()));
                }
                Err(_) => println!("usage : volume <0-100>"),
            },
            "countdown" => countdown(true).await?,
            "help" | "?" => println!("{SHELL_HELP}"),
            "quit" | "exit" | "q" => break,
            other => println!("commande inconnue : {other}"),
        }
    }

    session.stop_playback();
    Ok(())
}
