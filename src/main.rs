use clap::{Parser, Subcommand};
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};

use trivia_bracket::config::{load_config, load_env_file, log_config_warnings};
use trivia_bracket::sim::play_out;
use trivia_bracket::types::ParticipantId;
use trivia_bracket::{init_tracing, plan, BracketResult, EngineConfig, PairingPolicy, TournamentDesk};

#[derive(Parser)]
#[command(name = "trivia-bracket", about = "Single-elimination bracket planner and simulator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print rounds, byes and advancement edges for a field size
    Plan { count: u32 },
    /// Play a full in-memory tournament
    Simulate {
        count: u32,
        /// Seed for match outcomes (and pairing with --shuffle)
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Shuffle round-1 pairings below the top seed
        #[arg(long)]
        shuffle: bool,
        /// Print the final bracket rows as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    load_env_file(Path::new(".env"));
    let cli = Cli::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let _guard = init_tracing(&config);
    log_config_warnings(&config);

    let outcome = match cli.command {
        Command::Plan { count } => print_plan(count),
        Command::Simulate { count, seed, shuffle, json } => simulate(config, count, seed, shuffle, json),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn print_plan(count: u32) -> BracketResult<()> {
    let topology = plan(count)?;
    trivia_bracket::validate_structure(&topology)?;
    print!("{topology}");
    Ok(())
}

fn simulate(mut config: EngineConfig, count: u32, seed: u64, shuffle: bool, json: bool) -> BracketResult<()> {
    if shuffle {
        config.pairing = PairingPolicy::Shuffled { seed };
    }
    let desk = TournamentDesk::in_memory(config);
    let tournament = desk.create_tournament("Simulation")?;
    let names = (1..=count).map(|i| format!("Team {i}")).collect::<Vec<_>>();
    desk.register_participants(tournament.id, &names)?;
    desk.generate_brackets(tournament.id)?;
    desk.start_tournament(tournament.id)?;

    let report = play_out(&desk, tournament.id, seed)?;
    info!(tournament_id = %tournament.id, matches = report.played.len(), "simulation complete");

    if json {
        let rows = desk.bracket_rows(tournament.id)?;
        let out = serde_json::to_string_pretty(&rows)
            .map_err(|e| trivia_bracket::BracketError::Storage(e.to_string()))?;
        println!("{out}");
        return Ok(());
    }

    let participants = desk.participants(tournament.id)?;
    let name_of = |id: ParticipantId| {
        participants
            .iter()
            .find(|p| p.id == id)
            .map(|p| format!("{} (seed {})", p.name, p.seed))
            .unwrap_or_else(|| id.to_string())
    };
    for played in &report.played {
        println!("R{}M{}: {}", played.round, played.match_number, name_of(played.winner_id));
    }
    if let Some(champion) = report.champion_id {
        println!("Champion: {}", name_of(champion));
    }
    Ok(())
}
