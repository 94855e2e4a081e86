use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use crossbot_core::PuzzleType;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "crossbot", version, about = "Crossbot puzzle time tracker")]
struct Cli {
    /// Puzzle type: mini, crossword or sudoku
    #[arg(long, short, global = true, default_value = "mini")]
    puzzle: PuzzleType,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record, remove and list times
    Times {
        #[command(subcommand)]
        action: commands::times::TimesAction,
    },
    /// Participation streaks
    Streaks {
        #[command(subcommand)]
        action: commands::streaks::StreaksAction,
    },
    /// Fastest users on a date
    Winners {
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Win streaks that are live on a date
    WinStreaks {
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Number of wins per user over a date range
    Wins {
        #[arg(long)]
        start: NaiveDate,
        /// Defaults to today
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Smoothed normalized scores over a date range
    Scores {
        #[arg(long)]
        start: NaiveDate,
        /// Defaults to today
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Overrides `scoring.smoothing` from the config
        #[arg(long)]
        smooth: Option<f64>,
    },
    /// Skill and difficulty rating model
    Model {
        #[command(subcommand)]
        action: commands::model::ModelAction,
    },
    /// Daily announcement
    Announce {
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// User accounts
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let puzzle = cli.puzzle;
    let result = match cli.command {
        Commands::Times { action } => commands::times::run(action, puzzle),
        Commands::Streaks { action } => commands::streaks::run(action, puzzle),
        Commands::Winners { date } => commands::leaderboard::winners(puzzle, date),
        Commands::WinStreaks { date } => commands::leaderboard::win_streaks(puzzle, date),
        Commands::Wins { start, end } => commands::leaderboard::wins(puzzle, start, end),
        Commands::Scores { start, end, smooth } => {
            commands::scores::run(puzzle, start, end, smooth)
        }
        Commands::Model { action } => commands::model::run(action, puzzle),
        Commands::Announce { date } => commands::announce::run(puzzle, date),
        Commands::User { action } => commands::user::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
