// src/cli.rs
use chrono::{Duration, Local, NaiveDate, NaiveTime};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Track gym equipment and daily training sets", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Print lists as CSV instead of tables
    #[arg(long, global = true)]
    pub export_csv: bool,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

pub fn parse_date_shorthand(s: &str) -> Result<NaiveDate, String> {
    match s.to_lowercase().as_str() {
        "today" => Ok(Local::now().date_naive()),
        "yesterday" => Ok((Local::now() - Duration::days(1)).date_naive()),
        _ => {
            // Try parsing YYYY-MM-DD first
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                Ok(date)
            }
            // Try parsing DD.MM.YYYY next
            else if let Ok(date) = NaiveDate::parse_from_str(s, "%d.%m.%Y") {
                Ok(date)
            }
            // Try parsing YYYY/MM/DD
            else if let Ok(date) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
                Ok(date)
            } else {
                Err(format!(
                    "Invalid date format: '{}'. Use 'today', 'yesterday', YYYY-MM-DD, DD.MM.YYYY, or YYYY/MM/DD.",
                    s
                ))
            }
        }
    }
}

pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, String> {
    if s.eq_ignore_ascii_case("now") {
        return Ok(Local::now().time());
    }
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| format!("Invalid time: '{}'. Use HH:MM (24h) or 'now'.", s))
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitCli {
    Kg,
    Lb,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeekStartCli {
    Sunday,
    Monday,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the muscle taxonomy
    #[command(subcommand)]
    Muscle(MuscleCommands),
    /// Manage equipment
    #[command(subcommand)]
    Equipment(EquipmentCommands),
    /// Manage training locations
    #[command(subcommand)]
    Location(LocationCommands),
    /// Log and review training sets
    #[command(subcommand)]
    Log(LogCommands),
    /// Show a month with the days that have entries highlighted
    Calendar {
        #[arg(long, requires = "month")]
        year: Option<i32>,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
        /// Months relative to the current one (e.g. -1 for last month)
        #[arg(long, allow_hyphen_values = true, conflicts_with_all = &["year", "month"])]
        offset: Option<i32>,
    },
    /// Show or set the preferred display unit for weights
    Unit {
        #[arg(value_enum)]
        unit: Option<UnitCli>,
    },
    /// Set the first day of the calendar week
    SetWeekStart {
        #[arg(value_enum)]
        week_start: WeekStartCli,
    },
    /// Set how quickly a second tap on a calendar day counts as a double tap
    SetDoubleTap {
        /// Window in milliseconds (1-5000)
        millis: u64,
    },
    /// Show the path to the database file
    DbPath,
    /// Show the path to the config file
    ConfigPath,
    GenerateCompletion {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum MuscleCommands {
    /// Add a muscle group
    Add {
        name: String,
        /// Hex color, e.g. "#FF3B30"
        #[arg(short, long)]
        color: Option<String>,
    },
    /// List muscles with their sub-muscles
    List,
    /// Rename a muscle or change its color
    Edit {
        identifier: String, // name or id
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        color: Option<String>,
    },
    Delete {
        identifier: String,
    },
    /// Add a sub-muscle to a muscle
    AddSub {
        muscle: String,
        name: String,
        #[arg(short, long)]
        color: Option<String>,
    },
    DeleteSub {
        muscle: String,
        sub_muscle: String,
    },
    /// Fill an empty taxonomy with a starter set of muscles
    Seed,
}

#[derive(Args, Debug)]
pub struct EquipmentFields {
    /// Personal record weight
    #[arg(long)]
    pub pr: Option<f64>,
    /// Unit of --pr (defaults to the preferred unit)
    #[arg(long, value_enum)]
    pub unit: Option<UnitCli>,
    #[arg(short, long)]
    pub location: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum EquipmentCommands {
    Add {
        name: String,
        /// Main muscle (name or id)
        #[arg(short, long)]
        muscle: String,
        #[arg(short, long)]
        sub_muscle: Option<String>,
        #[command(flatten)]
        fields: EquipmentFields,
    },
    List {
        /// Only equipment at this location
        #[arg(short, long)]
        location: Option<String>,
        /// Load images and report which ones are usable
        #[arg(long)]
        check_images: bool,
    },
    /// Show one equipment with its training history
    Show {
        identifier: String,
    },
    Edit {
        identifier: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        muscle: Option<String>,
        /// New sub-muscle; pass an empty string to clear it
        #[arg(short, long)]
        sub_muscle: Option<String>,
        /// Clear the personal record
        #[arg(long, conflicts_with = "pr")]
        clear_pr: bool,
        #[command(flatten)]
        fields: EquipmentFields,
    },
    Delete {
        identifier: String,
    },
    /// Attach a photo to the equipment
    SetImage {
        identifier: String,
        path: PathBuf,
    },
    ClearImage {
        identifier: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum LocationCommands {
    Add { name: String },
    List,
    Rename { old: String, new: String },
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
pub enum LogCommands {
    /// Log sets done on one equipment
    Add {
        /// Equipment name or id
        equipment: String,
        #[arg(short, long)]
        weight: f64,
        /// Repetitions per set (defaults to the last value used)
        #[arg(short, long)]
        reps: Option<u32>,
        /// Number of identical sets
        #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=100))]
        sets: u32,
        /// Unit of --weight (defaults to the last unit used)
        #[arg(short, long, value_enum)]
        unit: Option<UnitCli>,
        /// Date of the training (defaults to today)
        #[arg(short, long, value_parser = parse_date_shorthand)]
        date: Option<NaiveDate>,
        /// Time of day, HH:MM
        #[arg(short, long, value_parser = parse_time_of_day)]
        time: Option<NaiveTime>,
    },
    /// Show the entries of a day
    Show {
        #[arg(short, long, value_parser = parse_date_shorthand)]
        date: Option<NaiveDate>,
    },
    /// Delete one training set by id
    DeleteSet { id: String },
    /// Delete everything logged on a day
    ClearDay {
        #[arg(short, long, value_parser = parse_date_shorthand)]
        date: NaiveDate,
    },
    /// Print all training history
    History {
        /// Only this equipment
        #[arg(short, long)]
        equipment: Option<String>,
    },
}

// Function to parse CLI arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

pub fn build_cli_command() -> clap::Command {
    Cli::command()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        build_cli_command().debug_assert();
    }

    #[test]
    fn parses_log_add() {
        let cli = Cli::try_parse_from([
            "gymlog", "log", "add", "Bench Press", "-w", "60", "-r", "10", "--date", "2024-05-07",
            "--time", "18:30",
        ])
        .unwrap();
        match cli.command {
            Commands::Log(LogCommands::Add {
                equipment,
                weight,
                reps,
                sets,
                date,
                time,
                ..
            }) => {
                assert_eq!(equipment, "Bench Press");
                assert_eq!(weight, 60.0);
                assert_eq!(reps, Some(10));
                assert_eq!(sets, 1);
                assert_eq!(date, NaiveDate::from_ymd_opt(2024, 5, 7));
                assert_eq!(time, NaiveTime::from_hms_opt(18, 30, 0));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn date_shorthand_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(parse_date_shorthand("2024-03-09"), Ok(expected));
        assert_eq!(parse_date_shorthand("09.03.2024"), Ok(expected));
        assert_eq!(parse_date_shorthand("2024/03/09"), Ok(expected));
        assert!(parse_date_shorthand("March 9").is_err());
    }

    #[test]
    fn set_count_is_bounded() {
        let parse = |sets: &str| {
            Cli::try_parse_from(["gymlog", "log", "add", "Bench Press", "-w", "60", "-s", sets])
        };
        assert!(parse("100").is_ok());
        assert!(parse("0").is_err());
        assert!(parse("4000000000").is_err());
    }

    #[test]
    fn calendar_offset_accepts_negative_values() {
        let cli = Cli::try_parse_from(["gymlog", "calendar", "--offset", "-2"]).unwrap();
        assert!(matches!(cli.command, Commands::Calendar { offset: Some(-2), .. }));
    }
}
