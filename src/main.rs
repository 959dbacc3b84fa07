//src/main.rs
mod cli; // Keep cli module for parsing args

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Local, NaiveDate, Weekday};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use std::io::{self, stdout};
use std::time::Duration;
use strum::IntoEnumIterator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gymlog::{
    calendar, convert_from_kg, AddEquipmentParams, AppService, DayCell, EditEquipmentParams,
    EquipmentOverview, LoadedImage, LogSetParams, MonthView, Muscle, SetInfo, WeekStart,
    WeightUnit,
};

const IMAGE_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gymlog={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

const fn unit_from_cli(unit: cli::UnitCli) -> WeightUnit {
    match unit {
        cli::UnitCli::Kg => WeightUnit::Kg,
        cli::UnitCli::Lb => WeightUnit::Lb,
    }
}

fn header_color(service: &AppService) -> Color {
    gymlog::parse_color(&service.config.theme.header_color)
        .map(Color::from)
        .unwrap_or(Color::Green) // Fallback
}

fn new_table(headers: &[&str], color: Color) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(h).fg(color)));
    table
}

fn main() -> Result<()> {
    // --- Check for completion generation request FIRST ---
    let cli_args = cli::parse_args(); // Parse arguments once
    let export_csv = cli_args.export_csv;
    init_tracing(cli_args.verbose);

    if let cli::Commands::GenerateCompletion { shell } = cli_args.command {
        let mut cmd = cli::build_cli_command(); // Get the command structure
        let bin_name = cmd.get_name().to_string(); // Get the binary name

        eprintln!("Generating completion script for {}...", shell); // Print to stderr
        clap_complete::generate(shell, &mut cmd, bin_name, &mut stdout()); // Print script to stdout
        return Ok(()); // Exit after generating script
    }

    // Initialize the application service (loads config, opens the store)
    let mut service =
        AppService::initialize().context("Failed to initialize application service")?;

    match cli_args.command {
        cli::Commands::GenerateCompletion { .. } => {
            // This case is handled above, but keep it exhaustive
            unreachable!("Completion generation should have exited already");
        }
        cli::Commands::Muscle(cmd) => run_muscle(&mut service, cmd, export_csv)?,
        cli::Commands::Equipment(cmd) => run_equipment(&mut service, cmd, export_csv)?,
        cli::Commands::Location(cmd) => run_location(&mut service, cmd, export_csv)?,
        cli::Commands::Log(cmd) => run_log(&mut service, cmd, export_csv)?,
        cli::Commands::Calendar {
            year,
            month,
            offset,
        } => {
            let today = Local::now().date_naive();
            let current = service.calendar_month(today);
            let target = match (year, month, offset) {
                (_, Some(m), _) => {
                    let y = year.unwrap_or(today.year());
                    gymlog::CalendarMonth::jump_to(y, m, service.config.week_start.into())
                        .with_context(|| format!("Invalid month {y}-{m:02}"))?
                }
                (_, None, Some(n)) => {
                    let reference = calendar::shift_month(current.reference, n)
                        .with_context(|| format!("Month offset {n} is out of range"))?;
                    service.calendar_month(reference)
                }
                _ => current,
            };
            let view = service.month_view(target);
            print_month(&view, &service, today);
        }
        cli::Commands::Unit { unit } => match unit {
            Some(u) => {
                let unit = unit_from_cli(u);
                service.set_preferred_unit(unit);
                println!("Preferred weight unit set to {unit}.");
            }
            None => {
                let options: Vec<String> = WeightUnit::iter().map(|u| u.to_string()).collect();
                println!(
                    "Preferred weight unit: {} (options: {})",
                    service.preferred_unit(),
                    options.join(", ")
                );
            }
        },
        cli::Commands::SetWeekStart { week_start } => {
            let week_start = match week_start {
                cli::WeekStartCli::Sunday => WeekStart::Sunday,
                cli::WeekStartCli::Monday => WeekStart::Monday,
            };
            service.set_week_start(week_start)?;
            println!("Calendar weeks now start on {week_start:?}.");
        }
        cli::Commands::SetDoubleTap { millis } => {
            service.set_double_tap_window(millis)?;
            println!("Double tap window set to {} ms.", millis);
        }
        cli::Commands::DbPath => {
            println!("Database file is located at: {:?}", service.get_db_path());
        }
        cli::Commands::ConfigPath => {
            println!("Config file is located at: {:?}", service.get_config_path());
        }
    }

    Ok(())
}

// --- Muscles ---

fn run_muscle(service: &mut AppService, cmd: cli::MuscleCommands, export_csv: bool) -> Result<()> {
    match cmd {
        cli::MuscleCommands::Add { name, color } => {
            let id = service.add_muscle(&name, color.as_deref())?;
            println!("Added muscle '{}' (ID: {})", name.trim(), id);
        }
        cli::MuscleCommands::List => {
            let muscles = service.store.muscles();
            if muscles.is_empty() && !export_csv {
                println!("No muscles defined. Use 'muscle add' or 'muscle seed'.");
            } else if export_csv {
                print_muscle_csv(muscles)?;
            } else {
                print_muscle_table(muscles, header_color(service));
            }
        }
        cli::MuscleCommands::Edit {
            identifier,
            name,
            color,
        } => {
            if name.is_none() && color.is_none() {
                bail!("Nothing to change. Pass --name and/or --color.");
            }
            service.edit_muscle(&identifier, name.as_deref(), color.as_deref())?;
            println!("Updated muscle '{}'.", identifier);
        }
        cli::MuscleCommands::Delete { identifier } => {
            let removed = service.delete_muscle(&identifier)?;
            println!("Deleted muscle '{}'.", removed.name);
        }
        cli::MuscleCommands::AddSub {
            muscle,
            name,
            color,
        } => {
            let id = service.add_sub_muscle(&muscle, &name, color.as_deref())?;
            println!("Added sub-muscle '{}' to '{}' (ID: {})", name.trim(), muscle, id);
        }
        cli::MuscleCommands::DeleteSub { muscle, sub_muscle } => {
            service.delete_sub_muscle(&muscle, &sub_muscle)?;
            println!("Deleted sub-muscle '{}' from '{}'.", sub_muscle, muscle);
        }
        cli::MuscleCommands::Seed => {
            if service.store.seed_default_muscles() {
                println!("Added the starter muscle taxonomy.");
            } else {
                println!("Muscles already defined; nothing seeded.");
            }
        }
    }
    Ok(())
}

// --- Equipment ---

fn run_equipment(
    service: &mut AppService,
    cmd: cli::EquipmentCommands,
    export_csv: bool,
) -> Result<()> {
    match cmd {
        cli::EquipmentCommands::Add {
            name,
            muscle,
            sub_muscle,
            fields,
        } => {
            let id = service.add_equipment(AddEquipmentParams {
                name: &name,
                main_muscle: &muscle,
                sub_muscle: sub_muscle.as_deref(),
                location: fields.location.as_deref(),
                personal_record: fields.pr,
                unit: fields.unit.map(unit_from_cli),
            })?;
            println!("Added equipment '{}' (ID: {})", name.trim(), id);
        }
        cli::EquipmentCommands::List {
            location,
            check_images,
        } => {
            let rows = service.equipment_overview(location.as_deref());
            if export_csv {
                print_equipment_csv(&rows, service.preferred_unit())?;
            } else if rows.is_empty() {
                println!("No equipment found.");
            } else {
                let image_status = if check_images {
                    Some(check_equipment_images(service)?)
                } else {
                    None
                };
                print_equipment_table(
                    &rows,
                    service.preferred_unit(),
                    header_color(service),
                    image_status.as_ref(),
                );
            }
        }
        cli::EquipmentCommands::Show { identifier } => {
            let equipment = service.resolve_equipment(&identifier)?.clone();
            let unit = service.preferred_unit();
            println!("{} (ID: {})", equipment.name, equipment.id);
            if let Some(pr) = equipment.personal_record {
                println!("Personal record: {:.1} {}", convert_from_kg(pr, unit), unit);
            }
            let history = service.store.sets_for_equipment(equipment.id);
            if history.is_empty() {
                println!("No training logged yet.");
            } else {
                let mut table = new_table(
                    &["Date", "Set ID", "Sets", "Time"],
                    header_color(service),
                );
                for (date, set) in history {
                    table.add_row(vec![
                        Cell::new(date.format("%Y-%m-%d")),
                        Cell::new(set.id),
                        Cell::new(format_sets(&set.sets, unit)),
                        Cell::new(set.sets.first().map_or("-".to_string(), SetInfo::time_label)),
                    ]);
                }
                println!("{table}");
            }
        }
        cli::EquipmentCommands::Edit {
            identifier,
            name,
            muscle,
            sub_muscle,
            clear_pr,
            fields,
        } => {
            let new_personal_record = if clear_pr { Some(None) } else { fields.pr.map(Some) };
            let new_sub_muscle = sub_muscle
                .as_deref()
                .map(|s| if s.trim().is_empty() { None } else { Some(s) });
            service.edit_equipment(
                &identifier,
                EditEquipmentParams {
                    new_name: name.as_deref(),
                    new_main_muscle: muscle.as_deref(),
                    new_sub_muscle,
                    new_location: fields.location.as_deref(),
                    new_personal_record,
                    unit: fields.unit.map(unit_from_cli),
                },
            )?;
            println!("Updated equipment '{}'.", identifier);
        }
        cli::EquipmentCommands::Delete { identifier } => {
            let removed = service.delete_equipment(&identifier)?;
            println!("Deleted equipment '{}'.", removed.name);
        }
        cli::EquipmentCommands::SetImage { identifier, path } => {
            let name = service.set_equipment_image(&identifier, &path)?;
            println!("Stored image as '{}' for '{}'.", name, identifier);
        }
        cli::EquipmentCommands::ClearImage { identifier } => {
            if service.clear_equipment_image(&identifier)? {
                println!("Removed image from '{}'.", identifier);
            } else {
                println!("'{}' has no image.", identifier);
            }
        }
    }
    Ok(())
}

fn check_equipment_images(
    service: &AppService,
) -> Result<std::collections::HashMap<gymlog::EquipmentId, &'static str>> {
    let mut loader = service.image_loader()?;
    let loaded = loader.wait_for(IMAGE_CHECK_TIMEOUT, |id| service.store.equipment(id).is_some());
    let status = loaded
        .into_iter()
        .map(|(id, image)| {
            let label = match image {
                LoadedImage::Ready { .. } => "ok",
                LoadedImage::Placeholder => "unreadable",
            };
            (id, label)
        })
        .collect();
    Ok(status)
}

// --- Locations ---

fn run_location(
    service: &mut AppService,
    cmd: cli::LocationCommands,
    export_csv: bool,
) -> Result<()> {
    match cmd {
        cli::LocationCommands::Add { name } => {
            service.add_location(&name)?;
            println!("Added location '{}'.", name.trim());
        }
        cli::LocationCommands::List => {
            let locations = service.store.locations();
            if export_csv {
                let mut writer = csv::Writer::from_writer(io::stdout());
                writer.write_record(["Location", "Equipment"])?;
                for location in locations {
                    let count = service.equipment_overview(Some(location.as_str())).len();
                    writer.write_record(&[location.clone(), count.to_string()])?;
                }
                writer.flush()?;
            } else if locations.is_empty() {
                println!("No locations defined.");
            } else {
                let mut table = new_table(&["Location", "Equipment"], header_color(service));
                for location in locations {
                    let count = service.equipment_overview(Some(location.as_str())).len();
                    table.add_row(vec![Cell::new(location), Cell::new(count)]);
                }
                println!("{table}");
            }
        }
        cli::LocationCommands::Rename { old, new } => {
            let moved = service.rename_location(&old, &new)?;
            println!(
                "Renamed location '{}' to '{}' ({} equipment updated).",
                old,
                new.trim(),
                moved
            );
        }
        cli::LocationCommands::Delete { name } => {
            let removed = service.delete_location(&name)?;
            println!("Deleted location '{}'.", removed);
        }
    }
    Ok(())
}

// --- Training log ---

fn run_log(service: &mut AppService, cmd: cli::LogCommands, export_csv: bool) -> Result<()> {
    let today = Local::now().date_naive();
    match cmd {
        cli::LogCommands::Add {
            equipment,
            weight,
            reps,
            sets,
            unit,
            date,
            time,
        } => {
            let logged = service.log_sets(LogSetParams {
                equipment_identifier: &equipment,
                date: date.unwrap_or(today),
                time: Some(time.unwrap_or_else(|| Local::now().time())),
                reps,
                weight,
                unit: unit.map(unit_from_cli),
                set_count: sets,
            })?;
            println!("Logged {} set(s) on '{}' (set ID: {}).", sets, equipment, logged.set_id);
            if let Some(pr) = logged.new_personal_record {
                let unit = service.preferred_unit();
                println!(
                    "*** New personal record: {:.1} {} ***",
                    convert_from_kg(pr, unit),
                    unit
                );
            }
        }
        cli::LogCommands::Show { date } => {
            let date = date.unwrap_or(today);
            let entries = service.day_entries(date);
            let unit = service.preferred_unit();
            if export_csv {
                print_history_csv(service, Some(date), None)?;
            } else if entries.is_empty() {
                println!("Nothing logged on {}.", date.format("%Y-%m-%d"));
            } else {
                println!("Training on {}", date.format("%A, %Y-%m-%d"));
                let mut table = new_table(
                    &["Set ID", "Equipment", "Sets", "Time"],
                    header_color(service),
                );
                for entry in entries {
                    table.add_row(vec![
                        Cell::new(entry.set_id),
                        Cell::new(entry.equipment_name.as_deref().unwrap_or("(deleted equipment)")),
                        Cell::new(format_sets(&entry.sets, unit)),
                        Cell::new(entry.sets.first().map_or("-".to_string(), SetInfo::time_label)),
                    ]);
                }
                println!("{table}");
            }
        }
        cli::LogCommands::DeleteSet { id } => {
            service.delete_training_set(&id)?;
            println!("Deleted training set {}.", id);
        }
        cli::LogCommands::ClearDay { date } => {
            let removed = service.clear_day(date)?;
            println!(
                "Removed {} training set(s) logged on {}.",
                removed,
                date.format("%Y-%m-%d")
            );
        }
        cli::LogCommands::History { equipment } => {
            let equipment_id = equipment
                .as_deref()
                .map(|e| service.resolve_equipment(e).map(|eq| eq.id))
                .transpose()?;
            if export_csv {
                print_history_csv(service, None, equipment_id)?;
            } else {
                print_history_table(service, equipment_id);
            }
        }
    }
    Ok(())
}

fn format_sets(sets: &[SetInfo], unit: WeightUnit) -> String {
    sets.iter()
        .map(|s| format!("{} x {:.1} {}", s.reps, convert_from_kg(s.weight, unit), unit))
        .collect::<Vec<_>>()
        .join(", ")
}

fn history_rows(
    service: &AppService,
    only_date: Option<NaiveDate>,
    only_equipment: Option<gymlog::EquipmentId>,
) -> Vec<(NaiveDate, String, SetInfo)> {
    let mut rows = Vec::new();
    for log in service.store.training_logs() {
        if only_date.is_some_and(|d| d != log.date) {
            continue;
        }
        for set in log.sets.iter().filter(|s| only_equipment.map_or(true, |e| e == s.equipment)) {
            let name = service
                .store
                .equipment(set.equipment)
                .map_or_else(|| "(deleted equipment)".to_string(), |e| e.name.clone());
            for info in &set.sets {
                rows.push((log.date, name.clone(), info.clone()));
            }
        }
    }
    rows
}

fn print_history_table(service: &AppService, only_equipment: Option<gymlog::EquipmentId>) {
    let rows = history_rows(service, None, only_equipment);
    if rows.is_empty() {
        println!("No training logged yet.");
        return;
    }
    let unit = service.preferred_unit();
    let weight_header = format!("Weight ({unit})");
    let mut table = new_table(
        &["Date", "Time", "Equipment", "Reps", weight_header.as_str()],
        header_color(service),
    );
    for (date, name, info) in rows {
        table.add_row(vec![
            Cell::new(date.format("%Y-%m-%d")),
            Cell::new(info.time_label()),
            Cell::new(name),
            Cell::new(info.reps),
            Cell::new(format!("{:.1}", convert_from_kg(info.weight, unit))),
        ]);
    }
    println!("{table}");
}

fn print_history_csv(
    service: &AppService,
    only_date: Option<NaiveDate>,
    only_equipment: Option<gymlog::EquipmentId>,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    let unit = service.preferred_unit();

    // Write header
    writer.write_record([
        "Date",
        "Time",
        "Equipment",
        "Reps",
        format!("Weight_{}", unit).as_str(),
        "Entered_Unit",
    ])?;

    for (date, name, info) in history_rows(service, only_date, only_equipment) {
        writer.write_record(&[
            date.format("%Y-%m-%d").to_string(),
            info.time_label(),
            name,
            info.reps.to_string(),
            format!("{:.2}", convert_from_kg(info.weight, unit)),
            info.weight_unit.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

// --- Table Printing Functions ---

fn print_muscle_table(muscles: &[Muscle], header_color: Color) {
    let mut table = new_table(&["ID", "Name", "Color", "Sub-muscles"], header_color);
    for muscle in muscles {
        let subs = muscle
            .sub_muscles
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(muscle.id),
            Cell::new(&muscle.name),
            Cell::new(&muscle.color),
            Cell::new(if subs.is_empty() { "-".to_string() } else { subs }),
        ]);
    }
    println!("{table}");
}

fn print_muscle_csv(muscles: &[Muscle]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record(["ID", "Muscle", "Color", "Sub_Muscle", "Sub_Color"])?;
    for muscle in muscles {
        if muscle.sub_muscles.is_empty() {
            writer.write_record(&[
                muscle.id.to_string(),
                muscle.name.clone(),
                muscle.color.clone(),
                String::new(),
                String::new(),
            ])?;
        }
        for sub in &muscle.sub_muscles {
            writer.write_record(&[
                muscle.id.to_string(),
                muscle.name.clone(),
                muscle.color.clone(),
                sub.name.clone(),
                sub.color.clone(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn print_equipment_table(
    rows: &[EquipmentOverview],
    unit: WeightUnit,
    header_color: Color,
    image_status: Option<&std::collections::HashMap<gymlog::EquipmentId, &'static str>>,
) {
    let pr_header = format!("PR ({unit})");
    let mut table = new_table(
        &["ID", "Name", "Muscle", "Sub-muscle", "Location", pr_header.as_str(), "Sets", "Image"],
        header_color,
    );
    for row in rows {
        let eq = &row.equipment;
        let image = match (&eq.image_name, image_status) {
            (None, _) => "-".to_string(),
            (Some(_), Some(status)) => status.get(&eq.id).copied().unwrap_or("pending").to_string(),
            (Some(name), None) => name.clone(),
        };
        table.add_row(vec![
            Cell::new(eq.id),
            Cell::new(&eq.name).add_attribute(Attribute::Bold),
            Cell::new(row.muscle_name.as_deref().unwrap_or("?")),
            Cell::new(row.sub_muscle_name.as_deref().unwrap_or("-")),
            Cell::new(if eq.location.is_empty() { "-" } else { eq.location.as_str() }),
            Cell::new(
                eq.personal_record
                    .map_or("-".to_string(), |pr| format!("{:.1}", convert_from_kg(pr, unit))),
            ),
            Cell::new(row.logged_sets),
            Cell::new(image),
        ]);
    }
    println!("{table}");
}

fn print_equipment_csv(rows: &[EquipmentOverview], unit: WeightUnit) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());

    // Write header
    writer.write_record([
        "ID",
        "Name",
        "Muscle",
        "Sub_Muscle",
        "Location",
        format!("PR_{}", unit).as_str(),
        "Logged_Sets",
        "Image",
    ])?;

    for row in rows {
        let eq = &row.equipment;
        writer.write_record(&[
            eq.id.to_string(),
            eq.name.clone(),
            row.muscle_name.clone().unwrap_or_default(),
            row.sub_muscle_name.clone().unwrap_or_default(),
            eq.location.clone(),
            eq.personal_record
                .map_or(String::new(), |pr| format!("{:.2}", convert_from_kg(pr, unit))),
            row.logged_sets.to_string(),
            eq.image_name.clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Sun => "Sun",
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
    }
}

/// Prints the month grid; days with entries are colored, today is bold.
fn print_month(view: &MonthView, service: &AppService, today: NaiveDate) {
    let logged_color = gymlog::parse_color(&service.config.theme.logged_day_color)
        .map(Color::from)
        .unwrap_or(Color::Yellow);
    let headers = calendar::weekday_headers(view.month.week_start);
    let labels: Vec<&str> = headers.iter().map(|d| weekday_label(*d)).collect();
    let mut table = new_table(&labels, header_color(service));

    for week in calendar::rows(&view.cells) {
        table.add_row(week.iter().map(|cell| match cell {
            DayCell::Blank => Cell::new(""),
            DayCell::Day { day, date } => {
                let mut c = Cell::new(day);
                if view.has_entries(cell) {
                    c = c.fg(logged_color);
                }
                if *date == today {
                    c = c.add_attribute(Attribute::Bold);
                }
                c
            }
        }));
    }

    println!("{}", view.month.title());
    println!("{table}");
    println!(
        "{} day(s) with training this month.",
        view.logged_days.len()
    );
}
