use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use morsel_core::mirror::LogView;
use morsel_core::service::MorselService;
use morsel_core::totals::Totals;

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Logged")]
    logged: String,
    #[tabled(rename = "Food")]
    name: String,
    #[tabled(rename = "Calories")]
    calories: String,
    #[tabled(rename = "Protein")]
    protein: String,
    #[tabled(rename = "Fat")]
    fat: String,
    #[tabled(rename = "Carbs")]
    carbs: String,
    #[tabled(rename = "Fiber")]
    fiber: String,
}

fn format_timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "?".to_string())
}

fn entry_table(view: &LogView) -> Table {
    let rows: Vec<EntryRow> = view
        .entries
        .iter()
        .map(|e| EntryRow {
            id: e.id.clone(),
            logged: format_timestamp(e.created_at),
            name: e.name.clone(),
            calories: format!("{:.0}", e.calories),
            protein: format!("{:.0}g", e.protein),
            fat: format!("{:.0}g", e.fat),
            carbs: format!("{:.0}g", e.carbs),
            fiber: format!("{:.0}g", e.fiber),
        })
        .collect();

    let mut table = Table::new(&rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()));
    table
}

fn totals_line(totals: &Totals) -> String {
    format!(
        "TOTAL: {:.0} kcal | P:{:.0}g F:{:.0}g C:{:.0}g Fb:{:.0}g",
        totals.calories, totals.protein, totals.fat, totals.carbs, totals.fiber
    )
}

/// Subscribe, wait for the first snapshot, release the subscription.
async fn first_view(service: &mut MorselService) -> Result<LogView> {
    service.start()?;
    let view = service
        .next_view()
        .await
        .context("Entry feed closed before the first snapshot")?;
    service.stop();
    Ok(view)
}

pub(crate) async fn cmd_list(service: &mut MorselService, json: bool) -> Result<()> {
    let view = first_view(service).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view.entries)?);
        return Ok(());
    }

    if view.entries.is_empty() {
        eprintln!("No entries logged");
        process::exit(2);
    }

    println!("{}", entry_table(&view));
    println!("{}", totals_line(&view.totals));
    Ok(())
}

pub(crate) async fn cmd_totals(service: &mut MorselService, json: bool) -> Result<()> {
    let view = first_view(service).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view.totals)?);
        return Ok(());
    }

    let count = view.entries.len();
    println!("{count} entries");
    println!("{}", totals_line(&view.totals));
    Ok(())
}

pub(crate) async fn cmd_watch(service: &mut MorselService) -> Result<()> {
    service.start()?;
    println!("Watching the food log (ctrl-c to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            view = service.next_view() => match view {
                Some(view) => {
                    println!();
                    if view.entries.is_empty() {
                        println!("(no entries)");
                    } else {
                        println!("{}", entry_table(&view));
                    }
                    println!("{}", totals_line(&view.totals));
                }
                None => {
                    eprintln!("Feed closed; no further updates");
                    break;
                }
            }
        }
    }

    service.stop();
    Ok(())
}
