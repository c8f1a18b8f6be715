//! Grid Snapshot Printer
//!
//! Reads a `GridSnapshot` dumped to JSON (e.g. by a persistence adapter
//! or a test fixture) and prints it to the terminal. Useful for
//! inspecting what a bot actually persisted without standing up a
//! database client.
//!
//! ## Usage
//!
//! ```bash
//! print-grid snapshot.json
//! print-grid snapshot.json --levels 10
//! print-grid snapshot.json --format json
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use grid_core::persistence::GridSnapshot;
use grid_core::{GridSlot, Side, SlotState, SlotType};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;

#[derive(Parser)]
#[command(name = "print-grid")]
#[command(about = "Print a persisted grid snapshot", long_about = None)]
struct Args {
    /// Path to a JSON-serialized GridSnapshot.
    path: PathBuf,

    /// Number of levels to display per side.
    #[arg(short, long, default_value = "10")]
    levels: usize,

    /// Output format (pretty, compact, json).
    #[arg(short, long, default_value = "pretty")]
    format: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let contents = fs::read_to_string(&args.path)
        .with_context(|| format!("reading snapshot file {}", args.path.display()))?;
    let snapshot: GridSnapshot =
        serde_json::from_str(&contents).with_context(|| "parsing snapshot as JSON")?;

    match args.format.as_str() {
        "json" => print_json(&snapshot, args.levels),
        "compact" => print_compact(&snapshot, args.levels),
        _ => print_pretty(&snapshot, args.levels),
    }

    Ok(())
}

fn sell_levels(snapshot: &GridSnapshot) -> Vec<&GridSlot> {
    let mut sells: Vec<&GridSlot> = snapshot.slots.iter().filter(|s| s.slot_type == SlotType::Sell).collect();
    sells.sort_by(|a, b| a.price.cmp(&b.price));
    sells
}

fn buy_levels(snapshot: &GridSnapshot) -> Vec<&GridSlot> {
    let mut buys: Vec<&GridSlot> = snapshot.slots.iter().filter(|s| s.slot_type == SlotType::Buy).collect();
    buys.sort_by(|a, b| b.price.cmp(&a.price));
    buys
}

fn state_tag(state: SlotState) -> &'static str {
    match state {
        SlotState::Active => "ACT",
        SlotState::Partial => "PRT",
        SlotState::Virtual => "VIR",
    }
}

fn print_pretty(snapshot: &GridSnapshot, max_levels: usize) {
    let sells = sell_levels(snapshot);
    let buys = buy_levels(snapshot);
    let max_size = sells
        .iter()
        .chain(buys.iter())
        .map(|s| s.size.max(s.ideal_size))
        .max()
        .unwrap_or(Decimal::ZERO);

    println!();
    println!("=== Grid Snapshot (schema v{}) ===", snapshot.schema_version);
    println!("  {} sell slots, {} buy slots", sells.len(), buys.len());
    println!();

    println!("      SELL        SIZE / IDEAL      STATE   BAR");
    println!("  ──────────────────────────────────────────────────");
    for slot in sells.iter().rev().take(max_levels).collect::<Vec<_>>().into_iter().rev() {
        print_row(slot, max_size);
    }

    println!();
    println!("  ──────────────────────────────────────────────────");
    println!();

    println!("      BUY         SIZE / IDEAL      STATE   BAR");
    println!("  ──────────────────────────────────────────────────");
    for slot in buys.iter().take(max_levels) {
        print_row(slot, max_size);
    }
    println!();
}

fn print_row(slot: &GridSlot, max_size: Decimal) {
    let bar = create_ascii_bar(slot.size, max_size, 15);
    println!(
        "  {:>10.4}   {:>8.4} / {:>8.4}   {:>4}  {}",
        slot.price,
        slot.size,
        slot.ideal_size,
        state_tag(slot.state),
        bar
    );
}

fn create_ascii_bar(size: Decimal, max_size: Decimal, width: usize) -> String {
    if max_size.is_zero() {
        return " ".repeat(width);
    }
    let ratio = (size / max_size).clamp(Decimal::ZERO, Decimal::ONE);
    let filled = (ratio * Decimal::from(width)).trunc().to_usize().unwrap_or(0);
    let filled = filled.min(width);
    "#".repeat(filled) + &".".repeat(width - filled)
}

fn print_compact(snapshot: &GridSnapshot, max_levels: usize) {
    for slot in sell_levels(snapshot).iter().rev().take(max_levels).collect::<Vec<_>>().into_iter().rev() {
        println!("SELL {:>10.4}  {:>8.4}  {}", slot.price, slot.size, state_tag(slot.state));
    }
    for slot in buy_levels(snapshot).iter().take(max_levels) {
        println!("BUY  {:>10.4}  {:>8.4}  {}", slot.price, slot.size, state_tag(slot.state));
    }
}

fn print_json(snapshot: &GridSnapshot, max_levels: usize) {
    let to_json = |slot: &&GridSlot| {
        json!({
            "id": slot.id.0,
            "side": slot.side().map(|s| match s { Side::Buy => "buy", Side::Sell => "sell" }),
            "price": slot.price,
            "size": slot.size,
            "ideal_size": slot.ideal_size,
            "state": state_tag(slot.state),
        })
    };

    let sells: Vec<_> = sell_levels(snapshot).iter().take(max_levels).map(to_json).collect();
    let buys: Vec<_> = buy_levels(snapshot).iter().take(max_levels).map(to_json).collect();

    let output = json!({
        "schema_version": snapshot.schema_version,
        "sells": sells,
        "buys": buys,
    });

    println!("{}", serde_json::to_string_pretty(&output).unwrap());
}
