use super::ui;
use crate::core::ledger::{Ledger, LedgerEntry, ReplayMismatch};
use anyhow::Result;
use chrono::Utc;
use comfy_table::{Cell, CellAlignment};

/// Lists open positions, then closed positions that still carry a realized
/// gain.
pub async fn holdings(ledger: &Ledger, account_id: &str) -> Result<()> {
    let entries = ledger.entries(account_id).await?;
    if entries.is_empty() {
        println!("No holdings recorded for account {account_id}.");
        return Ok(());
    }

    println!(
        "\nAccount: {}",
        ui::style_text(account_id, ui::StyleType::Title)
    );

    let now = Utc::now();
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Name"),
        ui::header_cell("Quantity"),
        ui::header_cell("Prev. Session"),
        ui::header_cell("Avg. Cost"),
        ui::header_cell("Cost Basis"),
        ui::header_cell("Realized"),
    ]);

    let (open, closed): (Vec<&LedgerEntry>, Vec<&LedgerEntry>) =
        entries.iter().partition(|e| e.is_active());
    for entry in open.iter().chain(closed.iter()) {
        let name = ledger
            .instrument(&entry.symbol)
            .await?
            .map(|p| p.name)
            .unwrap_or_default();
        let symbol = if entry.is_active() {
            Cell::new(&entry.symbol)
        } else {
            Cell::new(ui::style_text(&entry.symbol, ui::StyleType::Subtle))
        };
        table.add_row(vec![
            symbol,
            Cell::new(name),
            Cell::new(ui::format_quantity(entry.holding_quantity))
                .set_alignment(CellAlignment::Right),
            Cell::new(ui::format_quantity(
                entry.previous_day_holding_at(now, ledger.calendar()),
            ))
            .set_alignment(CellAlignment::Right),
            ui::amount_cell(entry.average_cost),
            ui::amount_cell(entry.cost_basis_total),
            ui::profit_cell(entry.realized_gain),
        ]);
    }

    let invested = open.iter().map(|e| e.cost_basis_total).sum();
    let realized = entries.iter().map(|e| e.realized_gain).sum();
    table.add_row(vec![
        Cell::new(ui::style_text("Total", ui::StyleType::TotalLabel)),
        Cell::new(""),
        Cell::new(""),
        Cell::new(""),
        Cell::new(""),
        ui::total_cell(invested),
        ui::profit_cell(realized),
    ]);
    println!("{table}");
    Ok(())
}

/// Prints the account's transaction log, oldest first.
pub async fn transactions(ledger: &Ledger, account_id: &str) -> Result<()> {
    let records = ledger.transactions(account_id).await?;
    if records.is_empty() {
        println!("No transactions recorded for account {account_id}.");
        return Ok(());
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("#"),
        ui::header_cell("Time (UTC)"),
        ui::header_cell("Type"),
        ui::header_cell("Symbol"),
        ui::header_cell("Quantity"),
        ui::header_cell("Price"),
        ui::header_cell("Amount"),
    ]);
    for record in &records {
        table.add_row(vec![
            Cell::new(record.id),
            Cell::new(record.timestamp.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(record.kind),
            Cell::new(&record.symbol),
            Cell::new(ui::format_quantity(record.signed_quantity))
                .set_alignment(CellAlignment::Right),
            ui::amount_cell(record.unit_price),
            ui::amount_cell(record.signed_quantity.abs() * record.unit_price),
        ]);
    }
    println!("{table}");
    Ok(())
}

/// Replays the transaction log and reports entries that disagree with it.
pub async fn verify(ledger: &Ledger, account_id: &str) -> Result<()> {
    let mismatches = ledger.verify(account_id).await?;
    if mismatches.is_empty() {
        println!(
            "{}",
            ui::style_text(
                &format!("Ledger for {account_id} matches its transaction log."),
                ui::StyleType::TotalValue
            )
        );
        return Ok(());
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Stored Qty"),
        ui::header_cell("Replayed Qty"),
        ui::header_cell("Stored Cost"),
        ui::header_cell("Replayed Cost"),
    ]);
    for mismatch in &mismatches {
        table.add_row(mismatch_row(mismatch));
    }
    println!("{table}");
    anyhow::bail!(
        "{} ledger entries for {} disagree with the transaction log",
        mismatches.len(),
        account_id
    )
}

fn mismatch_row(mismatch: &ReplayMismatch) -> Vec<Cell> {
    let quantity = |e: &Option<LedgerEntry>| e.as_ref().map(|e| e.holding_quantity);
    let cost = |e: &Option<LedgerEntry>| e.as_ref().map(|e| e.cost_basis_total);
    vec![
        Cell::new(&mismatch.symbol),
        ui::format_optional_cell(quantity(&mismatch.stored), ui::format_quantity),
        ui::format_optional_cell(quantity(&mismatch.replayed), ui::format_quantity),
        ui::format_optional_cell(cost(&mismatch.stored), ui::format_amount),
        ui::format_optional_cell(cost(&mismatch.replayed), ui::format_amount),
    ]
}
