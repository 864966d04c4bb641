use super::ui;
use crate::core::ledger::{Accepted, Ledger, TradeKind, TradeRequest};
use anyhow::Result;
use chrono::Utc;
use comfy_table::Cell;
use rust_decimal::Decimal;

/// Records a BUY or SELL at the current market price and prints the
/// resulting position.
pub async fn run(
    ledger: &Ledger,
    account_id: &str,
    symbol: &str,
    quantity: Decimal,
    kind: TradeKind,
) -> Result<()> {
    let request = TradeRequest::new(account_id, symbol, quantity, kind, Utc::now());
    let accepted = ledger.apply_transaction(request).await?;
    display_accepted(&accepted);
    Ok(())
}

fn display_accepted(accepted: &Accepted) {
    let tx = &accepted.transaction;
    println!(
        "\n{} {} {} @ {} (transaction #{})",
        ui::style_text(&tx.kind.to_string(), ui::StyleType::TotalLabel),
        ui::format_quantity(tx.signed_quantity.abs()),
        ui::style_text(&tx.symbol, ui::StyleType::Title),
        ui::format_amount(tx.unit_price),
        tx.id
    );

    let entry = &accepted.entry;
    let delta = &accepted.delta;
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell(""),
        ui::header_cell("Position"),
        ui::header_cell("Change"),
    ]);
    table.add_row(vec![
        Cell::new("Holding"),
        Cell::new(ui::format_quantity(entry.holding_quantity)),
        Cell::new(ui::format_quantity(delta.holding_change)),
    ]);
    table.add_row(vec![
        Cell::new("Cost basis"),
        ui::amount_cell(entry.cost_basis_total),
        ui::profit_cell(delta.cost_basis_change),
    ]);
    table.add_row(vec![
        Cell::new("Average cost"),
        ui::amount_cell(entry.average_cost),
        Cell::new(""),
    ]);
    table.add_row(vec![
        Cell::new("Realized gain"),
        ui::profit_cell(entry.realized_gain),
        ui::profit_cell(delta.realized_gain_change),
    ]);
    println!("{table}");
}
