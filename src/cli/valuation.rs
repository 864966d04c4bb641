use super::ui;
use crate::core::currency::{BASE_CURRENCY, RateCache};
use crate::core::period::SnapshotSeries;
use crate::core::valuation::{ValuationReport, ValuationService};
use anyhow::Result;
use comfy_table::{Cell, CellAlignment};
use rust_decimal::Decimal;
use tracing::warn;

/// Resolves the factor to present base-currency amounts in `currency`,
/// falling back to the base currency when no rate is available.
async fn display_factor(rates: &RateCache, currency: &str) -> (Decimal, String) {
    match rates.get(currency).await {
        Some(factor) => (factor, currency.to_uppercase()),
        None => {
            warn!(
                "No rate for display currency {}, showing {}",
                currency, BASE_CURRENCY
            );
            (Decimal::ONE, BASE_CURRENCY.to_string())
        }
    }
}

/// Values the account, records its snapshots and prints the breakdown.
pub async fn valuation(
    service: &ValuationService,
    rates: &RateCache,
    account_id: &str,
    display_currency: &str,
) -> Result<()> {
    let report = service.compute_valuation(account_id).await?;
    let (factor, currency) = display_factor(rates, display_currency).await;
    display_report(&report, factor, &currency);
    Ok(())
}

fn display_report(report: &ValuationReport, factor: Decimal, currency: &str) {
    println!(
        "\nAccount: {} ({})",
        ui::style_text(&report.account_id, ui::StyleType::Title),
        currency
    );

    if report.holdings.is_empty() {
        println!("No open positions.");
    } else {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Symbol"),
            ui::header_cell("Name"),
            ui::header_cell("Quantity"),
            ui::header_cell("Price"),
            ui::header_cell("Value"),
            ui::header_cell("Invested"),
            ui::header_cell("Overall P/L"),
            ui::header_cell("Today P/L"),
            ui::header_cell("Weight"),
        ]);

        for holding in &report.holdings {
            table.add_row(vec![
                Cell::new(&holding.symbol),
                Cell::new(&holding.name),
                Cell::new(ui::format_quantity(holding.quantity))
                    .set_alignment(CellAlignment::Right),
                ui::amount_cell(holding.price * factor),
                ui::amount_cell(holding.current_value * factor),
                ui::amount_cell(holding.cost_basis * factor),
                ui::profit_cell(holding.overall_pl * factor),
                ui::profit_cell(holding.today_pl * factor),
                Cell::new(format!("{}%", ui::format_amount(holding.weight)))
                    .set_alignment(CellAlignment::Right),
            ]);
        }
        table.add_row(vec![
            Cell::new(ui::style_text("Total", ui::StyleType::TotalLabel)),
            Cell::new(""),
            Cell::new(""),
            Cell::new(""),
            ui::total_cell(report.total_valuation * factor),
            ui::total_cell(report.total_invested * factor),
            ui::profit_cell(report.overall_pl * factor),
            ui::profit_cell(report.today_pl * factor),
            Cell::new(""),
        ]);
        println!("{table}");
    }

    let mut summary = ui::new_styled_table();
    summary.set_header(vec![
        ui::header_cell("Overall Return"),
        ui::header_cell("Today"),
        ui::header_cell("Realized Gain"),
    ]);
    summary.add_row(vec![
        ui::change_cell(report.overall_pl_percent),
        ui::change_cell(report.today_pl_percent),
        ui::profit_cell(report.realized_gain * factor),
    ]);
    println!("{summary}");

    for warning in &report.warnings {
        println!(
            "{}",
            ui::style_text(&format!("Warning: {warning}"), ui::StyleType::Warning)
        );
    }
}

/// Prints the stored snapshots of one series for an account.
pub async fn history(service: &ValuationService, account_id: &str, series: SnapshotSeries) -> Result<()> {
    let snapshots = service.history(account_id, series).await?;
    if snapshots.is_empty() {
        println!("No {series} snapshots recorded for account {account_id}.");
        return Ok(());
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Period"),
        ui::header_cell(&format!("Valuation ({BASE_CURRENCY})")),
        ui::header_cell("Change"),
        ui::header_cell("Computed At (UTC)"),
    ]);

    let mut previous: Option<Decimal> = None;
    for snapshot in &snapshots {
        let change = previous.map(|p| snapshot.total_valuation - p);
        table.add_row(vec![
            Cell::new(&snapshot.period_key),
            ui::amount_cell(snapshot.total_valuation),
            change.map_or_else(|| ui::format_optional_cell(None, ui::format_amount), ui::profit_cell),
            Cell::new(snapshot.computed_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
        previous = Some(snapshot.total_valuation);
    }
    println!("{table}");
    Ok(())
}

/// Revalues every account, recording fresh snapshots for each.
pub async fn snapshot(service: &ValuationService, concurrency: usize) -> Result<()> {
    let accounts = service.accounts().await?;
    if accounts.is_empty() {
        println!("No accounts to value.");
        return Ok(());
    }

    let pb = ui::new_progress_bar(accounts.len() as u64, true);
    pb.set_message("Valuing accounts");
    let on_done = {
        let pb = pb.clone();
        move || pb.inc(1)
    };
    let mut results = service.revalue_all(concurrency, &on_done).await?;
    pb.finish_and_clear();
    results.sort_by(|a, b| a.0.cmp(&b.0));

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Account"),
        ui::header_cell(&format!("Valuation ({BASE_CURRENCY})")),
        ui::header_cell("Status"),
    ]);
    let mut failed = 0;
    for (account_id, result) in &results {
        match result {
            Ok(report) => {
                let status = if report.is_partial() {
                    ui::style_text(
                        &format!("partial ({} skipped)", report.warnings.len()),
                        ui::StyleType::Warning,
                    )
                } else {
                    "ok".to_string()
                };
                table.add_row(vec![
                    Cell::new(account_id),
                    ui::amount_cell(report.total_valuation),
                    Cell::new(status),
                ]);
            }
            Err(e) => {
                failed += 1;
                table.add_row(vec![
                    Cell::new(account_id),
                    ui::format_optional_cell(None, ui::format_amount),
                    Cell::new(ui::style_text(&e.to_string(), ui::StyleType::Error)),
                ]);
            }
        }
    }
    println!("{table}");

    if failed > 0 {
        ui::print_separator();
        println!("{failed} of {} accounts could not be valued.", results.len());
    }
    Ok(())
}
