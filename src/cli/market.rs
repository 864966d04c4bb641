use super::ui;
use crate::core::currency::BASE_CURRENCY;
use crate::core::quote::{Quote, ScreenerKind};
use crate::providers::QuoteFetcher;
use anyhow::Result;
use comfy_table::{Cell, CellAlignment, Table};
use futures::future::join_all;

fn quote_table() -> Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Name"),
        ui::header_cell(&format!("Price ({BASE_CURRENCY})")),
        ui::header_cell("Change"),
        ui::header_cell("Change %"),
        ui::header_cell("Market Cap"),
        ui::header_cell("Market"),
    ]);
    table
}

fn quote_row(quote: &Quote) -> Vec<Cell> {
    vec![
        Cell::new(&quote.symbol),
        Cell::new(&quote.display_name),
        ui::amount_cell(quote.current_price),
        ui::profit_cell(quote.absolute_change),
        ui::change_cell(quote.percent_change),
        ui::format_optional_cell(quote.market_cap, ui::format_amount),
        Cell::new(quote.market_state),
    ]
}

/// Fetches current quotes for the given symbols.
pub async fn quote(fetcher: &QuoteFetcher, symbols: &[String]) -> Result<()> {
    let pb = ui::new_progress_bar(symbols.len() as u64, false);
    let futures = symbols.iter().map(|symbol| {
        let pb = pb.clone();
        async move {
            let result = fetcher.fetch_quote(symbol).await;
            pb.inc(1);
            (symbol.to_uppercase(), result)
        }
    });
    let results = join_all(futures).await;
    pb.finish_and_clear();

    let mut table = quote_table();
    let mut errors = Vec::new();
    for (symbol, result) in &results {
        match result {
            Ok(quote) => {
                table.add_row(quote_row(quote));
            }
            Err(e) => errors.push(format!("{symbol}: {e}")),
        }
    }
    if table.row_count() > 0 {
        println!("{table}");
    }
    for error in &errors {
        println!("{}", ui::style_text(error, ui::StyleType::Error));
    }

    if errors.len() == results.len() && !results.is_empty() {
        anyhow::bail!("No quotes could be fetched");
    }
    Ok(())
}

/// Shows a predefined screener list.
pub async fn movers(fetcher: &QuoteFetcher, kind: ScreenerKind, count: usize) -> Result<()> {
    let result = fetcher.screener(kind, count).await?;

    println!("\n{}", ui::style_text(&kind.to_string(), ui::StyleType::Title));
    if result.quotes.is_empty() {
        println!("No results.");
    } else {
        let mut table = quote_table();
        for quote in &result.quotes {
            table.add_row(quote_row(quote));
        }
        println!("{table}");
    }
    if result.rejected > 0 {
        println!(
            "{}",
            ui::style_text(
                &format!("{} malformed entries were skipped", result.rejected),
                ui::StyleType::Subtle
            )
        );
    }
    Ok(())
}

/// Looks up instruments and recent headlines matching `query`.
pub async fn search(fetcher: &QuoteFetcher, query: &str) -> Result<()> {
    let result = fetcher.search(query).await?;

    if result.instruments.is_empty() {
        println!("No instruments match \"{query}\".");
    } else {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Symbol"),
            ui::header_cell("Name"),
            ui::header_cell("Exchange"),
            ui::header_cell("Type"),
        ]);
        for instrument in &result.instruments {
            table.add_row(vec![
                Cell::new(&instrument.symbol),
                Cell::new(instrument.name.as_deref().unwrap_or("")),
                Cell::new(instrument.exchange.as_deref().unwrap_or("")),
                Cell::new(instrument.quote_type.as_deref().unwrap_or("")),
            ]);
        }
        println!("{table}");
    }

    if !result.news.is_empty() {
        ui::print_separator();
        println!("{}", ui::style_text("News", ui::StyleType::Title));
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Published (UTC)"),
            ui::header_cell("Headline"),
            ui::header_cell("Publisher"),
        ]);
        for headline in &result.news {
            table.add_row(vec![
                Cell::new(
                    headline
                        .published_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default(),
                )
                .set_alignment(CellAlignment::Left),
                Cell::new(&headline.title),
                Cell::new(headline.publisher.as_deref().unwrap_or("")),
            ]);
        }
        println!("{table}");
    }
    Ok(())
}
