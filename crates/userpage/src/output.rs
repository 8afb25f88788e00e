use std::io::Write;

use anyhow::Result;
use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Table, row};

use crate::render::RenderedItem;

pub fn print_json(items: &[RenderedItem]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, items)?;
    writeln!(stdout)?;
    Ok(())
}

/// One line per item, in the order they were requested.
pub fn format_pretty(items: &[RenderedItem]) -> String {
    let lines: Vec<_> = items
        .iter()
        .map(|item| match item {
            RenderedItem::Loaded { id, user } => {
                format!("{id}: {} (id {})", user.first_name, user.id)
            }
            RenderedItem::Failed { id, error } => format!("{id}: failed: {error}"),
        })
        .collect();
    lines.join("\n")
}

pub fn print_pretty(items: &[RenderedItem]) {
    println!("{}", format_pretty(items));
}

fn compact_table(items: &[RenderedItem]) -> Table {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "Id", "User Id", "First Name", "Error"]);

    for item in items {
        match item {
            RenderedItem::Loaded { id, user } => {
                table.add_row(row![id, r->user.id, user.first_name, ""]);
            }
            RenderedItem::Failed { id, error } => {
                table.add_row(row![id, "", "", error]);
            }
        }
    }

    table
}

pub fn print_compact(items: &[RenderedItem]) {
    if items.is_empty() {
        return;
    }
    compact_table(items).printstd();
}
