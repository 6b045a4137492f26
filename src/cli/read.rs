//! read-table and read-pdf commands.

use std::path::{Path, PathBuf};

use console::style;

use super::helpers::{print_json, App};
use crate::decode::{
    parse_page_range, DecodedPdf, PageContent, PdfQuery, RowFilter, TableQuery,
};

pub struct TableArgs {
    pub sheet: Option<String>,
    pub filter: Option<String>,
    pub column: Option<String>,
    pub max_rows: usize,
}

impl TableArgs {
    fn into_query(self) -> anyhow::Result<TableQuery> {
        let filter = match (self.filter, self.column) {
            (Some(value), Some(column)) => Some(RowFilter::on(column, value)),
            (Some(value), None) => Some(RowFilter::new(value)),
            (None, Some(_)) => anyhow::bail!("--column requires --filter"),
            (None, None) => None,
        };
        Ok(TableQuery {
            sheet: self.sheet,
            filter,
            max_rows: self.max_rows,
        })
    }
}

pub async fn cmd_read_table(
    app: &App,
    key: &str,
    args: TableArgs,
    json: bool,
) -> anyhow::Result<()> {
    let query = args.into_query()?;
    let filter = query.filter.clone();
    let table = app.monitor.read_table(key, query).await?;

    if json {
        return print_json(&table);
    }

    println!("{}", style(table.summary(filter.as_ref())).dim());
    println!();
    println!("{}", table.to_markdown());
    if table.available_sheets.len() > 1 {
        println!();
        println!(
            "{} {}",
            style("Sheets:").dim(),
            style(table.available_sheets.join(", ")).dim()
        );
    }
    Ok(())
}

pub struct PdfArgs {
    pub pages: Option<String>,
    pub search: Option<String>,
    pub section: Option<String>,
    pub text_only: bool,
    pub image_dir: Option<PathBuf>,
}

pub async fn cmd_read_pdf(app: &App, key: &str, args: PdfArgs, json: bool) -> anyhow::Result<()> {
    if let Some(range) = &args.pages {
        parse_page_range(range, 0)?;
    }
    let query = PdfQuery {
        page_range: args.pages,
        search_term: args.search,
        section: args.section,
        text_only: args.text_only,
    };
    let pdf = app.monitor.read_pdf(key, query).await?;

    if let Some(dir) = &args.image_dir {
        let written = write_images(&pdf, key, dir)?;
        if !json {
            for path in &written {
                eprintln!("{} wrote {}", style("✓").green(), path.display());
            }
        }
    }

    if json {
        return print_json(&pdf);
    }

    println!(
        "{}",
        style(format!(
            "{} page(s) of {}",
            pdf.pages.len(),
            pdf.total_pages
        ))
        .dim()
    );
    println!();
    print!("{}", pdf.render_text());
    if let Some(next) = pdf.next_page {
        println!(
            "{} continue with --pages {}-",
            style("→").cyan(),
            next
        );
    }
    Ok(())
}

/// Save every image page as `<key>-p<N>.png` under `dir`.
fn write_images(pdf: &DecodedPdf, key: &str, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for page in &pdf.pages {
        if let PageContent::Image(image) = &page.content {
            std::fs::create_dir_all(dir)?;
            let path = dir.join(format!("{}-p{}.png", key, page.page_number));
            std::fs::write(&path, &image.png)?;
            written.push(path);
        }
    }
    Ok(written)
}
