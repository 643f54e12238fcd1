use super::{resolve_repository, Cli};
use crate::inventory::ImageRecord;
use crate::retention::{Category, Policy};
use anyhow::{Context, Result};
use chrono_humanize::HumanTime;
use clap::Args;
use comfy_table::{presets::ASCII_MARKDOWN, Cell, CellAlignment, Color, ContentArrangement};
use polyfmt::println;
use std::cmp::Reverse;

#[derive(Debug, Args, Clone)]
pub struct ImagesArgs {
    /// Only show images related to this repository: its releases, auxiliary images and dangling images.
    /// Defaults to image.repository; without either every image is shown.
    #[arg(short, long)]
    pub repository: Option<String>,
}

impl Cli {
    pub async fn images(&self, args: ImagesArgs) -> Result<()> {
        let policy = match args.repository.or_else(|| self.conf.image.repository.clone()) {
            Some(repository) if !repository.is_empty() => Some(Policy::new(
                &resolve_repository(Some(repository), &self.conf)?,
                &self.conf.retention,
            )),
            _ => None,
        };

        let inventory = self.inventory().await?;
        let mut records = inventory
            .list_images()
            .await
            .context("Could not list images")?;

        records.sort_by_key(|record| Reverse(record.created));

        let rows: Vec<(ImageRecord, Option<Category>)> = records
            .into_iter()
            .map(|record| {
                let category = policy.as_ref().map(|policy| policy.categorize(&record));
                (record, category)
            })
            .filter(|(_, category)| *category != Some(Category::Other))
            .collect();

        if rows.is_empty() {
            println!("No images found.");
            return Ok(());
        }

        let mut table = comfy_table::Table::new();
        table
            .load_preset(ASCII_MARKDOWN)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("image")
                    .set_alignment(CellAlignment::Center)
                    .fg(Color::Blue),
                Cell::new("id")
                    .set_alignment(CellAlignment::Center)
                    .fg(Color::Blue),
                Cell::new("created")
                    .set_alignment(CellAlignment::Center)
                    .fg(Color::Blue),
                Cell::new("category")
                    .set_alignment(CellAlignment::Center)
                    .fg(Color::Blue),
            ]);

        for (record, category) in rows {
            let name = match &record.reference {
                Some(reference) => reference.to_string(),
                None => crate::inventory::DANGLING_NAME.to_string(),
            };

            table.add_row(vec![
                Cell::new(name).fg(Color::Green),
                Cell::new(record.short_id()),
                Cell::new(HumanTime::from(record.created).to_string()),
                Cell::new(
                    category
                        .map(|category| category.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
            ]);
        }

        println!("{}", table);

        Ok(())
    }
}
