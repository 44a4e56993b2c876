//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use meter_lib::runtime::ContainerDetails;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

#[derive(Tabled)]
struct DetailsRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&ContainerDetails> for DetailsRow {
    fn from(details: &ContainerDetails) -> Self {
        Self {
            id: short_id(&details.id).to_string(),
            name: details.name.clone().unwrap_or_else(|| "-".to_string()),
            image: details.image.clone().unwrap_or_else(|| "-".to_string()),
            status: color_status(details.status.as_deref().unwrap_or("unknown")),
        }
    }
}

/// Print inspected container details
pub fn print_details(details: &ContainerDetails, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let table = Table::new([DetailsRow::from(details)])
                .with(Style::rounded())
                .to_string();
            println!("{}", table);
        }
        OutputFormat::Json => match serde_json::to_string_pretty(details) {
            Ok(json) => println!("{}", json),
            Err(e) => print_error(&format!("Failed to encode details: {}", e)),
        },
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Docker-style 12 character id
fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Color status based on value
fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "running" => status.green().to_string(),
        "created" | "restarting" | "paused" => status.yellow().to_string(),
        "exited" | "dead" | "removing" => status.red().to_string(),
        _ => status.to_string(),
    }
}
