//! Administrative CLI for pagestore files.

use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pagestore::{DEFAULT_PAGE_SIZE, FileManager, PageId, ScanReport};
use prettytable::{Table, row};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "pagestore", version, about = "Inspect and maintain pagestore files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty store file
    Create {
        path: PathBuf,

        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, help = "Page size in bytes")]
        page_size: u32,

        #[arg(long, default_value_t = 0, help = "Pages to preallocate onto the free list")]
        reserve: u64,
    },
    /// Print the file header
    Info {
        path: PathBuf,

        #[arg(long, help = "Print as JSON")]
        json: bool,
    },
    /// Check every page checksum and the free list
    Verify {
        path: PathBuf,

        #[arg(long, help = "Print the report as JSON")]
        json: bool,
    },
}

#[derive(Serialize)]
struct StoreInfo {
    path: PathBuf,
    version: u32,
    page_size: u32,
    page_count: u64,
    free_list_head: Option<PageId>,
    free_pages: usize,
}

#[derive(Serialize)]
struct VerifyOutput {
    #[serde(flatten)]
    report: ScanReport,
    pages_by_type: BTreeMap<String, u64>,
}

fn main() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pagestore=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the store is readable but damaged
fn run(cli: Cli) -> Result<bool, Box<dyn Error>> {
    match cli.command {
        Command::Create {
            path,
            page_size,
            reserve,
        } => {
            let fm = FileManager::create(&path, page_size)?;
            fm.extend(reserve)?;
            fm.close_file()?;
            println!("created {} ({page_size} byte pages)", path.display());
            Ok(true)
        }
        Command::Info { path, json } => {
            let fm = FileManager::open(&path)?;
            let header = fm.header()?;
            let info = StoreInfo {
                path,
                version: header.version,
                page_size: header.page_size,
                page_count: header.page_count,
                free_list_head: header.free_list_head,
                free_pages: fm.free_page_count()?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                let mut table = Table::new();
                table.add_row(row!["path", info.path.display()]);
                table.add_row(row!["version", info.version]);
                table.add_row(row!["page size", info.page_size]);
                table.add_row(row!["page count", info.page_count]);
                let head = info
                    .free_list_head
                    .map_or_else(|| "none".to_string(), |id| id.to_string());
                table.add_row(row!["free list head", head]);
                table.add_row(row!["free pages", info.free_pages]);
                table.printstd();
            }
            Ok(true)
        }
        Command::Verify { path, json } => {
            let fm = FileManager::open(&path)?;
            let mut pages_by_type = BTreeMap::new();
            let report = fm.for_each_page(|_, _, page_type| {
                *pages_by_type.entry(page_type.to_string()).or_insert(0u64) += 1;
            })?;
            let clean = report.is_clean();

            if json {
                let output = VerifyOutput {
                    report,
                    pages_by_type,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(clean);
            }

            let mut table = Table::new();
            table.set_titles(row!["page type", "count"]);
            for (page_type, count) in &pages_by_type {
                table.add_row(row![page_type, count]);
            }
            table.add_row(row!["FREE", report.free_pages]);
            table.printstd();

            if clean {
                println!("{} live pages, no corruption found", report.live_pages);
            } else {
                let mut damaged = Table::new();
                damaged.set_titles(row!["page", "problem"]);
                for page in &report.corrupted {
                    damaged.add_row(row![page.page_id, page.reason]);
                }
                damaged.printstd();
                println!("{} corrupted pages", report.corrupted.len());
            }
            Ok(clean)
        }
    }
}
