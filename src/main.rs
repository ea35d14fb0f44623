use std::{
    path::Path,
    time::{Duration, Instant, UNIX_EPOCH},
};

use chrono::{DateTime, Local};
use clap::Parser;
use log::info;
use mftscan::{MftFile, MftParser};
use prettytable::{row, Table};

#[derive(Debug, Parser)]
struct Arguments {
    /// Volume or image to scan, e.g. \\.\C: or ntfs.img
    volume: String,
    /// Number of largest files to display
    #[arg(long, default_value_t = 24)]
    top: usize,
    /// Write every record to a CSV file
    #[arg(long)]
    csv: Option<String>,
}

fn main() {
    env_logger::init();
    let args = Arguments::parse();

    let mut parser = match MftParser::open(Path::new(&args.volume)) {
        Ok(parser) => parser,
        Err(e) => {
            eprintln!("Error opening volume: {}", e);
            std::process::exit(1);
        }
    };

    let started = Instant::now();
    let files = match parser.read_all() {
        Ok(files) => files,
        Err(e) => {
            eprintln!("Error reading MFT: {}", e);
            std::process::exit(1);
        }
    };
    let counters = parser.counters();
    parser.close();
    info!(
        "checked {} records ({} skipped) in {:?}",
        counters.records_checked,
        counters.records_skipped,
        started.elapsed()
    );

    let file_count = files.iter().filter(|file| !file.directory).count();
    let total_size: u64 = files
        .iter()
        .filter(|file| !file.directory && file.name != "$BadClus")
        .map(|file| file.size)
        .sum();
    println!(
        "{} entries found, {} files totalling {} KiB",
        files.len(),
        file_count,
        total_size / 1024
    );

    if let Some(path) = &args.csv {
        if let Err(e) = write_csv(path, &files) {
            eprintln!("Error writing CSV: {}", e);
            std::process::exit(1);
        }
    }

    display_largest(&files, args.top);
}

fn display_largest(files: &[MftFile], top: usize) {
    let mut largest: Vec<&MftFile> = files.iter().filter(|file| !file.directory).collect();
    largest.sort_by(|a, b| b.size.cmp(&a.size));

    let mut table = Table::new();
    table.add_row(row!["Record", "Parent", "Name", "Size", "Modified"]);
    for file in largest.iter().take(top) {
        table.add_row(row![
            file.id,
            file.parent,
            file.name,
            file.size,
            format_timestamp(file.modified)
        ]);
    }
    table.printstd();
}

fn format_timestamp(unix_seconds: u64) -> String {
    let datetime = DateTime::<Local>::from(UNIX_EPOCH + Duration::from_secs(unix_seconds));
    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn write_csv(path: &str, files: &[MftFile]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "id",
        "parent",
        "name",
        "size",
        "directory",
        "created",
        "modified",
        "accessed",
    ])?;
    for file in files {
        writer.write_record([
            file.id.to_string(),
            file.parent.to_string(),
            file.name.clone(),
            file.size.to_string(),
            file.directory.to_string(),
            file.created.to_string(),
            file.modified.to_string(),
            file.accessed.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
