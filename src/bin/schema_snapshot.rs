//! Schema snapshot tool.
//!
//! Dumps the DDL of every table in the sync database from `sqlite_master`,
//! for reviewing schema drift against a deployed copy. Strictly read-only.
//!
//! # Usage
//!
//! ```bash
//! schema_snapshot --db /var/lib/bestbet/stats.db --output schema.sql
//! ```
//!
//! # Exit Codes
//!
//! - 0: snapshot written
//! - 2: configuration error (database missing or unreadable)

use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use rusqlite::{Connection, OpenFlags};

#[derive(Debug, Parser)]
#[command(name = "schema_snapshot", about = "Dump table DDL from the sync database")]
struct Cli {
    /// Database path; falls back to the DB_PATH env var.
    #[arg(long, env = "DB_PATH")]
    db: String,

    /// Write to this file instead of stdout.
    #[arg(long)]
    output: Option<String>,
}

fn main() {
    dotenv::dotenv().ok();
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(2);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let conn = Connection::open_with_flags(&cli.db, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("cannot open {}", cli.db))?;

    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
    })?;

    let mut out = String::new();
    for row in rows {
        let (name, sql) = row?;
        if let Some(sql) = sql {
            out.push_str(&format!("-- {}\n{};\n\n", name, sql));
        }
    }

    match cli.output {
        Some(path) => fs::write(&path, &out).with_context(|| format!("cannot write {}", path))?,
        None => print!("{}", out),
    }
    Ok(())
}
