//! tally_report - inspect the tally database from the command line

use anyhow::Result;
use clap::{Parser, Subcommand};

use tally_kernel::{CountStore, SqliteCountStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the tally database.
    #[arg(long, default_value = "tally.db", env = "TALLY_DB_PATH")]
    db_path: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every counted code, most recent first.
    Readings,
    /// Total quantity per product description, largest first.
    Report,
    /// List the registered products.
    Products,
    /// List recorded exit markers, oldest first.
    Exits,
    /// Register a product description for a code.
    Register { code: String, description: String },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut store = SqliteCountStore::open(&args.db_path)?;

    match args.command {
        Command::Readings => {
            for reading in store.readings()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    reading.code, reading.description, reading.quantity, reading.recorded_at
                );
            }
        }
        Command::Report => {
            for row in store.report()? {
                println!("{}\t{}", row.description, row.quantity);
            }
        }
        Command::Products => {
            for product in store.products()? {
                println!(
                    "{}\t{}\t{}",
                    product.code, product.description, product.registered_at
                );
            }
        }
        Command::Exits => {
            for marker in store.exits()? {
                println!("{}\t{}", marker.code, marker.recorded_at);
            }
        }
        Command::Register { code, description } => {
            let product = store.register_product(&code, &description)?;
            println!("registered {} as {}", product.code, product.description);
        }
    }
    Ok(())
}
