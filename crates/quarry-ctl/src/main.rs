//! quarry-ctl — command-line interface for the Quarry storage node.

mod cmd;

use anyhow::{Context, Result};

use cmd::retrieve::RetrieveArgs;
use quarry_core::wire::DEFAULT_API_PORT;

const DEFAULT_ALLOCATION_LIMIT: usize = 20;

fn print_usage() {
    println!("Usage: quarry-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                 Show node status and retrieval counters");
    println!("  allocations [--limit N] List recently recorded allocations");
    println!("  piece <id>             Show size and location of a stored piece");
    println!("  shutdown               Stop the daemon");
    println!("  keygen                 Generate a renter keypair");
    println!("  retrieve <id> [opts]   Download a piece range");
    println!();
    println!("Retrieve options:");
    println!("  --addr <host:port>     Retrieval listener (default: 127.0.0.1:7777)");
    println!("  --offset <n>           First byte to read (default: 0)");
    println!("  --size <n>             Bytes to read, -1 for the rest (default: -1)");
    println!("  --grant <n>            Credit per allocation (default: 32768)");
    println!("  --key <hex>            Renter secret (default: $QUARRY_RENTER_KEY)");
    println!("  --out <path>           Write to a file instead of stdout");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_API_PORT);
}

/// Pull `--name value` out of `args`, parsed.
fn take_opt<T: std::str::FromStr>(args: &mut Vec<&str>, name: &str) -> Result<Option<T>> {
    let Some(pos) = args.iter().position(|a| *a == name) else {
        return Ok(None);
    };
    let value = args
        .get(pos + 1)
        .copied()
        .with_context(|| format!("{} requires a value", name))?;
    let parsed = value
        .parse()
        .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, value))?;
    args.drain(pos..=pos + 1);
    Ok(Some(parsed))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut remaining: Vec<&str> = args.iter().map(String::as_str).collect();

    let port = take_opt(&mut remaining, "--port")?.unwrap_or(DEFAULT_API_PORT);

    let command = remaining.clone();
    match command.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["allocations", ..] => {
            let limit = take_opt(&mut remaining, "--limit")?.unwrap_or(DEFAULT_ALLOCATION_LIMIT);
            cmd::allocations::cmd_allocations(port, limit).await
        }
        ["piece", id] => cmd::status::cmd_piece(port, id).await,
        ["shutdown"] => cmd::status::cmd_shutdown(port).await,
        ["keygen"] => cmd::keygen::cmd_keygen(),
        ["retrieve", id, ..] => {
            let mut retrieve = RetrieveArgs::new(id);
            if let Some(addr) = take_opt(&mut remaining, "--addr")? {
                retrieve.addr = addr;
            }
            if let Some(offset) = take_opt(&mut remaining, "--offset")? {
                retrieve.offset = offset;
            }
            if let Some(size) = take_opt(&mut remaining, "--size")? {
                retrieve.size = size;
            }
            if let Some(grant) = take_opt(&mut remaining, "--grant")? {
                retrieve.grant = grant;
            }
            retrieve.key = take_opt(&mut remaining, "--key")?;
            retrieve.out = take_opt(&mut remaining, "--out")?;
            if remaining.len() > 2 {
                anyhow::bail!("unexpected arguments: {}", remaining[2..].join(" "));
            }
            cmd::retrieve::cmd_retrieve(retrieve).await
        }
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
