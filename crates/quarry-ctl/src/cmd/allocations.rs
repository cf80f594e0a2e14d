//! Ledger listing command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
struct AllocationsResponse {
    total: u64,
    allocations: Vec<Entry>,
}

#[derive(Deserialize)]
struct Entry {
    renter: String,
    piece_id: String,
    serial: u64,
    requested: i64,
    credited: u64,
    recorded_at: u64,
}

pub async fn cmd_allocations(port: u16, limit: usize) -> Result<()> {
    let resp: AllocationsResponse =
        get_json(&format!("{}/allocations?limit={}", base_url(port), limit)).await?;

    if resp.allocations.is_empty() {
        println!("No allocations recorded yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Allocations ({} of {})", resp.allocations.len(), resp.total);
    println!("═══════════════════════════════════════");
    for e in &resp.allocations {
        let requested = if e.requested < 0 {
            format!(" (requested {})", e.requested)
        } else {
            String::new()
        };
        println!("  ┌─ {} #{}", &e.renter[..16.min(e.renter.len())], e.serial);
        println!("  │  piece    : {}", e.piece_id);
        println!("  │  credited : {}{}", e.credited, requested);
        println!("  └─ at       : {}", e.recorded_at);
    }
    Ok(())
}
