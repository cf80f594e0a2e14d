//! Daemon status, piece lookup, shutdown commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    listen_port: u16,
    retrievals: Retrievals,
    pieces: PiecesInfo,
    ledger_entries: u64,
}

#[derive(Deserialize)]
struct Retrievals {
    active: Vec<ActiveInfo>,
    completed: u64,
    partial: u64,
    failed: u64,
    bytes_served: u64,
    credit_allocated: u64,
    allocations: u64,
}

#[derive(Deserialize)]
struct ActiveInfo {
    session: String,
    piece_id: String,
    target: u64,
    retrieved: u64,
    elapsed_secs: u64,
}

#[derive(Deserialize)]
struct PiecesInfo {
    stored: usize,
    bytes: u64,
    open_readers: usize,
}

#[derive(Deserialize)]
struct PieceResponse {
    id: String,
    size: u64,
    path: String,
}

#[derive(Deserialize)]
struct ShutdownResponse {
    message: String,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;
    let r = &resp.retrievals;

    println!("═══════════════════════════════════════");
    println!("  Quarry Node Status");
    println!("═══════════════════════════════════════");
    println!("  Retrieval port   : {}", resp.listen_port);
    println!("  Pieces stored    : {}", resp.pieces.stored);
    println!("  Piece bytes      : {}", resp.pieces.bytes);
    println!("  Open readers     : {}", resp.pieces.open_readers);
    println!("  Ledger entries   : {}", resp.ledger_entries);
    println!("  Completed        : {} ({} partial)", r.completed, r.partial);
    println!("  Failed           : {}", r.failed);
    println!("  Bytes served     : {}", r.bytes_served);
    println!("  Credit accepted  : {} in {} allocations", r.credit_allocated, r.allocations);

    if r.active.is_empty() {
        println!("\n  No active retrievals.");
    } else {
        println!("\n  Active retrievals:");
        for a in &r.active {
            println!("  ┌─ {}", a.session);
            println!("  │  piece    : {}", a.piece_id);
            println!("  │  progress : {}/{}", a.retrieved, a.target);
            println!("  └─ elapsed  : {}s", a.elapsed_secs);
        }
    }

    Ok(())
}

pub async fn cmd_piece(port: u16, id: &str) -> Result<()> {
    let resp: PieceResponse = get_json(&format!("{}/pieces/{}", base_url(port), id)).await?;
    println!("  {} : {} bytes", resp.id, resp.size);
    println!("  path : {}", resp.path);
    Ok(())
}

pub async fn cmd_shutdown(port: u16) -> Result<()> {
    let resp: ShutdownResponse = post_json(&format!("{}/daemon/shutdown", base_url(port))).await?;
    println!("{}", resp.message);
    Ok(())
}
