//! Piece retrieval over the metered stream protocol.

use std::path::PathBuf;

use anyhow::{Context, Result};

use quarry_core::crypto::RenterKeypair;
use quarry_core::PieceDescriptor;
use quarry_core::wire::{DEFAULT_ALLOCATION, DEFAULT_LISTEN_PORT, SIZE_TO_END};
use quarry_services::RetrievalClient;

pub struct RetrieveArgs {
    pub id: String,
    pub offset: u64,
    pub size: i64,
    pub addr: String,
    pub key: Option<String>,
    pub grant: u64,
    pub out: Option<PathBuf>,
}

impl RetrieveArgs {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            offset: 0,
            size: SIZE_TO_END,
            addr: format!("127.0.0.1:{}", DEFAULT_LISTEN_PORT),
            key: None,
            grant: DEFAULT_ALLOCATION,
            out: None,
        }
    }
}

pub async fn cmd_retrieve(args: RetrieveArgs) -> Result<()> {
    let renter = match args.key.or_else(|| std::env::var("QUARRY_RENTER_KEY").ok()) {
        Some(secret) => RenterKeypair::from_hex(&secret).context("invalid renter key")?,
        None => {
            let renter = RenterKeypair::generate();
            eprintln!(
                "No renter key given, using ephemeral key {}",
                hex::encode(renter.public())
            );
            renter
        }
    };

    let client = RetrievalClient::new(renter).with_grant_size(args.grant);
    let descriptor = PieceDescriptor {
        id: args.id,
        size: args.size,
        offset: args.offset,
    };
    let retrieved = client
        .retrieve(args.addr.as_str(), descriptor)
        .await
        .with_context(|| format!("retrieval from {} failed", args.addr))?;

    let summary = &retrieved.summary;
    match args.out {
        Some(path) => {
            std::fs::write(&path, &retrieved.data)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote {} bytes to {}", retrieved.data.len(), path.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout()
                .write_all(&retrieved.data)
                .context("failed to write to stdout")?;
        }
    }

    eprintln!(
        "{}: retrieved {}/{} bytes, {} allocated{}",
        summary.piece_id,
        summary.retrieved,
        summary.target,
        summary.allocated,
        if summary.is_partial() { " (piece ended early)" } else { "" }
    );
    Ok(())
}
