use std::sync::Arc;

use quarry_core::crypto::RenterKeypair;
use quarry_core::{ClientMessage, ErrorKind, PieceDescriptor};
use quarry_services::{
    AllocationLedger, DiskPieceStore, LedgerEntry, LedgerError, RetrievalClient, ServerFrame,
    SqliteLedger,
};

use crate::*;

#[tokio::test]
async fn allocations_survive_a_restart() -> Result<()> {
    let dir = temp_dir("ledger");
    let store = DiskPieceStore::new(dir.join("pieces"))?;
    store.put(PIECE, b"HELLO WORLD")?;
    let ledger_path = dir.join("ledger.db");
    let ledger = SqliteLedger::open(&ledger_path)?;

    let node = NodeBuilder::new(Arc::new(store.clone()))
        .ledger(Arc::new(ledger.clone()))
        .start()
        .await?;

    let renter = RenterKeypair::generate();
    let public = renter.public();
    let client = RetrievalClient::new(renter).with_grant_size(4);
    let got = client
        .retrieve(node.addr, PieceDescriptor::to_end(PIECE, 0))
        .await?;
    assert_eq!(&got.data[..], b"HELLO WORLD");
    node.stop().await?;

    // 4 + 4 + 4 covers 11 bytes.
    assert_eq!(ledger.count()?, 3);
    drop(ledger);

    let reopened = SqliteLedger::open(&ledger_path)?;
    assert_eq!(reopened.count()?, 3);
    assert_eq!(reopened.total_for_renter(&public)?, 12);
    let recent = reopened.recent(10)?;
    assert!(recent.iter().all(|e| e.piece_id == PIECE && e.renter == public));

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

#[tokio::test]
async fn disk_store_serves_offsets() -> Result<()> {
    let dir = temp_dir("disk");
    let store = DiskPieceStore::new(&dir)?;
    let content: Vec<u8> = (0..50_000u32).map(|i| (i % 97) as u8).collect();
    store.put(PIECE, &content)?;

    let node = NodeBuilder::new(Arc::new(store.clone())).start().await?;
    let client = RetrievalClient::new(RenterKeypair::generate());
    let got = client
        .retrieve(
            node.addr,
            PieceDescriptor {
                id: PIECE.into(),
                size: 20_000,
                offset: 25_000,
            },
        )
        .await?;
    assert_eq!(&got.data[..], &content[25_000..45_000]);
    assert_eq!(store.open_readers(), 0);

    node.stop().await?;
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

#[tokio::test]
async fn piece_truncated_mid_session_ends_early() -> Result<()> {
    let dir = temp_dir("truncate");
    let store = DiskPieceStore::new(&dir)?;
    store.put(PIECE, b"HELLO WORLD")?;
    let path = store.locate(PIECE)?;

    let node = NodeBuilder::new(Arc::new(store.clone())).start().await?;
    let renter = Renter::new();
    let mut conn = raw_connect(node.addr).await?;

    conn.send(ClientMessage::Descriptor(PieceDescriptor::to_end(PIECE, 0)))
        .await?;
    conn.send(renter.grant(PIECE, 5)).await?;
    assert_eq!(&conn.expect_data().await?[..], b"HELLO");

    std::fs::OpenOptions::new()
        .write(true)
        .open(&path)?
        .set_len(7)?;

    conn.send(renter.grant(PIECE, 6)).await?;
    assert_eq!(&conn.expect_data().await?[..], b" W");
    match conn.next().await? {
        Some(ServerFrame::Close(summary)) => {
            assert!(summary.is_partial());
            assert_eq!(
                (summary.retrieved, summary.allocated, summary.target),
                (7, 11, 11)
            );
        }
        other => panic!("expected close, got {other:?}"),
    }
    assert_eq!(store.open_readers(), 0);

    node.stop().await?;
    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}

struct BrokenLedger;

impl AllocationLedger for BrokenLedger {
    fn record(&self, _entry: &LedgerEntry) -> std::result::Result<(), LedgerError> {
        Err(LedgerError::Unavailable("read-only filesystem".into()))
    }
}

#[tokio::test]
async fn unrecorded_allocation_sends_nothing() -> Result<()> {
    let store = quarry_services::MemoryPieceStore::new();
    store.put(PIECE, &b"HELLO WORLD"[..])?;
    let node = NodeBuilder::new(Arc::new(store))
        .ledger(Arc::new(BrokenLedger))
        .start()
        .await?;
    let renter = Renter::new();
    let mut conn = raw_connect(node.addr).await?;

    conn.send(ClientMessage::Descriptor(PieceDescriptor::to_end(PIECE, 0)))
        .await?;
    conn.send(renter.grant(PIECE, 11)).await?;
    match conn.next().await? {
        Some(ServerFrame::Error(report)) => {
            assert_eq!(report.kind, ErrorKind::Persistence);
            assert!(!report.message.contains("read-only"));
        }
        other => panic!("expected persistence error, got {other:?}"),
    }

    node.stop().await
}
