use quarry_core::crypto::RenterKeypair;
use quarry_core::{AllocationMessage, ClientMessage, ErrorKind, PieceDescriptor};
use quarry_services::{RetrievalClient, ServerFrame};

use crate::*;

#[tokio::test]
async fn concurrent_sessions_read_independently() -> Result<()> {
    let (node, store) = memory_node(b"HELLO WORLD").await?;

    let mut handles = Vec::new();
    for i in 0..16u64 {
        let addr = node.addr;
        handles.push(tokio::spawn(async move {
            let offset = i % 11;
            let client = RetrievalClient::new(RenterKeypair::generate()).with_grant_size(1 + i % 3);
            let got = client
                .retrieve(addr, PieceDescriptor::to_end(PIECE, offset))
                .await?;
            anyhow::Ok((offset, got))
        }));
    }
    for handle in handles {
        let (offset, got) = handle.await??;
        assert_eq!(&got.data[..], &b"HELLO WORLD"[offset as usize..]);
    }

    let snap = node.stats.snapshot();
    assert_eq!(snap.completed, 16);
    assert!(snap.active.is_empty());
    assert_eq!(store.open_readers(), 0);

    node.stop().await
}

#[tokio::test]
async fn shutdown_cancels_waiting_sessions() -> Result<()> {
    let (node, store) = memory_node(b"HELLO WORLD").await?;
    let mut conn = raw_connect(node.addr).await?;

    conn.send(ClientMessage::Descriptor(PieceDescriptor::to_end(PIECE, 0)))
        .await?;
    conn.send(ClientMessage::Allocation(AllocationMessage::keep_alive()))
        .await?;
    wait_until(|| node.stats.active_count() == 1).await?;
    assert_eq!(store.open_readers(), 1);

    node.shutdown_tx.send(())?;
    match conn.next().await? {
        Some(ServerFrame::Error(report)) => assert_eq!(report.kind, ErrorKind::Cancelled),
        other => panic!("expected cancellation, got {other:?}"),
    }
    wait_until(|| store.open_readers() == 0).await?;

    node.stop().await
}

#[tokio::test]
async fn client_hangup_releases_the_reader() -> Result<()> {
    let (node, store) = memory_node(b"HELLO WORLD").await?;
    let renter = Renter::new();
    let mut conn = raw_connect(node.addr).await?;

    conn.send(ClientMessage::Descriptor(PieceDescriptor::to_end(PIECE, 0)))
        .await?;
    conn.send(renter.grant(PIECE, 5)).await?;
    assert_eq!(&conn.expect_data().await?[..], b"HELLO");
    drop(conn);

    wait_until(|| store.open_readers() == 0).await?;
    wait_until(|| node.stats.snapshot().failed == 1).await?;

    node.stop().await
}
