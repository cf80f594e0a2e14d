use std::sync::Arc;

use quarry_core::crypto::RenterKeypair;
use quarry_core::{AllocationMessage, ClientMessage, PieceDescriptor};
use quarry_services::{MemoryPieceStore, RetrievalClient, RetrievalLimits, ServerFrame};

use crate::*;

#[tokio::test]
async fn hello_world_in_two_grants() -> Result<()> {
    let (node, _store) = memory_node(b"HELLO WORLD").await?;
    let renter = Renter::new();
    let mut conn = raw_connect(node.addr).await?;

    conn.send(ClientMessage::Descriptor(PieceDescriptor::to_end(PIECE, 0)))
        .await?;
    conn.send(renter.grant(PIECE, 5)).await?;
    assert_eq!(&conn.expect_data().await?[..], b"HELLO");
    conn.send(renter.grant(PIECE, 6)).await?;
    assert_eq!(&conn.expect_data().await?[..], b" WORLD");

    match conn.next().await? {
        Some(ServerFrame::Close(summary)) => {
            assert_eq!(summary.piece_id, PIECE);
            assert_eq!(
                (summary.retrieved, summary.allocated, summary.target),
                (11, 11, 11)
            );
        }
        other => panic!("expected close, got {other:?}"),
    }
    assert_eq!(conn.next().await?, None);

    node.stop().await
}

#[tokio::test]
async fn bounded_range_with_surplus_credit() -> Result<()> {
    let (node, _store) = memory_node(b"HELLO WORLD").await?;
    let client = RetrievalClient::new(RenterKeypair::generate()).with_grant_size(100);

    let got = client
        .retrieve(
            node.addr,
            PieceDescriptor {
                id: PIECE.into(),
                size: 5,
                offset: 6,
            },
        )
        .await?;
    assert_eq!(&got.data[..], b"WORLD");
    assert_eq!(got.summary.retrieved, 5);
    assert_eq!(got.summary.allocated, 100);

    node.stop().await
}

#[tokio::test]
async fn short_piece_is_a_partial_success() -> Result<()> {
    let (node, _store) = memory_node(b"HELLO").await?;
    let client = RetrievalClient::new(RenterKeypair::generate()).with_grant_size(100);

    let got = client
        .retrieve(
            node.addr,
            PieceDescriptor {
                id: PIECE.into(),
                size: 11,
                offset: 0,
            },
        )
        .await?;
    assert_eq!(&got.data[..], b"HELLO");
    assert!(got.summary.is_partial());
    assert_eq!(got.summary.target, 11);

    node.stop().await
}

#[tokio::test]
async fn large_piece_round_trips_through_small_frames() -> Result<()> {
    let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let store = MemoryPieceStore::new();
    store.put(PIECE, content.clone())?;

    let mut limits = RetrievalLimits::default();
    limits.max_message = 1000;
    limits.flow.max_read_size = 4096;
    let node = NodeBuilder::new(Arc::new(store)).limits(limits).start().await?;

    let client = RetrievalClient::new(RenterKeypair::generate()).with_grant_size(10_000);
    let offset = 1234;
    let got = client
        .retrieve(node.addr, PieceDescriptor::to_end(PIECE, offset))
        .await?;
    assert_eq!(&got.data[..], &content[offset as usize..]);
    assert_eq!(got.summary.target, content.len() as u64 - offset);
    assert_eq!(got.summary.retrieved, got.summary.target);

    node.stop().await
}

#[tokio::test]
async fn data_frames_respect_message_size() -> Result<()> {
    let store = MemoryPieceStore::new();
    store.put(PIECE, &b"HELLO WORLD"[..])?;
    let mut limits = RetrievalLimits::default();
    limits.max_message = 4;
    let node = NodeBuilder::new(Arc::new(store)).limits(limits).start().await?;

    let renter = Renter::new();
    let mut conn = raw_connect(node.addr).await?;
    conn.send(ClientMessage::Descriptor(PieceDescriptor::to_end(PIECE, 0)))
        .await?;
    conn.send(renter.grant(PIECE, 11)).await?;

    let mut frames = Vec::new();
    for _ in 0..3 {
        frames.push(conn.expect_data().await?);
    }
    assert_eq!(frames, vec![&b"HELL"[..], &b"O WO"[..], &b"RLD"[..]]);
    assert!(matches!(conn.next().await?, Some(ServerFrame::Close(_))));

    node.stop().await
}

#[tokio::test]
async fn keep_alives_do_not_move_totals() -> Result<()> {
    let (node, _store) = memory_node(b"HELLO WORLD").await?;
    let renter = Renter::new();
    let mut conn = raw_connect(node.addr).await?;

    conn.send(ClientMessage::Descriptor(PieceDescriptor::to_end(PIECE, 0)))
        .await?;
    for _ in 0..3 {
        conn.send(ClientMessage::Allocation(AllocationMessage::keep_alive()))
            .await?;
    }
    conn.send(renter.grant(PIECE, 11)).await?;
    assert_eq!(&conn.expect_data().await?[..], b"HELLO WORLD");

    match conn.next().await? {
        Some(ServerFrame::Close(summary)) => assert_eq!(summary.allocated, 11),
        other => panic!("expected close, got {other:?}"),
    }
    assert_eq!(node.stats.snapshot().allocations, 1);

    node.stop().await
}

#[tokio::test]
async fn empty_range_closes_without_credit() -> Result<()> {
    let (node, _store) = memory_node(b"HELLO WORLD").await?;
    let mut conn = raw_connect(node.addr).await?;

    conn.send(ClientMessage::Descriptor(PieceDescriptor {
        id: PIECE.into(),
        size: 0,
        offset: 3,
    }))
    .await?;
    match conn.next().await? {
        Some(ServerFrame::Close(summary)) => {
            assert_eq!((summary.retrieved, summary.allocated, summary.target), (0, 0, 0))
        }
        other => panic!("expected close, got {other:?}"),
    }

    node.stop().await
}
