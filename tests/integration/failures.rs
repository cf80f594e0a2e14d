use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use quarry_core::config::AuthConfig;
use quarry_core::crypto::RenterKeypair;
use quarry_core::{ClientMessage, ErrorKind, PieceDescriptor};
use quarry_services::{
    ClientError, Ed25519Verifier, MemoryPieceStore, RetrievalClient, ServerFrame,
};

use crate::*;

async fn expect_error(conn: &mut RawConn) -> Result<ErrorKind> {
    match conn.next().await? {
        Some(ServerFrame::Error(report)) => Ok(report.kind),
        other => bail!("expected error frame, got {other:?}"),
    }
}

#[tokio::test]
async fn forged_allocation_stops_the_stream() -> Result<()> {
    let (node, store) = memory_node(b"HELLO WORLD").await?;
    let renter = Renter::new();
    let mut conn = raw_connect(node.addr).await?;

    conn.send(ClientMessage::Descriptor(PieceDescriptor::to_end(PIECE, 0)))
        .await?;
    conn.send(renter.grant(PIECE, 5)).await?;
    assert_eq!(&conn.expect_data().await?[..], b"HELLO");

    let ClientMessage::Allocation(mut forged) = renter.grant(PIECE, 6) else {
        unreachable!()
    };
    if let Some(data) = forged.data.as_mut() {
        data.amount = 6_000_000;
    }
    conn.send(ClientMessage::Allocation(forged)).await?;

    // Nothing but the error after the forged frame.
    assert_eq!(expect_error(&mut conn).await?, ErrorKind::Authentication);
    assert_eq!(conn.next().await?, None);
    assert_eq!(store.open_readers(), 0);
    assert_eq!(node.stats.snapshot().failed, 1);

    node.stop().await
}

#[tokio::test]
async fn unknown_piece_is_not_found() -> Result<()> {
    let (node, _store) = memory_node(b"HELLO WORLD").await?;
    let client = RetrievalClient::new(RenterKeypair::generate());

    let err = client
        .retrieve(node.addr, PieceDescriptor::to_end("missing1", 0))
        .await
        .unwrap_err();
    match err {
        ClientError::Rejected(report) => assert_eq!(report.kind, ErrorKind::NotFound),
        other => panic!("expected rejection, got {other}"),
    }

    node.stop().await
}

#[tokio::test]
async fn allocation_before_descriptor_is_rejected() -> Result<()> {
    let (node, _store) = memory_node(b"HELLO WORLD").await?;
    let renter = Renter::new();
    let mut conn = raw_connect(node.addr).await?;

    conn.send(renter.grant(PIECE, 5)).await?;
    assert_eq!(expect_error(&mut conn).await?, ErrorKind::Protocol);

    node.stop().await
}

#[tokio::test]
async fn garbage_first_frame_is_a_protocol_error() -> Result<()> {
    let (node, _store) = memory_node(b"HELLO WORLD").await?;
    let mut stream = tokio::net::TcpStream::connect(node.addr).await?;
    stream.write_all(&[0xee; 8]).await?;

    let (r, _w) = stream.into_split();
    let mut reader = quarry_services::FrameReader::new(r);
    match reader.read_server_frame().await? {
        Some(ServerFrame::Error(report)) => assert_eq!(report.kind, ErrorKind::Protocol),
        other => panic!("expected error frame, got {other:?}"),
    }

    node.stop().await
}

#[tokio::test]
async fn out_of_range_descriptors_are_rejected() -> Result<()> {
    let (node, _store) = memory_node(b"HELLO WORLD").await?;

    for descriptor in [
        PieceDescriptor { id: PIECE.into(), size: 1, offset: 12 },
        PieceDescriptor { id: PIECE.into(), size: -7, offset: 0 },
        PieceDescriptor { id: "bad/id".into(), size: 1, offset: 0 },
    ] {
        let mut conn = raw_connect(node.addr).await?;
        conn.send(ClientMessage::Descriptor(descriptor)).await?;
        assert_eq!(expect_error(&mut conn).await?, ErrorKind::Protocol);
    }

    node.stop().await
}

#[tokio::test]
async fn untrusted_renter_is_refused() -> Result<()> {
    let store = MemoryPieceStore::new();
    store.put(PIECE, &b"HELLO WORLD"[..])?;
    let trusted = RenterKeypair::generate();
    let verifier = Ed25519Verifier::from_config(&AuthConfig {
        trusted_renters: vec![hex::encode(trusted.public())],
    });
    let node = NodeBuilder::new(Arc::new(store))
        .verifier(Arc::new(verifier))
        .start()
        .await?;

    let stranger = RetrievalClient::new(RenterKeypair::generate());
    let err = stranger
        .retrieve(node.addr, PieceDescriptor::to_end(PIECE, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected(r) if r.kind == ErrorKind::Authentication));

    let friend = RetrievalClient::new(trusted);
    let got = friend
        .retrieve(node.addr, PieceDescriptor::to_end(PIECE, 0))
        .await?;
    assert_eq!(&got.data[..], b"HELLO WORLD");

    node.stop().await
}
