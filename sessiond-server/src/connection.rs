//! Transport acceptor and per-connection I/O
//!
//! One reader and one writer task per connection; decoded messages
//! flow into the manager queue, outbound messages flow out of a
//! per-connection channel the manager owns the sending side of.
//! Dropping that sender is how the manager hangs up on a peer.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use sessiond_protocol::ServerCodec;

use crate::client::ConnId;
use crate::manager::ManagerMsg;

/// Accept connections forever, handing each to its own task
pub async fn serve(listener: UnixListener, manager_tx: mpsc::UnboundedSender<ManagerMsg>) {
    let mut next_conn: ConnId = 1;
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let conn = next_conn;
                next_conn += 1;
                debug!("Accepted connection {}", conn);
                tokio::spawn(handle_connection(stream, conn, manager_tx.clone()));
            }
            Err(e) => {
                warn!("Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    conn: ConnId,
    manager_tx: mpsc::UnboundedSender<ManagerMsg>,
) {
    let framed = Framed::new(stream, ServerCodec::new());
    let (mut sink, mut messages) = framed.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();

    if manager_tx
        .send(ManagerMsg::Connected { conn, tx: out_tx })
        .is_err()
    {
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        // The manager hung up; close our write direction so the peer
        // sees EOF
        let _ = sink.close().await;
    });

    while let Some(result) = messages.next().await {
        match result {
            Ok(msg) => {
                if manager_tx.send(ManagerMsg::Request { conn, msg }).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Connection {}: {}", conn, e);
                break;
            }
        }
    }

    debug!("Connection {} closed", conn);
    let _ = manager_tx.send(ManagerMsg::Disconnected { conn });
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessiond_protocol::{ClientCodec, ClientMessage, ServerMessage};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_connection_lifecycle_reaches_manager() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("test.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let (manager_tx, mut manager_rx) = mpsc::unbounded_channel();
        tokio::spawn(serve(listener, manager_tx));

        let stream = UnixStream::connect(&socket).await.unwrap();
        let mut framed = Framed::new(stream, ClientCodec::new());

        // Connected arrives with the outbound channel
        let conn_tx = match manager_rx.recv().await.unwrap() {
            ManagerMsg::Connected { conn, tx } => {
                assert_eq!(conn, 1);
                tx
            }
            other => panic!("expected Connected, got {:?}", other),
        };

        // A request flows in
        let register = ClientMessage::RegisterClient {
            previous_id: None,
            protocol_version: sessiond_protocol::PROTOCOL_VERSION,
        };
        framed.send(register.clone()).await.unwrap();
        match manager_rx.recv().await.unwrap() {
            ManagerMsg::Request { conn, msg } => {
                assert_eq!(conn, 1);
                assert_eq!(msg, register);
            }
            other => panic!("expected Request, got {:?}", other),
        }

        // A reply flows out
        conn_tx
            .send(ServerMessage::RegisterClientReply {
                client_id: "1abc".into(),
            })
            .unwrap();
        let reply = framed.next().await.unwrap().unwrap();
        assert_eq!(
            reply,
            ServerMessage::RegisterClientReply {
                client_id: "1abc".into()
            }
        );

        // Peer hangs up; the manager hears about it
        drop(framed);
        match manager_rx.recv().await.unwrap() {
            ManagerMsg::Disconnected { conn } => assert_eq!(conn, 1),
            other => panic!("expected Disconnected, got {:?}", other),
        }
    }
}
