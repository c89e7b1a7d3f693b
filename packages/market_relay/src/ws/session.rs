//! Relay Session
//!
//! Per-connection state machine: `Unauthenticated → Authenticated → Closed`.
//! Errors are answered on this connection only and never change state, except
//! a rejected handshake token, which closes the connection.

use tracing::{debug, error, info, warn};

use crate::models::{NewMessage, UserId};

use super::error::RelayError;
use super::protocol::{ClientFrame, ServerFrame};
use super::registry::{ConnectionHandle, ConnectionId};
use super::server::RelayServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated { user_id: UserId },
    Closed,
}

/// Whether the connection should keep reading after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct RelaySession {
    relay: RelayServer,
    handle: ConnectionHandle,
    state: SessionState,
}

impl RelaySession {
    pub(super) fn new(relay: RelayServer, handle: ConnectionHandle) -> Self {
        Self {
            relay,
            handle,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Process one inbound text frame.
    pub async fn handle_text(&mut self, text: &str) -> Flow {
        if self.state == SessionState::Closed {
            return Flow::Close;
        }
        self.relay.metrics.frame_received();

        let result = match self.parse(text) {
            Ok(ClientFrame::Auth { user_id, token }) => self.authenticate(user_id, token).await,
            Ok(ClientFrame::Chat {
                conversation_id,
                content,
            }) => self.chat(conversation_id, content).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Flow::Continue,
            Err(e) => {
                if let RelayError::Internal(ref source) = e {
                    error!(conn_id = self.handle.id(), "Frame handling failed: {:#}", source);
                }
                self.reply(e.to_frame()).await;
                if e.closes_connection() {
                    Flow::Close
                } else {
                    Flow::Continue
                }
            }
        }
    }

    /// Answer a frame that could not be decoded at all (e.g. binary payloads).
    pub async fn reject_malformed(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.relay.metrics.frame_received();
        self.relay.metrics.protocol_error();
        self.reply(RelayError::Malformed.to_frame()).await;
    }

    /// Transport closed. Drops our registry entry unless a newer connection
    /// for the same user has replaced it.
    pub async fn close(&mut self) {
        if let SessionState::Authenticated { user_id } = self.state {
            let removed = self.relay.registry.unregister(user_id, self.handle.id()).await;
            info!(
                user_id,
                conn_id = self.handle.id(),
                unregistered = removed,
                "User disconnected"
            );
        }
        self.state = SessionState::Closed;
    }

    fn parse(&self, text: &str) -> Result<ClientFrame, RelayError> {
        if text.len() > self.relay.config.max_frame_bytes {
            self.relay.metrics.protocol_error();
            return Err(RelayError::Malformed);
        }
        serde_json::from_str(text).map_err(|_| {
            self.relay.metrics.protocol_error();
            RelayError::Malformed
        })
    }

    async fn authenticate(
        &mut self,
        user_id: UserId,
        token: Option<String>,
    ) -> Result<(), RelayError> {
        if self.state != SessionState::Unauthenticated {
            self.relay.metrics.protocol_error();
            return Err(RelayError::Protocol("Already authenticated"));
        }

        if self.relay.auth.require_token {
            let Some(token) = token else {
                warn!(user_id, conn_id = self.handle.id(), "Handshake without token");
                return Err(RelayError::Unauthorized("Session token required"));
            };
            match self.relay.verifier.verify(&token).await {
                Ok(Some(owner)) if owner == user_id => {}
                Ok(_) => {
                    warn!(user_id, conn_id = self.handle.id(), "Handshake token rejected");
                    return Err(RelayError::Unauthorized("Invalid session token"));
                }
                Err(e) => return Err(RelayError::Internal(e)),
            }
        }

        if let Some(previous) = self
            .relay
            .registry
            .register(user_id, self.handle.clone())
            .await
        {
            info!(
                user_id,
                replaced_conn_id = previous.id(),
                "Replacing existing registration"
            );
        }
        self.state = SessionState::Authenticated { user_id };
        self.relay.metrics.authenticated();
        info!(user_id, conn_id = self.handle.id(), "User connected");

        self.reply(ServerFrame::Authenticated { user_id }).await;
        Ok(())
    }

    async fn chat(&mut self, conversation_id: i64, content: String) -> Result<(), RelayError> {
        let SessionState::Authenticated { user_id } = self.state else {
            self.relay.metrics.protocol_error();
            return Err(RelayError::Protocol("Not authenticated"));
        };

        let message = self
            .relay
            .store
            .create_message(NewMessage {
                conversation_id,
                sender_id: user_id,
                content,
            })
            .await
            .map_err(|e| {
                warn!(user_id, conversation_id, "Message rejected: {}", e);
                self.relay.metrics.persistence_error();
                RelayError::from(e)
            })?;
        self.relay.metrics.message_persisted();

        match self.relay.store.get_conversation(conversation_id).await {
            Ok(Some(conversation)) => {
                let delivery = self.relay.router.route(&message, &conversation).await;
                debug!(message_id = message.id, ?delivery, "Message routed");
            }
            Ok(None) => {
                warn!(
                    message_id = message.id,
                    conversation_id, "Conversation vanished before routing"
                );
                self.relay.metrics.routing_error();
            }
            Err(e) => {
                warn!(
                    message_id = message.id,
                    conversation_id, "Failed to load conversation for routing: {}", e
                );
                self.relay.metrics.routing_error();
            }
        }

        self.reply(ServerFrame::MessageSent { data: message }).await;
        Ok(())
    }

    async fn reply(&self, frame: ServerFrame) {
        // A closed queue means the writer is gone; the read loop ends soon after.
        let _ = self.handle.send(frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;
    use crate::repository::MarketRepository;
    use crate::test_helpers::test_relay;
    use crate::ws::protocol::MALFORMED_FRAME;
    use tokio::sync::mpsc;

    fn auth(user_id: UserId) -> String {
        format!(r#"{{"type":"auth","userId":{user_id}}}"#)
    }

    fn auth_with_token(user_id: UserId, token: &str) -> String {
        format!(r#"{{"type":"auth","userId":{user_id},"token":"{token}"}}"#)
    }

    fn chat(conversation_id: i64, content: &str) -> String {
        format!(r#"{{"type":"chat","conversationId":{conversation_id},"content":"{content}"}}"#)
    }

    async fn setup() -> (RelayServer, MarketRepository, Conversation) {
        let (relay, repo) = test_relay(false).await;
        let conv = crate::repository::test_helpers::seed_conversation(&repo).await;
        (relay, repo, conv)
    }

    async fn authed(
        relay: &RelayServer,
        user_id: UserId,
    ) -> (RelaySession, mpsc::Receiver<ServerFrame>) {
        let (mut session, mut rx) = relay.open_session();
        assert_eq!(session.handle_text(&auth(user_id)).await, Flow::Continue);
        assert_eq!(
            rx.recv().await,
            Some(ServerFrame::Authenticated { user_id })
        );
        (session, rx)
    }

    #[tokio::test]
    async fn chat_before_auth_is_rejected_and_not_persisted() {
        let (relay, repo, conv) = setup().await;
        let (mut session, mut rx) = relay.open_session();

        let flow = session.handle_text(&chat(conv.id, "hello")).await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(rx.recv().await, Some(ServerFrame::error("Not authenticated")));
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(
            repo.list_messages_by_conversation(conv.id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn malformed_frame_gets_generic_error_in_any_state() {
        let (relay, _repo, _conv) = setup().await;
        let (mut session, mut rx) = relay.open_session();

        session.handle_text("{not json").await;
        assert_eq!(rx.recv().await, Some(ServerFrame::error(MALFORMED_FRAME)));
        assert_eq!(session.state(), SessionState::Unauthenticated);

        session.handle_text(&auth(1)).await;
        rx.recv().await;
        session.handle_text(r#"{"type":"chat"}"#).await;
        assert_eq!(rx.recv().await, Some(ServerFrame::error(MALFORMED_FRAME)));
        assert_eq!(
            session.state(),
            SessionState::Authenticated { user_id: 1 }
        );

        session.reject_malformed().await;
        assert_eq!(rx.recv().await, Some(ServerFrame::error(MALFORMED_FRAME)));
        assert_eq!(relay.metrics().snapshot().errors.protocol, 3);
    }

    #[tokio::test]
    async fn oversized_frame_is_malformed() {
        let (relay, _repo, conv) = setup().await;
        let (mut session, mut rx) = authed(&relay, 1).await;

        let huge = "x".repeat(relay.config.max_frame_bytes + 1);
        session.handle_text(&chat(conv.id, &huge)).await;
        assert_eq!(rx.recv().await, Some(ServerFrame::error(MALFORMED_FRAME)));
    }

    #[tokio::test]
    async fn auth_registers_connection() {
        let (relay, _repo, _conv) = setup().await;
        let (session, _rx) = authed(&relay, 1).await;

        assert_eq!(
            session.state(),
            SessionState::Authenticated { user_id: 1 }
        );
        let handle = relay.registry().lookup(1).await.unwrap();
        assert_eq!(handle.id(), session.connection_id());
    }

    #[tokio::test]
    async fn second_auth_is_a_protocol_error() {
        let (relay, _repo, _conv) = setup().await;
        let (mut session, mut rx) = authed(&relay, 1).await;

        assert_eq!(session.handle_text(&auth(2)).await, Flow::Continue);
        assert_eq!(
            rx.recv().await,
            Some(ServerFrame::error("Already authenticated"))
        );
        assert_eq!(
            session.state(),
            SessionState::Authenticated { user_id: 1 }
        );
        assert!(relay.registry().lookup(2).await.is_none());
    }

    #[tokio::test]
    async fn chat_is_acked_and_pushed_to_counterpart() {
        let (relay, repo, conv) = setup().await;
        let (mut buyer, mut buyer_rx) = authed(&relay, conv.buyer_id).await;
        let (_seller, mut seller_rx) = authed(&relay, conv.seller_id).await;

        buyer.handle_text(&chat(conv.id, "hello")).await;

        let Some(ServerFrame::MessageSent { data: sent }) = buyer_rx.recv().await else {
            panic!("expected message_sent");
        };
        assert_eq!(sent.content, "hello");
        assert_eq!(sent.sender_id, conv.buyer_id);

        let Some(ServerFrame::Message { data: pushed }) = seller_rx.recv().await else {
            panic!("expected message push");
        };
        assert_eq!(pushed, sent);

        let history = repo.list_messages_by_conversation(conv.id).await.unwrap();
        assert_eq!(history, vec![sent]);
    }

    #[tokio::test]
    async fn offline_counterpart_still_gets_ack_and_history() {
        let (relay, repo, conv) = setup().await;
        let (mut buyer, mut buyer_rx) = authed(&relay, conv.buyer_id).await;

        buyer.handle_text(&chat(conv.id, "anyone there?")).await;

        assert!(matches!(
            buyer_rx.recv().await,
            Some(ServerFrame::MessageSent { .. })
        ));
        let history = repo.list_messages_by_conversation(conv.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "anyone there?");
        assert_eq!(relay.metrics().snapshot().messages.delivery_misses, 1);
    }

    #[tokio::test]
    async fn persistence_failure_keeps_session_authenticated() {
        let (relay, _repo, conv) = setup().await;
        let (mut buyer, mut rx) = authed(&relay, conv.buyer_id).await;

        buyer.handle_text(&chat(9999, "lost")).await;
        assert_eq!(
            rx.recv().await,
            Some(ServerFrame::error("conversation 9999 not found"))
        );

        buyer.handle_text(&chat(conv.id, "   ")).await;
        assert_eq!(
            rx.recv().await,
            Some(ServerFrame::error("message content is empty"))
        );

        assert_eq!(
            buyer.state(),
            SessionState::Authenticated {
                user_id: conv.buyer_id
            }
        );
        buyer.handle_text(&chat(conv.id, "retry")).await;
        assert!(matches!(
            rx.recv().await,
            Some(ServerFrame::MessageSent { .. })
        ));
        assert_eq!(relay.metrics().snapshot().errors.persistence, 2);
    }

    #[tokio::test]
    async fn stranger_message_is_persisted_but_not_routed() {
        let (relay, repo, conv) = setup().await;
        let (_seller, mut seller_rx) = authed(&relay, conv.seller_id).await;
        let (mut stranger, mut stranger_rx) = authed(&relay, 77).await;

        stranger.handle_text(&chat(conv.id, "psst")).await;

        assert!(matches!(
            stranger_rx.recv().await,
            Some(ServerFrame::MessageSent { .. })
        ));
        assert!(seller_rx.try_recv().is_err());
        assert_eq!(
            repo.list_messages_by_conversation(conv.id)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(relay.metrics().snapshot().errors.routing, 1);
    }

    #[tokio::test]
    async fn close_unregisters_and_is_terminal() {
        let (relay, _repo, conv) = setup().await;
        let (mut session, mut rx) = authed(&relay, 1).await;

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(relay.registry().lookup(1).await.is_none());

        assert_eq!(session.handle_text(&chat(conv.id, "ghost")).await, Flow::Close);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_close_keeps_newer_connection() {
        let (relay, _repo, _conv) = setup().await;
        let (mut old, _old_rx) = authed(&relay, 1).await;
        let (new, _new_rx) = authed(&relay, 1).await;

        old.close().await;

        let handle = relay.registry().lookup(1).await.unwrap();
        assert_eq!(handle.id(), new.connection_id());
    }

    #[tokio::test]
    async fn token_required_rejects_and_closes() {
        let (relay, repo) = test_relay(true).await;
        let conv = crate::repository::test_helpers::seed_conversation(&repo).await;

        let (mut session, mut rx) = relay.open_session();
        assert_eq!(session.handle_text(&auth(conv.buyer_id)).await, Flow::Close);
        assert_eq!(
            rx.recv().await,
            Some(ServerFrame::error("Session token required"))
        );

        // A real token, but issued to someone else
        let sellers_token = repo.create_session(conv.seller_id, 3600).await.unwrap();
        let (mut session, mut rx) = relay.open_session();
        assert_eq!(
            session
                .handle_text(&auth_with_token(conv.buyer_id, &sellers_token))
                .await,
            Flow::Close
        );
        assert_eq!(
            rx.recv().await,
            Some(ServerFrame::error("Invalid session token"))
        );
        assert!(relay.registry().lookup(conv.buyer_id).await.is_none());
    }

    #[tokio::test]
    async fn token_required_accepts_valid_token() {
        let (relay, repo) = test_relay(true).await;
        let conv = crate::repository::test_helpers::seed_conversation(&repo).await;
        let token = repo.create_session(conv.buyer_id, 3600).await.unwrap();

        let (mut session, mut rx) = relay.open_session();
        assert_eq!(
            session
                .handle_text(&auth_with_token(conv.buyer_id, &token))
                .await,
            Flow::Continue
        );
        assert_eq!(
            rx.recv().await,
            Some(ServerFrame::Authenticated {
                user_id: conv.buyer_id
            })
        );
    }
}
