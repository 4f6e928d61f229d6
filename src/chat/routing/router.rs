//! Per-connection event handling.
//!
//! Handlers never fail outward: every error is logged and turned into a
//! reply event for the originating connection.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::chat::auth::gate::ConnectionGate;
use crate::chat::auth::guard::{AuthorizationGuard, SendAuthorization};
use crate::chat::core::actor::Actor;
use crate::chat::core::errors::{ChatError, ChatResult, ErrorKind};
use crate::chat::core::ids::{ConnectionId, SessionId};
use crate::chat::core::message::{FileData, NewMessage, SenderInfo};
use crate::chat::core::session::{AgentIdentity, CustomerIdentity, Priority};
use crate::chat::engine::lifecycle::SessionLifecycle;
use crate::chat::routing::events::{ClientEvent, FeedbackInput, SenderClaim, ServerEvent};
use crate::chat::routing::hub::{EventSender, RoomHub};
use crate::chat::routing::rooms::Room;

const SEND_FAILED: &str = "Failed to send message";
const JOIN_FAILED: &str = "Unable to join session";
const END_FAILED: &str = "Failed to end chat";
const START_FAILED: &str = "Failed to start chat";

/// A live connection and the actor resolved for it.
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    /// Connection id.
    pub id: ConnectionId,
    /// Resolved identity.
    pub actor: Actor,
}

impl ConnectionContext {
    /// Context for a connection whose actor was resolved under `id`.
    #[must_use]
    pub const fn new(id: ConnectionId, actor: Actor) -> Self {
        Self { id, actor }
    }

    fn agent_identity(&self, fallback_name: Option<String>) -> AgentIdentity {
        AgentIdentity {
            id: self.actor.id().to_string(),
            name: self.actor.name().map(str::to_string).or(fallback_name),
        }
    }
}

/// Dispatches client events to the guard, the lifecycle and the hub.
pub struct EventRouter {
    lifecycle: Arc<SessionLifecycle>,
    guard: AuthorizationGuard,
    hub: Arc<RoomHub>,
}

impl EventRouter {
    /// Create a router.
    #[must_use]
    pub fn new(lifecycle: Arc<SessionLifecycle>, hub: Arc<RoomHub>) -> Self {
        let guard = AuthorizationGuard::new(lifecycle.sessions());
        Self {
            lifecycle,
            guard,
            hub,
        }
    }

    /// Register a connection and put it in its coarse room.
    pub fn connect(&self, ctx: &ConnectionContext, sender: EventSender) {
        self.hub.register(ctx.id, sender);
        let room = ConnectionGate::coarse_room(&ctx.actor);
        info!(connection = %ctx.id, actor = ctx.actor.label(), %room, "Connection opened");
        self.hub.join(ctx.id, room);
    }

    /// Drop a connection. Its sessions stay as they are.
    pub fn disconnect(&self, ctx: &ConnectionContext) {
        info!(connection = %ctx.id, actor = ctx.actor.label(), "Connection closed");
        self.hub.unregister(ctx.id);
    }

    /// Reply to a frame that could not be decoded.
    pub fn reject_malformed(&self, ctx: &ConnectionContext, reason: &str) {
        warn!(connection = %ctx.id, reason, "Malformed client event");
        let error = if ctx.actor.is_staff() {
            format!("malformed event: {reason}")
        } else {
            "Malformed event".to_string()
        };
        self.hub.send_to(
            ctx.id,
            ServerEvent::MessageError {
                session_id: None,
                error,
            },
        );
    }

    /// Handle one client event.
    pub async fn handle(&self, ctx: &ConnectionContext, event: ClientEvent) {
        debug!(connection = %ctx.id, event = event.name(), "Client event");
        match event {
            ClientEvent::SendMessage {
                session_id,
                sender,
                content,
                text,
                file_data,
                timestamp: _,
            } => {
                let body = content.or(text).unwrap_or_default();
                if let Err(err) = self
                    .send_message(ctx, session_id, sender, body, file_data)
                    .await
                {
                    self.report(ctx, Some(session_id), &err, SEND_FAILED);
                }
            }
            ClientEvent::Typing {
                session_id,
                from,
                is_typing,
            } => self.typing(ctx, session_id, from, is_typing),
            ClientEvent::JoinSession { session_id } => self.join_session(ctx, session_id).await,
            ClientEvent::JoinUserRoom { user_id } => self.join_user_room(ctx, user_id),
            ClientEvent::JoinVoiceMonitoring => self.join_voice_monitoring(ctx),
            ClientEvent::EndChat {
                session_id,
                closed_by,
                feedback,
            } => {
                if let Err(err) = self.end_chat(ctx, session_id, closed_by, feedback).await {
                    self.report(ctx, Some(session_id), &err, END_FAILED);
                }
            }
            ClientEvent::StartChat {
                name,
                email,
                priority,
            } => {
                if let Err(err) = self.start_chat(ctx, name, email, priority).await {
                    self.report(ctx, None, &err, START_FAILED);
                }
            }
        }
    }

    async fn send_message(
        &self,
        ctx: &ConnectionContext,
        session_id: SessionId,
        sender: SenderClaim,
        content: String,
        file_data: Option<FileData>,
    ) -> ChatResult<()> {
        let (_, decision) = self
            .guard
            .authorize_send(&ctx.actor, session_id, sender.role)
            .await?;

        if matches!(decision, SendAuthorization::Agent { claims_session: true }) {
            self.lifecycle
                .claim_for_agent(session_id, ctx.agent_identity(sender.name.clone()))
                .await?;
        }

        let sender_info = SenderInfo {
            id: ctx.actor.id().to_string(),
            name: ctx.actor.name().map(str::to_string).or(sender.name),
        };
        self.lifecycle
            .save_message(NewMessage {
                session_id,
                sender: sender.role,
                sender_info,
                content,
                file_data,
            })
            .await?;
        Ok(())
    }

    fn typing(
        &self,
        ctx: &ConnectionContext,
        session_id: SessionId,
        from: Option<String>,
        is_typing: bool,
    ) {
        let room = Room::Session(session_id);
        if !self.hub.is_member(ctx.id, &room) {
            debug!(connection = %ctx.id, session = %session_id, "Typing outside joined session dropped");
            return;
        }

        let from = from
            .or_else(|| ctx.actor.name().map(str::to_string))
            .unwrap_or_else(|| ctx.actor.label().to_string());
        self.hub.broadcast_from(
            ctx.id,
            &room,
            &ServerEvent::UserTyping {
                session_id,
                from: from.clone(),
                is_typing,
            },
        );
        if !ctx.actor.is_staff() {
            self.hub.broadcast_from(
                ctx.id,
                &Room::Staff,
                &ServerEvent::CustomerTyping {
                    session_id,
                    from,
                    is_typing,
                },
            );
        }
    }

    async fn join_session(&self, ctx: &ConnectionContext, session_id: SessionId) {
        let reply = match self.guard.authorize_join(&ctx.actor, session_id).await {
            Ok(_) => {
                self.hub.join(ctx.id, Room::Session(session_id));
                debug!(connection = %ctx.id, session = %session_id, "Joined session room");
                ServerEvent::SessionJoined {
                    session_id,
                    success: true,
                    error: None,
                }
            }
            Err(err) => {
                log_failure(ctx, &err);
                ServerEvent::SessionJoined {
                    session_id,
                    success: false,
                    error: Some(err.client_message(ctx.actor.is_staff(), JOIN_FAILED)),
                }
            }
        };
        self.hub.send_to(ctx.id, reply);
    }

    fn join_user_room(&self, ctx: &ConnectionContext, user_id: String) {
        let own_room = !ctx.actor.is_anonymous() && ctx.actor.id() == user_id;
        if ctx.actor.is_staff() || own_room {
            self.hub.join(ctx.id, Room::User(user_id));
            return;
        }
        warn!(connection = %ctx.id, actor = ctx.actor.label(), "Denied user room join");
        self.hub.send_to(
            ctx.id,
            ServerEvent::MessageError {
                session_id: None,
                error: "Not allowed to join this room".to_string(),
            },
        );
    }

    fn join_voice_monitoring(&self, ctx: &ConnectionContext) {
        let reply = match ctx.actor.staff_role() {
            Some(role) => {
                self.hub.join(ctx.id, Room::VoiceMonitoring);
                ServerEvent::VoiceMonitoringJoined {
                    success: true,
                    role: Some(role),
                    reason: None,
                }
            }
            None => {
                warn!(connection = %ctx.id, actor = ctx.actor.label(), "Denied voice monitoring join");
                ServerEvent::VoiceMonitoringJoined {
                    success: false,
                    role: None,
                    reason: Some("Staff access required".to_string()),
                }
            }
        };
        self.hub.send_to(ctx.id, reply);
    }

    async fn end_chat(
        &self,
        ctx: &ConnectionContext,
        session_id: SessionId,
        closed_by: Option<String>,
        feedback: Option<FeedbackInput>,
    ) -> ChatResult<()> {
        self.guard.authorize_join(&ctx.actor, session_id).await?;
        if let Some(feedback) = feedback {
            self.lifecycle
                .save_feedback(session_id, feedback.rating, feedback.comments)
                .await?;
        }
        let closed_by = closed_by
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| ctx.actor.label().to_string());
        self.lifecycle.close(session_id, &closed_by).await?;
        Ok(())
    }

    async fn start_chat(
        &self,
        ctx: &ConnectionContext,
        name: Option<String>,
        email: Option<String>,
        priority: Option<Priority>,
    ) -> ChatResult<()> {
        let identity = match &ctx.actor {
            Actor::Anonymous { id } => CustomerIdentity {
                id: Some(id.clone()),
                name,
                email,
                is_anonymous: true,
            },
            Actor::Customer {
                id,
                name: token_name,
                email: token_email,
            } => CustomerIdentity {
                id: Some(id.clone()),
                name: token_name.clone().or(name),
                email: token_email.clone().or(email),
                is_anonymous: false,
            },
            Actor::Staff { .. } => {
                return Err(ChatError::Authorization(
                    "staff cannot open customer chats".to_string(),
                ));
            }
        };

        let session = self
            .lifecycle
            .create(identity, priority.unwrap_or_default())
            .await?;
        self.hub.join(ctx.id, Room::Session(session.session_id));
        self.hub.send_to(ctx.id, ServerEvent::ChatStarted { session });
        Ok(())
    }

    fn report(
        &self,
        ctx: &ConnectionContext,
        session_id: Option<SessionId>,
        err: &ChatError,
        fallback: &str,
    ) {
        log_failure(ctx, err);
        self.hub.send_to(
            ctx.id,
            ServerEvent::MessageError {
                session_id,
                error: err.client_message(ctx.actor.is_staff(), fallback),
            },
        );
    }
}

fn log_failure(ctx: &ConnectionContext, err: &ChatError) {
    match err.kind() {
        ErrorKind::Persistence => {
            error!(connection = %ctx.id, actor = ctx.actor.label(), %err, "Storage failure");
        }
        ErrorKind::Authorization => {
            warn!(connection = %ctx.id, actor = ctx.actor.label(), %err, "Request denied");
        }
        ErrorKind::NotFound | ErrorKind::Validation => {
            debug!(connection = %ctx.id, actor = ctx.actor.label(), %err, "Request rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::chat::core::actor::StaffRole;
    use crate::chat::core::config::{ChatConfig, StorageConfig};
    use crate::chat::core::message::SenderRole;
    use crate::chat::core::session::{ChatSession, SessionStatus};
    use crate::chat::engine::lifecycle::ChatBackends;
    use crate::chat::routing::hub::Broadcaster;

    struct Harness {
        router: EventRouter,
        lifecycle: Arc<SessionLifecycle>,
    }

    async fn harness() -> Harness {
        let config = ChatConfig {
            storage: StorageConfig::in_memory(),
            ..ChatConfig::default()
        };
        let backends = ChatBackends::sqlite(&config).await.unwrap();
        let hub = Arc::new(RoomHub::new());
        let broadcaster: Arc<dyn Broadcaster> = hub.clone();
        let lifecycle = Arc::new(SessionLifecycle::new(backends, broadcaster, 10));
        Harness {
            router: EventRouter::new(Arc::clone(&lifecycle), hub),
            lifecycle,
        }
    }

    fn connect(
        router: &EventRouter,
        actor: Actor,
    ) -> (ConnectionContext, mpsc::UnboundedReceiver<ServerEvent>) {
        let ctx = ConnectionContext::new(ConnectionId::new(), actor);
        let (tx, rx) = mpsc::unbounded_channel();
        router.connect(&ctx, tx);
        (ctx, rx)
    }

    fn staff(id: &str) -> Actor {
        Actor::Staff {
            id: id.to_string(),
            name: Some(format!("Staff {id}")),
            role: StaffRole::Support,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn names(events: &[ServerEvent]) -> Vec<&'static str> {
        events.iter().map(ServerEvent::name).collect()
    }

    fn send(session_id: SessionId, role: SenderRole, body: &str) -> ClientEvent {
        ClientEvent::SendMessage {
            session_id,
            sender: SenderClaim {
                role,
                id: None,
                name: None,
            },
            content: Some(body.to_string()),
            text: None,
            file_data: None,
            timestamp: None,
        }
    }

    async fn customer_session(h: &Harness, id: &str) -> ChatSession {
        h.lifecycle
            .create(
                CustomerIdentity {
                    id: Some(id.to_string()),
                    ..CustomerIdentity::default()
                },
                Priority::Normal,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_agent_reply_claims_the_session() {
        let h = harness().await;
        let session = customer_session(&h, "cust1").await;
        let (agent, mut agent_rx) = connect(&h.router, staff("s1"));

        h.router
            .handle(&agent, send(session.session_id, SenderRole::Agent, "hello"))
            .await;

        let stored = h.lifecycle.get(session.session_id).await.unwrap();
        assert_eq!(stored.agent_id(), Some("s1"));
        assert_eq!(stored.status, SessionStatus::Active);
        assert_eq!(
            names(&drain(&mut agent_rx)),
            vec!["session_assigned", "new_message"]
        );
    }

    #[tokio::test]
    async fn sender_identity_comes_from_the_connection() {
        let h = harness().await;
        let session = customer_session(&h, "cust1").await;
        let (customer, _rx) = connect(
            &h.router,
            Actor::Customer {
                id: "cust1".to_string(),
                name: Some("Pat".to_string()),
                email: None,
            },
        );

        let event = ClientEvent::SendMessage {
            session_id: session.session_id,
            sender: SenderClaim {
                role: SenderRole::Customer,
                id: Some("someone-else".to_string()),
                name: Some("Spoof".to_string()),
            },
            content: None,
            text: Some("hi".to_string()),
            file_data: None,
            timestamp: None,
        };
        h.router.handle(&customer, event).await;

        let transcript = h.lifecycle.transcript(session.session_id).await.unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].sender_info.id, "cust1");
        assert_eq!(transcript[0].sender_info.name.as_deref(), Some("Pat"));
        assert_eq!(transcript[0].content, "hi");
    }

    #[tokio::test]
    async fn customer_cannot_send_as_agent() {
        let h = harness().await;
        let session = customer_session(&h, "cust1").await;
        let (customer, mut rx) = connect(
            &h.router,
            Actor::Customer {
                id: "cust1".to_string(),
                name: None,
                email: None,
            },
        );

        h.router
            .handle(&customer, send(session.session_id, SenderRole::Agent, "trust me"))
            .await;

        let events = drain(&mut rx);
        assert_eq!(names(&events), vec!["message_error"]);
        match &events[0] {
            ServerEvent::MessageError { error, .. } => assert_eq!(error, SEND_FAILED),
            other => panic!("unexpected event {}", other.name()),
        }
        let stored = h.lifecycle.get(session.session_id).await.unwrap();
        assert!(stored.agent.is_none());
    }

    #[tokio::test]
    async fn anonymous_actor_cannot_join_another_anonymous_session() {
        let h = harness().await;
        let session = h
            .lifecycle
            .create(
                CustomerIdentity {
                    id: Some("anon-Y".to_string()),
                    is_anonymous: true,
                    ..CustomerIdentity::default()
                },
                Priority::Normal,
            )
            .await
            .unwrap();

        let (intruder, mut intruder_rx) = connect(
            &h.router,
            Actor::Anonymous {
                id: "anon-X".to_string(),
            },
        );
        h.router
            .handle(
                &intruder,
                ClientEvent::JoinSession {
                    session_id: session.session_id,
                },
            )
            .await;
        match drain(&mut intruder_rx).as_slice() {
            [ServerEvent::SessionJoined { success, error, .. }] => {
                assert!(!success);
                assert_eq!(error.as_deref(), Some(JOIN_FAILED));
            }
            other => panic!("unexpected events {:?}", names(other)),
        }

        let (owner, mut owner_rx) = connect(
            &h.router,
            Actor::Anonymous {
                id: "anon-Y".to_string(),
            },
        );
        h.router
            .handle(
                &owner,
                ClientEvent::JoinSession {
                    session_id: session.session_id,
                },
            )
            .await;
        assert!(matches!(
            drain(&mut owner_rx).as_slice(),
            [ServerEvent::SessionJoined { success: true, .. }]
        ));
    }

    #[tokio::test]
    async fn anonymous_actor_cannot_send_into_another_anonymous_session() {
        let h = harness().await;
        let session = h
            .lifecycle
            .create(
                CustomerIdentity {
                    id: Some("anon-Y".to_string()),
                    is_anonymous: true,
                    ..CustomerIdentity::default()
                },
                Priority::Normal,
            )
            .await
            .unwrap();
        let (_agent, mut agent_rx) = connect(&h.router, staff("s1"));
        let (intruder, mut intruder_rx) = connect(
            &h.router,
            Actor::Anonymous {
                id: "anon-X".to_string(),
            },
        );

        h.router
            .handle(&intruder, send(session.session_id, SenderRole::Customer, "hi"))
            .await;

        match drain(&mut intruder_rx).as_slice() {
            [ServerEvent::MessageError { session_id, error }] => {
                assert_eq!(*session_id, Some(session.session_id));
                assert_eq!(error, SEND_FAILED);
            }
            other => panic!("unexpected events {:?}", names(other)),
        }
        assert!(drain(&mut agent_rx).is_empty());
        let transcript = h.lifecycle.transcript(session.session_id).await.unwrap();
        assert!(transcript.is_empty());

        let (owner, _owner_rx) = connect(
            &h.router,
            Actor::Anonymous {
                id: "anon-Y".to_string(),
            },
        );
        h.router
            .handle(&owner, send(session.session_id, SenderRole::Customer, "hello"))
            .await;
        let transcript = h.lifecycle.transcript(session.session_id).await.unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].sender_info.id, "anon-Y");
    }

    #[tokio::test]
    async fn typing_is_relayed_to_others_in_the_session() {
        let h = harness().await;
        let session = customer_session(&h, "cust1").await;
        let (customer, mut customer_rx) = connect(
            &h.router,
            Actor::Customer {
                id: "cust1".to_string(),
                name: None,
                email: None,
            },
        );
        let (agent, mut agent_rx) = connect(&h.router, staff("s1"));
        let join = ClientEvent::JoinSession {
            session_id: session.session_id,
        };
        h.router.handle(&customer, join.clone()).await;
        h.router.handle(&agent, join).await;
        drain(&mut customer_rx);
        drain(&mut agent_rx);

        h.router
            .handle(
                &customer,
                ClientEvent::Typing {
                    session_id: session.session_id,
                    from: None,
                    is_typing: true,
                },
            )
            .await;

        assert!(drain(&mut customer_rx).is_empty());
        assert_eq!(
            names(&drain(&mut agent_rx)),
            vec!["user_typing", "customer_typing"]
        );
    }

    #[tokio::test]
    async fn typing_without_joining_is_dropped() {
        let h = harness().await;
        let session = customer_session(&h, "cust1").await;
        let (outsider, _rx) = connect(
            &h.router,
            Actor::Anonymous {
                id: "anon-Z".to_string(),
            },
        );
        let (_agent, mut agent_rx) = connect(&h.router, staff("s1"));

        h.router
            .handle(
                &outsider,
                ClientEvent::Typing {
                    session_id: session.session_id,
                    from: Some("ghost".to_string()),
                    is_typing: true,
                },
            )
            .await;
        assert!(drain(&mut agent_rx).is_empty());
    }

    #[tokio::test]
    async fn voice_monitoring_is_staff_only() {
        let h = harness().await;
        let (agent, mut agent_rx) = connect(&h.router, staff("s1"));
        let (guest, mut guest_rx) = connect(
            &h.router,
            Actor::Anonymous {
                id: "anon-1".to_string(),
            },
        );

        h.router.handle(&agent, ClientEvent::JoinVoiceMonitoring).await;
        h.router.handle(&guest, ClientEvent::JoinVoiceMonitoring).await;

        assert!(matches!(
            drain(&mut agent_rx).as_slice(),
            [ServerEvent::VoiceMonitoringJoined {
                success: true,
                role: Some(StaffRole::Support),
                ..
            }]
        ));
        assert!(matches!(
            drain(&mut guest_rx).as_slice(),
            [ServerEvent::VoiceMonitoringJoined { success: false, .. }]
        ));
    }

    #[tokio::test]
    async fn start_then_end_chat_with_feedback() {
        let h = harness().await;
        let (guest, mut guest_rx) = connect(
            &h.router,
            Actor::Anonymous {
                id: "anon-7".to_string(),
            },
        );

        h.router
            .handle(
                &guest,
                ClientEvent::StartChat {
                    name: Some("Visitor".to_string()),
                    email: None,
                    priority: None,
                },
            )
            .await;
        let session_id = match drain(&mut guest_rx).as_slice() {
            [ServerEvent::ChatStarted { session }] => {
                assert!(session.customer.is_anonymous);
                assert_eq!(session.customer.id, "anon-7");
                session.session_id
            }
            other => panic!("unexpected events {:?}", names(other)),
        };

        h.router
            .handle(
                &guest,
                ClientEvent::EndChat {
                    session_id,
                    closed_by: None,
                    feedback: Some(FeedbackInput {
                        rating: 4,
                        comments: None,
                    }),
                },
            )
            .await;

        assert_eq!(names(&drain(&mut guest_rx)), vec!["session_closed"]);
        let stored = h.lifecycle.get(session_id).await.unwrap();
        assert!(stored.is_closed());
        assert_eq!(stored.closed_by.as_deref(), Some("anonymous"));
        assert_eq!(stored.feedback.map(|f| f.rating), Some(4));
    }

    #[tokio::test]
    async fn staff_cannot_start_customer_chats() {
        let h = harness().await;
        let (agent, mut rx) = connect(&h.router, staff("s1"));
        h.router
            .handle(
                &agent,
                ClientEvent::StartChat {
                    name: None,
                    email: None,
                    priority: None,
                },
            )
            .await;
        assert_eq!(names(&drain(&mut rx)), vec!["message_error"]);
    }

    #[tokio::test]
    async fn user_room_is_limited_to_its_owner_and_staff() {
        let h = harness().await;
        let (customer, mut rx) = connect(
            &h.router,
            Actor::Customer {
                id: "cust1".to_string(),
                name: None,
                email: None,
            },
        );
        h.router
            .handle(
                &customer,
                ClientEvent::JoinUserRoom {
                    user_id: "cust2".to_string(),
                },
            )
            .await;
        assert_eq!(names(&drain(&mut rx)), vec!["message_error"]);

        h.router
            .handle(
                &customer,
                ClientEvent::JoinUserRoom {
                    user_id: "cust1".to_string(),
                },
            )
            .await;
        assert!(drain(&mut rx).is_empty());
    }
}
