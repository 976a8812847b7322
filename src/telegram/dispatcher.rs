// Event dispatcher: routes each inbound event to one engine flow on its own task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::core::gateway::ChatGateway;
use crate::core::moderation::{ChatKind, InboundEvent, ModerationEngine, UserId};
use crate::core::store::KvStore;

/// Which engine flow an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    NewMembers,
    LeftMember,
    BotMessage,
    /// Commands, human chatter and anything outside supergroups.
    Ignored,
}

/// Classify an event. Membership changes win over the sender check.
pub fn classify(event: &InboundEvent, moderator_id: UserId) -> Flow {
    if event.chat_kind != ChatKind::Supergroup {
        return Flow::Ignored;
    }
    if !event.new_members.is_empty() {
        Flow::NewMembers
    } else if event.left_member.is_some() {
        Flow::LeftMember
    } else if event.sender.is_bot && event.sender.id != moderator_id {
        Flow::BotMessage
    } else {
        Flow::Ignored
    }
}

pub struct Dispatcher<S: KvStore, G: ChatGateway> {
    engine: Arc<ModerationEngine<S, G>>,
}

impl<S, G> Dispatcher<S, G>
where
    S: KvStore + 'static,
    G: ChatGateway + 'static,
{
    pub fn new(engine: Arc<ModerationEngine<S, G>>) -> Self {
        Self { engine }
    }

    /// Consume events until the stream closes, then wait for in-flight tasks.
    ///
    /// Tasks run independently: no ordering between them, and a failing or
    /// panicking task only costs its own event.
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>) {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                next = events.recv() => match next {
                    Some(event) => self.dispatch(&mut tasks, event),
                    None => break,
                },
                Some(done) = tasks.join_next(), if !tasks.is_empty() => log_task_result(done),
            }
        }

        tracing::info!("event stream closed, draining {} tasks", tasks.len());
        while let Some(done) = tasks.join_next().await {
            log_task_result(done);
        }
    }

    fn dispatch(&self, tasks: &mut JoinSet<()>, event: InboundEvent) {
        let flow = classify(&event, self.engine.moderator_id());
        if flow == Flow::Ignored {
            return;
        }

        let engine = Arc::clone(&self.engine);
        tasks.spawn(async move {
            let result = match flow {
                Flow::NewMembers => engine.process_new_members(&event).await.map(|_| ()),
                Flow::LeftMember => engine.process_left_member(&event).await,
                Flow::BotMessage => engine.process_bot_message(&event).await.map(|_| ()),
                Flow::Ignored => Ok(()),
            };
            if let Err(e) = result {
                tracing::error!(
                    chat = event.chat_id,
                    from = event.sender.id,
                    ?flow,
                    "event processing failed: {}",
                    e
                );
            }
        });
    }
}

fn log_task_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        tracing::error!("event task aborted: {}", e);
    }
}
