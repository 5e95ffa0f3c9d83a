//! Actor owning one session.
//!
//! ```text
//! ┌──────────────┐    mpsc Command     ┌────────────────────┐
//! │ SessionHandle │ ─────────────────> │ session task        │
//! │ (cloneable)   │ <── oneshot reply ─ │  owns: Session      │
//! └──────────────┘                     └────────────────────┘
//! ```
//!
//! The task runs one command at a time. While a send is in flight it keeps
//! reading the channel: a reset abandons the in-flight completion (dropping
//! the HTTP body) and clears history; anything else waits its turn.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::client::{ClientError, Completion, CompletionTransport};
use crate::model::Message;
use crate::options::SessionOptions;
use crate::proxy_api::ToolDefinitions;
use crate::session::Session;

/// Commands queued before the task applies back-pressure.
const COMMAND_BUFFER: usize = 32;

type OptionsUpdate = Box<dyn FnOnce(&mut SessionOptions) + Send>;

enum Command {
    Send {
        message: Message,
        reply: oneshot::Sender<Result<Completion, ClientError>>,
    },
    Control(Control),
}

/// Commands applied synchronously between sends.
enum Control {
    Reset {
        reply: oneshot::Sender<()>,
    },
    Messages {
        reply: oneshot::Sender<Vec<Message>>,
    },
    UpdateOptions {
        update: OptionsUpdate,
        reply: oneshot::Sender<SessionOptions>,
    },
    ApplyToolDefinitions {
        definitions: ToolDefinitions,
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a session running on its own task.
///
/// The task stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Move `session` onto a new tokio task.
    pub fn spawn<T>(session: Session<T>) -> Self
    where
        T: CompletionTransport + 'static,
    {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run_session(session, rx));
        Self { tx }
    }

    /// Send a message. Resolves once the completion has been folded into
    /// history, or with [`ClientError::StreamCancelled`] if a reset
    /// interrupted it.
    pub async fn send(&self, message: Message) -> Result<Completion, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send { message, reply }).await?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    /// Clear history, abandoning any in-flight completion.
    pub async fn reset(&self) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Control(Control::Reset { reply }))
            .await?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    /// Snapshot of the history.
    pub async fn messages(&self) -> Result<Vec<Message>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Control(Control::Messages { reply }))
            .await?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    /// Current options, unchanged.
    pub async fn options(&self) -> Result<SessionOptions, ClientError> {
        self.update_options(|_| {}).await
    }

    /// Apply `update` to the session options and return the result.
    pub async fn update_options<F>(&self, update: F) -> Result<SessionOptions, ClientError>
    where
        F: FnOnce(&mut SessionOptions) + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Control(Control::UpdateOptions {
            update: Box::new(update),
            reply,
        }))
        .await?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub async fn apply_tool_definitions(
        &self,
        definitions: ToolDefinitions,
    ) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Control(Control::ApplyToolDefinitions {
            definitions,
            reply,
        }))
        .await?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    async fn request(&self, command: Command) -> Result<(), ClientError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }
}

async fn run_session<T: CompletionTransport>(
    mut session: Session<T>,
    mut rx: mpsc::Receiver<Command>,
) {
    let mut backlog = VecDeque::new();

    loop {
        let command = match backlog.pop_front() {
            Some(command) => command,
            None => match rx.recv().await {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            Command::Send { message, reply } => {
                let interrupted =
                    drive_send(&mut session, message, reply, &mut rx, &mut backlog).await;

                if let Some(reset_reply) = interrupted {
                    // Everything queued behind the abandoned send was issued
                    // before the reset.
                    for command in backlog.drain(..) {
                        match command {
                            Command::Send { reply, .. } => {
                                let _ = reply.send(Err(ClientError::StreamCancelled));
                            }
                            Command::Control(control) => apply(&mut session, control),
                        }
                    }
                    session.reset();
                    let _ = reset_reply.send(());
                }
            }
            Command::Control(control) => apply(&mut session, control),
        }
    }

    debug!("session task stopped");
}

/// Run one send to completion while listening for further commands.
/// Returns the reset reply if a reset interrupted it.
async fn drive_send<T: CompletionTransport>(
    session: &mut Session<T>,
    message: Message,
    reply: oneshot::Sender<Result<Completion, ClientError>>,
    rx: &mut mpsc::Receiver<Command>,
    backlog: &mut VecDeque<Command>,
) -> Option<oneshot::Sender<()>> {
    let mut open = true;
    let send = session.send_message(message);
    tokio::pin!(send);

    loop {
        tokio::select! {
            result = &mut send => {
                let _ = reply.send(result);
                return None;
            }
            incoming = rx.recv(), if open => match incoming {
                Some(Command::Control(Control::Reset { reply: reset_reply })) => {
                    info!("reset during completion, abandoning stream");
                    let _ = reply.send(Err(ClientError::StreamCancelled));
                    return Some(reset_reply);
                }
                Some(other) => backlog.push_back(other),
                None => open = false,
            },
        }
    }
}

fn apply<T: CompletionTransport>(session: &mut Session<T>, control: Control) {
    match control {
        Control::Reset { reply } => {
            session.reset();
            let _ = reply.send(());
        }
        Control::Messages { reply } => {
            let _ = reply.send(session.messages().snapshot());
        }
        Control::UpdateOptions { update, reply } => {
            update(session.options_mut());
            let _ = reply.send(session.options().clone());
        }
        Control::ApplyToolDefinitions { definitions, reply } => {
            session.apply_tool_definitions(&definitions);
            let _ = reply.send(());
        }
    }
}
