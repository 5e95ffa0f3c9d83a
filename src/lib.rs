//! # adapter-console - test console for a tool-call adapter proxy
//!
//! An in-memory chat session that talks to an OpenAI-compatible proxy and
//! shows how its completions, streamed or not, reassemble into messages.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Stateful SSE decoding that tolerates arbitrary chunk boundaries
//! - One assistant message committed per `finish_reason` boundary
//! - Marker or structured handling of streamed tool-call deltas
//! - Session actor with reset-while-streaming cancellation
//! - Typed client for the proxy's config, tool parsing, model and probe endpoints
//!
//! ## Architecture
//!
//! Control flows leaves-last:
//!
//! 1. **`Session`** appends the user message to its **`MessageStore`**
//! 2. **`payload::build_request`** derives a **`CompletionRequest`**, injecting the system prompt
//! 3. **`CompletionClient`** sends it through a **`CompletionTransport`**
//! 4. The body is folded into the store by **`StreamConsumer`** (SSE) or
//!    **`response::consume_document`** (single JSON document)
//!
//! ## Example
//! ```no_run
//! use adapter_console::http::HttpTransport;
//! use adapter_console::model::Role;
//! use adapter_console::options::{SessionOptions, TransportOptions};
//! use adapter_console::session::Session;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = HttpTransport::new(
//!         TransportOptions::default().with_base_url("http://127.0.0.1:8000".to_string()),
//!     )?;
//!     let options = SessionOptions::new("gpt-4o")
//!         .with_stream(true)
//!         .with_system_prompt("You are a coding agent.");
//!
//!     let mut session = Session::new(transport, options);
//!     session.send(Role::User, "List the files in this repo.").await?;
//!
//!     for message in session.messages().iter() {
//!         println!("{}: {}", message.role(), message.text());
//!     }
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod client;
pub mod http;
pub mod model;
pub mod options;
pub mod payload;
pub mod proxy_api;
pub mod response;
pub mod session;
pub mod sse;
pub mod store;
pub mod stream;

// Re-exports for convenience
pub use actor::SessionHandle;
pub use client::{ClientError, Completion, CompletionClient, CompletionTransport};
pub use model::{CompletionRequest, Message, Role};
pub use session::Session;
pub use store::MessageStore;
pub use stream::{StreamConsumer, StreamSummary};
