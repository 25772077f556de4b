//! Minimal demo server: greets new conversations and echoes messages back
//! word by word.
//!
//! ```sh
//! cargo run --example echo
//! curl -N -H 'User-Id: u1' -H 'Content-Type: application/json' \
//!   -d '{"message":"hi"}' http://127.0.0.1:3000/api/conversations/stream
//! ```

use std::sync::Arc;

use bubblekit::{
    BubbleServer, ConversationSummary, MessageContext, NewChatContext, Runtime, bubble,
    now_millis, set_conversation_list,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = Arc::new(
        Runtime::new()
            .on_new_chat(|cx: NewChatContext| async move {
                let greeting = bubble().name("Echo bot").send().await?;
                greeting.set("Hello!").await?;
                greeting.done().await?;
                let entry =
                    ConversationSummary::new(cx.conversation_id.clone(), "Echo chat", now_millis())?;
                set_conversation_list(&cx.user_id, vec![entry]).await?;
                Ok(())
            })
            .on_message(|cx: MessageContext| async move {
                let reply = bubble().send().await?;
                reply.stream("Echo:").await?;
                for word in cx.message.split_whitespace() {
                    reply.stream(format!(" {word}")).await?;
                }
                reply.done().await?;
                Ok(())
            }),
    );

    let server = BubbleServer::serve(runtime, "127.0.0.1:3000".parse()?).await?;
    tracing::info!(bind = %server.config.bind, "echo server listening");
    tokio::signal::ctrl_c().await?;
    server.cancel();
    Ok(())
}
