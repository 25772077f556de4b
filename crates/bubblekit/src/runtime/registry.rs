//! User-supplied handler slots.
//!
//! The runtime holds three optional callbacks. Registration goes through
//! adapter traits so callers can hand in either a closure taking the typed
//! context struct or, for the new-chat and history kinds, one taking
//! `(conversation_id, user_id)` positionally. History handlers may return
//! plain records, bubble templates, or nothing at all; outputs are
//! normalized before the controller sees them.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
    error::HandlerError,
    model::bubble::{BubbleRecord, BubbleTemplate},
};

/// What the message handler is invoked with.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub conversation_id: String,
    pub user_id: String,
    pub message: String,
}

/// What the new-chat handler is invoked with.
#[derive(Debug, Clone)]
pub struct NewChatContext {
    pub conversation_id: String,
    pub user_id: String,
}

/// What the history handler is invoked with.
#[derive(Debug, Clone)]
pub struct HistoryContext {
    pub conversation_id: String,
    pub user_id: String,
}

pub type MessageHandlerFn =
    Arc<dyn Fn(MessageContext) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;
pub type NewChatHandlerFn =
    Arc<dyn Fn(NewChatContext) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;
pub type HistoryHandlerFn = Arc<
    dyn Fn(HistoryContext) -> BoxFuture<'static, Result<Option<Vec<BubbleRecord>>, HandlerError>>
        + Send
        + Sync,
>;

/// Marker for handlers taking the context struct.
pub struct ContextArgs;
/// Marker for handlers taking `(conversation_id, user_id)` positionally.
pub struct PositionalArgs;

pub trait IntoMessageHandler<Marker> {
    fn into_message_handler(self) -> MessageHandlerFn;
}

impl<F, Fut> IntoMessageHandler<ContextArgs> for F
where
    F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn into_message_handler(self) -> MessageHandlerFn {
        Arc::new(move |cx| Box::pin(self(cx)))
    }
}

pub trait IntoNewChatHandler<Marker> {
    fn into_new_chat_handler(self) -> NewChatHandlerFn;
}

impl<F, Fut> IntoNewChatHandler<ContextArgs> for F
where
    F: Fn(NewChatContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn into_new_chat_handler(self) -> NewChatHandlerFn {
        Arc::new(move |cx| Box::pin(self(cx)))
    }
}

impl<F, Fut> IntoNewChatHandler<PositionalArgs> for F
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn into_new_chat_handler(self) -> NewChatHandlerFn {
        Arc::new(move |cx| Box::pin(self(cx.conversation_id, cx.user_id)))
    }
}

/// Normalizes what a history handler may hand back.
pub trait IntoHistoryMessages {
    fn into_history_messages(self) -> Result<Option<Vec<BubbleRecord>>, HandlerError>;
}

impl IntoHistoryMessages for Option<Vec<BubbleRecord>> {
    fn into_history_messages(self) -> Result<Option<Vec<BubbleRecord>>, HandlerError> {
        Ok(self)
    }
}

impl IntoHistoryMessages for Vec<BubbleRecord> {
    fn into_history_messages(self) -> Result<Option<Vec<BubbleRecord>>, HandlerError> {
        Ok(Some(self))
    }
}

impl IntoHistoryMessages for Vec<BubbleTemplate> {
    fn into_history_messages(self) -> Result<Option<Vec<BubbleRecord>>, HandlerError> {
        let records = self
            .iter()
            .map(BubbleTemplate::try_into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(records))
    }
}

impl IntoHistoryMessages for Option<Vec<BubbleTemplate>> {
    fn into_history_messages(self) -> Result<Option<Vec<BubbleRecord>>, HandlerError> {
        match self {
            Some(templates) => templates.into_history_messages(),
            None => Ok(None),
        }
    }
}

impl IntoHistoryMessages for () {
    fn into_history_messages(self) -> Result<Option<Vec<BubbleRecord>>, HandlerError> {
        Ok(None)
    }
}

pub trait IntoHistoryHandler<Marker> {
    fn into_history_handler(self) -> HistoryHandlerFn;
}

impl<F, Fut, R> IntoHistoryHandler<(ContextArgs, R)> for F
where
    F: Fn(HistoryContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: IntoHistoryMessages + 'static,
{
    fn into_history_handler(self) -> HistoryHandlerFn {
        Arc::new(move |cx| {
            let fut = self(cx);
            Box::pin(async move { fut.await?.into_history_messages() })
        })
    }
}

impl<F, Fut, R> IntoHistoryHandler<(PositionalArgs, R)> for F
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: IntoHistoryMessages + 'static,
{
    fn into_history_handler(self) -> HistoryHandlerFn {
        Arc::new(move |cx| {
            let fut = self(cx.conversation_id, cx.user_id);
            Box::pin(async move { fut.await?.into_history_messages() })
        })
    }
}

/// The three optional slots. Last registration wins.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    pub(crate) on_new_chat: Option<NewChatHandlerFn>,
    pub(crate) on_message: Option<MessageHandlerFn>,
    pub(crate) on_history: Option<HistoryHandlerFn>,
}

impl HandlerRegistry {
    pub(crate) fn set_new_chat<H, M>(&mut self, handler: H)
    where
        H: IntoNewChatHandler<M>,
    {
        self.on_new_chat = Some(handler.into_new_chat_handler());
    }

    pub(crate) fn set_message<H, M>(&mut self, handler: H)
    where
        H: IntoMessageHandler<M>,
    {
        self.on_message = Some(handler.into_message_handler());
    }

    pub(crate) fn set_history<H, M>(&mut self, handler: H)
    where
        H: IntoHistoryHandler<M>,
    {
        self.on_history = Some(handler.into_history_handler());
    }
}
