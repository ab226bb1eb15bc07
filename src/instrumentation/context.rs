use std::future::Future;

use crate::types::SessionContext;

tokio::task_local! {
    static CURRENT_SESSION: SessionContext;
}

/// Runs `fut` with `context` as the established session of every call it makes.
pub async fn with_session<F: Future>(context: SessionContext, fut: F) -> F::Output {
    CURRENT_SESSION.scope(context, fut).await
}

/// The session established by an enclosing `with_session`, if any.
pub fn current_session() -> Option<SessionContext> {
    CURRENT_SESSION.try_with(|ctx| ctx.clone()).ok()
}
