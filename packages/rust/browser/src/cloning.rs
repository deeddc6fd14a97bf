//! Cookie-replay session cloning.
//!
//! N modules crawl in N parallel workers, each driving its own browser
//! session under the same authenticated identity. Cloning copies the source
//! session's cookie snapshot (plain data, not a live reference) into a
//! freshly launched session before any navigation occurs.

use tracing::{debug, instrument, warn};

use traincrawl_shared::{Cookie, Result};

use crate::session::{BrowserSession, SessionFactory};

/// Launch an independent session authenticated as the same user as the
/// cookie snapshot's source.
///
/// The returned session shares no mutable state with the source. If cookie
/// replay fails, the half-built session is closed before the error
/// propagates, so no browser leaks.
#[instrument(skip_all, fields(cookies = cookies.len()))]
pub async fn clone_session<F: SessionFactory>(
    factory: &F,
    cookies: &[Cookie],
) -> Result<F::Session> {
    let mut session = factory.launch().await?;

    if let Err(e) = session.add_cookies(cookies).await {
        warn!(error = %e, "cookie replay failed, closing cloned session");
        if let Err(close_err) = session.close().await {
            warn!(error = %close_err, "failed to close half-built session");
        }
        return Err(e);
    }

    debug!("session cloned with authentication cookies");
    Ok(session)
}
