//! Exhaustive page walking shared by every directory endpoint.
//!
//! GitHub list endpoints return one page per request and advertise the next
//! page through a `Link: <url>; rel="next"` response header.  [`walk_pages`]
//! follows those links until none remains, handing each page to a visitor
//! that may stop early once it has found what it is looking for.

use std::future::Future;
use std::ops::ControlFlow;

use tracing::trace;

use super::ResolveError;

/// Upper bound on pages followed for one listing.  A remote that keeps
/// advertising a next page past this is treated as broken.
const MAX_PAGES: usize = 10_000;

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Absolute URL of the following page, if any.
    pub next: Option<String>,
}

/// Fetch pages starting at `first` until the remote reports no further page,
/// or until `visit` breaks.
///
/// Returns `Ok(Some(r))` when `visit` broke with `r`, `Ok(None)` when every
/// page was visited.  The first failing page request fails the whole walk.
pub async fn walk_pages<T, R, F, Fut, V>(
    first: String,
    mut fetch: F,
    mut visit: V,
) -> Result<Option<R>, ResolveError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Page<T>, ResolveError>>,
    V: FnMut(Vec<T>) -> ControlFlow<R>,
{
    let mut next = Some(first);
    let mut pages = 0usize;

    while let Some(url) = next.take() {
        if pages == MAX_PAGES {
            return Err(ResolveError::Remote(format!(
                "pagination did not terminate after {MAX_PAGES} pages"
            )));
        }
        let page = fetch(url).await?;
        pages += 1;
        if let ControlFlow::Break(found) = visit(page.items) {
            trace!(pages, "pagination stopped early");
            return Ok(Some(found));
        }
        next = page.next;
    }

    trace!(pages, "pagination exhausted");
    Ok(None)
}

/// Fetch every page starting at `first` and concatenate the items in page
/// order.
pub async fn fetch_all_pages<T, F, Fut>(first: String, fetch: F) -> Result<Vec<T>, ResolveError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Page<T>, ResolveError>>,
{
    let mut items = Vec::new();
    walk_pages(first, fetch, |page| {
        items.extend(page);
        ControlFlow::<()>::Continue(())
    })
    .await?;
    Ok(items)
}

/// Extract the `rel="next"` target from an RFC 8288 `Link` header value.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|link| {
        let mut parts = link.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim();
            param == r#"rel="next""# || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(|t| t.to_string())
    })
}
