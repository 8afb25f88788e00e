use anyhow::{Context, Result};
use serde::Serialize;
use suspense_cache::caching::ReadResult;
use suspense_cache::suspense::{Interrupt, SuspenseBoundary};
use suspense_cache::users::{User, UserCache, UserClient, UserHandle, fetch_user_data};

/// A user that is being prefetched.
#[derive(Debug)]
pub struct Item {
    pub id: String,
    pub user: UserHandle,
}

/// The outcome of rendering a single [`Item`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RenderedItem {
    Loaded { id: String, user: User },
    Failed { id: String, error: String },
}

/// Starts fetching all users right away, before anything is rendered.
pub fn prefetch_items(cache: &UserCache, client: &UserClient, ids: &[String]) -> Vec<Item> {
    ids.iter()
        .map(|id| Item {
            id: id.clone(),
            user: fetch_user_data(cache, client, id.as_str()),
        })
        .collect()
}

/// Renders a single item.
///
/// A failed user is rendered in place, so that one failure does not hide all other users.
fn render_item(item: &Item) -> Result<RenderedItem, Interrupt> {
    let id = item.id.clone();
    match item.user.read() {
        ReadResult::Ready(user) => Ok(RenderedItem::Loaded {
            id,
            user: user.data.clone(),
        }),
        ReadResult::Failed(error) => Ok(RenderedItem::Failed {
            id,
            error: error.to_string(),
        }),
        ReadResult::Suspended(suspension) => Err(suspension.into()),
    }
}

pub fn render_items(items: &[Item]) -> Result<Vec<RenderedItem>, Interrupt> {
    items.iter().map(render_item).collect()
}

/// Prefetches the users with the given `ids` and renders them once all of them are done.
///
/// `fallback` is called when the first render attempt has to wait for a pending user.
pub async fn run<F: FnMut()>(
    cache: &UserCache,
    client: &UserClient,
    ids: &[String],
    fallback: F,
) -> Result<Vec<RenderedItem>> {
    let items = prefetch_items(cache, client, ids);

    let mut boundary = SuspenseBoundary::new(fallback);
    let rendered = boundary
        .render(|| render_items(&items))
        .await
        .context("failed to render users")?;

    tracing::debug!(
        attempts = boundary.attempts(),
        suspensions = boundary.suspensions(),
        "Rendered {} users",
        rendered.len()
    );

    Ok(rendered)
}
