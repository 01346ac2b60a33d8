use async_trait::async_trait;
use serde_json::{json, Value};
use skylink_core::host::{BookmarkDestination, BookmarkNode, BookmarkQuery, NewBookmark};
use skylink_core::{Error, Result};
use tracing::debug;

use crate::{id_param, require_str, str_param, Handler, HandlerContext, HandlerSchema};

/// Folder new bookmarks land in unless told otherwise.
const BOOKMARKS_BAR_ID: &str = "1";

pub struct BookmarksListHandler;

#[async_trait]
impl Handler for BookmarksListHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "bookmarks.list",
            capability: "bookmarks",
            description: "Return the full bookmark tree.",
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, _params: Value) -> Result<Value> {
        let tree = ctx.host.bookmarks.get_tree().await?;
        Ok(serde_json::to_value(tree)?)
    }
}

pub struct BookmarksSearchHandler;

#[async_trait]
impl Handler for BookmarksSearchHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "bookmarks.search",
            capability: "bookmarks",
            description: "Search bookmarks by title or URL text.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_str(params, "query", "Query required").map(|_| ())
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let query = require_str(&params, "query", "Query required")?;
        let results = ctx
            .host
            .bookmarks
            .search(BookmarkQuery::Text(query.to_string()))
            .await?;
        Ok(serde_json::to_value(results)?)
    }
}

pub struct BookmarksAddHandler;

#[async_trait]
impl Handler for BookmarksAddHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "bookmarks.add",
            capability: "bookmarks",
            description: "Add a bookmark, optionally into a named folder that is created on demand.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        require_str(params, "url", "URL required").map(|_| ())
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let url = require_str(&params, "url", "URL required")?;
        let title = str_param(&params, "title").unwrap_or(url);

        let mut parent_id = BOOKMARKS_BAR_ID.to_string();
        if let Some(folder) = str_param(&params, "folder") {
            let existing = ctx
                .host
                .bookmarks
                .search(BookmarkQuery::Title(folder.to_string()))
                .await?;
            parent_id = match existing.into_iter().find(|node| node.is_folder()) {
                Some(node) => node.id,
                None => {
                    debug!(folder = %folder, "Creating bookmark folder");
                    ctx.host
                        .bookmarks
                        .create(NewBookmark {
                            parent_id: Some(BOOKMARKS_BAR_ID.to_string()),
                            title: folder.to_string(),
                            url: None,
                        })
                        .await?
                        .id
                }
            };
        }

        let bookmark = ctx
            .host
            .bookmarks
            .create(NewBookmark {
                parent_id: Some(parent_id),
                title: title.to_string(),
                url: Some(url.to_string()),
            })
            .await?;
        Ok(serde_json::to_value(bookmark)?)
    }
}

pub struct BookmarksDeleteHandler;

#[async_trait]
impl Handler for BookmarksDeleteHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "bookmarks.delete",
            capability: "bookmarks",
            description: "Remove a bookmark or an empty folder.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        id_param(params, "id")
            .map(|_| ())
            .ok_or_else(|| Error::Validation("Bookmark ID required".to_string()))
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let id = id_param(&params, "id")
            .ok_or_else(|| Error::Validation("Bookmark ID required".to_string()))?;
        ctx.host.bookmarks.remove(&id).await?;
        Ok(Value::Null)
    }
}

pub struct BookmarksMoveHandler;

#[async_trait]
impl Handler for BookmarksMoveHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "bookmarks.move",
            capability: "bookmarks",
            description: "Move a bookmark to another folder and/or position.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        if id_param(params, "id").is_none() {
            return Err(Error::Validation("Bookmark ID required".to_string()));
        }
        if let Some(index) = params.get("index") {
            if !index.is_null() && index.as_u64().is_none() {
                return Err(Error::Validation(
                    "index must be a non-negative integer".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let id = id_param(&params, "id")
            .ok_or_else(|| Error::Validation("Bookmark ID required".to_string()))?;
        let destination = BookmarkDestination {
            parent_id: id_param(&params, "parentId"),
            index: params
                .get("index")
                .and_then(|v| v.as_u64())
                .map(|i| i.min(u32::MAX as u64) as u32),
        };
        let moved = ctx.host.bookmarks.move_node(&id, destination).await?;
        Ok(serde_json::to_value(moved)?)
    }
}

pub struct BookmarksDuplicatesHandler;

#[async_trait]
impl Handler for BookmarksDuplicatesHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "bookmarks.duplicates",
            capability: "bookmarks",
            description: "Find bookmarks that point at the same URL.",
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, _params: Value) -> Result<Value> {
        let tree = ctx.host.bookmarks.get_tree().await?;
        Ok(find_duplicates(&tree))
    }
}

/// Trailing slash and case do not distinguish bookmarks.
fn normalize_url(url: &str) -> String {
    url.strip_suffix('/').unwrap_or(url).to_lowercase()
}

/// Group bookmarks by normalized URL, keeping groups with more than one entry
/// in order of first appearance.
pub fn find_duplicates(tree: &[BookmarkNode]) -> Value {
    fn walk<'a>(nodes: &'a [BookmarkNode], out: &mut Vec<(String, Vec<&'a BookmarkNode>)>) {
        for node in nodes {
            if let Some(url) = &node.url {
                let key = normalize_url(url);
                match out.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, group)) => group.push(node),
                    None => out.push((key, vec![node])),
                }
            }
            if let Some(children) = &node.children {
                walk(children, out);
            }
        }
    }

    let mut groups = Vec::new();
    walk(tree, &mut groups);

    let duplicates: Vec<Value> = groups
        .into_iter()
        .filter(|(_, nodes)| nodes.len() > 1)
        .map(|(url, nodes)| {
            let bookmarks: Vec<Value> = nodes
                .iter()
                .map(|n| {
                    json!({
                        "id": n.id,
                        "title": n.title,
                        "url": n.url,
                        "dateAdded": n.date_added,
                    })
                })
                .collect();
            json!({
                "url": url,
                "count": bookmarks.len(),
                "bookmarks": bookmarks,
            })
        })
        .collect();

    json!({
        "totalDuplicates": duplicates.len(),
        "duplicates": duplicates,
    })
}
