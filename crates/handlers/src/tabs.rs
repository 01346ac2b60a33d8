use async_trait::async_trait;
use serde_json::{json, Value};
use skylink_core::host::{TabInfo, TabQuery, TabUpdate};
use skylink_core::{Error, Result, TabId};

use crate::{bool_param, str_param, tab_id_param, Handler, HandlerContext, HandlerSchema};

/// Schemes that never belong to a web domain.
const INTERNAL_SCHEMES: &[&str] = &["chrome", "chrome-extension", "edge", "about", "devtools"];

pub struct TabsListHandler;

#[async_trait]
impl Handler for TabsListHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "tabs.list",
            capability: "tabs",
            description: "List open tabs in every window.",
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, _params: Value) -> Result<Value> {
        let tabs = ctx.host.tabs.query(TabQuery::default()).await?;
        let simplified: Vec<Value> = tabs
            .iter()
            .map(|t| {
                json!({
                    "id": t.id,
                    "windowId": t.window_id,
                    "title": t.title,
                    "url": t.url,
                    "active": t.active,
                    "pinned": t.pinned,
                    "favIconUrl": t.fav_icon_url,
                })
            })
            .collect();
        Ok(Value::Array(simplified))
    }
}

pub struct TabsCreateHandler;

#[async_trait]
impl Handler for TabsCreateHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "tabs.create",
            capability: "tabs",
            description: "Open a new tab.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        match params.get("active") {
            None | Some(Value::Null) | Some(Value::Bool(_)) => Ok(()),
            Some(_) => Err(Error::Validation("active must be a boolean".to_string())),
        }
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let url = str_param(&params, "url");
        let active = bool_param(&params, "active").unwrap_or(true);
        let tab = ctx.host.tabs.create(url, active).await?;
        Ok(json!({ "id": tab.id, "url": tab.url }))
    }
}

pub struct TabsCloseHandler;

impl TabsCloseHandler {
    /// `tabId` wins over `tabIds`; either may be a single id or a list.
    fn tab_ids(params: &Value) -> Option<Vec<TabId>> {
        let raw = params
            .get("tabId")
            .filter(|v| !v.is_null())
            .or_else(|| params.get("tabIds").filter(|v| !v.is_null()))?;
        let ids: Option<Vec<TabId>> = match raw {
            Value::Array(items) => items
                .iter()
                .map(|v| tab_id_param(&json!({ "id": v }), "id"))
                .collect(),
            single => tab_id_param(&json!({ "id": single }), "id").map(|id| vec![id]),
        };
        ids.filter(|ids| !ids.is_empty())
    }
}

#[async_trait]
impl Handler for TabsCloseHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "tabs.close",
            capability: "tabs",
            description: "Close one or more tabs.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        Self::tab_ids(params)
            .map(|_| ())
            .ok_or_else(|| Error::Validation("Tab ID(s) required".to_string()))
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let ids = Self::tab_ids(&params)
            .ok_or_else(|| Error::Validation("Tab ID(s) required".to_string()))?;
        ctx.host.tabs.remove(&ids).await?;
        Ok(json!({ "closed": ids.len() }))
    }
}

pub struct TabsFocusHandler;

#[async_trait]
impl Handler for TabsFocusHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "tabs.focus",
            capability: "tabs",
            description: "Activate a tab and bring its window to the front.",
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        tab_id_param(params, "tabId")
            .map(|_| ())
            .ok_or_else(|| Error::Validation("Tab ID required".to_string()))
    }

    async fn execute(&self, ctx: HandlerContext, params: Value) -> Result<Value> {
        let tab_id = tab_id_param(&params, "tabId")
            .ok_or_else(|| Error::Validation("Tab ID required".to_string()))?;
        let tab = ctx
            .host
            .tabs
            .update(
                tab_id,
                TabUpdate {
                    active: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        ctx.host.tabs.focus_window(tab.window_id).await?;
        Ok(Value::Null)
    }
}

pub struct TabsGroupByDomainHandler;

#[async_trait]
impl Handler for TabsGroupByDomainHandler {
    fn schema(&self) -> HandlerSchema {
        HandlerSchema {
            action: "tabs.groupByDomain",
            capability: "tabs",
            description: "Group open tabs that share a host.",
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: HandlerContext, _params: Value) -> Result<Value> {
        let tabs = ctx.host.tabs.query(TabQuery::default()).await?;
        Ok(group_by_domain(&tabs))
    }
}

fn domain_of(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    if INTERNAL_SCHEMES.contains(&parsed.scheme()) {
        return None;
    }
    parsed.host_str().map(str::to_string)
}

/// Groups of more than one tab per host, in order of first appearance.
pub fn group_by_domain(tabs: &[TabInfo]) -> Value {
    let mut groups: Vec<(String, Vec<TabId>)> = Vec::new();
    for tab in tabs {
        let Some(domain) = domain_of(&tab.url) else {
            continue;
        };
        match groups.iter_mut().find(|(d, _)| *d == domain) {
            Some((_, ids)) => ids.push(tab.id),
            None => groups.push((domain, vec![tab.id])),
        }
    }

    let groups: Vec<Value> = groups
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(domain, ids)| json!({ "domain": domain, "count": ids.len(), "tabIds": ids }))
        .collect();

    json!({
        "totalGroups": groups.len(),
        "groups": groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: TabId, url: &str) -> TabInfo {
        TabInfo {
            id,
            window_id: 1,
            title: String::new(),
            url: url.into(),
            active: false,
            pinned: false,
            fav_icon_url: None,
            status: None,
        }
    }

    #[test]
    fn test_group_by_domain_skips_internal_pages() {
        let tabs = vec![
            tab(1, "http://a.com/1"),
            tab(2, "http://a.com/2"),
            tab(3, "http://b.com/1"),
            tab(4, "chrome://settings"),
            tab(5, "chrome://extensions"),
            tab(6, "not a url"),
        ];
        let result = group_by_domain(&tabs);
        assert_eq!(
            result,
            json!({
                "totalGroups": 1,
                "groups": [{"domain": "a.com", "count": 2, "tabIds": [1, 2]}]
            })
        );
    }

    #[test]
    fn test_close_accepts_single_or_list() {
        assert_eq!(TabsCloseHandler::tab_ids(&json!({"tabId": 4})), Some(vec![4]));
        assert_eq!(
            TabsCloseHandler::tab_ids(&json!({"tabIds": [1, "2"]})),
            Some(vec![1, 2])
        );
        assert_eq!(TabsCloseHandler::tab_ids(&json!({"tabIds": []})), None);
        assert_eq!(
            TabsCloseHandler.validate(&json!({})).unwrap_err().to_string(),
            "Tab ID(s) required"
        );
    }

    #[tokio::test]
    async fn test_create_focus_close() {
        let (ctx, browser, _events) = HandlerContext::in_memory();
        let created = TabsCreateHandler
            .execute(ctx.clone(), json!({"url": "https://a.com", "active": false}))
            .await
            .unwrap();
        let id = created["id"].as_i64().unwrap();
        assert_eq!(created["url"], "https://a.com");

        TabsFocusHandler
            .execute(ctx.clone(), json!({"tabId": id}))
            .await
            .unwrap();
        assert_eq!(browser.focused_window(), Some(1));

        let listed = TabsListHandler.execute(ctx.clone(), json!({})).await.unwrap();
        assert_eq!(listed[0]["active"], true);

        let closed = TabsCloseHandler
            .execute(ctx.clone(), json!({"tabIds": [id]}))
            .await
            .unwrap();
        assert_eq!(closed, json!({"closed": 1}));
        assert_eq!(
            TabsListHandler.execute(ctx, json!({})).await.unwrap(),
            json!([])
        );
    }
}
