//! Admin API handlers.

use std::sync::Arc;

use axum::{extract::State, response::Html, Json};
use serde::Serialize;

use crate::config::Config;
use crate::route::SharedTable;

/// State injected into the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub config: Arc<Config>,
    pub table: Arc<SharedTable>,
}

/// One table entry as reported by /api/routes.
#[derive(Serialize)]
pub struct RouteInfo {
    pub service: String,
    pub host: String,
    pub path: String,
    pub dst: String,
    pub weight: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub opts: std::collections::BTreeMap<String, String>,
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteInfo>> {
    let table = state.table.current();
    let mut routes = Vec::new();
    for (host, host_routes) in table.iter_sorted() {
        for route in host_routes {
            for target in &route.targets {
                routes.push(RouteInfo {
                    service: target.service.clone(),
                    host: host.clone(),
                    path: route.path.clone(),
                    dst: target.url.to_string(),
                    weight: target.weight,
                    tags: target.tags.clone(),
                    opts: target.opts.clone(),
                });
            }
        }
    }
    Json(routes)
}

pub async fn get_config(State(state): State<AdminState>) -> Json<Config> {
    Json((*state.config).clone())
}

pub async fn get_health() -> &'static str {
    "OK"
}

pub async fn get_dashboard(State(state): State<AdminState>) -> Html<String> {
    let table = state.table.current();
    let mut rows = String::new();
    for (host, host_routes) in table.iter_sorted() {
        for route in host_routes {
            for target in &route.targets {
                rows.push_str(&format!(
                    "<tr><td>{}</td><td>{}{}</td><td>{}</td><td>{:.3}</td></tr>\n",
                    target.service, host, route.path, target.url, target.weight
                ));
            }
        }
    }

    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{title}</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
h1 {{ color: {color}; }}
table {{ border-collapse: collapse; }}
td, th {{ border: 1px solid #ccc; padding: 4px 10px; text-align: left; }}
</style>
</head>
<body>
<h1>{title}</h1>
<p>{version} &middot; {count} routes &middot; <a href="/api/routes">routes</a> &middot; <a href="/api/config">config</a></p>
<table>
<tr><th>service</th><th>source</th><th>destination</th><th>weight</th></tr>
{rows}</table>
</body>
</html>
"#,
        title = state.config.admin.title,
        color = state.config.admin.color,
        version = env!("CARGO_PKG_VERSION"),
        count = table.num_routes(),
        rows = rows,
    ))
}
