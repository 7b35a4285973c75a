use std::sync::Arc;
use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use shared::types::ServiceRecord;
use crate::registry::LiveRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<LiveRegistry>,
}

const STYLESHEET: &str = r#"body {
  font-family: sans-serif;
  font-size: 12px;
  background-color: #fff;
}

h1 {
  font-size: 20px;
  font-weight: bold;
}

ul {
  border: 1px dashed #999;
  padding: 10px 10px 10px 20px;
  background-color: #ccc;
}
"#;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/style.css", get(stylesheet))
        .route("/services.json", get(services))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(render_index(&state.registry.snapshot()))
}

async fn stylesheet() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/css")], STYLESHEET)
}

async fn services(State(state): State<AppState>) -> Json<Vec<ServiceRecord>> {
    Json(state.registry.snapshot())
}

fn render_index(records: &[ServiceRecord]) -> String {
    let mut items = String::new();
    for record in records {
        items.push_str(&format!(
            "      <li>\n        <a href=\"{}\" target=\"_new\">{}</a>\n",
            escape(&record.http_url()),
            escape(record.name()),
        ));
        if let Some(description) = record.display_description() {
            items.push_str(&format!("        {}\n", escape(description)));
        }
        items.push_str("      </li>\n");
    }

    format!(
        r#"<html>
  <head>
    <link rel="stylesheet" href="/style.css" type="text/css" media="screen"/>
    <title>Browseable Git Repositories</title>
  </head>
  <body>
    <h1>Browseable Git Repositories</h1>
    <ul>
{}    </ul>
  </body>
</html>
"#,
        items
    )
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
