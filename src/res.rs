use axum::{
    debug_handler,
    http::header,
    response::{Html, IntoResponse},
};

#[macro_export]
macro_rules! include_res {
    (bytes, $p:expr) => {
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
    (str, $p:expr) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
}

#[debug_handler]
pub async fn script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        include_res!(str, "/static/app.js"),
    )
}

#[debug_handler]
pub async fn stylesheet() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        include_res!(str, "/static/style.css"),
    )
}

/// Substitutes `{name}` placeholders in a single pass.
///
/// Substituted values are never rescanned, so user text containing braces
/// stays literal. Unknown placeholders are left untouched.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        let found = tail[1..].find('}').and_then(|end| {
            let key = &tail[1..1 + end];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, end + 2))
        });

        match found {
            Some((value, consumed)) => {
                out.push_str(value);
                rest = &tail[consumed..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Wraps a body in the shared document layout.
pub fn page(title: &str, body: &str) -> Html<String> {
    Html(fill(
        include_res!(str, "/pages/layout.html"),
        &[("title", title), ("body", body)],
    ))
}
