//! Static files for the dashboard

use std::path::{Path, PathBuf};

use hyper::header::{CONTENT_TYPE, HeaderValue};

use crate::http::{HttpResult, bytes_to_resp};

/// Map a request path onto a file under `root`.
///
/// `/` and directories map to `index.html`. Returns `None` if the path tries
/// to leave `root`.
fn resolve(root: &Path, path: &str) -> Option<PathBuf> {
    let mut file = root.to_path_buf();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') || s.contains('\0') => return None,
            s => file.push(s),
        }
    }
    if path.ends_with('/') || file == root {
        file.push("index.html");
    }
    Some(file)
}

fn content_type(file: &Path) -> &'static str {
    match file.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

pub async fn serve(root: &Path, path: &str) -> HttpResult {
    let Some(file) = resolve(root, path) else {
        return sensorcast_hub::bad_request!("invalid path: {path}");
    };

    let bytes = match tokio::fs::read(&file).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return sensorcast_hub::not_found!("not found: {path}");
        }
        // reading a directory fails with a platform dependent kind
        Err(_) if file.is_dir() => return sensorcast_hub::not_found!("not found: {path}"),
        Err(e) => return sensorcast_hub::server_error!("failed to read {}: {e}", file.display()),
    };

    let mut r = bytes_to_resp(bytes, hyper::StatusCode::OK)?;
    r.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type(&file)));
    Ok(r)
}
