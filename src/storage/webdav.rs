use super::{IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::error::Result;
use opendal::{layers::TimeoutLayer, Operator};
use std::time::Duration;

/// 构建 WebDAV operator
pub fn operator(endpoint: &str, username: &str, password: &str, root: Option<&str>) -> Result<Operator> {
    use opendal::services::Webdav;

    let mut builder = Webdav::default()
        .endpoint(endpoint)
        .username(username)
        .password(password);

    if let Some(r) = root {
        builder = builder.root(r);
    }

    let operator = Operator::new(builder)?
        .layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        )
        .finish();

    Ok(operator)
}

pub fn display_name(endpoint: &str, root: Option<&str>) -> String {
    format!(
        "webdav://{}{}",
        endpoint.trim_end_matches('/'),
        root.map(|r| format!("/{}", r.trim_start_matches('/')))
            .unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        assert_eq!(
            display_name("https://dav.example.com/", Some("/sync")),
            "webdav://dav.example.com/sync"
        );
        assert_eq!(display_name("http://nas:5005", None), "webdav://nas:5005");
    }
}
