//! Bedrock layout: WordPress core lives in `web/wp/`, the front controller
//! is `web/index.php` and the project metadata sits outside the web root.

use super::{forward_to_worker, HandlerError, LambdaEventHandler, Result};
use async_trait::async_trait;
use faas_common::{HttpRequestEvent, HttpResponse, InvocationEvent, LambdaResponse};
use faas_executor::FastCgiBackend;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Files that must never be served even though they exist in the project.
const DENYLIST: &[&str] = &[
    "composer.json",
    "composer.lock",
    "composer/installed.json",
    "wp-cli.local.yml",
    "wp-cli.yml",
];

pub struct BedrockEventHandler {
    root: PathBuf,
    backend: Arc<dyn FastCgiBackend>,
    /// `wp-admin`, `wp-content` or `wp-includes` anywhere in the path.
    core_directory: Regex,
    /// `wp-*.php` entry file as the last segment.
    core_entry_file: Regex,
}

impl BedrockEventHandler {
    pub fn new(root: impl Into<PathBuf>, backend: Arc<dyn FastCgiBackend>) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            backend,
            core_directory: Regex::new(r"/(wp-(?:admin|content|includes).*)")?,
            core_entry_file: Regex::new(r"(?:^|/)(wp-[^/]*\.php)$")?,
        })
    }

    fn web_root(&self) -> PathBuf {
        self.root.join("web")
    }

    fn front_controller(&self) -> PathBuf {
        self.web_root().join("index.php")
    }

    /// Requested path after rewriting WordPress core URLs into `web/wp/`.
    fn event_file_path(&self, request: &HttpRequestEvent) -> PathBuf {
        let mut path = request.path.clone();

        let rewritten = self
            .core_directory
            .captures(&path)
            .or_else(|| self.core_entry_file.captures(&path))
            .and_then(|captures| captures.get(1))
            .map(|matched| format!("wp/{}", matched.as_str().trim_start_matches('/')));
        if let Some(rewritten) = rewritten {
            path = rewritten;
        }

        let path = path.trim_start_matches('/');
        let starts_with_core = path
            .get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("wp/"));
        if starts_with_core {
            return self.web_root().join(path);
        }

        self.root.join(path)
    }

    /// Script PHP-FPM should execute for the request. Directories resolve to
    /// their `index.php`; anything missing goes to the front controller.
    pub fn script_file_path(&self, request: &HttpRequestEvent) -> PathBuf {
        let mut path = self.event_file_path(request);

        if path.components().any(|component| component == Component::ParentDir) {
            return self.front_controller();
        }
        if path.is_dir() {
            path.push("index.php");
        }

        if path.exists() {
            path
        } else {
            self.front_controller()
        }
    }
}

fn is_denied(path: &str) -> bool {
    let path = path.trim_start_matches('/').to_ascii_lowercase();

    DENYLIST.iter().any(|denied| {
        path == *denied
            || path
                .strip_suffix(denied)
                .is_some_and(|prefix| prefix.ends_with('/'))
    })
}

/// Bedrock is detected by its autoloader mu-plugin, or by its `web/app`
/// content directory next to both configuration files.
pub fn is_bedrock_root(root: &Path) -> bool {
    root.join("web/app/mu-plugins/bedrock-autoloader.php").exists()
        || (root.join("web/app").is_dir()
            && root.join("web/wp-config.php").exists()
            && root.join("config/application.php").exists())
}

#[async_trait]
impl LambdaEventHandler for BedrockEventHandler {
    fn name(&self) -> &'static str {
        "bedrock"
    }

    fn can_handle(&self, event: &InvocationEvent) -> bool {
        event.http_request().is_some() && is_bedrock_root(&self.root)
    }

    async fn handle(&self, event: &InvocationEvent) -> Result<LambdaResponse> {
        let request = event
            .http_request()
            .ok_or(HandlerError::UnsupportedEvent("bedrock"))?;

        if is_denied(&request.path) {
            info!(
                request_id = %event.id(),
                path = %request.path,
                "Refusing to serve protected file"
            );
            return Ok(LambdaResponse::Http(HttpResponse::not_found()));
        }

        let script = self.script_file_path(request);
        forward_to_worker(self.backend.as_ref(), request, &script, &self.web_root()).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{http_event, touch, RecordingBackend};
    use super::*;
    use faas_common::{EventKind, InvocationContext};
    use std::fs;
    use tempfile::TempDir;

    fn bedrock_root() -> TempDir {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "config/application.php");
        touch(dir.path(), "web/app/mu-plugins/bedrock-autoloader.php");
        dir
    }

    fn handler(root: &Path) -> (BedrockEventHandler, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        let handler = BedrockEventHandler::new(root, backend.clone()).unwrap();
        (handler, backend)
    }

    async fn resolved_script(root: &Path, path: &str) -> String {
        let (handler, backend) = handler(root);
        handler.handle(&http_event(path)).await.unwrap();
        let scripts = backend.script_filenames();
        assert_eq!(scripts.len(), 1);
        scripts[0].clone()
    }

    fn expected(root: &Path, relative: &str) -> String {
        root.join(relative).to_string_lossy().into_owned()
    }

    // ==================== Detection ====================

    #[test]
    fn test_can_handle_with_application_and_wp_config() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("web/app")).unwrap();
        touch(dir.path(), "config/application.php");
        touch(dir.path(), "web/wp-config.php");

        assert!(handler(dir.path()).0.can_handle(&http_event("/")));
    }

    #[test]
    fn test_can_handle_with_autoloader() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "web/app/mu-plugins/bedrock-autoloader.php");

        assert!(handler(dir.path()).0.can_handle(&http_event("/")));
    }

    #[test]
    fn test_cannot_handle_incomplete_layouts() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("web/app")).unwrap();
        assert!(!handler(dir.path()).0.can_handle(&http_event("/")));

        // Missing application config
        touch(dir.path(), "web/wp-config.php");
        assert!(!handler(dir.path()).0.can_handle(&http_event("/")));

        // Missing wp-config
        fs::remove_file(dir.path().join("web/wp-config.php")).unwrap();
        touch(dir.path(), "config/application.php");
        assert!(!handler(dir.path()).0.can_handle(&http_event("/")));
    }

    #[test]
    fn test_cannot_handle_non_http_events() {
        let dir = bedrock_root();
        let (handler, _) = handler(dir.path());

        for kind in [EventKind::Ping, EventKind::Other] {
            let event = InvocationEvent::new(InvocationContext::new("request-1"), kind);
            assert!(!handler.can_handle(&event));
        }
    }

    // ==================== Script Resolution ====================

    #[tokio::test]
    async fn test_directory_resolves_to_its_index() {
        let dir = bedrock_root();
        touch(dir.path(), "tmp/index.php");

        assert_eq!(
            resolved_script(dir.path(), "tmp/").await,
            expected(dir.path(), "tmp/index.php")
        );
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_front_controller() {
        let dir = bedrock_root();

        assert_eq!(
            resolved_script(dir.path(), "tmp").await,
            expected(dir.path(), "web/index.php")
        );
        assert_eq!(
            resolved_script(dir.path(), "/../../etc/passwd").await,
            expected(dir.path(), "web/index.php")
        );
    }

    #[tokio::test]
    async fn test_wp_paths_map_into_web_directory() {
        let dir = bedrock_root();
        touch(dir.path(), "web/wp/tmp/index.php");

        assert_eq!(
            resolved_script(dir.path(), "wp/tmp").await,
            expected(dir.path(), "web/wp/tmp/index.php")
        );
    }

    #[tokio::test]
    async fn test_rewrites_wp_admin_url() {
        let dir = bedrock_root();
        touch(dir.path(), "web/wp/wp-admin/index.php");
        touch(dir.path(), "web/wp/wp-admin/admin-ajax.php");

        assert_eq!(
            resolved_script(dir.path(), "/wp-admin/").await,
            expected(dir.path(), "web/wp/wp-admin/index.php")
        );
        assert_eq!(
            resolved_script(dir.path(), "/wp-admin/admin-ajax.php").await,
            expected(dir.path(), "web/wp/wp-admin/admin-ajax.php")
        );
    }

    #[tokio::test]
    async fn test_rewrites_wp_admin_url_with_subdirectory_multisite() {
        let dir = bedrock_root();
        touch(dir.path(), "web/wp/wp-admin/index.php");
        fs::write(
            dir.path().join("config/application.php"),
            "Config::define('MULTISITE', true);",
        )
        .unwrap();

        assert_eq!(
            resolved_script(dir.path(), "/subdirectory/wp-admin/").await,
            expected(dir.path(), "web/wp/wp-admin/index.php")
        );
    }

    #[tokio::test]
    async fn test_rewrites_wp_login_url() {
        let dir = bedrock_root();
        touch(dir.path(), "web/wp/wp-login.php");

        assert_eq!(
            resolved_script(dir.path(), "/wp-login.php").await,
            expected(dir.path(), "web/wp/wp-login.php")
        );
    }

    #[tokio::test]
    async fn test_rewrites_wp_login_url_with_subdirectory_multisite() {
        let dir = bedrock_root();
        touch(dir.path(), "web/wp/wp-login.php");
        fs::write(
            dir.path().join("config/application.php"),
            "Config::define('MULTISITE', true);",
        )
        .unwrap();

        assert_eq!(
            resolved_script(dir.path(), "/subdirectory/wp-login.php").await,
            expected(dir.path(), "web/wp/wp-login.php")
        );
    }

    #[tokio::test]
    async fn test_document_root_is_web_directory() {
        let dir = bedrock_root();
        touch(dir.path(), "web/wp/wp-login.php");
        let (handler, backend) = handler(dir.path());

        handler.handle(&http_event("/wp-login.php")).await.unwrap();

        let request = &backend.requests()[0];
        assert_eq!(
            request.param("DOCUMENT_ROOT"),
            Some(expected(dir.path(), "web").as_str())
        );
        assert_eq!(request.param("SCRIPT_NAME"), Some("/wp/wp-login.php"));
    }

    // ==================== Denylist ====================

    #[tokio::test]
    async fn test_protected_files_are_not_found() {
        let dir = bedrock_root();
        let (handler, backend) = handler(dir.path());

        for path in [
            "/composer.json",
            "/composer.lock",
            "/composer/installed.json",
            "/wp-cli.local.yml",
            "/wp-cli.yml",
            "/vendor/Composer.JSON",
        ] {
            touch(dir.path(), path.trim_start_matches('/'));

            let response = handler.handle(&http_event(path)).await.unwrap();
            assert_eq!(
                response,
                LambdaResponse::Http(HttpResponse::not_found()),
                "{path} should be refused"
            );
        }

        assert!(backend.requests().is_empty());
    }

    #[test]
    fn test_denylist_matches_whole_segments() {
        assert!(is_denied("composer.json"));
        assert!(is_denied("/app/wp-cli.yml"));
        assert!(!is_denied("/my-composer.json"));
        assert!(!is_denied("/composer.json.bak"));
    }
}
