//! Request routing
//!
//! Classification is by path only and checked in a fixed order: API, images,
//! static assets, precached resources, then everything else.

use crate::config::{BucketKind, EngineConfig, Strategy};
use std::collections::HashSet;

/// Resource class a request path falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Api,
    Image,
    Static,
    /// A path from the precache list
    Critical,
    /// Anything else, typically a page
    Page,
}

/// Where and how a request is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub class: ResourceClass,
    pub bucket: BucketKind,
    pub strategy: Strategy,
}

/// Path classifier built from the engine configuration
#[derive(Debug, Clone)]
pub struct Router {
    api_endpoints: Vec<String>,
    image_extensions: HashSet<String>,
    image_dirs: Vec<String>,
    static_extensions: HashSet<String>,
    static_prefixes: Vec<String>,
    precache: HashSet<String>,
    strategies: [(BucketKind, Strategy); 4],
    page_strategy: Strategy,
}

impl Router {
    pub fn new(config: &EngineConfig) -> Self {
        let lower = |items: &[String]| -> HashSet<String> {
            items.iter().map(|e| e.trim_start_matches('.').to_ascii_lowercase()).collect()
        };
        let strategies = BucketKind::ALL.map(|kind| {
            let strategy = config
                .bucket(kind)
                .map(|b| b.strategy)
                .unwrap_or(Strategy::NetworkFirst);
            (kind, strategy)
        });

        Self {
            api_endpoints: config.api_endpoints.clone(),
            image_extensions: lower(&config.image_extensions),
            image_dirs: config.image_dirs.clone(),
            static_extensions: lower(&config.static_extensions),
            static_prefixes: config.static_prefixes.clone(),
            precache: config.precache.iter().cloned().collect(),
            strategies,
            page_strategy: config.page_strategy,
        }
    }

    /// Classify a URL path
    pub fn classify(&self, path: &str) -> ResourceClass {
        if self.api_endpoints.iter().any(|p| path.starts_with(p.as_str())) {
            ResourceClass::Api
        } else if self.is_image(path) {
            ResourceClass::Image
        } else if self.is_static(path) {
            ResourceClass::Static
        } else if self.precache.contains(path) {
            ResourceClass::Critical
        } else {
            ResourceClass::Page
        }
    }

    /// Bucket and strategy for a URL path
    pub fn route(&self, path: &str) -> Route {
        let class = self.classify(path);
        let bucket = match class {
            ResourceClass::Api => BucketKind::Api,
            ResourceClass::Image => BucketKind::Images,
            ResourceClass::Static => BucketKind::Static,
            ResourceClass::Critical | ResourceClass::Page => BucketKind::Critical,
        };
        let strategy = match class {
            ResourceClass::Page => self.page_strategy,
            _ => self.strategy_of(bucket),
        };
        Route {
            class,
            bucket,
            strategy,
        }
    }

    fn strategy_of(&self, bucket: BucketKind) -> Strategy {
        self.strategies
            .iter()
            .find(|(kind, _)| *kind == bucket)
            .map(|(_, s)| *s)
            .unwrap_or(Strategy::NetworkFirst)
    }

    fn is_image(&self, path: &str) -> bool {
        has_extension(path, &self.image_extensions)
            || self.image_dirs.iter().any(|d| path.contains(d.as_str()))
    }

    fn is_static(&self, path: &str) -> bool {
        has_extension(path, &self.static_extensions)
            || self.static_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// Whether the path ends in `.{ext}` for one of `extensions`, case-insensitively
fn has_extension(path: &str, extensions: &HashSet<String>) -> bool {
    match path.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('/') => extensions.contains(&ext.to_ascii_lowercase()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new(&EngineConfig::default())
    }

    #[test]
    fn test_classification_order() {
        let router = router();
        assert_eq!(router.classify("/api/services"), ResourceClass::Api);
        // API wins over the image extension
        assert_eq!(router.classify("/api/gallery/public/photo.jpg"), ResourceClass::Api);
        assert_eq!(router.classify("/images/smile.JPG"), ResourceClass::Image);
        assert_eq!(router.classify("/optimized-images/hero-1920w.webp"), ResourceClass::Image);
        assert_eq!(router.classify("/optimized-images/manifest"), ResourceClass::Image);
        assert_eq!(router.classify("/js/app.js"), ResourceClass::Static);
        assert_eq!(router.classify("/fonts/cairo.woff2"), ResourceClass::Static);
        assert_eq!(router.classify("/css/critical.css"), ResourceClass::Static);
        assert_eq!(router.classify("/js/chunks/vendor"), ResourceClass::Static);
        assert_eq!(router.classify("/"), ResourceClass::Critical);
        assert_eq!(router.classify("/manifest.json"), ResourceClass::Critical);
        assert_eq!(router.classify("/en/services"), ResourceClass::Page);
        assert_eq!(router.classify("/ar/"), ResourceClass::Page);
    }

    #[test]
    fn test_extension_matches_path_suffix() {
        let router = router();
        assert_eq!(router.classify("/.png"), ResourceClass::Image);
        assert_eq!(router.classify("/images/.hidden.WEBP"), ResourceClass::Image);
        assert_eq!(router.classify("/png"), ResourceClass::Page);
        assert_eq!(router.classify("/dir.png/index"), ResourceClass::Page);
        assert_eq!(router.classify("/fonts/cairo.woff2x"), ResourceClass::Page);
    }

    #[test]
    fn test_routes() {
        let router = router();
        let api = router.route("/api/availability");
        assert_eq!(api.bucket, BucketKind::Api);
        assert_eq!(api.strategy, Strategy::NetworkFirst);

        let image = router.route("/img/team.png");
        assert_eq!(image.bucket, BucketKind::Images);
        assert_eq!(image.strategy, Strategy::StaleWhileRevalidate);

        let critical = router.route("/");
        assert_eq!(critical.bucket, BucketKind::Critical);
        assert_eq!(critical.strategy, Strategy::CacheFirst);

        let page = router.route("/contact");
        assert_eq!(page.bucket, BucketKind::Critical);
        assert_eq!(page.strategy, Strategy::NetworkFirst);
    }
}
