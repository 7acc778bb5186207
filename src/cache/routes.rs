//! Path-based strategy selection

use serde::Serialize;

/// How a request is answered
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Strategy {
    /// Live response first, stored copy when the network fails
    NetworkFirst,
    /// Stored copy first, revalidated in the background
    CacheFirst,
}

/// The three partitions every cache generation owns
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    Static,
    Api,
    Media,
}

impl PartitionKind {
    pub const ALL: [PartitionKind; 3] = [PartitionKind::Static, PartitionKind::Api, PartitionKind::Media];

    pub fn suffix(&self) -> &'static str {
        match self {
            PartitionKind::Static => "static",
            PartitionKind::Api => "api",
            PartitionKind::Media => "media",
        }
    }

    /// Partition name within a generation, e.g. `rust-media-downloader-v2-api`
    pub fn name_for(&self, version: &str) -> String {
        format!("{}-{}", version, self.suffix())
    }
}

/// What to answer when neither the network nor the partition can
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum OfflineFallback {
    /// 503 JSON body with an offline flag
    DegradedJson,
    /// The cached root document, if any
    RootDocument,
}

/// One row of the route table
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub label: &'static str,
    pub matches: fn(&str) -> bool,
    pub strategy: Strategy,
    pub partition: PartitionKind,
    pub fallback: OfflineFallback,
}

fn is_api_path(path: &str) -> bool {
    path.starts_with("/api/")
}

fn is_media_path(path: &str) -> bool {
    path.starts_with("/icons/") || path.starts_with("/images/")
}

fn is_static_asset(path: &str) -> bool {
    path == "/"
        || path == "/index.html"
        || path == "/manifest.json"
        || path.ends_with(".js")
        || path.ends_with(".css")
        || path.ends_with(".json")
}

fn any_path(_: &str) -> bool {
    true
}

/// Ordered predicate table; the first matching row wins
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// api → media → static assets → everything else
    pub fn standard() -> Self {
        Self {
            routes: vec![
                Route {
                    label: "api",
                    matches: is_api_path,
                    strategy: Strategy::NetworkFirst,
                    partition: PartitionKind::Api,
                    fallback: OfflineFallback::DegradedJson,
                },
                Route {
                    label: "media",
                    matches: is_media_path,
                    strategy: Strategy::CacheFirst,
                    partition: PartitionKind::Media,
                    fallback: OfflineFallback::RootDocument,
                },
                Route {
                    label: "static",
                    matches: is_static_asset,
                    strategy: Strategy::CacheFirst,
                    partition: PartitionKind::Static,
                    fallback: OfflineFallback::RootDocument,
                },
                Route {
                    label: "default",
                    matches: any_path,
                    strategy: Strategy::NetworkFirst,
                    partition: PartitionKind::Static,
                    fallback: OfflineFallback::RootDocument,
                },
            ],
        }
    }

    pub fn resolve(&self, pathname: &str) -> &Route {
        self.routes
            .iter()
            .find(|route| (route.matches)(pathname))
            .unwrap_or_else(|| &self.routes[self.routes.len() - 1])
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::standard()
    }
}
