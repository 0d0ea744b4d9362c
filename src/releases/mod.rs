use std::time::Duration;

use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;

use crate::engine::models::{Asset, Release};
use crate::engine::state::ReleaseKind;
use crate::error::{NetworkError, SelectionError};

pub const GITHUB_API_RELEASES: &str = "https://api.github.com/repos/BruceDevices/firmware/releases";
/// Tag the firmware repo uses for a stable build that is flagged prerelease.
const LAST_RELEASE_ALIAS: &str = "lastrelease";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const FALLBACK_ASSET_NAME: &str = "firmware.bin";

#[derive(Debug, Clone, Deserialize)]
struct ReleaseInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    assets: Vec<AssetInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct AssetInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    browser_download_url: Option<String>,
}

impl From<ReleaseInfo> for Release {
    fn from(info: ReleaseInfo) -> Self {
        let tag = info.tag_name.unwrap_or_default();
        let name = info
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| tag.clone());
        Release {
            name,
            tag,
            prerelease: info.prerelease,
            assets: info
                .assets
                .into_iter()
                .map(|asset| Asset {
                    name: asset
                        .name
                        .filter(|name| !name.is_empty())
                        .unwrap_or_else(|| FALLBACK_ASSET_NAME.to_owned()),
                    download_url: asset.browser_download_url.unwrap_or_default(),
                })
                .collect(),
        }
    }
}

/// Client for the firmware releases feed. Holds no catalog between calls.
#[derive(Clone)]
pub struct ReleaseCatalog {
    client: Client,
    url: String,
}

impl ReleaseCatalog {
    pub fn new() -> Self {
        Self::with_url(GITHUB_API_RELEASES)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(FETCH_TIMEOUT)
            .read_timeout(FETCH_TIMEOUT)
            .user_agent(concat!("bruce-launcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|err| {
                warn!("releases: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self {
            client,
            url: url.into(),
        }
    }

    /// Fetch the full release list in feed order.
    pub async fn fetch(&self) -> Result<Vec<Release>, NetworkError> {
        info!("releases: fetching {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|source| NetworkError::Request {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let raw: Vec<ReleaseInfo> = response.json().await.map_err(NetworkError::Decode)?;
        let releases: Vec<Release> = raw.into_iter().map(Release::from).collect();
        info!("releases: loaded {}", releases.len());
        Ok(releases)
    }
}

/// Choose a release from `releases` without reordering them.
///
/// `Ok(None)` means nothing matched (an empty catalog, or no beta at all);
/// an out-of-range selected index is an error.
pub fn pick(releases: &[Release], kind: ReleaseKind) -> Result<Option<&Release>, SelectionError> {
    match kind {
        ReleaseKind::Latest => Ok(releases
            .iter()
            .find(|release| classify(release) == Channel::Stable)
            .or_else(|| releases.first())),
        ReleaseKind::Beta => Ok(releases
            .iter()
            .find(|release| classify(release) == Channel::Prerelease)
            .or_else(|| {
                releases
                    .iter()
                    .find(|release| classify(release) == Channel::BetaByName)
            })),
        ReleaseKind::Selected(index) => {
            releases
                .get(index)
                .map(Some)
                .ok_or(SelectionError::OutOfRange {
                    index,
                    len: releases.len(),
                })
        }
    }
}

/// Feed index of the release tagged `tag` (case-sensitive).
pub fn index_of_tag(releases: &[Release], tag: &str) -> Result<usize, SelectionError> {
    releases
        .iter()
        .position(|release| release.tag == tag)
        .ok_or_else(|| SelectionError::UnknownTag(tag.to_owned()))
}

/// Assets of `release` that can be flashed.
pub fn firmware_assets(release: &Release) -> Vec<&Asset> {
    release.assets.iter().filter(|asset| asset.is_firmware()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Stable,
    Prerelease,
    BetaByName,
}

fn classify(release: &Release) -> Channel {
    let tag = release.tag.to_lowercase();
    let name = release.name.to_lowercase();
    let is_alias = tag == LAST_RELEASE_ALIAS;

    let channel = if release.prerelease && !is_alias {
        Channel::Prerelease
    } else if is_alias {
        Channel::Stable
    } else if name.contains("beta") || tag.contains("beta") {
        Channel::BetaByName
    } else {
        Channel::Stable
    };
    debug!("releases: {} classified as {:?}", release.tag, channel);
    channel
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn release(tag: &str, name: &str, prerelease: bool) -> Release {
        Release {
            name: name.into(),
            tag: tag.into(),
            prerelease,
            assets: Vec::new(),
        }
    }

    fn tags(found: Option<&Release>) -> Option<&str> {
        found.map(|release| release.tag.as_str())
    }

    #[test]
    fn latest_is_first_stable_in_feed_order() {
        let feed = vec![
            release("1.9-dev", "Dev build", true),
            release("1.8", "Bruce 1.8", false),
            release("1.7", "Bruce 1.7", false),
        ];
        assert_eq!(tags(pick(&feed, ReleaseKind::Latest).unwrap()), Some("1.8"));
    }

    #[test]
    fn latest_falls_back_to_first_entry() {
        let feed = vec![
            release("2.0-rc", "RC", true),
            release("1.9-beta", "Beta", false),
        ];
        assert_eq!(
            tags(pick(&feed, ReleaseKind::Latest).unwrap()),
            Some("2.0-rc")
        );
        assert_eq!(pick(&[], ReleaseKind::Latest).unwrap(), None);
    }

    #[test]
    fn last_release_alias_counts_as_stable() {
        let feed = vec![
            release("lastRelease", "Last release", true),
            release("1.8", "Bruce 1.8", false),
        ];
        assert_eq!(
            tags(pick(&feed, ReleaseKind::Latest).unwrap()),
            Some("lastRelease")
        );
        assert_eq!(pick(&feed, ReleaseKind::Beta).unwrap(), None);
    }

    #[test]
    fn beta_prefers_real_prereleases_over_names() {
        let feed = vec![
            release("1.9-beta", "Bruce beta", false),
            release("lastrelease", "Last", true),
            release("2.0-dev", "Dev", true),
        ];
        assert_eq!(tags(pick(&feed, ReleaseKind::Beta).unwrap()), Some("2.0-dev"));

        let by_name = vec![
            release("1.8", "Bruce 1.8", false),
            release("1.9", "Bruce BETA 1.9", false),
        ];
        assert_eq!(tags(pick(&by_name, ReleaseKind::Beta).unwrap()), Some("1.9"));
    }

    #[test]
    fn no_beta_is_an_empty_result() {
        let feed = vec![release("1.8", "Bruce 1.8", false)];
        assert_eq!(pick(&feed, ReleaseKind::Beta).unwrap(), None);
    }

    #[test]
    fn selected_indexes_feed_order() {
        let feed = vec![release("a", "A", false), release("b", "B", true)];
        assert_eq!(tags(pick(&feed, ReleaseKind::Selected(1)).unwrap()), Some("b"));
        assert_eq!(
            pick(&feed, ReleaseKind::Selected(2)),
            Err(SelectionError::OutOfRange { index: 2, len: 2 })
        );
        assert_eq!(index_of_tag(&feed, "b"), Ok(1));
        assert!(index_of_tag(&feed, "c").is_err());
    }

    #[test]
    fn offers_only_bin_assets() {
        let mut rel = release("1.8", "Bruce", false);
        for name in ["readme.md", "fw.bin", "fw.elf"] {
            rel.assets.push(Asset {
                name: name.into(),
                download_url: format!("https://example.invalid/{name}"),
            });
        }
        let names: Vec<&str> = firmware_assets(&rel)
            .into_iter()
            .map(|asset| asset.name.as_str())
            .collect();
        assert_eq!(names, vec!["fw.bin"]);
    }

    #[test]
    fn normalizes_missing_fields() {
        let raw: Vec<ReleaseInfo> = serde_json::from_str(
            r#"[{"name": null, "tag_name": "1.8", "assets": [{"browser_download_url": "u"}]},
                {"name": "", "tag_name": "1.7", "prerelease": true}]"#,
        )
        .unwrap();
        let releases: Vec<Release> = raw.into_iter().map(Release::from).collect();
        assert_eq!(releases[0].name, "1.8");
        assert!(!releases[0].prerelease);
        assert_eq!(releases[0].assets[0].name, "firmware.bin");
        assert_eq!(releases[1].name, "1.7");
        assert!(releases[1].assets.is_empty());
    }

    #[tokio::test]
    async fn fetches_and_normalizes_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"name": "Bruce 1.8", "tag_name": "1.8", "prerelease": false,
                     "assets": [{"name": "fw.bin", "browser_download_url": "https://x/fw.bin"}]},
                    {"name": "Dev", "tag_name": "1.9-dev", "prerelease": true, "assets": []}]"#,
            ))
            .mount(&server)
            .await;

        let catalog = ReleaseCatalog::with_url(format!("{}/releases", server.uri()));
        let releases = catalog.fetch().await.unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].assets[0].download_url, "https://x/fw.bin");
        assert!(releases[1].prerelease);
    }

    #[tokio::test]
    async fn reports_http_status_and_bad_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let missing = ReleaseCatalog::with_url(format!("{}/missing", server.uri()));
        assert!(matches!(
            missing.fetch().await,
            Err(NetworkError::Status { status: 404, .. })
        ));

        let garbage = ReleaseCatalog::with_url(format!("{}/garbage", server.uri()));
        assert!(matches!(garbage.fetch().await, Err(NetworkError::Decode(_))));
    }
}
