//! Segmented stream resolution
//!
//! Turns a master manifest into the ordered segment locators of its
//! highest-resolution variant. Manifest retrieval sits in front of every
//! segmented lesson, so it retries network failures on its own schedule
//! (fixed delay plus a little random jitter) before giving up.

use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, warn};
use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist, VariantStream};
use rand::Rng;
use reqwest::Client;
use url::Url;

use crate::core::config::DownloadConfig;
use crate::core::error::{Error, Result};

/// Resolves manifests into segment locators
#[derive(Debug, Clone)]
pub struct PlaylistResolver {
    client: Client,
    retries: u32,
    delay: Duration,
    jitter: Duration,
}

/// Horizontal resolution of a variant; variants that do not declare one rank lowest
fn variant_width(variant: &VariantStream) -> u64 {
    variant.resolution.as_ref().map(|r| r.width).unwrap_or(0)
}

/// Widest variant of a master playlist, first listed on ties
pub fn select_highest_resolution(master: &MasterPlaylist) -> Option<&VariantStream> {
    master.variants.iter().fold(None, |best, candidate| match best {
        Some(current) if variant_width(current) >= variant_width(candidate) => Some(current),
        _ => Some(candidate),
    })
}

/// Absolute locators of every segment in `playlist`, in playlist order
fn segment_locators(playlist: &MediaPlaylist, base: &Url) -> Result<Vec<Url>> {
    playlist
        .segments
        .iter()
        .map(|segment| {
            base.join(&segment.uri).map_err(|e| {
                Error::manifest(base, format!("bad segment URI '{}': {}", segment.uri, e))
            })
        })
        .collect()
}

fn parse(locator: &Url, body: &[u8]) -> Result<Playlist> {
    m3u8_rs::parse_playlist_res(body).map_err(|e| Error::manifest(locator, format!("unparseable manifest: {e}")))
}

impl PlaylistResolver {
    pub fn new(client: Client, config: &DownloadConfig) -> Self {
        Self {
            client,
            retries: config.manifest_retries,
            delay: config.manifest_retry_delay,
            jitter: config.manifest_retry_jitter,
        }
    }

    /// Resolve `manifest` into the ordered, non-empty list of segment locators
    /// of its highest-resolution variant.
    pub async fn resolve(&self, manifest: &Url) -> Result<Vec<Url>> {
        let (media, media_url) = match self.load(manifest).await? {
            Playlist::MasterPlaylist(master) => {
                let variant = select_highest_resolution(&master).ok_or_else(|| {
                    Error::manifest(manifest, "master playlist lists no variants")
                })?;
                let variant_url = manifest.join(&variant.uri).map_err(|e| {
                    Error::manifest(manifest, format!("bad variant URI '{}': {}", variant.uri, e))
                })?;
                debug!(
                    "Selected variant {} ({} px wide) of {}",
                    variant_url,
                    variant_width(variant),
                    manifest
                );

                match self.load(&variant_url).await? {
                    Playlist::MediaPlaylist(media) => (media, variant_url),
                    Playlist::MasterPlaylist(_) => {
                        return Err(Error::manifest(
                            &variant_url,
                            "variant points at another master playlist",
                        ));
                    }
                }
            }
            Playlist::MediaPlaylist(media) => (media, manifest.clone()),
        };

        let segments = segment_locators(&media, &media_url)?;
        if segments.is_empty() {
            return Err(Error::manifest(&media_url, "playlist contains no segments"));
        }

        info!("Resolved playlist {} into {} segments", manifest, segments.len());
        Ok(segments)
    }

    /// Fetch and parse one manifest, retrying transport failures
    async fn load(&self, locator: &Url) -> Result<Playlist> {
        let body = self.fetch_with_retry(locator).await?;
        parse(locator, &body)
    }

    async fn fetch_with_retry(&self, locator: &Url) -> Result<Bytes> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(locator).await {
                Ok(body) => return Ok(body),
                Err(err) if attempt < self.retries => {
                    attempt += 1;
                    let delay = self.delay + self.random_jitter();
                    warn!(
                        "Could not fetch manifest {} (attempt {}): {}. Retrying in {:?}",
                        locator, attempt, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(Error::manifest(
                        locator,
                        format!("{} (after {} attempts)", err, attempt + 1),
                    ));
                }
            }
        }
    }

    async fn fetch_once(&self, locator: &Url) -> Result<Bytes> {
        let response = self
            .client
            .get(locator.clone())
            .send()
            .await
            .map_err(|e| Error::connect(locator, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::connect(locator, format!("HTTP {status}")));
        }

        Ok(response.bytes().await?)
    }

    fn random_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720
high/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1200000,RESOLUTION=960x540
mid/index.m3u8
";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:10.0,
seg0.ts
#EXTINF:10.0,
seg1.ts
#EXTINF:4.5,
http://cdn.example.com/abs/seg2.ts
#EXT-X-ENDLIST
";

    fn test_config(retries: u32) -> DownloadConfig {
        DownloadConfig {
            manifest_retries: retries,
            manifest_retry_delay: Duration::from_millis(5),
            manifest_retry_jitter: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn m3u8(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "application/vnd.apple.mpegurl")
    }

    #[tokio::test]
    async fn test_resolves_highest_resolution_variant() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/course/master.m3u8"))
            .respond_with(m3u8(MASTER))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/course/high/index.m3u8"))
            .respond_with(m3u8(MEDIA))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/course/low/index.m3u8"))
            .respond_with(m3u8(MEDIA))
            .expect(0)
            .mount(&server)
            .await;

        let resolver = PlaylistResolver::new(Client::new(), &test_config(0));
        let manifest = Url::parse(&format!("{}/course/master.m3u8", server.uri())).unwrap();
        let segments = resolver.resolve(&manifest).await.unwrap();

        let expected: Vec<String> = vec![
            format!("{}/course/high/seg0.ts", server.uri()),
            format!("{}/course/high/seg1.ts", server.uri()),
            "http://cdn.example.com/abs/seg2.ts".to_string(),
        ];
        let got: Vec<String> = segments.iter().map(|u| u.to_string()).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_single_variant_goes_through_selection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/one.m3u8"))
            .respond_with(m3u8(
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=500000\nonly.m3u8\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/only.m3u8"))
            .respond_with(m3u8(MEDIA))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = PlaylistResolver::new(Client::new(), &test_config(0));
        let manifest = Url::parse(&format!("{}/one.m3u8", server.uri())).unwrap();
        assert_eq!(resolver.resolve(&manifest).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_media_playlist_at_top_level() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/direct.m3u8"))
            .respond_with(m3u8(MEDIA))
            .mount(&server)
            .await;

        let resolver = PlaylistResolver::new(Client::new(), &test_config(0));
        let manifest = Url::parse(&format!("{}/direct.m3u8", server.uri())).unwrap();
        let segments = resolver.resolve(&manifest).await.unwrap();
        assert_eq!(segments[0].as_str(), format!("{}/seg0.ts", server.uri()));
    }

    #[tokio::test]
    async fn test_retries_then_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky.m3u8"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.m3u8"))
            .respond_with(m3u8(MEDIA))
            .mount(&server)
            .await;

        let resolver = PlaylistResolver::new(Client::new(), &test_config(3));
        let manifest = Url::parse(&format!("{}/flaky.m3u8", server.uri())).unwrap();
        assert_eq!(resolver.resolve(&manifest).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_after_bounded_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down.m3u8"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let resolver = PlaylistResolver::new(Client::new(), &test_config(2));
        let manifest = Url::parse(&format!("{}/down.m3u8", server.uri())).unwrap();
        match resolver.resolve(&manifest).await {
            Err(Error::ManifestUnavailable { reason, .. }) => assert!(reason.contains("3 attempts")),
            other => panic!("Expected ManifestUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_manifest_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/junk.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = PlaylistResolver::new(Client::new(), &test_config(5));
        let manifest = Url::parse(&format!("{}/junk.m3u8", server.uri())).unwrap();
        assert!(matches!(
            resolver.resolve(&manifest).await,
            Err(Error::ManifestUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_playlist_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty.m3u8"))
            .respond_with(m3u8("#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXT-X-ENDLIST\n"))
            .mount(&server)
            .await;

        let resolver = PlaylistResolver::new(Client::new(), &test_config(0));
        let manifest = Url::parse(&format!("{}/empty.m3u8", server.uri())).unwrap();
        assert!(resolver.resolve(&manifest).await.is_err());
    }

    #[test]
    fn test_select_highest_resolution_prefers_first_on_tie() {
        let master = match m3u8_rs::parse_playlist_res(
            b"#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1,RESOLUTION=1280x720
a.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2,RESOLUTION=1280x720
b.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=3
c.m3u8
",
        ) {
            Ok(Playlist::MasterPlaylist(master)) => master,
            other => panic!("Expected master playlist, got {other:?}"),
        };
        assert_eq!(select_highest_resolution(&master).unwrap().uri, "a.m3u8");
    }
}
