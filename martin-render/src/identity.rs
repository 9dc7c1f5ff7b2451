//! Canonical identity of a map-definition source.
//!
//! Sources are addressed by URIs such as `mapnik:///srv/maps/world.xml`,
//! `mapnik://./world.xml` (relative to the working directory) or a bare path.
//! Two URIs denote the same source iff their canonical strings are equal.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Component, Path, PathBuf, absolute};
use std::str::FromStr;
use std::sync::Arc;

use url::{ParseError, Url, form_urlencoded};
use xxhash_rust::xxh3::xxh3_128;

use crate::{RenderSourceError, RenderSourceResult};

/// The scheme this adapter is registered under.
pub const SCHEME: &str = "mapnik";

/// A source URI as supplied by a caller, before canonicalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceUri {
    /// URI scheme, if any
    pub scheme: Option<String>,
    /// URI host; `.` and `..` are treated as the start of a relative path
    pub host: Option<String>,
    /// Percent-decoded path
    pub path: String,
    /// Decoded query parameters, in order of appearance
    pub query: Vec<(String, String)>,
    /// Inline map definition used instead of reading `path`
    pub definition: Option<String>,
    /// Text this URI was parsed from, reported back in errors
    pub raw: Option<String>,
}

impl SourceUri {
    /// Creates a scheme-less URI pointing at a map-definition file.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().into_owned(),
            ..Self::default()
        }
    }

    /// Attaches inline map-definition text.
    #[must_use]
    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }
}

impl FromStr for SourceUri {
    type Err = RenderSourceError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        match Url::parse(uri) {
            Ok(url) => Ok(Self {
                scheme: Some(url.scheme().to_string()),
                host: url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .map(ToString::to_string),
                path: decode(uri, url.path())?,
                query: url.query_pairs().into_owned().collect(),
                definition: None,
                raw: Some(uri.to_string()),
            }),
            Err(ParseError::RelativeUrlWithoutBase) => {
                let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
                Ok(Self {
                    path: decode(uri, path)?,
                    query: form_urlencoded::parse(query.as_bytes())
                        .into_owned()
                        .collect(),
                    raw: Some(uri.to_string()),
                    ..Self::default()
                })
            }
            Err(e) => Err(RenderSourceError::InvalidUri(uri.to_string(), e.to_string())),
        }
    }
}

fn decode(uri: &str, path: &str) -> RenderSourceResult<String> {
    urlencoding::decode(path)
        .map(Cow::into_owned)
        .map_err(|e| RenderSourceError::InvalidUri(uri.to_string(), e.to_string()))
}

/// Canonical, immutable identity of a source. Used as the registry key.
#[derive(Debug, Clone)]
pub struct SourceIdentity {
    path: PathBuf,
    query: BTreeMap<String, String>,
    definition: Option<Arc<str>>,
    canonical: String,
    key: String,
}

impl SourceIdentity {
    /// Canonical identity of a map-definition file.
    pub fn from_path(path: impl AsRef<Path>) -> RenderSourceResult<Self> {
        Self::try_from(SourceUri::from_path(path))
    }

    /// Absolute path of the map definition.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory relative references inside the map definition are resolved against.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    /// Source id: the definition's file name without the `.xml` extension.
    #[must_use]
    pub fn id(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|v| v.to_string_lossy().into_owned())
            .unwrap_or_default();
        match name.strip_suffix(".xml") {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => name,
        }
    }

    /// Query parameters, sorted by key.
    #[must_use]
    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// Inline map definition, if the source was not created from a file.
    #[must_use]
    pub fn definition(&self) -> Option<&Arc<str>> {
        self.definition.as_ref()
    }

    /// Registry key. Equal to the canonical URI, plus a digest of the inline definition if any.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl TryFrom<SourceUri> for SourceIdentity {
    type Error = RenderSourceError;

    fn try_from(uri: SourceUri) -> Result<Self, Self::Error> {
        if let Some(scheme) = uri.scheme.as_deref()
            && !scheme.eq_ignore_ascii_case(SCHEME)
        {
            let host = uri.host.as_deref().unwrap_or_default();
            return Err(RenderSourceError::UnsupportedScheme {
                uri: uri
                    .raw
                    .unwrap_or_else(|| format!("{scheme}://{host}{}", uri.path)),
                scheme: scheme.to_string(),
            });
        }

        let path = match uri.host.as_deref() {
            Some(host @ ("." | "..")) => format!("{host}{}", uri.path),
            _ => uri.path,
        };
        if path.is_empty() {
            return Err(RenderSourceError::InvalidUri(
                format!("{SCHEME}://"),
                "missing path to the map definition".to_string(),
            ));
        }
        let path = absolute(&path)
            .map(|p| normalize(&p))
            .map_err(|e| RenderSourceError::InvalidUri(path.clone(), e.to_string()))?;

        let query: BTreeMap<String, String> = uri.query.into_iter().collect();
        let canonical = canonical_uri(&path, &query);
        let definition: Option<Arc<str>> = uri.definition.map(Into::into);
        let key = match &definition {
            Some(xml) => format!("{canonical}#xml={:032x}", xxh3_128(xml.as_bytes())),
            None => canonical.clone(),
        };

        Ok(Self {
            path,
            query,
            definition,
            canonical,
            key,
        })
    }
}

impl FromStr for SourceIdentity {
    type Err = RenderSourceError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        Self::try_from(uri.parse::<SourceUri>()?)
    }
}

impl PartialEq for SourceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for SourceIdentity {}

/// Renders the canonical URI, which parses back into an equal identity
/// (inline definitions are not part of it).
impl Display for SourceIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Lexically removes `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                result.pop();
            }
            other => result.push(other),
        }
    }
    result
}

fn canonical_uri(path: &Path, query: &BTreeMap<String, String>) -> String {
    let path = path.to_string_lossy();
    let encoded = path
        .split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/");
    let mut uri = format!("{SCHEME}://{encoded}");
    if !query.is_empty() {
        uri.push('?');
        uri.push_str(
            &form_urlencoded::Serializer::new(String::new())
                .extend_pairs(query)
                .finish(),
        );
    }
    uri
}

#[cfg(test)]
mod tests {
    use std::env;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn cwd() -> PathBuf {
        env::current_dir().unwrap()
    }

    #[rstest]
    #[case::full("mapnik:///srv/maps/world.xml", "/srv/maps/world.xml")]
    #[case::no_scheme("/srv/maps/world.xml", "/srv/maps/world.xml")]
    #[case::dots("mapnik:///srv/maps/../maps/./world.xml", "/srv/maps/world.xml")]
    #[case::encoded("mapnik:///srv/my%20maps/world.xml", "/srv/my maps/world.xml")]
    #[case::upper_scheme("MAPNIK:///srv/world.xml", "/srv/world.xml")]
    fn absolute_paths(#[case] uri: &str, #[case] expected: &str) {
        let identity: SourceIdentity = uri.parse().unwrap();
        assert_eq!(identity.path(), Path::new(expected));
    }

    #[test]
    fn dot_host_is_relative_to_cwd() {
        let identity: SourceIdentity = "mapnik://./maps/world.xml".parse().unwrap();
        assert_eq!(identity.path(), cwd().join("maps/world.xml"));

        let identity: SourceIdentity = "mapnik://../maps/world.xml".parse().unwrap();
        let parent = cwd().parent().unwrap().to_path_buf();
        assert_eq!(identity.path(), parent.join("maps/world.xml"));
    }

    #[test]
    fn relative_path_without_scheme() {
        let identity: SourceIdentity = "maps/world.xml?scale=2".parse().unwrap();
        assert_eq!(identity.path(), cwd().join("maps/world.xml"));
        assert_eq!(identity.query().get("scale").map(String::as_str), Some("2"));
    }

    #[rstest]
    #[case("file:///srv/world.xml", "file")]
    #[case("http://example.org/world.xml", "http")]
    #[case("mbtiles:///srv/world.mbtiles", "mbtiles")]
    fn foreign_scheme(#[case] uri: &str, #[case] expected: &str) {
        match uri.parse::<SourceIdentity>() {
            Err(RenderSourceError::UnsupportedScheme { scheme, uri: v }) => {
                assert_eq!(scheme, expected);
                assert_eq!(v, uri);
            }
            v => panic!("unexpected result {v:?}"),
        }
    }

    #[test]
    fn missing_path() {
        assert!(matches!(
            "mapnik://".parse::<SourceIdentity>(),
            Err(RenderSourceError::InvalidUri(..))
        ));
    }

    #[test]
    fn canonical_string() {
        let identity: SourceIdentity = "mapnik:///srv/my%20maps/world.xml?b=2&a=1"
            .parse()
            .unwrap();
        assert_eq!(
            identity.to_string(),
            "mapnik:///srv/my%20maps/world.xml?a=1&b=2"
        );
        assert_eq!(identity.key(), identity.to_string());
    }

    #[rstest]
    #[case("mapnik:///srv/world.xml", "/srv/world.xml")]
    #[case("mapnik:///srv/x/../world.xml?b=2&a=1", "mapnik:///srv/world.xml?a=1&b=2")]
    #[case("mapnik:///srv/world.xml?b=2&a=1", "/srv/world.xml?a=1&b=2")]
    #[case("mapnik:///srv/a%3Fb.xml", "mapnik:///srv/a%3fb.xml")]
    fn equivalent_uris(#[case] a: &str, #[case] b: &str) {
        let a: SourceIdentity = a.parse().unwrap();
        let b: SourceIdentity = b.parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn serialized_form_round_trips() {
        let identity: SourceIdentity = "mapnik://./my maps/wörld.xml?style=dark".parse().unwrap();
        let reparsed: SourceIdentity = identity.to_string().parse().unwrap();
        assert_eq!(reparsed, identity);
        assert_eq!(reparsed.path(), identity.path());
        assert_eq!(reparsed.query(), identity.query());
    }

    #[test]
    fn inline_definitions_are_distinct_sources() {
        let a = SourceIdentity::try_from(
            SourceUri::from_path("/srv/world.xml").with_definition("<Map/>"),
        )
        .unwrap();
        let b = SourceIdentity::try_from(
            SourceUri::from_path("/srv/world.xml").with_definition("<Map srs='x'/>"),
        )
        .unwrap();
        let file = SourceIdentity::from_path("/srv/world.xml").unwrap();

        assert_ne!(a, b);
        assert_ne!(a, file);
        assert_eq!(a.to_string(), file.to_string());
        assert_eq!(a.definition().map(AsRef::as_ref), Some("<Map/>"));
    }

    #[rstest]
    #[case("/srv/world.xml", "world")]
    #[case("/srv/world.style.xml", "world.style")]
    #[case("/srv/world.mml", "world.mml")]
    #[case("/srv/.xml", ".xml")]
    fn source_id(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(SourceIdentity::from_path(path).unwrap().id(), expected);
    }

    #[test]
    fn base_dir() {
        let identity = SourceIdentity::from_path("/srv/maps/world.xml").unwrap();
        assert_eq!(identity.base_dir(), Path::new("/srv/maps"));
    }
}
