//! OAuth 1.0a request signing (HMAC-SHA1).
//!
//! Every call to [`Signer::sign`] draws a fresh nonce and timestamp; nothing
//! here is cached between requests.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::distributions::Alphanumeric;
use rand::Rng;
use ring::hmac;
use url::Url;

use crate::storage::{ClientCredentials, UserTokenPair};

pub const OAUTH_VERSION: &str = "1.0";
pub const SIGNATURE_METHOD: &str = "HMAC-SHA1";

const NONCE_LEN: usize = 32;

// RFC 3986 unreserved characters stay as-is, everything else is escaped.
const OAUTH_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub fn encode(value: &str) -> String {
    utf8_percent_encode(value, OAUTH_ENCODE).to_string()
}

/// Resolves request URLs against the page the client is running on and signs them.
#[derive(Debug, Clone)]
pub struct Signer {
    page: Url,
}

impl Signer {
    pub fn new(page: Url) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Url {
        &self.page
    }

    pub fn origin(&self) -> String {
        self.page.origin().ascii_serialization()
    }

    /// Absolute URLs (anything with a scheme delimiter) pass through, root-relative
    /// paths get the current origin, anything else resolves against the page's directory.
    pub fn full_url(&self, url: &str) -> String {
        if url.contains(':') {
            return url.to_string();
        }
        if url.starts_with('/') {
            return format!("{}{}", self.origin(), url);
        }
        let href = self.page.as_str();
        let dir = match href.rfind('/') {
            Some(idx) => &href[..=idx],
            None => href,
        };
        format!("{}{}", dir, url)
    }

    pub fn sign(
        &self,
        method: &str,
        url: &str,
        client: &ClientCredentials,
        user: Option<&UserTokenPair>,
    ) -> Result<String, url::ParseError> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        let timestamp = Utc::now().timestamp().to_string();
        let full = self.full_url(url);
        sign_with(method, &full, client, user, &nonce, &timestamp)
    }
}

/// Signs with a caller-chosen nonce and timestamp. `url` must be absolute.
pub fn sign_with(
    method: &str,
    url: &str,
    client: &ClientCredentials,
    user: Option<&UserTokenPair>,
    nonce: &str,
    timestamp: &str,
) -> Result<String, url::ParseError> {
    let mut oauth = vec![
        ("oauth_version", OAUTH_VERSION.to_string()),
        ("oauth_consumer_key", client.client_id.clone()),
    ];
    if let Some(pair) = user {
        oauth.push(("oauth_token", pair.token.clone()));
    }
    oauth.push(("oauth_timestamp", timestamp.to_string()));
    oauth.push(("oauth_nonce", nonce.to_string()));
    oauth.push(("oauth_signature_method", SIGNATURE_METHOD.to_string()));

    let parsed = Url::parse(url)?;
    let base = base_string(method, &parsed, &oauth);
    let key = format!(
        "{}&{}",
        encode(&client.client_secret),
        encode(user.map(|pair| pair.secret.as_str()).unwrap_or(""))
    );
    let tag = hmac::sign(
        &hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key.as_bytes()),
        base.as_bytes(),
    );
    oauth.push(("oauth_signature", STANDARD.encode(tag.as_ref())));

    let params = oauth
        .iter()
        .map(|(name, value)| format!("{}=\"{}\"", encode(name), encode(value)))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!("OAuth {}", params))
}

/// Signature base string: method, normalized URL and the sorted parameter set
/// (query string plus oauth parameters).
pub fn base_string(method: &str, url: &Url, oauth: &[(&str, String)]) -> String {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (encode(&k), encode(&v)))
        .collect();
    params.extend(oauth.iter().map(|(k, v)| (encode(k), encode(v))));
    params.sort();
    let normalized = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        encode(&base_url(url)),
        encode(&normalized)
    )
}

fn base_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.port() {
        Some(port) => format!("{}://{}:{}{}", url.scheme(), host, port, url.path()),
        None => format!("{}://{}{}", url.scheme(), host, url.path()),
    }
}

/// Splits an `Authorization: OAuth ...` value back into its parameters.
pub fn parse_header(header: &str) -> Option<Vec<(String, String)>> {
    let rest = header.strip_prefix("OAuth ")?;
    rest.split(',')
        .map(|part| {
            let (name, value) = part.trim().split_once('=')?;
            let value = value.trim_matches('"');
            let decoded = percent_encoding::percent_decode_str(value)
                .decode_utf8()
                .ok()?
                .into_owned();
            Some((name.to_string(), decoded))
        })
        .collect()
}

pub fn header_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photos_client() -> ClientCredentials {
        ClientCredentials {
            client_id: "dpf43f3p2l4k3l03".into(),
            client_secret: "kd94hf93k423kf44".into(),
        }
    }

    fn photos_token() -> UserTokenPair {
        UserTokenPair {
            token: "nnch734d00sl2jdk".into(),
            secret: "pfkkdhi9sl3r4s00".into(),
        }
    }

    #[test]
    fn base_string_matches_reference_example() {
        let url = Url::parse("http://photos.example.net/photos?file=vacation.jpg&size=original")
            .unwrap();
        let oauth = vec![
            ("oauth_version", "1.0".to_string()),
            ("oauth_consumer_key", "dpf43f3p2l4k3l03".to_string()),
            ("oauth_token", "nnch734d00sl2jdk".to_string()),
            ("oauth_timestamp", "1191242096".to_string()),
            ("oauth_nonce", "kllo9940pd9333jh".to_string()),
            ("oauth_signature_method", "HMAC-SHA1".to_string()),
        ];
        assert_eq!(
            base_string("GET", &url, &oauth),
            "GET&http%3A%2F%2Fphotos.example.net%2Fphotos&file%3Dvacation.jpg%26oauth_consumer_key%3Ddpf43f3p2l4k3l03%26oauth_nonce%3Dkllo9940pd9333jh%26oauth_signature_method%3DHMAC-SHA1%26oauth_timestamp%3D1191242096%26oauth_token%3Dnnch734d00sl2jdk%26oauth_version%3D1.0%26size%3Doriginal"
        );
    }

    #[test]
    fn signature_matches_reference_example() {
        let header = sign_with(
            "GET",
            "http://photos.example.net/photos?file=vacation.jpg&size=original",
            &photos_client(),
            Some(&photos_token()),
            "kllo9940pd9333jh",
            "1191242096",
        )
        .unwrap();
        let params = parse_header(&header).unwrap();
        assert_eq!(
            header_param(&params, "oauth_signature"),
            Some("tR3+Ty81lMeYAr/Fid0kMTYa/WM=")
        );
    }

    #[test]
    fn token_only_present_with_user_pair() {
        let signer = Signer::new(Url::parse("https://pump.example/main/login").unwrap());
        let anon = signer
            .sign("POST", "/api/client/x", &photos_client(), None)
            .unwrap();
        let params = parse_header(&anon).unwrap();
        assert!(header_param(&params, "oauth_token").is_none());
        assert_eq!(
            header_param(&params, "oauth_consumer_key"),
            Some("dpf43f3p2l4k3l03")
        );
        assert_eq!(header_param(&params, "oauth_version"), Some("1.0"));

        let authed = signer
            .sign("POST", "/api/x", &photos_client(), Some(&photos_token()))
            .unwrap();
        let params = parse_header(&authed).unwrap();
        assert_eq!(header_param(&params, "oauth_token"), Some("nnch734d00sl2jdk"));
    }

    #[test]
    fn each_signature_uses_a_fresh_nonce() {
        let signer = Signer::new(Url::parse("https://pump.example/").unwrap());
        let first = signer
            .sign("POST", "/api/x", &photos_client(), None)
            .unwrap();
        let second = signer
            .sign("POST", "/api/x", &photos_client(), None)
            .unwrap();
        let first = parse_header(&first).unwrap();
        let second = parse_header(&second).unwrap();
        assert_ne!(
            header_param(&first, "oauth_nonce"),
            header_param(&second, "oauth_nonce")
        );
        assert_ne!(
            header_param(&first, "oauth_signature"),
            header_param(&second, "oauth_signature")
        );
    }

    #[test]
    fn full_url_resolution() {
        let signer = Signer::new(Url::parse("https://pump.example:8443/evan/favorites").unwrap());
        assert_eq!(
            signer.full_url("https://elsewhere.example/x"),
            "https://elsewhere.example/x"
        );
        assert_eq!(
            signer.full_url("/main/renew"),
            "https://pump.example:8443/main/renew"
        );
        assert_eq!(
            signer.full_url("followers"),
            "https://pump.example:8443/evan/followers"
        );
    }
}
