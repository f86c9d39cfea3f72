//! Reading the URLs the identity and payment providers redirect back with.

use crate::{SessionError, SessionResult};
use reqwest::Url;

/// Query and fragment parameter both providers use.
pub const SESSION_PARAM: &str = "session_id";

const LOCAL_BASE: &str = "app://local/";

/// Accepts an absolute URL or a bare `#...` / `?...` / path reference.
fn parse_any(input: &str) -> Option<Url> {
    let input = input.trim();
    Url::parse(input)
        .ok()
        .or_else(|| Url::parse(LOCAL_BASE).ok()?.join(input).ok())
}

fn param_in(url: &Url, encoded: &str, name: &str) -> Option<String> {
    let mut scratch = url.clone();
    scratch.set_fragment(None);
    scratch.set_query(Some(encoded));
    scratch
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// The one-time token the identity provider puts in the fragment
/// (`.../dashboard#session_id=...`).
pub fn session_id_from_fragment(callback_url: &str) -> Option<String> {
    let url = parse_any(callback_url)?;
    let fragment = url.fragment()?;
    param_in(&url, fragment, SESSION_PARAM)
}

/// The checkout session id the payment provider appends to the success URL
/// (`.../payment/success?session_id=...`).
pub fn checkout_id_from_return(return_url: &str) -> Option<String> {
    let url = parse_any(return_url)?;
    url.query_pairs()
        .find(|(key, _)| key == SESSION_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Whether a URL is an identity-provider callback rather than a normal route.
pub fn is_auth_callback(url: &str) -> bool {
    url.split_once('#')
        .is_some_and(|(_, fragment)| fragment.contains("session_id="))
}

/// Where to send the user to sign in; the provider returns them to
/// `<origin>/dashboard` with the token in the fragment.
pub fn login_url(identity_provider: &str, origin: &str) -> SessionResult<Url> {
    let redirect = format!("{}/dashboard", origin.trim_end_matches('/'));
    let mut url = Url::parse(identity_provider)
        .map_err(|e| SessionError::Invalid(vec![format!("identity provider URL: {e}")]))?;
    url.query_pairs_mut().append_pair("redirect", &redirect);
    Ok(url)
}
