//! Request interception at the page boundary.
//!
//! Every subresource request the mirrored page makes is classified against
//! the session's origin pair and either passed through, answered with an
//! inert script, or refetched from the remote origin with the local origin
//! substituted out. Classification order matters: editor assets win over
//! everything, scripts are caught before the asset rewrite, and nothing but
//! the editor's own traffic matches until the origin pair is registered.

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::protocol::ProxyControl;

/// Substrings that mark a request as belonging to the session shell itself.
pub const EDITOR_ASSET_MARKERS: &[&str] = &["getpage", "sw.js", "porthole-editor"];

/// Session-server namespace that must never be rewritten to the remote
/// origin.
pub const RESERVED_API_PREFIX: &str = "/api";

/// Body served in place of any external script.
pub const NEUTRAL_SCRIPT_BODY: &str = "console.warn('script neutralized');\n";

pub const SCRIPT_CONTENT_TYPE: &str = "application/javascript";

/// What kind of resource the requester expects, as reported by the
/// intercepting shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDestination {
    Document,
    Script,
    Style,
    Image,
    Font,
    Other,
}

#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub url: Url,
    pub destination: RequestDestination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyDecision {
    /// The session shell's own traffic; passes through untouched.
    EditorAsset,
    /// Script-destined request, answered with the inert body.
    ExternalScript,
    /// Page asset addressed to the local origin, refetched from the remote
    /// origin.
    ProxiedAsset,
    /// Everything else; the shell handles it normally.
    Unmatched,
}

/// The origin pair a session serves under, registered once the page loads.
#[derive(Debug, Clone)]
pub struct OriginPair {
    pub remote: Url,
    pub local: Url,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid origin in control message: {0}")]
    InvalidOrigin(#[from] url::ParseError),
    #[error("refetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
}

/// A verbatim copy of the remote origin's answer.
#[derive(Debug)]
pub struct FetchedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Debug)]
pub enum ProxyAnswer {
    /// Let the request continue to the network untouched.
    Pass,
    /// Serve [`NEUTRAL_SCRIPT_BODY`] with [`SCRIPT_CONTENT_TYPE`].
    NeutralizedScript,
    Fetched(FetchedResponse),
    /// The refetch failed; the shell turns this into an ordinary failed
    /// response, with no retry.
    Failed(ProxyError),
}

#[derive(Debug)]
pub struct InterceptProxy {
    origins: Option<OriginPair>,
    http: reqwest::Client,
}

impl InterceptProxy {
    /// Builds the proxy with a credential-less refetch client: no cookie
    /// store, no referer.
    pub fn new() -> Result<Self, ProxyError> {
        let http = reqwest::Client::builder().referer(false).build()?;
        Ok(Self {
            origins: None,
            http,
        })
    }

    pub fn origins(&self) -> Option<&OriginPair> {
        self.origins.as_ref()
    }

    /// Registers the origin pair from a control message. A later control
    /// message replaces the pair.
    pub fn handle_control(&mut self, control: &ProxyControl) -> Result<(), ProxyError> {
        let ProxyControl::RemoteUrl { payload, currenturl } = control;
        let remote = Url::parse(payload)?;
        let local = Url::parse(currenturl)?;
        debug!(remote = %remote, local = %local, "interception origins registered");
        self.origins = Some(OriginPair { remote, local });
        Ok(())
    }

    pub fn classify(&self, request: &InterceptedRequest) -> ProxyDecision {
        let path = request.url.path();
        if EDITOR_ASSET_MARKERS
            .iter()
            .any(|marker| path.contains(marker))
        {
            return ProxyDecision::EditorAsset;
        }
        let Some(pair) = &self.origins else {
            return ProxyDecision::Unmatched;
        };
        if is_script(request) {
            return ProxyDecision::ExternalScript;
        }
        if request.url.origin() == pair.local.origin() && !under_api_namespace(path) {
            return ProxyDecision::ProxiedAsset;
        }
        ProxyDecision::Unmatched
    }

    /// Rebuilds `url` under the remote origin, keeping path and query.
    pub fn rewrite_to_remote(&self, url: &Url) -> Option<Url> {
        let pair = self.origins.as_ref()?;
        let mut target = pair.remote.clone();
        target.set_path(url.path());
        target.set_query(url.query());
        target.set_fragment(None);
        Some(target)
    }

    /// Classifies and answers one request in place. The spawned service
    /// loop uses this for everything except refetches, which it runs
    /// concurrently.
    pub async fn answer(&self, request: &InterceptedRequest) -> ProxyAnswer {
        match self.classify(request) {
            ProxyDecision::EditorAsset | ProxyDecision::Unmatched => ProxyAnswer::Pass,
            ProxyDecision::ExternalScript => ProxyAnswer::NeutralizedScript,
            ProxyDecision::ProxiedAsset => match self.rewrite_to_remote(&request.url) {
                Some(target) => fetch_verbatim(&self.http, target).await,
                None => ProxyAnswer::Pass,
            },
        }
    }
}

fn is_script(request: &InterceptedRequest) -> bool {
    request.destination == RequestDestination::Script
        || request.url.path().ends_with(".js")
        || request.url.path().ends_with(".mjs")
}

/// Matches the reserved namespace on a segment boundary, so `/apifoo`
/// stays an ordinary asset path.
fn under_api_namespace(path: &str) -> bool {
    path == RESERVED_API_PREFIX
        || path
            .strip_prefix(RESERVED_API_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Fetches `target` and copies status, content type and body through
/// unchanged.
pub async fn fetch_verbatim(client: &reqwest::Client, target: Url) -> ProxyAnswer {
    let response = match client.get(target).send().await {
        Ok(response) => response,
        Err(err) => return ProxyAnswer::Failed(ProxyError::Fetch(err)),
    };
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    match response.bytes().await {
        Ok(body) => ProxyAnswer::Fetched(FetchedResponse {
            status,
            content_type,
            body,
        }),
        Err(err) => ProxyAnswer::Failed(ProxyError::Fetch(err)),
    }
}

/// Commands for the proxy service loop.
#[derive(Debug)]
pub enum ProxyCommand {
    Control(ProxyControl),
    Intercept {
        request: InterceptedRequest,
        reply: oneshot::Sender<ProxyAnswer>,
    },
}

/// Runs the proxy as an isolated task. Classification happens inline;
/// refetches are spawned so a slow remote origin never stalls the queue.
/// Invalid control messages are logged and dropped.
pub fn spawn_proxy(
    mut proxy: InterceptProxy,
    mut commands: mpsc::UnboundedReceiver<ProxyCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            match command {
                ProxyCommand::Control(control) => {
                    if let Err(err) = proxy.handle_control(&control) {
                        warn!(error = %err, "ignoring invalid proxy control");
                    }
                }
                ProxyCommand::Intercept { request, reply } => {
                    match proxy.classify(&request) {
                        ProxyDecision::ProxiedAsset => {
                            let Some(target) = proxy.rewrite_to_remote(&request.url) else {
                                let _ = reply.send(ProxyAnswer::Pass);
                                continue;
                            };
                            let client = proxy.http.clone();
                            tokio::spawn(async move {
                                let _ = reply.send(fetch_verbatim(&client, target).await);
                            });
                        }
                        ProxyDecision::ExternalScript => {
                            let _ = reply.send(ProxyAnswer::NeutralizedScript);
                        }
                        ProxyDecision::EditorAsset | ProxyDecision::Unmatched => {
                            let _ = reply.send(ProxyAnswer::Pass);
                        }
                    }
                }
            }
        }
    })
}
