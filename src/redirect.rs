//! Follows 3xx responses on behalf of a completed task, enforcing loop and depth limits and
//! rewriting method/body per RFC 7231 semantics.

use url::Url;

use crate::error::TaskError;
use crate::request::{Method, Request, RequestTask};

/// What to do with the response that just completed a hop.
#[derive(Debug)]
pub enum RedirectDecision {
    /// Not a redirect (or redirects disabled): deliver the response as-is.
    DoNotFollow,
    /// Follow to this next-hop task.
    Follow(RequestTask),
    /// The redirect violates a limit; deliver this error instead.
    Violation(TaskError),
}

const FOLLOWABLE_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

pub struct RedirectEngine;

impl RedirectEngine {
    /// Decides what to do given the status/location of the response just received for `task`.
    pub fn decide(task: &RequestTask, status: u16, location: Option<&str>) -> RedirectDecision {
        if !FOLLOWABLE_STATUSES.contains(&status) {
            return RedirectDecision::DoNotFollow;
        }
        let Some(location) = location.filter(|l| !l.is_empty()) else {
            return RedirectDecision::DoNotFollow;
        };
        let max_redirects = task.request.max_redirects.unwrap_or(u32::MAX);
        if max_redirects == 0 {
            return RedirectDecision::DoNotFollow;
        }

        let resolved = match task.request.url.join(location) {
            Ok(url) => url,
            Err(_) => return RedirectDecision::DoNotFollow,
        };

        if task.redirect_chain.len() as u32 >= max_redirects {
            return RedirectDecision::Violation(TaskError::TooManyRedirectsError {
                redirects: full_chain(task),
                attempted_url: resolved.to_string(),
                correlation_id: task.correlation_id.clone(),
                callback_args: task.callback_args.clone(),
            });
        }

        if already_visited(task, &resolved) {
            return RedirectDecision::Violation(TaskError::RecursiveRedirectError {
                redirects: full_chain(task),
                offending_url: resolved.to_string(),
                correlation_id: task.correlation_id.clone(),
                callback_args: task.callback_args.clone(),
            });
        }

        let (next_method, next_body) = rewrite(task.request.method, status, task.request.body.as_ref());
        let next_request = task.request.with_redirect(next_method, resolved, next_body);
        RedirectDecision::Follow(task.next_hop(next_request))
    }
}

/// The full chain including the current URL, for error reporting (the spec's "chain ∪
/// {current_url}" phrasing).
fn full_chain(task: &RequestTask) -> Vec<String> {
    let mut chain = task.redirect_chain.clone();
    chain.push(task.request.url.to_string());
    chain
}

fn already_visited(task: &RequestTask, candidate: &Url) -> bool {
    let candidate = candidate.to_string();
    task.request.url.to_string() == candidate || task.redirect_chain.iter().any(|u| u == &candidate)
}

/// Method/body rewriting table from the spec's §4.3.
fn rewrite(current: Method, status: u16, body: Option<&Vec<u8>>) -> (Method, Option<Vec<u8>>) {
    match (current, status) {
        (Method::Get, _) => (Method::Get, None),
        (_, 307) | (_, 308) => (current, body.cloned()),
        // 301, 302, 303 with a body-bearing method: rewrite to GET, drop the body.
        _ => (Method::Get, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HttpHeaders;
    use crate::request::JobHash;
    use std::time::Duration;

    fn task(method: Method, url: &str, max_redirects: Option<u32>) -> RequestTask {
        let req = Request::new(method, url, HttpHeaders::new(), None, Duration::from_secs(5), max_redirects).unwrap();
        RequestTask::new(
            "corr-1".into(),
            req,
            JobHash { class: "Job".into(), args: vec![] },
            "Cb".into(),
            serde_json::Map::new(),
            false,
        )
    }

    #[test]
    fn non_redirect_status_does_not_follow() {
        let t = task(Method::Get, "https://example.com/a", None);
        assert!(matches!(RedirectEngine::decide(&t, 200, Some("/b")), RedirectDecision::DoNotFollow));
    }

    #[test]
    fn max_redirects_zero_never_follows() {
        let t = task(Method::Get, "https://example.com/a", Some(0));
        assert!(matches!(RedirectEngine::decide(&t, 302, Some("/b")), RedirectDecision::DoNotFollow));
    }

    #[test]
    fn get_preserves_method_on_302() {
        let t = task(Method::Get, "https://example.com/a", None);
        match RedirectEngine::decide(&t, 302, Some("/b")) {
            RedirectDecision::Follow(next) => {
                assert_eq!(next.request.method, Method::Get);
                assert_eq!(next.request.url.as_str(), "https://example.com/b");
            }
            other => panic!("expected Follow, got {other:?}"),
        }
    }

    #[test]
    fn post_rewrites_to_get_and_drops_body_on_303() {
        let mut t = task(Method::Post, "https://example.com/submit", None);
        t.request.body = Some(b"{\"x\":1}".to_vec());
        match RedirectEngine::decide(&t, 303, Some("/result")) {
            RedirectDecision::Follow(next) => {
                assert_eq!(next.request.method, Method::Get);
                assert!(next.request.body.is_none());
            }
            other => panic!("expected Follow, got {other:?}"),
        }
    }

    #[test]
    fn put_preserves_body_on_307() {
        let mut t = task(Method::Put, "https://example.com/submit", None);
        t.request.body = Some(b"{\"x\":1}".to_vec());
        match RedirectEngine::decide(&t, 307, Some("/result")) {
            RedirectDecision::Follow(next) => {
                assert_eq!(next.request.method, Method::Put);
                assert_eq!(next.request.body, Some(b"{\"x\":1}".to_vec()));
            }
            other => panic!("expected Follow, got {other:?}"),
        }
    }

    #[test]
    fn too_many_redirects_raises_violation() {
        let mut t = task(Method::Get, "https://example.com/a", Some(1));
        t.redirect_chain = vec!["https://example.com/start".into()];
        match RedirectEngine::decide(&t, 302, Some("/b")) {
            RedirectDecision::Violation(TaskError::TooManyRedirectsError { redirects, .. }) => {
                assert_eq!(redirects.len(), 2);
            }
            other => panic!("expected TooManyRedirectsError, got {other:?}"),
        }
    }

    #[test]
    fn recursive_redirect_is_detected() {
        let mut t = task(Method::Get, "https://example.com/a", None);
        t.redirect_chain = vec!["https://example.com/b".into()];
        match RedirectEngine::decide(&t, 302, Some("https://example.com/b")) {
            RedirectDecision::Violation(TaskError::RecursiveRedirectError { .. }) => {}
            other => panic!("expected RecursiveRedirectError, got {other:?}"),
        }
    }
}
