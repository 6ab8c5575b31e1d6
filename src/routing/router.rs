//! Rule table used as the built-in proxy predicate.

use axum::body::Body;
use axum::http::Request;

use crate::config::RuleConfig;
use crate::proxy::predicate::{ProxyDirective, ProxyPredicate};
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

/// A compiled forwarding rule.
#[derive(Debug)]
pub struct Rule {
    pub name: String,
    upstream: String,
    priority: u32,
    matcher: AndMatcher,
}

impl Rule {
    pub fn from_config(config: &RuleConfig) -> Self {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host.clone())));
        }
        if let Some(prefix) = &config.path_prefix {
            matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
        }

        Self {
            name: config.name.clone(),
            upstream: config.upstream.trim_end_matches('/').to_string(),
            priority: config.priority,
            matcher: AndMatcher::new(matchers),
        }
    }

    /// Destination for `req`: upstream base plus the inbound path and query.
    pub fn destination(&self, req: &Request<Body>) -> String {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        format!("{}{}", self.upstream, path_and_query)
    }
}

/// Ordered forwarding rules; first match wins.
#[derive(Debug, Default)]
pub struct RouteTable {
    rules: Vec<Rule>,
}

impl RouteTable {
    /// Compile rules, highest priority first; equal priorities keep
    /// declaration order.
    pub fn from_config(rules: &[RuleConfig]) -> Self {
        let mut rules: Vec<Rule> = rules.iter().map(Rule::from_config).collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn match_request(&self, req: &Request<Body>) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matcher.matches(req))
    }
}

impl ProxyPredicate for RouteTable {
    fn evaluate(&self, request: &Request<Body>) -> ProxyDirective {
        match self.match_request(request) {
            Some(rule) => {
                tracing::debug!(rule = %rule.name, path = %request.uri().path(), "Forwarding rule matched");
                ProxyDirective::Forward(rule.destination(request))
            }
            None => ProxyDirective::Skip,
        }
    }
}
