//! # Topic Composition
//!
//! All topic strings are composed here, from the template
//! `$initiator/$root/<stream>` for the three inbound streams and
//! `$root/<receiver>/config` for outbound commands. Inbound topics are
//! wrapped in a `$share/<group>/` prefix so that the workers of one client
//! receive a partitioned load; the share group defaults to the initiator
//! id.

use edgelink_types::{Address, StreamKind};

/// MQTT shared-subscription prefix.
const SHARE_PREFIX: &str = "$share";

/// Composes every topic the client uses.
#[derive(Debug, Clone)]
pub struct TopicScheme {
    root: String,
    initiator: String,
    prefix: Option<String>,
    share_group: String,
}

impl TopicScheme {
    /// Build a scheme for one client.
    pub fn new(root: impl Into<String>, initiator: impl Into<String>, prefix: Option<String>) -> Self {
        let initiator = initiator.into();
        Self {
            root: root.into(),
            share_group: initiator.clone(),
            initiator,
            prefix,
        }
    }

    /// Override the shared-subscription group.
    #[must_use]
    pub fn with_share_group(mut self, group: impl Into<String>) -> Self {
        self.share_group = group.into();
        self
    }

    /// The inbound shared-subscription filter for one stream.
    #[must_use]
    pub fn inbound(&self, stream: StreamKind) -> String {
        format!(
            "{SHARE_PREFIX}/{}/{}",
            self.share_group,
            self.plain_inbound(stream)
        )
    }

    /// The inbound filter without the share prefix (used by transports
    /// that have no shared-subscription semantics).
    #[must_use]
    pub fn plain_inbound(&self, stream: StreamKind) -> String {
        match &self.prefix {
            Some(prefix) => format!(
                "{prefix}/{}/{}/{}",
                self.initiator,
                self.root,
                stream.topic_suffix()
            ),
            None => format!("{}/{}/{}", self.initiator, self.root, stream.topic_suffix()),
        }
    }

    /// The outbound command topic of a receiver.
    #[must_use]
    pub fn outbound(&self, receiver: &Address) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{}/{}/config", self.root, receiver),
            None => format!("{}/{}/config", self.root, receiver),
        }
    }

    /// Strip a `$share/<group>/` prefix off a filter, returning the plain
    /// filter and the group.
    #[must_use]
    pub fn split_share(filter: &str) -> (&str, Option<&str>) {
        let Some(rest) = filter.strip_prefix(SHARE_PREFIX) else {
            return (filter, None);
        };
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        match rest.split_once('/') {
            Some((group, plain)) => (plain, Some(group)),
            None => (filter, None),
        }
    }
}
