// Stream resolution
//
// Finds an advertised stream by predicate, either once (synchronously, bounded by
// a timeout) or as a background loop that keeps trying with a zero timeout until
// the remote side shows up. Not finding a stream is the normal state before the
// remote process starts, so it is never an error.

use crate::transport::MarkerTransport;
use crate::types::{StreamDescriptor, StreamError, StreamResult};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Descriptor field a predicate clause can match on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateField {
    Name,
    Type,
    SourceId,
    Uid,
}

impl PredicateField {
    fn key(&self) -> &'static str {
        match self {
            PredicateField::Name => "name",
            PredicateField::Type => "type",
            PredicateField::SourceId => "source_id",
            PredicateField::Uid => "uid",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "name" => Some(PredicateField::Name),
            "type" => Some(PredicateField::Type),
            "source_id" => Some(PredicateField::SourceId),
            "uid" => Some(PredicateField::Uid),
            _ => None,
        }
    }

    fn value_of<'a>(&self, descriptor: &'a StreamDescriptor) -> &'a str {
        match self {
            PredicateField::Name => &descriptor.name,
            PredicateField::Type => &descriptor.stream_type,
            PredicateField::SourceId => &descriptor.source_id,
            PredicateField::Uid => &descriptor.uid,
        }
    }
}

/// Stream predicate in the LSL query form: `type='Markers' and name='Unity'`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    clauses: Vec<(PredicateField, String)>,
}

impl Predicate {
    pub fn by_type(stream_type: impl Into<String>) -> Self {
        Self {
            clauses: vec![(PredicateField::Type, stream_type.into())],
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            clauses: vec![(PredicateField::Name, name.into())],
        }
    }

    pub fn by_name_and_type(name: impl Into<String>, stream_type: impl Into<String>) -> Self {
        Self {
            clauses: vec![
                (PredicateField::Name, name.into()),
                (PredicateField::Type, stream_type.into()),
            ],
        }
    }

    /// Add a clause
    pub fn and(mut self, field: PredicateField, value: impl Into<String>) -> Self {
        self.clauses.push((field, value.into()));
        self
    }

    /// Parse the LSL query form
    pub fn parse(raw: &str) -> StreamResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(StreamError::InvalidPredicate(raw.to_string()));
        }

        let mut clauses = Vec::new();
        for clause in raw.split(" and ") {
            let (key, value) = clause
                .split_once('=')
                .ok_or_else(|| StreamError::InvalidPredicate(raw.to_string()))?;

            let field = PredicateField::from_key(key.trim())
                .ok_or_else(|| StreamError::InvalidPredicate(raw.to_string()))?;

            let value = value.trim();
            let value = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .ok_or_else(|| StreamError::InvalidPredicate(raw.to_string()))?;

            clauses.push((field, value.to_string()));
        }

        Ok(Self { clauses })
    }

    /// At least one clause and no empty values
    pub fn is_valid(&self) -> bool {
        !self.clauses.is_empty() && self.clauses.iter().all(|(_, value)| !value.is_empty())
    }

    /// True when every clause matches
    pub fn matches(&self, descriptor: &StreamDescriptor) -> bool {
        !self.clauses.is_empty()
            && self
                .clauses
                .iter()
                .all(|(field, value)| field.value_of(descriptor) == value)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .clauses
            .iter()
            .map(|(field, value)| format!("{}='{}'", field.key(), value))
            .collect();
        write!(f, "{}", rendered.join(" and "))
    }
}

impl FromStr for Predicate {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Single resolve attempt with a parsed predicate
///
/// Returns the first match; transport failures are logged and reported as "not found".
pub fn resolve(
    transport: &dyn MarkerTransport,
    predicate: &Predicate,
    timeout: f64,
) -> Option<StreamDescriptor> {
    let streams = match transport.resolve(predicate, timeout.max(0.0)) {
        Ok(streams) => streams,
        Err(e) => {
            log::warn!("Resolving {} failed: {}", predicate, e);
            return None;
        }
    };

    if streams.len() > 1 {
        log::warn!(
            "Multiple streams found for {} ({}), using first match",
            predicate,
            streams.len()
        );
    }

    streams.into_iter().next()
}

/// Single resolve attempt with a raw predicate string
///
/// An empty or malformed predicate logs a warning and returns `None` immediately.
pub fn resolve_by_predicate(
    transport: &dyn MarkerTransport,
    predicate: &str,
    timeout: f64,
) -> Option<StreamDescriptor> {
    match Predicate::parse(predicate) {
        Ok(parsed) => resolve(transport, &parsed, timeout),
        Err(e) => {
            log::warn!("Not resolving: {}", e);
            None
        }
    }
}

pub fn resolve_by_type(
    transport: &dyn MarkerTransport,
    stream_type: &str,
    timeout: f64,
) -> Option<StreamDescriptor> {
    if stream_type.is_empty() {
        log::warn!("Not resolving: empty stream type");
        return None;
    }
    resolve(transport, &Predicate::by_type(stream_type), timeout)
}

pub fn resolve_by_name(
    transport: &dyn MarkerTransport,
    name: &str,
    timeout: f64,
) -> Option<StreamDescriptor> {
    if name.is_empty() {
        log::warn!("Not resolving: empty stream name");
        return None;
    }
    resolve(transport, &Predicate::by_name(name), timeout)
}

/// Background resolve loop
///
/// Attempts a zero-timeout resolve every `poll_period` until a stream is found,
/// calls `on_resolved` once, then ends. Dropping the handle cancels the loop.
pub struct ResolveLoop {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ResolveLoop {
    pub fn spawn<F>(
        transport: Arc<dyn MarkerTransport>,
        predicate: Predicate,
        poll_period: Duration,
        cancel_token: CancellationToken,
        on_resolved: F,
    ) -> StreamResult<Self>
    where
        F: FnOnce(StreamDescriptor) + Send + 'static,
    {
        if !predicate.is_valid() {
            return Err(StreamError::InvalidPredicate(predicate.to_string()));
        }

        if poll_period.is_zero() {
            return Err(StreamError::InvalidConfig(
                "resolve poll period must be positive".to_string(),
            ));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StreamError::NoRuntime(e.to_string()))?;

        let token = cancel_token.clone();
        let handle = runtime.spawn(async move {
            let mut on_resolved = Some(on_resolved);
            let mut tick = interval(poll_period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            log::debug!("Resolve loop started for {}", predicate);

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        log::debug!("Resolve loop for {} cancelled", predicate);
                        break;
                    }

                    _ = tick.tick() => {
                        if let Some(descriptor) = resolve(transport.as_ref(), &predicate, 0.0) {
                            log::info!(
                                "Resolved stream '{}' ({}) for {}",
                                descriptor.name,
                                descriptor.uid,
                                predicate
                            );
                            if let Some(callback) = on_resolved.take() {
                                callback(descriptor);
                            }
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self {
            cancel_token,
            handle,
        })
    }

    /// Stop retrying; the loop will not call back after this returns
    pub fn cancel(&self) {
        self.cancel_token.cancel();
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

impl Drop for ResolveLoop {
    fn drop(&mut self) {
        self.cancel();
    }
}
