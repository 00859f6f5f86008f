// Inbound response parsing
//
// Every sample pulled from the response stream is classified into exactly one
// `ResponseKind`. Patterns are tried in a fixed order and the first match wins:
//
//   empty -> ping -> prediction -> marker receipt -> single channel -> multi channel
//
// Parsing is total: malformed input degrades to the most specific variant that
// still parses, ending at an untyped passthrough. Receipt fields are stored as
// received; one-based object indices are not shifted back.

use crate::marker::{CommandMarker, FlashKind, Paradigm};
use serde::Serialize;
use std::fmt;

/// Prefix the remote side puts in front of echoed markers
pub const MARKER_RECEIPT_PREFIX: &str = "marker received: ";

/// Literal keep-alive sent by the remote side
pub const PING: &str = "ping";

/// Receipt fields shared by MI and Switch events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowedEventReceipt {
    pub object_count: i32,
    pub training_target: i32,
    pub window_length: f32,
}

/// Receipt fields shared by SSVEP and TVEP events
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyEventReceipt {
    pub object_count: i32,
    pub training_target: i32,
    pub window_length: f32,
    pub frequencies: Vec<f32>,
}

/// P300 receipt; numeric fields are filled up to the first one that fails to parse
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct P300EventReceipt {
    pub flash: FlashKind,
    pub object_count: Option<i32>,
    pub training_target: Option<i32>,
    pub active_objects: Vec<i32>,
    pub is_complete: bool,
}

/// Parsed form of one inbound sample
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseKind {
    Empty,
    Ping,
    Prediction { value: i32 },
    TrialStartedMarkerReceipt,
    TrialEndsMarkerReceipt,
    TrainingCompleteMarkerReceipt,
    UpdateClassifierMarkerReceipt,
    /// Receipt for a command this side does not know
    CommandMarkerReceipt { command: String },
    /// Receipt for a comma-separated marker that did not parse as a known event
    MarkerReceipt { marker: String },
    MiEventMarkerReceipt(WindowedEventReceipt),
    SwitchEventMarkerReceipt(WindowedEventReceipt),
    SsvepEventMarkerReceipt(FrequencyEventReceipt),
    TvepEventMarkerReceipt(FrequencyEventReceipt),
    P300EventMarkerReceipt(P300EventReceipt),
    SingleChannel { value: String },
    MultiChannel { values: Vec<String> },
}

/// Concrete variant of a response, used to filter subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Empty,
    Ping,
    Prediction,
    TrialStartedMarkerReceipt,
    TrialEndsMarkerReceipt,
    TrainingCompleteMarkerReceipt,
    UpdateClassifierMarkerReceipt,
    CommandMarkerReceipt,
    MarkerReceipt,
    MiEventMarkerReceipt,
    SwitchEventMarkerReceipt,
    SsvepEventMarkerReceipt,
    TvepEventMarkerReceipt,
    P300EventMarkerReceipt,
    SingleChannel,
    MultiChannel,
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ResponseKind {
    pub fn response_type(&self) -> ResponseType {
        match self {
            ResponseKind::Empty => ResponseType::Empty,
            ResponseKind::Ping => ResponseType::Ping,
            ResponseKind::Prediction { .. } => ResponseType::Prediction,
            ResponseKind::TrialStartedMarkerReceipt => ResponseType::TrialStartedMarkerReceipt,
            ResponseKind::TrialEndsMarkerReceipt => ResponseType::TrialEndsMarkerReceipt,
            ResponseKind::TrainingCompleteMarkerReceipt => {
                ResponseType::TrainingCompleteMarkerReceipt
            }
            ResponseKind::UpdateClassifierMarkerReceipt => {
                ResponseType::UpdateClassifierMarkerReceipt
            }
            ResponseKind::CommandMarkerReceipt { .. } => ResponseType::CommandMarkerReceipt,
            ResponseKind::MarkerReceipt { .. } => ResponseType::MarkerReceipt,
            ResponseKind::MiEventMarkerReceipt(_) => ResponseType::MiEventMarkerReceipt,
            ResponseKind::SwitchEventMarkerReceipt(_) => ResponseType::SwitchEventMarkerReceipt,
            ResponseKind::SsvepEventMarkerReceipt(_) => ResponseType::SsvepEventMarkerReceipt,
            ResponseKind::TvepEventMarkerReceipt(_) => ResponseType::TvepEventMarkerReceipt,
            ResponseKind::P300EventMarkerReceipt(_) => ResponseType::P300EventMarkerReceipt,
            ResponseKind::SingleChannel { .. } => ResponseType::SingleChannel,
            ResponseKind::MultiChannel { .. } => ResponseType::MultiChannel,
        }
    }

    fn command_receipt(command: CommandMarker) -> Self {
        match command {
            CommandMarker::TrialStarted => ResponseKind::TrialStartedMarkerReceipt,
            CommandMarker::TrialEnds => ResponseKind::TrialEndsMarkerReceipt,
            CommandMarker::TrainingComplete => ResponseKind::TrainingCompleteMarkerReceipt,
            CommandMarker::UpdateClassifier => ResponseKind::UpdateClassifierMarkerReceipt,
        }
    }
}

/// A parsed sample together with its capture time and the raw values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub kind: ResponseKind,
    pub capture_time: f64,
    pub raw_sample: Vec<String>,
}

impl Response {
    pub fn response_type(&self) -> ResponseType {
        self.kind.response_type()
    }

    /// Predicted class, for prediction responses
    pub fn prediction(&self) -> Option<i32> {
        match self.kind {
            ResponseKind::Prediction { value } => Some(value),
            _ => None,
        }
    }

    /// True for every kind of marker receipt, typed or degraded
    pub fn is_marker_receipt(&self) -> bool {
        matches!(
            self.kind,
            ResponseKind::TrialStartedMarkerReceipt
                | ResponseKind::TrialEndsMarkerReceipt
                | ResponseKind::TrainingCompleteMarkerReceipt
                | ResponseKind::UpdateClassifierMarkerReceipt
                | ResponseKind::CommandMarkerReceipt { .. }
                | ResponseKind::MarkerReceipt { .. }
                | ResponseKind::MiEventMarkerReceipt(_)
                | ResponseKind::SwitchEventMarkerReceipt(_)
                | ResponseKind::SsvepEventMarkerReceipt(_)
                | ResponseKind::TvepEventMarkerReceipt(_)
                | ResponseKind::P300EventMarkerReceipt(_)
        )
    }
}

/// Classify one raw sample
pub fn build_response<S: AsRef<str>>(raw_sample: &[S], capture_time: f64) -> Response {
    let kind = match raw_sample {
        [] => ResponseKind::Empty,
        [value] => parse_single_value(value.as_ref()),
        values => ResponseKind::MultiChannel {
            values: values.iter().map(|v| v.as_ref().to_string()).collect(),
        },
    };

    Response {
        kind,
        capture_time,
        raw_sample: raw_sample.iter().map(|v| v.as_ref().to_string()).collect(),
    }
}

fn parse_single_value(value: &str) -> ResponseKind {
    if value.is_empty() {
        return ResponseKind::Empty;
    }

    let unwrapped = strip_brackets(value);

    if unwrapped == PING {
        return ResponseKind::Ping;
    }

    if let Ok(prediction) = unwrapped.parse::<i32>() {
        return ResponseKind::Prediction { value: prediction };
    }

    if let Some(body) = value.strip_prefix(MARKER_RECEIPT_PREFIX) {
        return parse_marker_receipt(body);
    }

    ResponseKind::SingleChannel {
        value: value.to_string(),
    }
}

/// Trim whitespace and surrounding `[` `]`, as sent by array-printing senders
fn strip_brackets(value: &str) -> &str {
    value.trim_matches(|c: char| c == '[' || c == ']' || c.is_whitespace())
}

fn parse_marker_receipt(body: &str) -> ResponseKind {
    if let Some(command) = CommandMarker::from_wire(body) {
        return ResponseKind::command_receipt(command);
    }

    if !body.contains(',') {
        return ResponseKind::CommandMarkerReceipt {
            command: body.to_string(),
        };
    }

    let tokens: Vec<&str> = body.split(',').map(str::trim).collect();
    let fields = &tokens[1..];

    let parsed = match Paradigm::from_tag(tokens[0]) {
        Some(Paradigm::MotorImagery) => {
            parse_windowed_event(fields).map(ResponseKind::MiEventMarkerReceipt)
        }
        Some(Paradigm::Switch) => {
            parse_windowed_event(fields).map(ResponseKind::SwitchEventMarkerReceipt)
        }
        Some(Paradigm::Ssvep) => {
            parse_frequency_event(fields).map(ResponseKind::SsvepEventMarkerReceipt)
        }
        Some(Paradigm::Tvep) => {
            parse_frequency_event(fields).map(ResponseKind::TvepEventMarkerReceipt)
        }
        Some(Paradigm::P300) => parse_p300_event(fields).map(ResponseKind::P300EventMarkerReceipt),
        None => None,
    };

    parsed.unwrap_or_else(|| ResponseKind::MarkerReceipt {
        marker: body.to_string(),
    })
}

/// `<objectCount>,<trainingTarget>,<windowLength>`
fn parse_windowed_event(fields: &[&str]) -> Option<WindowedEventReceipt> {
    match fields {
        [object_count, training_target, window_length] => Some(WindowedEventReceipt {
            object_count: object_count.parse().ok()?,
            training_target: training_target.parse().ok()?,
            window_length: window_length.parse().ok()?,
        }),
        _ => None,
    }
}

/// `<objectCount>,<trainingTarget>,<windowLength>[,<frequency>...]`
fn parse_frequency_event(fields: &[&str]) -> Option<FrequencyEventReceipt> {
    if fields.len() < 3 {
        return None;
    }

    let frequencies = fields[3..]
        .iter()
        .map(|f| f.parse::<f32>().ok())
        .collect::<Option<Vec<_>>>()?;

    Some(FrequencyEventReceipt {
        object_count: fields[0].parse().ok()?,
        training_target: fields[1].parse().ok()?,
        window_length: fields[2].parse().ok()?,
        frequencies,
    })
}

/// `<s|m>,<objectCount>,<trainingTarget>,<activeObject>[,<activeObject>...]`
///
/// Returns `None` only when the flash tag itself is missing or unknown; numeric
/// failures produce an incomplete receipt.
fn parse_p300_event(fields: &[&str]) -> Option<P300EventReceipt> {
    let flash = FlashKind::from_tag(fields.first()?)?;

    let mut receipt = P300EventReceipt {
        flash,
        object_count: None,
        training_target: None,
        active_objects: Vec::new(),
        is_complete: false,
    };

    receipt.object_count = match fields.get(1).and_then(|f| f.parse().ok()) {
        Some(count) => Some(count),
        None => return Some(receipt),
    };

    receipt.training_target = match fields.get(2).and_then(|f| f.parse().ok()) {
        Some(target) => Some(target),
        None => return Some(receipt),
    };

    let active_fields = &fields[3.min(fields.len())..];
    for field in active_fields {
        match field.parse::<i32>() {
            Ok(index) => receipt.active_objects.push(index),
            Err(_) => return Some(receipt),
        }
    }

    receipt.is_complete = match flash {
        FlashKind::Single => receipt.active_objects.len() == 1,
        FlashKind::Multi => !receipt.active_objects.is_empty(),
    };

    Some(receipt)
}
