// Outbound marker encoding
//
// Markers are short strings pushed as single-channel samples. Commands encode to
// fixed literals; events encode to comma-separated records whose first field is
// the paradigm tag. Object indices are sent one-based, with -1 meaning "none".

use serde::{Deserialize, Serialize};
use std::fmt;

/// Experiment-timing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandMarker {
    TrialStarted,
    TrialEnds,
    TrainingComplete,
    UpdateClassifier,
}

impl CommandMarker {
    pub const ALL: [CommandMarker; 4] = [
        CommandMarker::TrialStarted,
        CommandMarker::TrialEnds,
        CommandMarker::TrainingComplete,
        CommandMarker::UpdateClassifier,
    ];

    /// Wire literal
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandMarker::TrialStarted => "Trial Started",
            CommandMarker::TrialEnds => "Trial Ends",
            CommandMarker::TrainingComplete => "Training Complete",
            CommandMarker::UpdateClassifier => "Update Classifier",
        }
    }

    /// Exact match against the wire literals
    pub fn from_wire(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for CommandMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Experiment protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Paradigm {
    MotorImagery,
    Switch,
    Ssvep,
    Tvep,
    P300,
}

impl Paradigm {
    pub fn tag(&self) -> &'static str {
        match self {
            Paradigm::MotorImagery => "mi",
            Paradigm::Switch => "switch",
            Paradigm::Ssvep => "ssvep",
            Paradigm::Tvep => "tvep",
            Paradigm::P300 => "p300",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "mi" => Some(Paradigm::MotorImagery),
            "switch" => Some(Paradigm::Switch),
            "ssvep" => Some(Paradigm::Ssvep),
            "tvep" => Some(Paradigm::Tvep),
            "p300" => Some(Paradigm::P300),
            _ => None,
        }
    }
}

/// P300 flash layout: one object per flash or a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashKind {
    Single,
    Multi,
}

impl FlashKind {
    pub fn tag(&self) -> &'static str {
        match self {
            FlashKind::Single => "s",
            FlashKind::Multi => "m",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "s" => Some(FlashKind::Single),
            "m" => Some(FlashKind::Multi),
            _ => None,
        }
    }
}

/// Paradigm events; indices are zero-based here and shifted on encode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "paradigm", rename_all = "snake_case")]
pub enum EventMarker {
    MotorImagery {
        object_count: usize,
        window_length: f32,
        training_target: i32,
    },
    Switch {
        object_count: usize,
        window_length: f32,
        training_target: i32,
    },
    Ssvep {
        object_count: usize,
        window_length: f32,
        frequencies: Vec<f32>,
        training_target: i32,
    },
    Tvep {
        object_count: usize,
        window_length: f32,
        frequencies: Vec<f32>,
        training_target: i32,
    },
    P300Single {
        object_count: usize,
        active_object: i32,
        training_target: i32,
    },
    P300Multi {
        object_count: usize,
        active_objects: Vec<i32>,
        training_target: i32,
    },
}

impl EventMarker {
    pub fn paradigm(&self) -> Paradigm {
        match self {
            EventMarker::MotorImagery { .. } => Paradigm::MotorImagery,
            EventMarker::Switch { .. } => Paradigm::Switch,
            EventMarker::Ssvep { .. } => Paradigm::Ssvep,
            EventMarker::Tvep { .. } => Paradigm::Tvep,
            EventMarker::P300Single { .. } | EventMarker::P300Multi { .. } => Paradigm::P300,
        }
    }

    fn fields(&self) -> Vec<String> {
        let tag = self.paradigm().tag().to_string();

        match self {
            EventMarker::MotorImagery {
                object_count,
                window_length,
                training_target,
            }
            | EventMarker::Switch {
                object_count,
                window_length,
                training_target,
            } => vec![
                tag,
                object_count.to_string(),
                encode_object_index(*training_target, *object_count).to_string(),
                format_window_length(*window_length),
            ],

            EventMarker::Ssvep {
                object_count,
                window_length,
                frequencies,
                training_target,
            }
            | EventMarker::Tvep {
                object_count,
                window_length,
                frequencies,
                training_target,
            } => {
                let mut fields = vec![
                    tag,
                    object_count.to_string(),
                    encode_object_index(*training_target, *object_count).to_string(),
                    format_window_length(*window_length),
                ];
                fields.extend(frequencies.iter().map(|f| f.to_string()));
                fields
            }

            EventMarker::P300Single {
                object_count,
                active_object,
                training_target,
            } => vec![
                tag,
                FlashKind::Single.tag().to_string(),
                object_count.to_string(),
                encode_object_index(*training_target, *object_count).to_string(),
                encode_object_index(*active_object, *object_count).to_string(),
            ],

            EventMarker::P300Multi {
                object_count,
                active_objects,
                training_target,
            } => {
                let mut fields = vec![
                    tag,
                    FlashKind::Multi.tag().to_string(),
                    object_count.to_string(),
                    encode_object_index(*training_target, *object_count).to_string(),
                ];
                fields.extend(
                    active_objects
                        .iter()
                        .map(|i| encode_object_index(*i, *object_count).to_string()),
                );
                fields
            }
        }
    }

    pub fn encode(&self) -> String {
        self.fields().join(",")
    }
}

/// Anything that can be pushed on the marker stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Marker {
    Command(CommandMarker),
    Event(EventMarker),
}

impl Marker {
    pub fn encode(&self) -> String {
        match self {
            Marker::Command(command) => command.as_str().to_string(),
            Marker::Event(event) => event.encode(),
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<CommandMarker> for Marker {
    fn from(command: CommandMarker) -> Self {
        Marker::Command(command)
    }
}

impl From<EventMarker> for Marker {
    fn from(event: EventMarker) -> Self {
        Marker::Event(event)
    }
}

/// One-based index when `0 <= index < object_count`, otherwise -1
///
/// An index whose one-based form does not fit in `i32` also encodes as -1.
pub fn encode_object_index(index: i32, object_count: usize) -> i32 {
    if index >= 0 && (index as usize) < object_count {
        index.checked_add(1).unwrap_or(-1)
    } else {
        -1
    }
}

/// Fixed two-decimal window length
pub fn format_window_length(window_length: f32) -> String {
    format!("{:.2}", window_length)
}
