//! Feature vocabulary for projection and filtering.
//!
//! Span and log attributes that may be selected for a projection are closed
//! enumerations. Their labels double as the keys of the projected mapping and
//! as the wire names an external selector uses.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a label does not name a known feature or operation.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown {kind}: '{label}'")]
pub struct FeatureParseError {
    /// What was being parsed.
    pub kind: &'static str,
    /// The offending label.
    pub label: String,
}

macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $label)] $variant,)+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// The wire label of this variant.
            #[must_use]
            pub fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }

        impl FromStr for $name {
            type Err = FeatureParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.label().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| FeatureParseError {
                        kind: $kind,
                        label: s.to_string(),
                    })
            }
        }
    };
}

labelled_enum! {
    /// Selectable span attributes.
    SpanFeature, "span feature" {
        /// Span duration in seconds.
        Latency => "span latency",
        /// Span start time (UTC).
        StartTime => "span utc start time",
        /// Span end time (UTC).
        EndTime => "span utc end time",
    }
}

labelled_enum! {
    /// Selectable log attributes.
    LogFeature, "log feature" {
        /// Log timestamp (UTC).
        Timestamp => "log utc timestamp",
        /// Log level.
        Level => "log level",
        /// Originating file.
        FileName => "file name",
        /// Originating function.
        FuncName => "function name",
        /// Log message.
        Message => "log message value",
        /// Originating line number.
        LineNumber => "line number",
        /// Source line of the logging call.
        SourceCodeLine => "log line source code",
        /// Source lines above the logging call.
        SourceCodeLinesAbove => "lines above log source code",
        /// Source lines below the logging call.
        SourceCodeLinesBelow => "lines below log source code",
    }
}

labelled_enum! {
    /// Comparison applied by a log predicate.
    FeatureOp, "feature operation" {
        /// Case-insensitive equality.
        Equal => "equal",
        /// Case-insensitive inequality.
        NotEqual => "not equal",
        /// Case-insensitive substring match.
        Contains => "contains",
        /// Negated case-insensitive substring match.
        NotContains => "not contains",
    }
}

/// Which span and log attributes a projection includes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSelection {
    /// Span attributes, in emission order.
    #[serde(default)]
    pub span_features: Vec<SpanFeature>,
    /// Log attributes, in emission order.
    #[serde(default)]
    pub log_features: Vec<LogFeature>,
}

impl FeatureSelection {
    /// Selects nothing beyond the always-present identifier and name.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            span_features: Vec::new(),
            log_features: Vec::new(),
        }
    }

    /// Selects every span and log attribute.
    #[must_use]
    pub fn all() -> Self {
        Self {
            span_features: SpanFeature::ALL.to_vec(),
            log_features: LogFeature::ALL.to_vec(),
        }
    }
}

impl Default for FeatureSelection {
    fn default() -> Self {
        Self::all()
    }
}
