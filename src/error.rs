use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// A numeric parameter the audio graph cannot accept (NaN, infinite, out of range).
    InvalidParameter { field: &'static str, value: f64 },
    UnknownSound { id: String },
    UnknownTrack { id: String },
    UnknownClip { id: String },
    UnknownPreset { id: String },
    /// Clip placement violating `start_time >= 0` / `duration > 0`.
    InvalidClip { start_time: f64, duration: f64 },
    InvalidLoopRegion { start: f64, end: f64 },
    /// The render host was closed; no node can be connected.
    ContextClosed,
    Fft(String),
    /// Offline rendering produced no frames, so nothing can be encoded.
    EmptyRender,
    Json(serde_json::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidParameter { field, value } => {
                write!(f, "Invalid value {value} for parameter '{field}'")
            }
            EngineError::UnknownSound { id } => write!(f, "Unknown sound '{id}'"),
            EngineError::UnknownTrack { id } => write!(f, "Unknown track '{id}'"),
            EngineError::UnknownClip { id } => write!(f, "Unknown clip '{id}'"),
            EngineError::UnknownPreset { id } => write!(f, "Unknown preset '{id}'"),
            EngineError::InvalidClip { start_time, duration } => write!(
                f,
                "Invalid clip placement: start {start_time}s, duration {duration}s"
            ),
            EngineError::InvalidLoopRegion { start, end } => {
                write!(f, "Invalid loop region {start}s..{end}s")
            }
            EngineError::ContextClosed => write!(f, "Audio context is closed"),
            EngineError::Fft(msg) => write!(f, "FFT error: {msg}"),
            EngineError::EmptyRender => write!(f, "Rendered buffer is empty"),
            EngineError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Json(e)
    }
}

/// Reject a value the graph cannot represent.
pub(crate) fn ensure_finite(field: &'static str, value: f64) -> Result<f64, EngineError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EngineError::InvalidParameter { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_field() {
        let e = EngineError::InvalidParameter {
            field: "duration",
            value: f64::NAN,
        };
        assert!(format!("{e}").contains("duration"));
    }

    #[test]
    fn ensure_finite_rejects_nan_and_inf() {
        assert!(ensure_finite("x", 1.0).is_ok());
        assert!(ensure_finite("x", f64::NAN).is_err());
        assert!(ensure_finite("x", f64::INFINITY).is_err());
    }
}
