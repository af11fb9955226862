use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ZhnerError;

/// Pipeline phase a dataset, label encoder or head call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Gradient steps: dropout on, multiplier-weighted losses.
    #[default]
    Train,
    /// Held-out scoring: losses plus metrics.
    Eval,
    /// Inference only.
    Predict,
}

impl Mode {
    /// Whether label alphabets may be derived from observed data in this mode.
    pub fn may_build_labels(&self) -> bool {
        matches!(self, Self::Train)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Eval => write!(f, "eval"),
            Self::Predict => write!(f, "predict"),
        }
    }
}

impl FromStr for Mode {
    type Err = ZhnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(Self::Train),
            "eval" | "evaluate" => Ok(Self::Eval),
            "predict" | "infer" => Ok(Self::Predict),
            other => Err(ZhnerError::InvalidMode(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parse_and_display() {
        for mode in [Mode::Train, Mode::Eval, Mode::Predict] {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
        assert!("bogus".parse::<Mode>().is_err());
    }

    #[test]
    fn only_train_builds_labels() {
        assert!(Mode::Train.may_build_labels());
        assert!(!Mode::Eval.may_build_labels());
        assert!(!Mode::Predict.may_build_labels());
    }

    #[test]
    fn mode_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Mode::Eval).unwrap(), "\"eval\"");
    }
}
