/// Recoverable analysis failures.
///
/// None of these are fatal to a session: callers render the message in
/// place of the result and carry on with the next analysis or city.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("insufficient data for {analysis}: need at least {needed} points, got {got}")]
    InsufficientData {
        analysis: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    #[error("computation failed: {0}")]
    ComputationFailure(String),
}

impl AnalysisError {
    pub fn insufficient(analysis: &'static str, needed: usize, got: usize) -> Self {
        Self::InsufficientData { analysis, needed, got }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_message_names_the_minimum() {
        let err = AnalysisError::insufficient("seasonal decomposition", 24, 12);
        assert_eq!(
            err.to_string(),
            "insufficient data for seasonal decomposition: need at least 24 points, got 12"
        );
    }
}
