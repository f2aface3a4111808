use std::collections::HashSet;

use tracing::debug;

use crate::filter_chain::Filter;
use crate::notice::Notice;

/// Ignores notices where any error in the chain has one of the configured
/// types.
#[derive(Debug, Clone, Default)]
pub struct ErrorTypeFilter {
    ignored: HashSet<String>,
}

impl ErrorTypeFilter {
    pub const WEIGHT: i32 = 120;

    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored: types.into_iter().map(Into::into).collect(),
        }
    }
}

impl Filter for ErrorTypeFilter {
    fn weight(&self) -> Option<i32> {
        Some(Self::WEIGHT)
    }

    fn name(&self) -> &str {
        "error_type"
    }

    fn call(&self, notice: &mut Notice) -> anyhow::Result<()> {
        if self.ignored.is_empty() {
            return Ok(());
        }
        let matched = notice
            .error_types()?
            .into_iter()
            .find(|t| self.ignored.contains(t));
        if let Some(error_type) = matched {
            debug!(error_type = %error_type, "Ignoring notice by error type");
            notice.ignore();
        }
        Ok(())
    }
}
